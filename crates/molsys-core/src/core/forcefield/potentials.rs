use super::term::{FFComponents, Symbol};
use crate::core::groups::molgroup::MoleculeGroup;
use crate::core::models::ids::MolNum;
use crate::core::models::property::{Property, PropertyMap};
use crate::core::models::views::PartialMolecule;
use crate::error::{Error, Result};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// Read-only view of a forcefield handed to [`Potential::recalculate_energy`].
pub struct EnergyContext<'a> {
    pub(crate) groups: &'a [MoleculeGroup],
    pub(crate) maps: &'a [BTreeMap<MolNum, PropertyMap>],
    pub(crate) properties: &'a BTreeMap<String, Property>,
}

impl<'a> EnergyContext<'a> {
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, idx: usize) -> Option<&'a MoleculeGroup> {
        self.groups.get(idx)
    }

    /// The property key molecule `molnum` in group `idx` was added with for
    /// the default name `name`.
    pub fn source<'b>(&'b self, idx: usize, molnum: MolNum, name: &'b str) -> &'b str {
        match self.maps.get(idx).and_then(|maps| maps.get(&molnum)) {
            Some(map) => map.source(name),
            None => name,
        }
    }

    pub fn property(&self, name: &str) -> Option<&'a Property> {
        self.properties.get(name)
    }
}

/// The cached energy values a potential publishes into.
pub struct EnergyTable<'a> {
    pub(crate) components: &'a FFComponents,
    pub(crate) values: &'a mut BTreeMap<Symbol, f64>,
}

impl EnergyTable<'_> {
    pub fn components(&self) -> &FFComponents {
        self.components
    }

    pub fn set_component(&mut self, symbol: &Symbol, value: f64) -> Result<()> {
        self.check(symbol)?;
        self.values.insert(symbol.clone(), value);
        Ok(())
    }

    pub fn change_component(&mut self, symbol: &Symbol, delta: f64) -> Result<()> {
        self.check(symbol)?;
        *self.values.entry(symbol.clone()).or_insert(0.0) += delta;
        Ok(())
    }

    fn check(&self, symbol: &Symbol) -> Result<()> {
        if self.components.contains(symbol) {
            Ok(())
        } else {
            Err(Error::MissingComponent(symbol.clone()))
        }
    }
}

/// The numerical core behind a forcefield.
///
/// A forcefield only calls [`Potential::recalculate_energy`] when its cache is
/// dirty; the potential never sees partially edited groups.
pub trait Potential: fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// One name per group the forcefield holds.
    fn group_names(&self) -> Vec<String> {
        vec!["molecules".to_string()]
    }

    /// Energy parts published besides the total.
    fn component_parts(&self) -> Vec<String> {
        Vec::new()
    }

    /// Checks that `view` carries everything needed to join group `group_idx`.
    fn validate(&self, _group_idx: usize, _view: &PartialMolecule, _map: &PropertyMap) -> Result<()> {
        Ok(())
    }

    fn validate_property(&self, _name: &str, _value: &Property) -> Result<()> {
        Ok(())
    }

    fn recalculate_energy(&self, ctx: &EnergyContext<'_>, energies: &mut EnergyTable<'_>) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Contributes nothing. Useful for forcefields that only hold groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPotential;

impl Potential for NullPotential {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn recalculate_energy(&self, _ctx: &EnergyContext<'_>, energies: &mut EnergyTable<'_>) -> Result<()> {
        let total = energies.components().total().clone();
        energies.set_component(&total, 0.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sums a per-atom scalar property over every selected atom.
///
/// With several groups, each group publishes its sum as a part named after
/// the group and the total is the sum of the parts. The forcefield property
/// `scale` (a scalar, default 1) multiplies every value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySumPotential {
    property: String,
    groups: Vec<String>,
}

impl PropertySumPotential {
    pub const SCALE: &'static str = "scale";

    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            groups: vec!["molecules".to_string()],
        }
    }

    pub fn with_groups<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    fn scalars<'m>(&self, view: &'m PartialMolecule, source: &str) -> Result<&'m [f64]> {
        let value = view.molecule().property(source)?;
        value.as_scalars().ok_or_else(|| {
            Error::Incompatible(format!(
                "property '{source}' of molecule {} is {}, expected per-atom scalars",
                view.number(),
                value.kind()
            ))
        })
    }
}

impl Default for PropertySumPotential {
    fn default() -> Self {
        Self::new("charge")
    }
}

impl Potential for PropertySumPotential {
    fn kind(&self) -> &'static str {
        "property-sum"
    }

    fn group_names(&self) -> Vec<String> {
        self.groups.clone()
    }

    fn component_parts(&self) -> Vec<String> {
        if self.groups.len() > 1 {
            self.groups.clone()
        } else {
            Vec::new()
        }
    }

    fn validate(&self, _group_idx: usize, view: &PartialMolecule, map: &PropertyMap) -> Result<()> {
        self.scalars(view, map.source(&self.property)).map(|_| ())
    }

    fn validate_property(&self, name: &str, value: &Property) -> Result<()> {
        if name == Self::SCALE && value.as_scalar().is_none() {
            return Err(Error::Incompatible(format!(
                "forcefield property '{name}' must be a scalar, not {}",
                value.kind()
            )));
        }
        Ok(())
    }

    fn recalculate_energy(&self, ctx: &EnergyContext<'_>, energies: &mut EnergyTable<'_>) -> Result<()> {
        let scale = ctx
            .property(Self::SCALE)
            .and_then(Property::as_scalar)
            .unwrap_or(1.0);

        let mut total = 0.0;
        for idx in 0..ctx.n_groups() {
            let Some(group) = ctx.group(idx) else { continue };
            let mut sum = 0.0;
            for view in group.views() {
                let source = ctx.source(idx, view.number(), &self.property);
                let values = self.scalars(&view, source)?;
                sum += view
                    .selection()
                    .indices()
                    .into_iter()
                    .filter_map(|atom| values.get(atom))
                    .sum::<f64>();
            }
            sum *= scale;
            if self.groups.len() > 1 {
                let part = energies.components().part(&self.groups[idx])?.clone();
                energies.set_component(&part, sum)?;
            }
            total += sum;
        }

        let symbol = energies.components().total().clone();
        energies.set_component(&symbol, total)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
