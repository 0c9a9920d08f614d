use crate::core::forcefield::ff::FF;
use crate::core::forcefield::potentials::{NullPotential, PropertySumPotential};
use crate::core::forcefield::term::{ComponentValue, Expression, Symbol};
use crate::core::models::ids::{MGID, MGNum};
use crate::core::models::molecule::Molecule;
use crate::core::models::property::Property;
use crate::engine::config::{ConfigError, SystemConfig};
use crate::engine::constraint::ComponentConstraint;
use crate::engine::monitor::EnergyMonitor;
use crate::error::{Error, Result};
use nalgebra::Point3;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A declarative description of a system and the edits to replay on it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub system: SystemConfig,
    #[serde(default)]
    pub molecules: Vec<MoleculeSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub forcefields: Vec<ForceFieldSpec>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub monitors: Vec<MonitorSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        Self::parse(content, "<string>")
    }

    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    fn parse(content: &str, origin: &str) -> std::result::Result<Self, ConfigError> {
        let scenario: Scenario = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        scenario.system.validate()?;
        Ok(scenario)
    }
}

/// A property value as written in a scenario file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Scalar(f64),
    Scalars(Vec<f64>),
    Coordinates(Vec<[f64; 3]>),
    Text(String),
}

impl From<&PropertyValue> for Property {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Scalar(v) => Property::Scalar(*v),
            PropertyValue::Scalars(v) => Property::Scalars(v.clone()),
            PropertyValue::Coordinates(points) => {
                Property::Coordinates(points.iter().map(|[x, y, z]| Point3::new(*x, *y, *z)).collect())
            }
            PropertyValue::Text(text) => Property::Text(text.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoleculeSpec {
    pub name: String,
    pub atoms: usize,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl MoleculeSpec {
    pub fn build(&self) -> Result<Molecule> {
        let mut molecule = Molecule::new(&self.name, self.atoms);
        for (name, value) in &self.properties {
            molecule = molecule.with_property(name, value)?;
        }
        Ok(molecule)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    pub number: Option<u64>,
    #[serde(default)]
    pub molecules: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PotentialKind {
    Null,
    PropertySum,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForceFieldSpec {
    pub name: String,
    pub kind: PotentialKind,
    /// Summed property for `property_sum` forcefields.
    pub property: Option<String>,
    /// Group names for a `property_sum` forcefield with several groups.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Explicit group numbers, one per group.
    #[serde(default)]
    pub numbers: Vec<u64>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Molecules placed in every group of the forcefield.
    #[serde(default)]
    pub molecules: Vec<String>,
}

impl ForceFieldSpec {
    /// Builds the (still empty) forcefield with its properties set.
    pub fn build(&self) -> Result<FF> {
        let numbers = self.numbers.iter().map(|n| MGNum::new(*n));
        let mut ff = match self.kind {
            PotentialKind::Null => {
                if self.property.is_some() || !self.groups.is_empty() {
                    return Err(Error::Incompatible(format!(
                        "forcefield '{}' has no energy, so it takes no property or groups",
                        self.name
                    )));
                }
                if self.numbers.is_empty() {
                    FF::new(&self.name, NullPotential)
                } else {
                    FF::with_groups(&self.name, NullPotential, numbers)?
                }
            }
            PotentialKind::PropertySum => {
                let mut potential = match &self.property {
                    Some(property) => PropertySumPotential::new(property),
                    None => PropertySumPotential::default(),
                };
                if !self.groups.is_empty() {
                    potential = potential.with_groups(self.groups.iter().cloned());
                }
                if self.numbers.is_empty() {
                    FF::new(&self.name, potential)
                } else {
                    FF::with_groups(&self.name, potential, numbers)?
                }
            }
        };
        for (name, value) in &self.properties {
            ff.set_property(name, value)?;
        }
        Ok(ff)
    }
}

/// `constant + Σ coefficient·symbol`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionSpec {
    #[serde(default)]
    pub constant: f64,
    #[serde(default)]
    pub terms: BTreeMap<String, f64>,
}

impl From<&ExpressionSpec> for Expression {
    fn from(spec: &ExpressionSpec) -> Self {
        let mut expression = Expression::constant(spec.constant);
        for (symbol, coefficient) in &spec.terms {
            expression += Expression::from(Symbol::new(symbol.as_str())) * *coefficient;
        }
        expression
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ComponentSpec {
    Constant(f64),
    Expression(ExpressionSpec),
}

impl From<&ComponentSpec> for ComponentValue {
    fn from(spec: &ComponentSpec) -> Self {
        match spec {
            ComponentSpec::Constant(value) => ComponentValue::Constant(*value),
            ComponentSpec::Expression(expr) => ComponentValue::Expression(expr.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintSpec {
    pub name: Option<String>,
    pub component: String,
    pub expression: ExpressionSpec,
    pub tolerance: Option<f64>,
}

impl ConstraintSpec {
    pub fn build(&self) -> ComponentConstraint {
        let mut constraint = ComponentConstraint::new(Symbol::new(self.component.as_str()), &self.expression);
        if let Some(name) = &self.name {
            constraint = constraint.with_name(name);
        }
        if let Some(tolerance) = self.tolerance {
            constraint = constraint.with_tolerance(tolerance);
        }
        constraint
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorSpec {
    pub name: String,
    #[serde(default = "default_frequency")]
    pub frequency: u64,
    /// Recorded components; every component when empty.
    #[serde(default)]
    pub components: Vec<String>,
}

fn default_frequency() -> u64 {
    1
}

impl MonitorSpec {
    pub fn build(&self) -> EnergyMonitor {
        if self.components.is_empty() {
            EnergyMonitor::new()
        } else {
            EnergyMonitor::with_components(self.components.iter().map(|c| Symbol::new(c.as_str())))
        }
    }
}

/// One labelled edit.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub label: String,
    #[serde(flatten)]
    pub action: Action,
}

/// Group lists select by name; an empty list selects every group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Add {
        molecules: Vec<String>,
        #[serde(default)]
        groups: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    Remove {
        molecules: Vec<String>,
        #[serde(default)]
        groups: Vec<String>,
        /// Remove every copy of each view rather than one.
        #[serde(default)]
        all: bool,
    },
    Clear {
        #[serde(default)]
        groups: Vec<String>,
    },
    SetContents {
        molecules: Vec<String>,
        #[serde(default)]
        groups: Vec<String>,
    },
    /// Sets a property on a molecule and pushes the new version everywhere.
    Update {
        molecule: String,
        property: String,
        value: PropertyValue,
    },
    SetComponent {
        component: String,
        value: ComponentSpec,
    },
    SetProperty {
        forcefield: Option<String>,
        property: String,
        value: PropertyValue,
    },
    AddGroup {
        group: GroupSpec,
    },
    RemoveGroup {
        groups: Vec<String>,
    },
    AddForcefield {
        forcefield: ForceFieldSpec,
    },
    RemoveForcefield {
        name: String,
    },
    Rename {
        name: String,
    },
    ApplyConstraints,
    CollectStats,
}

/// Selects the named groups, or every group for an empty list.
pub fn group_id(names: &[String]) -> MGID {
    let mut ids = names.iter().map(|name| MGID::name(name.as_str()));
    match ids.next() {
        None => MGID::All,
        Some(first) => ids.fold(first, MGID::or),
    }
}
