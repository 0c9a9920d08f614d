use super::potentials::{EnergyContext, EnergyTable, Potential};
use super::term::{FFComponents, Symbol};
use crate::core::groups::base::MolGroupsBase;
use crate::core::groups::index::MolGroupIndex;
use crate::core::groups::molgroup::MoleculeGroup;
use crate::core::models::ids::{MGID, MGNum, MolNum};
use crate::core::models::property::{Property, PropertyMap};
use crate::core::models::views::{Molecules, PartialMolecule};
use crate::core::version::Version;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FFData {
    uid: Uuid,
    name: String,
    version: Version,
    groups: Vec<MoleculeGroup>,
    /// Per group, the property map each molecule was added with.
    maps: Vec<BTreeMap<MolNum, PropertyMap>>,
    index: MolGroupIndex,
    components: FFComponents,
    energies: BTreeMap<Symbol, f64>,
    properties: BTreeMap<String, Property>,
    dirty: bool,
}

/// A forcefield: molecule groups plus a cached energy.
///
/// The cache is dirty after any change to the groups or properties and is
/// refreshed lazily, through the [`Potential`], the next time an energy is
/// read. Edits that target several groups are all-or-nothing.
///
/// Two forcefields are equal when they share UID and version.
#[derive(Debug, Clone)]
pub struct FF {
    d: Arc<FFData>,
    potential: Arc<dyn Potential>,
}

impl FF {
    pub fn new(name: impl Into<String>, potential: impl Potential) -> Self {
        let n_groups = potential.group_names().len();
        let numbers = (0..n_groups).map(|_| MGNum::new_unique()).collect();
        Self::build(name.into(), Arc::new(potential), numbers)
    }

    /// A forcefield whose groups use the given numbers, in order.
    pub fn with_groups(
        name: impl Into<String>,
        potential: impl Potential,
        numbers: impl IntoIterator<Item = MGNum>,
    ) -> Result<Self> {
        let numbers: Vec<MGNum> = numbers.into_iter().collect();
        let expected = potential.group_names().len();
        if numbers.len() != expected {
            return Err(Error::Incompatible(format!(
                "a {} forcefield holds {expected} group(s), {} number(s) given",
                potential.kind(),
                numbers.len()
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(repeated) = numbers.iter().find(|n| !seen.insert(**n)) {
            return Err(Error::DuplicateGroup(format!(
                "group number {repeated} given twice"
            )));
        }
        Ok(Self::build(name.into(), Arc::new(potential), numbers))
    }

    /// `numbers` must be distinct.
    fn build(name: String, potential: Arc<dyn Potential>, numbers: Vec<MGNum>) -> Self {
        let group_names = potential.group_names();
        let groups: Vec<MoleculeGroup> = numbers
            .iter()
            .zip(&group_names)
            .map(|(number, group)| {
                let label = if group_names.len() == 1 {
                    name.clone()
                } else {
                    format!("{name}:{group}")
                };
                MoleculeGroup::with_number(*number, label)
            })
            .collect();

        let mut index = MolGroupIndex::new();
        for group in &groups {
            index.insert_group(group);
        }

        Self {
            d: Arc::new(FFData {
                uid: Uuid::new_v4(),
                components: FFComponents::new(&name, &potential.component_parts()),
                name,
                version: Version::new(),
                maps: vec![BTreeMap::new(); groups.len()],
                groups,
                index,
                energies: BTreeMap::new(),
                properties: BTreeMap::new(),
                dirty: true,
            }),
            potential,
        }
    }

    fn data_mut(&mut self) -> &mut FFData {
        Arc::make_mut(&mut self.d)
    }

    pub fn uid(&self) -> Uuid {
        self.d.uid
    }

    pub fn name(&self) -> &str {
        &self.d.name
    }

    pub fn version(&self) -> &Version {
        &self.d.version
    }

    pub fn is_dirty(&self) -> bool {
        self.d.dirty
    }

    pub fn components(&self) -> &FFComponents {
        &self.d.components
    }

    pub fn potential(&self) -> &dyn Potential {
        self.potential.as_ref()
    }

    pub fn potential_as<P: Potential>(&self) -> Result<&P> {
        self.potential
            .as_any()
            .downcast_ref::<P>()
            .ok_or_else(|| Error::InvalidCast {
                from: format!("{} potential", self.potential.kind()),
                to: std::any::type_name::<P>().to_string(),
            })
    }

    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.d.properties
    }

    pub fn property(&self, name: &str) -> Result<&Property> {
        self.d
            .properties
            .get(name)
            .ok_or_else(|| Error::missing_property(name, None))
    }

    /// Sets a forcefield-level property. Returns false if it already had this
    /// value.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Property>) -> Result<bool> {
        let name = name.into();
        let value = value.into();
        self.potential.validate_property(&name, &value)?;
        if self.d.properties.get(&name) == Some(&value) {
            return Ok(false);
        }
        self.data_mut().properties.insert(name, value);
        self.mark_changed(true);
        Ok(true)
    }

    /// Forces the next energy read to recompute.
    pub fn must_now_recalculate_from_scratch(&mut self) {
        if !self.d.dirty {
            self.data_mut().dirty = true;
        }
    }

    pub fn energy(&mut self) -> Result<f64> {
        let total = self.d.components.total().clone();
        self.energy_of(&total)
    }

    pub fn energy_of(&mut self, symbol: &Symbol) -> Result<f64> {
        self.recalculate()?;
        if !self.d.components.contains(symbol) {
            return Err(Error::MissingComponent(symbol.clone()));
        }
        Ok(self.d.energies.get(symbol).copied().unwrap_or(0.0))
    }

    pub fn energies(&mut self) -> Result<BTreeMap<Symbol, f64>> {
        self.recalculate()?;
        Ok(self.d.energies.clone())
    }

    fn recalculate(&mut self) -> Result<()> {
        if !self.d.dirty {
            return Ok(());
        }
        let mut values: BTreeMap<Symbol, f64> = self
            .d
            .components
            .symbols()
            .map(|symbol| (symbol.clone(), 0.0))
            .collect();
        {
            let ctx = EnergyContext {
                groups: &self.d.groups,
                maps: &self.d.maps,
                properties: &self.d.properties,
            };
            let mut table = EnergyTable {
                components: &self.d.components,
                values: &mut values,
            };
            self.potential.recalculate_energy(&ctx, &mut table)?;
        }
        trace!(forcefield = %self.d.name, "energy recalculated");
        let d = self.data_mut();
        d.energies = values;
        d.dirty = false;
        Ok(())
    }

    fn mark_changed(&mut self, structural: bool) {
        let d = self.data_mut();
        if structural {
            d.version.increment_major();
        } else {
            d.version.increment_minor();
        }
        d.dirty = true;
    }

    fn position(&self, mgnum: MGNum) -> Result<usize> {
        self.d
            .groups
            .iter()
            .position(|group| group.number() == mgnum)
            .ok_or_else(|| Error::missing_group_num(mgnum))
    }

    fn targets(&self, id: &MGID) -> Result<Vec<usize>> {
        id.map(self)?
            .into_iter()
            .map(|mgnum| self.position(mgnum))
            .collect()
    }

    /// Runs `op`, restoring the pre-call state if it fails.
    fn checkpointed<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoint = Arc::clone(&self.d);
        match op(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                trace!(forcefield = %self.d.name, error = %e, "restoring checkpoint");
                self.d = checkpoint;
                Err(e)
            }
        }
    }

    /// Patches the index and drops maps for molecules no longer in group `idx`.
    fn sync(d: &mut FFData, idx: usize, touched: BTreeSet<MolNum>) {
        let group = &d.groups[idx];
        d.maps[idx].retain(|molnum, _| group.contains(*molnum));
        d.index.sync(group, touched);
    }

    fn edit_groups<F>(&mut self, targets: Vec<usize>, structural: bool, mut edit: F) -> Result<bool>
    where
        F: FnMut(&mut FFData, usize) -> Result<Option<BTreeSet<MolNum>>>,
    {
        self.checkpointed(|ff| {
            let mut changed = false;
            for idx in targets {
                let d = ff.data_mut();
                if let Some(touched) = edit(d, idx)? {
                    Self::sync(d, idx, touched);
                    changed = true;
                }
            }
            if changed {
                ff.mark_changed(structural);
            }
            Ok(changed)
        })
    }
}

/// Checks each view against the version `group` would actually store.
fn check_views(
    potential: &dyn Potential,
    group: &MoleculeGroup,
    idx: usize,
    molecules: &Molecules,
    map: &PropertyMap,
) -> Result<()> {
    for incoming in molecules.iter() {
        let molecule = group
            .molecule(incoming.number())
            .map_or(incoming.molecule(), |resident| resident.molecule());
        for selection in incoming.selections() {
            let view = PartialMolecule::new(molecule.clone(), selection.clone())?;
            potential.validate(idx, &view, map)?;
        }
    }
    Ok(())
}

/// Checks the resident views of `group` as they would read after `update`.
fn check_update(
    potential: &dyn Potential,
    group: &MoleculeGroup,
    idx: usize,
    maps: &BTreeMap<MolNum, PropertyMap>,
    molecules: &Molecules,
) -> Result<()> {
    let default_map = PropertyMap::default();
    for incoming in molecules.iter() {
        let Some(resident) = group.molecule(incoming.number()) else {
            continue;
        };
        let map = maps.get(&incoming.number()).unwrap_or(&default_map);
        for selection in resident.selections() {
            let view = PartialMolecule::new(incoming.molecule().clone(), selection.clone())?;
            potential.validate(idx, &view, map)?;
        }
    }
    Ok(())
}

impl MolGroupsBase for FF {
    fn index(&self) -> &MolGroupIndex {
        &self.d.index
    }

    fn group(&self, mgnum: MGNum) -> Result<&MoleculeGroup> {
        Ok(&self.d.groups[self.position(mgnum)?])
    }

    fn add_with_map(&mut self, molecules: &Molecules, id: &MGID, map: &PropertyMap) -> Result<()> {
        let targets = self.targets(id)?;
        let potential = Arc::clone(&self.potential);
        self.edit_groups(targets, true, |d, idx| {
            check_views(potential.as_ref(), &d.groups[idx], idx, molecules, map)?;
            if !d.groups[idx].add(molecules.clone()) {
                return Ok(None);
            }
            for molnum in molecules.mol_nums() {
                d.maps[idx].insert(molnum, map.clone());
            }
            Ok(Some(molecules.mol_nums().collect()))
        })?;
        Ok(())
    }

    fn add_if_unique_with_map(
        &mut self,
        molecules: &Molecules,
        id: &MGID,
        map: &PropertyMap,
    ) -> Result<Molecules> {
        let targets = self.targets(id)?;
        let potential = Arc::clone(&self.potential);
        let mut added = Molecules::new();
        self.edit_groups(targets, true, |d, idx| {
            check_views(potential.as_ref(), &d.groups[idx], idx, molecules, map)?;
            let new_views = d.groups[idx].add_if_unique(molecules.clone());
            if new_views.is_empty() {
                return Ok(None);
            }
            for views in new_views.iter() {
                d.maps[idx].entry(views.number()).or_insert_with(|| map.clone());
                added.add_views(views);
            }
            Ok(Some(new_views.mol_nums().collect()))
        })?;
        Ok(added)
    }

    fn remove(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        let targets = self.targets(id)?;
        self.edit_groups(targets, true, |d, idx| {
            Ok(d.groups[idx]
                .remove(molecules.clone())
                .then(|| molecules.mol_nums().collect()))
        })
    }

    fn remove_all(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        let targets = self.targets(id)?;
        self.edit_groups(targets, true, |d, idx| {
            Ok(d.groups[idx]
                .remove_all(molecules.clone())
                .then(|| molecules.mol_nums().collect()))
        })
    }

    fn clear_groups(&mut self, id: &MGID) -> Result<bool> {
        let targets = self.targets(id)?;
        self.edit_groups(targets, true, |d, idx| {
            let touched = d.groups[idx].mol_nums().iter().copied().collect();
            Ok(d.groups[idx].clear().then_some(touched))
        })
    }

    fn update(&mut self, molecules: &Molecules) -> Result<bool> {
        let mut targets = BTreeSet::new();
        for molnum in molecules.mol_nums() {
            for mgnum in self.groups_containing(molnum) {
                targets.insert(self.position(mgnum)?);
            }
        }
        let potential = Arc::clone(&self.potential);
        self.edit_groups(targets.into_iter().collect(), false, |d, idx| {
            check_update(potential.as_ref(), &d.groups[idx], idx, &d.maps[idx], molecules)?;
            Ok(d.groups[idx]
                .update(molecules.clone())
                .then(BTreeSet::new))
        })
    }

    fn set_contents_with_map(
        &mut self,
        id: &MGID,
        molecules: &Molecules,
        map: &PropertyMap,
    ) -> Result<bool> {
        let targets = self.targets(id)?;
        let potential = Arc::clone(&self.potential);
        self.edit_groups(targets, true, |d, idx| {
            for view in molecules.views() {
                potential.validate(idx, &view, map)?;
            }
            let touched: BTreeSet<MolNum> = d.groups[idx]
                .mol_nums()
                .iter()
                .copied()
                .chain(molecules.mol_nums())
                .collect();
            if !d.groups[idx].set_contents(molecules.clone()) {
                return Ok(None);
            }
            d.maps[idx] = molecules.mol_nums().map(|molnum| (molnum, map.clone())).collect();
            Ok(Some(touched))
        })
    }
}

impl PartialEq for FF {
    fn eq(&self, other: &Self) -> bool {
        self.d.uid == other.d.uid && self.d.version == other.d.version
    }
}

impl Eq for FF {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::potentials::{NullPotential, PropertySumPotential};
    use crate::core::models::molecule::Molecule;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingPotential {
        calls: Arc<AtomicUsize>,
    }

    impl Potential for CountingPotential {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn recalculate_energy(&self, ctx: &EnergyContext<'_>, energies: &mut EnergyTable<'_>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n_views = ctx.group(0).map_or(0, MoleculeGroup::n_views);
            let total = energies.components().total().clone();
            energies.set_component(&total, n_views as f64)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Two groups; only the second needs a charge.
    #[derive(Debug)]
    struct SecondGroupNeedsCharge;

    impl Potential for SecondGroupNeedsCharge {
        fn kind(&self) -> &'static str {
            "picky"
        }

        fn group_names(&self) -> Vec<String> {
            vec!["free".to_string(), "charged".to_string()]
        }

        fn validate(&self, group_idx: usize, view: &PartialMolecule, map: &PropertyMap) -> Result<()> {
            if group_idx == 1 {
                view.molecule().property(map.source("charge"))?;
            }
            Ok(())
        }

        fn recalculate_energy(&self, _ctx: &EnergyContext<'_>, _energies: &mut EnergyTable<'_>) -> Result<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn energy_is_recalculated_only_when_dirty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ff = FF::new("count", CountingPotential { calls: calls.clone() });

        ff.add(&Molecules::from(Molecule::new("a", 1)), &MGID::All).unwrap();
        assert!(ff.is_dirty());
        assert_eq!(ff.energy().unwrap(), 1.0);
        assert!(!ff.is_dirty());
        assert_eq!(ff.energy().unwrap(), 1.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        ff.add(&Molecules::from(Molecule::new("b", 1)), &MGID::All).unwrap();
        assert!(ff.is_dirty());
        assert_eq!(ff.energy().unwrap(), 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        ff.must_now_recalculate_from_scratch();
        ff.energies().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unknown_component_is_reported_after_recalculation() {
        let mut ff = FF::new("null", NullPotential);
        let err = ff.energy_of(&Symbol::new("E_{other}")).unwrap_err();
        assert!(matches!(err, Error::MissingComponent(_)));
        assert!(!ff.is_dirty());
    }

    #[test]
    fn failed_multi_group_add_restores_the_forcefield() {
        let mut ff = FF::new("picky", SecondGroupNeedsCharge);
        let before = ff.clone();
        let uncharged = Molecules::from(Molecule::new("x", 2));

        let err = ff.add(&uncharged, &MGID::All).unwrap_err();
        assert!(matches!(err, Error::MissingProperty { .. }));
        assert_eq!(ff, before);
        assert_eq!(ff.n_molecules(), 0);
        ff.check_index().unwrap();

        ff.add(&uncharged, &MGID::Idx(0)).unwrap();
        assert_eq!(ff.n_molecules(), 1);
        assert_ne!(ff, before);
    }

    #[test]
    fn with_groups_uses_explicit_numbers() {
        let ff = FF::with_groups("p", SecondGroupNeedsCharge, [MGNum::new(5), MGNum::new(6)]).unwrap();
        assert_eq!(ff.mg_nums(), &[MGNum::new(5), MGNum::new(6)]);
        assert_eq!(ff.group(MGNum::new(6)).unwrap().name(), "p:charged");

        let err = FF::with_groups("p", NullPotential, [MGNum::new(5), MGNum::new(6)]).unwrap_err();
        assert!(matches!(err, Error::Incompatible(_)));

        let err = FF::with_groups("p", SecondGroupNeedsCharge, [MGNum::new(5), MGNum::new(5)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateGroup(_)));
    }

    #[test]
    fn potential_as_checks_the_concrete_kind() {
        let ff = FF::new("sum", PropertySumPotential::default());
        assert_eq!(ff.potential_as::<PropertySumPotential>().unwrap().property(), "charge");
        assert!(matches!(
            ff.potential_as::<NullPotential>(),
            Err(Error::InvalidCast { .. })
        ));
    }

    #[test]
    fn property_changes_dirty_the_cache_and_bump_the_version() {
        let mol = Molecule::new("ion", 2).with_property("charge", vec![1.0, 1.0]).unwrap();
        let mut ff = FF::new("sum", PropertySumPotential::default());
        ff.add(&Molecules::from(mol), &MGID::All).unwrap();
        assert_eq!(ff.energy().unwrap(), 2.0);

        let version = ff.version().clone();
        assert!(ff.set_property("scale", 3.0).unwrap());
        assert!(ff.is_dirty());
        assert!(ff.version() > &version);
        assert_eq!(ff.energy().unwrap(), 6.0);
        assert!(!ff.set_property("scale", 3.0).unwrap());
        assert!(matches!(ff.set_property("scale", "big"), Err(Error::Incompatible(_))));
        assert!(matches!(ff.property("cutoff"), Err(Error::MissingProperty { .. })));
    }

    #[test]
    fn update_is_minor_and_checks_the_new_version() {
        let mol = Molecule::new("ion", 1).with_property("charge", vec![1.0]).unwrap();
        let mut ff = FF::new("sum", PropertySumPotential::default());
        ff.add(&Molecules::from(mol.clone()), &MGID::All).unwrap();
        let major = ff.version().major();

        let recharged = mol.with_property("charge", vec![-2.0]).unwrap();
        assert!(ff.update(&Molecules::from(recharged)).unwrap());
        assert_eq!(ff.version().major(), major);
        assert_eq!(ff.energy().unwrap(), -2.0);

        let stripped = mol.without_property("charge").unwrap();
        let before = ff.clone();
        assert!(matches!(
            ff.update(&Molecules::from(stripped)),
            Err(Error::MissingProperty { .. })
        ));
        assert_eq!(ff, before);
    }

    #[test]
    fn property_map_is_remembered_per_molecule() {
        let mol = Molecule::new("ion", 1).with_property("q", vec![4.0]).unwrap();
        let mut ff = FF::new("sum", PropertySumPotential::default());
        let map = PropertyMap::new().with("charge", "q");
        ff.add_with_map(&Molecules::from(mol.clone()), &MGID::All, &map).unwrap();
        assert_eq!(ff.energy().unwrap(), 4.0);

        ff.remove_all(&Molecules::from(mol), &MGID::All).unwrap();
        assert_eq!(ff.energy().unwrap(), 0.0);
        ff.check_index().unwrap();
    }
}
