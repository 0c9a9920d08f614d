use super::config::SystemConfig;
use super::constraint::{Constraint, ConstraintId, Constraints};
use super::monitor::{Monitors, SystemMonitor};
use super::transaction::SaveState;
use crate::core::forcefield::ff::FF;
use crate::core::forcefield::forcefields::ForceFields;
use crate::core::forcefield::term::{ComponentValue, Symbol};
use crate::core::groups::base::MolGroupsBase;
use crate::core::groups::index::MolGroupIndex;
use crate::core::groups::molgroup::MoleculeGroup;
use crate::core::groups::molgroups::MoleculeGroups;
use crate::core::models::ids::{MGID, MGNum, MolNum};
use crate::core::models::property::{Property, PropertyMap};
use crate::core::models::views::Molecules;
use crate::core::version::{Version, VersionRegistry};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which child of a [`System`] owns a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    ForceFields,
    PlainGroups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    /// Groups, forcefields, constraints, monitors or names changed.
    Major,
    /// Molecule versions changed.
    Minor,
    /// Only monitor statistics changed; constraints are not re-applied.
    Statistics,
}

#[derive(Debug, Clone)]
struct SystemData {
    uid: Uuid,
    version: Version,
    config: SystemConfig,
    forcefields: ForceFields,
    groups: MoleculeGroups,
    /// Unified over both children, in the order groups joined the system.
    index: MolGroupIndex,
    mgnum_to_child: BTreeMap<MGNum, GroupKind>,
    constraints: Constraints,
    monitors: Monitors,
}

/// The top-level container: all forcefields plus any extra molecule groups,
/// seen as one [`MolGroupsBase`].
///
/// Every mutating call is a transaction. It either succeeds completely
/// (including re-applying constraints) and bumps the version, or fails and
/// leaves the system exactly as it was. Group numbers are unique across both
/// children, and each molecule is held at one version system-wide.
///
/// Cloning is cheap and yields an independent value. Two systems are equal
/// when they share UID and version.
#[derive(Debug, Clone)]
pub struct System {
    d: Arc<SystemData>,
    applying_constraints: bool,
}

impl System {
    pub fn new(config: SystemConfig) -> Self {
        let uid = Uuid::new_v4();
        Self {
            d: Arc::new(SystemData {
                uid,
                version: VersionRegistry::global().register(uid),
                config,
                forcefields: ForceFields::new(),
                groups: MoleculeGroups::new(),
                index: MolGroupIndex::new(),
                mgnum_to_child: BTreeMap::new(),
                constraints: Constraints::new(),
                monitors: Monitors::new(),
            }),
            applying_constraints: false,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(SystemConfig::named(name))
    }

    fn data_mut(&mut self) -> &mut SystemData {
        Arc::make_mut(&mut self.d)
    }

    pub fn uid(&self) -> Uuid {
        self.d.uid
    }

    pub fn name(&self) -> &str {
        &self.d.config.name
    }

    pub fn version(&self) -> &Version {
        &self.d.version
    }

    pub fn config(&self) -> &SystemConfig {
        &self.d.config
    }

    pub fn forcefields(&self) -> &ForceFields {
        &self.d.forcefields
    }

    pub fn forcefield(&self, name: &str) -> Result<&FF> {
        self.d.forcefields.forcefield(name)
    }

    /// The groups that belong to no forcefield.
    pub fn extra_groups(&self) -> &MoleculeGroups {
        &self.d.groups
    }

    pub fn constraints(&self) -> &Constraints {
        &self.d.constraints
    }

    pub fn monitors(&self) -> &Monitors {
        &self.d.monitors
    }

    pub fn child_kind(&self, mgnum: MGNum) -> Result<GroupKind> {
        self.d
            .mgnum_to_child
            .get(&mgnum)
            .copied()
            .ok_or_else(|| Error::missing_group_num(mgnum))
    }

    /// Runs `op` as one transaction: if it fails, every change it made is
    /// undone.
    pub fn transaction<R>(&mut self, op: impl FnOnce(&mut System) -> Result<R>) -> Result<R> {
        let mut guard = SaveState::save(self);
        match op(&mut *guard) {
            Ok(value) => {
                guard.commit();
                Ok(value)
            }
            Err(e) => {
                warn!(system = %guard.name(), error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }

    fn transact<T>(&mut self, change: Change, op: impl FnOnce(&mut System) -> Result<(T, bool)>) -> Result<T> {
        let mut guard = SaveState::save(self);
        match Self::commit_change(&mut *guard, change, op) {
            Ok((value, changed)) => {
                if changed {
                    debug!(system = %guard.name(), version = %guard.version(), ?change, "change committed");
                }
                guard.commit();
                Ok(value)
            }
            Err(e) => {
                warn!(system = %guard.name(), error = %e, "change rolled back");
                Err(e)
            }
        }
    }

    fn commit_change<T>(
        system: &mut System,
        change: Change,
        op: impl FnOnce(&mut System) -> Result<(T, bool)>,
    ) -> Result<(T, bool)> {
        let (value, changed) = op(system)?;
        if changed {
            let version = &mut system.data_mut().version;
            match change {
                Change::Major => version.increment_major(),
                Change::Minor | Change::Statistics => version.increment_minor(),
            }
            if change != Change::Statistics {
                system.enforce_constraints()?;
            }
        }
        Ok((value, changed))
    }

    fn check_new_groups(&self, mgnums: &[MGNum]) -> Result<()> {
        match mgnums.iter().find(|mgnum| self.contains_group(**mgnum)) {
            Some(mgnum) => Err(Error::DuplicateGroup(format!(
                "group {mgnum} is already part of system '{}'",
                self.name()
            ))),
            None => Ok(()),
        }
    }

    /// The resident version of every molecule in `molnums` held here.
    fn resident(&self, molnums: impl IntoIterator<Item = MolNum>) -> Result<Molecules> {
        let mut resident = Molecules::new();
        for molnum in molnums {
            if self.contains_molecule(molnum) {
                resident.add(self.molecule(molnum)?.molecule().clone().into());
            }
        }
        Ok(resident)
    }

    /// Adds a plain group. Molecules already in the system keep their
    /// resident version.
    pub fn add_group(&mut self, group: MoleculeGroup) -> Result<()> {
        self.transact(Change::Major, |s| {
            s.check_new_groups(&[group.number()])?;
            let mut group = group;
            let resident = s.resident(group.mol_nums().to_vec())?;
            group.update(resident);

            let d = s.data_mut();
            d.index.add_group(&group)?;
            d.mgnum_to_child.insert(group.number(), GroupKind::PlainGroups);
            d.groups.add_group(group)?;
            Ok(((), true))
        })
    }

    /// Removes the plain groups matched by `id`. Groups owned by a forcefield
    /// can only leave with their forcefield.
    pub fn remove_group(&mut self, id: &MGID) -> Result<Vec<MoleculeGroup>> {
        self.transact(Change::Major, |s| {
            let mgnums = id.map(s)?;
            if let Some(owned) = mgnums
                .iter()
                .find(|mgnum| s.d.mgnum_to_child.get(*mgnum) == Some(&GroupKind::ForceFields))
            {
                return Err(Error::Incompatible(format!(
                    "group {owned} belongs to forcefield '{}'; remove the forcefield instead",
                    s.d.forcefields.forcefield_of(*owned)?.name()
                )));
            }
            if mgnums.is_empty() {
                return Ok((Vec::new(), false));
            }
            let d = s.data_mut();
            let removed = d.groups.remove_groups(&MGID::nums(mgnums.iter().copied()))?;
            for mgnum in &mgnums {
                d.mgnum_to_child.remove(mgnum);
            }
            s.rebuild_index()?;
            Ok((removed, true))
        })
    }

    /// Adds a forcefield. Its group numbers must be new to the system, and
    /// molecules already in the system keep their resident version.
    pub fn add_forcefield(&mut self, ff: FF) -> Result<()> {
        self.transact(Change::Major, |s| {
            s.d.forcefields.check_can_add(&ff)?;
            s.check_new_groups(ff.mg_nums())?;
            let mut ff = ff;
            let resident = s.resident(ff.mol_nums())?;
            if !resident.is_empty() {
                ff.update(&resident)?;
            }

            let name = ff.name().to_string();
            let d = s.data_mut();
            d.forcefields.add_forcefield(ff)?;
            for group in d.forcefields.forcefield(&name)?.groups() {
                d.index.insert_group(group);
                d.mgnum_to_child.insert(group.number(), GroupKind::ForceFields);
            }
            Ok(((), true))
        })
    }

    pub fn remove_forcefield(&mut self, name: &str) -> Result<FF> {
        self.transact(Change::Major, |s| {
            let d = s.data_mut();
            let removed = d.forcefields.remove_forcefield(name)?;
            for mgnum in removed.mg_nums() {
                d.mgnum_to_child.remove(mgnum);
            }
            s.rebuild_index()?;
            Ok((removed, true))
        })
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let order: Vec<MGNum> = self
            .d
            .index
            .mg_nums()
            .iter()
            .copied()
            .filter(|mgnum| self.d.mgnum_to_child.contains_key(mgnum))
            .collect();
        let mut index = MolGroupIndex::new();
        {
            let groups = order
                .iter()
                .map(|mgnum| self.group(*mgnum))
                .collect::<Result<Vec<_>>>()?;
            index.rebuild(groups)?;
        }
        self.data_mut().index = index;
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        self.transact(Change::Major, |s| {
            if s.d.config.name == name {
                return Ok((false, false));
            }
            s.data_mut().config.name = name;
            Ok((true, true))
        })
    }

    /// Defines a user energy component. See [`ForceFields::set_component`].
    pub fn set_component(&mut self, symbol: Symbol, value: impl Into<ComponentValue>) -> Result<bool> {
        let value = value.into();
        self.transact(Change::Major, |s| {
            let changed = s.data_mut().forcefields.set_component(symbol, value)?;
            Ok((changed, changed))
        })
    }

    pub fn remove_component(&mut self, symbol: &Symbol) -> Result<ComponentValue> {
        self.transact(Change::Major, |s| {
            let removed = s.data_mut().forcefields.remove_component(symbol)?;
            Ok((removed, true))
        })
    }

    pub fn energy(&mut self) -> Result<f64> {
        self.data_mut().forcefields.energy()
    }

    pub fn energy_of(&mut self, symbol: &Symbol) -> Result<f64> {
        self.data_mut().forcefields.energy_of(symbol)
    }

    pub fn energies(&mut self) -> Result<BTreeMap<Symbol, f64>> {
        self.data_mut().forcefields.energies()
    }

    pub fn components(&self) -> Vec<Symbol> {
        self.d.forcefields.components()
    }

    pub fn is_dirty(&self) -> bool {
        self.d.forcefields.is_dirty()
    }

    pub fn must_now_recalculate_from_scratch(&mut self) {
        self.data_mut().forcefields.must_now_recalculate_from_scratch();
    }

    pub fn property(&self, name: &str) -> Result<&Property> {
        self.d.forcefields.property(name)
    }

    /// Sets a property on every forcefield.
    pub fn set_property(&mut self, name: &str, value: impl Into<Property>) -> Result<bool> {
        let value = value.into();
        self.transact(Change::Major, |s| {
            let changed = s.data_mut().forcefields.set_property(name, value)?;
            Ok((changed, changed))
        })
    }

    pub fn set_property_of(&mut self, ff_name: &str, name: &str, value: impl Into<Property>) -> Result<bool> {
        let value = value.into();
        self.transact(Change::Major, |s| {
            let changed = s.data_mut().forcefields.set_property_of(ff_name, name, value)?;
            Ok((changed, changed))
        })
    }

    /// Adds a constraint and applies it straight away.
    pub fn add_constraint(&mut self, constraint: impl Constraint) -> Result<ConstraintId> {
        self.transact(Change::Major, |s| {
            let id = s.data_mut().constraints.add(constraint);
            Ok((id, true))
        })
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<Arc<dyn Constraint>> {
        self.transact(Change::Major, |s| {
            let removed = s.data_mut().constraints.remove(id)?;
            Ok((removed, true))
        })
    }

    /// Replaces every constraint.
    pub fn set_constraints(&mut self, constraints: Constraints) -> Result<()> {
        self.transact(Change::Major, |s| {
            let changed = !(s.d.constraints.is_empty() && constraints.is_empty());
            s.data_mut().constraints = constraints;
            Ok(((), changed))
        })
    }

    /// Applies constraints until all are satisfied, at most
    /// `max_constraint_passes` times. Returns whether the system changed.
    ///
    /// Does nothing when called while constraints are already being applied.
    pub fn apply_constraints(&mut self) -> Result<bool> {
        if self.applying_constraints {
            return Ok(false);
        }
        self.transact(Change::Minor, |s| {
            let changed = s.run_constraints()?;
            // the constraints' own edits were versioned as they happened
            Ok((changed, false))
        })
    }

    fn enforce_constraints(&mut self) -> Result<()> {
        if self.applying_constraints || !self.d.config.auto_apply_constraints || self.d.constraints.is_empty() {
            return Ok(());
        }
        self.run_constraints()?;
        Ok(())
    }

    fn run_constraints(&mut self) -> Result<bool> {
        self.applying_constraints = true;
        let result = self.constraint_passes();
        self.applying_constraints = false;
        result
    }

    fn constraint_passes(&mut self) -> Result<bool> {
        let constraints = self.d.constraints.shared();
        let mut changed = false;
        for _ in 0..self.d.config.max_constraint_passes {
            let mut satisfied = true;
            for constraint in &constraints {
                if !constraint.is_satisfied(self)? {
                    satisfied = false;
                    changed |= constraint.apply(self)?;
                }
            }
            if satisfied {
                return Ok(changed);
            }
        }

        let mut failing = Vec::new();
        for constraint in &constraints {
            if !constraint.is_satisfied(self)? {
                failing.push(constraint.name().to_string());
            }
        }
        if failing.is_empty() {
            Ok(changed)
        } else {
            Err(Error::ConstraintFailure(format!(
                "still unsatisfied after {} pass(es): {}",
                self.d.config.max_constraint_passes,
                failing.join(", ")
            )))
        }
    }

    pub fn add_monitor(&mut self, name: impl Into<String>, monitor: impl SystemMonitor, frequency: u64) -> Result<()> {
        let name = name.into();
        self.transact(Change::Major, |s| {
            s.data_mut().monitors.add(name, monitor, frequency)?;
            Ok(((), true))
        })
    }

    pub fn remove_monitor(&mut self, name: &str) -> Result<Box<dyn SystemMonitor>> {
        self.transact(Change::Major, |s| {
            let removed = s.data_mut().monitors.remove(name)?;
            Ok((removed, true))
        })
    }

    pub fn monitor_as<M: SystemMonitor>(&self, name: &str) -> Result<&M> {
        self.d.monitors.get_as(name)
    }

    /// Runs every monitor due on this step. Advancing the step counter is a
    /// change even when no monitor is due; without monitors this is a no-op.
    pub fn collect_stats(&mut self) -> Result<()> {
        self.transact(Change::Statistics, |s| {
            if s.d.monitors.is_empty() {
                return Ok(((), false));
            }
            let mut monitors = s.d.monitors.clone();
            monitors.monitor(s)?;
            s.data_mut().monitors = monitors;
            Ok(((), true))
        })
    }

    pub fn clear_statistics(&mut self) -> Result<()> {
        self.transact(Change::Statistics, |s| {
            if s.d.monitors.is_empty() {
                return Ok(((), false));
            }
            s.data_mut().monitors.clear_statistics();
            Ok(((), true))
        })
    }

    fn child_mut(&mut self, kind: GroupKind) -> &mut dyn MolGroupsBase {
        let d = self.data_mut();
        match kind {
            GroupKind::ForceFields => &mut d.forcefields as &mut dyn MolGroupsBase,
            GroupKind::PlainGroups => &mut d.groups as &mut dyn MolGroupsBase,
        }
    }

    /// Splits the groups matched by `id` by owning child, in system order,
    /// runs `edit` once per child and patches the index.
    fn route<T, F>(&mut self, id: &MGID, mut edit: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut dyn MolGroupsBase, &MGID) -> Result<T>,
    {
        let mut targets: Vec<(GroupKind, Vec<MGNum>)> = Vec::new();
        let mut before: BTreeMap<MGNum, Vec<MolNum>> = BTreeMap::new();
        for mgnum in id.map(self)? {
            let kind = self.child_kind(mgnum)?;
            match targets.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, nums)) => nums.push(mgnum),
                None => targets.push((kind, vec![mgnum])),
            }
            before.insert(mgnum, self.group(mgnum)?.mol_nums().to_vec());
        }

        let mut results = Vec::with_capacity(targets.len());
        for (kind, mgnums) in targets {
            results.push(edit(self.child_mut(kind), &MGID::nums(mgnums))?);
        }

        let d = self.data_mut();
        for (mgnum, old) in before {
            let group = match d.mgnum_to_child.get(&mgnum) {
                Some(GroupKind::ForceFields) => d.forcefields.group(mgnum)?,
                Some(GroupKind::PlainGroups) => d.groups.group(mgnum)?,
                None => return Err(Error::ProgramBug(format!("group {mgnum} has no owning child"))),
            };
            let touched: BTreeSet<MolNum> = old.into_iter().chain(group.mol_nums().iter().copied()).collect();
            d.index.sync(group, touched);
        }
        Ok(results)
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new(SystemConfig::default())
    }
}

impl PartialEq for System {
    fn eq(&self, other: &Self) -> bool {
        self.d.uid == other.d.uid && self.d.version == other.d.version
    }
}

impl Eq for System {}

impl MolGroupsBase for System {
    fn index(&self) -> &MolGroupIndex {
        &self.d.index
    }

    fn group(&self, mgnum: MGNum) -> Result<&MoleculeGroup> {
        match self.child_kind(mgnum)? {
            GroupKind::ForceFields => self.d.forcefields.group(mgnum),
            GroupKind::PlainGroups => self.d.groups.group(mgnum),
        }
    }

    fn add_with_map(&mut self, molecules: &Molecules, id: &MGID, map: &PropertyMap) -> Result<()> {
        self.transact(Change::Major, |s| {
            let molecules = s.match_to_existing_version(molecules)?;
            let edited = s.route(id, |child, id| child.add_with_map(&molecules, id, map))?;
            Ok(((), !edited.is_empty() && molecules.n_views() > 0))
        })
    }

    fn add_if_unique_with_map(
        &mut self,
        molecules: &Molecules,
        id: &MGID,
        map: &PropertyMap,
    ) -> Result<Molecules> {
        self.transact(Change::Major, |s| {
            let molecules = s.match_to_existing_version(molecules)?;
            let per_child = s.route(id, |child, id| child.add_if_unique_with_map(&molecules, id, map))?;
            let mut added = Molecules::new();
            for views in per_child.iter().flat_map(Molecules::iter) {
                added.add_views(views);
            }
            let changed = !added.is_empty();
            Ok((added, changed))
        })
    }

    fn remove(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        self.transact(Change::Major, |s| {
            let changed = s.route(id, |child, id| child.remove(molecules, id))?.into_iter().any(|c| c);
            Ok((changed, changed))
        })
    }

    fn remove_all(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        self.transact(Change::Major, |s| {
            let changed = s.route(id, |child, id| child.remove_all(molecules, id))?.into_iter().any(|c| c);
            Ok((changed, changed))
        })
    }

    fn clear_groups(&mut self, id: &MGID) -> Result<bool> {
        self.transact(Change::Major, |s| {
            let changed = s.route(id, |child, id| child.clear_groups(id))?.into_iter().any(|c| c);
            Ok((changed, changed))
        })
    }

    fn update(&mut self, molecules: &Molecules) -> Result<bool> {
        self.transact(Change::Minor, |s| {
            let mut changed = false;
            for kind in [GroupKind::ForceFields, GroupKind::PlainGroups] {
                changed |= s.child_mut(kind).update(molecules)?;
            }
            Ok((changed, changed))
        })
    }

    fn set_contents_with_map(
        &mut self,
        id: &MGID,
        molecules: &Molecules,
        map: &PropertyMap,
    ) -> Result<bool> {
        self.transact(Change::Major, |s| {
            let molecules = s.match_to_existing_version(molecules)?;
            let changed = s
                .route(id, |child, id| child.set_contents_with_map(id, &molecules, map))?
                .into_iter()
                .any(|c| c);
            Ok((changed, changed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::potentials::{NullPotential, PropertySumPotential};
    use crate::core::forcefield::term::Expression;
    use crate::core::models::molecule::Molecule;
    use crate::engine::constraint::ComponentConstraint;
    use crate::engine::monitor::EnergyMonitor;

    fn charged(name: &str, charges: Vec<f64>) -> Molecule {
        Molecule::new(name, charges.len())
            .with_property("charge", charges)
            .unwrap()
    }

    /// A system with a plain group followed by a charge-summing forcefield.
    fn plain_then_charged() -> (System, MGNum, MGNum) {
        let mut system = System::named("test");
        let plain = MoleculeGroup::new("solvent");
        let plain_num = plain.number();
        system.add_group(plain).unwrap();
        let ff = FF::new("coulomb", PropertySumPotential::default());
        let ff_num = ff.mg_nums()[0];
        system.add_forcefield(ff).unwrap();
        (system, plain_num, ff_num)
    }

    #[test]
    fn index_tracks_membership_across_both_children() {
        let (mut system, plain, ff) = plain_then_charged();
        let a = charged("a", vec![1.0]);
        let b = charged("b", vec![2.0]);

        system.add(&Molecules::from(a.clone()), &MGID::All).unwrap();
        system.add(&Molecules::from(b.clone()), &MGID::Num(ff)).unwrap();
        system.check_index().unwrap();
        assert_eq!(system.groups_containing(a.number()), vec![plain, ff]);
        assert_eq!(system.groups_containing(b.number()), vec![ff]);

        system.remove(&Molecules::from(a.clone()), &MGID::Num(plain)).unwrap();
        system.check_index().unwrap();
        assert_eq!(system.groups_containing(a.number()), vec![ff]);

        system.clear_groups(&MGID::All).unwrap();
        system.check_index().unwrap();
        assert_eq!(system.n_molecules(), 0);
    }

    #[test]
    fn failed_add_to_the_second_group_leaves_the_system_untouched() {
        let (mut system, plain, ff) = plain_then_charged();
        system.add(&Molecules::from(charged("ion", vec![1.0])), &MGID::All).unwrap();
        let before = system.clone();

        let bare = Molecules::from(Molecule::new("bare", 2));
        let err = system.add(&bare, &MGID::All).unwrap_err();
        assert!(matches!(err, Error::MissingProperty { .. }));

        assert_eq!(system, before);
        assert_eq!(system.version(), before.version());
        assert_eq!(system.group(plain).unwrap(), before.group(plain).unwrap());
        assert_eq!(system.group(ff).unwrap(), before.group(ff).unwrap());
        assert_eq!(system.mol_nums(), before.mol_nums());
        assert_eq!(system.extra_groups().group(plain).unwrap().n_molecules(), 1);
        system.check_index().unwrap();
    }

    #[test]
    fn successful_edits_bump_the_version_and_no_ops_do_not() {
        let (mut system, plain, _) = plain_then_charged();
        let mol = charged("ion", vec![1.0]);

        let v0 = system.version().clone();
        system.add(&Molecules::from(mol.clone()), &MGID::Num(plain)).unwrap();
        let v1 = system.version().clone();
        assert!(v1 > v0);
        assert!(v1.major() > v0.major());

        let stranger = Molecules::from(Molecule::new("stranger", 1));
        assert!(!system.remove(&stranger, &MGID::All).unwrap());
        assert_eq!(system.version(), &v1);
        assert!(system.add_if_unique(&Molecules::from(mol.clone()), &MGID::Num(plain)).unwrap().is_empty());
        assert_eq!(system.version(), &v1);
        assert!(!system.set_name("test").unwrap());
        assert_eq!(system.version(), &v1);

        let moved = mol.with_property("charge", vec![3.0]).unwrap();
        assert!(system.update(&Molecules::from(moved)).unwrap());
        let v2 = system.version().clone();
        assert_eq!(v2.major(), v1.major());
        assert!(v2.minor() > v1.minor());
    }

    #[test]
    fn a_molecule_has_one_version_across_the_system() {
        let (mut system, plain, ff) = plain_then_charged();
        let first = charged("ion", vec![1.0]);
        let second = first.with_property("charge", vec![5.0]).unwrap();
        assert_ne!(first.version(), second.version());

        system.add(&Molecules::from(first.clone()), &MGID::Num(ff)).unwrap();
        system.add(&Molecules::from(second), &MGID::Num(plain)).unwrap();

        let in_ff = system.forcefields().group(ff).unwrap().molecule(first.number()).unwrap();
        let in_plain = system.extra_groups().group(plain).unwrap().molecule(first.number()).unwrap();
        assert_eq!(in_ff.molecule(), &first);
        assert_eq!(in_plain.molecule(), &first);
        assert_eq!(system.energy().unwrap(), 1.0);
    }

    #[test]
    fn added_groups_and_forcefields_adopt_resident_versions() {
        let mut system = System::named("s");
        let mol = charged("ion", vec![1.0]);
        system
            .add_group(MoleculeGroup::from_molecules("a", mol.clone()))
            .unwrap();

        let newer = mol.with_property("charge", vec![9.0]).unwrap();
        system
            .add_group(MoleculeGroup::from_molecules("b", newer.clone()))
            .unwrap();
        let mut ff = FF::new("q", PropertySumPotential::default());
        ff.add(&Molecules::from(newer), &MGID::All).unwrap();
        system.add_forcefield(ff).unwrap();

        for group in system.groups() {
            assert_eq!(group.molecule(mol.number()).unwrap().molecule(), &mol);
        }
        assert_eq!(system.energy().unwrap(), 1.0);
    }

    #[test]
    fn forcefields_with_clashing_group_numbers_are_rejected() {
        let mut system = System::named("s");
        system
            .add_forcefield(FF::with_groups("ff1", NullPotential, [MGNum::new(5)]).unwrap())
            .unwrap();
        let after_first = system.clone();

        let ff2 = FF::with_groups("ff2", NullPotential, [MGNum::new(5)]).unwrap();
        let err = system.add_forcefield(ff2).unwrap_err();
        assert!(matches!(err, Error::DuplicateGroup(_)));
        assert_eq!(system, after_first);
        assert_eq!(system.forcefields().names(), vec!["ff1"]);

        let err = system
            .add_group(MoleculeGroup::with_number(MGNum::new(5), "plain"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateGroup(_)));
        assert_eq!(system, after_first);
    }

    #[test]
    fn add_if_unique_stores_a_view_once_and_add_keeps_duplicates() {
        let (mut system, plain, _) = plain_then_charged();
        let mol = Molecules::from(charged("ion", vec![1.0]));

        assert_eq!(system.add_if_unique(&mol, &MGID::Num(plain)).unwrap().n_views(), 1);
        assert!(system.add_if_unique(&mol, &MGID::Num(plain)).unwrap().is_empty());
        assert_eq!(system.group(plain).unwrap().n_views(), 1);

        system.add(&mol, &MGID::Num(plain)).unwrap();
        assert_eq!(system.group(plain).unwrap().n_views(), 2);
        assert_eq!(system.group(plain).unwrap().n_molecules(), 1);
    }

    #[test]
    fn energies_follow_updates_and_reads_do_not_change_the_version() {
        let (mut system, _, ff) = plain_then_charged();
        let mol = charged("ion", vec![1.0, 2.0]);
        system.add(&Molecules::from(mol.clone()), &MGID::Num(ff)).unwrap();
        assert!(system.is_dirty());
        assert_eq!(system.energy().unwrap(), 3.0);
        assert!(!system.is_dirty());

        let version = system.version().clone();
        assert_eq!(system.energy().unwrap(), 3.0);
        assert_eq!(system.version(), &version);

        system
            .update(&Molecules::from(mol.with_property("charge", vec![4.0, 4.0]).unwrap()))
            .unwrap();
        assert!(system.forcefield("coulomb").unwrap().is_dirty());
        assert_eq!(system.energy().unwrap(), 8.0);
    }

    #[test]
    fn remove_group_refuses_forcefield_groups() {
        let (mut system, plain, ff) = plain_then_charged();
        let before = system.clone();
        assert!(matches!(system.remove_group(&MGID::Num(ff)), Err(Error::Incompatible(_))));
        assert_eq!(system, before);

        let removed = system.remove_group(&MGID::Num(plain)).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(system.mg_nums(), &[ff]);
        assert!(matches!(system.child_kind(plain), Err(Error::MissingGroup(_))));
        system.check_index().unwrap();

        system.remove_forcefield("coulomb").unwrap();
        assert_eq!(system.n_groups(), 0);
        system.check_index().unwrap();
    }

    #[test]
    fn copies_are_independent() {
        let (mut system, plain, _) = plain_then_charged();
        let copy = system.clone();
        system.add(&Molecules::from(charged("ion", vec![1.0])), &MGID::Num(plain)).unwrap();
        assert_ne!(system, copy);
        assert_eq!(copy.n_molecules(), 0);
        assert_eq!(system.uid(), copy.uid());
    }

    #[test]
    fn transaction_rolls_back_every_step_on_failure() {
        let (mut system, plain, _) = plain_then_charged();
        let before = system.clone();
        let result: Result<()> = system.transaction(|s| {
            s.add(&Molecules::from(charged("ion", vec![1.0])), &MGID::Num(plain))?;
            s.set_name("renamed")?;
            s.remove_forcefield("missing")?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::MissingGroup(_))));
        assert_eq!(system, before);
        assert_eq!(system.name(), "test");
        assert_eq!(system.n_molecules(), 0);
    }

    #[test]
    fn constraints_are_reapplied_after_each_change() {
        let (mut system, _, ff) = plain_then_charged();
        let lambda = Symbol::new("lambda");
        let coulomb = Symbol::energy(&["coulomb"]);
        system
            .add_constraint(ComponentConstraint::new(lambda.clone(), Expression::from(coulomb) * 0.5))
            .unwrap();
        assert_eq!(system.energy_of(&lambda).unwrap(), 0.0);

        system.add(&Molecules::from(charged("ion", vec![4.0])), &MGID::Num(ff)).unwrap();
        assert_eq!(system.energy_of(&lambda).unwrap(), 2.0);
        assert!(!system.apply_constraints().unwrap());
    }

    #[test]
    fn unsatisfiable_constraints_fail_and_roll_back() {
        let mut system = System::new(SystemConfig::builder().name("s").max_constraint_passes(2).build().unwrap());
        let x = Symbol::new("E_{x}");
        system.set_component(x.clone(), 0.0).unwrap();
        // x = x + 1 can never hold
        let before = system.clone();
        let err = system
            .add_constraint(ComponentConstraint::new(x.clone(), Expression::from(x.clone()) + 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintFailure(_)));
        assert_eq!(system, before);
        assert!(system.constraints().is_empty());
    }

    #[test]
    fn forcefield_named_total_is_rejected_and_energy_stays_readable() {
        let mut system = System::named("s");
        let before = system.clone();
        assert!(matches!(
            system.add_forcefield(FF::new("total", NullPotential)),
            Err(Error::Incompatible(_))
        ));
        assert_eq!(system, before);
        assert_eq!(system.energy().unwrap(), 0.0);
    }

    #[test]
    fn collecting_stats_without_monitors_keeps_the_version() {
        let mut system = System::named("s");
        let version = system.version().clone();
        system.collect_stats().unwrap();
        system.clear_statistics().unwrap();
        assert_eq!(system.version(), &version);
    }

    #[test]
    fn monitors_collect_statistics_with_minor_bumps() {
        let (mut system, _, ff) = plain_then_charged();
        system.add(&Molecules::from(charged("ion", vec![2.0])), &MGID::Num(ff)).unwrap();
        system.add_monitor("energy", EnergyMonitor::new(), 1).unwrap();
        assert!(matches!(
            system.add_monitor("energy", EnergyMonitor::new(), 1),
            Err(Error::DuplicateMonitor(_))
        ));

        let major = system.version().major();
        system.collect_stats().unwrap();
        system.collect_stats().unwrap();
        assert_eq!(system.version().major(), major);

        let monitor = system.monitor_as::<EnergyMonitor>("energy").unwrap();
        assert_eq!(monitor.n_samples(), 2);
        assert_eq!(monitor.average(&Symbol::total()), Some(2.0));

        system.clear_statistics().unwrap();
        assert_eq!(system.monitor_as::<EnergyMonitor>("energy").unwrap().n_samples(), 0);
        assert!(system.remove_monitor("energy").is_ok());
        assert!(matches!(system.remove_monitor("energy"), Err(Error::MissingMonitor(_))));
    }
}
