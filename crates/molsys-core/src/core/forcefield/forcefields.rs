use super::ff::FF;
use super::term::{ComponentValue, Expression, Symbol};
use crate::core::groups::base::MolGroupsBase;
use crate::core::groups::index::MolGroupIndex;
use crate::core::groups::molgroup::MoleculeGroup;
use crate::core::models::ids::{MGID, MGNum, MolNum};
use crate::core::models::property::{Property, PropertyMap};
use crate::core::models::views::Molecules;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// A collection of forcefields, addressed through the groups they own.
///
/// Forcefield names, UIDs and energy symbols are unique across the
/// collection. Besides the components each forcefield publishes, the
/// collection can hold user components defined as constants or as
/// expressions over other components. `E_{total}` is the sum of every
/// forcefield's total unless a user component redefines it.
#[derive(Debug, Clone, Default)]
pub struct ForceFields {
    ffs: Vec<FF>,
    mgnum_to_ff: BTreeMap<MGNum, usize>,
    index: MolGroupIndex,
    user_components: BTreeMap<Symbol, ComponentValue>,
}

impl ForceFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_forcefields(&self) -> usize {
        self.ffs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FF> {
        self.ffs.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.ffs.iter().map(FF::name).collect()
    }

    pub fn forcefield(&self, name: &str) -> Result<&FF> {
        self.ffs
            .iter()
            .find(|ff| ff.name() == name)
            .ok_or_else(|| missing_forcefield(name))
    }

    /// The forcefield owning group `mgnum`.
    pub fn forcefield_of(&self, mgnum: MGNum) -> Result<&FF> {
        let idx = self
            .mgnum_to_ff
            .get(&mgnum)
            .ok_or_else(|| Error::missing_group_num(mgnum))?;
        Ok(&self.ffs[*idx])
    }

    /// Checks that `ff` could join this collection.
    pub fn check_can_add(&self, ff: &FF) -> Result<()> {
        if let Some(existing) = self
            .ffs
            .iter()
            .find(|existing| existing.name() == ff.name() || existing.uid() == ff.uid())
        {
            return Err(Error::DuplicateForceField(format!(
                "'{}' clashes with existing forcefield '{}' ({})",
                ff.name(),
                existing.name(),
                existing.uid()
            )));
        }
        if let Some(mgnum) = ff.mg_nums().iter().find(|n| self.contains_group(**n)) {
            return Err(Error::DuplicateGroup(format!(
                "forcefield '{}' owns group {mgnum}, which is already present",
                ff.name()
            )));
        }
        let total = Symbol::total();
        if ff.components().contains(&total) {
            return Err(Error::Incompatible(format!(
                "forcefield '{}' would publish {total}, which is reserved for the combined energy",
                ff.name()
            )));
        }
        for symbol in ff.components().symbols() {
            if self.ffs.iter().any(|other| other.components().contains(symbol))
                || self.user_components.contains_key(symbol)
            {
                return Err(Error::Incompatible(format!(
                    "energy component {symbol} of forcefield '{}' is already defined",
                    ff.name()
                )));
            }
        }
        Ok(())
    }

    /// Adds a forcefield. Molecules it shares with forcefields already here
    /// are first brought to the resident version.
    pub fn add_forcefield(&mut self, mut ff: FF) -> Result<()> {
        self.check_can_add(&ff)?;
        let shared = Molecules::from_iter(
            ff.mol_nums()
                .into_iter()
                .filter(|molnum| self.contains_molecule(*molnum))
                .map(|molnum| self.molecule(molnum).map(|views| views.molecule().clone()))
                .collect::<Result<Vec<_>>>()?,
        );
        if !shared.is_empty() {
            ff.update(&shared)?;
        }

        let idx = self.ffs.len();
        for group in ff.groups() {
            self.index.insert_group(group);
            self.mgnum_to_ff.insert(group.number(), idx);
        }
        trace!(forcefield = %ff.name(), groups = ff.n_groups(), "forcefield added");
        self.ffs.push(ff);
        Ok(())
    }

    /// Removes the named forcefield and rebuilds the index.
    pub fn remove_forcefield(&mut self, name: &str) -> Result<FF> {
        let idx = self
            .ffs
            .iter()
            .position(|ff| ff.name() == name)
            .ok_or_else(|| missing_forcefield(name))?;
        let removed = self.ffs.remove(idx);
        self.reindex()?;
        Ok(removed)
    }

    fn reindex(&mut self) -> Result<()> {
        self.mgnum_to_ff = self
            .ffs
            .iter()
            .enumerate()
            .flat_map(|(idx, ff)| ff.mg_nums().iter().map(move |mgnum| (*mgnum, idx)))
            .collect();
        let groups: Vec<&MoleculeGroup> = self.ffs.iter().flat_map(|ff| ff.groups()).collect();
        self.index.rebuild(groups)
    }

    /// Every component symbol: `E_{total}`, each forcefield's components,
    /// then user components.
    pub fn components(&self) -> Vec<Symbol> {
        let mut symbols = vec![Symbol::total()];
        for ff in &self.ffs {
            symbols.extend(ff.components().symbols().cloned());
        }
        for symbol in self.user_components.keys() {
            if !symbols.contains(symbol) {
                symbols.push(symbol.clone());
            }
        }
        symbols
    }

    pub fn has_component(&self, symbol: &Symbol) -> bool {
        *symbol == Symbol::total()
            || self.user_components.contains_key(symbol)
            || self.ffs.iter().any(|ff| ff.components().contains(symbol))
    }

    pub fn user_components(&self) -> &BTreeMap<Symbol, ComponentValue> {
        &self.user_components
    }

    /// Defines (or redefines) a user component.
    ///
    /// Forcefield components cannot be redefined, and a definition may not
    /// refer back to itself through other user components.
    pub fn set_component(&mut self, symbol: Symbol, value: impl Into<ComponentValue>) -> Result<bool> {
        let value = value.into();
        if self.ffs.iter().any(|ff| ff.components().contains(&symbol)) {
            return Err(Error::Incompatible(format!(
                "{symbol} is published by a forcefield and cannot be redefined"
            )));
        }
        if self.user_components.get(&symbol) == Some(&value) {
            return Ok(false);
        }
        if self.reaches(&value, &symbol, &mut BTreeSet::new()) {
            return Err(Error::Incompatible(format!(
                "defining {symbol} this way makes it depend on itself"
            )));
        }
        self.user_components.insert(symbol, value);
        Ok(true)
    }

    pub fn remove_component(&mut self, symbol: &Symbol) -> Result<ComponentValue> {
        self.user_components
            .remove(symbol)
            .ok_or_else(|| Error::MissingComponent(symbol.clone()))
    }

    fn reaches(&self, value: &ComponentValue, target: &Symbol, seen: &mut BTreeSet<Symbol>) -> bool {
        let symbols = value.symbols();
        let default_total = ComponentValue::Expression(self.default_total());
        for symbol in symbols {
            if symbol == target {
                return true;
            }
            if !seen.insert(symbol.clone()) {
                continue;
            }
            let next = match self.user_components.get(symbol) {
                Some(next) => next,
                None if *symbol == Symbol::total() => &default_total,
                None => continue,
            };
            if self.reaches(next, target, seen) {
                return true;
            }
        }
        false
    }

    fn default_total(&self) -> Expression {
        Expression::sum(self.ffs.iter().map(|ff| ff.components().total().clone()))
    }

    /// The expression `E_{total}` evaluates.
    pub fn total_expression(&self) -> Expression {
        match self.user_components.get(&Symbol::total()) {
            Some(ComponentValue::Expression(expr)) => expr.clone(),
            Some(ComponentValue::Constant(value)) => Expression::constant(*value),
            None => self.default_total(),
        }
    }

    pub fn energy(&mut self) -> Result<f64> {
        self.energy_of(&Symbol::total())
    }

    pub fn energy_of(&mut self, symbol: &Symbol) -> Result<f64> {
        if let Some(value) = self.user_components.get(symbol).cloned() {
            return match value {
                ComponentValue::Constant(v) => Ok(v),
                ComponentValue::Expression(expr) => expr.evaluate(|s| self.energy_of(s)),
            };
        }
        if *symbol == Symbol::total() {
            return self.default_total().evaluate(|s| self.energy_of(s));
        }
        match self.ffs.iter_mut().find(|ff| ff.components().contains(symbol)) {
            Some(ff) => ff.energy_of(symbol),
            None => Err(Error::MissingComponent(symbol.clone())),
        }
    }

    pub fn energies(&mut self) -> Result<BTreeMap<Symbol, f64>> {
        let mut values = BTreeMap::new();
        for symbol in self.components() {
            let value = self.energy_of(&symbol)?;
            values.insert(symbol, value);
        }
        Ok(values)
    }

    pub fn is_dirty(&self) -> bool {
        self.ffs.iter().any(FF::is_dirty)
    }

    pub fn must_now_recalculate_from_scratch(&mut self) {
        for ff in &mut self.ffs {
            ff.must_now_recalculate_from_scratch();
        }
    }

    /// The value of `name` in the first forcefield defining it.
    pub fn property(&self, name: &str) -> Result<&Property> {
        self.ffs
            .iter()
            .find_map(|ff| ff.properties().get(name))
            .ok_or_else(|| Error::missing_property(name, None))
    }

    /// Sets `name` on every forcefield. Nothing changes if any of them
    /// rejects the value.
    pub fn set_property(&mut self, name: &str, value: impl Into<Property>) -> Result<bool> {
        let value = value.into();
        let checkpoint = self.ffs.clone();
        let mut changed = false;
        for ff in &mut self.ffs {
            match ff.set_property(name, value.clone()) {
                Ok(c) => changed |= c,
                Err(e) => {
                    self.ffs = checkpoint;
                    return Err(e);
                }
            }
        }
        Ok(changed)
    }

    /// Sets `name` on the named forcefield only.
    pub fn set_property_of(&mut self, ff_name: &str, name: &str, value: impl Into<Property>) -> Result<bool> {
        let ff = self
            .ffs
            .iter_mut()
            .find(|ff| ff.name() == ff_name)
            .ok_or_else(|| missing_forcefield(ff_name))?;
        ff.set_property(name, value)
    }

    /// Splits the groups matched by `id` by owning forcefield.
    fn targets(&self, id: &MGID) -> Result<BTreeMap<usize, Vec<MGNum>>> {
        let mut by_ff: BTreeMap<usize, Vec<MGNum>> = BTreeMap::new();
        for mgnum in id.map(self)? {
            let idx = self
                .mgnum_to_ff
                .get(&mgnum)
                .ok_or_else(|| Error::ProgramBug(format!("group {mgnum} has no owning forcefield")))?;
            by_ff.entry(*idx).or_default().push(mgnum);
        }
        Ok(by_ff)
    }

    /// Runs `edit` on each affected forcefield and resyncs the index; the
    /// whole collection is restored if any forcefield fails.
    fn edit_forcefields<T, F>(&mut self, targets: BTreeMap<usize, Vec<MGNum>>, mut edit: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut FF, &MGID) -> Result<T>,
    {
        let checkpoint = self.clone();
        let mut results = Vec::with_capacity(targets.len());
        for (idx, mgnums) in targets {
            match self.edit_one(idx, &mgnums, &mut edit) {
                Ok(value) => results.push(value),
                Err(e) => {
                    *self = checkpoint;
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    fn edit_one<T, F>(&mut self, idx: usize, mgnums: &[MGNum], edit: &mut F) -> Result<T>
    where
        F: FnMut(&mut FF, &MGID) -> Result<T>,
    {
        let ff = &mut self.ffs[idx];
        let mut before: BTreeMap<MGNum, Vec<MolNum>> = BTreeMap::new();
        for mgnum in mgnums {
            before.insert(*mgnum, ff.group(*mgnum)?.mol_nums().to_vec());
        }
        let value = edit(ff, &MGID::nums(mgnums.iter().copied()))?;
        for (mgnum, old) in before {
            let group = ff.group(mgnum)?;
            let touched: BTreeSet<MolNum> = old.into_iter().chain(group.mol_nums().iter().copied()).collect();
            self.index.sync(group, touched);
        }
        Ok(value)
    }
}

fn missing_forcefield(name: &str) -> Error {
    Error::MissingGroup(format!("no forcefield named '{name}'"))
}

impl MolGroupsBase for ForceFields {
    fn index(&self) -> &MolGroupIndex {
        &self.index
    }

    fn group(&self, mgnum: MGNum) -> Result<&MoleculeGroup> {
        self.forcefield_of(mgnum)?.group(mgnum)
    }

    fn add_with_map(&mut self, molecules: &Molecules, id: &MGID, map: &PropertyMap) -> Result<()> {
        let targets = self.targets(id)?;
        self.edit_forcefields(targets, |ff, id| ff.add_with_map(molecules, id, map))?;
        Ok(())
    }

    fn add_if_unique_with_map(
        &mut self,
        molecules: &Molecules,
        id: &MGID,
        map: &PropertyMap,
    ) -> Result<Molecules> {
        let targets = self.targets(id)?;
        let per_ff = self.edit_forcefields(targets, |ff, id| ff.add_if_unique_with_map(molecules, id, map))?;
        let mut added = Molecules::new();
        for views in per_ff.iter().flat_map(Molecules::iter) {
            added.add_views(views);
        }
        Ok(added)
    }

    fn remove(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        let targets = self.targets(id)?;
        let changed = self.edit_forcefields(targets, |ff, id| ff.remove(molecules, id))?;
        Ok(changed.into_iter().any(|c| c))
    }

    fn remove_all(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        let targets = self.targets(id)?;
        let changed = self.edit_forcefields(targets, |ff, id| ff.remove_all(molecules, id))?;
        Ok(changed.into_iter().any(|c| c))
    }

    fn clear_groups(&mut self, id: &MGID) -> Result<bool> {
        let targets = self.targets(id)?;
        let changed = self.edit_forcefields(targets, |ff, id| ff.clear_groups(id))?;
        Ok(changed.into_iter().any(|c| c))
    }

    fn update(&mut self, molecules: &Molecules) -> Result<bool> {
        let mut targets: BTreeMap<usize, Vec<MGNum>> = BTreeMap::new();
        for molnum in molecules.mol_nums() {
            for mgnum in self.groups_containing(molnum) {
                if let Some(idx) = self.mgnum_to_ff.get(&mgnum) {
                    let nums = targets.entry(*idx).or_default();
                    if !nums.contains(&mgnum) {
                        nums.push(mgnum);
                    }
                }
            }
        }
        let changed = self.edit_forcefields(targets, |ff, _| ff.update(molecules))?;
        Ok(changed.into_iter().any(|c| c))
    }

    fn set_contents_with_map(
        &mut self,
        id: &MGID,
        molecules: &Molecules,
        map: &PropertyMap,
    ) -> Result<bool> {
        let targets = self.targets(id)?;
        let changed =
            self.edit_forcefields(targets, |ff, id| ff.set_contents_with_map(id, molecules, map))?;
        Ok(changed.into_iter().any(|c| c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::potentials::{NullPotential, PropertySumPotential};
    use crate::core::models::molecule::Molecule;

    fn charged(q: f64) -> Molecule {
        Molecule::new("ion", 1).with_property("charge", vec![q]).unwrap()
    }

    #[test]
    fn add_rejects_reused_names_uids_and_groups() {
        let mut ffs = ForceFields::new();
        let ff = FF::with_groups("coul", NullPotential, [MGNum::new(5)]).unwrap();
        ffs.add_forcefield(ff.clone()).unwrap();

        assert!(matches!(ffs.add_forcefield(ff.clone()), Err(Error::DuplicateForceField(_))));
        assert!(matches!(
            ffs.add_forcefield(FF::new("coul", NullPotential)),
            Err(Error::DuplicateForceField(_))
        ));
        let clash = FF::with_groups("lj", NullPotential, [MGNum::new(5)]).unwrap();
        assert!(matches!(ffs.add_forcefield(clash), Err(Error::DuplicateGroup(_))));
        assert_eq!(ffs.n_forcefields(), 1);
        ffs.check_index().unwrap();
    }

    #[test]
    fn add_rejects_forcefield_publishing_the_total_symbol() {
        let mut ffs = ForceFields::new();
        assert!(matches!(
            ffs.add_forcefield(FF::new("total", NullPotential)),
            Err(Error::Incompatible(_))
        ));
        assert_eq!(ffs.n_forcefields(), 0);
        assert_eq!(ffs.energy().unwrap(), 0.0);
    }

    #[test]
    fn total_energy_sums_forcefields_and_honours_user_components() {
        let mut ffs = ForceFields::new();
        let mut a = FF::new("a", PropertySumPotential::default());
        a.add(&Molecules::from(charged(2.0)), &MGID::All).unwrap();
        let mut b = FF::new("b", PropertySumPotential::default());
        b.add(&Molecules::from(charged(3.0)), &MGID::All).unwrap();
        ffs.add_forcefield(a).unwrap();
        ffs.add_forcefield(b).unwrap();

        assert_eq!(ffs.energy().unwrap(), 5.0);

        let ea = Symbol::energy(&["a"]);
        let eb = Symbol::energy(&["b"]);
        let weighted = Expression::from(ea.clone()) * 2.0 + eb.clone();
        ffs.set_component(Symbol::new("E_{weighted}"), weighted).unwrap();
        assert_eq!(ffs.energy_of(&Symbol::new("E_{weighted}")).unwrap(), 7.0);

        ffs.set_component(Symbol::total(), Expression::from(Symbol::new("E_{weighted}")))
            .unwrap();
        assert_eq!(ffs.energy().unwrap(), 7.0);

        assert!(matches!(
            ffs.energy_of(&Symbol::new("E_{nothing}")),
            Err(Error::MissingComponent(_))
        ));
    }

    #[test]
    fn cyclic_and_forcefield_component_definitions_are_rejected() {
        let mut ffs = ForceFields::new();
        ffs.add_forcefield(FF::new("a", NullPotential)).unwrap();

        let x = Symbol::new("E_{x}");
        let y = Symbol::new("E_{y}");
        ffs.set_component(x.clone(), Expression::from(y.clone())).unwrap();
        let err = ffs.set_component(y.clone(), Expression::from(x.clone()) + 1.0).unwrap_err();
        assert!(matches!(err, Error::Incompatible(_)));

        let err = ffs.set_component(Symbol::energy(&["a"]), 1.0).unwrap_err();
        assert!(matches!(err, Error::Incompatible(_)));

        ffs.set_component(y.clone(), Expression::from(Symbol::total())).unwrap();
        let err = ffs.set_component(Symbol::total(), Expression::from(x.clone())).unwrap_err();
        assert!(matches!(err, Error::Incompatible(_)));
    }

    #[test]
    fn edits_route_to_the_owning_forcefield_and_keep_the_index() {
        let mut ffs = ForceFields::new();
        let a = FF::new("a", NullPotential);
        let b = FF::new("b", NullPotential);
        let (ga, gb) = (a.mg_nums()[0], b.mg_nums()[0]);
        ffs.add_forcefield(a).unwrap();
        ffs.add_forcefield(b).unwrap();

        let mol = Molecules::from(Molecule::new("x", 1));
        ffs.add(&mol, &MGID::All).unwrap();
        assert_eq!(ffs.groups_containing(mol.mol_nums().next().unwrap()), vec![ga, gb]);
        ffs.check_index().unwrap();

        ffs.remove(&mol, &MGID::Num(ga)).unwrap();
        ffs.check_index().unwrap();
        assert_eq!(ffs.forcefield("a").unwrap().n_molecules(), 0);

        let removed = ffs.remove_forcefield("b").unwrap();
        assert_eq!(removed.name(), "b");
        ffs.check_index().unwrap();
        assert_eq!(ffs.n_molecules(), 0);
        assert_eq!(ffs.mg_nums(), &[ga]);
    }

    #[test]
    fn failure_in_a_later_forcefield_restores_the_earlier_ones() {
        let mut ffs = ForceFields::new();
        ffs.add_forcefield(FF::new("free", NullPotential)).unwrap();
        ffs.add_forcefield(FF::new("charged", PropertySumPotential::default())).unwrap();
        let before: Vec<FF> = ffs.iter().cloned().collect();

        let err = ffs
            .add(&Molecules::from(Molecule::new("bare", 1)), &MGID::All)
            .unwrap_err();
        assert!(matches!(err, Error::MissingProperty { .. }));
        let after: Vec<FF> = ffs.iter().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(ffs.n_molecules(), 0);
        ffs.check_index().unwrap();
    }

    #[test]
    fn added_forcefield_adopts_resident_versions() {
        let mol = charged(1.0);
        let mut ffs = ForceFields::new();
        let mut a = FF::new("a", PropertySumPotential::default());
        a.add(&Molecules::from(mol.clone()), &MGID::All).unwrap();
        ffs.add_forcefield(a).unwrap();

        let newer = mol.with_property("charge", vec![4.0]).unwrap();
        let mut b = FF::new("b", PropertySumPotential::default());
        b.add(&Molecules::from(newer), &MGID::All).unwrap();
        ffs.add_forcefield(b).unwrap();

        let in_b = ffs.forcefield("b").unwrap().molecule(mol.number()).unwrap();
        assert_eq!(in_b.molecule(), &mol);
        assert_eq!(ffs.energy().unwrap(), 2.0);
    }

    #[test]
    fn set_property_is_all_or_nothing() {
        let mut ffs = ForceFields::new();
        ffs.add_forcefield(FF::new("free", NullPotential)).unwrap();
        ffs.add_forcefield(FF::new("charged", PropertySumPotential::default())).unwrap();

        assert!(ffs.set_property("scale", 2.0).unwrap());
        assert_eq!(ffs.property("scale").unwrap().as_scalar(), Some(2.0));

        let err = ffs.set_property("scale", "huge").unwrap_err();
        assert!(matches!(err, Error::Incompatible(_)));
        assert_eq!(
            ffs.forcefield("free").unwrap().property("scale").unwrap().as_scalar(),
            Some(2.0)
        );
    }
}
