use crate::core::models::ids::{MGNum, MolID, MolNum, resolve_index};
use crate::core::models::views::{Molecules, PartialMolecule, ViewsOfMol};
use crate::core::version::{Version, VersionRegistry};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct GroupData {
    number: MGNum,
    name: String,
    molecules: Molecules,
    /// Molecule numbers in insertion order, for index-based lookup.
    order: Vec<MolNum>,
    version: Version,
}

/// An ordered, indexed collection of molecule views.
///
/// Holds at most one [`ViewsOfMol`] per molecule number, and therefore one
/// version per molecule. Views added for a molecule already present take on
/// the resident version. Every mutating call that changes the group bumps its
/// version exactly once: structural edits bump the major version, `update`
/// bumps the minor version.
///
/// Clones share storage until one of them is modified.
#[derive(Debug, Clone)]
pub struct MoleculeGroup {
    d: Arc<GroupData>,
}

impl MoleculeGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_number(MGNum::new_unique(), name)
    }

    pub fn with_number(number: MGNum, name: impl Into<String>) -> Self {
        Self {
            d: Arc::new(GroupData {
                number,
                name: name.into(),
                molecules: Molecules::new(),
                order: Vec::new(),
                version: VersionRegistry::global().register(number),
            }),
        }
    }

    /// A new group, with a fresh number, holding the contents of `other`.
    pub fn from_group(name: impl Into<String>, other: &MoleculeGroup) -> Self {
        let mut group = Self::new(name);
        let d = group.data_mut();
        d.molecules = other.d.molecules.clone();
        d.order = other.d.order.clone();
        group
    }

    pub fn from_molecules(name: impl Into<String>, molecules: impl Into<Molecules>) -> Self {
        let mut group = Self::new(name);
        group.add(molecules);
        group
    }

    fn data_mut(&mut self) -> &mut GroupData {
        Arc::make_mut(&mut self.d)
    }

    pub fn number(&self) -> MGNum {
        self.d.number
    }

    pub fn name(&self) -> &str {
        &self.d.name
    }

    pub fn version(&self) -> &Version {
        &self.d.version
    }

    pub fn molecules(&self) -> &Molecules {
        &self.d.molecules
    }

    pub fn n_molecules(&self) -> usize {
        self.d.order.len()
    }

    pub fn n_views(&self) -> usize {
        self.d.molecules.n_views()
    }

    pub fn is_empty(&self) -> bool {
        self.d.order.is_empty()
    }

    pub fn contains(&self, number: MolNum) -> bool {
        self.d.molecules.contains(number)
    }

    pub fn molecule(&self, number: MolNum) -> Option<&ViewsOfMol> {
        self.d.molecules.get(number)
    }

    /// Molecule numbers in the order they were added.
    pub fn mol_nums(&self) -> &[MolNum] {
        &self.d.order
    }

    /// Every view, molecule by molecule in insertion order.
    pub fn views(&self) -> impl Iterator<Item = PartialMolecule> + '_ {
        self.d
            .order
            .iter()
            .filter_map(|num| self.d.molecules.get(*num))
            .flat_map(ViewsOfMol::iter)
    }

    pub fn map_molid(&self, id: &MolID) -> Result<Vec<MolNum>> {
        match id {
            MolID::Num(num) => {
                if self.contains(*num) {
                    Ok(vec![*num])
                } else {
                    Err(Error::MissingMolecule(format!(
                        "no molecule with number {num} in group '{}'",
                        self.name()
                    )))
                }
            }
            MolID::Idx(idx) => resolve_index(*idx, self.n_molecules())
                .map(|i| vec![self.d.order[i]])
                .ok_or(Error::InvalidIndex {
                    index: *idx,
                    count: self.n_molecules(),
                }),
            MolID::Or(parts) => {
                let mut found = BTreeSet::new();
                for part in parts {
                    match self.map_molid(part) {
                        Ok(nums) => found.extend(nums),
                        Err(Error::MissingMolecule(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(self
                    .d
                    .order
                    .iter()
                    .copied()
                    .filter(|num| found.contains(num))
                    .collect())
            }
            MolID::All => Ok(self.d.order.clone()),
        }
    }

    /// Resolves `id` to exactly one molecule.
    pub fn at(&self, id: &MolID) -> Result<&ViewsOfMol> {
        let nums = self.map_molid(id)?;
        match nums.as_slice() {
            [num] => self
                .molecule(*num)
                .ok_or_else(|| Error::ProgramBug(format!("group order lists absent molecule {num}"))),
            [] => Err(Error::MissingMolecule(format!(
                "{id} matches no molecule in group '{}'",
                self.name()
            ))),
            _ => Err(Error::DuplicateMolecule(format!(
                "{id} matches {} molecules in group '{}'",
                nums.len(),
                self.name()
            ))),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name == self.d.name {
            return false;
        }
        let d = self.data_mut();
        d.name = name;
        d.version.increment_major();
        true
    }

    /// Adds every view, keeping duplicates.
    pub fn add(&mut self, molecules: impl Into<Molecules>) -> bool {
        let molecules = molecules.into();
        if molecules.n_views() == 0 {
            return false;
        }

        let d = self.data_mut();
        for incoming in molecules.iter().filter(|views| !views.is_empty()) {
            match d.molecules.get_mut(incoming.number()) {
                Some(resident) => {
                    for selection in incoming.selections() {
                        resident.push(selection.clone());
                    }
                }
                None => {
                    d.order.push(incoming.number());
                    d.molecules.insert(incoming.clone());
                }
            }
        }
        d.version.increment_major();
        true
    }

    /// Adds only the views not already present. Returns what was added.
    pub fn add_if_unique(&mut self, molecules: impl Into<Molecules>) -> Molecules {
        let molecules = molecules.into();
        let mut added = Molecules::new();
        if molecules.n_views() == 0 {
            return added;
        }

        let mut next = (*self.d).clone();
        for view in molecules.views() {
            match next.molecules.get_mut(view.number()) {
                Some(resident) => {
                    if resident.push_if_unique(view.selection().clone()) {
                        if let Some(added_view) = resident.view(resident.n_views() - 1) {
                            added.add(added_view);
                        }
                    }
                }
                None => {
                    next.order.push(view.number());
                    next.molecules.insert(ViewsOfMol::from(view.clone()));
                    added.add(view);
                }
            }
        }

        if !added.is_empty() {
            next.version.increment_major();
            self.d = Arc::new(next);
        }
        added
    }

    /// Removes one occurrence of every view in `molecules`.
    pub fn remove(&mut self, molecules: impl Into<Molecules>) -> bool {
        self.remove_views(&molecules.into(), false)
    }

    /// Removes every occurrence of every view in `molecules`.
    pub fn remove_all(&mut self, molecules: impl Into<Molecules>) -> bool {
        self.remove_views(&molecules.into(), true)
    }

    fn remove_views(&mut self, molecules: &Molecules, every: bool) -> bool {
        if !molecules.mol_nums().any(|num| self.contains(num)) {
            return false;
        }

        let d = self.data_mut();
        let mut changed = false;
        for incoming in molecules.iter() {
            let Some(resident) = d.molecules.get_mut(incoming.number()) else {
                continue;
            };
            for selection in incoming.selections() {
                changed |= if every {
                    resident.remove_every(selection) > 0
                } else {
                    resident.remove_one(selection)
                };
            }
            if resident.is_empty() {
                d.molecules.remove(incoming.number());
                d.order.retain(|num| *num != incoming.number());
            }
        }

        if changed {
            d.version.increment_major();
        }
        changed
    }

    /// Removes all views of molecule `number`.
    pub fn remove_molecule(&mut self, number: MolNum) -> bool {
        if !self.contains(number) {
            return false;
        }
        let d = self.data_mut();
        d.molecules.remove(number);
        d.order.retain(|num| *num != number);
        d.version.increment_major();
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        let d = self.data_mut();
        d.molecules = Molecules::new();
        d.order.clear();
        d.version.increment_major();
        true
    }

    /// Swaps in the given versions of molecules already in the group.
    /// Molecules not in the group are ignored.
    pub fn update(&mut self, molecules: impl Into<Molecules>) -> bool {
        let molecules = molecules.into();
        let needs_update = molecules.iter().any(|incoming| {
            self.molecule(incoming.number())
                .is_some_and(|resident| resident.molecule() != incoming.molecule())
        });
        if !needs_update {
            return false;
        }

        let d = self.data_mut();
        d.molecules.update(&molecules);
        d.version.increment_minor();
        true
    }

    /// Replaces the contents of the group. Molecules end up ordered by number.
    pub fn set_contents(&mut self, molecules: impl Into<Molecules>) -> bool {
        let mut contents = Molecules::new();
        for views in molecules.into().iter().filter(|views| !views.is_empty()) {
            contents.insert(views.clone());
        }
        let order: Vec<MolNum> = contents.mol_nums().collect();
        if contents == self.d.molecules && order == self.d.order {
            return false;
        }

        let d = self.data_mut();
        d.molecules = contents;
        d.order = order;
        d.version.increment_major();
        true
    }
}

/// Groups are identified by number and version, not by contents.
impl PartialEq for MoleculeGroup {
    fn eq(&self, other: &Self) -> bool {
        self.number() == other.number() && self.version() == other.version()
    }
}

impl Eq for MoleculeGroup {}

impl MolID {
    pub fn map(&self, group: &MoleculeGroup) -> Result<Vec<MolNum>> {
        group.map_molid(self)
    }
}

impl From<&MoleculeGroup> for Molecules {
    fn from(group: &MoleculeGroup) -> Self {
        group.molecules().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::molecule::Molecule;
    use crate::core::models::selection::AtomSelection;

    fn partial(mol: &Molecule, atoms: &[usize]) -> PartialMolecule {
        let selection = AtomSelection::from_indices(mol.n_atoms(), atoms.iter().copied()).unwrap();
        PartialMolecule::new(mol.clone(), selection).unwrap()
    }

    #[test]
    fn add_keeps_duplicates_and_bumps_major_once() {
        let mol = Molecule::new("water", 3);
        let mut group = MoleculeGroup::new("solvent");
        let start = group.version().clone();

        assert!(group.add(mol.clone()));
        assert_eq!(group.version().major(), start.major() + 1);

        assert!(group.add(mol.clone()));
        assert_eq!(group.n_molecules(), 1);
        assert_eq!(group.n_views(), 2);
        assert_eq!(group.version().major(), start.major() + 2);
    }

    #[test]
    fn add_of_many_molecules_is_a_single_version_step() {
        let mut group = MoleculeGroup::new("solvent");
        let start = group.version().major();
        let molecules: Molecules = (0..5).map(|_| Molecule::new("water", 3)).collect();
        group.add(molecules);
        assert_eq!(group.n_molecules(), 5);
        assert_eq!(group.version().major(), start + 1);
    }

    #[test]
    fn add_if_unique_skips_views_already_present() {
        let mol = Molecule::new("water", 3);
        let mut group = MoleculeGroup::new("solvent");

        let added = group.add_if_unique(mol.clone());
        assert_eq!(added.n_views(), 1);
        let version = group.version().clone();

        let added = group.add_if_unique(mol.clone());
        assert!(added.is_empty());
        assert_eq!(group.n_views(), 1);
        assert_eq!(group.version(), &version);

        let added = group.add_if_unique(partial(&mol, &[0]));
        assert_eq!(added.n_views(), 1);
        assert_eq!(group.n_views(), 2);
    }

    #[test]
    fn added_views_take_the_resident_version() {
        let mol = Molecule::new("ligand", 2);
        let newer = mol.with_property("charge", vec![0.5, -0.5]).unwrap();
        let mut group = MoleculeGroup::from_molecules("ligands", mol.clone());

        group.add(partial(&newer, &[1]));
        let views = group.molecule(mol.number()).unwrap();
        assert_eq!(views.molecule(), &mol);
        assert_eq!(views.n_views(), 2);
    }

    #[test]
    fn remove_takes_one_occurrence_and_remove_all_takes_every_occurrence() {
        let mol = Molecule::new("water", 3);
        let mut group = MoleculeGroup::new("solvent");
        group.add(mol.clone());
        group.add(mol.clone());
        group.add(mol.clone());

        assert!(group.remove(mol.clone()));
        assert_eq!(group.n_views(), 2);
        assert!(group.remove_all(mol.clone()));
        assert!(group.is_empty());
        assert!(group.mol_nums().is_empty());
    }

    #[test]
    fn removing_absent_molecules_is_a_no_op() {
        let mut group = MoleculeGroup::from_molecules("solvent", Molecule::new("water", 3));
        let version = group.version().clone();

        assert!(!group.remove(Molecule::new("other", 1)));
        assert!(!group.remove_molecule(MolNum::new(123)));
        assert!(!group.update(Molecule::new("other", 1)));
        assert_eq!(group.version(), &version);
    }

    #[test]
    fn update_replaces_version_without_adding() {
        let mol = Molecule::new("protein", 4);
        let stranger = Molecule::new("stranger", 1);
        let mut group = MoleculeGroup::from_molecules("protein", mol.clone());
        let major = group.version().major();

        let moved = mol.with_property("charge", vec![0.0; 4]).unwrap();
        let incoming: Molecules = vec![moved.clone(), stranger.clone()].into_iter().collect();
        assert!(group.update(incoming));
        assert_eq!(group.molecule(mol.number()).unwrap().molecule(), &moved);
        assert!(!group.contains(stranger.number()));
        assert_eq!(group.version().major(), major);
        assert_eq!(group.version().minor(), 1);
    }

    #[test]
    fn set_contents_reports_whether_anything_changed() {
        let a = Molecule::new("a", 1);
        let b = Molecule::new("b", 1);
        let mut group = MoleculeGroup::new("g");

        let contents: Molecules = vec![a.clone(), b.clone()].into_iter().collect();
        assert!(group.set_contents(contents.clone()));
        assert!(!group.set_contents(contents));
        assert!(group.set_contents(a.clone()));
        assert_eq!(group.mol_nums(), &[a.number()]);
    }

    #[test]
    fn molid_resolution() {
        let a = Molecule::new("a", 1);
        let b = Molecule::new("b", 1);
        let mut group = MoleculeGroup::new("g");
        group.add(b.clone());
        group.add(a.clone());

        assert_eq!(group.map_molid(&MolID::Idx(0)).unwrap(), vec![b.number()]);
        assert_eq!(group.map_molid(&MolID::Idx(-1)).unwrap(), vec![a.number()]);
        assert!(matches!(
            group.map_molid(&MolID::Idx(2)),
            Err(Error::InvalidIndex { index: 2, count: 2 })
        ));
        assert!(matches!(
            group.at(&MolID::Num(MolNum::new(77))),
            Err(Error::MissingMolecule(_))
        ));
        assert!(matches!(group.at(&MolID::All), Err(Error::DuplicateMolecule(_))));

        let either = MolID::Or(vec![MolID::Num(MolNum::new(77)), MolID::Num(a.number())]);
        assert_eq!(group.at(&either).unwrap().number(), a.number());
        assert!(group
            .map_molid(&MolID::Or(vec![MolID::Num(MolNum::new(77))]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn clones_are_independent_values() {
        let mut group = MoleculeGroup::from_molecules("g", Molecule::new("a", 1));
        let copy = group.clone();
        assert_eq!(group, copy);

        group.add(Molecule::new("b", 1));
        assert_ne!(group, copy);
        assert_eq!(copy.n_molecules(), 1);
        assert_eq!(group.n_molecules(), 2);
    }

    #[test]
    fn from_group_copies_contents_under_a_new_number() {
        let source = MoleculeGroup::from_molecules("a", Molecule::new("x", 1));
        let copy = MoleculeGroup::from_group("b", &source);
        assert_ne!(copy.number(), source.number());
        assert_eq!(copy.molecules(), source.molecules());
        assert_eq!(copy.name(), "b");
    }
}
