use super::ids::MolNum;
use super::molecule::Molecule;
use super::selection::AtomSelection;
use crate::core::version::Version;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Some atoms of one molecule at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMolecule {
    molecule: Molecule,
    selection: AtomSelection,
}

impl PartialMolecule {
    pub fn new(molecule: Molecule, selection: AtomSelection) -> Result<Self> {
        if selection.n_atoms() != molecule.n_atoms() {
            return Err(Error::Incompatible(format!(
                "selection over {} atom(s) cannot view molecule {} with {} atom(s)",
                selection.n_atoms(),
                molecule.number(),
                molecule.n_atoms()
            )));
        }
        Ok(Self {
            molecule,
            selection,
        })
    }

    pub fn number(&self) -> MolNum {
        self.molecule.number()
    }

    pub fn version(&self) -> &Version {
        self.molecule.version()
    }

    pub fn molecule(&self) -> &Molecule {
        &self.molecule
    }

    pub fn selection(&self) -> &AtomSelection {
        &self.selection
    }
}

impl From<Molecule> for PartialMolecule {
    fn from(molecule: Molecule) -> Self {
        let selection = AtomSelection::all(molecule.n_atoms());
        Self {
            molecule,
            selection,
        }
    }
}

/// Every view of one molecule held in one place.
///
/// All views share a single molecule version. The same selection may appear
/// more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewsOfMol {
    molecule: Molecule,
    views: Vec<AtomSelection>,
}

impl ViewsOfMol {
    pub fn new(molecule: Molecule) -> Self {
        Self {
            molecule,
            views: Vec::new(),
        }
    }

    pub fn number(&self) -> MolNum {
        self.molecule.number()
    }

    pub fn molecule(&self) -> &Molecule {
        &self.molecule
    }

    pub fn selections(&self) -> &[AtomSelection] {
        &self.views
    }

    pub fn n_views(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn contains(&self, selection: &AtomSelection) -> bool {
        self.views.contains(selection)
    }

    pub fn view(&self, index: usize) -> Option<PartialMolecule> {
        self.views.get(index).map(|selection| PartialMolecule {
            molecule: self.molecule.clone(),
            selection: selection.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = PartialMolecule> + '_ {
        self.views.iter().map(|selection| PartialMolecule {
            molecule: self.molecule.clone(),
            selection: selection.clone(),
        })
    }

    /// A single view covering the union of every view's atoms.
    pub fn join(&self) -> PartialMolecule {
        let selection = self
            .views
            .iter()
            .fold(AtomSelection::none(self.molecule.n_atoms()), |acc, s| {
                acc.union(s)
            });
        PartialMolecule {
            molecule: self.molecule.clone(),
            selection,
        }
    }

    pub(crate) fn push(&mut self, selection: AtomSelection) {
        self.views.push(selection);
    }

    pub(crate) fn push_if_unique(&mut self, selection: AtomSelection) -> bool {
        if self.views.contains(&selection) {
            return false;
        }
        self.views.push(selection);
        true
    }

    /// Removes the first occurrence of `selection`.
    pub(crate) fn remove_one(&mut self, selection: &AtomSelection) -> bool {
        match self.views.iter().position(|s| s == selection) {
            Some(pos) => {
                self.views.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_every(&mut self, selection: &AtomSelection) -> usize {
        let before = self.views.len();
        self.views.retain(|s| s != selection);
        before - self.views.len()
    }

    /// Swaps in another version of the same molecule. Returns whether the
    /// version changed.
    pub(crate) fn set_molecule(&mut self, molecule: &Molecule) -> bool {
        debug_assert_eq!(molecule.number(), self.number());
        if self.molecule == *molecule {
            return false;
        }
        self.molecule = molecule.clone();
        true
    }
}

impl From<PartialMolecule> for ViewsOfMol {
    fn from(view: PartialMolecule) -> Self {
        Self {
            molecule: view.molecule,
            views: vec![view.selection],
        }
    }
}

/// A set of molecule views ordered by molecule number.
///
/// When views of different versions of one molecule are combined, the first
/// version seen is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Molecules {
    mols: BTreeMap<MolNum, ViewsOfMol>,
}

impl Molecules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mols.is_empty()
    }

    pub fn n_molecules(&self) -> usize {
        self.mols.len()
    }

    pub fn n_views(&self) -> usize {
        self.mols.values().map(ViewsOfMol::n_views).sum()
    }

    pub fn contains(&self, number: MolNum) -> bool {
        self.mols.contains_key(&number)
    }

    pub fn get(&self, number: MolNum) -> Option<&ViewsOfMol> {
        self.mols.get(&number)
    }

    pub fn mol_nums(&self) -> impl Iterator<Item = MolNum> + '_ {
        self.mols.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewsOfMol> {
        self.mols.values()
    }

    pub fn views(&self) -> impl Iterator<Item = PartialMolecule> + '_ {
        self.mols.values().flat_map(ViewsOfMol::iter)
    }

    pub fn add(&mut self, view: PartialMolecule) {
        self.mols
            .entry(view.number())
            .or_insert_with(|| ViewsOfMol::new(view.molecule.clone()))
            .push(view.selection);
    }

    pub fn add_views(&mut self, views: &ViewsOfMol) {
        let entry = self
            .mols
            .entry(views.number())
            .or_insert_with(|| ViewsOfMol::new(views.molecule.clone()));
        entry.views.extend(views.views.iter().cloned());
    }

    /// Replaces the version of every molecule also present in `molecules`,
    /// keeping the selections. Returns whether anything changed.
    pub fn update(&mut self, molecules: &Molecules) -> bool {
        let mut changed = false;
        for incoming in molecules.iter() {
            if let Some(views) = self.mols.get_mut(&incoming.number()) {
                changed |= views.set_molecule(incoming.molecule());
            }
        }
        changed
    }

    pub(crate) fn get_mut(&mut self, number: MolNum) -> Option<&mut ViewsOfMol> {
        self.mols.get_mut(&number)
    }

    pub(crate) fn insert(&mut self, views: ViewsOfMol) {
        self.mols.insert(views.number(), views);
    }

    pub(crate) fn remove(&mut self, number: MolNum) -> Option<ViewsOfMol> {
        self.mols.remove(&number)
    }
}

impl From<Molecule> for Molecules {
    fn from(molecule: Molecule) -> Self {
        PartialMolecule::from(molecule).into()
    }
}

impl From<PartialMolecule> for Molecules {
    fn from(view: PartialMolecule) -> Self {
        let mut molecules = Molecules::new();
        molecules.add(view);
        molecules
    }
}

impl From<ViewsOfMol> for Molecules {
    fn from(views: ViewsOfMol) -> Self {
        let mut molecules = Molecules::new();
        molecules.insert(views);
        molecules
    }
}

impl FromIterator<PartialMolecule> for Molecules {
    fn from_iter<T: IntoIterator<Item = PartialMolecule>>(iter: T) -> Self {
        let mut molecules = Molecules::new();
        for view in iter {
            molecules.add(view);
        }
        molecules
    }
}

impl FromIterator<Molecule> for Molecules {
    fn from_iter<T: IntoIterator<Item = Molecule>>(iter: T) -> Self {
        iter.into_iter().map(PartialMolecule::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(mol: &Molecule, atoms: &[usize]) -> PartialMolecule {
        let selection = AtomSelection::from_indices(mol.n_atoms(), atoms.iter().copied()).unwrap();
        PartialMolecule::new(mol.clone(), selection).unwrap()
    }

    #[test]
    fn partial_molecule_rejects_mismatched_selection() {
        let mol = Molecule::new("benzene", 12);
        let err = PartialMolecule::new(mol, AtomSelection::all(6)).unwrap_err();
        assert!(matches!(err, Error::Incompatible(_)));
    }

    #[test]
    fn views_of_mol_keeps_multiplicity_and_joins() {
        let mol = Molecule::new("peptide", 5);
        let mut views = ViewsOfMol::from(partial(&mol, &[0, 1]));
        views.push(partial(&mol, &[0, 1]).selection().clone());
        assert_eq!(views.n_views(), 2);

        assert!(!views.push_if_unique(partial(&mol, &[0, 1]).selection().clone()));
        assert!(views.push_if_unique(partial(&mol, &[3]).selection().clone()));
        assert_eq!(views.join().selection().indices(), vec![0, 1, 3]);

        let first = partial(&mol, &[0, 1]).selection().clone();
        assert!(views.remove_one(&first));
        assert_eq!(views.n_views(), 2);
        assert_eq!(views.remove_every(&first), 1);
        assert_eq!(views.n_views(), 1);
    }

    #[test]
    fn molecules_collects_views_by_number_keeping_first_version() {
        let mol = Molecule::new("ligand", 3);
        let newer = mol.with_property("charge", vec![0.0; 3]).unwrap();

        let molecules: Molecules = vec![partial(&mol, &[0]), partial(&newer, &[1])]
            .into_iter()
            .collect();

        assert_eq!(molecules.n_molecules(), 1);
        assert_eq!(molecules.n_views(), 2);
        assert_eq!(molecules.get(mol.number()).unwrap().molecule(), &mol);
    }

    #[test]
    fn update_swaps_versions_of_present_molecules_only() {
        let a = Molecule::new("a", 1);
        let b = Molecule::new("b", 1);
        let mut molecules = Molecules::from(a.clone());

        let a2 = a.with_property("mass", 12.0).unwrap();
        let incoming: Molecules = vec![a2.clone(), b.clone()].into_iter().collect();

        assert!(molecules.update(&incoming));
        assert!(!molecules.contains(b.number()));
        assert_eq!(molecules.get(a.number()).unwrap().molecule(), &a2);
        assert!(!molecules.update(&incoming));
    }
}
