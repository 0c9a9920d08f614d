use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// The subset of a molecule's atoms covered by one view.
///
/// A selection covering every atom is always stored as "all", so two
/// selections of the same atoms compare equal however they were built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomSelection {
    n_atoms: usize,
    selected: Option<BTreeSet<usize>>,
}

impl AtomSelection {
    pub fn all(n_atoms: usize) -> Self {
        Self {
            n_atoms,
            selected: None,
        }
    }

    pub fn none(n_atoms: usize) -> Self {
        Self::normalized(n_atoms, BTreeSet::new())
    }

    pub fn from_indices(n_atoms: usize, indices: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut selected = BTreeSet::new();
        for index in indices {
            if index >= n_atoms {
                return Err(Error::InvalidIndex {
                    index: index as i64,
                    count: n_atoms,
                });
            }
            selected.insert(index);
        }
        Ok(Self::normalized(n_atoms, selected))
    }

    fn normalized(n_atoms: usize, selected: BTreeSet<usize>) -> Self {
        if selected.len() == n_atoms {
            Self::all(n_atoms)
        } else {
            Self {
                n_atoms,
                selected: Some(selected),
            }
        }
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    pub fn n_selected(&self) -> usize {
        self.selected.as_ref().map_or(self.n_atoms, BTreeSet::len)
    }

    pub fn selects_all(&self) -> bool {
        self.selected.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.n_selected() == 0
    }

    pub fn selects_atom(&self, index: usize) -> bool {
        match &self.selected {
            None => index < self.n_atoms,
            Some(set) => set.contains(&index),
        }
    }

    pub fn indices(&self) -> Vec<usize> {
        match &self.selected {
            None => (0..self.n_atoms).collect(),
            Some(set) => set.iter().copied().collect(),
        }
    }

    pub fn union(&self, other: &AtomSelection) -> AtomSelection {
        match (&self.selected, &other.selected) {
            (None, _) | (_, None) => Self::all(self.n_atoms),
            (Some(a), Some(b)) => Self::normalized(self.n_atoms, a.union(b).copied().collect()),
        }
    }

    /// True if every atom selected by `other` is also selected here.
    pub fn contains(&self, other: &AtomSelection) -> bool {
        match (&self.selected, &other.selected) {
            (None, _) => true,
            (Some(_), None) => self.n_atoms == 0,
            (Some(a), Some(b)) => b.is_subset(a),
        }
    }

    pub fn intersects(&self, other: &AtomSelection) -> bool {
        match (&self.selected, &other.selected) {
            (None, _) => !other.is_empty(),
            (_, None) => !self.is_empty(),
            (Some(a), Some(b)) => !a.is_disjoint(b),
        }
    }
}
