use super::molgroup::MoleculeGroup;
use crate::core::models::ids::{MGNum, MolNum};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Derived lookup state shared by every group container.
///
/// Tracks the group order, group names and the reverse mapping from molecule
/// number to the groups containing it. After any successful container call,
/// `groups_containing(m)` is exactly the set of groups whose contents include
/// `m`.
///
/// Single-group edits patch the index with [`MolGroupIndex::sync`]; bulk
/// replacements call [`MolGroupIndex::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MolGroupIndex {
    mgnums: Vec<MGNum>,
    names: BTreeMap<String, Vec<MGNum>>,
    molnum_to_mgnum: BTreeMap<MolNum, BTreeSet<MGNum>>,
}

impl MolGroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group numbers in the order the groups were added.
    pub fn mg_nums(&self) -> &[MGNum] {
        &self.mgnums
    }

    pub fn n_groups(&self) -> usize {
        self.mgnums.len()
    }

    pub fn contains_group(&self, mgnum: MGNum) -> bool {
        self.mgnums.contains(&mgnum)
    }

    pub fn groups_named(&self, name: &str) -> &[MGNum] {
        self.names.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn groups_containing(&self, molnum: MolNum) -> Option<&BTreeSet<MGNum>> {
        self.molnum_to_mgnum.get(&molnum)
    }

    pub fn mol_nums(&self) -> impl Iterator<Item = MolNum> + '_ {
        self.molnum_to_mgnum.keys().copied()
    }

    pub fn n_molecules(&self) -> usize {
        self.molnum_to_mgnum.len()
    }

    pub fn contains_molecule(&self, molnum: MolNum) -> bool {
        self.molnum_to_mgnum.contains_key(&molnum)
    }

    pub(crate) fn add_group(&mut self, group: &MoleculeGroup) -> Result<()> {
        let mgnum = group.number();
        if self.contains_group(mgnum) {
            return Err(Error::DuplicateGroup(format!(
                "a group with number {mgnum} is already present"
            )));
        }
        self.insert_group(group);
        Ok(())
    }

    /// Appends a group whose number is known not to be indexed yet.
    pub(crate) fn insert_group(&mut self, group: &MoleculeGroup) {
        let mgnum = group.number();
        self.mgnums.push(mgnum);
        self.names
            .entry(group.name().to_string())
            .or_default()
            .push(mgnum);
        for molnum in group.mol_nums() {
            self.molnum_to_mgnum.entry(*molnum).or_default().insert(mgnum);
        }
    }

    pub(crate) fn remove_group(&mut self, group: &MoleculeGroup) -> bool {
        let mgnum = group.number();
        let Some(pos) = self.mgnums.iter().position(|n| *n == mgnum) else {
            return false;
        };
        self.mgnums.remove(pos);

        if let Some(nums) = self.names.get_mut(group.name()) {
            nums.retain(|n| *n != mgnum);
            if nums.is_empty() {
                self.names.remove(group.name());
            }
        }

        for molnum in group.mol_nums() {
            self.unlink(*molnum, mgnum);
        }
        true
    }

    fn unlink(&mut self, molnum: MolNum, mgnum: MGNum) {
        if let Some(groups) = self.molnum_to_mgnum.get_mut(&molnum) {
            groups.remove(&mgnum);
            if groups.is_empty() {
                self.molnum_to_mgnum.remove(&molnum);
            }
        }
    }

    /// Re-derives the entries of the `touched` molecules for one edited group.
    pub(crate) fn sync(&mut self, group: &MoleculeGroup, touched: impl IntoIterator<Item = MolNum>) {
        let mgnum = group.number();
        for molnum in touched {
            if group.contains(molnum) {
                self.molnum_to_mgnum.entry(molnum).or_default().insert(mgnum);
            } else {
                self.unlink(molnum, mgnum);
            }
        }
        trace!(group = %mgnum, "index patched");
    }

    /// Discards all derived state and re-derives it from `groups`, in order.
    pub(crate) fn rebuild<'a>(&mut self, groups: impl IntoIterator<Item = &'a MoleculeGroup>) -> Result<()> {
        let mut fresh = MolGroupIndex::new();
        for group in groups {
            fresh.add_group(group)?;
        }
        trace!(groups = fresh.n_groups(), molecules = fresh.n_molecules(), "index rebuilt");
        *self = fresh;
        Ok(())
    }

    /// Checks this index against a from-scratch derivation over `groups`.
    pub fn verify<'a>(&self, groups: impl IntoIterator<Item = &'a MoleculeGroup>) -> Result<()> {
        let mut expected = MolGroupIndex::new();
        for group in groups {
            expected
                .add_group(group)
                .map_err(|e| Error::ProgramBug(format!("group listed twice in index: {e}")))?;
        }
        if expected.molnum_to_mgnum != self.molnum_to_mgnum {
            return Err(Error::ProgramBug(
                "molecule-to-group index is not the transpose of the group contents".to_string(),
            ));
        }
        if expected.mgnums != self.mgnums || expected.names != self.names {
            return Err(Error::ProgramBug(
                "group order or names are out of sync with the groups".to_string(),
            ));
        }
        Ok(())
    }
}
