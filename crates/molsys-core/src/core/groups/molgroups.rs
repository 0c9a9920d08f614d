use super::base::MolGroupsBase;
use super::index::MolGroupIndex;
use super::molgroup::MoleculeGroup;
use crate::core::models::ids::{MGID, MGNum, MolNum};
use crate::core::models::property::PropertyMap;
use crate::core::models::views::Molecules;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// A plain collection of molecule groups with no forcefield attached.
#[derive(Debug, Clone, Default)]
pub struct MoleculeGroups {
    groups: BTreeMap<MGNum, MoleculeGroup>,
    index: MolGroupIndex,
}

impl MoleculeGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self, group: MoleculeGroup) -> Result<()> {
        self.index.add_group(&group)?;
        self.groups.insert(group.number(), group);
        Ok(())
    }

    pub fn remove_group(&mut self, mgnum: MGNum) -> Result<MoleculeGroup> {
        let group = self
            .groups
            .remove(&mgnum)
            .ok_or_else(|| Error::missing_group_num(mgnum))?;
        self.index.remove_group(&group);
        Ok(group)
    }

    /// Removes every group matched by `id` and rebuilds the index.
    pub fn remove_groups(&mut self, id: &MGID) -> Result<Vec<MoleculeGroup>> {
        let mgnums = id.map(self)?;
        if mgnums.is_empty() {
            return Ok(Vec::new());
        }
        let order: Vec<MGNum> = self
            .index
            .mg_nums()
            .iter()
            .copied()
            .filter(|mgnum| !mgnums.contains(mgnum))
            .collect();
        let removed: Vec<MoleculeGroup> = mgnums
            .iter()
            .filter_map(|mgnum| self.groups.remove(mgnum))
            .collect();
        self.index
            .rebuild(order.iter().filter_map(|mgnum| self.groups.get(mgnum)))?;
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MoleculeGroup> {
        self.index
            .mg_nums()
            .iter()
            .filter_map(|mgnum| self.groups.get(mgnum))
    }

    /// Applies `edit` to each matched group, patching the index for the
    /// molecules `touched` reports.
    fn edit_groups<F>(&mut self, id: &MGID, mut edit: F) -> Result<bool>
    where
        F: FnMut(&mut MoleculeGroup) -> Option<BTreeSet<MolNum>>,
    {
        let mut changed = false;
        for mgnum in id.map(self)? {
            let group = self
                .groups
                .get_mut(&mgnum)
                .ok_or_else(|| Error::ProgramBug(format!("index lists absent group {mgnum}")))?;
            if let Some(touched) = edit(group) {
                self.index.sync(group, touched);
                changed = true;
            }
        }
        Ok(changed)
    }
}

impl MolGroupsBase for MoleculeGroups {
    fn index(&self) -> &MolGroupIndex {
        &self.index
    }

    fn group(&self, mgnum: MGNum) -> Result<&MoleculeGroup> {
        self.groups
            .get(&mgnum)
            .ok_or_else(|| Error::missing_group_num(mgnum))
    }

    fn add_with_map(&mut self, molecules: &Molecules, id: &MGID, _map: &PropertyMap) -> Result<()> {
        self.edit_groups(id, |group| {
            group
                .add(molecules.clone())
                .then(|| molecules.mol_nums().collect())
        })?;
        Ok(())
    }

    fn add_if_unique_with_map(
        &mut self,
        molecules: &Molecules,
        id: &MGID,
        _map: &PropertyMap,
    ) -> Result<Molecules> {
        let mut added = Molecules::new();
        self.edit_groups(id, |group| {
            let new_views = group.add_if_unique(molecules.clone());
            if new_views.is_empty() {
                return None;
            }
            let touched = new_views.mol_nums().collect();
            for views in new_views.iter() {
                added.add_views(views);
            }
            Some(touched)
        })?;
        Ok(added)
    }

    fn remove(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        self.edit_groups(id, |group| {
            group
                .remove(molecules.clone())
                .then(|| molecules.mol_nums().collect())
        })
    }

    fn remove_all(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool> {
        self.edit_groups(id, |group| {
            group
                .remove_all(molecules.clone())
                .then(|| molecules.mol_nums().collect())
        })
    }

    fn clear_groups(&mut self, id: &MGID) -> Result<bool> {
        self.edit_groups(id, |group| {
            let touched = group.mol_nums().iter().copied().collect();
            group.clear().then_some(touched)
        })
    }

    fn update(&mut self, molecules: &Molecules) -> Result<bool> {
        let mut affected = BTreeSet::new();
        for molnum in molecules.mol_nums() {
            affected.extend(self.groups_containing(molnum));
        }
        let mut changed = false;
        for mgnum in affected {
            if let Some(group) = self.groups.get_mut(&mgnum) {
                changed |= group.update(molecules.clone());
            }
        }
        Ok(changed)
    }

    fn set_contents_with_map(
        &mut self,
        id: &MGID,
        molecules: &Molecules,
        _map: &PropertyMap,
    ) -> Result<bool> {
        self.edit_groups(id, |group| {
            let touched: BTreeSet<MolNum> = group
                .mol_nums()
                .iter()
                .copied()
                .chain(molecules.mol_nums())
                .collect();
            group.set_contents(molecules.clone()).then_some(touched)
        })
    }
}
