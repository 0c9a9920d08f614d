use super::index::MolGroupIndex;
use super::molgroup::MoleculeGroup;
use crate::core::models::ids::{MGID, MGNum, MolNum, resolve_index};
use crate::core::models::property::PropertyMap;
use crate::core::models::views::{Molecules, ViewsOfMol};
use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Shared surface of every container of molecule groups.
///
/// Implementors own their groups and a [`MolGroupIndex`]. Mutating methods
/// either succeed completely or leave the container unchanged, and the index
/// is current whenever one of them returns.
///
/// Targeted mutations resolve their [`MGID`] first; a group matched several
/// times by one ID is still edited (and versioned) only once.
pub trait MolGroupsBase {
    fn index(&self) -> &MolGroupIndex;

    fn group(&self, mgnum: MGNum) -> Result<&MoleculeGroup>;

    /// Adds the views to every group matched by `id`, keeping duplicates.
    fn add_with_map(&mut self, molecules: &Molecules, id: &MGID, map: &PropertyMap) -> Result<()>;

    /// Adds only views not already present. Returns the views added, once
    /// per group they were added to.
    fn add_if_unique_with_map(
        &mut self,
        molecules: &Molecules,
        id: &MGID,
        map: &PropertyMap,
    ) -> Result<Molecules>;

    /// Removes one occurrence of each view from every matched group.
    fn remove(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool>;

    /// Removes every occurrence of each view from every matched group.
    fn remove_all(&mut self, molecules: &Molecules, id: &MGID) -> Result<bool>;

    /// Empties every matched group, keeping the groups themselves.
    fn clear_groups(&mut self, id: &MGID) -> Result<bool>;

    /// Swaps in new versions of molecules wherever they are held.
    fn update(&mut self, molecules: &Molecules) -> Result<bool>;

    fn set_contents_with_map(
        &mut self,
        id: &MGID,
        molecules: &Molecules,
        map: &PropertyMap,
    ) -> Result<bool>;

    fn add(&mut self, molecules: &Molecules, id: &MGID) -> Result<()> {
        self.add_with_map(molecules, id, &PropertyMap::default())
    }

    fn add_if_unique(&mut self, molecules: &Molecules, id: &MGID) -> Result<Molecules> {
        self.add_if_unique_with_map(molecules, id, &PropertyMap::default())
    }

    fn set_contents(&mut self, id: &MGID, molecules: &Molecules) -> Result<bool> {
        self.set_contents_with_map(id, molecules, &PropertyMap::default())
    }

    fn mg_nums(&self) -> &[MGNum] {
        self.index().mg_nums()
    }

    fn n_groups(&self) -> usize {
        self.index().n_groups()
    }

    fn contains_group(&self, mgnum: MGNum) -> bool {
        self.index().contains_group(mgnum)
    }

    fn map_mgid(&self, id: &MGID) -> Result<Vec<MGNum>> {
        id.map(self)
    }

    /// Resolves `id` to exactly one group number.
    fn mgnum(&self, id: &MGID) -> Result<MGNum> {
        let nums = self.map_mgid(id)?;
        match nums.as_slice() {
            [num] => Ok(*num),
            [] => Err(Error::MissingGroup(format!("{id} matches no group"))),
            _ => Err(Error::DuplicateGroup(format!(
                "{id} matches {} groups",
                nums.len()
            ))),
        }
    }

    fn at(&self, id: &MGID) -> Result<&MoleculeGroup> {
        let mgnum = self.mgnum(id)?;
        self.group(mgnum)
    }

    fn mol_nums(&self) -> Vec<MolNum> {
        self.index().mol_nums().collect()
    }

    fn n_molecules(&self) -> usize {
        self.index().n_molecules()
    }

    fn contains_molecule(&self, molnum: MolNum) -> bool {
        self.index().contains_molecule(molnum)
    }

    /// Numbers of every group holding `molnum`, in container order.
    fn groups_containing(&self, molnum: MolNum) -> Vec<MGNum> {
        match self.index().groups_containing(molnum) {
            Some(found) => self
                .mg_nums()
                .iter()
                .copied()
                .filter(|mgnum| found.contains(mgnum))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The views of `molnum` held by the first group containing it.
    fn molecule(&self, molnum: MolNum) -> Result<&ViewsOfMol> {
        let mgnum = self
            .groups_containing(molnum)
            .first()
            .copied()
            .ok_or_else(|| Error::MissingMolecule(format!("no molecule with number {molnum}")))?;
        self.group(mgnum)?
            .molecule(molnum)
            .ok_or_else(|| Error::ProgramBug(format!("index lists molecule {molnum} in group {mgnum}")))
    }

    fn groups(&self) -> Vec<&MoleculeGroup> {
        self.mg_nums()
            .iter()
            .filter_map(|mgnum| self.group(*mgnum).ok())
            .collect()
    }

    /// Returns `molecules` with every molecule already held here replaced by
    /// the resident version. Selections are kept.
    fn match_to_existing_version(&self, molecules: &Molecules) -> Result<Molecules> {
        let mut resident = Molecules::new();
        for molnum in molecules.mol_nums() {
            if self.contains_molecule(molnum) {
                resident.add(self.molecule(molnum)?.molecule().clone().into());
            }
        }
        let mut matched = molecules.clone();
        matched.update(&resident);
        Ok(matched)
    }

    /// Recomputes the index from the groups and compares.
    fn check_index(&self) -> Result<()> {
        let groups = self.groups();
        if groups.len() != self.n_groups() {
            return Err(Error::ProgramBug(format!(
                "index lists {} group(s) but only {} resolve",
                self.n_groups(),
                groups.len()
            )));
        }
        self.index().verify(groups)
    }
}

impl MGID {
    /// Resolves this ID to group numbers, in container order.
    ///
    /// Unions and intersections never fail because a part matched nothing;
    /// only callers that need exactly one group treat an empty result as an
    /// error.
    pub fn map<G: MolGroupsBase + ?Sized>(&self, groups: &G) -> Result<Vec<MGNum>> {
        let index = groups.index();
        match self {
            MGID::Num(mgnum) => {
                if index.contains_group(*mgnum) {
                    Ok(vec![*mgnum])
                } else {
                    Err(Error::missing_group_num(*mgnum))
                }
            }
            MGID::Idx(idx) => resolve_index(*idx, index.n_groups())
                .map(|i| vec![index.mg_nums()[i]])
                .ok_or(Error::InvalidIndex {
                    index: *idx,
                    count: index.n_groups(),
                }),
            MGID::Name(name) => {
                let nums = index.groups_named(name);
                if nums.is_empty() {
                    Err(Error::MissingGroup(format!("no group named '{name}'")))
                } else {
                    Ok(in_order(index, nums.iter().copied().collect()))
                }
            }
            MGID::Or(parts) => {
                let mut found = BTreeSet::new();
                for part in parts {
                    found.extend(map_tolerant(part, groups)?);
                }
                Ok(in_order(index, found))
            }
            MGID::And(parts) => {
                let mut found: Option<BTreeSet<MGNum>> = None;
                for part in parts {
                    let matched: BTreeSet<MGNum> = map_tolerant(part, groups)?.into_iter().collect();
                    found = Some(match found {
                        Some(acc) => acc.intersection(&matched).copied().collect(),
                        None => matched,
                    });
                }
                Ok(in_order(index, found.unwrap_or_default()))
            }
            MGID::All => Ok(index.mg_nums().to_vec()),
        }
    }
}

fn map_tolerant<G: MolGroupsBase + ?Sized>(id: &MGID, groups: &G) -> Result<Vec<MGNum>> {
    match id.map(groups) {
        Err(Error::MissingGroup(_)) => Ok(Vec::new()),
        other => other,
    }
}

fn in_order(index: &MolGroupIndex, found: BTreeSet<MGNum>) -> Vec<MGNum> {
    index
        .mg_nums()
        .iter()
        .copied()
        .filter(|mgnum| found.contains(mgnum))
        .collect()
}
