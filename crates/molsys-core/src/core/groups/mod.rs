//! # Molecule Groups
//!
//! Ordered collections of molecule views and the containers that own them.
//!
//! - [`molgroup`] - `MoleculeGroup`, a versioned set of views keyed by molecule number
//! - [`index`] - `MolGroupIndex`, the derived molecule-to-group lookup
//! - [`base`] - the `MolGroupsBase` trait and `MGID` resolution
//! - [`molgroups`] - `MoleculeGroups`, the plain (forcefield-free) container
//!
//! Forcefields, the forcefield collection and the `System` implement
//! [`base::MolGroupsBase`] as well, so every container answers the same
//! queries and accepts the same edits.

pub mod base;
pub mod index;
pub mod molgroup;
pub mod molgroups;
