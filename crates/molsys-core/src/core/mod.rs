//! # Core Module
//!
//! Building blocks of the molecular registry: identities and version stamps,
//! molecule views, molecule groups and the forcefields that own groups.
//!
//! ## Architecture
//!
//! - **Versioning** ([`version`]) - `Incremint` counters, `(major, minor)` stamps and the process-wide `VersionRegistry`
//! - **Molecular Representation** ([`models`]) - Molecules, atom selections, views and properties
//! - **Grouping** ([`groups`]) - `MoleculeGroup`, the molecule-to-group index and the `MolGroupsBase` trait
//! - **Energy** ([`forcefield`]) - Forcefields, their components and the potential hook
//!
//! Every aggregate here is a value with copy-on-write storage: cloning is
//! cheap and a clone never observes later edits to the original.

pub mod forcefield;
pub mod groups;
pub mod models;
pub mod version;
