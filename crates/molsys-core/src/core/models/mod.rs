//! # Core Models Module
//!
//! Value types describing molecules as seen by the group registry.
//!
//! ## Key Components
//!
//! - [`ids`] - Molecule and group numbers plus the composite `MolID`/`MGID` identifiers
//! - [`molecule`] - Whole molecules at a given version
//! - [`selection`] - Atom subsets used by views
//! - [`views`] - `PartialMolecule`, `ViewsOfMol` and the `Molecules` collection
//! - [`property`] - Molecule properties and the `PropertyMap` name redirection
//!
//! All of these are immutable values with cheap clones. A new molecule
//! version is produced by editing, never by mutating a shared value.
//!
//! ```ignore
//! use molsys::core::models::{molecule::Molecule, views::Molecules};
//!
//! let water = Molecule::new("water", 3).with_property("charge", vec![-0.8, 0.4, 0.4])?;
//! let molecules = Molecules::from(water);
//! ```

pub mod ids;
pub mod molecule;
pub mod property;
pub mod selection;
pub mod views;
