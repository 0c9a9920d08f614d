//! # Forcefield Module
//!
//! Forcefields are molecule-group containers that also own a cached energy.
//! The numerical work is delegated to a [`potentials::Potential`]; this
//! module only manages which molecules a forcefield sees, when its cache is
//! stale, and how energy components are named and combined.
//!
//! ## Key Components
//!
//! - [`term`] - Component symbols, linear expressions over them, per-forcefield component sets
//! - [`potentials`] - The `Potential` hook and the built-in `NullPotential` / `PropertySumPotential`
//! - [`ff`] - `FF`, a single forcefield with its groups and energy cache
//! - [`forcefields`] - `ForceFields`, the collection a `System` holds, with user components
//!
//! ```ignore
//! use molsys::core::forcefield::{ff::FF, potentials::PropertySumPotential};
//!
//! let mut ff = FF::new("charge", PropertySumPotential::default());
//! ff.add(&molecules, &MGID::All)?;
//! let total = ff.energy()?;
//! ```

pub mod ff;
pub mod forcefields;
pub mod potentials;
pub mod term;
