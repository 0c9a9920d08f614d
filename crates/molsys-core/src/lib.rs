//! # molsys
//!
//! A versioned, transactional registry of molecule groups and forcefields for
//! molecular simulation.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Identifiers, version stamps, molecule
//!   views, molecule groups with their membership index, and forcefields
//!   with lazily recalculated energies. Every aggregate is a cheap
//!   copy-on-write value.
//!
//! - **[`engine`]: The Logic Core.** The [`System`](engine::system::System)
//!   that unifies forcefield-owned and plain groups behind one interface. All
//!   of its mutations are transactions: they complete, re-apply constraints
//!   and bump the version, or they leave the system untouched.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built on the
//!   engine, such as replaying a scenario file against a system.

pub mod core;
pub mod engine;
pub mod error;
pub mod workflows;
