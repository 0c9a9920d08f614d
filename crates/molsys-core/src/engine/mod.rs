//! # Engine Module
//!
//! The transactional layer: the [`system::System`] that owns every forcefield
//! and plain molecule group, and the machinery that keeps it consistent.
//!
//! ## Overview
//!
//! Every mutation of a `System` runs inside a [`transaction::SaveState`]
//! snapshot. The change is applied to both children, the molecule/group
//! index is patched, constraints are re-applied and the version is bumped;
//! any error restores the snapshot before it reaches the caller.
//!
//! ## Key Components
//!
//! - **System** ([`system`]) - The unified container and its mutation surface
//! - **Transactions** ([`transaction`]) - Snapshot guard that restores on drop
//! - **Constraints** ([`constraint`]) - Conditions re-applied after each change
//! - **Monitors** ([`monitor`]) - Statistics collected on demand
//! - **Configuration** ([`config`]) - System settings, loadable from TOML
//! - **Progress Reporting** ([`progress`]) - Callback hooks used by workflows

pub mod config;
pub mod constraint;
pub mod monitor;
pub mod progress;
pub mod system;
pub mod transaction;
