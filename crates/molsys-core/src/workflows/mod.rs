//! # Workflows Module
//!
//! High-level entry points that drive a [`System`](crate::engine::system::System)
//! from start to finish.
//!
//! ## Overview
//!
//! A workflow builds a system from a declarative description, applies a
//! sequence of edits to it and reports what happened after each one. It
//! owns progress reporting and logging, so callers only supply the input
//! and a [`ProgressReporter`](crate::engine::progress::ProgressReporter).
//!
//! ## Key Components
//!
//! - **Scenarios** ([`scenario`]) - TOML description of molecules, groups,
//!   forcefields, constraints, monitors and steps
//! - **Replay Workflow** ([`replay`]) - Builds the system and replays each step,
//!   recording the version and total energy afterwards

pub mod replay;
pub mod scenario;
