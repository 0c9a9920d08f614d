//! Error taxonomy shared by every layer of the library.
//!
//! Mutating operations on [`System`](crate::engine::system::System) and on
//! forcefields restore their pre-call state before any of these errors reach
//! the caller, so observing an `Err` never implies a partial mutation.

use crate::core::forcefield::term::Symbol;
use crate::core::models::ids::{MGNum, MolNum};
use crate::engine::config::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An ID or number does not resolve to any group in the container.
    #[error("missing molecule group: {0}")]
    MissingGroup(String),

    /// Insertion would create a second group with an already used key, or a
    /// singular lookup matched more than one group.
    #[error("duplicate molecule group: {0}")]
    DuplicateGroup(String),

    /// A forcefield with the same name or UID is already present.
    #[error("duplicate forcefield: {0}")]
    DuplicateForceField(String),

    /// The requested energy component is not registered.
    #[error("missing energy component {0}")]
    MissingComponent(Symbol),

    #[error("missing molecule: {0}")]
    MissingMolecule(String),

    /// A lookup that must match exactly one molecule matched several.
    #[error("duplicate molecule: {0}")]
    DuplicateMolecule(String),

    #[error("invalid index {index} (container holds {count} item(s))")]
    InvalidIndex { index: i64, count: usize },

    /// An opaque value was asked to be viewed as a concrete kind it is not.
    #[error("cannot cast a {from} to a {to}")]
    InvalidCast { from: String, to: String },

    #[error("incompatible: {0}")]
    Incompatible(String),

    /// A property required to extract forcefield parameters is absent.
    #[error("missing property '{name}'{}", .molecule.map(|m| format!(" on molecule {m}")).unwrap_or_default())]
    MissingProperty {
        name: String,
        molecule: Option<MolNum>,
    },

    #[error("missing monitor '{0}'")]
    MissingMonitor(String),

    #[error("duplicate monitor '{0}'")]
    DuplicateMonitor(String),

    #[error("missing constraint: {0}")]
    MissingConstraint(String),

    #[error("constraints could not be satisfied: {0}")]
    ConstraintFailure(String),

    /// An internal invariant was violated. Never caused by user input.
    #[error("internal invariant violated: {0}")]
    ProgramBug(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn missing_group_num(mgnum: MGNum) -> Self {
        Self::MissingGroup(format!("no group with number {mgnum}"))
    }

    pub(crate) fn missing_property(name: &str, molecule: Option<MolNum>) -> Self {
        Self::MissingProperty {
            name: name.to_string(),
            molecule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_property_message_names_the_molecule_when_known() {
        let err = Error::missing_property("charge", Some(MolNum::new(7)));
        assert_eq!(err.to_string(), "missing property 'charge' on molecule 7");

        let err = Error::missing_property("charge", None);
        assert_eq!(err.to_string(), "missing property 'charge'");
    }

    #[test]
    fn invalid_index_message_reports_bounds() {
        let err = Error::InvalidIndex { index: 4, count: 2 };
        assert_eq!(
            err.to_string(),
            "invalid index 4 (container holds 2 item(s))"
        );
    }
}
