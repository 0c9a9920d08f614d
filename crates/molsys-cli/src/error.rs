use molsys::engine::config::ConfigError;
use molsys::error::Error as MolsysError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Molsys(#[from] MolsysError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to write '{path}': {source}", path = path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} step(s) failed")]
    FailedSteps(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
