use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

pub const DEFAULT_MAX_CONSTRAINT_PASSES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    pub name: String,
    #[serde(default = "default_max_constraint_passes")]
    pub max_constraint_passes: usize,
    #[serde(default = "default_auto_apply_constraints")]
    pub auto_apply_constraints: bool,
}

fn default_max_constraint_passes() -> usize {
    DEFAULT_MAX_CONSTRAINT_PASSES
}

fn default_auto_apply_constraints() -> bool {
    true
}

impl SystemConfig {
    pub fn builder() -> SystemConfigBuilder {
        SystemConfigBuilder::new()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_constraint_passes: DEFAULT_MAX_CONSTRAINT_PASSES,
            auto_apply_constraints: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_constraint_passes == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "max_constraint_passes",
                reason: "must allow at least one pass".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<string>")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::named("system")
    }
}

#[derive(Default)]
pub struct SystemConfigBuilder {
    name: Option<String>,
    max_constraint_passes: Option<usize>,
    auto_apply_constraints: Option<bool>,
}

impl SystemConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn max_constraint_passes(mut self, passes: usize) -> Self {
        self.max_constraint_passes = Some(passes);
        self
    }
    pub fn auto_apply_constraints(mut self, enabled: bool) -> Self {
        self.auto_apply_constraints = Some(enabled);
        self
    }

    pub fn build(self) -> Result<SystemConfig, ConfigError> {
        let config = SystemConfig {
            name: self.name.ok_or(ConfigError::MissingParameter("name"))?,
            max_constraint_passes: self
                .max_constraint_passes
                .unwrap_or(DEFAULT_MAX_CONSTRAINT_PASSES),
            auto_apply_constraints: self.auto_apply_constraints.unwrap_or(true),
        };
        config.validate()?;
        Ok(config)
    }
}
