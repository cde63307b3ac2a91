//! Configuration types for a bridge context.

use ferry_engine::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{FerryError, FerryResult};

/// What the façade does when the host misuses it (calling a non-function,
/// indexing a non-array, reading past the end, using a detached value).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisusePolicy {
    /// Return the undefined sentinel. Callers must check `is_function` etc.
    #[default]
    Undefined,
    /// Raise a `TypeError` in the engine and return an exception-tagged
    /// value, so misuse shows up through `is_exception` / `to_error`.
    Throw,
}

/// Settings for a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Host misuse handling.
    /// Default: `Undefined`
    pub misuse_policy: MisusePolicy,

    /// Script name used by `Context::eval`.
    /// Default: `"<eval>"`
    pub source_name: String,

    /// Capacity of the engine's atom table.
    /// Default: 65536
    pub max_atoms: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            misuse_policy: MisusePolicy::Undefined,
            source_name: "<eval>".to_string(),
            max_atoms: EngineConfig::default().max_atoms,
        }
    }
}

impl ContextConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that reports host misuse as script exceptions.
    pub fn strict() -> Self {
        Self {
            misuse_policy: MisusePolicy::Throw,
            ..Default::default()
        }
    }

    /// Set the misuse policy.
    pub fn misuse_policy(mut self, policy: MisusePolicy) -> Self {
        self.misuse_policy = policy;
        self
    }

    /// Set the default script name.
    pub fn source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Set the atom table capacity.
    pub fn max_atoms(mut self, max_atoms: usize) -> Self {
        self.max_atoms = max_atoms;
        self
    }

    /// Parse a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> FerryResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> FerryResult<()> {
        if self.max_atoms == 0 {
            return Err(FerryError::ContextCreation {
                message: "max_atoms must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_atoms: self.max_atoms,
        }
    }
}
