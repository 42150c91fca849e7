//! Model configuration.
//!
//! Loaded from TOML (or JSON) with every field optional:
//!
//! ```toml
//! max_scope_nesting = 100
//! new_id_prefix = "+c"
//! validate_on_init_existing = true
//! ```

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_events::DEFAULT_MAX_NESTING;
use tracing::info;

/// Tunables for one [`Model`](crate::Model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Transfers a scope accepts from nested scopes before the nested scope
    /// aborts.
    pub max_scope_nesting: usize,
    /// Prefix of ids generated for new entities.
    pub new_id_prefix: String,
    /// Run validation rules for entities materialized from existing ids.
    pub validate_on_init_existing: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_scope_nesting: DEFAULT_MAX_NESTING,
            new_id_prefix: "+c".to_string(),
            validate_on_init_existing: true,
        }
    }
}

impl ModelConfig {
    /// Parses TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses JSON.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file. `.json` files are parsed as JSON, anything else
    /// as TOML.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&contents)?
        } else {
            Self::from_toml_str(&contents)?
        };
        info!("Loaded model config from {:?}", path);
        Ok(config)
    }

    /// Rejects values the model cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_scope_nesting == 0 {
            return Err(ModelError::InvalidConfig(
                "max_scope_nesting must be at least 1".into(),
            ));
        }
        if self.new_id_prefix.contains('|') {
            return Err(ModelError::InvalidConfig(
                "new_id_prefix must not contain '|'".into(),
            ));
        }
        Ok(())
    }
}
