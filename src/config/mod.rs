//! Unified configuration for the reconcile engine and its binaries.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (reconcile.toml)
//! ```toml
//! [store]
//! data_dir = "/var/lib/reconcile"
//! cache_capacity = 20000
//!
//! [merge]
//! halt_on_step_failure = false
//! retired_slug_suffix = "-old"
//! max_version_retries = 3
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Persistent store location and tuning
    pub store: StoreConfig,
    /// Merge behaviour
    pub merge: MergeConfig,
}

impl ReconcileConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ReconcileConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR));

        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// RocksDB directory
    pub data_dir: Option<PathBuf>,
    /// Documents kept in the read cache
    pub cache_capacity: usize,
    /// Run repair before opening
    pub repair: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            repair: false,
        }
    }
}

/// Merge orchestration settings.
///
/// Passed explicitly to the engine; nothing is read from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Stop at the first failed step instead of continuing with the rest
    pub halt_on_step_failure: bool,
    /// Appended to the source slug when it is retired
    pub retired_slug_suffix: String,
    /// Retries per document for optimistic list rewrites
    pub max_version_retries: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            halt_on_step_failure: false,
            retired_slug_suffix: DEFAULT_RETIRED_SLUG_SUFFIX.to_string(),
            max_version_retries: DEFAULT_MAX_VERSION_RETRIES,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_on_step_failure: Option<bool>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ReconcileConfig::default();
        assert!(!config.merge.halt_on_step_failure);
        assert_eq!(config.merge.retired_slug_suffix, "-old");
        assert_eq!(config.store.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.store.data_dir, None);
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[store]\ndata_dir = \"/tmp/from-file\"\n\n[merge]\nmax_version_retries = 9"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let overrides = ConfigOverrides {
            store: Some(StoreOverrides {
                data_dir: Some(PathBuf::from("/tmp/from-cli")),
                repair: None,
            }),
            merge: Some(MergeOverrides {
                halt_on_step_failure: Some(true),
            }),
        };
        let config = ReconcileConfig::load(Some(&path), overrides).unwrap();

        assert_eq!(config.store.data_dir, Some(PathBuf::from("/tmp/from-cli")));
        assert_eq!(config.merge.max_version_retries, 9);
        assert!(config.merge.halt_on_step_failure);
        assert_eq!(config.store.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }
}
