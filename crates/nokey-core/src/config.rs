//! Hub configuration.
//!
//! Layers, lowest precedence first: built-in defaults, a TOML file
//! (explicit path or `NOKEY_CONFIG`), environment overrides, then whatever
//! the binary applies from its command line. [`HubConfig::validate`] runs last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Directory holding the persisted `state` and `keys`.
    pub data_dir: PathBuf,
    /// Where `exportFile` requests are written.
    pub export_dir: PathBuf,
    pub log_level: String,
    /// Default popup suppression window when a request does not name one.
    pub popup_suppress_secs: u64,
    /// Quiet period before a frame size change is forwarded.
    pub size_debounce_ms: u64,
    /// Outbound buffer per connection. Envelopes for a context that falls
    /// this far behind are dropped.
    pub channel_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("nokey-data"),
            export_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            popup_suppress_secs: 20,
            size_debounce_ms: 50,
            channel_buffer: 64,
        }
    }
}

impl HubConfig {
    /// Build the full configuration: defaults, file, environment, validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os("NOKEY_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: HubConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `NOKEY_DATA_DIR`, `NOKEY_EXPORT_DIR` and `RUST_LOG`.
    pub fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os("NOKEY_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os("NOKEY_EXPORT_DIR") {
            self.export_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".to_string()));
        }
        if self.export_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("export_dir must not be empty".to_string()));
        }
        if self.channel_buffer == 0 {
            return Err(ConfigError::Invalid("channel_buffer must be at least 1".to_string()));
        }
        if self.popup_suppress_secs == 0 {
            return Err(ConfigError::Invalid(
                "popup_suppress_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn popup_suppress(&self) -> Duration {
        Duration::from_secs(self.popup_suppress_secs)
    }

    pub fn size_debounce(&self) -> Duration {
        Duration::from_millis(self.size_debounce_ms)
    }
}
