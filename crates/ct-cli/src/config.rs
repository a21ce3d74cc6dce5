//! Configuration loading and management.

use std::path::{Path, PathBuf};

use ct_core::CorrelationConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Engine tolerances.
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("calltrace.db"),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Later layers win: defaults, the user config file, `config_path`,
    /// then `CT_*` environment variables (`CT_CORRELATION__COOLDOWN_MS`).
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("CT_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for calltrace.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("calltrace"))
}

/// Returns the platform-specific data directory for calltrace.
///
/// On Linux: `~/.local/share/calltrace`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("calltrace"))
}
