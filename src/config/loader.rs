//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. User config: `~/.config/tunnelctl/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;
use crate::cli::Cli;

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "tunnelctl";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to the user configuration file.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader with the default user config path.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a loader with an explicit user config path.
    #[must_use]
    pub fn with_user_path(user_path: PathBuf) -> Self {
        Self { user_path }
    }

    /// Load configuration, merging all sources in priority order.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if self.user_path.exists() {
            debug!("Merging user config from {:?}", self.user_path);
            config.merge(Self::load_file(&self.user_path)?);
        }

        if let Some(extra) = &cli.config {
            debug!("Merging additional config from {:?}", extra);
            config.merge(Self::load_file(extra)?);
        }

        apply_cli_overrides(&mut config, cli);
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// CLI flags override everything loaded from files.
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(user_id) = &cli.user_id {
        config.session.user_id = user_id.clone();
    }
    if let Some(token) = &cli.auth_token {
        config.session.auth_token = Some(token.clone());
    }
}
