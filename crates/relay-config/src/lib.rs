//! Multi-tier TOML configuration for Relay.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > project file > global file > defaults

use relay_mcp::{CollisionPolicy, LifetimePolicy, McpConfig, WorkerConfig};
use relay_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the global config file inside the config directory.
pub const GLOBAL_CONFIG_FILE: &str = "config.toml";

/// Name of the per-project config file, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "relay.toml";

/// Resolved configuration for a Relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mcp: McpConfig,
    pub lifetime: LifetimePolicy,
    pub config_dir: PathBuf,
    /// Files that contributed, lowest precedence first.
    pub sources: Vec<PathBuf>,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub mcp: McpSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaySettings {
    pub lifetime: Option<LifetimePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    pub collisions: Option<CollisionPolicy>,
    #[serde(default)]
    pub servers: BTreeMap<String, WorkerConfig>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Use this file instead of the global and project files.
    pub config_path: Option<PathBuf>,
    pub lifetime: Option<LifetimePolicy>,
}

impl RelayConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`RELAY_LIFETIME`)
    /// 3. `--config` file, or else project (`./relay.toml`) over global
    ///    (`~/.relay/config.toml`)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();

        let layers: Vec<(PathBuf, SettingsFile)> = match &overrides.config_path {
            // An explicitly named file must exist and parse
            Some(path) => vec![(path.clone(), read_settings_file(path)?)],
            None => [config_dir.join(GLOBAL_CONFIG_FILE), PathBuf::from(PROJECT_CONFIG_FILE)]
                .into_iter()
                .filter_map(|path| load_settings_file(&path).map(|s| (path, s)))
                .collect(),
        };

        let env_lifetime = match std::env::var("RELAY_LIFETIME") {
            Ok(value) => Some(value.parse::<LifetimePolicy>()?),
            Err(_) => None,
        };

        let mut config = Self::resolve(layers, env_lifetime, overrides.lifetime)?;
        config.config_dir = config_dir;
        Ok(config)
    }

    /// Merge settings layers (lowest precedence first) and overrides.
    ///
    /// Worker tables merge by name: a later layer replaces a same-named
    /// worker wholesale and leaves the others alone.
    pub fn resolve(
        layers: Vec<(PathBuf, SettingsFile)>,
        env_lifetime: Option<LifetimePolicy>,
        cli_lifetime: Option<LifetimePolicy>,
    ) -> Result<Self, ConfigError> {
        let mut mcp = McpConfig::default();
        let mut file_lifetime = None;
        let mut sources = Vec::new();

        for (path, settings) in layers {
            mcp.servers.extend(settings.mcp.servers);
            if let Some(collisions) = settings.mcp.collisions {
                mcp.collisions = collisions;
            }
            if let Some(lifetime) = settings.relay.lifetime {
                file_lifetime = Some(lifetime);
            }
            sources.push(path);
        }

        mcp.validate()?;

        let lifetime = cli_lifetime
            .or(env_lifetime)
            .or(file_lifetime)
            .unwrap_or_default();

        Ok(RelayConfig {
            mcp,
            lifetime,
            config_dir: PathBuf::new(),
            sources,
        })
    }
}

/// Get the Relay config directory path (~/.relay/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RELAY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relay")
}

/// Read and parse a settings file, failing on any error.
pub fn read_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load an implicit settings file: absent is fine, unparseable is warned.
fn load_settings_file(path: &Path) -> Option<SettingsFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}
