// Configuration loading and parsing (debate_hub.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file read when `DEBATE_HUB_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "debate_hub.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the JSON API and the SPA shell.
    pub http_port: u16,
    /// Port for the realtime WebSocket channel.
    pub ws_port: u16,
    /// Directory holding the single-page application shell (index.html).
    pub static_dir: PathBuf,
    /// SQLite database path. `":memory:"` gives an ephemeral database.
    pub db_path: String,
    pub storage: StorageConfig,
}

/// Object-store settings. When `supabase_url` is empty the store is treated
/// as unconfigured and download resolution falls back to stored public URLs.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub supabase_url: String,
    pub bucket: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_port: 3000,
            ws_port: 3001,
            static_dir: PathBuf::from("public"),
            db_path: "debate_hub.db".to_string(),
            storage: StorageConfig {
                supabase_url: String::new(),
                bucket: "user-uploads".to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// debate_hub.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the config file. Every section and field
/// is optional; anything omitted keeps its default.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    storage: StorageSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServerSection {
    http_port: Option<u16>,
    ws_port: Option<u16>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorageSection {
    supabase_url: Option<String>,
    bucket: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the configuration from `$DEBATE_HUB_CONFIG`, falling back to
/// `debate_hub.toml` in the working directory. A missing file yields the
/// built-in defaults; a present-but-malformed file is an error.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var("DEBATE_HUB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    Config::load(&path)
}

impl Config {
    /// Load configuration from the given TOML file, merging it over the
    /// defaults. Returns defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;

        let defaults = Config::default();
        let config = Config {
            http_port: file.server.http_port.unwrap_or(defaults.http_port),
            ws_port: file.server.ws_port.unwrap_or(defaults.ws_port),
            static_dir: file.server.static_dir.unwrap_or(defaults.static_dir),
            db_path: file.database.path.unwrap_or(defaults.db_path),
            storage: StorageConfig {
                supabase_url: file
                    .storage
                    .supabase_url
                    .unwrap_or(defaults.storage.supabase_url),
                bucket: file.storage.bucket.unwrap_or(defaults.storage.bucket),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == self.ws_port {
            return Err(ConfigError::ValidationError {
                field: "server.ws_port".to_string(),
                message: format!(
                    "ws_port ({}) must differ from http_port ({})",
                    self.ws_port, self.http_port
                ),
            });
        }
        if self.db_path.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "database.path".to_string(),
                message: "database path must not be empty".to_string(),
            });
        }
        if self.storage.bucket.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "storage.bucket".to_string(),
                message: "bucket must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
