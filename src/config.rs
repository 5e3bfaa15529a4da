//! Configuration for visitlog-store

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("visitlog-store")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite database file name, relative to `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Deepest level that gets its own selection table.
    /// Nodes one level below are still columns; nodes two levels below are
    /// only bit positions.
    #[serde(default = "default_max_materialized_level")]
    pub max_materialized_level: u32,

    /// Anchor used by the selection view when no ids are given
    #[serde(default = "default_anchor_id")]
    pub default_anchor_id: i64,

    /// Separator between names in a hierarchy path
    #[serde(default = "default_path_separator")]
    pub path_separator: String,

    /// Separator between child id and child location id in a selection token
    #[serde(default = "default_token_delimiter")]
    pub token_delimiter: String,

    /// Label for children whose name type is not known
    #[serde(default = "default_unknown_type_label")]
    pub unknown_type_label: String,
}

fn default_database_file() -> String {
    "visitlog.db".to_string()
}

fn default_max_materialized_level() -> u32 {
    5
}

fn default_anchor_id() -> i64 {
    1
}

fn default_path_separator() -> String {
    " > ".to_string()
}

fn default_token_delimiter() -> String {
    "|".to_string()
}

fn default_unknown_type_label() -> String {
    "Unknown NameType".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            max_materialized_level: default_max_materialized_level(),
            default_anchor_id: default_anchor_id(),
            path_separator: default_path_separator(),
            token_delimiter: default_token_delimiter(),
            unknown_type_label: default_unknown_type_label(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get database file path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Level of the last nodes stored as columns. Their children are leaves
    /// recovered from bit positions alone.
    pub fn leaf_parent_level(&self) -> u32 {
        self.max_materialized_level + 1
    }
}
