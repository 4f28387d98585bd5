use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_THREADS: usize = 1;
pub const MAX_THREADS: usize = 32;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub scan_threads: usize,
    pub checksum_algorithm: String,
    pub block_size_mb: usize,
    pub exclude_dirs: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub progress_interval_ms: u64,
    pub count_files_first: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "bitarr.db".to_string(),
            scan_threads: 4,
            checksum_algorithm: "sha256".to_string(),
            block_size_mb: 4,
            exclude_dirs: [".git", "node_modules", ".venv", "venv", "__pycache__"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_patterns: ["*.tmp", "*.temp", "*.swp", "*.bak"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            progress_interval_ms: 250,
            count_files_first: true,
        }
    }
}

impl AppConfig {
    pub fn block_size_bytes(&self) -> usize {
        self.block_size_mb.max(1) * 1024 * 1024
    }
}

/// Load `Config.{toml,yaml,json}` if present, then apply `BITARR_*` environment overrides.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("BITARR")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exclude_dirs")
                .with_list_parse_key("exclude_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Collapse roots nested inside other roots so no tree is walked twice.
/// Order of first appearance is kept.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut kept: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if kept.iter().any(|k| dir.starts_with(k)) {
            continue;
        }
        kept.retain(|k| !k.starts_with(&dir));
        kept.push(dir);
    }

    kept
}
