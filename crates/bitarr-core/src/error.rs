use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Scan root not found or not a directory: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Could not attribute {} to a storage device: {reason}", .path.display())]
    DeviceResolution { path: PathBuf, reason: String },

    #[error("A scan overlapping {} on device {device_id} is already running", .root.display())]
    ScanAlreadyActive { root: PathBuf, device_id: i64 },

    #[error("Invalid scan request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Status '{0}' cannot be written as a checksum row")]
    InvalidStatus(String),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Other(String),
}

/// Failure to parse a persisted enum column back into its variant.
#[derive(Error, Debug)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
