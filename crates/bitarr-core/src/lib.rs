pub mod classify;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod progress;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use engine::{ActiveScans, CancelToken, ScanEngine, ScanRequest};
pub use error::Error;
pub use hasher::ChecksumAlgorithm;
pub use progress::{ProgressEvent, ProgressReporter, SilentReporter};
pub use storage::models::{FileStatus, ScanCounters, ScanStatus, ScanSummary};
pub use storage::Database;
