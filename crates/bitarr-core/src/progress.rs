use crate::storage::models::ScanStatus;
use crossbeam_channel::Sender;
use serde::Serialize;

/// A throttled snapshot of a running scan. The last event of a scan carries its terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub scan_id: i64,
    pub status: ScanStatus,
    pub files_processed: u64,
    pub total_files: Option<u64>,
    pub current_path: Option<String>,
    pub percent_complete: Option<f64>,
    pub bytes_processed: u64,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(scan_id: i64, status: ScanStatus) -> Self {
        Self {
            scan_id,
            status,
            files_processed: 0,
            total_files: None,
            current_path: None,
            percent_complete: None,
            bytes_processed: 0,
            error: None,
        }
    }

    /// Fill `percent_complete` from the processed and total counts.
    pub fn with_percent(mut self) -> Self {
        self.percent_complete = match self.total_files {
            Some(0) => Some(100.0),
            Some(total) => Some((self.files_processed as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        };
        self
    }
}

/// Sink for scan progress.
///
/// Called only from the scan's writer thread, never from a worker, so a slow sink delays
/// progress output but not hashing. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_warning(&self, _scan_id: i64, _message: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Anything a scan tells its reporter, as a message.
#[derive(Debug, Clone)]
pub enum ScanNotice {
    Progress(ProgressEvent),
    Warning { scan_id: i64, message: String },
}

/// Forwards events into a channel so another thread can drain them.
/// A disconnected receiver is ignored.
///
/// Note: this is a plain pipe. It does not throttle; the engine already does.
pub struct ChannelReporter {
    tx: Sender<ScanNotice>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<ScanNotice>) -> Self {
        Self { tx }
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        let notice = ScanNotice::Progress(event.clone());
        // Intermediate events may be dropped when the receiver lags; the terminal one may not
        if event.status.is_terminal() {
            let _ = self.tx.send(notice);
        } else {
            let _ = self.tx.try_send(notice);
        }
    }

    fn on_warning(&self, scan_id: i64, message: &str) {
        let _ = self.tx.try_send(ScanNotice::Warning {
            scan_id,
            message: message.to_string(),
        });
    }
}
