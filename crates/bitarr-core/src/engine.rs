use crate::classify::{classify, find_missing, CurrentObservation};
use crate::config::{AppConfig, MAX_THREADS, MIN_THREADS};
use crate::device::{DeviceDescriptor, DeviceRegistry};
use crate::error::Error;
use crate::hasher::{checksum_file, ChecksumAlgorithm};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::scanner::{FileDescriptor, FileWalker, WalkEntry};
use crate::storage::models::{
    FileStatus, NewObservation, NewScan, PriorFile, ScanStatus, ScanSummary, ScanUpdate,
};
use crate::storage::Database;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Items buffered per worker on each queue.
const QUEUE_DEPTH_PER_WORKER: usize = 64;
const ERRORS_IN_SUMMARY: i64 = 100;

/// Shared cancellation flag. Checked between files, never mid-file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub root_path: PathBuf,
    pub algorithm: ChecksumAlgorithm,
    pub thread_count: usize,
    pub exclude_dir_names: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub name: Option<String>,
}

impl ScanRequest {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            algorithm: ChecksumAlgorithm::default(),
            thread_count: 4,
            exclude_dir_names: Vec::new(),
            exclude_patterns: Vec::new(),
            name: None,
        }
    }

    /// A request carrying the configured algorithm, thread count and exclusions.
    pub fn from_config(root_path: impl Into<PathBuf>, config: &AppConfig) -> Result<Self, Error> {
        let algorithm = config
            .checksum_algorithm
            .parse()
            .map_err(|_| Error::UnsupportedAlgorithm(config.checksum_algorithm.clone()))?;
        Ok(Self {
            algorithm,
            thread_count: config.scan_threads,
            exclude_dir_names: config.exclude_dirs.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
            ..Self::new(root_path)
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_excluded_dirs(mut self, names: Vec<String>) -> Self {
        self.exclude_dir_names = names;
        self
    }

    pub fn with_excluded_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.thread_count) {
            return Err(Error::InvalidRequest(format!(
                "thread count {} outside {}..={}",
                self.thread_count, MIN_THREADS, MAX_THREADS
            )));
        }
        Ok(())
    }

    fn display_name(&self, root: &Path) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let base = root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| root.to_string_lossy().into_owned());
                format!("Scan of {}", base)
            }
        }
    }
}

/// Registry of running scans: canonical roots grouped by device id. Clones share state.
///
/// Two roots on one device conflict when either contains the other, since both scans would
/// write checksum rows for the shared files.
#[derive(Debug, Clone, Default)]
pub struct ActiveScans(Arc<DashMap<i64, Vec<PathBuf>>>);

impl ActiveScans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `root` on `device_id`. `None` if an active scan on that device overlaps it.
    pub fn try_acquire(&self, root: &Path, device_id: i64) -> Option<ActiveScanGuard> {
        // The entry holds the shard lock, so check and insert are atomic per device
        let mut roots = self.0.entry(device_id).or_default();
        if roots.iter().any(|r| overlaps(r, root)) {
            return None;
        }
        roots.push(root.to_path_buf());
        Some(ActiveScanGuard {
            scans: self.clone(),
            root: root.to_path_buf(),
            device_id,
        })
    }

    /// Whether an active scan on `device_id` overlaps `root`.
    pub fn is_active(&self, root: &Path, device_id: i64) -> bool {
        self.0
            .get(&device_id)
            .map(|roots| roots.iter().any(|r| overlaps(r, root)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Releases its slot in [`ActiveScans`] on drop.
#[derive(Debug)]
pub struct ActiveScanGuard {
    scans: ActiveScans,
    root: PathBuf,
    device_id: i64,
}

impl Drop for ActiveScanGuard {
    fn drop(&mut self) {
        if let Some(mut roots) = self.scans.0.get_mut(&self.device_id) {
            if let Some(pos) = roots.iter().position(|r| *r == self.root) {
                roots.swap_remove(pos);
            }
        }
        self.scans.0.remove_if(&self.device_id, |_, roots| roots.is_empty());
    }
}

/// Everything a worker needs, passed explicitly.
#[derive(Clone)]
struct ScanContext {
    scan_id: i64,
    device_id: i64,
    algorithm: ChecksumAlgorithm,
    block_size: usize,
    prior: Arc<HashMap<String, PriorFile>>,
    cancel: CancelToken,
    /// Set by the writer when the store fails; stops workers without touching the caller's token.
    abort: CancelToken,
}

impl ScanContext {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }
}

/// Worker and walker output, applied to the store by the single writer.
enum WriteOp {
    Observed {
        file: FileDescriptor,
        path: String,
        digest: String,
        bytes_read: u64,
        status: FileStatus,
    },
    ReadFailed {
        path: String,
        error_type: &'static str,
        message: String,
    },
    WalkFailed {
        path: PathBuf,
        message: String,
    },
}

#[derive(Debug, Default)]
struct Tally {
    total_files: Option<u64>,
    files_processed: u64,
    bytes_processed: u64,
    current_path: Option<String>,
}

pub struct ScanEngine {
    config: AppConfig,
    db_path: PathBuf,
    registry: DeviceRegistry,
    active: ActiveScans,
}

impl ScanEngine {
    pub fn new(config: AppConfig) -> Self {
        let db_path = PathBuf::from(&config.database_path);
        Self {
            config,
            db_path,
            registry: DeviceRegistry::new(),
            active: ActiveScans::new(),
        }
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share the active-scan registry with other engines on the same database.
    pub fn with_active_scans(mut self, active: ActiveScans) -> Self {
        self.active = active;
        self
    }

    pub fn active_scans(&self) -> &ActiveScans {
        &self.active
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run one scan to a terminal status.
    ///
    /// Returns `Err` only when no scan row could be created or finalized (bad request, second
    /// scan of an active root, database unavailable). A scan that fails after its row exists
    /// comes back as `Ok` with status `failed` and its `error_message` set.
    pub fn scan(
        &self,
        request: &ScanRequest,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ScanSummary, Error> {
        request.validate()?;
        let db = Database::open(&self.db_path)?;

        let root = if request.root_path.is_absolute() {
            request.root_path.clone()
        } else {
            std::env::current_dir()?.join(&request.root_path)
        };
        let name = request.display_name(&root);

        let canonical = match fs::canonicalize(&root) {
            Ok(path) if path.is_dir() => path,
            _ => {
                let message = Error::PathNotFound(root.clone()).to_string();
                return self.fail_at_start(&db, request, name, &root, &message, reporter);
            }
        };
        // stat succeeds on a directory we cannot list
        if let Err(e) = fs::read_dir(&canonical) {
            let message = format!("Cannot read scan root {}: {}", canonical.display(), e);
            return self.fail_at_start(&db, request, name, &canonical, &message, reporter);
        }

        let device = match self.registry.resolve(&db, &canonical) {
            Ok(device) => device,
            Err(e) => {
                warn!("{}; using an unknown-device placeholder", e);
                self.registry.unknown_device(&db, &canonical)?
            }
        };

        let _guard = self
            .active
            .try_acquire(&canonical, device.id)
            .ok_or_else(|| Error::ScanAlreadyActive {
                root: canonical.clone(),
                device_id: device.id,
            })?;

        let scan_id = db.create_scan(&NewScan {
            name,
            root_path: canonical.to_string_lossy().into_owned(),
            algorithm: request.algorithm,
            device_id: Some(device.id),
            host_id: Some(device.host_id),
        })?;

        if !device.is_local {
            let message = format!(
                "{} is on a network device ({}); expect slower scanning",
                canonical.display(),
                device.name
            );
            warn!("{}", message);
            reporter.on_warning(scan_id, &message);
        }

        info!(
            "Scan {} of {} on {} ({} threads, {})",
            scan_id,
            canonical.display(),
            device.name,
            request.thread_count,
            request.algorithm
        );
        let started = Instant::now();
        let mut tally = Tally::default();

        let (status, error_message) =
            match self.run(&db, scan_id, &canonical, &device, request, reporter, cancel, &mut tally)
            {
                Ok(status) => (status, None),
                Err(e) => {
                    error!("Scan {} failed: {}", scan_id, e);
                    (ScanStatus::Failed, Some(e.to_string()))
                }
            };
        db.finalize_scan(scan_id, status, error_message.as_deref())?;

        let summary = self.summary(&db, scan_id)?;
        info!(
            "Scan {} {} in {:.2}s: new {}, unchanged {}, modified {}, corrupted {}, missing {}, errors {}",
            scan_id,
            status,
            started.elapsed().as_secs_f64(),
            summary.counters.new,
            summary.counters.unchanged,
            summary.counters.modified,
            summary.counters.corrupted,
            summary.counters.missing,
            summary.error_count,
        );
        reporter.on_progress(&terminal_event(&summary, &tally));
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        db: &Database,
        scan_id: i64,
        root: &Path,
        device: &DeviceDescriptor,
        request: &ScanRequest,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
        tally: &mut Tally,
    ) -> Result<ScanStatus, Error> {
        let walker = FileWalker::new(root)
            .with_excluded_dirs(request.exclude_dir_names.iter().cloned())
            .with_excluded_patterns(request.exclude_patterns.iter());

        let prior: HashMap<String, PriorFile> = db
            .prior_files(&root.to_string_lossy(), device.id)?
            .into_iter()
            .map(|p| (p.path.clone(), p))
            .collect();
        debug!("Scan {} baseline: {} known files", scan_id, prior.len());

        if self.config.count_files_first {
            db.update_scan(
                scan_id,
                &ScanUpdate {
                    status: Some(ScanStatus::Counting),
                    ..Default::default()
                },
            )?;
            reporter.on_progress(&ProgressEvent::new(scan_id, ScanStatus::Counting));
            match walker.count(cancel) {
                Some(total) => {
                    debug!("Scan {} counted {} files", scan_id, total);
                    tally.total_files = Some(total);
                }
                None => return Ok(ScanStatus::Stopped),
            }
        }

        db.update_scan(
            scan_id,
            &ScanUpdate {
                status: Some(ScanStatus::Running),
                ..Default::default()
            },
        )?;

        let ctx = ScanContext {
            scan_id,
            device_id: device.id,
            algorithm: request.algorithm,
            block_size: self.config.block_size_bytes(),
            prior: Arc::new(prior),
            cancel: cancel.clone(),
            abort: CancelToken::new(),
        };

        let threads = request.thread_count;
        let depth = threads * QUEUE_DEPTH_PER_WORKER;
        let (work_tx, work_rx) = crossbeam_channel::bounded::<FileDescriptor>(depth);
        let (write_tx, write_rx) = crossbeam_channel::bounded::<WriteOp>(depth);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("bitarr-{}-worker-{}", scan_id, i))
            .build()?;
        for _ in 0..threads {
            let ctx = ctx.clone();
            let work_rx = work_rx.clone();
            let write_tx = write_tx.clone();
            pool.spawn(move || worker_loop(ctx, work_rx, write_tx));
        }
        drop(work_rx);

        let walker_ctx = ctx.clone();
        let walker_tx = write_tx;
        let producer = thread::Builder::new()
            .name(format!("bitarr-{}-walker", scan_id))
            .spawn(move || walk_loop(walker, walker_ctx, work_tx, walker_tx))?;

        let written = self.write_loop(db, &ctx, &write_rx, reporter, tally);
        if written.is_err() {
            ctx.abort.cancel();
            // Unblock workers and the walker so they can exit
            for _ in write_rx.iter() {}
        }
        let walk_result = producer.join();
        let coverage = written?;
        if walk_result.is_err() {
            return Err(Error::Other("directory walker panicked".to_string()));
        }

        if cancel.is_cancelled() {
            info!("Scan {} stopped after {} files", scan_id, tally.files_processed);
            return Ok(ScanStatus::Stopped);
        }

        // Excluded or no longer regular, but still on disk: not lost
        let missing = find_missing(&ctx.prior, &coverage.observed, &coverage.dirs, |path| {
            fs::symlink_metadata(path).is_ok()
        });
        for file_id in &missing {
            db.mark_missing(*file_id, scan_id)?;
        }
        if !missing.is_empty() {
            warn!("Scan {}: {} files missing since the last scan", scan_id, missing.len());
        }
        Ok(ScanStatus::Completed)
    }

    /// The serialized writer. Drains `write_rx` until every producer has hung up.
    fn write_loop(
        &self,
        db: &Database,
        ctx: &ScanContext,
        write_rx: &Receiver<WriteOp>,
        reporter: &dyn ProgressReporter,
        tally: &mut Tally,
    ) -> Result<Coverage, Error> {
        let interval = Duration::from_millis(self.config.progress_interval_ms);
        let poll = interval.max(Duration::from_millis(50));
        let mut coverage = Coverage::default();
        let mut last_emit = Instant::now();

        loop {
            match write_rx.recv_timeout(poll) {
                Ok(op) => self.apply(db, ctx, op, tally, &mut coverage)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_emit.elapsed() >= interval {
                reporter.on_progress(&running_event(ctx.scan_id, tally));
                last_emit = Instant::now();
            }
        }
        Ok(coverage)
    }

    fn apply(
        &self,
        db: &Database,
        ctx: &ScanContext,
        op: WriteOp,
        tally: &mut Tally,
        coverage: &mut Coverage,
    ) -> Result<(), Error> {
        match op {
            WriteOp::Observed {
                file,
                path,
                digest,
                bytes_read,
                status,
            } => {
                db.record_observation(&NewObservation {
                    scan_id: ctx.scan_id,
                    device_id: ctx.device_id,
                    path: path.clone(),
                    size: file.size as i64,
                    mtime: file.mtime,
                    digest,
                    algorithm: ctx.algorithm,
                    status,
                    bytes_read: bytes_read as i64,
                })?;
                match status {
                    FileStatus::Corrupted => warn!("Possible corruption: {}", path),
                    _ => trace!("{}: {}", status, path),
                }
                tally.files_processed += 1;
                tally.bytes_processed += bytes_read;
                coverage.observed.insert(path.clone());
                tally.current_path = Some(path);
            }
            WriteOp::ReadFailed {
                path,
                error_type,
                message,
            } => {
                db.record_scan_error(ctx.scan_id, Some(&path), error_type, &message)?;
                tally.files_processed += 1;
                // Present but unreadable is not missing
                coverage.observed.insert(path.clone());
                tally.current_path = Some(path);
            }
            WriteOp::WalkFailed { path, message } => {
                db.record_scan_error(
                    ctx.scan_id,
                    Some(&path.to_string_lossy()),
                    "walk_error",
                    &message,
                )?;
                coverage.dirs.push(path);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn fail_at_start(
        &self,
        db: &Database,
        request: &ScanRequest,
        name: String,
        root: &Path,
        message: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary, Error> {
        error!("{}", message);
        let scan_id = db.create_scan(&NewScan {
            name,
            root_path: root.to_string_lossy().into_owned(),
            algorithm: request.algorithm,
            device_id: None,
            host_id: None,
        })?;
        db.finalize_scan(scan_id, ScanStatus::Failed, Some(message))?;
        let summary = self.summary(db, scan_id)?;
        reporter.on_progress(&terminal_event(&summary, &Tally::default()));
        Ok(summary)
    }

    fn summary(&self, db: &Database, scan_id: i64) -> Result<ScanSummary, Error> {
        db.scan_summary(scan_id, ERRORS_IN_SUMMARY)?
            .ok_or_else(|| Error::Other(format!("scan {} not found", scan_id)))
    }
}

/// What the walk actually covered, for missing-file detection.
#[derive(Debug, Default)]
struct Coverage {
    observed: HashSet<String>,
    dirs: Vec<PathBuf>,
}

fn walk_loop(
    walker: FileWalker,
    ctx: ScanContext,
    work_tx: Sender<FileDescriptor>,
    write_tx: Sender<WriteOp>,
) {
    for entry in walker.walk() {
        if ctx.should_stop() {
            debug!("Scan {} walker observed stop", ctx.scan_id);
            break;
        }
        let sent = match entry {
            WalkEntry::File(file) => work_tx.send(file).is_ok(),
            WalkEntry::Skipped { .. } => true,
            WalkEntry::Error { path, error } => write_tx
                .send(WriteOp::WalkFailed {
                    path,
                    message: error.to_string(),
                })
                .is_ok(),
        };
        if !sent {
            break;
        }
    }
}

fn worker_loop(ctx: ScanContext, work_rx: Receiver<FileDescriptor>, write_tx: Sender<WriteOp>) {
    for file in work_rx.iter() {
        if ctx.should_stop() {
            break;
        }
        let op = process_file(&ctx, file);
        if write_tx.send(op).is_err() {
            break;
        }
    }
}

/// Checksum and classify one file. Runs on a pool thread; touches no shared mutable state.
fn process_file(ctx: &ScanContext, file: FileDescriptor) -> WriteOp {
    let path = file.path.to_string_lossy().into_owned();
    match checksum_file(&file.path, ctx.algorithm, ctx.block_size) {
        Ok(output) => {
            let status = classify(
                ctx.prior.get(&path),
                &CurrentObservation {
                    digest: &output.digest,
                    algorithm: ctx.algorithm,
                    size: file.size as i64,
                    mtime: file.mtime,
                },
            );
            WriteOp::Observed {
                file,
                path,
                digest: output.digest,
                bytes_read: output.bytes_read,
                status,
            }
        }
        Err(e) => {
            error!("{}", e);
            WriteOp::ReadFailed {
                path,
                error_type: e.error_type(),
                message: e.to_string(),
            }
        }
    }
}

fn running_event(scan_id: i64, tally: &Tally) -> ProgressEvent {
    ProgressEvent {
        files_processed: tally.files_processed,
        total_files: tally.total_files,
        current_path: tally.current_path.clone(),
        bytes_processed: tally.bytes_processed,
        ..ProgressEvent::new(scan_id, ScanStatus::Running)
    }
    .with_percent()
}

fn terminal_event(summary: &ScanSummary, tally: &Tally) -> ProgressEvent {
    let mut event = ProgressEvent {
        files_processed: tally.files_processed,
        total_files: tally.total_files,
        current_path: None,
        bytes_processed: tally.bytes_processed,
        error: summary.error_message.clone(),
        ..ProgressEvent::new(summary.scan_id, summary.status)
    };
    if summary.status == ScanStatus::Completed {
        event.percent_complete = Some(100.0);
    } else {
        event = event.with_percent();
    }
    event
}
