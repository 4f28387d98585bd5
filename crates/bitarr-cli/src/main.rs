mod commands;
mod logging;
mod progress;

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, Context};
use bitarr_core::config::non_overlapping_directories;
use bitarr_core::device::DeviceRegistry;
use bitarr_core::storage::models::StorageDevice;
use bitarr_core::{
    AppConfig, CancelToken, ChecksumAlgorithm, Database, FileStatus, ScanEngine, ScanRequest,
    ScanStatus, ScanSummary,
};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ScanArgs};
use crossbeam_channel::RecvTimeoutError;
use dotenv::dotenv;
use indicatif::MultiProgress;
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match bitarr_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    if let Some(command) = &args.command {
        if !matches!(command, Commands::Algorithms | Commands::PrintConfig) {
            let db = Database::open(&config.database_path)
                .with_context(|| format!("opening database {}", config.database_path))?;
            let orphaned = db.fail_orphaned_scans()?;
            if orphaned > 0 {
                warn!("{} interrupted scans from an earlier run marked failed", orphaned);
            }
        }
    }

    match args.command {
        Some(Commands::Scan(scan)) => {
            if !run_scan(&config, scan)? {
                process::exit(1);
            }
        }
        Some(Commands::Algorithms) => print_algorithms(),
        Some(Commands::Devices) => run_devices(&config)?,
        Some(Commands::Scans { offset, limit }) => run_scans(&config, offset, limit)?,
        Some(Commands::Show { scan_id, errors }) => run_show(&config, scan_id, errors)?,
        Some(Commands::History { path }) => run_history(&config, path)?,
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

/// Scan every non-overlapping root concurrently. Returns false if any scan failed.
fn run_scan(config: &AppConfig, args: ScanArgs) -> anyhow::Result<bool> {
    let mut config = config.clone();
    if args.no_count {
        config.count_files_first = false;
    }
    let algorithm = match &args.algorithm {
        Some(name) => Some(name.parse::<ChecksumAlgorithm>()?),
        None => None,
    };

    let roots = non_overlapping_directories(args.paths.clone());
    let mut requests = Vec::with_capacity(roots.len());
    for root in roots {
        let mut request = ScanRequest::from_config(root, &config)?;
        if let Some(algorithm) = algorithm {
            request = request.with_algorithm(algorithm);
        }
        if let Some(threads) = args.threads {
            request = request.with_threads(threads);
        }
        if !args.exclude.is_empty() {
            request = request.with_excluded_dirs(args.exclude.clone());
        }
        if !args.exclude_pattern.is_empty() {
            request = request.with_excluded_patterns(args.exclude_pattern.clone());
        }
        if let Some(name) = &args.name {
            request = request.with_name(name.clone());
        }
        requests.push(request);
    }

    let engine = ScanEngine::new(config);
    let cancel = CancelToken::new();
    let multi = MultiProgress::new();
    let reporters: Vec<CliReporter> = requests
        .iter()
        .map(|r| CliReporter::new(&multi, r.root_path.display().to_string()))
        .collect();

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
    let results = std::thread::scope(|s| {
        if let Some(secs) = args.timeout_secs {
            let cancel = cancel.clone();
            let done_rx = done_rx.clone();
            s.spawn(move || {
                let waited = done_rx.recv_timeout(Duration::from_secs(secs));
                if let Err(RecvTimeoutError::Timeout) = waited {
                    warn!("Timeout of {}s reached; stopping scans", secs);
                    cancel.cancel();
                }
            });
        }

        let handles: Vec<_> = requests
            .iter()
            .zip(reporters.iter())
            .map(|(request, reporter)| {
                let engine = &engine;
                let cancel = &cancel;
                s.spawn(move || engine.scan(request, reporter, cancel))
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .zip(requests.iter())
            .map(|(handle, request)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(bitarr_core::Error::Other("scan thread panicked".into()))
                });
                (request.root_path.clone(), result)
            })
            .collect();
        drop(done_tx);
        results
    });

    let mut all_ok = true;
    for (root, result) in results {
        match result {
            Ok(summary) => {
                all_ok &= summary.status != ScanStatus::Failed;
                print_summary(&summary);
            }
            Err(e) => {
                all_ok = false;
                error!("Scan of {} did not run: {}", root.display(), e);
            }
        }
    }
    Ok(all_ok)
}

fn print_summary(summary: &ScanSummary) {
    let status = match summary.status {
        ScanStatus::Completed => summary.status.to_string().green(),
        ScanStatus::Stopped => summary.status.to_string().yellow(),
        _ => summary.status.to_string().red(),
    };
    println!();
    println!(
        "{} #{} {} ({})",
        status.bold(),
        summary.scan_id,
        summary.name.bold(),
        summary.root_path
    );
    if let Some(message) = &summary.error_message {
        println!("  {}", message.red());
    }
    let c = &summary.counters;
    println!(
        "  {} new, {} unchanged, {} modified, {} corrupted, {} missing",
        c.new.to_string().cyan(),
        c.unchanged.to_string().green(),
        c.modified.to_string().yellow(),
        c.corrupted.to_string().red().bold(),
        c.missing.to_string().magenta(),
    );
    let duration = summary
        .duration_secs
        .map(|d| format!("{:.2}s", d))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} bytes checked in {}, {} errors",
        summary.total_bytes,
        duration.green(),
        summary.error_count
    );
    for e in &summary.errors {
        println!(
            "    {} {}: {}",
            e.error_type.red(),
            e.file_path.as_deref().unwrap_or("-"),
            e.message
        );
    }
    if (summary.errors.len() as i64) < summary.error_count {
        println!(
            "    ... {} more (bitarr show {})",
            summary.error_count - summary.errors.len() as i64,
            summary.scan_id
        );
    }
}

fn print_algorithms() {
    for algorithm in ChecksumAlgorithm::all() {
        let info = algorithm.info();
        let name = if algorithm == ChecksumAlgorithm::default() {
            format!("{} (default)", algorithm).green().bold()
        } else {
            algorithm.to_string().bold()
        };
        println!("{}", name);
        println!("  {}", info.description);
        println!("  speed: {}, security: {}", info.speed, info.security);
        println!("  {}", info.recommendation.dimmed());
    }
}

fn run_devices(config: &AppConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    let devices = DeviceRegistry::new().refresh(&db)?;
    info!("{} storage devices known", devices.len());
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

fn print_device(device: &StorageDevice) {
    let state = if device.connected {
        "connected".green()
    } else {
        "disconnected".dimmed()
    };
    println!("#{} {} [{}]", device.id, device.name.bold(), state);
    println!(
        "  {} {} {}",
        device.device_type,
        device.fs_type.as_deref().unwrap_or("-"),
        device.mount_point
    );
    if device.total_size > 0 {
        println!(
            "  {:.1} / {:.1} GiB used",
            device.used_size as f64 / (1u64 << 30) as f64,
            device.total_size as f64 / (1u64 << 30) as f64
        );
    }
}

fn run_scans(config: &AppConfig, offset: i64, limit: i64) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    let (scans, total) = db.list_scans(offset, limit)?;
    for scan in &scans {
        println!(
            "#{:<5} {:<10} {:<8} {} {} ({})",
            scan.id,
            scan.status.to_string(),
            scan.algorithm.to_string(),
            scan.start_time,
            scan.name.bold(),
            scan.root_path
        );
    }
    println!("{} of {} scans", scans.len(), total);
    Ok(())
}

fn run_show(config: &AppConfig, scan_id: i64, errors: i64) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    let summary = db
        .scan_summary(scan_id, errors)?
        .ok_or_else(|| anyhow!("scan {} not found", scan_id))?;
    print_summary(&summary);

    let flagged = db.list_scan_checksums(scan_id, Some(FileStatus::Corrupted), 0, 100)?;
    if !flagged.is_empty() {
        println!("  {}", "possible corruption:".red().bold());
        for (_, path) in flagged {
            println!("    {}", path);
        }
    }
    Ok(())
}

fn run_history(config: &AppConfig, path: PathBuf) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)?;
    let path = path.canonicalize().unwrap_or(path);
    let path = path.to_string_lossy();
    let file = db
        .get_file_by_path(&path)?
        .ok_or_else(|| anyhow!("{} has never been scanned", path))?;

    println!("{} ({} bytes)", file.path.bold(), file.size);
    if file.is_deleted {
        println!(
            "  {} in scan {}",
            "missing".magenta(),
            file.deleted_scan_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }
    for checksum in db.file_history(file.id)? {
        println!(
            "  scan {:<5} {:<10} {} {}:{}",
            checksum.scan_id,
            checksum.status.to_string(),
            checksum.computed_at,
            checksum.algorithm,
            checksum.digest
        );
    }
    Ok(())
}
