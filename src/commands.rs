use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use humansize::{format_size, DECIMAL};
use simplelog::LevelFilter;

use crate::decoder::FfmpegDecoder;
use crate::extractor::FingerprintExtractor;
use crate::file_cache::FingerprintCache;
use crate::options::DedupOptions;
use crate::pipeline::Pipeline;
use crate::report::{render_report, write_report, ReportFormat, RunReport};
use crate::resolution::RemovalAction;

fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Set up the logger based on verbosity level and log file
pub fn setup_logger(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_for(verbosity));
    builder.format_timestamp_millis();
    builder.format_target(false);

    if let Some(log_path) = log_file {
        let file = match std::fs::File::create(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                return Ok(());
            }
        };
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    if let Err(e) = builder.try_init() {
        eprintln!("Warning: Could not initialize logger: {}", e);
    }
    Ok(())
}

fn init_logging(options: &DedupOptions) -> Result<()> {
    if options.log || options.log_file.is_some() {
        let log_path = options
            .log_file
            .as_deref()
            .unwrap_or_else(|| Path::new("media-dedups.log"));
        return setup_logger(options.verbose, Some(log_path));
    }

    // stdout carries the JSON report in --json mode
    let init = if options.progress || options.json {
        let mode = if options.json {
            simplelog::TerminalMode::Stderr
        } else {
            simplelog::TerminalMode::Mixed
        };
        simplelog::TermLogger::init(
            level_for(options.verbose),
            simplelog::Config::default(),
            mode,
            simplelog::ColorChoice::Auto,
        )
    } else {
        simplelog::SimpleLogger::init(level_for(options.verbose), simplelog::Config::default())
    };
    if let Err(e) = init {
        eprintln!("Warning: Could not initialize logger: {}", e);
    }
    Ok(())
}

/// Run a deduplication pass using the provided options
pub fn run_app(options: &DedupOptions) -> Result<RunReport> {
    init_logging(options)?;
    log::info!("Logger initialized. Application starting.");
    log::debug!("Options: {:#?}", options);

    if !options.root.is_dir() {
        log::error!("Root {:?} does not exist or is not a directory.", options.root);
        return Err(anyhow::anyhow!(
            "Root directory does not exist or is not a directory: {:?}",
            options.root
        ));
    }

    if options.dry_run() {
        log::info!("Running in DRY RUN mode - no files will be modified");
    } else if let RemovalAction::MoveTo(dir) = options.removal_action() {
        log::info!("Duplicates will be moved to {:?}", dir);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("Interrupted: finishing in-flight files, no files will be removed");
            cancel.store(true, Ordering::SeqCst);
        }) {
            log::warn!("Could not install interrupt handler: {}", e);
        }
    }

    let decoder = FfmpegDecoder::new(options.ffmpeg.clone(), options.decoder_timeout());
    if !decoder.is_available() {
        log::warn!(
            "{:?} is not available. Video files will be reported as failed.",
            options.ffmpeg.ffmpeg
        );
    }
    let extractor = Arc::new(FingerprintExtractor::new(
        Arc::new(decoder),
        options.extractor.clone(),
    ));

    let mut cache = if options.no_cache {
        FingerprintCache::in_memory()
    } else {
        match FingerprintCache::open(&options.cache_location, &extractor.profile()) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!("{}. Fingerprints will be recomputed and not persisted.", e);
                FingerprintCache::in_memory()
            }
        }
    };

    let report = Pipeline::new(extractor, &mut cache, &options.pipeline, cancel)
        .run(&options.root)
        .with_context(|| format!("Deduplication of {:?} failed", options.root))?;

    if options.json {
        println!("{}", render_report(&report, ReportFormat::Json)?);
    } else {
        print_summary(&report);
    }

    if let Some(output) = &options.output {
        write_report(&report, output, options.format)
            .with_context(|| format!("Failed to write report to {:?}", output))?;
    }

    Ok(report)
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    if report.dry_run {
        println!("\n===== DRY RUN - NO FILES WERE MODIFIED =====");
    }
    if report.cancelled {
        println!("Run was interrupted; duplicates were not resolved.");
    }

    for cluster in &report.clusters {
        println!("Keep: {}", cluster.kept.display());
        for removed in &cluster.removed {
            let verb = if report.dry_run { "would remove" } else { "removed" };
            println!("  {}: {}", verb, removed.path.display());
        }
        for failed in &cluster.failed {
            println!("  failed: {} ({})", failed.path.display(), failed.error);
        }
    }

    println!(
        "\nScanned {} files ({} cached, {} fingerprinted, {} failed).",
        summary.files_scanned,
        summary.cache_hits,
        summary.fingerprints_computed,
        summary.failed_extractions
    );
    println!(
        "Found {} duplicate clusters: {} kept, {} {}, {} removal failures, {} {}.",
        summary.clusters,
        summary.kept,
        summary.removed,
        if report.dry_run { "to remove" } else { "removed" },
        summary.failed_removals,
        format_size(summary.bytes_reclaimed, DECIMAL),
        if report.dry_run { "reclaimable" } else { "reclaimed" }
    );
}
