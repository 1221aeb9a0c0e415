use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;

use crate::errors::ExtractionError;
use crate::extractor::FingerprintExtractor;
use crate::file_cache::FingerprintCache;
use crate::fingerprint::FingerprintRecord;
use crate::grouper::{self, GroupingOptions, MediaEntry};
use crate::media_file::{FileIdentity, IdentityMode, MediaFile};
use crate::report::{FailedExtraction, RunReport};
use crate::resolution::{RemovalAction, ResolutionPolicy};
use crate::scanner::{self, ScanOptions};

/// Everything a run needs besides the extractor and the cache
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub scan: ScanOptions,
    pub identity: IdentityMode,
    /// Size of the extraction worker pool
    pub workers: usize,
    /// Flush the cache after this many new fingerprints
    pub flush_every: usize,
    pub grouping: GroupingOptions,
    pub policy: ResolutionPolicy,
    pub action: RemovalAction,
    pub dry_run: bool,
    pub progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            identity: IdentityMode::default(),
            workers: num_cpus::get(),
            flush_every: 100,
            grouping: GroupingOptions::default(),
            policy: ResolutionPolicy::default(),
            action: RemovalAction::default(),
            dry_run: true,
            progress: false,
        }
    }
}

/// One deduplication run over a directory tree
pub struct Pipeline<'a> {
    extractor: Arc<FingerprintExtractor>,
    cache: &'a mut FingerprintCache,
    options: &'a PipelineOptions,
    cancel: Arc<AtomicBool>,
}

type Extracted = (usize, Result<FingerprintRecord, ExtractionError>);

impl<'a> Pipeline<'a> {
    pub fn new(
        extractor: Arc<FingerprintExtractor>,
        cache: &'a mut FingerprintCache,
        options: &'a PipelineOptions,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            extractor,
            cache,
            options,
            cancel,
        }
    }

    /// The quarantine directory may sit inside the root; what was moved
    /// there must not be found again on the next run.
    fn scan_options(&self) -> ScanOptions {
        let mut scan = self.options.scan.clone();
        if let RemovalAction::MoveTo(dir) = &self.options.action {
            scan.skip_dirs.push(dir.clone());
        }
        scan
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Scan, fingerprint, cluster, resolve and (unless dry-running) remove.
    ///
    /// Only setup problems are errors. Per-file failures end up in the report.
    pub fn run(&mut self, root: &Path) -> Result<RunReport> {
        let mut report = RunReport::new(root, self.options.dry_run);

        let files = scanner::scan(root, &self.scan_options())?;
        report.summary.files_scanned = files.len();

        let (entries, failures) = self.fingerprint_all(files, &mut report)?;
        report.failed_extractions = failures.iter().map(FailedExtraction::from).collect();
        report
            .failed_extractions
            .sort_by(|a, b| a.path.cmp(&b.path));
        self.flush_cache();

        if self.cancelled() {
            log::warn!("Run cancelled before clustering, nothing was removed");
            report.cancelled = true;
            report.finish();
            return Ok(report);
        }

        let clusters = grouper::group(entries, &self.options.grouping);

        for cluster in &clusters {
            if self.cancelled() {
                log::warn!("Run cancelled, skipping the remaining clusters");
                report.cancelled = true;
                break;
            }
            let Some(resolution) = self.options.policy.resolve(cluster) else {
                continue;
            };
            log::debug!(
                "Keeping {:?}, removing {} duplicates",
                resolution.keep.file.path,
                resolution.remove.len()
            );
            let outcome =
                self.options
                    .policy
                    .execute(&resolution, &self.options.action, self.options.dry_run);
            if !self.options.dry_run {
                for removed in &outcome.removed {
                    self.cache.forget(&removed.path);
                }
            }
            report.clusters.push(outcome);
        }

        self.flush_cache();
        report.finish();
        Ok(report)
    }

    /// Cache lookups on this thread, extraction of the misses on the worker
    /// pool. The cache is only ever touched here, so workers never write to it.
    fn fingerprint_all(
        &mut self,
        files: Vec<MediaFile>,
        report: &mut RunReport,
    ) -> Result<(Vec<MediaEntry>, Vec<ExtractionError>)> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .thread_name(|i| format!("extract-{}", i))
            .build()
            .context("Failed to build extraction thread pool")?;

        let identity_mode = self.options.identity;
        let identities: Vec<std::io::Result<FileIdentity>> = pool.install(|| {
            files
                .par_iter()
                .map(|file| FileIdentity::of(file, identity_mode))
                .collect()
        });

        let mut entries = Vec::with_capacity(files.len());
        let mut failures = Vec::new();
        let mut misses: Vec<(MediaFile, FileIdentity)> = Vec::new();

        for (file, identity) in files.into_iter().zip(identities) {
            match identity {
                Ok(identity) => match self.cache.get(&identity) {
                    Some(record) => {
                        report.summary.cache_hits += 1;
                        entries.push(MediaEntry {
                            record: record.clone(),
                            file,
                        });
                    }
                    None => misses.push((file, identity)),
                },
                Err(source) => {
                    log::warn!("Cannot read {:?}: {}", file.path, source);
                    failures.push(ExtractionError::Unreadable {
                        path: file.path,
                        source,
                    });
                }
            }
        }

        log::info!(
            "{} fingerprints cached, {} to compute",
            report.summary.cache_hits,
            misses.len()
        );
        if misses.is_empty() {
            return Ok((entries, failures));
        }

        let draw_target = if self.options.progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(Some(misses.len() as u64), draw_target);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) Fingerprinting",
                )?
                .progress_chars("#=> "),
        );

        let (tx, rx) = crossbeam_channel::unbounded::<Extracted>();
        let extractor = Arc::clone(&self.extractor);
        let cancel = Arc::clone(&self.cancel);
        let flush_every = self.options.flush_every.max(1);
        let mut since_flush = 0;

        thread::scope(|scope| {
            let jobs = &misses;
            let pool = &pool;
            scope.spawn(move || {
                pool.install(|| {
                    jobs.par_iter()
                        .enumerate()
                        .for_each_with(tx, |tx, (idx, (file, _))| {
                            if cancel.load(Ordering::SeqCst) {
                                return;
                            }
                            let result = extractor.extract_with_timeout(file);
                            let _ = tx.send((idx, result));
                        })
                })
            });

            // single writer: every cache update happens on this thread
            for (idx, result) in rx.iter() {
                let (file, identity) = &misses[idx];
                match result {
                    Ok(record) => {
                        self.cache.put(identity, &file.path, record.clone());
                        report.summary.fingerprints_computed += 1;
                        entries.push(MediaEntry {
                            file: file.clone(),
                            record,
                        });
                        since_flush += 1;
                        if since_flush >= flush_every {
                            self.flush_cache();
                            since_flush = 0;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to fingerprint: {}", e);
                        failures.push(e);
                    }
                }
                pb.inc(1);
            }
        });

        if self.cancelled() {
            pb.abandon_with_message("Cancelled");
        } else {
            pb.finish_and_clear();
        }
        log::info!(
            "Computed {} fingerprints, {} failures",
            report.summary.fingerprints_computed,
            failures.len()
        );
        Ok((entries, failures))
    }

    fn flush_cache(&mut self) {
        if let Err(e) = self.cache.flush() {
            log::warn!("Fingerprints of this run may not persist: {}", e);
        }
    }
}
