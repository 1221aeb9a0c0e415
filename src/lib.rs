pub mod audio_fingerprint;
pub mod commands;
pub mod config;
pub mod decoder;
pub mod disjoint_set;
pub mod errors;
pub mod extractor;
pub mod file_cache;
pub mod fingerprint;
pub mod grouper;
pub mod media_file;
pub mod options;
pub mod pipeline;
pub mod report;
pub mod resolution;
pub mod scanner;
pub mod visual_fingerprint;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::config::DedupConfig;
use crate::decoder::FfmpegOptions;
use crate::extractor::ExtractorOptions;
use crate::fingerprint::SimilarityThresholds;
use crate::grouper::GroupingOptions;
use crate::media_file::{IdentityMode, MediaExtensions};
use crate::options::DedupOptions;
use crate::pipeline::PipelineOptions;
use crate::report::ReportFormat;
use crate::resolution::{KeepStrategy, RemovalAction, ResolutionPolicy};
use crate::scanner::ScanOptions;
use crate::visual_fingerprint::HashAlgorithm;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Find and remove perceptually duplicate images and videos", long_about = None)]
pub struct Cli {
    /// The directory to scan for duplicate media.
    pub root: PathBuf,

    /// Delete duplicates. Without this (or --move-to) the run only reports.
    #[clap(short, long, help = "Delete duplicate files based on the keep strategy")]
    pub delete: bool,

    /// Report what would be removed without touching any file.
    #[clap(short = 'n', long, help = "Only report intended removals")]
    pub dry_run: bool,

    /// Move duplicates to the specified folder instead of deleting them.
    #[clap(short = 'M', long, help = "Move duplicate files to a specified directory")]
    pub move_to: Option<PathBuf>,

    #[clap(short, long, help = "Maximum Hamming distance between visual hashes (default: 4)")]
    pub threshold: Option<u32>,

    #[clap(long, help = "Also fingerprint the audio track of videos")]
    pub audio: bool,

    #[clap(long, help = "Maximum distance between audio fingerprints (default: 0.1)")]
    pub audio_epsilon: Option<f32>,

    #[clap(short, long, value_parser = HashAlgorithm::from_str, help = "Perceptual hash [phash|dhash]")]
    pub algorithm: Option<HashAlgorithm>,

    /// Number of parallel extraction workers. Defaults to auto-detected number of cores.
    #[clap(short, long, help = "Number of parallel workers (default: auto)")]
    pub parallel: Option<usize>,

    #[clap(long, value_name = "SECS", help = "Give up on a single file after this many seconds")]
    pub timeout: Option<u64>,

    #[clap(long, help = "Directory holding the fingerprint cache")]
    pub cache_location: Option<PathBuf>,

    #[clap(long, help = "Do not read or write the fingerprint cache")]
    pub no_cache: bool,

    #[clap(long, help = "Identify files by content hash instead of path, size and mtime")]
    pub content_identity: bool,

    #[clap(long, value_parser = KeepStrategy::from_str, help = "Which duplicate to keep [largest|highest_resolution|newest_modified|oldest_modified|shortest_path]")]
    pub keep: Option<KeepStrategy>,

    #[clap(long, help = "Prefer copies under this directory (repeatable)")]
    pub prefer: Vec<PathBuf>,

    #[clap(long, help = "On ties, keep the name with the longest run of digits")]
    pub prefer_numbered_names: bool,

    /// Write the run report to a file.
    #[clap(short, long, help = "Write the run report to a file (e.g., report.json)")]
    pub output: Option<PathBuf>,

    #[clap(short, long, value_parser = ReportFormat::from_str, help = "Format for the output file [json|toml]")]
    pub format: Option<ReportFormat>,

    #[clap(long, help = "Print the report as JSON to stdout")]
    pub json: bool,

    /// Exclude files matching the given glob pattern. Can be specified multiple times.
    #[clap(long, help = "Exclude specific file patterns (glob)")]
    pub exclude: Vec<String>,

    #[clap(long, help = "Show a progress bar while fingerprinting")]
    pub progress: bool,

    /// Verbosity level.
    #[clap(short, long, action = clap::ArgAction::Count, help = "Verbosity level (-v, -vv)")]
    pub verbose: u8,

    #[clap(short, long, help = "Enable logging to a file (default: media-dedups.log)")]
    pub log: bool,

    #[clap(long, value_name = "PATH", help = "Specify a custom log file path")]
    pub log_file: Option<PathBuf>,

    #[clap(long, value_name = "PATH", help = "Read settings from this file instead of ~/.mediadeduprc")]
    pub config_file: Option<PathBuf>,

    /// Settings from the config file, filled in by `with_config`
    #[clap(skip)]
    pub config: DedupConfig,
}

impl Cli {
    /// Parse the command line and merge in the configuration file
    pub fn with_config() -> Result<Self> {
        let mut cli = Self::parse();

        let config = if let Some(config_path) = &cli.config_file {
            DedupConfig::load_from_path(config_path)?
        } else {
            DedupConfig::load()?
        };
        cli.apply_config(config);

        // Only seed the default location, never a file named on the command line
        if cli.config_file.is_none() {
            if let Err(e) = DedupConfig::create_default_if_not_exists() {
                eprintln!("Warning: Could not create default config file: {}", e);
            }
        }

        Ok(cli)
    }

    /// Apply config values to settings that weren't given on the command line
    pub fn apply_config(&mut self, config: DedupConfig) {
        if !self.audio && config.audio {
            self.audio = true;
        }
        if !self.progress && config.progress {
            self.progress = true;
        }
        if !self.prefer_numbered_names && config.prefer_numbered_names {
            self.prefer_numbered_names = true;
        }
        if self.exclude.is_empty() && !config.exclude.is_empty() {
            self.exclude = config.exclude.clone();
        }
        if self.prefer.is_empty() && !config.prefer.is_empty() {
            self.prefer = config.prefer.clone();
        }
        if self.cache_location.is_none() {
            self.cache_location = config.cache_location.clone();
        }
        self.config = config;
    }

    /// Resolve every setting into typed options
    pub fn to_options(&self) -> Result<DedupOptions> {
        let config = &self.config;

        let algorithm = match self.algorithm {
            Some(algorithm) => algorithm,
            None => HashAlgorithm::from_str(&config.algorithm).map_err(|e| anyhow!(e))?,
        };
        let keep = match self.keep {
            Some(keep) => keep,
            None => KeepStrategy::from_str(&config.keep).map_err(|e| anyhow!(e))?,
        };
        let format = match self.format {
            Some(format) => format,
            None => ReportFormat::from_str(&config.format).map_err(|e| anyhow!(e))?,
        };
        let identity = if self.content_identity {
            IdentityMode::Content
        } else {
            match config.identity.as_str() {
                "metadata" => IdentityMode::Metadata,
                "content" => IdentityMode::Content,
                other => return Err(anyhow!("Invalid identity mode: {}", other)),
            }
        };

        let action = match &self.move_to {
            Some(dir) => RemovalAction::MoveTo(dir.clone()),
            None => RemovalAction::Delete,
        };
        let dry_run = self.dry_run || (!self.delete && self.move_to.is_none());

        let timeout = Duration::from_secs(self.timeout.unwrap_or(config.timeout_secs).max(1));

        Ok(DedupOptions {
            root: self.root.clone(),
            output: self.output.clone(),
            format,
            json: self.json,
            verbose: self.verbose,
            log: self.log,
            log_file: self.log_file.clone(),
            progress: self.progress,
            cache_location: self
                .cache_location
                .clone()
                .unwrap_or_else(DedupConfig::default_cache_location),
            no_cache: self.no_cache,
            ffmpeg: FfmpegOptions {
                ffmpeg: config.ffmpeg.clone(),
                ffprobe: config.ffprobe.clone(),
                hwaccel: config.hwaccel,
            },
            extractor: ExtractorOptions {
                algorithm,
                audio: self.audio,
                audio_clip_secs: config.audio_clip_secs,
                timeout,
            },
            pipeline: PipelineOptions {
                scan: ScanOptions {
                    extensions: MediaExtensions {
                        images: config.image_extensions.clone(),
                        videos: config.video_extensions.clone(),
                    },
                    excludes: self.exclude.clone(),
                    min_size: config.min_size,
                    skip_dirs: Vec::new(),
                },
                identity,
                workers: self.parallel.or(config.parallel).unwrap_or_else(num_cpus::get),
                flush_every: config.flush_every,
                grouping: GroupingOptions {
                    thresholds: SimilarityThresholds {
                        max_hamming: self.threshold.unwrap_or(config.threshold),
                        audio_epsilon: self.audio_epsilon.unwrap_or(config.audio_epsilon),
                    },
                    duration_bucket_secs: config.duration_bucket_secs,
                    aspect_bucket_step: config.aspect_bucket_step,
                    size_bucket_base: config.size_bucket_base,
                },
                policy: ResolutionPolicy {
                    strategy: keep,
                    preferred_dirs: self.prefer.clone(),
                    preference_margin: config.preference_margin,
                    prefer_numbered_names: self.prefer_numbered_names,
                },
                action,
                dry_run,
                progress: self.progress,
            },
        })
    }
}
