use std::path::PathBuf;
use std::time::Duration;

use crate::decoder::FfmpegOptions;
use crate::extractor::ExtractorOptions;
use crate::pipeline::PipelineOptions;
use crate::report::ReportFormat;
use crate::resolution::RemovalAction;

/// Fully resolved run settings: CLI flags over the config file over defaults
#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub root: PathBuf,

    /// Where the report goes, if anywhere besides the terminal
    pub output: Option<PathBuf>,
    pub format: ReportFormat,
    /// Print the report as JSON on stdout instead of the summary
    pub json: bool,

    pub verbose: u8,
    pub log: bool,
    pub log_file: Option<PathBuf>,
    pub progress: bool,

    pub cache_location: PathBuf,
    /// Keep fingerprints only for this run
    pub no_cache: bool,

    pub ffmpeg: FfmpegOptions,
    pub extractor: ExtractorOptions,
    pub pipeline: PipelineOptions,
}

impl DedupOptions {
    pub fn dry_run(&self) -> bool {
        self.pipeline.dry_run
    }

    pub fn removal_action(&self) -> &RemovalAction {
        &self.pipeline.action
    }

    /// Per-call deadline for the decoder's subprocesses. A little under the
    /// whole-file timeout so that a hung decoder is killed before the file is
    /// given up on.
    pub fn decoder_timeout(&self) -> Duration {
        let whole = self.extractor.timeout;
        whole
            .checked_sub(Duration::from_secs(1))
            .filter(|d| !d.is_zero())
            .unwrap_or(whole)
    }
}
