use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::errors::ExtractionError;

/// A file taken out of the collection (or that would be, in a dry run)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedFile {
    pub path: PathBuf,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRemoval {
    pub path: PathBuf,
    pub error: String,
}

impl FailedRemoval {
    pub fn new(path: &Path, error: &impl std::fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            error: error.to_string(),
        }
    }
}

/// Outcome of one resolved cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub kept: PathBuf,
    pub kept_size: u64,
    pub removed: Vec<RemovedFile>,
    pub failed: Vec<FailedRemoval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedExtraction {
    pub path: PathBuf,
    pub error: String,
}

impl From<&ExtractionError> for FailedExtraction {
    fn from(e: &ExtractionError) -> Self {
        Self {
            path: e.path().clone(),
            error: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub files_scanned: usize,
    pub cache_hits: usize,
    pub fingerprints_computed: usize,
    pub clusters: usize,
    pub kept: usize,
    pub removed: usize,
    pub failed_removals: usize,
    pub failed_extractions: usize,
    pub bytes_reclaimed: u64,
}

/// Everything needed to audit a run after the fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub root: PathBuf,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub dry_run: bool,
    /// The run was interrupted. Interrupted during extraction, nothing was
    /// removed and `clusters` is empty; interrupted while resolving, the
    /// clusters listed were carried out and the rest were left alone.
    pub cancelled: bool,
    pub summary: Summary,
    pub clusters: Vec<ClusterReport>,
    pub failed_extractions: Vec<FailedExtraction>,
}

impl RunReport {
    pub fn new(root: &Path, dry_run: bool) -> Self {
        let now = Local::now();
        Self {
            root: root.to_path_buf(),
            started_at: now,
            finished_at: now,
            dry_run,
            cancelled: false,
            summary: Summary::default(),
            clusters: Vec::new(),
            failed_extractions: Vec::new(),
        }
    }

    /// Recompute the summary counts from the detailed records
    pub fn finish(&mut self) {
        self.finished_at = Local::now();
        self.summary.clusters = self.clusters.len();
        self.summary.kept = self.clusters.len();
        self.summary.removed = self.clusters.iter().map(|c| c.removed.len()).sum();
        self.summary.failed_removals = self.clusters.iter().map(|c| c.failed.len()).sum();
        self.summary.failed_extractions = self.failed_extractions.len();
        self.summary.bytes_reclaimed = self
            .clusters
            .iter()
            .flat_map(|c| c.removed.iter())
            .map(|r| r.size)
            .sum();
    }
}

/// Serialization format of the written report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Toml,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(format!("Unsupported output format: {}", other)),
        }
    }
}

pub fn render_report(report: &RunReport, format: ReportFormat) -> Result<String> {
    Ok(match format {
        ReportFormat::Json => serde_json::to_string_pretty(report)?,
        ReportFormat::Toml => toml::to_string_pretty(report)?,
    })
}

pub fn write_report(report: &RunReport, output_path: &Path, format: ReportFormat) -> Result<()> {
    log::info!(
        "Writing report with {} clusters to {:?} in {:?} format",
        report.clusters.len(),
        output_path,
        format
    );

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            log::debug!("Created parent directory: {:?}", parent);
        }
    }

    fs::write(output_path, render_report(report, format)?)?;
    log::info!("Successfully wrote report to {:?}", output_path);
    Ok(())
}
