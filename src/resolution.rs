use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::DeletionError;
use crate::grouper::{DuplicateCluster, MediaEntry};
use crate::report::{ClusterReport, FailedRemoval, RemovedFile};

/// Size gap under which a file in a preferred directory beats the pick
pub const DEFAULT_PREFERENCE_MARGIN: u64 = 3 * 1024 * 1024;

/// Rule deciding which member of a cluster survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepStrategy {
    #[default]
    Largest,
    HighestResolution,
    NewestModified,
    OldestModified,
    ShortestPath,
}

impl KeepStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Largest => "largest",
            Self::HighestResolution => "highest_resolution",
            Self::NewestModified => "newest_modified",
            Self::OldestModified => "oldest_modified",
            Self::ShortestPath => "shortest_path",
        }
    }

    /// `Less` means `a` is the better file to keep
    fn compare(&self, a: &MediaEntry, b: &MediaEntry) -> Ordering {
        match self {
            Self::Largest => b.file.size.cmp(&a.file.size),
            Self::HighestResolution => b
                .record
                .pixel_count()
                .cmp(&a.record.pixel_count())
                .then_with(|| b.file.size.cmp(&a.file.size)),
            Self::NewestModified => b.file.modified_at.cmp(&a.file.modified_at),
            Self::OldestModified => a.file.modified_at.cmp(&b.file.modified_at),
            Self::ShortestPath => a
                .file
                .path
                .as_os_str()
                .len()
                .cmp(&b.file.path.as_os_str().len()),
        }
    }
}

impl std::str::FromStr for KeepStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "largest" => Ok(Self::Largest),
            "highest_resolution" => Ok(Self::HighestResolution),
            "newest_modified" => Ok(Self::NewestModified),
            "oldest_modified" => Ok(Self::OldestModified),
            "shortest_path" => Ok(Self::ShortestPath),
            _ => Err(format!("Invalid keep strategy: {}", s)),
        }
    }
}

impl std::fmt::Display for KeepStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What happens to the files that are not kept
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalAction {
    #[default]
    Delete,
    MoveTo(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    pub strategy: KeepStrategy,
    /// Files under these directories are favoured
    pub preferred_dirs: Vec<PathBuf>,
    pub preference_margin: u64,
    /// Among otherwise equal files, favour the name with the longest run of
    /// digits (`IMG_20190412.jpg` over `IMG copy.jpg`)
    #[serde(default)]
    pub prefer_numbered_names: bool,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            strategy: KeepStrategy::default(),
            preferred_dirs: Vec::new(),
            preference_margin: DEFAULT_PREFERENCE_MARGIN,
            prefer_numbered_names: false,
        }
    }
}

/// The decision for one cluster: exactly one keeper, everything else goes
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub keep: MediaEntry,
    pub remove: Vec<MediaEntry>,
}

impl ResolutionPolicy {
    fn is_preferred(&self, path: &Path) -> bool {
        self.preferred_dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Full ranking: strategy, then preferred location, then (optionally)
    /// digit runs in the name, then path
    fn rank(&self, a: &MediaEntry, b: &MediaEntry) -> Ordering {
        self.strategy
            .compare(a, b)
            .then_with(|| {
                self.is_preferred(&b.file.path)
                    .cmp(&self.is_preferred(&a.file.path))
            })
            .then_with(|| {
                if self.prefer_numbered_names {
                    longest_digit_run(&b.file.path).cmp(&longest_digit_run(&a.file.path))
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| a.file.path.cmp(&b.file.path))
    }

    /// Pick the keeper of a cluster. Clusters with fewer than two members
    /// are not resolved.
    pub fn resolve(&self, cluster: &DuplicateCluster) -> Option<Resolution> {
        if cluster.len() < 2 {
            return None;
        }

        let mut ranked: Vec<&MediaEntry> = cluster.members.iter().collect();
        ranked.sort_by(|a, b| self.rank(a, b));
        let mut keep_idx = 0;

        // A near-equal copy in a preferred directory wins over the strict pick
        if !self.is_preferred(&ranked[0].file.path) {
            let best_size = ranked[0].file.size;
            if let Some(idx) = ranked.iter().position(|e| {
                self.is_preferred(&e.file.path)
                    && best_size.saturating_sub(e.file.size) < self.preference_margin
            }) {
                log::debug!(
                    "Keeping {:?} from a preferred directory over {:?}",
                    ranked[idx].file.path,
                    ranked[0].file.path
                );
                keep_idx = idx;
            }
        }

        let keep = ranked[keep_idx].clone();
        let mut remove: Vec<MediaEntry> = ranked
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| *idx != keep_idx)
            .map(|(_, e)| e.clone())
            .collect();
        remove.sort_by(|a, b| a.file.path.cmp(&b.file.path));

        Some(Resolution { keep, remove })
    }

    /// Carry out a resolution. Each removal succeeds or fails on its own; the
    /// cluster report records both.
    pub fn execute(
        &self,
        resolution: &Resolution,
        action: &RemovalAction,
        dry_run: bool,
    ) -> ClusterReport {
        let mut report = ClusterReport {
            kept: resolution.keep.file.path.clone(),
            kept_size: resolution.keep.file.size,
            removed: Vec::new(),
            failed: Vec::new(),
        };

        if dry_run {
            let mut claimed = HashSet::new();
            for entry in &resolution.remove {
                log::info!("[DRY RUN] Would remove {:?}", entry.file.path);
                let moved_to = match action {
                    RemovalAction::Delete => None,
                    RemovalAction::MoveTo(dir) => {
                        let target = unique_target(dir, &entry.file.path, &claimed);
                        claimed.insert(target.clone());
                        Some(target)
                    }
                };
                report.removed.push(RemovedFile {
                    path: entry.file.path.clone(),
                    size: entry.file.size,
                    moved_to,
                });
            }
            return report;
        }

        // never remove copies unless the keeper is still there
        if fs::metadata(&resolution.keep.file.path).is_err() {
            log::error!(
                "Kept file {:?} disappeared, leaving its duplicates alone",
                resolution.keep.file.path
            );
            for entry in &resolution.remove {
                report.failed.push(FailedRemoval::new(
                    &entry.file.path,
                    &DeletionError::KeepMissing {
                        path: resolution.keep.file.path.clone(),
                    },
                ));
            }
            return report;
        }

        for entry in &resolution.remove {
            match remove_one(entry, action) {
                Ok(moved_to) => {
                    log::info!("Removed {:?}", entry.file.path);
                    report.removed.push(RemovedFile {
                        path: entry.file.path.clone(),
                        size: entry.file.size,
                        moved_to,
                    });
                }
                Err(e) => {
                    log::error!("{}", e);
                    report.failed.push(FailedRemoval::new(&entry.file.path, &e));
                }
            }
        }
        report
    }
}

/// Length of the longest run of ASCII digits in the file stem
fn longest_digit_run(path: &Path) -> usize {
    let name = path.file_stem().unwrap_or_default().to_string_lossy();
    name.split(|c: char| !c.is_ascii_digit())
        .map(str::len)
        .max()
        .unwrap_or(0)
}

fn remove_one(entry: &MediaEntry, action: &RemovalAction) -> Result<Option<PathBuf>, DeletionError> {
    let path = &entry.file.path;
    let io_err = |source: io::Error| DeletionError::Io {
        path: path.clone(),
        source,
    };

    fs::metadata(path).map_err(io_err)?;
    if !entry.file.is_unchanged_on_disk() {
        return Err(DeletionError::Changed { path: path.clone() });
    }

    match action {
        RemovalAction::Delete => {
            fs::remove_file(path).map_err(io_err)?;
            Ok(None)
        }
        RemovalAction::MoveTo(dir) => {
            fs::create_dir_all(dir).map_err(io_err)?;
            let target = unique_target(dir, path, &HashSet::new());
            if let Err(e) = fs::rename(path, &target) {
                // rename does not cross filesystems; a copy that can't be
                // completed by removing the source is rolled back
                log::debug!("Rename of {:?} failed ({}), copying instead", path, e);
                if let Err(e) = fs::copy(path, &target).and_then(|_| fs::remove_file(path)) {
                    if target.exists() {
                        if let Err(cleanup) = fs::remove_file(&target) {
                            log::warn!("Could not remove partial copy {:?}: {}", target, cleanup);
                        }
                    }
                    return Err(io_err(e));
                }
            }
            Ok(Some(target))
        }
    }
}

/// `dir/name`, or `dir/stem_copy(n).ext` if that is taken on disk or
/// already `claimed`
fn unique_target(dir: &Path, path: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let file_name = path.file_name().unwrap_or(path.as_os_str());
    let mut target = dir.join(file_name);
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    while target.exists() || claimed.contains(&target) {
        target = dir.join(format!("{}_copy({}){}", stem, counter, ext));
        counter += 1;
    }
    target
}
