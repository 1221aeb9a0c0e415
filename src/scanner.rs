use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::errors::ScanError;
use crate::media_file::{MediaExtensions, MediaFile};

/// What the directory walk picks up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub extensions: MediaExtensions,
    /// Glob patterns matched against the full and the root-relative path
    pub excludes: Vec<String>,
    /// Smaller files are ignored
    pub min_size: u64,
    /// Directories never descended into, such as the quarantine directory
    #[serde(default)]
    pub skip_dirs: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct ExcludeRules {
    patterns: Vec<Pattern>,
}

impl ExcludeRules {
    fn new(excludes: &[String]) -> Result<Self, ScanError> {
        let patterns = excludes
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| ScanError::Pattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !patterns.is_empty() {
            log::info!(
                "Exclude rules active: {}",
                patterns.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
            );
        }
        Ok(Self { patterns })
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.patterns
            .iter()
            .any(|p| p.matches_path(path) || p.matches_path(relative))
    }
}

/// Enumerate the media files below `root`, sorted by path.
///
/// Hidden entries (leading `.` or `$`) and symlinks are skipped. Entries that
/// cannot be read are logged and left out; only an unusable root is an error.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<Vec<MediaFile>, ScanError> {
    if !root.exists() {
        return Err(ScanError::RootMissing {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    fs::read_dir(root).map_err(|source| ScanError::Inaccessible {
        path: root.to_path_buf(),
        source,
    })?;

    let rules = ExcludeRules::new(&options.excludes)?;
    let skip_dirs = skip_dirs_under(root, &options.skip_dirs);
    log::info!("Scanning directory: {:?}", root);

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry_result in walker.filter_entry(|e| {
        e.depth() == 0
            || !(is_hidden(e)
                || is_symlink(e)
                || rules.is_excluded(root, e.path())
                || skip_dirs.iter().any(|d| e.path() == d))
    }) {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Error walking directory: {}", ScanError::from(e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = options.extensions.kind_of(entry.path()) else {
            continue;
        };
        match MediaFile::from_path(entry.path(), kind) {
            Ok(file) if file.size >= options.min_size && file.size > 0 => files.push(file),
            Ok(_) => log::debug!("Skipping small file {:?}", entry.path()),
            Err(e) => log::warn!("Failed to get metadata for {:?}: {}", entry.path(), e),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    log::info!("Found {} media files", files.len());
    Ok(files)
}

/// Map each skip directory that lies inside `root` onto the path the walk
/// will report for it. Directories that don't exist yet or live elsewhere
/// can't be reached and are dropped.
fn skip_dirs_under(root: &Path, dirs: &[PathBuf]) -> Vec<PathBuf> {
    let Ok(canonical_root) = root.canonicalize() else {
        return dirs.to_vec();
    };
    dirs.iter()
        .filter_map(|dir| {
            let canonical = dir.canonicalize().ok()?;
            let relative = canonical.strip_prefix(&canonical_root).ok()?;
            Some(root.join(relative))
        })
        .collect()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.') || s.starts_with('$'))
        .unwrap_or(false)
}

fn is_symlink(entry: &DirEntry) -> bool {
    entry.path_is_symlink()
}
