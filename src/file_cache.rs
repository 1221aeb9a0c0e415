use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::errors::CacheIoError;
use crate::fingerprint::FingerprintRecord;
use crate::media_file::FileIdentity;

const CACHE_VERSION: u32 = 1;

/// Fingerprint stored for one file identity
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    path: PathBuf,
    record: FingerprintRecord,
}

/// On-disk layout of a cache file
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

/// Durable map from file identity to fingerprint.
///
/// One cache file exists per fingerprint profile, so records computed with
/// a different algorithm are never returned. Writes go to a temporary file
/// that is renamed over the previous one; a crash mid-write leaves the last
/// complete cache in place.
#[derive(Debug)]
pub struct FingerprintCache {
    cache_file: Option<PathBuf>,
    entries: HashMap<String, CacheEntry>,
    /// path -> key of its metadata-bound entry
    by_path: HashMap<PathBuf, String>,
    modified: bool,
}

impl FingerprintCache {
    /// Open (or create) the cache for `profile` inside `cache_dir`.
    ///
    /// An unreadable or corrupt cache file is logged and replaced by an empty
    /// cache; only a directory that cannot be created or a file that cannot
    /// be read is an error.
    pub fn open(cache_dir: &Path, profile: &str) -> Result<Self, CacheIoError> {
        if !cache_dir.exists() {
            fs::create_dir_all(cache_dir).map_err(|source| CacheIoError::CreateDir {
                path: cache_dir.to_path_buf(),
                source,
            })?;
        }

        let cache_file = Self::cache_file_path(cache_dir, profile);
        let entries = match fs::read(&cache_file) {
            Ok(contents) => match serde_json::from_slice::<CacheFile>(&contents) {
                Ok(file) if file.version == CACHE_VERSION => {
                    log::info!(
                        "Loaded {} entries from cache file: {:?}",
                        file.entries.len(),
                        cache_file
                    );
                    file.entries
                }
                Ok(file) => {
                    log::warn!(
                        "Cache file {:?} has version {}, expected {}; starting empty",
                        cache_file,
                        file.version,
                        CACHE_VERSION
                    );
                    HashMap::new()
                }
                Err(e) => {
                    log::warn!(
                        "Cache file {:?} is corrupt ({}); starting empty",
                        cache_file,
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(CacheIoError::Read {
                    path: cache_file,
                    source,
                })
            }
        };

        let by_path = entries
            .iter()
            .filter(|(key, _)| !is_content_key(key))
            .map(|(key, entry)| (entry.path.clone(), key.clone()))
            .collect();

        Ok(Self {
            cache_file: Some(cache_file),
            entries,
            by_path,
            modified: false,
        })
    }

    /// A cache that lives only for this run
    pub fn in_memory() -> Self {
        Self {
            cache_file: None,
            entries: HashMap::new(),
            by_path: HashMap::new(),
            modified: false,
        }
    }

    fn cache_file_path(cache_dir: &Path, profile: &str) -> PathBuf {
        cache_dir.join(format!("fingerprints_{}.json", profile))
    }

    /// Location of the backing file, `None` for an in-memory cache
    pub fn path(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    pub fn get(&self, identity: &FileIdentity) -> Option<&FingerprintRecord> {
        let hit = self.entries.get(&identity.cache_key()).map(|e| &e.record);
        if hit.is_some() {
            log::trace!("Cache hit for {}", identity.cache_key());
        }
        hit
    }

    /// Store a record. Any older metadata-bound entry for the same path is
    /// dropped, so a modified file never leaves its stale fingerprint behind.
    pub fn put(&mut self, identity: &FileIdentity, path: &Path, record: FingerprintRecord) {
        let key = identity.cache_key();
        if let Some(bound) = identity.bound_path() {
            if let Some(old_key) = self.by_path.insert(bound.to_path_buf(), key.clone()) {
                if old_key != key {
                    log::debug!("Evicting stale cache entry for {:?}", bound);
                    self.entries.remove(&old_key);
                }
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                path: path.to_path_buf(),
                record,
            },
        );
        self.modified = true;
    }

    /// Drop every entry recorded for `path`, e.g. after the file was removed
    pub fn forget(&mut self, path: &Path) {
        self.by_path.remove(path);
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.path != path);
        if self.entries.len() != before {
            self.modified = true;
        }
    }

    /// Persist pending changes. Calling it again without changes is a no-op.
    pub fn flush(&mut self) -> Result<(), CacheIoError> {
        if !self.modified {
            log::debug!("Cache not modified, skipping save.");
            return Ok(());
        }
        let cache_file = match &self.cache_file {
            Some(path) => path.clone(),
            None => {
                self.modified = false;
                return Ok(());
            }
        };

        let temp_file = cache_file.with_extension("json.tmp");
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CacheIoError::Write { path, source }
        };

        let snapshot = CacheFile {
            version: CACHE_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec(&snapshot)?;

        let mut file = File::create(&temp_file).map_err(write_err(&temp_file))?;
        file.write_all(&json).map_err(write_err(&temp_file))?;
        file.sync_all().map_err(write_err(&temp_file))?;
        drop(file);

        fs::rename(&temp_file, &cache_file).map_err(write_err(&cache_file))?;

        log::info!(
            "Saved {} entries to cache file: {:?}",
            self.entries.len(),
            cache_file
        );
        self.modified = false;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_content_key(key: &str) -> bool {
    key.starts_with("blake3:")
}

impl Drop for FingerprintCache {
    fn drop(&mut self) {
        if self.modified {
            if let Err(e) = self.flush() {
                log::error!("Failed to save cache on drop: {}", e);
            }
        }
    }
}
