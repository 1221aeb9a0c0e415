use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default extensions treated as still images
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "gif", "tiff"];

/// Default extensions treated as videos
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "m4v", "3gp", "ts",
];

/// Media kinds handled by the deduplicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Extension allow-lists used to infer the kind of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaExtensions {
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

impl Default for MediaExtensions {
    fn default() -> Self {
        Self {
            images: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            videos: VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl MediaExtensions {
    /// Infer the media kind from the file extension, case-insensitively.
    /// Files outside both lists are not media and yield `None`.
    pub fn kind_of(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if self.images.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(MediaKind::Image)
        } else if self.videos.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// How a file's identity is established for cache validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// `(path, size, mtime)`
    #[default]
    Metadata,
    /// blake3 digest of the file contents
    Content,
}

/// A media file discovered by a scan. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: SystemTime,
    pub kind: MediaKind,
}

impl MediaFile {
    /// Capture size and mtime of `path` right now.
    pub fn from_path(path: &Path, kind: MediaKind) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified_at: metadata.modified()?,
            kind,
        })
    }

    /// Modification time as nanoseconds since the epoch (0 for pre-epoch times)
    pub fn mtime_nanos(&self) -> u128 {
        self.modified_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }

    /// True when the file on disk still has the size and mtime captured by the scan
    pub fn is_unchanged_on_disk(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(metadata) => {
                metadata.len() == self.size
                    && metadata.modified().map(|m| m == self.modified_at).unwrap_or(false)
            }
            Err(_) => false,
        }
    }
}

/// The key deciding whether a cached fingerprint is still valid for a file.
///
/// Two files with equal identities are assumed to hold identical content, so
/// any change of size or mtime produces a different identity and a cache miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileIdentity {
    Metadata {
        path: PathBuf,
        size: u64,
        mtime_nanos: u128,
    },
    Content {
        digest: String,
    },
}

impl FileIdentity {
    pub fn of(file: &MediaFile, mode: IdentityMode) -> io::Result<Self> {
        match mode {
            IdentityMode::Metadata => Ok(Self::Metadata {
                path: file.path.clone(),
                size: file.size,
                mtime_nanos: file.mtime_nanos(),
            }),
            IdentityMode::Content => Ok(Self::Content {
                digest: content_digest(&file.path)?,
            }),
        }
    }

    /// Stable string form used as the key of the persistent table
    pub fn cache_key(&self) -> String {
        match self {
            Self::Metadata {
                path,
                size,
                mtime_nanos,
            } => format!("{}|{}|{}", path.to_string_lossy(), size, mtime_nanos),
            Self::Content { digest } => format!("blake3:{}", digest),
        }
    }

    /// The path this identity is bound to, if any
    pub fn bound_path(&self) -> Option<&Path> {
        match self {
            Self::Metadata { path, .. } => Some(path),
            Self::Content { .. } => None,
        }
    }
}

fn content_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_media_kind_from_extension() {
        let extensions = MediaExtensions::default();
        assert_eq!(extensions.kind_of(Path::new("a.jpg")), Some(MediaKind::Image));
        assert_eq!(extensions.kind_of(Path::new("a.TIFF")), Some(MediaKind::Image));
        assert_eq!(extensions.kind_of(Path::new("a.mkv")), Some(MediaKind::Video));
        assert_eq!(extensions.kind_of(Path::new("clip.3gp")), Some(MediaKind::Video));
        assert_eq!(extensions.kind_of(Path::new("a.mp3")), None);
        assert_eq!(extensions.kind_of(Path::new("noext")), None);
    }

    #[test]
    fn test_metadata_identity_changes_with_mtime() {
        let file = MediaFile {
            path: PathBuf::from("/media/a.png"),
            size: 10,
            modified_at: UNIX_EPOCH + Duration::from_secs(100),
            kind: MediaKind::Image,
        };
        let mut touched = file.clone();
        touched.modified_at = UNIX_EPOCH + Duration::from_secs(101);

        let a = FileIdentity::of(&file, IdentityMode::Metadata).unwrap();
        let b = FileIdentity::of(&touched, IdentityMode::Metadata).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "/media/a.png|10|100000000000");
    }

    #[test]
    fn test_content_identity_ignores_path() -> std::io::Result<()> {
        let dir = tempdir()?;
        let first = dir.path().join("one.png");
        let second = dir.path().join("two.png");
        for path in [&first, &second] {
            let mut f = File::create(path)?;
            f.write_all(b"same bytes")?;
        }

        let a = FileIdentity::of(&MediaFile::from_path(&first, MediaKind::Image)?, IdentityMode::Content)?;
        let b = FileIdentity::of(&MediaFile::from_path(&second, MediaKind::Image)?, IdentityMode::Content)?;
        assert_eq!(a, b);
        assert!(a.bound_path().is_none());
        Ok(())
    }
}
