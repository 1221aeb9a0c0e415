use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A path could not be enumerated or inspected during the scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("root directory {path:?} does not exist")]
    RootMissing { path: PathBuf },

    #[error("root path {path:?} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("cannot read {path:?}: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error walking directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// The external decoder failed to produce a frame, an audio clip or stream info.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exceeded its {timeout:?} deadline")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    #[error("unexpected decoder output: {0}")]
    BadOutput(String),

    #[error("no audio track")]
    NoAudioTrack,

    #[error("no video track")]
    NoVideoTrack,

    #[error("i/o error while decoding: {0}")]
    Io(#[from] io::Error),
}

/// Fingerprinting a single file failed. Never fatal for the batch.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{path:?}: cannot read file: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?}: cannot decode image: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("{path:?}: extraction did not finish within {timeout:?}")]
    TimedOut { path: PathBuf, timeout: Duration },

    #[error("{path:?}: {reason}")]
    Unusable { path: PathBuf, reason: String },
}

impl ExtractionError {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Unreadable { path, .. }
            | Self::Image { path, .. }
            | Self::Decode { path, .. }
            | Self::TimedOut { path, .. }
            | Self::Unusable { path, .. } => path,
        }
    }
}

/// The durable fingerprint store could not be read or written.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("cannot create cache directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read cache file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write cache file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot serialize cache entries: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Removing (or relocating) one file of a cluster failed.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path:?} changed since it was fingerprinted")]
    Changed { path: PathBuf },

    #[error("kept file {path:?} is no longer present")]
    KeepMissing { path: PathBuf },
}
