use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::media_file::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::resolution::DEFAULT_PREFERENCE_MARGIN;

/// Configuration structure for the .mediadeduprc file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DedupConfig {
    /// Maximum Hamming distance (out of 64 bits) for two visual hashes to match
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Audio chroma vectors must be closer than this to match
    #[serde(default = "default_audio_epsilon")]
    pub audio_epsilon: f32,

    /// Perceptual hash algorithm
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Also fingerprint the audio track of videos
    #[serde(default)]
    pub audio: bool,

    /// Seconds of audio taken from the start of each video
    #[serde(default = "default_audio_clip_secs")]
    pub audio_clip_secs: f64,

    /// Number of extraction workers
    #[serde(default)]
    pub parallel: Option<usize>,

    /// Upper bound in seconds for fingerprinting one file
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Location of the fingerprint cache
    #[serde(default)]
    pub cache_location: Option<PathBuf>,

    /// `metadata` (path, size, mtime) or `content` (blake3 of the bytes)
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Persist the cache after this many new fingerprints
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Which duplicate survives
    #[serde(default = "default_keep")]
    pub keep: String,

    /// Directories whose copies are preferred
    #[serde(default)]
    pub prefer: Vec<PathBuf>,

    /// Size gap in bytes under which a preferred copy wins
    #[serde(default = "default_preference_margin")]
    pub preference_margin: u64,

    /// Break ties in favour of names with longer digit runs
    #[serde(default)]
    pub prefer_numbered_names: bool,

    #[serde(default = "default_duration_bucket_secs")]
    pub duration_bucket_secs: f64,

    /// Width of an aspect-ratio band for files with known dimensions
    #[serde(default = "default_aspect_bucket_step")]
    pub aspect_bucket_step: f64,

    #[serde(default = "default_size_bucket_base")]
    pub size_bucket_base: u64,

    /// Files smaller than this are not scanned
    #[serde(default)]
    pub min_size: u64,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Default file exclude patterns
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,

    /// Ask ffmpeg for hardware-accelerated decoding
    #[serde(default)]
    pub hwaccel: bool,

    /// Default report format
    #[serde(default = "default_format")]
    pub format: String,

    /// Whether to show progress information during fingerprinting
    #[serde(default)]
    pub progress: bool,
}

fn default_threshold() -> u32 {
    4
}

fn default_audio_epsilon() -> f32 {
    0.1
}

fn default_algorithm() -> String {
    "phash".to_string()
}

fn default_audio_clip_secs() -> f64 {
    30.0
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_identity() -> String {
    "metadata".to_string()
}

fn default_flush_every() -> usize {
    100
}

fn default_keep() -> String {
    "largest".to_string()
}

fn default_preference_margin() -> u64 {
    DEFAULT_PREFERENCE_MARGIN
}

fn default_duration_bucket_secs() -> f64 {
    2.0
}

fn default_aspect_bucket_step() -> f64 {
    0.05
}

fn default_size_bucket_base() -> u64 {
    8
}

fn default_image_extensions() -> Vec<String> {
    IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_video_extensions() -> Vec<String> {
    VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_format() -> String {
    "json".to_string()
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            audio_epsilon: default_audio_epsilon(),
            algorithm: default_algorithm(),
            audio: false,
            audio_clip_secs: default_audio_clip_secs(),
            parallel: None,
            timeout_secs: default_timeout_secs(),
            cache_location: None,
            identity: default_identity(),
            flush_every: default_flush_every(),
            keep: default_keep(),
            prefer: Vec::new(),
            preference_margin: default_preference_margin(),
            prefer_numbered_names: false,
            duration_bucket_secs: default_duration_bucket_secs(),
            aspect_bucket_step: default_aspect_bucket_step(),
            size_bucket_base: default_size_bucket_base(),
            min_size: 0,
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
            exclude: Vec::new(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            hwaccel: false,
            format: default_format(),
            progress: false,
        }
    }
}

impl DedupConfig {
    /// Get the path to the user's config file
    pub fn get_config_path() -> Result<PathBuf> {
        let path = {
            #[cfg(not(target_family = "windows"))]
            {
                // Unix-style: ~/.mediadeduprc
                let home_dir = dirs::home_dir().context("Could not determine home directory")?;
                home_dir.join(".mediadeduprc")
            }

            #[cfg(target_family = "windows")]
            {
                // %APPDATA%\media-dedups\config.toml, or ~/.mediadeduprc without a config dir
                match dirs::config_dir() {
                    Some(config_dir) => config_dir.join("media-dedups").join("config.toml"),
                    None => dirs::home_dir()
                        .context("Could not determine home directory")?
                        .join(".mediadeduprc"),
                }
            }
        };

        log::debug!("Config path: {:?}, exists: {}", path, path.exists());
        Ok(path)
    }

    /// Default fingerprint cache directory
    pub fn default_cache_location() -> PathBuf {
        dirs::cache_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("media-dedups")
    }

    /// Load configuration from the .mediadeduprc file
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path. A missing file means defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: DedupConfig = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?;
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read config file: {:?}", path)),
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to_path(&config_path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Write a default configuration file if none exists. Returns whether one was written.
    pub fn create_default_if_not_exists() -> Result<bool> {
        let config_path = Self::get_config_path()?;
        if config_path.exists() {
            return Ok(false);
        }
        Self::default().save()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DedupConfig::default();
        assert_eq!(config.threshold, 4);
        assert_eq!(config.algorithm, "phash");
        assert_eq!(config.keep, "largest");
        assert_eq!(config.format, "json");
        assert_eq!(config.identity, "metadata");
        assert_eq!(config.flush_every, 100);
        assert_eq!(config.preference_margin, 3 * 1024 * 1024);
        assert!(config.exclude.is_empty());
        assert_eq!(config.parallel, None);
        assert!(!config.audio);
        assert!(config.video_extensions.contains(&"mkv".to_string()));
    }

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("nested/test_config.toml");

        let mut test_config = DedupConfig::default();
        test_config.algorithm = "dhash".to_string();
        test_config.parallel = Some(4);
        test_config.exclude = vec!["*tmp*".to_string()];
        test_config.prefer = vec![PathBuf::from("/photos/originals")];
        test_config.cache_location = Some(PathBuf::from("/var/cache/dedup"));

        test_config.save_to_path(&config_path)?;
        let loaded_config = DedupConfig::load_from_path(&config_path)?;
        assert_eq!(loaded_config, test_config);
        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, "threshold = 8\naudio = true\n")?;

        let config = DedupConfig::load_from_path(&config_path)?;
        assert_eq!(config.threshold, 8);
        assert!(config.audio);
        assert_eq!(config.algorithm, "phash");
        assert_eq!(config.audio_clip_secs, 30.0);
        Ok(())
    }

    #[test]
    fn test_missing_and_invalid_files() -> Result<()> {
        let temp_dir = tempdir()?;
        let missing = DedupConfig::load_from_path(&temp_dir.path().join("nope.toml"))?;
        assert_eq!(missing, DedupConfig::default());

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "threshold = \"many\"")?;
        assert!(DedupConfig::load_from_path(&broken).is_err());
        Ok(())
    }
}
