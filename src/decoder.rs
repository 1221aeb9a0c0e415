use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use wait_timeout::ChildExt;

use crate::errors::DecodeError;

/// Side length of the grayscale frame requested from the decoder
pub const FRAME_SIZE: u32 = 64;

/// Sample rate of decoded audio clips (mono, f32 little-endian)
pub const AUDIO_SAMPLE_RATE: u32 = 22_050;

/// Stream facts of a video file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoProbe {
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Narrow interface over the external media decoder.
///
/// Implementations may shell out to a tool or call a native binding; the
/// extractor only relies on these three operations.
pub trait MediaDecoder: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoProbe, DecodeError>;

    /// Decode one grayscale frame at `at_secs`, scaled to `FRAME_SIZE` square
    fn decode_frame(&self, path: &Path, at_secs: f64) -> Result<DynamicImage, DecodeError>;

    /// Write the first `max_secs` of the audio track to `dest` as raw mono
    /// f32le samples at `AUDIO_SAMPLE_RATE`
    fn decode_audio_clip(&self, path: &Path, max_secs: f64, dest: &Path)
        -> Result<(), DecodeError>;
}

/// Decoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegOptions {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Ask ffmpeg for hardware-accelerated decoding
    pub hwaccel: bool,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            hwaccel: false,
        }
    }
}

/// `MediaDecoder` backed by the ffmpeg/ffprobe command line tools
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    options: FfmpegOptions,
    timeout: Duration,
}

impl FfmpegDecoder {
    pub fn new(options: FfmpegOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    /// Check if ffmpeg is installed and runnable
    pub fn is_available(&self) -> bool {
        Command::new(&self.options.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run a command to completion, killing it once the deadline passes.
    /// Only suitable for commands whose stdout fits in the pipe buffer.
    fn run_bounded(&self, mut command: Command) -> Result<Vec<u8>, DecodeError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: program.clone(),
                source,
            })?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _kill_error = child.kill();
                let _wait_error = child.wait();
                return Err(DecodeError::Timeout {
                    program,
                    timeout: self.timeout,
                });
            }
        };

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout)?;
        }

        if !status.success() {
            return Err(DecodeError::Failed {
                program,
                status: status.to_string(),
            });
        }
        Ok(stdout)
    }

    fn ffmpeg_command(&self) -> Command {
        let mut command = Command::new(&self.options.ffmpeg);
        command.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if self.options.hwaccel {
            command.args(["-hwaccel", "auto"]);
        }
        command
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn probe(&self, path: &Path) -> Result<VideoProbe, DecodeError> {
        let mut command = Command::new(&self.options.ffprobe);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type,width,height",
                "-of",
                "json",
            ])
            .arg(path);
        let output = self.run_bounded(command)?;
        parse_probe(&output)
    }

    fn decode_frame(&self, path: &Path, at_secs: f64) -> Result<DynamicImage, DecodeError> {
        let scale = format!("scale={}:{}", FRAME_SIZE, FRAME_SIZE);
        let mut command = self.ffmpeg_command();
        command
            .arg("-ss")
            .arg(format!("{:.3}", at_secs.max(0.0)))
            .arg("-i")
            .arg(path)
            .args([
                "-vf", &scale, "-vframes", "1", "-f", "rawvideo", "-pix_fmt", "gray", "-",
            ]);
        let raw = self.run_bounded(command)?;

        let expected = (FRAME_SIZE * FRAME_SIZE) as usize;
        if raw.len() < expected {
            return Err(DecodeError::BadOutput(format!(
                "expected {} frame bytes, got {}",
                expected,
                raw.len()
            )));
        }
        let frame = GrayImage::from_raw(FRAME_SIZE, FRAME_SIZE, raw[..expected].to_vec())
            .ok_or_else(|| DecodeError::BadOutput("frame buffer size mismatch".to_string()))?;
        Ok(DynamicImage::ImageLuma8(frame))
    }

    fn decode_audio_clip(
        &self,
        path: &Path,
        max_secs: f64,
        dest: &Path,
    ) -> Result<(), DecodeError> {
        let mut command = self.ffmpeg_command();
        command
            .arg("-y")
            .arg("-i")
            .arg(path)
            .arg("-t")
            .arg(format!("{:.3}", max_secs))
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(AUDIO_SAMPLE_RATE.to_string())
            .args(["-f", "f32le"])
            .arg(dest);
        self.run_bounded(command)?;
        Ok(())
    }
}

/// Parse `ffprobe -of json` output
fn parse_probe(output: &[u8]) -> Result<VideoProbe, DecodeError> {
    let json: serde_json::Value = serde_json::from_slice(output)
        .map_err(|e| DecodeError::BadOutput(format!("ffprobe JSON: {}", e)))?;

    // Duration might be stored as a string with float value
    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| json["format"]["duration"].as_f64())
        .filter(|d| d.is_finite() && *d > 0.0);

    let mut probe = VideoProbe {
        duration_secs,
        ..VideoProbe::default()
    };

    if let Some(streams) = json["streams"].as_array() {
        for stream in streams {
            match stream["codec_type"].as_str() {
                Some("video") if !probe.has_video => {
                    probe.has_video = true;
                    probe.width = stream["width"].as_u64().map(|w| w as u32);
                    probe.height = stream["height"].as_u64().map(|h| h as u32);
                }
                Some("audio") => probe.has_audio = true,
                _ => {}
            }
        }
    }

    Ok(probe)
}

/// Read raw f32le samples written by `decode_audio_clip`
pub fn read_f32le_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
