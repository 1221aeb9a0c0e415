use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use image::GenericImageView;
use serde::{Deserialize, Serialize};

use crate::audio_fingerprint::audio_vector_of;
use crate::decoder::MediaDecoder;
use crate::errors::{DecodeError, ExtractionError};
use crate::fingerprint::{Fingerprint, FingerprintRecord, VisualHash};
use crate::media_file::{MediaFile, MediaKind};
use crate::visual_fingerprint::{hash_image, HashAlgorithm};

/// How fingerprints are computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorOptions {
    pub algorithm: HashAlgorithm,
    /// Also fingerprint the audio track of videos
    pub audio: bool,
    /// Length of the audio clip taken from the start of a video
    pub audio_clip_secs: f64,
    /// Upper bound for fingerprinting a single file
    pub timeout: Duration,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            audio: false,
            audio_clip_secs: 30.0,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Turns a media file into a `FingerprintRecord`
pub struct FingerprintExtractor {
    decoder: Arc<dyn MediaDecoder>,
    options: ExtractorOptions,
}

impl FingerprintExtractor {
    pub fn new(decoder: Arc<dyn MediaDecoder>, options: ExtractorOptions) -> Self {
        Self { decoder, options }
    }

    /// Name of the fingerprint flavour, e.g. `phash` or `phash+chroma30`.
    /// Records computed under different profiles are never compared.
    pub fn profile(&self) -> String {
        if self.options.audio {
            format!(
                "{}+chroma{}",
                self.options.algorithm,
                self.options.audio_clip_secs.round() as u64
            )
        } else {
            self.options.algorithm.to_string()
        }
    }

    /// Fingerprint one file. Pure with respect to the file's content.
    pub fn extract(&self, file: &MediaFile) -> Result<FingerprintRecord, ExtractionError> {
        match file.kind {
            MediaKind::Image => self.extract_image(file),
            MediaKind::Video => self.extract_video(file),
        }
    }

    /// Like `extract`, but gives up once the configured timeout has passed.
    ///
    /// The work runs on its own thread; a timed out extraction is abandoned
    /// and its decoder processes are reaped by their own deadlines.
    pub fn extract_with_timeout(
        self: &Arc<Self>,
        file: &MediaFile,
    ) -> Result<FingerprintRecord, ExtractionError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let extractor = Arc::clone(self);
        let job = file.clone();
        thread::Builder::new()
            .name("fingerprint".to_string())
            .spawn(move || {
                let _ = tx.send(extractor.extract(&job));
            })
            .map_err(|source| ExtractionError::Unreadable {
                path: file.path.clone(),
                source,
            })?;

        match rx.recv_timeout(self.options.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ExtractionError::TimedOut {
                path: file.path.clone(),
                timeout: self.options.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ExtractionError::Unusable {
                path: file.path.clone(),
                reason: "fingerprinting thread terminated unexpectedly".to_string(),
            }),
        }
    }

    fn extract_image(&self, file: &MediaFile) -> Result<FingerprintRecord, ExtractionError> {
        let bytes = fs::read(&file.path).map_err(|source| ExtractionError::Unreadable {
            path: file.path.clone(),
            source,
        })?;
        let img = image::load_from_memory(&bytes).map_err(|source| ExtractionError::Image {
            path: file.path.clone(),
            source,
        })?;

        let (width, height) = img.dimensions();
        let hash = self.hash(file, &img)?;

        Ok(FingerprintRecord {
            fingerprint: Fingerprint::Visual(hash),
            duration_secs: None,
            width: Some(width),
            height: Some(height),
        })
    }

    fn extract_video(&self, file: &MediaFile) -> Result<FingerprintRecord, ExtractionError> {
        let decode_err = |source: DecodeError| ExtractionError::Decode {
            path: file.path.clone(),
            source,
        };

        let probe = self.decoder.probe(&file.path).map_err(decode_err)?;
        if !probe.has_video && !probe.has_audio {
            return Err(ExtractionError::Unusable {
                path: file.path.clone(),
                reason: "no decodable streams".to_string(),
            });
        }

        let visual = if probe.has_video {
            // the midpoint avoids intros and fades; unknown durations use the first frame
            let at_secs = probe.duration_secs.map(|d| d / 2.0).unwrap_or(0.0);
            self.decoder
                .decode_frame(&file.path, at_secs)
                .map_err(decode_err)
                .and_then(|frame| self.hash(file, &frame))
        } else {
            Err(decode_err(DecodeError::NoVideoTrack))
        };

        let audio = if self.options.audio && probe.has_audio {
            match audio_vector_of(self.decoder.as_ref(), &file.path, self.options.audio_clip_secs)
            {
                Ok(vector) => Some(vector),
                Err(e) => {
                    log::warn!("No audio fingerprint for {:?}: {}", file.path, e);
                    None
                }
            }
        } else {
            if self.options.audio {
                log::debug!("{:?} has no audio track, using the frame only", file.path);
            }
            None
        };

        let fingerprint = match (visual, audio) {
            (Ok(hash), audio) => Fingerprint::from_parts(Some(hash), audio),
            (Err(e), Some(audio)) => {
                log::warn!("Frame decode failed for {:?}, using audio only: {}", file.path, e);
                Some(Fingerprint::Audio(audio))
            }
            (Err(e), None) => return Err(e),
        };
        let fingerprint = fingerprint.ok_or_else(|| ExtractionError::Unusable {
            path: file.path.clone(),
            reason: "no fingerprint signal".to_string(),
        })?;

        Ok(FingerprintRecord {
            fingerprint,
            duration_secs: probe.duration_secs,
            width: probe.width,
            height: probe.height,
        })
    }

    fn hash(
        &self,
        file: &MediaFile,
        img: &image::DynamicImage,
    ) -> Result<VisualHash, ExtractionError> {
        hash_image(img, self.options.algorithm).ok_or_else(|| ExtractionError::Unusable {
            path: file.path.clone(),
            reason: "pixel buffer rejected by the hasher".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::VideoProbe;
    use image::{DynamicImage, GrayImage, Luma};
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeDecoder {
        probe: VideoProbe,
        frame_fails: bool,
        stall: Option<Duration>,
    }

    impl MediaDecoder for FakeDecoder {
        fn probe(&self, _path: &Path) -> Result<VideoProbe, DecodeError> {
            if let Some(stall) = self.stall {
                thread::sleep(stall);
            }
            Ok(self.probe.clone())
        }

        fn decode_frame(&self, _path: &Path, _at: f64) -> Result<DynamicImage, DecodeError> {
            if self.frame_fails {
                return Err(DecodeError::BadOutput("corrupt frame".to_string()));
            }
            Ok(DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
                Luma([((x * 4) ^ (y * 4)) as u8])
            })))
        }

        fn decode_audio_clip(&self, _path: &Path, secs: f64, dest: &Path) -> Result<(), DecodeError> {
            let n = (22_050.0 * secs) as usize;
            let bytes: Vec<u8> = (0..n)
                .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 22_050.0).sin())
                .flat_map(|s| s.to_le_bytes())
                .collect();
            fs::write(dest, bytes)?;
            Ok(())
        }
    }

    fn video(path: &str) -> MediaFile {
        MediaFile {
            path: PathBuf::from(path),
            size: 1_000,
            modified_at: UNIX_EPOCH,
            kind: MediaKind::Video,
        }
    }

    fn with_tracks(video: bool, audio: bool) -> VideoProbe {
        VideoProbe {
            duration_secs: Some(10.0),
            width: Some(1280),
            height: Some(720),
            has_video: video,
            has_audio: audio,
        }
    }

    fn extractor(decoder: FakeDecoder, audio: bool) -> Arc<FingerprintExtractor> {
        Arc::new(FingerprintExtractor::new(
            Arc::new(decoder),
            ExtractorOptions {
                audio,
                audio_clip_secs: 1.0,
                timeout: Duration::from_secs(5),
                ..ExtractorOptions::default()
            },
        ))
    }

    #[test]
    fn test_profile_names() {
        let plain = extractor(FakeDecoder::default(), false);
        assert_eq!(plain.profile(), "phash");
        let with_audio = extractor(FakeDecoder::default(), true);
        assert_eq!(with_audio.profile(), "phash+chroma1");
    }

    #[test]
    fn test_video_with_audio_gets_both_signals() {
        let decoder = FakeDecoder {
            probe: with_tracks(true, true),
            ..FakeDecoder::default()
        };
        let record = extractor(decoder, true).extract(&video("a.mp4")).unwrap();
        assert!(matches!(record.fingerprint, Fingerprint::Both(_, _)));
        assert_eq!(record.duration_secs, Some(10.0));
        assert_eq!(record.pixel_count(), 1280 * 720);
    }

    #[test]
    fn test_missing_audio_track_falls_back_to_visual() {
        let decoder = FakeDecoder {
            probe: with_tracks(true, false),
            ..FakeDecoder::default()
        };
        let record = extractor(decoder, true).extract(&video("a.mp4")).unwrap();
        assert!(matches!(record.fingerprint, Fingerprint::Visual(_)));
    }

    #[test]
    fn test_broken_frame_uses_audio_or_fails() {
        let decoder = FakeDecoder {
            probe: with_tracks(true, true),
            frame_fails: true,
            ..FakeDecoder::default()
        };
        let record = extractor(decoder, true).extract(&video("a.mp4")).unwrap();
        assert!(matches!(record.fingerprint, Fingerprint::Audio(_)));

        let decoder = FakeDecoder {
            probe: with_tracks(true, true),
            frame_fails: true,
            ..FakeDecoder::default()
        };
        let err = extractor(decoder, false).extract(&video("a.mp4")).unwrap_err();
        assert!(matches!(err, ExtractionError::Decode { .. }));
        assert_eq!(err.path(), &PathBuf::from("a.mp4"));
    }

    #[test]
    fn test_timeout_is_reported() {
        let decoder = FakeDecoder {
            probe: with_tracks(true, false),
            stall: Some(Duration::from_millis(500)),
            ..FakeDecoder::default()
        };
        let extractor = Arc::new(FingerprintExtractor::new(
            Arc::new(decoder),
            ExtractorOptions {
                timeout: Duration::from_millis(50),
                ..ExtractorOptions::default()
            },
        ));
        let err = extractor.extract_with_timeout(&video("slow.mp4")).unwrap_err();
        assert!(matches!(err, ExtractionError::TimedOut { .. }));
    }

    #[test]
    fn test_image_extraction_and_corrupt_image() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.png");
        let img = GrayImage::from_fn(32, 16, |x, _| Luma([(x * 8) as u8]));
        img.save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        fs::write(&bad, b"definitely not a png").unwrap();

        let extractor = extractor(FakeDecoder::default(), false);
        let file = |path: &Path| MediaFile {
            path: path.to_path_buf(),
            size: fs::metadata(path).unwrap().len(),
            modified_at: SystemTime::now(),
            kind: MediaKind::Image,
        };

        let record = extractor.extract_with_timeout(&file(&good)).unwrap();
        assert_eq!((record.width, record.height), (Some(32), Some(16)));
        assert!(matches!(record.fingerprint, Fingerprint::Visual(_)));

        assert!(matches!(
            extractor.extract(&file(&bad)),
            Err(ExtractionError::Image { .. })
        ));
    }
}
