//! Chroma features computed from decoded PCM samples.
//!
//! Each STFT frame's power spectrum is folded onto the 12 pitch classes
//! (C = 0 .. B = 11), normalised by the frame's strongest class, and the
//! frames are averaged into a single vector with values in `[0, 1]`.

use std::fs;
use std::path::Path;

use rustfft::{num_complex::Complex, FftPlanner};

use crate::decoder::{read_f32le_samples, MediaDecoder, AUDIO_SAMPLE_RATE};
use crate::errors::DecodeError;
use crate::fingerprint::AudioVector;

pub const CHROMA_BINS: usize = 12;

const N_FFT: usize = 2048;
const HOP_LENGTH: usize = 512;
const MIN_FREQ: f32 = 32.7; // C1
const MAX_FREQ: f32 = 5_000.0;
const SILENCE_FLOOR: f32 = 1e-10;

pub fn chroma_vector(samples: &[f32], sample_rate: u32) -> AudioVector {
    let bin_classes = pitch_class_map(sample_rate);
    let window = hann_window(N_FFT);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(N_FFT);

    let mut sum = [0f32; CHROMA_BINS];
    let mut frames = 0usize;
    let mut buffer = vec![Complex::new(0.0, 0.0); N_FFT];

    let mut start = 0;
    loop {
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = samples.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * window[i], 0.0);
        }
        fft.process(&mut buffer);

        let mut energy = [0f32; CHROMA_BINS];
        for (bin, class) in bin_classes.iter().enumerate() {
            if let Some(class) = class {
                energy[*class] += buffer[bin].norm_sqr();
            }
        }
        let peak = energy.iter().cloned().fold(0f32, f32::max);
        if peak > SILENCE_FLOOR {
            for (acc, e) in sum.iter_mut().zip(energy.iter()) {
                *acc += e / peak;
            }
        }
        frames += 1;

        start += HOP_LENGTH;
        if start + N_FFT > samples.len() {
            break;
        }
    }

    AudioVector(sum.iter().map(|s| s / frames as f32).collect())
}

/// Decode the first `clip_secs` of the audio track and reduce it to chroma.
///
/// The clip goes through a uniquely named temporary file which is removed on
/// every exit path, so concurrent extractions never share scratch space.
pub fn audio_vector_of(
    decoder: &dyn MediaDecoder,
    path: &Path,
    clip_secs: f64,
) -> Result<AudioVector, DecodeError> {
    let scratch = tempfile::Builder::new()
        .prefix("media-dedups-audio-")
        .suffix(".f32")
        .tempfile()?;

    decoder.decode_audio_clip(path, clip_secs, scratch.path())?;
    let bytes = fs::read(scratch.path())?;
    let samples = read_f32le_samples(&bytes);
    if samples.is_empty() {
        return Err(DecodeError::NoAudioTrack);
    }

    log::trace!("Decoded {} audio samples from {:?}", samples.len(), path);
    Ok(chroma_vector(&samples, AUDIO_SAMPLE_RATE))
}

/// Pitch class of each FFT bin below Nyquist, `None` outside the tracked range
fn pitch_class_map(sample_rate: u32) -> Vec<Option<usize>> {
    (0..=N_FFT / 2)
        .map(|bin| {
            let freq = bin as f32 * sample_rate as f32 / N_FFT as f32;
            if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
                return None;
            }
            // semitones relative to A4, shifted so that C is class 0
            let semitones = (12.0 * (freq / 440.0).log2()).round() as i32;
            Some((semitones + 9).rem_euclid(CHROMA_BINS as i32) as usize)
        })
        .collect()
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / len as f32;
            0.5 - 0.5 * phase.cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22_050;

    fn tone(freq: f32, amplitude: f32, secs: f32) -> Vec<f32> {
        let n = (SR as f32 * secs) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn argmax(v: &AudioVector) -> usize {
        v.0.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_a440_lands_in_class_a() {
        let chroma = chroma_vector(&tone(440.0, 0.8, 1.0), SR);
        assert_eq!(chroma.0.len(), CHROMA_BINS);
        assert_eq!(argmax(&chroma), 9);
    }

    #[test]
    fn test_loudness_does_not_matter() {
        let loud = chroma_vector(&tone(440.0, 0.9, 1.0), SR);
        let quiet = chroma_vector(&tone(440.0, 0.2, 1.0), SR);
        assert!(loud.distance(&quiet) < 0.01);
    }

    #[test]
    fn test_different_notes_are_far_apart() {
        let a = chroma_vector(&tone(440.0, 0.8, 1.0), SR);
        let c = chroma_vector(&tone(261.63, 0.8, 1.0), SR);
        assert_eq!(argmax(&c), 0);
        assert!(a.distance(&c) > 0.1);
    }

    struct ToneDecoder {
        freq: Option<f32>,
    }

    impl MediaDecoder for ToneDecoder {
        fn probe(&self, _path: &Path) -> Result<crate::decoder::VideoProbe, DecodeError> {
            Ok(Default::default())
        }

        fn decode_frame(&self, _path: &Path, _at: f64) -> Result<image::DynamicImage, DecodeError> {
            Err(DecodeError::NoVideoTrack)
        }

        fn decode_audio_clip(&self, _path: &Path, secs: f64, dest: &Path) -> Result<(), DecodeError> {
            let bytes: Vec<u8> = match self.freq {
                Some(freq) => tone(freq, 0.5, secs as f32)
                    .iter()
                    .flat_map(|s| s.to_le_bytes())
                    .collect(),
                None => Vec::new(),
            };
            fs::write(dest, bytes)?;
            Ok(())
        }
    }

    #[test]
    fn test_audio_vector_from_decoder() {
        let decoder = ToneDecoder { freq: Some(440.0) };
        let vector = audio_vector_of(&decoder, Path::new("clip.mp4"), 1.0).unwrap();
        assert_eq!(argmax(&vector), 9);

        let silent = ToneDecoder { freq: None };
        assert!(matches!(
            audio_vector_of(&silent, Path::new("clip.mp4"), 1.0),
            Err(DecodeError::NoAudioTrack)
        ));
    }

    /// Writes a tone to `dest`, remembers where, and optionally fails after
    /// writing, as a decoder that dies half way through would.
    struct ScratchRecorder {
        fail: bool,
        seen: std::sync::Mutex<Vec<std::path::PathBuf>>,
        rendezvous: Option<std::sync::Barrier>,
    }

    impl ScratchRecorder {
        fn new(fail: bool, rendezvous: Option<std::sync::Barrier>) -> Self {
            Self {
                fail,
                seen: std::sync::Mutex::new(Vec::new()),
                rendezvous,
            }
        }

        fn seen(&self) -> Vec<std::path::PathBuf> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl MediaDecoder for ScratchRecorder {
        fn probe(&self, _path: &Path) -> Result<crate::decoder::VideoProbe, DecodeError> {
            Ok(Default::default())
        }

        fn decode_frame(&self, _path: &Path, _at: f64) -> Result<image::DynamicImage, DecodeError> {
            Err(DecodeError::NoVideoTrack)
        }

        fn decode_audio_clip(&self, _path: &Path, secs: f64, dest: &Path) -> Result<(), DecodeError> {
            let bytes: Vec<u8> = tone(440.0, 0.5, secs as f32)
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect();
            fs::write(dest, bytes)?;
            self.seen.lock().unwrap().push(dest.to_path_buf());
            if let Some(barrier) = &self.rendezvous {
                // both scratch files exist at this point
                barrier.wait();
            }
            if self.fail {
                return Err(DecodeError::BadOutput("truncated stream".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_scratch_file_removed_after_failed_decode() {
        let decoder = ScratchRecorder::new(true, None);
        let result = audio_vector_of(&decoder, Path::new("clip.mp4"), 0.5);
        assert!(matches!(result, Err(DecodeError::BadOutput(_))));

        let seen = decoder.seen();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_scratch_file_removed_after_successful_decode() {
        let decoder = ScratchRecorder::new(false, None);
        let vector = audio_vector_of(&decoder, Path::new("clip.mp4"), 0.5).unwrap();
        assert_eq!(argmax(&vector), 9);

        let seen = decoder.seen();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_concurrent_decodes_use_distinct_scratch_files() {
        let decoder = ScratchRecorder::new(false, Some(std::sync::Barrier::new(2)));
        std::thread::scope(|scope| {
            let a = scope.spawn(|| audio_vector_of(&decoder, Path::new("a.mp4"), 0.5));
            let b = scope.spawn(|| audio_vector_of(&decoder, Path::new("b.mp4"), 0.5));
            assert!(a.join().unwrap().is_ok());
            assert!(b.join().unwrap().is_ok());
        });

        let seen = decoder.seen();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
        assert!(seen.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_silence_and_short_input() {
        let silent = chroma_vector(&vec![0.0; 4096], SR);
        assert!(silent.0.iter().all(|v| *v == 0.0));

        let short = chroma_vector(&tone(440.0, 0.5, 0.01), SR);
        assert_eq!(short.0.len(), CHROMA_BINS);
        let empty = chroma_vector(&[], SR);
        assert!(empty.0.iter().all(|v| *v == 0.0));
    }
}
