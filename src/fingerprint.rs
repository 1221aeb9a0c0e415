use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 64-bit perceptual hash of an image or a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualHash(pub u64);

impl VisualHash {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        Some(Self(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)))
    }

    /// Number of differing bits
    pub fn hamming(&self, other: &Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for VisualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VisualHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid visual hash '{}'", s)))
    }
}

/// Averaged chroma features of an audio clip (one value per pitch class)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioVector(pub Vec<f32>);

impl AudioVector {
    /// Euclidean distance; vectors of different length are infinitely apart
    pub fn distance(&self, other: &Self) -> f32 {
        if self.0.len() != other.0.len() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// The signals available for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fingerprint {
    Visual(VisualHash),
    Audio(AudioVector),
    Both(VisualHash, AudioVector),
}

impl Fingerprint {
    pub fn visual(&self) -> Option<&VisualHash> {
        match self {
            Self::Visual(v) | Self::Both(v, _) => Some(v),
            Self::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioVector> {
        match self {
            Self::Audio(a) | Self::Both(_, a) => Some(a),
            Self::Visual(_) => None,
        }
    }

    pub fn from_parts(visual: Option<VisualHash>, audio: Option<AudioVector>) -> Option<Self> {
        match (visual, audio) {
            (Some(v), Some(a)) => Some(Self::Both(v, a)),
            (Some(v), None) => Some(Self::Visual(v)),
            (None, Some(a)) => Some(Self::Audio(a)),
            (None, None) => None,
        }
    }
}

/// Thresholds deciding when two fingerprints describe the same content
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityThresholds {
    /// Maximum Hamming distance (inclusive) between visual hashes
    pub max_hamming: u32,
    /// Audio vectors must be strictly closer than this
    pub audio_epsilon: f32,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            max_hamming: 4,
            audio_epsilon: 0.1,
        }
    }
}

/// Decide whether two fingerprints are duplicates.
///
/// When both files carry a visual hash and both carry an audio vector, the two
/// signals must agree. When only one signal is shared, it decides alone. When
/// no signal is shared the files are never duplicates.
pub fn is_similar(a: &Fingerprint, b: &Fingerprint, thresholds: &SimilarityThresholds) -> bool {
    let visual = match (a.visual(), b.visual()) {
        (Some(x), Some(y)) => Some(x.hamming(y) <= thresholds.max_hamming),
        _ => None,
    };
    let audio = match (a.audio(), b.audio()) {
        (Some(x), Some(y)) => Some(x.distance(y) < thresholds.audio_epsilon),
        _ => None,
    };

    match (visual, audio) {
        (Some(v), Some(a)) => v && a,
        (Some(v), None) => v,
        (None, Some(a)) => a,
        (None, None) => false,
    }
}

/// A fingerprint together with the media facts gathered while extracting it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl FingerprintRecord {
    pub fn pixel_count(&self) -> u64 {
        match (self.width, self.height) {
            (Some(w), Some(h)) => w as u64 * h as u64,
            _ => 0,
        }
    }
}
