use image::DynamicImage;
use img_hash::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};

use crate::fingerprint::VisualHash;

/// Perceptual hashing algorithms, both producing 64-bit hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// DCT-based hash: robust to resizing and recompression
    #[default]
    PHash,
    /// Gradient (difference) hash: cheaper, slightly less robust
    DHash,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PHash => "phash",
            Self::DHash => "dhash",
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "phash" => Ok(Self::PHash),
            "dhash" => Ok(Self::DHash),
            other => Err(format!("unknown hash algorithm '{}' (expected phash|dhash)", other)),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Compute the perceptual hash of a decoded bitmap.
///
/// Returns `None` only if the pixel buffer cannot be handed to the hasher.
pub fn hash_image(img: &DynamicImage, algorithm: HashAlgorithm) -> Option<VisualHash> {
    let config = HasherConfig::new().hash_size(8, 8);
    let hasher = match algorithm {
        HashAlgorithm::PHash => config.hash_alg(HashAlg::Mean).preproc_dct().to_hasher(),
        HashAlgorithm::DHash => config.hash_alg(HashAlg::Gradient).to_hasher(),
    };

    // img_hash is built against its own `image` version, so hand the pixels
    // over through a raw buffer
    let img_hash_img = {
        let rgba8 = img.to_rgba8();
        let width = rgba8.width();
        let height = rgba8.height();
        let buffer = img_hash::image::ImageBuffer::from_raw(width, height, rgba8.into_raw())?;
        img_hash::image::DynamicImage::ImageRgba8(buffer)
    };

    let hash = hasher.hash_image(&img_hash_img);
    VisualHash::from_bytes(hash.as_bytes())
}
