use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Width of the difference hash produced by [`FingerprintService`].
pub const FINGERPRINT_BITS: usize = 64;

/// Bits per row and rows. The gradient hash resizes to one extra column so
/// every row yields eight left/right comparisons (9x8 grid).
const HASH_WIDTH: u32 = 8;
const HASH_HEIGHT: u32 = 8;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Fingerprint widths differ: {left} vs {right} bits")]
    WidthMismatch { left: usize, right: usize },

    #[error("Invalid fingerprint encoding: {message}")]
    InvalidEncoding { message: String },
}

/// Fixed-width perceptual fingerprint of a photo's pixel content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FingerprintError> {
        if bytes.is_empty() {
            return Err(FingerprintError::InvalidEncoding {
                message: "fingerprint has no bits".to_string(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn bit_width(&self) -> usize {
        self.0.len() * 8
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{:02x}", byte)).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Self, FingerprintError> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 {
            return Err(FingerprintError::InvalidEncoding {
                message: format!("odd number of hex digits ({})", hex.len()),
            });
        }
        if !hex.is_ascii() {
            return Err(FingerprintError::InvalidEncoding {
                message: "non-ASCII characters".to_string(),
            });
        }

        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| {
                    FingerprintError::InvalidEncoding {
                        message: format!("invalid hex digits {:?}", &hex[i..i + 2]),
                    }
                })
            })
            .collect::<Result<Vec<u8>, _>>()?;

        Self::from_bytes(bytes)
    }

    /// Hamming distance. Only fingerprints of equal width are comparable.
    pub fn distance(&self, other: &Fingerprint) -> Result<u32, FingerprintError> {
        if self.0.len() != other.0.len() {
            return Err(FingerprintError::WidthMismatch {
                left: self.bit_width(),
                right: other.bit_width(),
            });
        }

        Ok(self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }

    /// `1 - distance / bit_width`, always within [0, 1].
    pub fn similarity(&self, other: &Fingerprint) -> Result<f64, FingerprintError> {
        let distance = self.distance(other)?;
        Ok(1.0 - distance as f64 / self.bit_width() as f64)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Computes difference-hash fingerprints.
///
/// The image is reduced to a 9x8 grayscale grid and every row emits one bit
/// per adjacent pixel pair (left brighter than right), giving 64 bits.
pub struct FingerprintService {
    hasher: Hasher,
}

impl FingerprintService {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(HASH_WIDTH, HASH_HEIGHT)
            .to_hasher();

        Self { hasher }
    }

    pub fn fingerprint(&self, image: &DynamicImage) -> Fingerprint {
        // The gradient hash sets a bit when the right pixel is brighter;
        // complement it so a set bit means the left pixel is brighter.
        let bits = self.hasher.hash_image(image);
        Fingerprint(bits.as_bytes().iter().map(|byte| !byte).collect())
    }

    /// Decode an encoded image (JPEG, PNG, ...) and fingerprint it.
    pub fn fingerprint_bytes(&self, bytes: &[u8]) -> Result<Fingerprint, FingerprintError> {
        let image = image::load_from_memory(bytes)?;
        Ok(self.fingerprint(&image))
    }

    pub fn fingerprint_file(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.fingerprint(&image))
    }
}

impl Default for FingerprintService {
    fn default() -> Self {
        Self::new()
    }
}
