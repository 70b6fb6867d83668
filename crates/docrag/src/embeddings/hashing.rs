//! Deterministic encoders that need no model files
//!
//! Feature hashing for text and a color histogram for images. They keep the
//! pipeline usable offline and make tests reproducible; retrieval quality is
//! lexical rather than semantic.

use image::imageops::FilterType;

use super::{ImageEncoder, TextEncoder};
use crate::error::{Error, Result};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(FNV_PRIME))
}

/// Signed feature hashing over lowercase alphanumeric tokens
#[derive(Debug, Clone)]
pub struct HashingTextEncoder {
    dimensions: usize,
}

impl HashingTextEncoder {
    /// Create an encoder producing `dimensions`-wide vectors
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let mut any = false;

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            self.add(&mut v, token.to_lowercase().as_bytes());
            any = true;
        }

        if !any {
            // Text without tokens still needs a non-zero vector
            self.add(&mut v, b"\0");
        }

        v
    }

    fn add(&self, v: &mut [f32], token: &[u8]) {
        let hash = fnv1a(token);
        let idx = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;

        // Opposite-sign collisions can cancel out; a second bucket keeps the vector non-zero
        let idx2 = ((hash >> 32) % self.dimensions as u64) as usize;
        v[idx2] += 0.5;
    }
}

impl TextEncoder for HashingTextEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

/// RGB color histogram of a downscaled image
#[derive(Debug, Clone)]
pub struct HistogramImageEncoder {
    dimensions: usize,
}

impl HistogramImageEncoder {
    /// Create an encoder producing `dimensions`-wide vectors
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl ImageEncoder for HistogramImageEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, images: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
        images
            .iter()
            .map(|bytes| {
                let img = image::load_from_memory(bytes)
                    .map_err(|e| Error::embedding(format!("Failed to decode image: {}", e)))?
                    .resize(32, 32, FilterType::Triangle)
                    .to_rgb8();

                let mut v = vec![0.0f32; self.dimensions];
                for pixel in img.pixels() {
                    let [r, g, b] = pixel.0;
                    // 4 levels per channel
                    let bin = ((r >> 6) as u64) << 4 | ((g >> 6) as u64) << 2 | (b >> 6) as u64;
                    let idx = (fnv1a(&bin.to_le_bytes()) % self.dimensions as u64) as usize;
                    v[idx] += 1.0;
                }
                Ok(v)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, image::Rgb(color));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        dot / (super::super::l2_norm(a) * super::super::l2_norm(b))
    }

    #[test]
    fn test_text_encoding_is_deterministic() {
        let enc = HashingTextEncoder::new(64);
        let a = enc.encode(&["The capital of France is Paris."]).unwrap();
        let b = enc.encode(&["The capital of France is Paris."]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let enc = HashingTextEncoder::new(384);
        let v = enc
            .encode(&[
                "What is the capital of France?",
                "The capital of France is Paris.",
                "Rust ownership and borrowing rules.",
            ])
            .unwrap();
        assert!(cosine(&v[0], &v[1]) > cosine(&v[0], &v[2]));
    }

    #[test]
    fn test_empty_text_is_not_zero() {
        let enc = HashingTextEncoder::new(16);
        let v = enc.encode(&["", "   ...  "]).unwrap();
        assert!(v.iter().all(|x| super::super::l2_norm(x) > 0.0));
    }

    #[test]
    fn test_histogram_separates_colors() {
        let enc = HistogramImageEncoder::new(768);
        let (red, reddish, blue) = (png([255, 0, 0]), png([250, 5, 5]), png([0, 0, 255]));
        let v = enc.encode(&[&red[..], &reddish[..], &blue[..]]).unwrap();
        assert_eq!(v[0], v[1]);
        assert_ne!(v[0], v[2]);
    }

    #[test]
    fn test_garbage_image_is_an_embedding_error() {
        let enc = HistogramImageEncoder::new(8);
        assert!(matches!(enc.encode(&[b"nope".as_slice()]), Err(Error::Embedding(_))));
    }
}
