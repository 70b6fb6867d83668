//! Text and image embeddings fused into one fixed-width vector
//!
//! Every stored vector is `text ++ image` where the text part comes from a
//! sentence-embedding model and the image part from a joint image/text
//! model. Pages without images get a zero image part, and queries are
//! embedded the same way, so one k-NN index serves both kinds of chunk.

pub mod clip;
pub mod hashing;
pub mod onnx_embedder;

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{Error, Result};

pub use clip::OnnxImageEncoder;
pub use hashing::{HashingTextEncoder, HistogramImageEncoder};
pub use onnx_embedder::OnnxTextEncoder;

/// Maps texts to fixed-width vectors
pub trait TextEncoder: Send + Sync {
    /// Output width
    fn dimensions(&self) -> usize;

    /// Encode a batch, one vector per input
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Maps encoded images (PNG/JPEG bytes) to fixed-width vectors
pub trait ImageEncoder: Send + Sync {
    /// Output width
    fn dimensions(&self) -> usize;

    /// Encode a batch, one vector per input
    fn encode(&self, images: &[&[u8]]) -> Result<Vec<Vec<f32>>>;
}

/// Combines a text encoder and an optional image encoder
pub struct EmbeddingFuser {
    text: Arc<dyn TextEncoder>,
    image: Option<Arc<dyn ImageEncoder>>,
    image_dimensions: usize,
}

impl std::fmt::Debug for EmbeddingFuser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingFuser")
            .field("text_dimensions", &self.text.dimensions())
            .field("image_dimensions", &self.image_dimensions)
            .field("images", &self.image.is_some())
            .finish()
    }
}

impl EmbeddingFuser {
    /// Create a fuser. The image part is always `image_dimensions` wide,
    /// with or without an image encoder.
    pub fn new(
        text: Arc<dyn TextEncoder>,
        image: Option<Arc<dyn ImageEncoder>>,
        image_dimensions: usize,
    ) -> Result<Self> {
        if text.dimensions() == 0 || image_dimensions == 0 {
            return Err(Error::Config("embedding dimensions must be > 0".to_string()));
        }
        if let Some(encoder) = &image {
            if encoder.dimensions() != image_dimensions {
                return Err(Error::Config(format!(
                    "image encoder produces {} dimensions, configured {}",
                    encoder.dimensions(),
                    image_dimensions
                )));
            }
        }

        Ok(Self {
            text,
            image,
            image_dimensions,
        })
    }

    /// Offline fuser backed by the hashing encoders
    pub fn hashing(config: &EmbeddingConfig) -> Self {
        let image: Option<Arc<dyn ImageEncoder>> = if config.enable_images {
            Some(Arc::new(HistogramImageEncoder::new(config.image_dimensions)))
        } else {
            None
        };

        Self {
            text: Arc::new(HashingTextEncoder::new(config.text_dimensions)),
            image,
            image_dimensions: config.image_dimensions,
        }
    }

    /// Build the encoders named by the configuration, downloading models on first use.
    ///
    /// A missing or broken image model leaves the fuser text-only rather than
    /// failing; the text model is required.
    pub async fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        match config.backend {
            EmbeddingBackend::Hashing => Ok(Self::hashing(config)),
            EmbeddingBackend::Onnx => {
                let text = OnnxTextEncoder::new(config).await?;

                let image: Option<Arc<dyn ImageEncoder>> = if config.enable_images {
                    match OnnxImageEncoder::new(config).await {
                        Ok(encoder) => Some(Arc::new(encoder)),
                        Err(e) => {
                            tracing::warn!("Image encoder unavailable, continuing text-only: {}", e);
                            None
                        }
                    }
                } else {
                    None
                };

                Self::new(Arc::new(text), image, config.image_dimensions)
            }
        }
    }

    /// Width of every fused vector
    pub fn dimensions(&self) -> usize {
        self.text.dimensions() + self.image_dimensions
    }

    /// Width of the text part
    pub fn text_dimensions(&self) -> usize {
        self.text.dimensions()
    }

    /// Width of the image part
    pub fn image_dimensions(&self) -> usize {
        self.image_dimensions
    }

    /// Whether page images can be embedded
    pub fn supports_images(&self) -> bool {
        self.image.is_some()
    }

    /// Unit-length text embedding
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text])?
            .pop()
            .ok_or_else(|| Error::embedding("Empty embedding result"))
    }

    /// Unit-length text embeddings, one per input
    pub fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.text.encode(texts)?;
        if vectors.len() != texts.len() {
            return Err(Error::embedding(format!(
                "text encoder returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }

        vectors
            .into_iter()
            .map(|v| {
                check_width(&v, self.text.dimensions())?;
                normalize(v)
            })
            .collect()
    }

    /// Mean of the unit-length image embeddings, re-normalized.
    ///
    /// `None` when there are no images or no image encoder.
    pub fn embed_images(&self, images: &[Vec<u8>]) -> Result<Option<Vec<f32>>> {
        let Some(encoder) = &self.image else {
            return Ok(None);
        };
        if images.is_empty() {
            return Ok(None);
        }

        let refs: Vec<&[u8]> = images.iter().map(Vec::as_slice).collect();
        let vectors = encoder.encode(&refs)?;
        if vectors.len() != images.len() {
            return Err(Error::embedding(format!(
                "image encoder returned {} vectors for {} images",
                vectors.len(),
                images.len()
            )));
        }

        let mut mean = vec![0.0f32; self.image_dimensions];
        for v in vectors {
            check_width(&v, self.image_dimensions)?;
            for (acc, x) in mean.iter_mut().zip(normalize(v)?) {
                *acc += x;
            }
        }

        let count = images.len() as f32;
        mean.iter_mut().for_each(|x| *x /= count);

        let norm = l2_norm(&mean);
        if norm > f32::EPSILON {
            mean.iter_mut().for_each(|x| *x /= norm);
        }

        Ok(Some(mean))
    }

    /// Concatenate a text embedding with an image embedding or zeros
    pub fn fuse(&self, text: &[f32], image: Option<&[f32]>) -> Result<Vec<f32>> {
        check_width(text, self.text.dimensions())?;

        let mut fused = Vec::with_capacity(self.dimensions());
        fused.extend_from_slice(text);
        match image {
            Some(image) => {
                check_width(image, self.image_dimensions)?;
                fused.extend_from_slice(image);
            }
            None => fused.resize(self.dimensions(), 0.0),
        }

        Ok(fused)
    }

    /// Query vector in the same space as stored chunks
    pub fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        let text = self.embed_text(question)?;
        self.fuse(&text, None)
    }
}

static GLOBAL_FUSER: OnceCell<Arc<EmbeddingFuser>> = OnceCell::const_new();

/// Process-wide fuser, built from `config` on the first call.
///
/// Models are loaded once and shared read-only afterwards; later calls
/// return the same instance regardless of the configuration passed.
pub async fn global_fuser(config: &EmbeddingConfig) -> Result<Arc<EmbeddingFuser>> {
    GLOBAL_FUSER
        .get_or_try_init(|| async {
            let fuser = EmbeddingFuser::from_config(config).await?;
            tracing::info!(
                "Embedding models ready ({} dims, images: {})",
                fuser.dimensions(),
                fuser.supports_images()
            );
            Ok::<_, Error>(Arc::new(fuser))
        })
        .await
        .cloned()
}

fn check_width(v: &[f32], expected: usize) -> Result<()> {
    if v.len() != expected {
        return Err(Error::embedding(format!(
            "expected {} dimensions, encoder produced {}",
            expected,
            v.len()
        )));
    }
    Ok(())
}

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length; zero or non-finite vectors are an error
fn normalize(mut v: Vec<f32>) -> Result<Vec<f32>> {
    let norm = l2_norm(&v);
    if !norm.is_finite() || norm <= f32::EPSILON {
        return Err(Error::embedding("encoder produced a zero or non-finite vector"));
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedText(Vec<f32>);

    impl TextEncoder for FixedText {
        fn dimensions(&self) -> usize {
            self.0.len()
        }

        fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct PerImage;

    impl ImageEncoder for PerImage {
        fn dimensions(&self) -> usize {
            2
        }

        fn encode(&self, images: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
            Ok(images
                .iter()
                .map(|img| if img[0] == 0 { vec![3.0, 0.0] } else { vec![0.0, 5.0] })
                .collect())
        }
    }

    fn fuser(text: Vec<f32>) -> EmbeddingFuser {
        EmbeddingFuser::new(Arc::new(FixedText(text)), Some(Arc::new(PerImage)), 2).unwrap()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_text_is_unit_length() {
        let f = fuser(vec![3.0, 4.0]);
        assert_close(&f.embed_text("x").unwrap(), &[0.6, 0.8]);
    }

    #[test]
    fn test_zero_text_vector_is_rejected() {
        let f = fuser(vec![0.0, 0.0]);
        assert!(matches!(f.embed_text("x"), Err(Error::Embedding(_))));
    }

    #[test]
    fn test_images_are_mean_pooled_and_renormalized() {
        let f = fuser(vec![1.0, 0.0]);
        let pooled = f.embed_images(&[vec![0], vec![1]]).unwrap().unwrap();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert_close(&pooled, &[h, h]);
        assert!(f.embed_images(&[]).unwrap().is_none());
    }

    #[test]
    fn test_fused_width_is_fixed() {
        let f = fuser(vec![1.0, 0.0]);
        let text = f.embed_text("x").unwrap();
        let image = f.embed_images(&[vec![0]]).unwrap();

        let without = f.fuse(&text, None).unwrap();
        let with = f.fuse(&text, image.as_deref()).unwrap();
        assert_eq!(without.len(), 4);
        assert_eq!(with.len(), 4);
        assert_close(&without, &[1.0, 0.0, 0.0, 0.0]);
        assert_close(&with, &[1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_query_has_zero_image_part() {
        let f = fuser(vec![0.0, 2.0]);
        assert_close(&f.embed_query("q").unwrap(), &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_image_width_must_match_config() {
        let result = EmbeddingFuser::new(Arc::new(FixedText(vec![1.0])), Some(Arc::new(PerImage)), 3);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_text_only_fuser_pads_zeros() {
        let f = EmbeddingFuser::new(Arc::new(FixedText(vec![1.0])), None, 3).unwrap();
        assert!(!f.supports_images());
        assert!(f.embed_images(&[vec![0]]).unwrap().is_none());
        assert_eq!(f.embed_query("q").unwrap(), vec![1.0, 0.0, 0.0, 0.0]);
    }
}
