//! CLIP vision encoder for page images
//!
//! Uses the ONNX export of the vision tower (`onnx/vision_model.onnx`) of a
//! CLIP checkpoint, ViT-L/14 by default, whose projected `image_embeds`
//! output is 768-wide.

use image::imageops::FilterType;
use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;

use super::onnx_embedder::{download_file, hf_url, load_session, model_cache_dir};
use super::ImageEncoder;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

const INPUT_SIZE: u32 = 224;
const MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// ONNX CLIP image encoder
pub struct OnnxImageEncoder {
    session: Mutex<Session>,
    dimensions: usize,
}

impl OnnxImageEncoder {
    /// Load the configured vision model, downloading it on first use
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        tracing::info!("Initializing CLIP image encoder with model: {}", config.image_model);

        let model_dir = model_cache_dir(&config.cache_dir, &config.image_model)?;
        let model_path = model_dir.join("vision_model.onnx");
        if !model_path.exists() {
            download_file(&hf_url(&config.image_model, "onnx/vision_model.onnx"), &model_path).await?;
        }

        let session = load_session(&model_path)?;
        tracing::info!("CLIP image encoder initialized");

        Ok(Self {
            session: Mutex::new(session),
            dimensions: config.image_dimensions,
        })
    }
}

impl ImageEncoder for OnnxImageEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, images: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut pixels = Vec::with_capacity(images.len() * 3 * plane);
        for bytes in images {
            let img = image::load_from_memory(bytes)
                .map_err(|e| Error::embedding(format!("Failed to decode image: {}", e)))?;
            pixels.extend(preprocess(&img));
        }

        let shape = vec![images.len(), 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
        let tensor = Tensor::from_array((shape, pixels.into_boxed_slice()))
            .map_err(|e| Error::embedding(format!("Pixel tensor creation failed: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(vec![("pixel_values", tensor.into_dyn())])
            .map_err(|e| Error::embedding(format!("Image inference failed: {}", e)))?;

        let output_iter: Vec<_> = outputs.iter().collect();
        let output = output_iter
            .iter()
            .find(|(name, _)| *name == "image_embeds")
            .or_else(|| output_iter.first())
            .map(|(_, v)| v)
            .ok_or_else(|| Error::embedding("No image output tensor"))?;

        let (tensor_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::embedding(format!("Failed to extract tensor: {}", e)))?;

        let width = tensor_shape.iter().last().map(|&d| d as usize).unwrap_or(0);
        if width != self.dimensions {
            return Err(Error::embedding(format!(
                "image model produces {} dimensions, configured {}",
                width, self.dimensions
            )));
        }

        Ok(data
            .chunks_exact(width)
            .take(images.len())
            .map(<[f32]>::to_vec)
            .collect())
    }
}

/// Resize the short side to 224, center crop, normalize; CHW layout
fn preprocess(img: &DynamicImage) -> Vec<f32> {
    let (w, h) = (img.width().max(1), img.height().max(1));
    let scale = INPUT_SIZE as f32 / w.min(h) as f32;
    let (nw, nh) = (
        ((w as f32 * scale).round() as u32).max(INPUT_SIZE),
        ((h as f32 * scale).round() as u32).max(INPUT_SIZE),
    );

    let resized = img.resize_exact(nw, nh, FilterType::CatmullRom);
    let cropped = resized
        .crop_imm((nw - INPUT_SIZE) / 2, (nh - INPUT_SIZE) / 2, INPUT_SIZE, INPUT_SIZE)
        .to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut out = vec![0.0f32; 3 * plane];
    for (i, pixel) in cropped.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] = (pixel.0[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 100, image::Rgb([255, 255, 255])));
        let out = preprocess(&img);
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;

        assert_eq!(out.len(), 3 * plane);
        for c in 0..3 {
            let expected = (1.0 - MEAN[c]) / STD[c];
            assert!((out[c * plane] - expected).abs() < 0.02);
        }
    }
}
