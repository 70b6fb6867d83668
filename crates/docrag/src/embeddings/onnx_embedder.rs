//! ONNX sentence-embedding text encoder
//!
//! Runs a sentence-transformers export (all-MiniLM-L6-v2 by default, 384
//! dimensions) with mean pooling over the attention mask.

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use super::TextEncoder;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

const HF_BASE: &str = "https://huggingface.co";

/// ONNX-based text encoder
pub struct OnnxTextEncoder {
    /// ONNX Runtime session
    session: Mutex<Session>,
    /// HuggingFace tokenizer
    tokenizer: Tokenizer,
    /// Embedding dimensions
    dimensions: usize,
    /// Maximum sequence length
    max_length: usize,
    /// Batch size
    batch_size: usize,
}

impl OnnxTextEncoder {
    /// Load the configured model, downloading it on first use
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        tracing::info!("Initializing ONNX text encoder with model: {}", config.text_model);

        let repo = if config.text_model.contains('/') {
            config.text_model.clone()
        } else {
            format!("sentence-transformers/{}", config.text_model)
        };
        let model_dir = model_cache_dir(&config.cache_dir, &repo)?;

        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            download_file(&hf_url(&repo, "onnx/model.onnx"), &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download_file(&hf_url(&repo, "tokenizer.json"), &tokenizer_path).await?;
        }

        let session = load_session(&model_path)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::embedding(format!("Failed to load tokenizer: {}", e)))?;

        tracing::info!("ONNX text encoder initialized");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions: config.text_dimensions,
            max_length: config.max_length,
            batch_size: config.batch_size.max(1),
        })
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::embedding(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .clamp(1, self.max_length.max(1));

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len().min(max_len) {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
                token_type_ids[i * max_len + j] = types[j] as i64;
            }
        }

        let shape = vec![batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| Error::embedding(format!("Input tensor creation failed: {}", e)))?;
        let attention_mask_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
                .map_err(|e| Error::embedding(format!("Attention mask tensor creation failed: {}", e)))?;
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(|e| Error::embedding(format!("Token type tensor creation failed: {}", e)))?;

        let inputs = vec![
            ("input_ids", input_ids_tensor.into_dyn()),
            ("attention_mask", attention_mask_tensor.into_dyn()),
            ("token_type_ids", token_type_ids_tensor.into_dyn()),
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| Error::embedding(format!("Inference failed: {}", e)))?;

        let output_iter: Vec<_> = outputs.iter().collect();
        let output = output_iter
            .iter()
            .find(|(name, _)| *name == "last_hidden_state")
            .or_else(|| output_iter.first())
            .map(|(_, v)| v)
            .ok_or_else(|| Error::embedding("No output tensor"))?;

        let (tensor_shape, tensor_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::embedding(format!("Failed to extract tensor: {}", e)))?;

        let dims: Vec<usize> = tensor_shape.iter().map(|&d| d as usize).collect();
        let hidden_size = dims.get(2).copied().unwrap_or(self.dimensions);
        if hidden_size != self.dimensions {
            return Err(Error::embedding(format!(
                "model hidden size {} does not match configured {} dimensions",
                hidden_size, self.dimensions
            )));
        }

        // Mean pooling over real tokens
        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mut sum = vec![0.0f32; hidden_size];
            let mut count = 0.0f32;

            for j in 0..max_len {
                if attention_mask[i * max_len + j] == 0 {
                    continue;
                }
                let offset = (i * max_len + j) * hidden_size;
                if let Some(row) = tensor_data.get(offset..offset + hidden_size) {
                    sum.iter_mut().zip(row).for_each(|(acc, x)| *acc += x);
                    count += 1.0;
                }
            }

            if count > 0.0 {
                sum.iter_mut().for_each(|x| *x /= count);
            }
            embeddings.push(sum);
        }

        Ok(embeddings)
    }
}

impl TextEncoder for OnnxTextEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all.extend(self.encode_batch(batch)?);
        }
        Ok(all)
    }
}

/// Build an optimized inference session from a model file
pub(crate) fn load_session(model_path: &Path) -> Result<Session> {
    Session::builder()
        .map_err(|e| Error::embedding(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| Error::embedding(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(4)
        .map_err(|e| Error::embedding(format!("Failed to set threads: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| Error::embedding(format!("Failed to load model {}: {}", model_path.display(), e)))
}

/// Per-model directory under the cache root
pub(crate) fn model_cache_dir(cache_dir: &Path, repo: &str) -> Result<PathBuf> {
    let dir = cache_dir.join(repo.replace('/', "--"));
    std::fs::create_dir_all(&dir)
        .map_err(|e| Error::Config(format!("Failed to create cache directory {}: {}", dir.display(), e)))?;
    Ok(dir)
}

pub(crate) fn hf_url(repo: &str, file: &str) -> String {
    format!("{}/{}/resolve/main/{}", HF_BASE, repo, file)
}

/// Fetch a file, writing it under a temporary name first so a failed
/// download never leaves a truncated model in the cache
pub(crate) async fn download_file(url: &str, path: &Path) -> Result<()> {
    tracing::info!("Downloading {}", url);

    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(Error::embedding(format!(
            "Download of {} failed: HTTP {}",
            url,
            response.status()
        )));
    }

    let bytes = response.bytes().await?;
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, path).await?;

    tracing::info!("Saved {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
