//! ONNX-based embedding generation
//!
//! Runs sentence-transformers checkpoints exported to ONNX (all-MiniLM-L6-v2 by
//! default) with mean pooling over the attention mask.

use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;

use crate::config::EmbedderConfig;
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;

const HF_HUB_URL: &str = "https://huggingface.co";

/// Loaded session and tokenizer
struct OnnxModel {
    session: Session,
    tokenizer: Tokenizer,
}

/// ONNX-based text embedder
///
/// The model is downloaded into the cache directory and loaded on first use.
pub struct OnnxEmbedder {
    model: OnceCell<Arc<Mutex<OnnxModel>>>,
    repo: String,
    cache_dir: PathBuf,
    dimensions: usize,
    max_length: usize,
    batch_size: usize,
    normalize: bool,
}

impl OnnxEmbedder {
    /// Create an embedder; nothing is loaded until `warm_up` or the first call
    pub fn new(config: &EmbedderConfig) -> Self {
        let repo = if config.model.contains('/') {
            config.model.clone()
        } else {
            format!("sentence-transformers/{}", config.model)
        };
        let cache_dir = config.cache_dir.join(repo.replace('/', "--"));

        Self {
            model: OnceCell::new(),
            repo,
            cache_dir,
            dimensions: config.dimensions,
            max_length: config.max_length,
            batch_size: config.batch_size.max(1),
            normalize: config.normalize_embeddings,
        }
    }

    async fn model(&self) -> Result<Arc<Mutex<OnnxModel>>> {
        self.model
            .get_or_try_init(|| async { self.load().await.map(|m| Arc::new(Mutex::new(m))) })
            .await
            .cloned()
    }

    async fn load(&self) -> Result<OnnxModel> {
        tracing::info!("Initializing ONNX embedder with model: {}", self.repo);

        tokio::fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
            Error::config(format!("Failed to create cache directory: {}", e))
        })?;

        let model_path = self.cache_dir.join("model.onnx");
        let tokenizer_path = self.cache_dir.join("tokenizer.json");

        if !model_path.exists() {
            download(&format!("{}/{}/resolve/main/onnx/model.onnx", HF_HUB_URL, self.repo), &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download(&format!("{}/{}/resolve/main/tokenizer.json", HF_HUB_URL, self.repo), &tokenizer_path).await?;
        }

        let session = Session::builder()
            .map_err(|e| Error::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| Error::embedding(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::embedding(format!("Failed to load model: {}", e)))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::embedding(format!("Failed to load tokenizer: {}", e)))?;

        tracing::info!("ONNX embedder initialized successfully");

        Ok(OnnxModel { session, tokenizer })
    }

    /// Tokenize, run inference and pool one batch
    fn embed_batch_blocking(
        model: &mut OnnxModel,
        texts: &[String],
        max_length: usize,
        normalize: bool,
    ) -> Result<Vec<Vec<f32>>> {
        let batch_size = texts.len();
        let encodings = model
            .tokenizer
            .encode_batch(texts.iter().map(String::as_str).collect::<Vec<_>>(), true)
            .map_err(|e| Error::embedding(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(max_length);

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
        let attention_mask_tensor = Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
            .map_err(|e| Error::embedding(format!("Attention mask tensor creation failed: {}", e)))?;
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(|e| Error::embedding(format!("Token type tensor creation failed: {}", e)))?;

        let inputs = vec![
            ("input_ids", input_ids_tensor.into_dyn()),
            ("attention_mask", attention_mask_tensor.into_dyn()),
            ("token_type_ids", token_type_ids_tensor.into_dyn()),
        ];

        let outputs = model
            .session
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
        let hidden_size = dims
            .get(2)
            .copied()
            .ok_or_else(|| Error::embedding(format!("Unexpected output shape {:?}", dims)))?;

        Ok(mean_pool(
            tensor_data,
            &attention_mask,
            batch_size,
            max_len,
            hidden_size,
            normalize,
        ))
    }
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    async fn warm_up(&self) -> Result<()> {
        self.model().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("Empty embedding result"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model().await?;
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let model = Arc::clone(&model);
            let batch = batch.to_vec();
            let (max_length, normalize) = (self.max_length, self.normalize);

            let embeddings = tokio::task::spawn_blocking(move || {
                let mut model = model.lock();
                Self::embed_batch_blocking(&mut model, &batch, max_length, normalize)
            })
            .await
            .map_err(|e| Error::internal(format!("Embedding task panicked: {}", e)))??;

            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.model.initialized())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Mean pooling of `[batch, seq, hidden]` token states weighted by the attention mask
pub fn mean_pool(
    hidden_states: &[f32],
    attention_mask: &[i64],
    batch_size: usize,
    seq_len: usize,
    hidden_size: usize,
    normalize: bool,
) -> Vec<Vec<f32>> {
    let mut embeddings = Vec::with_capacity(batch_size);

    for i in 0..batch_size {
        let mut sum = vec![0.0f32; hidden_size];
        let mut count = 0.0f32;

        for j in 0..seq_len {
            let mask_val = attention_mask[i * seq_len + j] as f32;
            if mask_val > 0.0 {
                for (k, acc) in sum.iter_mut().enumerate() {
                    let idx = i * seq_len * hidden_size + j * hidden_size + k;
                    if let Some(v) = hidden_states.get(idx) {
                        *acc += v * mask_val;
                    }
                }
                count += mask_val;
            }
        }

        if count > 0.0 {
            for val in &mut sum {
                *val /= count;
            }
        }

        if normalize {
            let norm: f32 = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for val in &mut sum {
                    *val /= norm;
                }
            }
        }

        embeddings.push(sum);
    }

    embeddings
}

/// Download a Hub file into the cache
async fn download(url: &str, path: &Path) -> Result<()> {
    tracing::info!("Downloading {}", url);

    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::embedding(format!("Failed to download {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::http_status(
            "huggingface hub",
            response.status().as_u16(),
            url.to_string(),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::embedding(format!("Failed to read download: {}", e)))?;

    // Write to a temporary name first so an interrupted download is not cached
    let partial = path.with_extension("partial");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, path).await?;

    tracing::info!("Downloaded {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
