//! Provider abstractions for embeddings and text generation
//!
//! Trait-based so the pipeline can switch between local models (ONNX, Ollama)
//! and hosted inference (text-generation-inference).

pub mod embedding;
pub mod llm;
pub mod ollama;
pub mod onnx;
pub mod retry;
pub mod tgi;

use std::sync::Arc;

use crate::config::{EmbedderBackend, EmbedderConfig, LlmBackend, LlmConfig};
use crate::error::Result;

pub use embedding::EmbeddingProvider;
pub use llm::{Generation, GenerationParams, LlmProvider};
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaGenerator};
pub use onnx::OnnxEmbedder;
pub use tgi::TgiGenerator;

/// Build the configured embedding backend
pub fn embedder_from_config(config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match config.backend {
        EmbedderBackend::Onnx => Arc::new(OnnxEmbedder::new(config)),
        EmbedderBackend::Ollama => {
            let client = Arc::new(ollama_embedding_client(config)?);
            Arc::new(OllamaEmbedder::from_client(client, config.dimensions, config.model.clone()))
        }
    })
}

fn ollama_embedding_client(config: &EmbedderConfig) -> Result<OllamaClient> {
    OllamaClient::new(&config.ollama_url, config.timeout_secs, config.max_retries)
}

/// Build the configured generation backend
pub fn llm_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    Ok(match config.backend {
        LlmBackend::Tgi => Arc::new(TgiGenerator::new(config)?),
        LlmBackend::Ollama => {
            let base_url = config.url.as_deref().unwrap_or("http://localhost:11434");
            let client = Arc::new(OllamaClient::new(base_url, config.timeout_secs, config.max_retries)?);
            Arc::new(OllamaGenerator::from_client(client, config.model.clone()))
        }
    })
}
