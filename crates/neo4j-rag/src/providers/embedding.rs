//! Text embedding backends

use async_trait::async_trait;
use crate::error::{Error, Result};

/// Turns text into dense vectors for the query and document embedders
///
/// Backends: `OnnxEmbedder` (local MiniLM through ONNX Runtime) and
/// `OllamaEmbedder` (a running Ollama server).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Called once before the pipeline runs
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts; the result has one vector per input, in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Vector length produced by this backend
    fn dimensions(&self) -> usize;

    async fn health_check(&self) -> Result<bool>;

    fn name(&self) -> &str;
}

/// Reject vectors whose length differs from what the provider promised
pub fn check_dimensions(provider: &dyn EmbeddingProvider, embedding: &[f32]) -> Result<()> {
    if embedding.len() != provider.dimensions() {
        return Err(Error::embedding(format!(
            "{} returned {} dimensions, expected {}",
            provider.name(),
            embedding.len(),
            provider.dimensions()
        )));
    }
    Ok(())
}
