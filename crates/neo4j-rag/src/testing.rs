//! Deterministic providers for tests and offline runs
//!
//! `HashEmbedder` hashes lowercase words into a fixed number of buckets, so texts
//! sharing vocabulary end up close under cosine similarity. `ScriptedGenerator`
//! replies with canned answers and records what it was asked.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::providers::{EmbeddingProvider, Generation, GenerationParams, LlmProvider};

/// Bag-of-words feature hashing embedder
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, word: &str) -> usize {
        let digest = Sha256::digest(word.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&word.to_lowercase())] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Generator replaying fixed replies
pub struct ScriptedGenerator {
    replies: Vec<String>,
    prompts: Mutex<Vec<String>>,
    last_params: Mutex<Option<GenerationParams>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            prompts: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
        }
    }

    /// Every prompt received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn last_params(&self) -> Option<GenerationParams> {
        self.last_params.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        self.prompts.lock().push(prompt.to_string());
        *self.last_params.lock() = Some(params.clone());

        if self.replies.is_empty() {
            return Err(Error::llm("No scripted replies"));
        }

        let meta = (0..self.replies.len())
            .map(|index| {
                let mut meta = Map::new();
                meta.insert("model".into(), json!(self.model()));
                meta.insert("index".into(), json!(index));
                meta.insert("finish_reason".into(), json!("stop"));
                meta
            })
            .collect();

        Ok(Generation {
            replies: self.replies.clone(),
            meta,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
