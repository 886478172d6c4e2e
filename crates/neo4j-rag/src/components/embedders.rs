//! Embedding components for queries and documents

use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

use crate::config::EmbedderConfig;
use crate::error::{Error, Result};
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};
use crate::providers::embedding::check_dimensions;
use crate::providers::EmbeddingProvider;
use crate::types::Document;

/// Embeds a single query string
///
/// Input `text` (mandatory), output `embedding`.
pub struct TextEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    prefix: String,
    suffix: String,
}

impl TextEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            prefix: String::new(),
            suffix: String::new(),
        }
    }

    /// Take prefix and suffix from configuration
    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbedderConfig) -> Self {
        Self::new(provider)
            .with_prefix(config.prefix.clone())
            .with_suffix(config.suffix.clone())
    }

    /// Text prepended before embedding (e.g. an instruction for asymmetric models)
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }
}

#[async_trait]
impl Component for TextEmbedder {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![InputSocket::mandatory("text", ValueKind::Text)]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("embedding", ValueKind::Embedding)]
    }

    async fn warm_up(&self) -> Result<()> {
        self.provider.warm_up().await
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let text = inputs.require_text("text")?;
        let text = format!("{}{}{}", self.prefix, text, self.suffix);

        let embedding = self.provider.embed(&text).await?;
        check_dimensions(self.provider.as_ref(), &embedding)?;

        Ok(Outputs::from([("embedding".to_string(), Value::Embedding(embedding))]))
    }
}

/// Embeds documents and returns them with `embedding` set
///
/// Input `documents` (mandatory), output `documents`. Selected metadata fields are
/// embedded together with the content.
pub struct DocumentEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    prefix: String,
    suffix: String,
    batch_size: usize,
    meta_fields_to_embed: Vec<String>,
    separator: String,
    #[cfg_attr(not(feature = "cli"), allow(dead_code))]
    progress_bar: bool,
}

impl DocumentEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            prefix: String::new(),
            suffix: String::new(),
            batch_size: 32,
            meta_fields_to_embed: Vec::new(),
            separator: "\n".to_string(),
            progress_bar: false,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbedderConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            suffix: config.suffix.clone(),
            batch_size: config.batch_size.max(1),
            progress_bar: config.progress_bar,
            ..Self::new(provider)
        }
    }

    /// Metadata fields whose values are embedded ahead of the content
    pub fn with_meta_fields(mut self, fields: Vec<String>) -> Self {
        self.meta_fields_to_embed = fields;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress_bar(mut self, enabled: bool) -> Self {
        self.progress_bar = enabled;
        self
    }

    /// Text actually embedded for a document
    fn text_to_embed(&self, document: &Document) -> String {
        let mut parts: Vec<String> = self
            .meta_fields_to_embed
            .iter()
            .filter_map(|field| document.meta.get(field))
            .filter(|value| !value.is_null())
            .map(|value| match value {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        parts.push(document.content.clone());

        format!("{}{}{}", self.prefix, parts.join(&self.separator), self.suffix)
    }
}

#[cfg(feature = "cli")]
fn progress(enabled: bool, total: usize) -> Option<indicatif::ProgressBar> {
    use indicatif::{ProgressBar, ProgressStyle};

    if !enabled {
        return None;
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} documents") {
        bar.set_style(style.progress_chars("#>-"));
    }
    Some(bar)
}

#[async_trait]
impl Component for DocumentEmbedder {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![InputSocket::mandatory("documents", ValueKind::Documents)]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("documents", ValueKind::Documents)]
    }

    async fn warm_up(&self) -> Result<()> {
        self.provider.warm_up().await
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let mut documents = inputs.require_documents("documents")?;
        let texts: Vec<String> = documents.iter().map(|d| self.text_to_embed(d)).collect();

        #[cfg(feature = "cli")]
        let bar = progress(self.progress_bar, texts.len());

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.provider.embed_batch(batch).await?);

            #[cfg(feature = "cli")]
            {
                if let Some(bar) = &bar {
                    bar.inc(batch.len() as u64);
                }
            }
        }

        #[cfg(feature = "cli")]
        {
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
        }

        if embeddings.len() != documents.len() {
            return Err(Error::embedding(format!(
                "Expected {} embeddings, got {}",
                documents.len(),
                embeddings.len()
            )));
        }
        for (document, embedding) in documents.iter_mut().zip(embeddings) {
            check_dimensions(self.provider.as_ref(), &embedding)?;
            document.embedding = Some(embedding);
        }

        tracing::debug!("Embedded {} documents", documents.len());
        Ok(Outputs::from([("documents".to_string(), Value::Documents(documents))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_text_embedder_applies_prefix() {
        let provider = Arc::new(HashEmbedder::new(8));
        let embedder = TextEmbedder::new(provider.clone()).with_prefix("query: ");

        let inputs = Inputs::new("e", HashMap::from([("text".to_string(), Value::from("hello"))]));
        let mut outputs = embedder.run(inputs).await.unwrap();

        let expected = provider.embed("query: hello").await.unwrap();
        assert_eq!(outputs.remove("embedding"), Some(Value::Embedding(expected)));
    }

    #[tokio::test]
    async fn test_document_embedder_includes_meta_fields() {
        let provider = Arc::new(HashEmbedder::new(8));
        let embedder = DocumentEmbedder::new(provider.clone())
            .with_meta_fields(vec!["title".to_string()])
            .with_batch_size(1);

        let documents = vec![
            Document::from_text("body").with_meta("title", "Dothraki"),
            Document::from_text("other"),
        ];
        assert_eq!(embedder.text_to_embed(&documents[0]), "Dothraki\nbody");

        let inputs = Inputs::new("e", HashMap::from([("documents".to_string(), Value::from(documents))]));
        let mut outputs = embedder.run(inputs).await.unwrap();

        let Some(Value::Documents(embedded)) = outputs.remove("documents") else {
            panic!("documents output missing");
        };
        assert_eq!(embedded.len(), 2);
        assert_eq!(embedded[1].embedding, Some(provider.embed("other").await.unwrap()));
    }

    #[tokio::test]
    async fn test_missing_text_fails() {
        let embedder = TextEmbedder::new(Arc::new(HashEmbedder::new(4)));
        let result = embedder.run(Inputs::new("e", HashMap::new())).await;
        assert!(matches!(result, Err(Error::ComponentInput { .. })));
    }
}
