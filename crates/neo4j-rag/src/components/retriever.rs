//! Embedding retriever over a document store

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RetrieverConfig;
use crate::error::{Error, Result};
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};
use crate::store::DocumentStore;
use crate::types::Filter;

/// Finds the documents closest to a query embedding
///
/// Inputs `query_embedding` (mandatory), `filters`, `top_k`; output `documents`.
/// Run-time `filters` and `top_k` replace the construction defaults.
pub struct EmbeddingRetriever {
    store: Arc<dyn DocumentStore>,
    top_k: usize,
    filters: Option<Filter>,
    scale_score: bool,
    return_embedding: bool,
}

impl EmbeddingRetriever {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            top_k: 10,
            filters: None,
            scale_score: true,
            return_embedding: false,
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, config: &RetrieverConfig) -> Result<Self> {
        Self::new(store)
            .with_top_k(config.top_k)?
            .with_filters(config.filters.clone())
            .map(|r| r.with_scale_score(config.scale_score).with_return_embedding(config.return_embedding))
    }

    pub fn with_top_k(mut self, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(Error::config("top_k must be greater than 0"));
        }
        self.top_k = top_k;
        Ok(self)
    }

    pub fn with_filters(mut self, filters: Option<Filter>) -> Result<Self> {
        if let Some(filter) = &filters {
            filter.validate()?;
        }
        self.filters = filters;
        Ok(self)
    }

    pub fn with_scale_score(mut self, scale_score: bool) -> Self {
        self.scale_score = scale_score;
        self
    }

    pub fn with_return_embedding(mut self, return_embedding: bool) -> Self {
        self.return_embedding = return_embedding;
        self
    }
}

#[async_trait]
impl Component for EmbeddingRetriever {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![
            InputSocket::mandatory("query_embedding", ValueKind::Embedding),
            InputSocket::optional("filters", ValueKind::Filters),
            InputSocket::optional("top_k", ValueKind::Integer),
        ]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("documents", ValueKind::Documents)]
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let embedding = inputs.require_embedding("query_embedding")?;
        let filters = inputs.filters("filters")?.or_else(|| self.filters.clone());
        let top_k = match inputs.integer("top_k")? {
            Some(k) if k > 0 => k as usize,
            Some(k) => {
                return Err(Error::component_input(
                    inputs.component(),
                    "top_k",
                    format!("must be greater than 0, got {}", k),
                ))
            }
            None => self.top_k,
        };

        let documents = self
            .store
            .query_by_embedding(&embedding, top_k, filters.as_ref(), self.scale_score, self.return_embedding)
            .await?;

        tracing::info!("Retrieved {} documents from {}", documents.len(), self.store.name());
        Ok(Outputs::from([("documents".to_string(), Value::Documents(documents))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DuplicatePolicy, InMemoryDocumentStore};
    use crate::types::Document;
    use std::collections::HashMap;

    async fn store() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::default());
        let documents = (0..5)
            .map(|i| {
                Document::from_text(format!("doc {}", i))
                    .with_meta("rank", i)
                    .with_embedding(vec![1.0, i as f32])
            })
            .collect();
        store.write_documents(documents, DuplicatePolicy::None).await.unwrap();
        store
    }

    fn inputs(values: Vec<(&str, Value)>) -> Inputs {
        Inputs::new(
            "retriever",
            values.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<HashMap<_, _>>(),
        )
    }

    #[tokio::test]
    async fn test_runtime_top_k_overrides_default() {
        let retriever = EmbeddingRetriever::new(store().await).with_top_k(2).unwrap();

        let outputs = retriever
            .run(inputs(vec![("query_embedding", Value::Embedding(vec![1.0, 0.0]))]))
            .await
            .unwrap();
        assert!(matches!(&outputs["documents"], Value::Documents(d) if d.len() == 2));

        let outputs = retriever
            .run(inputs(vec![
                ("query_embedding", Value::Embedding(vec![1.0, 0.0])),
                ("top_k", Value::Integer(4)),
            ]))
            .await
            .unwrap();
        assert!(matches!(&outputs["documents"], Value::Documents(d) if d.len() == 4));
    }

    #[tokio::test]
    async fn test_filters_and_invalid_top_k() {
        let retriever = EmbeddingRetriever::new(store().await);

        let outputs = retriever
            .run(inputs(vec![
                ("query_embedding", Value::Embedding(vec![1.0, 0.0])),
                ("filters", Value::Filters(Filter::eq("meta.rank", 3))),
            ]))
            .await
            .unwrap();
        let Value::Documents(documents) = &outputs["documents"] else {
            panic!("expected documents");
        };
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "doc 3");

        let result = retriever
            .run(inputs(vec![
                ("query_embedding", Value::Embedding(vec![1.0, 0.0])),
                ("top_k", Value::Integer(0)),
            ]))
            .await;
        assert!(result.is_err());
        assert!(EmbeddingRetriever::new(store().await).with_top_k(0).is_err());
    }
}
