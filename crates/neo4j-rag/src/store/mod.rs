//! Document stores: persistence and vector similarity search

pub mod cypher;
pub mod memory;
pub mod neo4j;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::types::{Document, Filter};

pub use memory::InMemoryDocumentStore;
pub use neo4j::Neo4jDocumentStore;

/// What to do when a written document's id already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Store default, which is `Fail`
    #[default]
    None,
    /// Keep the stored document and drop the new one
    Skip,
    /// Replace the stored document
    Overwrite,
    /// Reject the whole write
    Fail,
}

impl DuplicatePolicy {
    /// Collapse `None` to the store default
    pub fn resolve(self) -> Self {
        match self {
            Self::None => Self::Fail,
            other => other,
        }
    }
}

/// Vector similarity function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

impl Similarity {
    /// Raw score between two vectors; higher is closer except for `Euclidean`,
    /// which returns the distance
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::DotProduct => dot(a, b),
            Self::Cosine => {
                let norm = dot(a, a).sqrt() * dot(b, b).sqrt();
                if norm == 0.0 {
                    0.0
                } else {
                    dot(a, b) / norm
                }
            }
            Self::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    /// Map a raw score into 0.0-1.0, higher is closer
    pub fn scale(self, raw: f32) -> f32 {
        match self {
            Self::Cosine => (raw + 1.0) / 2.0,
            Self::DotProduct => 1.0 / (1.0 + (-raw / 100.0).exp()),
            Self::Euclidean => 1.0 / (1.0 + raw),
        }
    }

    /// Name of the function in Neo4j index options
    pub fn as_neo4j(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::DotProduct => "dot_product",
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_neo4j())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Trait for document persistence and retrieval
///
/// Implementations:
/// - `Neo4jDocumentStore`: Neo4j nodes with a vector index, over the HTTP Cypher API
/// - `InMemoryDocumentStore`: brute-force search, for tests and offline runs
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Number of stored documents
    async fn count_documents(&self) -> Result<usize>;

    /// All documents matching `filters` (every document when `None`)
    async fn filter_documents(&self, filters: Option<&Filter>) -> Result<Vec<Document>>;

    /// Store documents, returning how many were written
    async fn write_documents(&self, documents: Vec<Document>, policy: DuplicatePolicy) -> Result<usize>;

    /// Delete documents by id; unknown ids are ignored
    async fn delete_documents(&self, ids: &[String]) -> Result<()>;

    /// The `top_k` documents closest to `embedding`, best first
    async fn query_by_embedding(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: Option<&Filter>,
        scale_score: bool,
        return_embedding: bool,
    ) -> Result<Vec<Document>>;

    /// Get store name for logging
    fn name(&self) -> &str;
}
