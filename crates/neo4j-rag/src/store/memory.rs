//! In-memory document store with brute-force similarity search

use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::{Document, Filter};

use super::{DocumentStore, DuplicatePolicy, Similarity};

/// Documents kept in insertion order
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
    similarity: Similarity,
    embedding_dim: Option<usize>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new(Similarity::Cosine)
    }
}

impl InMemoryDocumentStore {
    pub fn new(similarity: Similarity) -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            similarity,
            embedding_dim: None,
        }
    }

    /// Require every embedding to have `dim` dimensions
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = Some(dim);
        self
    }

    /// Configured dimension, or the one of the first stored embedding
    fn expected_dim(&self, documents: &[Document]) -> Option<usize> {
        self.embedding_dim.or_else(|| {
            documents
                .iter()
                .find_map(|d| d.embedding.as_ref().map(Vec::len))
        })
    }

    fn check_dimensions(expected: Option<usize>, embedding: &[f32]) -> Result<()> {
        match expected {
            Some(dim) if dim != embedding.len() => Err(Error::document_store(format!(
                "Embedding has {} dimensions, store expects {}",
                embedding.len(),
                dim
            ))),
            _ => Ok(()),
        }
    }
}

fn matches(filters: Option<&Filter>, document: &Document) -> Result<bool> {
    filters.map_or(Ok(true), |f| f.matches(document))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn count_documents(&self) -> Result<usize> {
        Ok(self.documents.read().len())
    }

    async fn filter_documents(&self, filters: Option<&Filter>) -> Result<Vec<Document>> {
        if let Some(filter) = filters {
            filter.validate()?;
        }
        let documents = self.documents.read();
        let mut result = Vec::new();
        for document in documents.iter() {
            if matches(filters, document)? {
                result.push(document.clone());
            }
        }
        Ok(result)
    }

    async fn write_documents(&self, documents: Vec<Document>, policy: DuplicatePolicy) -> Result<usize> {
        let policy = policy.resolve();
        let mut stored = self.documents.write();

        let mut expected = self.expected_dim(&stored);
        let mut seen = HashSet::new();
        for document in &documents {
            if let Some(embedding) = &document.embedding {
                Self::check_dimensions(expected, embedding)?;
                expected.get_or_insert(embedding.len());
            }
            let duplicate = !seen.insert(document.id.as_str()) || stored.iter().any(|d| d.id == document.id);
            if duplicate && policy == DuplicatePolicy::Fail {
                return Err(Error::DuplicateDocument(document.id.clone()));
            }
        }

        let mut written = 0;
        for document in documents {
            match stored.iter().position(|d| d.id == document.id) {
                Some(_) if policy == DuplicatePolicy::Skip => continue,
                Some(index) => stored[index] = document,
                None => stored.push(document),
            }
            written += 1;
        }

        tracing::debug!("Wrote {} documents to memory", written);
        Ok(written)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        self.documents.write().retain(|d| !ids.contains(&d.id));
        Ok(())
    }

    async fn query_by_embedding(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: Option<&Filter>,
        scale_score: bool,
        return_embedding: bool,
    ) -> Result<Vec<Document>> {
        if let Some(filter) = filters {
            filter.validate()?;
        }
        let documents = self.documents.read();
        Self::check_dimensions(self.expected_dim(&documents), embedding)?;

        let mut scored = Vec::new();
        for document in documents.iter() {
            let Some(stored) = &document.embedding else {
                continue;
            };
            if !matches(filters, document)? {
                continue;
            }
            let raw = self.similarity.score(embedding, stored);
            scored.push((self.similarity.scale(raw), raw, document));
        }

        // Scaled scores rank every similarity function the same way
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(scaled, raw, document)| {
                let mut document = document.clone();
                document.score = Some(if scale_score { scaled } else { raw });
                if !return_embedding {
                    document.embedding = None;
                }
                document
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        vec![
            Document::from_text("north")
                .with_meta("file_path", "n.txt")
                .with_embedding(vec![0.0, 1.0]),
            Document::from_text("east")
                .with_meta("file_path", "e.txt")
                .with_embedding(vec![1.0, 0.0]),
            Document::from_text("north-east")
                .with_meta("file_path", "ne.txt")
                .with_embedding(vec![0.7, 0.7]),
        ]
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = InMemoryDocumentStore::default();
        assert_eq!(store.write_documents(docs(), DuplicatePolicy::None).await.unwrap(), 3);

        let results = store
            .query_by_embedding(&[1.0, 0.1], 2, None, true, false)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "east");
        assert_eq!(results[1].content, "north-east");
        assert!(results[0].score.unwrap() > results[1].score.unwrap());
        assert!(results[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_euclidean_raw_scores() {
        let store = InMemoryDocumentStore::new(Similarity::Euclidean);
        store.write_documents(docs(), DuplicatePolicy::None).await.unwrap();

        let results = store
            .query_by_embedding(&[0.0, 1.0], 1, None, false, true)
            .await
            .unwrap();
        assert_eq!(results[0].content, "north");
        assert_eq!(results[0].score, Some(0.0));
        assert!(results[0].embedding.is_some());
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let store = InMemoryDocumentStore::default();
        store.write_documents(docs(), DuplicatePolicy::None).await.unwrap();

        let filter = Filter::eq("meta.file_path", "n.txt");
        let results = store
            .query_by_embedding(&[1.0, 0.0], 3, Some(&filter), true, false)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "north");

        let all = store.filter_documents(None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_policies() {
        let store = InMemoryDocumentStore::default();
        store.write_documents(docs(), DuplicatePolicy::None).await.unwrap();

        let result = store.write_documents(docs(), DuplicatePolicy::Fail).await;
        assert!(matches!(result, Err(Error::DuplicateDocument(_))));

        assert_eq!(store.write_documents(docs(), DuplicatePolicy::Skip).await.unwrap(), 0);

        let mut replaced = docs();
        replaced[0].score = Some(1.0);
        assert_eq!(store.write_documents(replaced, DuplicatePolicy::Overwrite).await.unwrap(), 3);
        assert_eq!(store.count_documents().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = InMemoryDocumentStore::default().with_embedding_dim(2);
        let bad = vec![Document::from_text("x").with_embedding(vec![1.0; 3])];
        assert!(store.write_documents(bad, DuplicatePolicy::None).await.is_err());

        store.write_documents(docs(), DuplicatePolicy::None).await.unwrap();
        assert!(store.query_by_embedding(&[1.0], 1, None, true, false).await.is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryDocumentStore::default();
        let documents = docs();
        let id = documents[0].id.clone();
        store.write_documents(documents, DuplicatePolicy::None).await.unwrap();

        store.delete_documents(&[id, "missing".to_string()]).await.unwrap();
        assert_eq!(store.count_documents().await.unwrap(), 2);
    }
}
