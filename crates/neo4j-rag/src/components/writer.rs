//! Document persistence component

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};
use crate::store::{DocumentStore, DuplicatePolicy};

/// Writes documents to a store
///
/// Input `documents` (mandatory); output `documents_written`.
pub struct DocumentWriter {
    store: Arc<dyn DocumentStore>,
    policy: DuplicatePolicy,
}

impl DocumentWriter {
    pub fn new(store: Arc<dyn DocumentStore>, policy: DuplicatePolicy) -> Self {
        Self { store, policy }
    }
}

#[async_trait]
impl Component for DocumentWriter {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![InputSocket::mandatory("documents", ValueKind::Documents)]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("documents_written", ValueKind::Integer)]
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let documents = inputs.require_documents("documents")?;
        let written = self.store.write_documents(documents, self.policy).await?;

        tracing::info!("Wrote {} documents to {}", written, self.store.name());
        Ok(Outputs::from([(
            "documents_written".to_string(),
            Value::Integer(written as i64),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use crate::types::Document;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_writes_with_policy() {
        let store = Arc::new(InMemoryDocumentStore::default());
        let writer = DocumentWriter::new(store.clone(), DuplicatePolicy::Skip);
        let documents = vec![Document::from_text("a"), Document::from_text("b")];

        let run = |documents: Vec<Document>| {
            Inputs::new("writer", HashMap::from([("documents".to_string(), Value::from(documents))]))
        };

        let outputs = writer.run(run(documents.clone())).await.unwrap();
        assert_eq!(outputs["documents_written"], Value::Integer(2));

        let outputs = writer.run(run(documents)).await.unwrap();
        assert_eq!(outputs["documents_written"], Value::Integer(0));
        assert_eq!(store.count_documents().await.unwrap(), 2);
    }
}
