//! Generated answer with its sources

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::document::Document;

/// An answer produced by the generator and assembled with its source documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    /// Answer text
    pub data: String,
    /// The question that was asked
    pub query: String,
    /// Documents the answer is grounded on
    pub documents: Vec<Document>,
    /// Generator metadata for this reply (model, finish reason, usage)
    pub meta: Map<String, Json>,
}

impl GeneratedAnswer {
    /// File paths of the source documents, in retrieval order
    pub fn source_paths(&self) -> Vec<&str> {
        self.documents.iter().filter_map(Document::file_path).collect()
    }
}
