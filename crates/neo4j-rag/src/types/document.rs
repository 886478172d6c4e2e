//! Document type shared by embedders, stores and the answer builder

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use sha2::{Digest, Sha256};

/// Metadata key holding the originating file path
pub const FILE_PATH_KEY: &str = "file_path";

/// A unit of retrievable text with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content-derived ID (hex SHA-256)
    pub id: String,
    /// Text content
    pub content: String,
    /// Arbitrary metadata (file path, title, ...)
    #[serde(default)]
    pub meta: Map<String, Json>,
    /// Relevance score set by retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Embedding, when computed or requested back from the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Create a document whose ID is derived from its content and metadata
    pub fn new(content: impl Into<String>, meta: Map<String, Json>) -> Self {
        let content = content.into();
        let id = Self::derive_id(&content, &meta);
        Self {
            id,
            content,
            meta,
            score: None,
            embedding: None,
        }
    }

    /// Create a document with no metadata
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(content, Map::new())
    }

    /// Compute the ID for a content/metadata pair
    ///
    /// `serde_json::Map` keeps keys sorted, so the serialized metadata is canonical.
    pub fn derive_id(content: &str, meta: &Map<String, Json>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update([0u8]);
        hasher.update(Json::Object(meta.clone()).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Builder-style metadata insertion; the ID is recomputed
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.meta.insert(key.into(), value.into());
        self.id = Self::derive_id(&self.content, &self.meta);
        self
    }

    /// Builder-style embedding assignment
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// The `file_path` metadata entry, if present and a string
    pub fn file_path(&self) -> Option<&str> {
        self.meta.get(FILE_PATH_KEY).and_then(Json::as_str)
    }

    /// Look up a dotted field path (`id`, `content`, `meta.a.b`)
    pub fn field(&self, path: &str) -> Option<Json> {
        match path {
            "id" => Some(Json::String(self.id.clone())),
            "content" => Some(Json::String(self.content.clone())),
            "score" => self.score.map(|s| Json::from(s as f64)),
            _ => {
                let rest = path.strip_prefix("meta.").unwrap_or(path);
                let mut parts = rest.split('.');
                let first = parts.next()?;
                let mut current = self.meta.get(first)?;
                for part in parts {
                    current = current.as_object()?.get(part)?;
                }
                Some(current.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_is_deterministic() {
        let a = Document::from_text("Dothraki").with_meta("file_path", "got.txt");
        let b = Document::from_text("Dothraki").with_meta("file_path", "got.txt");
        let c = Document::from_text("Dothraki").with_meta("file_path", "other.txt");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn test_embedding_does_not_change_id() {
        let doc = Document::from_text("text");
        let id = doc.id.clone();
        let doc = doc.with_embedding(vec![0.1, 0.2]);
        assert_eq!(doc.id, id);
    }

    #[test]
    fn test_field_lookup() {
        let mut meta = Map::new();
        meta.insert("file_path".into(), json!("a.txt"));
        meta.insert("source".into(), json!({"year": 2011}));
        let doc = Document::new("content", meta);

        assert_eq!(doc.file_path(), Some("a.txt"));
        assert_eq!(doc.field("meta.source.year"), Some(json!(2011)));
        assert_eq!(doc.field("content"), Some(json!("content")));
        assert_eq!(doc.field("meta.missing"), None);
    }
}
