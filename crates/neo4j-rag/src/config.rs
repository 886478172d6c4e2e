//! Configuration for the RAG pipeline
//!
//! Every field has a default matching the reference deployment: a local Neo4j 5
//! instance holding MiniLM embeddings, queried with Mistral-7B through Hugging
//! Face text-generation-inference. A TOML file may override any subset, and a
//! handful of environment variables override the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::providers::llm::GenerationParams;
use crate::store::cypher::is_valid_identifier;
use crate::store::{DuplicatePolicy, Similarity};
use crate::types::Filter;

/// Environment variable holding the Hugging Face access token
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// Question asked when none is given
pub const DEFAULT_QUESTION: &str = "Who created the Dothraki vocabulary?";

/// Default prompt: documents first, then the question
pub const DEFAULT_PROMPT_TEMPLATE: &str = "
Given these documents, answer the question.
Documents:
{% for doc in documents %}
    {{ doc.content }}
{% endfor %}


Question: {{question}}

Answer:
";

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Neo4j document store
    pub document_store: DocumentStoreConfig,
    /// Query/document embedder
    pub embedder: EmbedderConfig,
    /// Text generator
    pub llm: LlmConfig,
    /// Retriever defaults
    pub retriever: RetrieverConfig,
    /// Prompt template
    pub prompt: PromptConfig,
    /// Document loading for the indexing pipeline
    pub indexing: IndexingConfig,
}

impl RagConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without applying overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse a TOML document
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `HF_TOKEN` and `NEO4J_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(HF_TOKEN_ENV) {
            self.llm.token = Some(token);
        }
        if let Some(url) = get("NEO4J_URL") {
            self.document_store.url = url;
        }
        if let Some(username) = get("NEO4J_USERNAME") {
            self.document_store.username = username;
        }
        if let Some(password) = get("NEO4J_PASSWORD") {
            self.document_store.password = password;
        }
        if let Some(database) = get("NEO4J_DATABASE") {
            self.document_store.database = database;
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let store = &self.document_store;

        if store.embedding_dim == 0 {
            return Err(Error::config("document_store.embedding_dim must be greater than 0"));
        }
        if self.embedder.dimensions != store.embedding_dim {
            return Err(Error::config(format!(
                "Embedder produces {}-dimensional vectors but the index expects {}",
                self.embedder.dimensions, store.embedding_dim
            )));
        }
        if store.similarity == Similarity::DotProduct {
            return Err(Error::config(
                "Neo4j vector indexes support only 'cosine' and 'euclidean' similarity",
            ));
        }
        for (field, value) in [
            ("document_store.index", &store.index),
            ("document_store.node_label", &store.node_label),
            ("document_store.embedding_field", &store.embedding_field),
        ] {
            if !is_valid_identifier(value) {
                return Err(Error::config(format!("{} is not a valid identifier: '{}'", field, value)));
            }
        }
        if self.retriever.top_k == 0 {
            return Err(Error::config("retriever.top_k must be greater than 0"));
        }
        if self.embedder.batch_size == 0 {
            return Err(Error::config("embedder.batch_size must be greater than 0"));
        }
        if self.indexing.split_length == 0 || self.indexing.split_overlap >= self.indexing.split_length {
            return Err(Error::config(
                "indexing.split_overlap must be smaller than a non-zero indexing.split_length",
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::config("llm.model must not be empty"));
        }

        Ok(())
    }
}

/// Neo4j document store configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStoreConfig {
    /// Connection URL (`bolt://`, `neo4j://` or `http(s)://`)
    pub url: String,
    pub username: String,
    pub password: String,
    /// Database name
    pub database: String,
    /// Vector index name
    pub index: String,
    /// Label of document nodes
    pub node_label: String,
    /// Node property holding the embedding
    pub embedding_field: String,
    /// Embedding dimensions (384 for MiniLM)
    pub embedding_dim: usize,
    /// Similarity function of the vector index
    pub similarity: Similarity,
    /// Drop and recreate the index on connect
    pub recreate_index: bool,
    /// Create the index on connect when it does not exist
    pub create_index_if_missing: bool,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            url: "bolt://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: "passw0rd".to_string(),
            database: "neo4j".to_string(),
            index: "document-embeddings".to_string(),
            node_label: "Document".to_string(),
            embedding_field: "embedding".to_string(),
            embedding_dim: 384,
            similarity: Similarity::Cosine,
            // The index is owned by the indexing run
            recreate_index: false,
            create_index_if_missing: false,
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for DocumentStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStoreConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("index", &self.index)
            .field("node_label", &self.node_label)
            .field("embedding_field", &self.embedding_field)
            .field("embedding_dim", &self.embedding_dim)
            .field("similarity", &self.similarity)
            .field("recreate_index", &self.recreate_index)
            .field("create_index_if_missing", &self.create_index_if_missing)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    /// Sentence-transformers model run locally through ONNX Runtime
    #[default]
    Onnx,
    /// Ollama server
    Ollama,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub backend: EmbedderBackend,
    /// Model repository (`sentence-transformers/all-MiniLM-L6-v2`) or Ollama model name
    pub model: String,
    /// Embedding dimensions
    pub dimensions: usize,
    /// Batch size for document embedding
    pub batch_size: usize,
    /// Maximum sequence length in tokens
    pub max_length: usize,
    /// L2-normalise the pooled vectors
    pub normalize_embeddings: bool,
    /// Text prepended to every input
    pub prefix: String,
    /// Text appended to every input
    pub suffix: String,
    /// Show a progress bar while embedding documents
    pub progress_bar: bool,
    /// Cache directory for downloaded models
    pub cache_dir: PathBuf,
    /// Ollama base URL
    pub ollama_url: String,
    /// Ollama request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient Ollama failures
    pub max_retries: u32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: EmbedderBackend::Onnx,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            batch_size: 32,
            max_length: 256,
            normalize_embeddings: true,
            prefix: String::new(),
            suffix: String::new(),
            progress_bar: false,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("neo4j-rag")
                .join("models"),
            ollama_url: "http://localhost:11434".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Generation backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Hugging Face text-generation-inference (hosted Inference API or self-hosted)
    #[default]
    Tgi,
    /// Ollama server
    Ollama,
}

/// LLM configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Model id (`mistralai/Mistral-7B-v0.1`) or Ollama model name
    pub model: String,
    /// Explicit endpoint; derived from the backend and model when unset
    pub url: Option<String>,
    /// Access token, normally taken from `HF_TOKEN`
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Default generation parameters
    pub generation: GenerationParams,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Tgi,
            model: "mistralai/Mistral-7B-v0.1".to_string(),
            url: None,
            token: None,
            generation: GenerationParams::default(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("generation", &self.generation)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Retriever defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Number of documents to retrieve
    pub top_k: usize,
    /// Scale scores into 0.0-1.0
    pub scale_score: bool,
    /// Keep embeddings on returned documents
    pub return_embedding: bool,
    /// Metadata filters applied to every query
    pub filters: Option<Filter>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            scale_score: true,
            return_embedding: false,
            filters: None,
        }
    }
}

/// Prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Words per chunk
    pub split_length: usize,
    /// Words shared by consecutive chunks
    pub split_overlap: usize,
    /// Metadata fields embedded together with the content
    pub meta_fields_to_embed: Vec<String>,
    /// Policy for documents that are already stored
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            split_length: 200,
            split_overlap: 20,
            meta_fields_to_embed: Vec::new(),
            duplicate_policy: DuplicatePolicy::Overwrite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.document_store.embedding_dim, 384);
        assert_eq!(config.llm.model, "mistralai/Mistral-7B-v0.1");
        assert!(!config.document_store.recreate_index);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RagConfig::from_toml(
            r#"
            [document_store]
            url = "http://db:7474"
            similarity = "euclidean"

            [retriever]
            top_k = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.document_store.url, "http://db:7474");
        assert_eq!(config.document_store.similarity, Similarity::Euclidean);
        assert_eq!(config.document_store.username, "neo4j");
        assert_eq!(config.retriever.top_k, 5);
        assert_eq!(config.embedder.model, "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(config.embedder.timeout_secs, 60);
    }

    #[test]
    fn test_embedder_request_settings() {
        let config = RagConfig::from_toml(
            r#"
            [embedder]
            backend = "ollama"
            timeout_secs = 5
            max_retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.embedder.backend, EmbedderBackend::Ollama);
        assert_eq!(config.embedder.timeout_secs, 5);
        assert_eq!(config.embedder.max_retries, 0);
        assert_eq!(config.embedder.dimensions, 384);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HF_TOKEN", "hf_secret"),
            ("NEO4J_PASSWORD", "changed"),
            ("NEO4J_DATABASE", " "),
        ]
        .into_iter()
        .collect();

        let mut config = RagConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.token.as_deref(), Some("hf_secret"));
        assert_eq!(config.document_store.password, "changed");
        // Blank values are ignored
        assert_eq!(config.document_store.database, "neo4j");
    }

    #[test]
    fn test_validate_rejects_dimension_mismatch() {
        let mut config = RagConfig::default();
        config.embedder.dimensions = 768;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_dot_product_and_bad_label() {
        let mut config = RagConfig::default();
        config.document_store.similarity = Similarity::DotProduct;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.document_store.node_label = "Doc`) DETACH DELETE n //".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = RagConfig::default();
        config.llm.token = Some("hf_secret".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("passw0rd"));
        assert!(!debug.contains("hf_secret"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.toml");
        std::fs::write(&path, "[llm]\nmodel = \"HuggingFaceH4/zephyr-7b-beta\"\n").unwrap();

        let config = RagConfig::from_file(&path).unwrap();
        assert_eq!(config.llm.model, "HuggingFaceH4/zephyr-7b-beta");
        assert!(RagConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
