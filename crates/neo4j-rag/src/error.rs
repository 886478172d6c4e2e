//! Error types for the RAG pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid graph construction or execution
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// A component received a missing or mistyped input
    #[error("Invalid input '{socket}' for component '{component}': {message}")]
    ComponentInput {
        component: String,
        socket: String,
        message: String,
    },

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Document store error
    #[error("Document store error: {0}")]
    DocumentStore(String),

    /// Duplicate document rejected by the write policy
    #[error("Document with id '{0}' already exists")]
    DuplicateDocument(String),

    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Prompt template error
    #[error("Template error: {0}")]
    Template(String),

    /// Metadata filter error
    #[error("Invalid filter: {0}")]
    Filter(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote service answered with a non-success status
    #[error("{service} returned HTTP {status}: {body}")]
    HttpStatus {
        service: String,
        status: u16,
        body: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a pipeline error
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline(message.into())
    }

    /// Create a component input error
    pub fn component_input(
        component: impl Into<String>,
        socket: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ComponentInput {
            component: component.into(),
            socket: socket.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a document store error
    pub fn document_store(message: impl Into<String>) -> Self {
        Self::DocumentStore(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template(message.into())
    }

    /// Create a filter error
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an HTTP status error
    pub fn http_status(service: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    /// Whether retrying the same request could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map_or(false, |s| s.is_server_error() || s.as_u16() == 429)
            }
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(format!("Invalid regex: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
