//! neo4j-rag: retrieval-augmented question answering over a Neo4j vector index
//!
//! Questions flow through a pipeline of components: a text embedder, a retriever
//! backed by Neo4j's vector index, a prompt template, a language model and an
//! answer builder that attaches the source documents.
//!
//! ```no_run
//! # async fn demo() -> neo4j_rag::Result<()> {
//! use neo4j_rag::{RagConfig, RagPipeline};
//!
//! let config = RagConfig::load(None)?;
//! let rag = RagPipeline::build(&config).await?;
//! let answer = rag.ask("Who created the Dothraki vocabulary?", 3).await?;
//! println!("{}", answer.data);
//! # Ok(())
//! # }
//! ```

pub mod components;
pub mod config;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod providers;
pub mod rag;
pub mod store;
pub mod testing;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use pipeline::{Component, Pipeline, Value, ValueKind};
pub use rag::{IndexingPipeline, RagPipeline};
pub use store::{DocumentStore, DuplicatePolicy, InMemoryDocumentStore, Neo4jDocumentStore, Similarity};
pub use types::{Document, Filter, GeneratedAnswer};
