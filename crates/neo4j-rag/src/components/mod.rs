//! Pipeline components wrapping providers and stores

pub mod answer_builder;
pub mod embedders;
pub mod generator;
pub mod prompt_builder;
pub mod retriever;
pub mod splitter;
pub mod template;
pub mod writer;

pub use answer_builder::AnswerBuilder;
pub use embedders::{DocumentEmbedder, TextEmbedder};
pub use generator::Generator;
pub use prompt_builder::PromptBuilder;
pub use retriever::EmbeddingRetriever;
pub use splitter::DocumentSplitter;
pub use template::Template;
pub use writer::DocumentWriter;
