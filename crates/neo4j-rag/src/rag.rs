//! Ready-made query and indexing pipelines
//!
//! The query pipeline is wired as:
//!
//! ```text
//! query_embedder            -> retriever.query_embedding
//! retriever.documents       -> prompt_builder.documents
//! prompt_builder.prompt     -> llm.prompt
//! llm.replies               -> answer_builder.replies
//! llm.meta                  -> answer_builder.meta
//! retriever                 -> answer_builder.documents
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::components::{
    AnswerBuilder, DocumentEmbedder, DocumentSplitter, DocumentWriter, EmbeddingRetriever, Generator,
    PromptBuilder, TextEmbedder,
};
use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, PipelineInputs, Value};
use crate::providers::{self, EmbeddingProvider, LlmProvider};
use crate::store::{DocumentStore, Neo4jDocumentStore};
use crate::types::{Document, GeneratedAnswer};

pub const QUERY_EMBEDDER: &str = "query_embedder";
pub const RETRIEVER: &str = "retriever";
pub const PROMPT_BUILDER: &str = "prompt_builder";
pub const LLM: &str = "llm";
pub const ANSWER_BUILDER: &str = "answer_builder";

/// Question answering over a document store
pub struct RagPipeline {
    pipeline: Pipeline,
}

impl RagPipeline {
    /// Connect to Neo4j and the configured model backends
    pub async fn build(config: &RagConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Neo4jDocumentStore::connect(&config.document_store).await?);
        let embedder = providers::embedder_from_config(&config.embedder)?;
        let llm = providers::llm_from_config(&config.llm)?;
        Self::from_parts(config, embedder, store, llm)
    }

    /// Wire the pipeline around already constructed providers and store
    pub fn from_parts(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        let mut pipeline = Pipeline::new();

        pipeline.add_component(QUERY_EMBEDDER, TextEmbedder::from_config(embedder, &config.embedder))?;
        pipeline.add_component(RETRIEVER, EmbeddingRetriever::from_config(store, &config.retriever)?)?;
        pipeline.add_component(PROMPT_BUILDER, PromptBuilder::new(&config.prompt.template)?)?;
        pipeline.add_component(LLM, Generator::new(llm, config.llm.generation.clone()))?;
        pipeline.add_component(ANSWER_BUILDER, AnswerBuilder::new())?;

        pipeline.connect(QUERY_EMBEDDER, "retriever.query_embedding")?;
        pipeline.connect("retriever.documents", "prompt_builder.documents")?;
        pipeline.connect("prompt_builder.prompt", "llm.prompt")?;
        pipeline.connect("llm.replies", "answer_builder.replies")?;
        pipeline.connect("llm.meta", "answer_builder.meta")?;
        pipeline.connect(RETRIEVER, "answer_builder.documents")?;

        Ok(Self { pipeline })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run inputs for one question
    pub fn inputs(question: &str, top_k: usize) -> PipelineInputs {
        HashMap::from([
            (
                QUERY_EMBEDDER.to_string(),
                HashMap::from([("text".to_string(), Value::from(question))]),
            ),
            (
                RETRIEVER.to_string(),
                HashMap::from([("top_k".to_string(), Value::from(top_k))]),
            ),
            (
                PROMPT_BUILDER.to_string(),
                HashMap::from([("question".to_string(), Value::from(question))]),
            ),
            (
                ANSWER_BUILDER.to_string(),
                HashMap::from([("query".to_string(), Value::from(question))]),
            ),
        ])
    }

    /// Answer a question from the `top_k` most similar documents
    pub async fn ask(&self, question: &str, top_k: usize) -> Result<GeneratedAnswer> {
        if question.trim().is_empty() {
            return Err(Error::pipeline("Question must not be empty"));
        }

        let mut output = self.pipeline.run(Self::inputs(question, top_k)).await?;
        match output.take(ANSWER_BUILDER, "answers") {
            Some(Value::Answers(answers)) => answers
                .into_iter()
                .next()
                .ok_or_else(|| Error::pipeline("The generator returned no replies")),
            _ => Err(Error::pipeline("answer_builder produced no answers")),
        }
    }

    /// Human-readable component and connection listing
    pub fn describe(&self) -> String {
        self.pipeline.to_string()
    }
}

/// Splits, embeds and stores documents
pub struct IndexingPipeline {
    pipeline: Pipeline,
}

impl IndexingPipeline {
    /// Connect to Neo4j, creating the vector index when missing
    pub async fn build(config: &RagConfig) -> Result<Self> {
        config.validate()?;
        let mut store_config = config.document_store.clone();
        store_config.create_index_if_missing = true;

        let store = Arc::new(Neo4jDocumentStore::connect(&store_config).await?);
        let embedder = providers::embedder_from_config(&config.embedder)?;
        Self::from_parts(config, embedder, store)
    }

    pub fn from_parts(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        let indexing = &config.indexing;
        let mut pipeline = Pipeline::new();

        pipeline.add_component(
            "splitter",
            DocumentSplitter::new(indexing.split_length, indexing.split_overlap)?,
        )?;
        pipeline.add_component(
            "embedder",
            DocumentEmbedder::from_config(embedder, &config.embedder)
                .with_meta_fields(indexing.meta_fields_to_embed.clone()),
        )?;
        pipeline.add_component("writer", DocumentWriter::new(store, indexing.duplicate_policy))?;

        pipeline.connect("splitter", "embedder")?;
        pipeline.connect("embedder", "writer")?;

        Ok(Self { pipeline })
    }

    /// Index documents, returning how many chunks were written
    pub async fn run(&self, documents: Vec<Document>) -> Result<usize> {
        let inputs = HashMap::from([(
            "splitter".to_string(),
            HashMap::from([("documents".to_string(), Value::Documents(documents))]),
        )]);

        let mut output = self.pipeline.run(inputs).await?;
        match output.take("writer", "documents_written") {
            Some(Value::Integer(written)) => Ok(written.max(0) as usize),
            _ => Err(Error::pipeline("writer reported no count")),
        }
    }

    pub fn describe(&self) -> String {
        self.pipeline.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use crate::testing::{HashEmbedder, ScriptedGenerator};

    fn config() -> RagConfig {
        let mut config = RagConfig::default();
        config.embedder.dimensions = 32;
        config.document_store.embedding_dim = 32;
        config
    }

    #[test]
    fn test_wiring_matches_reference_layout() {
        let config = config();
        let rag = RagPipeline::from_parts(
            &config,
            Arc::new(HashEmbedder::new(32)),
            Arc::new(InMemoryDocumentStore::default()),
            Arc::new(ScriptedGenerator::new(vec!["x".to_string()])),
        )
        .unwrap();

        let connections: Vec<String> = rag.pipeline().connections().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            connections,
            [
                "query_embedder.embedding -> retriever.query_embedding",
                "retriever.documents -> prompt_builder.documents",
                "prompt_builder.prompt -> llm.prompt",
                "llm.replies -> answer_builder.replies",
                "llm.meta -> answer_builder.meta",
                "retriever.documents -> answer_builder.documents",
            ]
        );
        assert!(rag.describe().contains("answer_builder"));
    }

    #[tokio::test]
    async fn test_indexing_then_query() {
        let config = config();
        let store: Arc<InMemoryDocumentStore> = Arc::new(InMemoryDocumentStore::default());
        let embedder = Arc::new(HashEmbedder::new(32));

        let indexing = IndexingPipeline::from_parts(&config, embedder.clone(), store.clone()).unwrap();
        let written = indexing
            .run(vec![
                Document::from_text("The Dothraki vocabulary was created by David J. Peterson")
                    .with_meta("file_path", "dothraki.txt"),
                Document::from_text("Winterfell is the seat of House Stark").with_meta("file_path", "stark.txt"),
            ])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let generator = Arc::new(ScriptedGenerator::new(vec![" David J. Peterson".to_string()]));
        let rag = RagPipeline::from_parts(&config, embedder, store, generator.clone()).unwrap();

        let answer = rag.ask("Who created the Dothraki vocabulary?", 1).await.unwrap();
        assert_eq!(answer.data, "David J. Peterson");
        assert_eq!(answer.query, "Who created the Dothraki vocabulary?");
        assert_eq!(answer.source_paths(), vec!["dothraki.txt"]);
        assert!(generator.prompts()[0].contains("created by David J. Peterson"));

        assert!(rag.ask("  ", 1).await.is_err());
    }
}
