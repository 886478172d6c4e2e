//! Ask a question against documents already indexed in Neo4j
//!
//! Expects a local Neo4j 5 instance (`neo4j`/`passw0rd`) holding MiniLM embeddings
//! in the `document-embeddings` index, and `HF_TOKEN` for the hosted Mistral model.
//!
//! Run with: cargo run -p neo4j-rag --example rag_pipeline

use std::collections::HashMap;
use std::sync::Arc;

use neo4j_rag::components::{AnswerBuilder, EmbeddingRetriever, Generator, PromptBuilder, TextEmbedder};
use neo4j_rag::config::{DEFAULT_PROMPT_TEMPLATE, DEFAULT_QUESTION};
use neo4j_rag::providers::{OnnxEmbedder, TgiGenerator};
use neo4j_rag::{GeneratedAnswer, Neo4jDocumentStore, Pipeline, RagConfig, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "neo4j_rag=info".into()),
        )
        .init();

    let mut config = RagConfig::default();
    config.apply_env_overrides();

    let document_store = Arc::new(Neo4jDocumentStore::connect(&config.document_store).await?);
    let embedder = Arc::new(OnnxEmbedder::new(&config.embedder));
    let llm = Arc::new(TgiGenerator::new(&config.llm)?);

    let mut rag_pipeline = Pipeline::new();
    rag_pipeline.add_component("query_embedder", TextEmbedder::new(embedder))?;
    rag_pipeline.add_component("retriever", EmbeddingRetriever::new(document_store))?;
    rag_pipeline.add_component("prompt_builder", PromptBuilder::new(DEFAULT_PROMPT_TEMPLATE)?)?;
    rag_pipeline.add_component("llm", Generator::new(llm, config.llm.generation.clone()))?;
    rag_pipeline.add_component("answer_builder", AnswerBuilder::new())?;

    rag_pipeline.connect("query_embedder", "retriever.query_embedding")?;
    rag_pipeline.connect("retriever.documents", "prompt_builder.documents")?;
    rag_pipeline.connect("prompt_builder.prompt", "llm.prompt")?;
    rag_pipeline.connect("llm.replies", "answer_builder.replies")?;
    rag_pipeline.connect("llm.meta", "answer_builder.meta")?;
    rag_pipeline.connect("retriever", "answer_builder.documents")?;

    let question = DEFAULT_QUESTION;
    let result = rag_pipeline
        .run(HashMap::from([
            ("query_embedder".to_string(), HashMap::from([("text".to_string(), Value::from(question))])),
            ("retriever".to_string(), HashMap::from([("top_k".to_string(), Value::from(3usize))])),
            ("prompt_builder".to_string(), HashMap::from([("question".to_string(), Value::from(question))])),
            ("answer_builder".to_string(), HashMap::from([("query".to_string(), Value::from(question))])),
        ]))
        .await?;

    let answer: &GeneratedAnswer = result
        .answers("answer_builder")
        .and_then(|answers| answers.first())
        .ok_or_else(|| anyhow::anyhow!("no answer produced"))?;

    println!("Query: {}", answer.query);
    println!("Answer: {}", answer.data);
    println!("== Sources:");
    for doc in &answer.documents {
        println!("-> {}", doc.file_path().unwrap_or_default());
    }

    Ok(())
}
