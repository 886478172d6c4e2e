//! End-to-end runs of the query pipeline against the in-memory store

use std::collections::HashMap;
use std::sync::Arc;

use neo4j_rag::testing::{HashEmbedder, ScriptedGenerator};
use neo4j_rag::{
    Document, DocumentStore, DuplicatePolicy, Filter, InMemoryDocumentStore, IndexingPipeline, RagConfig,
    RagPipeline, Value,
};

const DIMS: usize = 64;

fn config() -> RagConfig {
    let mut config = RagConfig::default();
    config.embedder.dimensions = DIMS;
    config.document_store.embedding_dim = DIMS;
    config
}

async fn seeded_store(embedder: Arc<HashEmbedder>) -> Arc<InMemoryDocumentStore> {
    let store = Arc::new(InMemoryDocumentStore::default());
    let indexing = IndexingPipeline::from_parts(&config(), embedder, store.clone()).unwrap();
    indexing
        .run(vec![
            Document::from_text("The Dothraki vocabulary was created by David J. Peterson for the series")
                .with_meta("file_path", "data/dothraki.txt")
                .with_meta("kind", "language"),
            Document::from_text("Valyrian languages were also created by David J. Peterson")
                .with_meta("file_path", "data/valyrian.md")
                .with_meta("kind", "language"),
            Document::from_text("Winterfell is the ancestral castle of House Stark")
                .with_meta("file_path", "data/winterfell.txt")
                .with_meta("kind", "place"),
        ])
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_ask_returns_answer_with_sources() {
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let store = seeded_store(embedder.clone()).await;
    assert_eq!(store.count_documents().await.unwrap(), 3);

    let generator = Arc::new(ScriptedGenerator::new(vec!["David J. Peterson\n".to_string()]));
    let rag = RagPipeline::from_parts(&config(), embedder, store, generator.clone()).unwrap();

    let answer = rag.ask("Who created the Dothraki vocabulary?", 2).await.unwrap();
    assert_eq!(answer.query, "Who created the Dothraki vocabulary?");
    assert_eq!(answer.data, "David J. Peterson");
    assert_eq!(answer.documents.len(), 2);
    assert_eq!(answer.documents[0].file_path(), Some("data/dothraki.txt"));
    assert_eq!(answer.meta["model"], "scripted");

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Question: Who created the Dothraki vocabulary?"));
    assert!(prompts[0].contains("The Dothraki vocabulary was created by David J. Peterson"));
}

#[tokio::test]
async fn test_run_with_filters_narrows_sources() {
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let store = seeded_store(embedder.clone()).await;
    let generator = Arc::new(ScriptedGenerator::new(vec!["Winterfell".to_string()]));
    let rag = RagPipeline::from_parts(&config(), embedder, store, generator).unwrap();

    let question = "Who created the Dothraki vocabulary?";
    let mut inputs = RagPipeline::inputs(question, 3);
    inputs
        .entry("retriever".to_string())
        .or_insert_with(HashMap::new)
        .insert("filters".to_string(), Value::from(Filter::eq("meta.kind", "place")));

    let output = rag.pipeline().run(inputs).await.unwrap();
    let answers = output.answers("answer_builder").unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].source_paths(), vec!["data/winterfell.txt"]);
}

#[tokio::test]
async fn test_reindexing_overwrites_chunks() {
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let store = seeded_store(embedder.clone()).await;

    let indexing = IndexingPipeline::from_parts(&config(), embedder, store.clone()).unwrap();
    let written = indexing
        .run(vec![Document::from_text("Winterfell is the ancestral castle of House Stark")
            .with_meta("file_path", "data/winterfell.txt")
            .with_meta("kind", "place")])
        .await
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(store.count_documents().await.unwrap(), 3);

    let duplicate = store.filter_documents(None).await.unwrap().remove(0);
    assert!(store.write_documents(vec![duplicate], DuplicatePolicy::Fail).await.is_err());
}

#[tokio::test]
async fn test_error_cases() {
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let store = seeded_store(embedder.clone()).await;

    let silent = Arc::new(ScriptedGenerator::new(Vec::new()));
    let rag = RagPipeline::from_parts(&config(), embedder.clone(), store.clone(), silent).unwrap();
    assert!(rag.ask("Who created the Dothraki vocabulary?", 2).await.is_err());
    assert!(rag.ask("", 2).await.is_err());

    let generator = Arc::new(ScriptedGenerator::new(vec!["x".to_string()]));
    let rag = RagPipeline::from_parts(&config(), embedder, store, generator).unwrap();
    assert!(rag.ask("Who created the Dothraki vocabulary?", 0).await.is_err());

    let mut missing_query = RagPipeline::inputs("Who?", 1);
    missing_query.remove("query_embedder");
    assert!(rag.pipeline().run(missing_query).await.is_err());
}

#[tokio::test]
async fn test_empty_store_still_answers() {
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let store = Arc::new(InMemoryDocumentStore::default());
    let generator = Arc::new(ScriptedGenerator::new(vec!["I don't know".to_string()]));
    let rag = RagPipeline::from_parts(&config(), embedder, store, generator.clone()).unwrap();

    let answer = rag.ask("Who created the Dothraki vocabulary?", 3).await.unwrap();
    assert_eq!(answer.data, "I don't know");
    assert!(answer.documents.is_empty());
    assert!(generator.prompts()[0].contains("Question: Who created the Dothraki vocabulary?"));
}
