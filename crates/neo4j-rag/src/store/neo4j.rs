//! Neo4j document store over the HTTP transactional Cypher API
//!
//! Documents are nodes carrying `id`, `content`, the embedding property and the
//! flattened metadata. Similarity search goes through a Neo4j vector index
//! (`db.index.vector.queryNodes`); the index itself lives in the database.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::time::Duration;

use crate::config::DocumentStoreConfig;
use crate::error::{Error, Result};
use crate::providers::retry::retry_request;
use crate::types::{Document, Filter};

use super::cypher::{compile_filter, flatten_meta, is_valid_identifier, quote, CompiledFilter};
use super::{DocumentStore, DuplicatePolicy, Similarity};

/// Retries for transient database failures
const MAX_RETRIES: u32 = 2;

/// Candidate multiplier when filters are applied after the ANN lookup
const FILTER_OVERFETCH: usize = 10;

/// Largest count Cypher accepts as an integer parameter
const MAX_CYPHER_INT: usize = i64::MAX as usize;

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: Json,
}

#[derive(Debug, Serialize)]
struct StatementsRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Debug, Deserialize)]
struct CypherResponse {
    #[serde(default)]
    results: Vec<CypherResult>,
    #[serde(default)]
    errors: Vec<CypherError>,
}

#[derive(Debug, Deserialize)]
struct CypherResult {
    #[serde(default)]
    data: Vec<CypherRow>,
}

#[derive(Debug, Deserialize)]
struct CypherRow {
    row: Vec<Json>,
}

#[derive(Debug, Deserialize)]
struct CypherError {
    code: String,
    message: String,
}

/// Map a Bolt/Neo4j URL to the HTTP endpoint of the same server
///
/// `bolt://host:7687` becomes `http://host:7474`; the `+s`/`+ssc` variants use
/// `https://host:7473`. `http(s)://` URLs are used as given.
pub fn http_base_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| Error::config(format!("Invalid Neo4j url '{}': {}", url, e)))?;

    let (scheme, port) = match parsed.scheme() {
        "http" | "https" => return Ok(url.trim_end_matches('/').to_string()),
        "bolt" | "neo4j" => ("http", 7474),
        "bolt+s" | "bolt+ssc" | "neo4j+s" | "neo4j+ssc" => ("https", 7473),
        other => return Err(Error::config(format!("Unsupported Neo4j url scheme '{}'", other))),
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::config(format!("Neo4j url '{}' has no host", url)))?;

    Ok(format!("{}://{}:{}", scheme, host, port))
}

/// What `connect` does about the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    Keep,
    Create,
    Recreate,
    /// Missing and not ours to create
    Warn,
}

impl IndexAction {
    pub fn plan(config: &DocumentStoreConfig, exists: bool) -> Self {
        match (config.recreate_index, exists, config.create_index_if_missing) {
            (true, _, _) => Self::Recreate,
            (false, true, _) => Self::Keep,
            (false, false, true) => Self::Create,
            (false, false, false) => Self::Warn,
        }
    }
}

/// Keep the documents `policy` allows to be written, given the ids already stored
fn select_for_write(documents: Vec<Document>, existing: &[String], policy: DuplicatePolicy) -> Result<Vec<Document>> {
    match policy.resolve() {
        DuplicatePolicy::Overwrite => Ok(documents),
        DuplicatePolicy::Skip => {
            if !existing.is_empty() {
                tracing::debug!("Skipping {} existing documents", existing.len());
            }
            Ok(documents.into_iter().filter(|d| !existing.contains(&d.id)).collect())
        }
        _ => match existing.first() {
            Some(id) => Err(Error::DuplicateDocument(id.clone())),
            None => Ok(documents),
        },
    }
}

/// Document store backed by Neo4j
pub struct Neo4jDocumentStore {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
    index: String,
    node_label: String,
    embedding_field: String,
    embedding_dim: usize,
    similarity: Similarity,
}

impl Neo4jDocumentStore {
    /// Create the store without touching the database
    pub fn new(config: &DocumentStoreConfig) -> Result<Self> {
        for value in [&config.index, &config.node_label, &config.embedding_field] {
            if !is_valid_identifier(value) {
                return Err(Error::config(format!("'{}' is not a valid Cypher identifier", value)));
            }
        }
        if config.similarity == Similarity::DotProduct {
            return Err(Error::config("Neo4j vector indexes do not support dot_product similarity"));
        }

        let endpoint = format!("{}/db/{}/tx/commit", http_base_url(&config.url)?, config.database);
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
            index: config.index.clone(),
            node_label: config.node_label.clone(),
            embedding_field: config.embedding_field.clone(),
            embedding_dim: config.embedding_dim,
            similarity: config.similarity,
        })
    }

    /// Create the store and reconcile the vector index with the configuration
    pub async fn connect(config: &DocumentStoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        tracing::info!("Connecting to Neo4j at {}", store.endpoint);

        match IndexAction::plan(config, store.index_exists().await?) {
            IndexAction::Keep => {}
            IndexAction::Create => store.create_index().await?,
            IndexAction::Recreate => {
                store.drop_index().await?;
                store.create_index().await?;
            }
            IndexAction::Warn => tracing::warn!(
                "Vector index '{}' does not exist; similarity queries will fail until it is created",
                store.index
            ),
        }

        Ok(store)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one statement and return its rows
    async fn execute(&self, statement: &str, parameters: Json) -> Result<Vec<Vec<Json>>> {
        tracing::debug!("Cypher: {}", statement);
        let request = StatementsRequest {
            statements: vec![Statement { statement, parameters }],
        };

        let response = retry_request("Neo4j query", MAX_RETRIES, || async {
            let response = self
                .client
                .post(&self.endpoint)
                .basic_auth(&self.username, Some(&self.password))
                .json(&request)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::http_status("neo4j", status, body));
            }

            let body: CypherResponse = response
                .json()
                .await
                .map_err(|e| Error::document_store(format!("Failed to parse Neo4j response: {}", e)))?;

            if let Some(error) = body.errors.first() {
                // Transient errors (deadlocks, leader switches) are worth retrying
                if error.code.starts_with("Neo.TransientError") {
                    return Err(Error::http_status("neo4j", 503, format!("{}: {}", error.code, error.message)));
                }
                return Err(Error::document_store(format!("{}: {}", error.code, error.message)));
            }
            Ok(body)
        })
        .await?;

        Ok(response
            .results
            .into_iter()
            .next()
            .map(|result| result.data.into_iter().map(|r| r.row).collect())
            .unwrap_or_default())
    }

    async fn index_exists(&self) -> Result<bool> {
        let rows = self
            .execute(
                "SHOW INDEXES YIELD name WHERE name = $name RETURN name",
                json!({ "name": self.index }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn drop_index(&self) -> Result<()> {
        tracing::info!("Dropping vector index '{}'", self.index);
        self.execute(&format!("DROP INDEX {} IF EXISTS", quote(&self.index)), json!({}))
            .await
            .map(|_| ())
    }

    async fn create_index(&self) -> Result<()> {
        tracing::info!(
            "Creating vector index '{}' ({} dimensions, {})",
            self.index,
            self.embedding_dim,
            self.similarity
        );
        self.execute(&self.create_index_statement(), json!({})).await.map(|_| ())
    }

    fn create_index_statement(&self) -> String {
        format!(
            "CREATE VECTOR INDEX {} IF NOT EXISTS FOR (doc:{}) ON (doc.{}) \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: '{}'}}}}",
            quote(&self.index),
            quote(&self.node_label),
            quote(&self.embedding_field),
            self.embedding_dim,
            self.similarity.as_neo4j()
        )
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.embedding_dim {
            return Err(Error::document_store(format!(
                "Embedding has {} dimensions, index '{}' expects {}",
                embedding.len(),
                self.index,
                self.embedding_dim
            )));
        }
        Ok(())
    }

    /// Node properties for a document
    fn to_properties(&self, document: &Document) -> Result<Json> {
        let mut properties = flatten_meta(&document.meta)?;
        if properties.contains_key(&self.embedding_field) {
            return Err(Error::document_store(format!(
                "Metadata key '{}' collides with the embedding property",
                self.embedding_field
            )));
        }
        properties.insert("id".into(), json!(document.id));
        properties.insert("content".into(), json!(document.content));
        if let Some(embedding) = &document.embedding {
            self.check_dimensions(embedding)?;
            properties.insert(self.embedding_field.clone(), json!(embedding));
        }
        Ok(Json::Object(properties))
    }

    /// Document from returned node properties
    fn to_document(&self, properties: Json, score: Option<f32>, return_embedding: bool) -> Result<Document> {
        let Json::Object(mut properties) = properties else {
            return Err(Error::document_store("Expected node properties in Neo4j response"));
        };

        let id = take_string(&mut properties, "id")?;
        let content = take_string(&mut properties, "content")?;
        let embedding = properties
            .remove(&self.embedding_field)
            .filter(|_| return_embedding)
            .map(|value| serde_json::from_value::<Vec<f32>>(value))
            .transpose()?;

        Ok(Document {
            id,
            content,
            meta: properties,
            score,
            embedding,
        })
    }

    fn match_clause(&self, filters: Option<&Filter>) -> Result<(String, Map<String, Json>)> {
        let mut statement = format!("MATCH (doc:{})", quote(&self.node_label));
        let mut params = Map::new();
        if let Some(filter) = filters {
            let CompiledFilter { clause, params: filter_params } = compile_filter(filter, "doc")?;
            statement.push_str(" WHERE ");
            statement.push_str(&clause);
            params = filter_params;
        }
        Ok((statement, params))
    }

    fn existing_ids_query(&self, ids: &[String]) -> (String, Json) {
        (
            format!("MATCH (doc:{}) WHERE doc.id IN $ids RETURN doc.id", quote(&self.node_label)),
            json!({ "ids": ids }),
        )
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        let (statement, params) = self.existing_ids_query(ids);
        let rows = self.execute(&statement, params).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|id| id.as_str().map(String::from))
            .collect())
    }

    /// MERGE on `id`, replacing every property of an existing node
    fn write_query(&self, documents: &[Document]) -> Result<(String, Json)> {
        let rows = documents
            .iter()
            .map(|d| self.to_properties(d))
            .collect::<Result<Vec<_>>>()?;
        let statement = format!(
            "UNWIND $rows AS row MERGE (doc:{} {{id: row.id}}) SET doc = row RETURN count(doc)",
            quote(&self.node_label)
        );
        Ok((statement, json!({ "rows": rows })))
    }

    /// Vector index lookup; filters apply to the candidates before `LIMIT`
    fn vector_query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: Option<&Filter>,
    ) -> Result<(String, Map<String, Json>)> {
        let top_k = top_k.min(MAX_CYPHER_INT);
        let candidates = match filters {
            Some(_) => top_k.saturating_mul(FILTER_OVERFETCH).min(MAX_CYPHER_INT),
            None => top_k,
        };

        let mut params = Map::new();
        let mut statement = String::from(
            "CALL db.index.vector.queryNodes($index, $candidates, $embedding) YIELD node AS doc, score",
        );
        if let Some(filter) = filters {
            let compiled = compile_filter(filter, "doc")?;
            statement.push_str(" WHERE ");
            statement.push_str(&compiled.clause);
            params = compiled.params;
        }
        statement.push_str(" RETURN properties(doc), score ORDER BY score DESC LIMIT $top_k");

        params.insert("index".into(), json!(self.index));
        params.insert("candidates".into(), json!(candidates));
        params.insert("embedding".into(), json!(embedding));
        params.insert("top_k".into(), json!(top_k));
        Ok((statement, params))
    }
}

fn take_string(properties: &mut Map<String, Json>, key: &str) -> Result<String> {
    match properties.remove(key) {
        Some(Json::String(value)) => Ok(value),
        _ => Err(Error::document_store(format!("Node is missing string property '{}'", key))),
    }
}

/// Convert a Neo4j index score to the raw or scaled score of `Similarity`
///
/// Neo4j reports cosine as `(s + 1) / 2` and euclidean as `1 / (1 + d^2)`.
fn from_index_score(similarity: Similarity, score: f32, scale_score: bool) -> f32 {
    match similarity {
        Similarity::Cosine if scale_score => score,
        Similarity::Cosine => score * 2.0 - 1.0,
        Similarity::Euclidean => {
            let distance = if score > 0.0 {
                (1.0 / score - 1.0).max(0.0).sqrt()
            } else {
                f32::MAX
            };
            if scale_score {
                similarity.scale(distance)
            } else {
                distance
            }
        }
        Similarity::DotProduct => score,
    }
}

#[async_trait]
impl DocumentStore for Neo4jDocumentStore {
    async fn count_documents(&self) -> Result<usize> {
        let rows = self
            .execute(
                &format!("MATCH (doc:{}) RETURN count(doc)", quote(&self.node_label)),
                json!({}),
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Json::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn filter_documents(&self, filters: Option<&Filter>) -> Result<Vec<Document>> {
        let (mut statement, params) = self.match_clause(filters)?;
        statement.push_str(" RETURN properties(doc)");

        self.execute(&statement, Json::Object(params))
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|properties| self.to_document(properties, None, false))
            .collect()
    }

    async fn write_documents(&self, documents: Vec<Document>, policy: DuplicatePolicy) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let existing = match policy.resolve() {
            DuplicatePolicy::Overwrite => Vec::new(),
            _ => {
                let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
                self.existing_ids(&ids).await?
            }
        };
        let documents = select_for_write(documents, &existing, policy)?;
        if documents.is_empty() {
            return Ok(0);
        }

        let (statement, params) = self.write_query(&documents)?;
        let result = self.execute(&statement, params).await?;
        let written = result
            .first()
            .and_then(|row| row.first())
            .and_then(Json::as_u64)
            .unwrap_or(0) as usize;

        tracing::info!("Wrote {} documents to Neo4j", written);
        Ok(written)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.execute(
            &format!(
                "MATCH (doc:{}) WHERE doc.id IN $ids DETACH DELETE doc",
                quote(&self.node_label)
            ),
            json!({ "ids": ids }),
        )
        .await
        .map(|_| ())
    }

    async fn query_by_embedding(
        &self,
        embedding: &[f32],
        top_k: usize,
        filters: Option<&Filter>,
        scale_score: bool,
        return_embedding: bool,
    ) -> Result<Vec<Document>> {
        self.check_dimensions(embedding)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let (statement, params) = self.vector_query(embedding, top_k, filters)?;
        let rows = self.execute(&statement, Json::Object(params)).await?;
        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = row.into_iter();
            let properties = values.next().unwrap_or(Json::Null);
            let score = values.next().and_then(|s| s.as_f64()).map(|s| s as f32);
            let score = score.map(|s| from_index_score(self.similarity, s, scale_score));
            documents.push(self.to_document(properties, score, return_embedding)?);
        }

        tracing::debug!("Retrieved {} documents from index '{}'", documents.len(), self.index);
        Ok(documents)
    }

    fn name(&self) -> &str {
        "neo4j"
    }
}
