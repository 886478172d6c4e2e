//! Ollama-based providers for embeddings and generation

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;
use super::llm::{Generation, GenerationParams, LlmProvider};
use super::retry::retry_request;

/// Ollama API client with automatic retry
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaClient {
    /// Create a new Ollama client with retry support
    pub fn new(base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Generate an embedding
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        retry_request("Ollama embedding", self.max_retries, || async {
            let response = self
                .client
                .post(&url)
                .json(&EmbedRequest { model, prompt: text })
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::http_status("ollama", status, body));
            }

            let embed_response: EmbedResponse = response
                .json()
                .await
                .map_err(|e| Error::embedding(format!("Failed to parse embedding response: {}", e)))?;

            Ok(embed_response.embedding)
        })
        .await
    }

    /// Complete a prompt
    pub async fn generate(&self, model: &str, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::info!("Generating answer with model: {}", model);

        let response = retry_request("Ollama generation", self.max_retries, || async {
            let request = GenerateRequest {
                model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    num_predict: params.max_new_tokens,
                    temperature: params.temperature,
                    top_p: params.top_p,
                    stop: params.stop_words.clone(),
                },
            };

            let response = self.client.post(&url).json(&request).send().await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::http_status("ollama", status, body));
            }

            response
                .json::<GenerateResponse>()
                .await
                .map_err(|e| Error::llm(format!("Failed to parse generation response: {}", e)))
        })
        .await?;

        Ok(to_generation(model, response))
    }
}

fn to_generation(model: &str, response: GenerateResponse) -> Generation {
    let mut meta = Map::new();
    meta.insert("model".into(), json!(model));
    meta.insert("index".into(), json!(0));
    meta.insert("finish_reason".into(), json!(response.done_reason));
    meta.insert(
        "usage".into(),
        json!({
            "prompt_tokens": response.prompt_eval_count,
            "completion_tokens": response.eval_count,
        }),
    );

    Generation {
        replies: vec![response.response],
        meta: vec![meta],
    }
}

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    dimensions: usize,
    model: String,
}

impl OllamaEmbedder {
    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, dimensions: usize, model: String) -> Self {
        Self {
            client,
            dimensions,
            model,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.client.embed(&self.model, text).await?;
        if embedding.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "Model '{}' returned {} dimensions, expected {}",
                self.model,
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama LLM provider
pub struct OllamaGenerator {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaGenerator {
    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl LlmProvider for OllamaGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        self.client.generate(&self.model, prompt, params).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_options() {
        let stop = vec!["###".to_string()];
        let request = GenerateRequest {
            model: "mistral",
            prompt: "hi",
            stream: false,
            options: GenerateOptions {
                num_predict: 64,
                temperature: None,
                top_p: Some(0.9),
                stop,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["options"]["num_predict"], 64);
        assert!(value["options"].get("temperature").is_none());
        assert_eq!(value["options"]["stop"][0], "###");
    }

    #[test]
    fn test_response_to_generation() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"model":"mistral","response":"David J. Peterson","done":true,"done_reason":"stop","prompt_eval_count":42,"eval_count":5}"#,
        )
        .unwrap();
        let generation = to_generation("mistral", response);

        assert_eq!(generation.replies, vec!["David J. Peterson".to_string()]);
        assert_eq!(generation.meta[0]["finish_reason"], "stop");
        assert_eq!(generation.meta[0]["usage"]["prompt_tokens"], 42);
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = OllamaClient::new("http://localhost:11434/", 5, 0).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
