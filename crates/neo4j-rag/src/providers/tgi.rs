//! Hugging Face text-generation-inference client
//!
//! Talks to either the hosted Inference API (`api-inference.huggingface.co/models/<model>`)
//! or a self-hosted TGI server, which share the same request body.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::llm::{Generation, GenerationParams, LlmProvider};
use super::retry::retry_request;

/// Hosted inference endpoint prefix
pub const HF_INFERENCE_API: &str = "https://api-inference.huggingface.co/models";

#[derive(Debug, Serialize)]
struct TgiRequest<'a> {
    inputs: &'a str,
    parameters: TgiParameters,
}

#[derive(Debug, Serialize)]
struct TgiParameters {
    max_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    return_full_text: bool,
    details: bool,
}

#[derive(Debug, Deserialize)]
struct TgiOutput {
    generated_text: String,
    #[serde(default)]
    details: Option<TgiDetails>,
}

#[derive(Debug, Deserialize)]
struct TgiDetails {
    finish_reason: Option<String>,
    generated_tokens: Option<u64>,
    #[serde(default)]
    prefill: Vec<Json>,
}

/// The hosted API answers with a list, a TGI server with a single object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TgiResponse {
    Many(Vec<TgiOutput>),
    One(TgiOutput),
}

impl TgiResponse {
    fn into_outputs(self) -> Vec<TgiOutput> {
        match self {
            Self::Many(outputs) => outputs,
            Self::One(output) => vec![output],
        }
    }
}

/// Text generator backed by text-generation-inference
pub struct TgiGenerator {
    client: Client,
    url: String,
    model: String,
    token: Option<String>,
    max_retries: u32,
}

impl TgiGenerator {
    /// Create a generator from configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let url = Self::endpoint(config)?;
        if config.url.is_none() && config.token.is_none() {
            tracing::warn!(
                "No Hugging Face token configured; set HF_TOKEN for gated models such as {}",
                config.model
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model: config.model.clone(),
            token: config.token.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Resolve the request URL: an explicit endpoint, or the hosted API for the model id
    pub fn endpoint(config: &LlmConfig) -> Result<String> {
        if let Some(url) = &config.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::config(format!("Invalid TGI url '{}'", url)));
            }
            return Ok(url.trim_end_matches('/').to_string());
        }

        let model = config.model.trim();
        let valid = !model.is_empty()
            && model
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
        if !valid || model.starts_with('/') || model.ends_with('/') {
            return Err(Error::config(format!("Invalid model id '{}'", config.model)));
        }
        Ok(format!("{}/{}", HF_INFERENCE_API, model))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn to_generation(model: &str, outputs: Vec<TgiOutput>) -> Generation {
    let mut generation = Generation::default();

    for (index, output) in outputs.into_iter().enumerate() {
        let details = output.details;
        let mut meta = Map::new();
        meta.insert("model".into(), json!(model));
        meta.insert("index".into(), json!(index));
        meta.insert(
            "finish_reason".into(),
            json!(details.as_ref().and_then(|d| d.finish_reason.clone())),
        );
        meta.insert(
            "usage".into(),
            json!({
                "completion_tokens": details.as_ref().and_then(|d| d.generated_tokens),
                "prompt_tokens": details
                    .as_ref()
                    .filter(|d| !d.prefill.is_empty())
                    .map(|d| d.prefill.len()),
            }),
        );

        generation.replies.push(output.generated_text);
        generation.meta.push(meta);
    }

    generation
}

#[async_trait]
impl LlmProvider for TgiGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation> {
        tracing::info!("Generating answer with model: {}", self.model);

        let request = TgiRequest {
            inputs: prompt,
            parameters: TgiParameters {
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                stop: params.stop_words.clone(),
                return_full_text: false,
                details: true,
            },
        };

        let response = retry_request("TGI generation", self.max_retries, || async {
            let mut builder = self.client.post(&self.url).json(&request);
            if let Some(token) = &self.token {
                builder = builder.bearer_auth(token);
            }
            let response = builder.send().await?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::http_status("text-generation-inference", status, body));
            }

            response
                .json::<TgiResponse>()
                .await
                .map_err(|e| Error::llm(format!("Failed to parse generation response: {}", e)))
        })
        .await?;

        let outputs = response.into_outputs();
        if outputs.is_empty() {
            return Err(Error::llm("Generation returned no output"));
        }
        Ok(to_generation(&self.model, outputs))
    }

    async fn health_check(&self) -> Result<bool> {
        let mut builder = self.client.get(&self.url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        match builder.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "tgi"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resolution() {
        let mut config = LlmConfig::default();
        assert_eq!(
            TgiGenerator::endpoint(&config).unwrap(),
            "https://api-inference.huggingface.co/models/mistralai/Mistral-7B-v0.1"
        );

        config.url = Some("http://localhost:8080/".to_string());
        assert_eq!(TgiGenerator::endpoint(&config).unwrap(), "http://localhost:8080");

        config.url = Some("localhost:8080".to_string());
        assert!(TgiGenerator::endpoint(&config).is_err());

        config.url = None;
        config.model = "bad model id".to_string();
        assert!(TgiGenerator::endpoint(&config).is_err());
    }

    #[test]
    fn test_request_body() {
        let stop = vec!["Question:".to_string()];
        let request = TgiRequest {
            inputs: "prompt",
            parameters: TgiParameters {
                max_new_tokens: 100,
                temperature: None,
                top_p: None,
                stop,
                return_full_text: false,
                details: true,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["inputs"], "prompt");
        assert_eq!(value["parameters"]["stop"][0], "Question:");
        assert!(value["parameters"].get("temperature").is_none());
    }

    #[test]
    fn test_parse_hosted_and_server_responses() {
        let hosted: TgiResponse =
            serde_json::from_str(r#"[{"generated_text": " David J. Peterson"}]"#).unwrap();
        let generation = to_generation("m", hosted.into_outputs());
        assert_eq!(generation.replies, vec![" David J. Peterson".to_string()]);
        assert!(generation.meta[0]["finish_reason"].is_null());

        let server: TgiResponse = serde_json::from_str(
            r#"{"generated_text": "Peterson", "details": {"finish_reason": "eos_token", "generated_tokens": 3, "seed": null, "prefill": []}}"#,
        )
        .unwrap();
        let generation = to_generation("m", server.into_outputs());
        assert_eq!(generation.meta[0]["finish_reason"], "eos_token");
        assert_eq!(generation.meta[0]["usage"]["completion_tokens"], 3);
        assert_eq!(generation.meta[0]["index"], 0);
    }
}
