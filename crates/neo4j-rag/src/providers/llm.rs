//! LLM provider trait for text generation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate
    pub max_new_tokens: u32,
    /// Sampling temperature; server default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling; server default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Generation stops at any of these strings
    pub stop_words: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: None,
            top_p: None,
            stop_words: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Overlay a JSON object of per-run overrides
    pub fn merged(&self, overrides: &Json) -> Result<Self> {
        let overrides = match overrides {
            Json::Null => return Ok(self.clone()),
            Json::Object(map) => map,
            other => {
                return Err(Error::llm(format!(
                    "generation_kwargs must be an object, got {}",
                    other
                )))
            }
        };

        let mut base = match serde_json::to_value(self)? {
            Json::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Json::Object(base))
            .map_err(|e| Error::llm(format!("Invalid generation_kwargs: {}", e)))
    }
}

/// Replies and per-reply metadata from one generation call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub replies: Vec<String>,
    /// Same length as `replies`
    pub meta: Vec<Map<String, Json>>,
}

/// Trait for LLM-based text generation
///
/// Implementations:
/// - `TgiGenerator`: Hugging Face text-generation-inference (Mistral-7B)
/// - `OllamaGenerator`: Local Ollama server
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a rendered prompt
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Generation>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overrides() {
        let params = GenerationParams::default();
        let merged = params
            .merged(&json!({"max_new_tokens": 64, "temperature": 0.2, "stop_words": ["\n\n"]}))
            .unwrap();

        assert_eq!(merged.max_new_tokens, 64);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.stop_words, vec!["\n\n".to_string()]);
        assert_eq!(merged.top_p, None);
    }

    #[test]
    fn test_merge_rejects_bad_input() {
        let params = GenerationParams::default();
        assert!(params.merged(&json!([1, 2])).is_err());
        assert!(params.merged(&json!({"max_new_tokens": "many"})).is_err());
        assert_eq!(params.merged(&Json::Null).unwrap(), params);
    }
}
