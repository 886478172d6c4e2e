//! LLM generation component

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};
use crate::providers::{GenerationParams, LlmProvider};

/// Completes a prompt with a language model
///
/// Inputs `prompt` (mandatory) and `generation_kwargs` (JSON object overriding the
/// default parameters for one run); outputs `replies` and `meta`, one entry per reply.
pub struct Generator {
    provider: Arc<dyn LlmProvider>,
    params: GenerationParams,
}

impl Generator {
    pub fn new(provider: Arc<dyn LlmProvider>, params: GenerationParams) -> Self {
        Self { provider, params }
    }
}

#[async_trait]
impl Component for Generator {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![
            InputSocket::mandatory("prompt", ValueKind::Text),
            InputSocket::optional("generation_kwargs", ValueKind::Json),
        ]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![
            OutputSocket::new("replies", ValueKind::Texts),
            OutputSocket::new("meta", ValueKind::Meta),
        ]
    }

    async fn warm_up(&self) -> Result<()> {
        if !self.provider.health_check().await? {
            tracing::warn!(
                "{} endpoint for {} is not reachable yet",
                self.provider.name(),
                self.provider.model()
            );
        }
        Ok(())
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let prompt = inputs.require_text("prompt")?;
        let params = match inputs.json("generation_kwargs")? {
            Some(overrides) => self.params.merged(&overrides)?,
            None => self.params.clone(),
        };

        let generation = self.provider.generate(&prompt, &params).await?;
        tracing::info!(
            "{} produced {} replies with {}",
            self.provider.name(),
            generation.replies.len(),
            self.provider.model()
        );

        Ok(Outputs::from([
            ("replies".to_string(), Value::Texts(generation.replies)),
            ("meta".to_string(), Value::Meta(generation.meta)),
        ]))
    }
}
