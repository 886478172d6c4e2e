//! Prompt rendering component

use async_trait::async_trait;
use serde_json::Map;

use super::template::Template;
use crate::error::{Error, Result};
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};

/// Socket carrying a per-run template replacement
const TEMPLATE_SOCKET: &str = "template";

/// Renders a prompt template from its inputs
///
/// Every variable the template reads becomes an optional input socket of kind
/// `Any`; `required_variables` makes some of them mandatory. Output `prompt`.
pub struct PromptBuilder {
    template: Template,
    required: Vec<String>,
}

impl PromptBuilder {
    /// Compile the template; malformed templates fail here
    pub fn new(template: &str) -> Result<Self> {
        let template = Template::parse(template)?;
        if template.variables().iter().any(|v| v == TEMPLATE_SOCKET) {
            return Err(Error::template(format!(
                "'{}' is reserved and cannot be used as a template variable",
                TEMPLATE_SOCKET
            )));
        }
        Ok(Self {
            template,
            required: Vec::new(),
        })
    }

    /// Variables that must be supplied on every run
    pub fn with_required_variables(mut self, required: Vec<String>) -> Result<Self> {
        if let Some(unknown) = required.iter().find(|r| !self.template.variables().contains(*r)) {
            return Err(Error::template(format!("Required variable '{}' is not used by the template", unknown)));
        }
        self.required = required;
        Ok(self)
    }

    pub fn variables(&self) -> &[String] {
        self.template.variables()
    }
}

#[async_trait]
impl Component for PromptBuilder {
    fn input_sockets(&self) -> Vec<InputSocket> {
        let mut sockets: Vec<InputSocket> = self
            .template
            .variables()
            .iter()
            .map(|name| {
                if self.required.contains(name) {
                    InputSocket::mandatory(name.clone(), ValueKind::Any)
                } else {
                    InputSocket::optional(name.clone(), ValueKind::Any)
                }
            })
            .collect();
        sockets.push(InputSocket::optional(TEMPLATE_SOCKET, ValueKind::Text));
        sockets
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("prompt", ValueKind::Text)]
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let override_template = inputs.text(TEMPLATE_SOCKET)?.map(|t| Template::parse(&t)).transpose()?;
        let template = override_template.as_ref().unwrap_or(&self.template);

        let context: Map<_, _> = inputs
            .into_values()
            .into_iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect();

        let prompt = template.render(&context)?;
        tracing::debug!("Rendered prompt ({} chars)", prompt.len());

        Ok(Outputs::from([("prompt".to_string(), Value::Text(prompt))]))
    }
}
