//! Component trait and socket declarations

use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

use super::value::{Value, ValueKind};
use crate::error::{Error, Result};
use crate::types::{Document, Filter};

/// Values produced by a component run, keyed by output socket
pub type Outputs = HashMap<String, Value>;

/// Declared input port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSocket {
    pub name: String,
    pub kind: ValueKind,
    /// The component cannot run without it
    pub mandatory: bool,
}

impl InputSocket {
    pub fn mandatory(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mandatory: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mandatory: false,
        }
    }
}

/// Declared output port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSocket {
    pub name: String,
    pub kind: ValueKind,
}

impl OutputSocket {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A pipeline node
///
/// Implementations:
/// - `TextEmbedder`, `DocumentEmbedder`: text to vectors
/// - `EmbeddingRetriever`: vector similarity search in a document store
/// - `PromptBuilder`: template rendering
/// - `Generator`: LLM completion
/// - `AnswerBuilder`: replies + documents to `GeneratedAnswer`s
/// - `DocumentWriter`: persistence
#[async_trait]
pub trait Component: Send + Sync {
    /// Input ports, in declaration order
    fn input_sockets(&self) -> Vec<InputSocket>;

    /// Output ports, in declaration order
    fn output_sockets(&self) -> Vec<OutputSocket>;

    /// Load models or open connections before the first run
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Execute once with the collected inputs
    async fn run(&self, inputs: Inputs) -> Result<Outputs>;

    /// Short type name for display
    fn type_name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Inputs collected for one component run
#[derive(Debug, Clone)]
pub struct Inputs {
    component: String,
    values: HashMap<String, Value>,
}

impl Inputs {
    pub fn new(component: impl Into<String>, values: HashMap<String, Value>) -> Self {
        Self {
            component: component.into(),
            values,
        }
    }

    /// Name of the component these inputs belong to
    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn contains(&self, socket: &str) -> bool {
        self.values.contains_key(socket)
    }

    /// Remove a raw value
    pub fn take(&mut self, socket: &str) -> Option<Value> {
        self.values.remove(socket)
    }

    /// Remaining raw values
    pub fn into_values(self) -> HashMap<String, Value> {
        self.values
    }

    fn missing(&self, socket: &str) -> Error {
        Error::component_input(&self.component, socket, "missing mandatory input")
    }

    fn mistyped(&self, socket: &str, expected: ValueKind, got: &Value) -> Error {
        Error::component_input(
            &self.component,
            socket,
            format!("expected {}, got {}", expected, got.kind()),
        )
    }

    fn take_as<T>(
        &mut self,
        socket: &str,
        expected: ValueKind,
        extract: impl FnOnce(Value) -> std::result::Result<T, Value>,
    ) -> Result<Option<T>> {
        match self.values.remove(socket) {
            None => Ok(None),
            Some(value) => extract(value)
                .map(Some)
                .map_err(|value| self.mistyped(socket, expected, &value)),
        }
    }

    pub fn text(&mut self, socket: &str) -> Result<Option<String>> {
        self.take_as(socket, ValueKind::Text, |v| match v {
            Value::Text(s) => Ok(s),
            other => Err(other),
        })
    }

    pub fn require_text(&mut self, socket: &str) -> Result<String> {
        self.text(socket)?.ok_or_else(|| self.missing(socket))
    }

    pub fn texts(&mut self, socket: &str) -> Result<Option<Vec<String>>> {
        self.take_as(socket, ValueKind::Texts, |v| match v {
            Value::Texts(s) => Ok(s),
            other => Err(other),
        })
    }

    pub fn require_texts(&mut self, socket: &str) -> Result<Vec<String>> {
        self.texts(socket)?.ok_or_else(|| self.missing(socket))
    }

    pub fn integer(&mut self, socket: &str) -> Result<Option<i64>> {
        self.take_as(socket, ValueKind::Integer, |v| match v {
            Value::Integer(n) => Ok(n),
            other => Err(other),
        })
    }

    pub fn flag(&mut self, socket: &str) -> Result<Option<bool>> {
        self.take_as(socket, ValueKind::Flag, |v| match v {
            Value::Flag(b) => Ok(b),
            other => Err(other),
        })
    }

    pub fn embedding(&mut self, socket: &str) -> Result<Option<Vec<f32>>> {
        self.take_as(socket, ValueKind::Embedding, |v| match v {
            Value::Embedding(e) => Ok(e),
            other => Err(other),
        })
    }

    pub fn require_embedding(&mut self, socket: &str) -> Result<Vec<f32>> {
        self.embedding(socket)?.ok_or_else(|| self.missing(socket))
    }

    pub fn documents(&mut self, socket: &str) -> Result<Option<Vec<Document>>> {
        self.take_as(socket, ValueKind::Documents, |v| match v {
            Value::Documents(d) => Ok(d),
            other => Err(other),
        })
    }

    pub fn require_documents(&mut self, socket: &str) -> Result<Vec<Document>> {
        self.documents(socket)?.ok_or_else(|| self.missing(socket))
    }

    pub fn meta(&mut self, socket: &str) -> Result<Option<Vec<Map<String, Json>>>> {
        self.take_as(socket, ValueKind::Meta, |v| match v {
            Value::Meta(m) => Ok(m),
            other => Err(other),
        })
    }

    /// Filters may arrive typed or as raw JSON
    pub fn filters(&mut self, socket: &str) -> Result<Option<Filter>> {
        match self.values.remove(socket) {
            None => Ok(None),
            Some(Value::Filters(filter)) => Ok(Some(filter)),
            Some(Value::Json(json)) => Filter::from_json(json).map(Some),
            Some(other) => Err(self.mistyped(socket, ValueKind::Filters, &other)),
        }
    }

    pub fn json(&mut self, socket: &str) -> Result<Option<Json>> {
        self.take_as(socket, ValueKind::Json, |v| match v {
            Value::Json(j) => Ok(j),
            other => Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(values: Vec<(&str, Value)>) -> Inputs {
        Inputs::new(
            "retriever",
            values.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    #[test]
    fn test_typed_access() {
        let mut inputs = inputs(vec![
            ("query_embedding", Value::Embedding(vec![0.1, 0.2])),
            ("top_k", Value::Integer(3)),
        ]);

        assert_eq!(inputs.require_embedding("query_embedding").unwrap(), vec![0.1, 0.2]);
        assert_eq!(inputs.integer("top_k").unwrap(), Some(3));
        assert_eq!(inputs.integer("top_k").unwrap(), None);
    }

    #[test]
    fn test_missing_and_mistyped() {
        let mut inputs = inputs(vec![("top_k", Value::Text("3".into()))]);

        let err = inputs.require_embedding("query_embedding").unwrap_err();
        assert!(err.to_string().contains("query_embedding"));

        let err = inputs.integer("top_k").unwrap_err();
        assert!(err.to_string().contains("expected integer, got text"));
    }

    #[test]
    fn test_filters_from_json() {
        let mut inputs = inputs(vec![(
            "filters",
            Value::Json(json!({"field": "meta.year", "operator": ">", "value": 2000})),
        )]);
        let filter = inputs.filters("filters").unwrap().unwrap();
        assert!(matches!(filter, Filter::Comparison { .. }));
    }
}
