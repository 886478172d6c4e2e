//! Payloads carried across component sockets

use serde_json::{Map, Value as Json};
use std::fmt;

use crate::types::{Document, Filter, GeneratedAnswer};

/// A value flowing along a pipeline connection
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Texts(Vec<String>),
    Integer(i64),
    Flag(bool),
    Embedding(Vec<f32>),
    Documents(Vec<Document>),
    /// One metadata map per generated reply
    Meta(Vec<Map<String, Json>>),
    Filters(Filter),
    Answers(Vec<GeneratedAnswer>),
    Json(Json),
}

/// Type tag of a socket or value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Texts,
    Integer,
    Flag,
    Embedding,
    Documents,
    Meta,
    Filters,
    Answers,
    Json,
    /// Accepts or produces any payload
    Any,
}

impl ValueKind {
    /// Whether a socket of this kind can receive a value of kind `other`
    pub fn accepts(self, other: ValueKind) -> bool {
        self == other || self == ValueKind::Any || other == ValueKind::Any
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Texts => "list[text]",
            Self::Integer => "integer",
            Self::Flag => "bool",
            Self::Embedding => "embedding",
            Self::Documents => "list[document]",
            Self::Meta => "list[meta]",
            Self::Filters => "filters",
            Self::Answers => "list[answer]",
            Self::Json => "json",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Texts(_) => ValueKind::Texts,
            Self::Integer(_) => ValueKind::Integer,
            Self::Flag(_) => ValueKind::Flag,
            Self::Embedding(_) => ValueKind::Embedding,
            Self::Documents(_) => ValueKind::Documents,
            Self::Meta(_) => ValueKind::Meta,
            Self::Filters(_) => ValueKind::Filters,
            Self::Answers(_) => ValueKind::Answers,
            Self::Json(_) => ValueKind::Json,
        }
    }

    /// JSON view used by the prompt template engine
    pub fn to_json(&self) -> Json {
        match self {
            Self::Text(s) => Json::String(s.clone()),
            Self::Texts(v) => Json::from(v.clone()),
            Self::Integer(i) => Json::from(*i),
            Self::Flag(b) => Json::Bool(*b),
            Self::Embedding(v) => Json::from(v.iter().map(|x| *x as f64).collect::<Vec<_>>()),
            Self::Documents(docs) => serde_json::to_value(docs).unwrap_or(Json::Null),
            Self::Meta(meta) => Json::Array(meta.iter().cloned().map(Json::Object).collect()),
            Self::Filters(filter) => serde_json::to_value(filter).unwrap_or(Json::Null),
            Self::Answers(answers) => serde_json::to_value(answers).unwrap_or(Json::Null),
            Self::Json(value) => value.clone(),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::Texts(v)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Integer(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Self::Embedding(v)
    }
}

impl From<Vec<Document>> for Value {
    fn from(docs: Vec<Document>) -> Self {
        Self::Documents(docs)
    }
}

impl From<Filter> for Value {
    fn from(filter: Filter) -> Self {
        Self::Filters(filter)
    }
}

impl From<Vec<GeneratedAnswer>> for Value {
    fn from(answers: Vec<GeneratedAnswer>) -> Self {
        Self::Answers(answers)
    }
}

impl From<Json> for Value {
    fn from(value: Json) -> Self {
        Self::Json(value)
    }
}
