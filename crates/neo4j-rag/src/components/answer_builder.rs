//! Turns generator replies into `GeneratedAnswer`s with their sources

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};
use crate::types::{Document, GeneratedAnswer};

/// Assembles one answer per reply
///
/// Inputs `query` and `replies` (mandatory), `meta`, `documents`, `pattern`,
/// `reference_pattern`; output `answers`.
#[derive(Default)]
pub struct AnswerBuilder {
    pattern: Option<Regex>,
    reference_pattern: Option<Regex>,
}

impl AnswerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the answer from each reply: the single capture group, or the whole match
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.pattern = Some(compile_pattern(pattern)?);
        Ok(self)
    }

    /// Attach only the documents a reply references, e.g. `\[(\d+)\]` for `[2]`
    pub fn with_reference_pattern(mut self, pattern: &str) -> Result<Self> {
        self.reference_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern)?;
    // captures_len counts the implicit whole-match group
    if regex.captures_len() > 2 {
        return Err(Error::config(format!(
            "Answer pattern '{}' may contain at most one capture group",
            pattern
        )));
    }
    Ok(regex)
}

/// The answer text selected by `pattern`, or the trimmed reply when unset
fn extract_answer(reply: &str, pattern: Option<&Regex>) -> String {
    let Some(pattern) = pattern else {
        return reply.trim().to_string();
    };
    pattern
        .captures(reply)
        .and_then(|captures| captures.get(1).or_else(|| captures.get(0)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// 0-based indices of the documents a reply cites with 1-based references
fn referenced_indices(reply: &str, pattern: &Regex) -> BTreeSet<usize> {
    pattern
        .captures_iter(reply)
        .filter_map(|captures| captures.get(1).or_else(|| captures.get(0)))
        .filter_map(|m| m.as_str().trim().parse::<usize>().ok())
        .filter(|index| *index > 0)
        .map(|index| index - 1)
        .collect()
}

#[async_trait]
impl Component for AnswerBuilder {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![
            InputSocket::mandatory("query", ValueKind::Text),
            InputSocket::mandatory("replies", ValueKind::Texts),
            InputSocket::optional("meta", ValueKind::Meta),
            InputSocket::optional("documents", ValueKind::Documents),
            InputSocket::optional("pattern", ValueKind::Text),
            InputSocket::optional("reference_pattern", ValueKind::Text),
        ]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("answers", ValueKind::Answers)]
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let query = inputs.require_text("query")?;
        let replies = inputs.require_texts("replies")?;
        let documents = inputs.documents("documents")?.unwrap_or_default();

        let meta = match inputs.meta("meta")? {
            Some(meta) if meta.len() != replies.len() => {
                return Err(Error::component_input(
                    inputs.component(),
                    "meta",
                    format!("got {} entries for {} replies", meta.len(), replies.len()),
                ))
            }
            Some(meta) => meta,
            None => vec![Default::default(); replies.len()],
        };

        let pattern = inputs.text("pattern")?.map(|p| compile_pattern(&p)).transpose()?;
        let pattern = pattern.as_ref().or(self.pattern.as_ref());
        let reference_pattern = inputs
            .text("reference_pattern")?
            .map(|p| Regex::new(&p))
            .transpose()?;
        let reference_pattern = reference_pattern.as_ref().or(self.reference_pattern.as_ref());

        let answers: Vec<GeneratedAnswer> = replies
            .iter()
            .zip(meta)
            .map(|(reply, meta)| {
                let sources: Vec<Document> = match reference_pattern {
                    Some(pattern) => {
                        let referenced = referenced_indices(reply, pattern);
                        documents
                            .iter()
                            .enumerate()
                            .filter(|(index, _)| referenced.contains(index))
                            .map(|(_, document)| document.clone())
                            .collect()
                    }
                    None => documents.clone(),
                };

                GeneratedAnswer {
                    data: extract_answer(reply, pattern),
                    query: query.clone(),
                    documents: sources,
                    meta,
                }
            })
            .collect();

        Ok(Outputs::from([("answers".to_string(), Value::Answers(answers))]))
    }
}
