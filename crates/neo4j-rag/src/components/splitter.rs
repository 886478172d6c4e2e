//! Word-window document splitter

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::error::{Error, Result};
use crate::pipeline::{Component, InputSocket, Inputs, OutputSocket, Outputs, Value, ValueKind};
use crate::types::Document;

/// Splits documents into overlapping windows of words
///
/// Each chunk keeps the source metadata plus `source_id` and `split_id`.
pub struct DocumentSplitter {
    split_length: usize,
    split_overlap: usize,
    word: Regex,
}

impl DocumentSplitter {
    pub fn new(split_length: usize, split_overlap: usize) -> Result<Self> {
        if split_length == 0 {
            return Err(Error::config("split_length must be greater than 0"));
        }
        if split_overlap >= split_length {
            return Err(Error::config("split_overlap must be smaller than split_length"));
        }
        Ok(Self {
            split_length,
            split_overlap,
            word: Regex::new(r"\S+\s*")?,
        })
    }

    /// Byte ranges of the words in `text`, each with its trailing whitespace
    ///
    /// Leading whitespace belongs to the first word, so the ranges cover the whole text.
    fn words(&self, text: &str) -> Vec<(usize, usize)> {
        let mut words: Vec<(usize, usize)> = self.word.find_iter(text).map(|m| (m.start(), m.end())).collect();
        if let Some(first) = words.first_mut() {
            first.0 = 0;
        }
        words
    }

    /// Chunk texts of one document; whitespace is kept with the preceding word
    fn split_text(&self, text: &str) -> Vec<String> {
        let words = self.words(text);
        if words.len() <= self.split_length {
            return vec![text.to_string()];
        }

        let step = self.split_length - self.split_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + self.split_length).min(words.len());
            chunks.push(text[words[start].0..words[end - 1].1].to_string());
            if end == words.len() {
                break;
            }
            start += step;
        }
        chunks
    }

    pub fn split(&self, document: &Document) -> Vec<Document> {
        self.split_text(&document.content)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .enumerate()
            .map(|(index, chunk)| {
                let mut meta = document.meta.clone();
                meta.insert("source_id".into(), json!(document.id));
                meta.insert("split_id".into(), json!(index));
                Document::new(chunk, meta)
            })
            .collect()
    }
}

#[async_trait]
impl Component for DocumentSplitter {
    fn input_sockets(&self) -> Vec<InputSocket> {
        vec![InputSocket::mandatory("documents", ValueKind::Documents)]
    }

    fn output_sockets(&self) -> Vec<OutputSocket> {
        vec![OutputSocket::new("documents", ValueKind::Documents)]
    }

    async fn run(&self, mut inputs: Inputs) -> Result<Outputs> {
        let documents = inputs.require_documents("documents")?;
        let chunks: Vec<Document> = documents.iter().flat_map(|d| self.split(d)).collect();

        tracing::debug!("Split {} documents into {} chunks", documents.len(), chunks.len());
        Ok(Outputs::from([("documents".to_string(), Value::Documents(chunks))]))
    }
}
