//! Core value types passed between components

pub mod answer;
pub mod document;
pub mod filter;

pub use answer::GeneratedAnswer;
pub use document::{Document, FILE_PATH_KEY};
pub use filter::{ComparisonOperator, Filter, LogicalOperator};
