//! Metadata filters
//!
//! Filters are trees of comparisons joined by logical operators:
//!
//! ```json
//! {"operator": "AND", "conditions": [
//!     {"field": "meta.type", "operator": "==", "value": "article"},
//!     {"field": "meta.year", "operator": ">=", "value": 2011}
//! ]}
//! ```
//!
//! The same tree is evaluated in memory and compiled to Cypher by the Neo4j store.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;

use super::document::Document;
use crate::error::{Error, Result};

/// Logical operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
    #[serde(rename = "NOT")]
    Not,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
        };
        f.write_str(s)
    }
}

/// A metadata filter tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// Logical combination of sub-filters
    Logical {
        operator: LogicalOperator,
        conditions: Vec<Filter>,
    },
    /// Comparison of a document field against a value
    Comparison {
        field: String,
        operator: ComparisonOperator,
        value: Json,
    },
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Json>) -> Self {
        Self::compare(field, ComparisonOperator::Eq, value)
    }

    /// Generic comparison
    pub fn compare(field: impl Into<String>, operator: ComparisonOperator, value: impl Into<Json>) -> Self {
        Self::Comparison {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn and(conditions: Vec<Filter>) -> Self {
        Self::Logical {
            operator: LogicalOperator::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<Filter>) -> Self {
        Self::Logical {
            operator: LogicalOperator::Or,
            conditions,
        }
    }

    pub fn not(conditions: Vec<Filter>) -> Self {
        Self::Logical {
            operator: LogicalOperator::Not,
            conditions,
        }
    }

    /// Parse a filter from JSON
    pub fn from_json(value: Json) -> Result<Self> {
        let filter: Filter = serde_json::from_value(value)
            .map_err(|e| Error::filter(format!("Malformed filter: {}", e)))?;
        filter.validate()?;
        Ok(filter)
    }

    /// Structural checks shared by every backend
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::Logical { operator, conditions } => {
                if conditions.is_empty() {
                    return Err(Error::filter(format!("{:?} requires at least one condition", operator)));
                }
                conditions.iter().try_for_each(Filter::validate)
            }
            Filter::Comparison { field, operator, value } => {
                if field.trim().is_empty() {
                    return Err(Error::filter("Comparison field must not be empty"));
                }
                match operator {
                    ComparisonOperator::In | ComparisonOperator::NotIn if !value.is_array() => Err(
                        Error::filter(format!("'{}' on '{}' requires a list value", operator, field)),
                    ),
                    ComparisonOperator::Gt
                    | ComparisonOperator::Gte
                    | ComparisonOperator::Lt
                    | ComparisonOperator::Lte
                        if !(value.is_number() || value.is_string()) =>
                    {
                        Err(Error::filter(format!(
                            "'{}' on '{}' requires a number or string value",
                            operator, field
                        )))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, document: &Document) -> Result<bool> {
        match self {
            Filter::Logical { operator, conditions } => {
                let mut results = Vec::with_capacity(conditions.len());
                for condition in conditions {
                    results.push(condition.matches(document)?);
                }
                Ok(match operator {
                    LogicalOperator::And => results.iter().all(|r| *r),
                    LogicalOperator::Or => results.iter().any(|r| *r),
                    LogicalOperator::Not => !results.iter().all(|r| *r),
                })
            }
            Filter::Comparison { field, operator, value } => {
                let actual = document.field(field).filter(|v| !v.is_null());
                compare(actual.as_ref(), *operator, value, field)
            }
        }
    }
}

fn compare(actual: Option<&Json>, operator: ComparisonOperator, expected: &Json, field: &str) -> Result<bool> {
    use ComparisonOperator::*;

    match operator {
        Eq => Ok(match actual {
            Some(actual) => json_eq(actual, expected),
            None => expected.is_null(),
        }),
        Ne => compare(actual, Eq, expected, field).map(|eq| !eq),
        In | NotIn => {
            let list = expected
                .as_array()
                .ok_or_else(|| Error::filter(format!("'{}' on '{}' requires a list value", operator, field)))?;
            let found = actual.map_or(false, |a| list.iter().any(|v| json_eq(a, v)));
            Ok(if operator == In { found } else { !found })
        }
        Gt | Gte | Lt | Lte => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            let ordering = json_cmp(actual, expected).ok_or_else(|| {
                Error::filter(format!(
                    "Cannot compare '{}' value {} with {} using '{}'",
                    field, actual, expected, operator
                ))
            })?;
            Ok(match operator {
                Gt => ordering == Ordering::Greater,
                Gte => ordering != Ordering::Less,
                Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
    }
}

fn json_eq(a: &Json, b: &Json) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
