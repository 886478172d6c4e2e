//! Cypher helpers: identifier checks, metadata flattening and filter compilation
//!
//! Filters compile to a `WHERE` clause over a node variable with every literal
//! passed as a parameter (`$p0`, `$p1`, ...). Comparisons that Cypher would
//! evaluate to `null` on a missing property are wrapped in `coalesce(.., false)`
//! so `NOT` behaves the same as in-memory evaluation.

use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::types::{ComparisonOperator, Filter, LogicalOperator};

/// Node properties that never hold metadata
pub const RESERVED_PROPERTIES: &[&str] = &["id", "content", "embedding", "score"];

/// Names usable for labels, properties and indexes: `[A-Za-z_][A-Za-z0-9_-]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Backtick-quote a validated identifier
pub fn quote(name: &str) -> String {
    format!("`{}`", name)
}

/// Flatten nested metadata into node properties: `{"a": {"b": 1}}` becomes `a_b = 1`
pub fn flatten_meta(meta: &Map<String, Json>) -> Result<Map<String, Json>> {
    let mut flat = Map::new();
    flatten_into(&mut flat, "", meta);

    for key in flat.keys() {
        if RESERVED_PROPERTIES.contains(&key.as_str()) {
            return Err(Error::document_store(format!("Metadata key '{}' is reserved", key)));
        }
    }
    Ok(flat)
}

fn flatten_into(flat: &mut Map<String, Json>, prefix: &str, meta: &Map<String, Json>) {
    for (key, value) in meta {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}_{}", prefix, key)
        };
        match value {
            Json::Object(inner) => flatten_into(flat, &name, inner),
            Json::Null => {}
            other => {
                flat.insert(name, other.clone());
            }
        }
    }
}

/// Node property addressed by a filter field (`id`, `content`, `meta.a.b`)
pub fn property_for_field(field: &str) -> Result<String> {
    let property = match field {
        "id" | "content" => field.to_string(),
        _ => field.strip_prefix("meta.").unwrap_or(field).replace('.', "_"),
    };

    if matches!(property.as_str(), "embedding" | "score") {
        return Err(Error::filter(format!("Field '{}' cannot be filtered on", field)));
    }
    if !is_valid_identifier(&property) {
        return Err(Error::filter(format!("Invalid filter field '{}'", field)));
    }
    Ok(property)
}

/// A compiled `WHERE` condition and its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub clause: String,
    pub params: Map<String, Json>,
}

/// Compile a filter against node variable `node`
pub fn compile_filter(filter: &Filter, node: &str) -> Result<CompiledFilter> {
    filter.validate()?;
    let mut params = Map::new();
    let clause = compile(filter, node, &mut params)?;
    Ok(CompiledFilter { clause, params })
}

fn compile(filter: &Filter, node: &str, params: &mut Map<String, Json>) -> Result<String> {
    match filter {
        Filter::Logical { operator, conditions } => {
            let parts = conditions
                .iter()
                .map(|c| compile(c, node, params))
                .collect::<Result<Vec<_>>>()?;
            Ok(match operator {
                LogicalOperator::And => format!("({})", parts.join(" AND ")),
                LogicalOperator::Or => format!("({})", parts.join(" OR ")),
                LogicalOperator::Not => format!("NOT ({})", parts.join(" AND ")),
            })
        }
        Filter::Comparison { field, operator, value } => {
            let property = format!("{}.{}", node, quote(&property_for_field(field)?));

            if value.is_null() {
                return match operator {
                    ComparisonOperator::Eq => Ok(format!("{} IS NULL", property)),
                    ComparisonOperator::Ne => Ok(format!("{} IS NOT NULL", property)),
                    _ => Err(Error::filter(format!("'{}' on '{}' does not accept null", operator, field))),
                };
            }

            let param = format!("p{}", params.len());
            params.insert(param.clone(), value.clone());

            Ok(match operator {
                ComparisonOperator::Eq => format!("coalesce({} = ${}, false)", property, param),
                ComparisonOperator::Ne => format!("({0} IS NULL OR {0} <> ${1})", property, param),
                ComparisonOperator::Gt => format!("coalesce({} > ${}, false)", property, param),
                ComparisonOperator::Gte => format!("coalesce({} >= ${}, false)", property, param),
                ComparisonOperator::Lt => format!("coalesce({} < ${}, false)", property, param),
                ComparisonOperator::Lte => format!("coalesce({} <= ${}, false)", property, param),
                ComparisonOperator::In => format!("coalesce({} IN ${}, false)", property, param),
                ComparisonOperator::NotIn => format!("({0} IS NULL OR NOT {0} IN ${1})", property, param),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("document-embeddings"));
        assert!(is_valid_identifier("Document"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a`b"));
        assert!(!is_valid_identifier("a b"));
    }

    #[test]
    fn test_flatten_meta() {
        let meta = json!({"file_path": "a.txt", "source": {"page": 3, "kind": "pdf"}, "empty": null});
        let flat = flatten_meta(meta.as_object().unwrap()).unwrap();

        assert_eq!(flat["file_path"], "a.txt");
        assert_eq!(flat["source_page"], 3);
        assert_eq!(flat["source_kind"], "pdf");
        assert!(!flat.contains_key("empty"));

        let reserved = json!({"content": "x"});
        assert!(flatten_meta(reserved.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_compile_comparison() {
        let compiled = compile_filter(&Filter::eq("meta.file_path", "a.txt"), "doc").unwrap();
        assert_eq!(compiled.clause, "coalesce(doc.`file_path` = $p0, false)");
        assert_eq!(compiled.params["p0"], "a.txt");
    }

    #[test]
    fn test_compile_nested_logical() {
        let filter = Filter::or(vec![
            Filter::and(vec![
                Filter::compare("meta.source.page", ComparisonOperator::Gte, 2),
                Filter::compare("meta.lang", ComparisonOperator::NotIn, json!(["de", "fr"])),
            ]),
            Filter::not(vec![Filter::compare("id", ComparisonOperator::Ne, "abc")]),
        ]);
        let compiled = compile_filter(&filter, "doc").unwrap();

        assert_eq!(
            compiled.clause,
            "((coalesce(doc.`source_page` >= $p0, false) AND (doc.`lang` IS NULL OR NOT doc.`lang` IN $p1)) \
             OR NOT ((doc.`id` IS NULL OR doc.`id` <> $p2)))"
        );
        assert_eq!(compiled.params.len(), 3);
        assert_eq!(compiled.params["p1"], json!(["de", "fr"]));
    }

    #[test]
    fn test_compile_null_and_invalid() {
        let compiled = compile_filter(&Filter::eq("meta.author", Json::Null), "doc").unwrap();
        assert_eq!(compiled.clause, "doc.`author` IS NULL");
        assert!(compiled.params.is_empty());

        assert!(compile_filter(&Filter::eq("embedding", 1), "doc").is_err());
        assert!(compile_filter(&Filter::eq("meta.bad field", 1), "doc").is_err());
        assert!(compile_filter(&Filter::compare("meta.x", ComparisonOperator::Gt, Json::Null), "doc").is_err());
    }
}
