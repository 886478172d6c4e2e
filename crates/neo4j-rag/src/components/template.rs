//! Minimal Jinja-style templates for prompts
//!
//! Supported syntax:
//! - `{{ path.to.value }}` substitution (undefined renders empty)
//! - `{% for x in xs %}...{% endfor %}` with `loop.index`, `loop.index0`, `loop.first`, `loop.last`
//! - `{% if cond %}...{% elif cond %}...{% else %}...{% endif %}` where `cond` is
//!   `[not] operand [(== | !=) operand]`
//! - `{# comments #}` and `-` whitespace control on either side of a tag

use serde_json::{json, Map, Value as Json};
use std::collections::BTreeSet;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Expr(String),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Vec<String>),
    Literal(Json),
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    negated: bool,
    left: Operand,
    comparison: Option<(bool, Operand)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(Operand),
    For {
        item: String,
        iterable: Operand,
        body: Vec<Node>,
    },
    If {
        branches: Vec<(Condition, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
    variables: Vec<String>,
}

impl Template {
    /// Parse a template; malformed templates are rejected here, not at render time
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let (nodes, end) = parser.parse_block(&[])?;
        if let Some(tag) = end {
            return Err(Error::template(format!("Unexpected '{{% {} %}}'", tag)));
        }

        let mut variables = BTreeSet::new();
        collect_variables(&nodes, &mut Vec::new(), &mut variables);

        Ok(Self {
            nodes,
            variables: variables.into_iter().collect(),
        })
    }

    /// Top-level names the template reads, sorted
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Render against a context of top-level variables
    pub fn render(&self, context: &Map<String, Json>) -> Result<String> {
        let mut scope = Scope {
            frames: vec![context.clone()],
        };
        let mut out = String::new();
        render_nodes(&self.nodes, &mut scope, &mut out)?;
        Ok(out)
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut trim_next = false;

    while !rest.is_empty() {
        let next = ["{{", "{%", "{#"]
            .iter()
            .filter_map(|open| rest.find(open).map(|i| (i, *open)))
            .min_by_key(|(i, _)| *i);

        let Some((start, open)) = next else {
            push_text(&mut tokens, rest, trim_next, false);
            break;
        };

        let close = match open {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let inner_start = start + 2;
        let end = rest[inner_start..]
            .find(close)
            .map(|i| inner_start + i)
            .ok_or_else(|| Error::template(format!("Unclosed '{}'", open)))?;

        let mut inner = &rest[inner_start..end];
        let trim_before = inner.starts_with('-');
        if trim_before {
            inner = &inner[1..];
        }
        let trim_after = inner.ends_with('-');
        if trim_after {
            inner = &inner[..inner.len() - 1];
        }

        push_text(&mut tokens, &rest[..start], trim_next, trim_before);
        match open {
            "{{" => tokens.push(Token::Expr(inner.trim().to_string())),
            "{%" => tokens.push(Token::Tag(inner.trim().to_string())),
            _ => {}
        }

        trim_next = trim_after;
        rest = &rest[end + 2..];
    }

    Ok(tokens)
}

fn push_text(tokens: &mut Vec<Token>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse nodes until one of `terminators` (returned) or the end of input
    fn parse_block(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Expr(expr) => nodes.push(Node::Var(parse_operand(&expr)?)),
                Token::Tag(tag) => {
                    let keyword = tag.split_whitespace().next().unwrap_or_default();
                    if terminators.contains(&keyword) {
                        return Ok((nodes, Some(tag)));
                    }
                    match keyword {
                        "for" => nodes.push(self.parse_for(&tag)?),
                        "if" => nodes.push(self.parse_if(&tag)?),
                        _ => return Err(Error::template(format!("Unexpected '{{% {} %}}'", tag))),
                    }
                }
            }
        }

        Ok((nodes, None))
    }

    fn parse_for(&mut self, tag: &str) -> Result<Node> {
        let parts: Vec<&str> = tag.split_whitespace().collect();
        let [_, item, "in", iterable] = parts.as_slice() else {
            return Err(Error::template(format!("Malformed loop '{{% {} %}}'", tag)));
        };
        if !is_name(item) {
            return Err(Error::template(format!("Invalid loop variable '{}'", item)));
        }
        let iterable = parse_operand(iterable)?;

        let (body, end) = self.parse_block(&["endfor"])?;
        if end.is_none() {
            return Err(Error::template("Missing '{% endfor %}'"));
        }

        Ok(Node::For {
            item: item.to_string(),
            iterable,
            body,
        })
    }

    fn parse_if(&mut self, tag: &str) -> Result<Node> {
        let mut branches = Vec::new();
        let mut condition = parse_condition(tag_argument(tag, "if"))?;

        loop {
            let (body, end) = self.parse_block(&["elif", "else", "endif"])?;
            let end = end.ok_or_else(|| Error::template("Missing '{% endif %}'"))?;
            branches.push((condition, body));

            match end.split_whitespace().next().unwrap_or_default() {
                "elif" => condition = parse_condition(tag_argument(&end, "elif"))?,
                "else" => {
                    let (otherwise, end) = self.parse_block(&["endif"])?;
                    if end.is_none() {
                        return Err(Error::template("Missing '{% endif %}'"));
                    }
                    return Ok(Node::If { branches, otherwise });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }
}

fn tag_argument<'a>(tag: &'a str, keyword: &str) -> &'a str {
    tag.strip_prefix(keyword).unwrap_or(tag).trim()
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_operand(expr: &str) -> Result<Operand> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::template("Empty expression"));
    }

    if expr.len() >= 2 && ((expr.starts_with('"') && expr.ends_with('"')) || (expr.starts_with('\'') && expr.ends_with('\''))) {
        return Ok(Operand::Literal(Json::String(expr[1..expr.len() - 1].to_string())));
    }
    match expr {
        "true" | "True" => return Ok(Operand::Literal(Json::Bool(true))),
        "false" | "False" => return Ok(Operand::Literal(Json::Bool(false))),
        "none" | "None" | "null" => return Ok(Operand::Literal(Json::Null)),
        _ => {}
    }
    if let Ok(number) = serde_json::from_str::<serde_json::Number>(expr) {
        return Ok(Operand::Literal(Json::Number(number)));
    }

    let path: Vec<String> = expr.split('.').map(str::to_string).collect();
    if !path.iter().all(|segment| is_name(segment) || segment.parse::<usize>().is_ok()) || !is_name(&path[0]) {
        return Err(Error::template(format!("Unsupported expression '{}'", expr)));
    }
    Ok(Operand::Path(path))
}

fn parse_condition(expr: &str) -> Result<Condition> {
    let (negated, expr) = match expr.strip_prefix("not ") {
        Some(rest) => (true, rest.trim()),
        None => (false, expr),
    };

    let comparison = ["==", "!="]
        .iter()
        .find_map(|op| expr.split_once(op).map(|(l, r)| (*op, l, r)));

    Ok(match comparison {
        Some((op, left, right)) => Condition {
            negated,
            left: parse_operand(left)?,
            comparison: Some((op == "==", parse_operand(right)?)),
        },
        None => Condition {
            negated,
            left: parse_operand(expr)?,
            comparison: None,
        },
    })
}

fn note_variable(operand: &Operand, bound: &[String], out: &mut BTreeSet<String>) {
    if let Operand::Path(path) = operand {
        if !bound.contains(&path[0]) {
            out.insert(path[0].clone());
        }
    }
}

fn collect_variables(nodes: &[Node], bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Var(operand) => note_variable(operand, bound, out),
            Node::For { item, iterable, body } => {
                note_variable(iterable, bound, out);
                bound.push(item.clone());
                bound.push("loop".to_string());
                collect_variables(body, bound, out);
                bound.truncate(bound.len() - 2);
            }
            Node::If { branches, otherwise } => {
                for (condition, body) in branches {
                    note_variable(&condition.left, bound, out);
                    if let Some((_, right)) = &condition.comparison {
                        note_variable(right, bound, out);
                    }
                    collect_variables(body, bound, out);
                }
                collect_variables(otherwise, bound, out);
            }
        }
    }
}

/// Variable frames, innermost last
struct Scope {
    frames: Vec<Map<String, Json>>,
}

impl Scope {
    fn lookup(&self, path: &[String]) -> Option<&Json> {
        let (first, rest) = path.split_first()?;
        let mut current = self.frames.iter().rev().find_map(|frame| frame.get(first))?;
        for segment in rest {
            current = match current {
                Json::Object(map) => map.get(segment)?,
                Json::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn resolve(&self, operand: &Operand) -> Json {
        match operand {
            Operand::Literal(value) => value.clone(),
            Operand::Path(path) => self.lookup(path).cloned().unwrap_or(Json::Null),
        }
    }

    fn test(&self, condition: &Condition) -> bool {
        let left = self.resolve(&condition.left);
        let result = match &condition.comparison {
            None => truthy(&left),
            Some((equal, right)) => loose_eq(&left, &self.resolve(right)) == *equal,
        };
        result != condition.negated
    }
}

fn truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(items) => !items.is_empty(),
        Json::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(a: &Json, b: &Json) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn render_value(value: &Json, out: &mut String) {
    match value {
        Json::Null => {}
        Json::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

fn render_nodes(nodes: &[Node], scope: &mut Scope, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(operand) => render_value(&scope.resolve(operand), out),
            Node::For { item, iterable, body } => {
                let items = match scope.resolve(iterable) {
                    Json::Array(items) => items,
                    Json::Null => Vec::new(),
                    Json::Object(map) => map.into_iter().map(|(k, _)| Json::String(k)).collect(),
                    other => {
                        return Err(Error::template(format!("Cannot iterate over {}", other)));
                    }
                };

                let len = items.len();
                for (index, value) in items.into_iter().enumerate() {
                    let mut frame = Map::new();
                    frame.insert(item.clone(), value);
                    frame.insert(
                        "loop".to_string(),
                        json!({
                            "index": index + 1,
                            "index0": index,
                            "first": index == 0,
                            "last": index + 1 == len,
                            "length": len,
                        }),
                    );
                    scope.frames.push(frame);
                    let result = render_nodes(body, scope, out);
                    scope.frames.pop();
                    result?;
                }
            }
            Node::If { branches, otherwise } => {
                let body = branches
                    .iter()
                    .find(|(condition, _)| scope.test(condition))
                    .map(|(_, body)| body)
                    .unwrap_or(otherwise);
                render_nodes(body, scope, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PROMPT_TEMPLATE;

    fn context(value: Json) -> Map<String, Json> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_prompt() {
        let template = Template::parse(DEFAULT_PROMPT_TEMPLATE).unwrap();
        assert_eq!(template.variables(), ["documents", "question"]);

        let rendered = template
            .render(&context(json!({
                "documents": [{"content": "A"}, {"content": "B"}],
                "question": "Who?"
            })))
            .unwrap();

        assert_eq!(
            rendered,
            "\nGiven these documents, answer the question.\nDocuments:\n\n    A\n\n    B\n\n\n\nQuestion: Who?\n\nAnswer:\n"
        );
    }

    #[test]
    fn test_undefined_renders_empty() {
        let template = Template::parse("[{{ missing }}][{{ a.b.c }}]").unwrap();
        assert_eq!(template.render(&Map::new()).unwrap(), "[][]");
    }

    #[test]
    fn test_nested_loops_and_loop_variables() {
        let template = Template::parse(
            "{% for g in groups %}{{ g.name }}:{% for i in g.items %}{{ i }}{% if not loop.last %},{% endif %}{% endfor %};{% endfor %}",
        )
        .unwrap();
        assert_eq!(template.variables(), ["groups"]);

        let rendered = template
            .render(&context(json!({"groups": [
                {"name": "a", "items": [1, 2]},
                {"name": "b", "items": ["x"]}
            ]})))
            .unwrap();
        assert_eq!(rendered, "a:1,2;b:x;");
    }

    #[test]
    fn test_conditionals() {
        let template = Template::parse(
            "{% if mode == 'short' %}S{% elif mode %}M={{ mode }}{% else %}none{% endif %}",
        )
        .unwrap();

        assert_eq!(template.render(&context(json!({"mode": "short"}))).unwrap(), "S");
        assert_eq!(template.render(&context(json!({"mode": "long"}))).unwrap(), "M=long");
        assert_eq!(template.render(&Map::new()).unwrap(), "none");
    }

    #[test]
    fn test_whitespace_control_and_comments() {
        let template = Template::parse("{# note #}a  {%- if x -%}  b  {%- endif %}").unwrap();
        assert_eq!(template.render(&context(json!({"x": true}))).unwrap(), "ab");
    }

    #[test]
    fn test_malformed_templates() {
        assert!(Template::parse("{{ question ").is_err());
        assert!(Template::parse("{% for doc documents %}{% endfor %}").is_err());
        assert!(Template::parse("{% for doc in documents %}").is_err());
        assert!(Template::parse("{% if x %}").is_err());
        assert!(Template::parse("{% endfor %}").is_err());
        assert!(Template::parse("{% include 'x' %}").is_err());
        assert!(Template::parse("{{ a | upper }}").is_err());
    }
}
