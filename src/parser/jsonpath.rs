//! JSONPath subset used by `content[...]` and `jsoncontent[...]` guards
//!
//! Supported syntax: `$`, `.name`, `['name']`, `[n]` (negative counts from
//! the end), `[*]` / `.*`, `..name` / `..*` recursive descent, and a
//! `length(<path>)` wrapper returning the size of the selection.

use crate::{Error, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(Option<String>),
}

/// A parsed JSONPath expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
    length: bool,
}

impl JsonPath {
    pub fn parse(path: &str) -> Result<Self> {
        let raw = path.trim().to_string();
        let (inner, length) = match raw
            .strip_prefix("length(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (inner.trim().to_string(), true),
            None => (raw.clone(), false),
        };

        if inner.is_empty() {
            return Err(Error::json_path(&raw, "empty path"));
        }

        let normalized = if inner.starts_with('$') {
            inner
        } else if inner.starts_with('[') {
            format!("${}", inner)
        } else {
            format!("$.{}", inner)
        };

        let segments = parse_segments(&normalized).map_err(|msg| Error::json_path(&raw, msg))?;
        Ok(Self {
            raw,
            segments,
            length,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the expression is a `length(...)` count
    pub fn is_count(&self) -> bool {
        self.length
    }

    /// Select all matching values
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Child(name) => {
                        if let Some(v) = value.get(name.as_str()) {
                            next.push(v);
                        }
                    }
                    Segment::Index(idx) => {
                        if let Value::Array(items) = value {
                            let len = items.len() as i64;
                            let pos = if *idx < 0 { len + idx } else { *idx };
                            if (0..len).contains(&pos) {
                                next.push(&items[pos as usize]);
                            }
                        }
                    }
                    Segment::Wildcard => children(value, &mut next),
                    Segment::Descendant(name) => descendants(value, name.as_deref(), &mut next),
                }
            }
            current = next;
        }
        current
    }

    /// Evaluate to string values; `length(...)` yields a single count
    pub fn evaluate(&self, root: &Value) -> Vec<String> {
        let selected = self.select(root);
        if self.length {
            let count = match selected.as_slice() {
                [Value::Array(items)] => items.len(),
                [Value::Object(map)] => map.len(),
                [Value::String(s)] => s.chars().count(),
                other => other.len(),
            };
            return vec![count.to_string()];
        }
        selected.into_iter().map(value_to_string).collect()
    }
}

/// Render a JSON value the way guards compare it: strings unquoted
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn children<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => out.extend(items.iter()),
        Value::Object(map) => out.extend(map.values()),
        _ => {}
    }
}

fn descendants<'a>(value: &'a Value, name: Option<&str>, out: &mut Vec<&'a Value>) {
    match name {
        Some(name) => {
            if let Some(v) = value.get(name)
                && value.is_object()
            {
                out.push(v);
            }
        }
        None => children(value, out),
    }

    match value {
        Value::Array(items) => items.iter().for_each(|v| descendants(v, name, out)),
        Value::Object(map) => map.values().for_each(|v| descendants(v, name, out)),
        _ => {}
    }
}

fn parse_segments(path: &str) -> std::result::Result<Vec<Segment>, String> {
    let chars: Vec<char> = path.chars().collect();
    if chars.first() != Some(&'$') {
        return Err("path must start with '$'".to_string());
    }

    let mut segments = Vec::new();
    let mut i = 1;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                let descendant = chars.get(i + 1) == Some(&'.');
                i += if descendant { 2 } else { 1 };
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if name.is_empty() {
                    return Err(format!("missing member name at offset {}", start));
                }
                let segment = match (descendant, name.as_str()) {
                    (true, "*") => Segment::Descendant(None),
                    (true, _) => Segment::Descendant(Some(name)),
                    (false, "*") => Segment::Wildcard,
                    (false, _) => Segment::Child(name),
                };
                segments.push(segment);
            }
            '[' => {
                let start = i + 1;
                let mut quote = None;
                let mut end = None;
                for (j, &c) in chars.iter().enumerate().skip(start) {
                    match (quote, c) {
                        (None, '\'' | '"') => quote = Some(c),
                        (Some(q), c) if c == q => quote = None,
                        (None, ']') => {
                            end = Some(j);
                            break;
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| format!("unclosed '[' at offset {}", i))?;
                let inner: String = chars[start..end].iter().collect();
                segments.push(parse_bracket(inner.trim())?);
                i = end + 1;
            }
            c => return Err(format!("unexpected '{}' at offset {}", c, i)),
        }
    }
    Ok(segments)
}

fn parse_bracket(inner: &str) -> std::result::Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if inner.len() >= 2
        && ((inner.starts_with('\'') && inner.ends_with('\''))
            || (inner.starts_with('"') && inner.ends_with('"')))
    {
        return Ok(Segment::Child(inner[1..inner.len() - 1].to_string()));
    }
    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| format!("unsupported selector '[{}]'", inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "status": "ok",
            "code": 200,
            "items": [
                {"id": 1, "name": "a"},
                {"id": 2, "name": "b", "tags": {"name": "nested"}}
            ]
        })
    }

    #[test]
    fn test_child_and_index() {
        let doc = sample();
        assert_eq!(JsonPath::parse("$.status").unwrap().evaluate(&doc), vec!["ok"]);
        assert_eq!(JsonPath::parse("$.code").unwrap().evaluate(&doc), vec!["200"]);
        assert_eq!(
            JsonPath::parse("$.items[1].name").unwrap().evaluate(&doc),
            vec!["b"]
        );
        assert_eq!(
            JsonPath::parse("$['items'][-1]['id']").unwrap().evaluate(&doc),
            vec!["2"]
        );
    }

    #[test]
    fn test_path_without_root_marker() {
        let doc = sample();
        assert_eq!(JsonPath::parse("status").unwrap().evaluate(&doc), vec!["ok"]);
        assert_eq!(JsonPath::parse("[\"code\"]").unwrap().evaluate(&doc), vec!["200"]);
    }

    #[test]
    fn test_wildcard_and_descendant() {
        let doc = sample();
        assert_eq!(
            JsonPath::parse("$.items[*].id").unwrap().evaluate(&doc),
            vec!["1", "2"]
        );
        assert_eq!(
            JsonPath::parse("$..name").unwrap().evaluate(&doc),
            vec!["a", "b", "nested"]
        );
    }

    #[test]
    fn test_length() {
        let doc = sample();
        let path = JsonPath::parse("length($.items)").unwrap();
        assert!(path.is_count());
        assert_eq!(path.evaluate(&doc), vec!["2"]);
        assert_eq!(
            JsonPath::parse("length($.items[*].id)").unwrap().evaluate(&doc),
            vec!["2"]
        );
        assert_eq!(
            JsonPath::parse("length($.missing)").unwrap().evaluate(&doc),
            vec!["0"]
        );
    }

    #[test]
    fn test_missing_yields_empty() {
        let doc = sample();
        assert!(JsonPath::parse("$.items[5]").unwrap().evaluate(&doc).is_empty());
        assert!(JsonPath::parse("$.status.deeper").unwrap().evaluate(&doc).is_empty());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(matches!(
            JsonPath::parse("$.items[").unwrap_err(),
            Error::InvalidJsonPath { .. }
        ));
        assert!(JsonPath::parse("$.items[abc]").is_err());
        assert!(JsonPath::parse("$.").is_err());
        assert!(JsonPath::parse("").is_err());
    }
}
