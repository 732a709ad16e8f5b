//! Deferred-reference templates
//!
//! Guard values, message URLs and bodies may embed references that are only
//! resolved while a test runs:
//!
//! - `$$name$$`: a pattern constant
//! - `$$test.<id>|pattern|<key>$$`, `$$test.<id>|<state>|content|<path>$$`,
//!   `$$test.<id>|<state>|headers|<name>$$`: data recorded by an earlier test
//! - `$$<state>|content|<path>$$`, `$$<state>|headers|<name>$$`,
//!   `$$<state>|counter$$`: data captured by a state of the current run
//! - `%counter.<state>%`: the loop counter of a state
//!
//! Parsing is strict: every reference must match exactly one form.

use crate::{Error, Result};
use std::fmt;

const MARKER: &str = "$$";
const COUNTER_PREFIX: &str = "%counter.";

/// Part of a captured state that a reference reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePart {
    Content,
    Headers,
    Counter,
}

impl StatePart {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "content" => Some(StatePart::Content),
            "headers" | "header" => Some(StatePart::Headers),
            "counter" => Some(StatePart::Counter),
            _ => None,
        }
    }
}

/// Reference to data recorded by a previous test run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrossTestRef {
    Pattern { test_id: String, key: String },
    Content { test_id: String, state: String, path: String },
    Header { test_id: String, state: String, name: String },
}

/// The body of a `$$...$$` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    PatternConstant(String),
    CrossTest(CrossTestRef),
    StateValue {
        state: String,
        part: StatePart,
        identifier: String,
    },
}

impl Reference {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(Error::reference("empty $$ $$ expression"));
        }

        if let Some(rest) = expr.strip_prefix("test.") {
            return parse_cross_test(expr, rest).map(Reference::CrossTest);
        }

        if expr.contains('|') {
            let parts: Vec<&str> = expr.splitn(3, '|').collect();
            let state = parts[0].trim();
            let part = parts
                .get(1)
                .and_then(|p| StatePart::parse(p.trim()))
                .ok_or_else(|| {
                    Error::reference(format!(
                        "'{}' must be <state>|content|<path>, <state>|headers|<name> or <state>|counter",
                        expr
                    ))
                })?;
            let identifier = parts.get(2).map(|s| s.trim().to_string()).unwrap_or_default();
            if state.is_empty() {
                return Err(Error::reference(format!("'{}' names no state", expr)));
            }
            if part != StatePart::Counter && identifier.is_empty() {
                return Err(Error::reference(format!("'{}' is missing an identifier", expr)));
            }
            return Ok(Reference::StateValue {
                state: state.to_string(),
                part,
                identifier,
            });
        }

        if expr.chars().any(char::is_whitespace) {
            return Err(Error::reference(format!(
                "'{}' is not a valid pattern constant name",
                expr
            )));
        }
        Ok(Reference::PatternConstant(expr.to_string()))
    }
}

fn parse_cross_test(expr: &str, rest: &str) -> Result<CrossTestRef> {
    let parts: Vec<&str> = rest.splitn(4, '|').map(str::trim).collect();
    let invalid = || {
        Error::reference(format!(
            "'{}' must be test.<id>|pattern|<key>, test.<id>|<state>|content|<path> or test.<id>|<state>|headers|<name>",
            expr
        ))
    };

    match parts.as_slice() {
        [id, kind, key] if kind.eq_ignore_ascii_case("pattern") && !id.is_empty() && !key.is_empty() => {
            Ok(CrossTestRef::Pattern {
                test_id: id.to_string(),
                key: key.to_string(),
            })
        }
        [id, state, part, ident] if !id.is_empty() && !state.is_empty() && !ident.is_empty() => {
            match StatePart::parse(part) {
                Some(StatePart::Content) => Ok(CrossTestRef::Content {
                    test_id: id.to_string(),
                    state: state.to_string(),
                    path: ident.to_string(),
                }),
                Some(StatePart::Headers) => Ok(CrossTestRef::Header {
                    test_id: id.to_string(),
                    state: state.to_string(),
                    name: ident.to_string(),
                }),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

/// One piece of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference(Reference),
    /// `%counter.<state>%`
    CounterMacro(String),
}

/// A string with embedded deferred references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse both `$$...$$` references and `%counter.X%` macros
    pub fn parse(input: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = input;
        while let Some(start) = rest.find(MARKER) {
            push_literal(&mut segments, &rest[..start])?;
            let after = &rest[start + MARKER.len()..];
            let end = after.find(MARKER).ok_or_else(|| {
                Error::reference(format!("unterminated $$ reference in '{}'", input))
            })?;
            segments.push(Segment::Reference(Reference::parse(&after[..end])?));
            rest = &after[end + MARKER.len()..];
        }
        push_literal(&mut segments, rest)?;

        Ok(Self {
            raw: input.to_string(),
            segments,
        })
    }

    /// Parse only `%counter.X%` macros, leaving `$$` text untouched
    pub fn parse_counters(input: &str) -> Result<Self> {
        let mut segments = Vec::new();
        push_literal(&mut segments, input)?;
        Ok(Self {
            raw: input.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when nothing needs resolving
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn has_references(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Reference(_)))
    }

    /// Labels of every state the template reads from
    pub fn referenced_states(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Reference(Reference::StateValue { state, .. }) => Some(state.as_str()),
                Segment::CounterMacro(state) => Some(state.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<()> {
    let mut rest = text;
    while let Some(start) = rest.find(COUNTER_PREFIX) {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + COUNTER_PREFIX.len()..];
        let end = after
            .find('%')
            .ok_or_else(|| Error::reference(format!("unterminated counter macro in '{}'", text)))?;
        let state = after[..end].trim();
        if state.is_empty() {
            return Err(Error::reference("counter macro names no state"));
        }
        segments.push(Segment::CounterMacro(state.to_string()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        let t = Template::parse("200").unwrap();
        assert!(t.is_literal());
        assert_eq!(t.segments(), &[Segment::Literal("200".to_string())]);
    }

    #[test]
    fn test_pattern_constant() {
        let t = Template::parse("$$expected_status$$").unwrap();
        assert_eq!(
            t.segments(),
            &[Segment::Reference(Reference::PatternConstant(
                "expected_status".to_string()
            ))]
        );
    }

    #[test]
    fn test_state_value_with_json_path() {
        let t = Template::parse("id=$$create|content|$.items[0].id$$").unwrap();
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("id=".to_string()),
                Segment::Reference(Reference::StateValue {
                    state: "create".to_string(),
                    part: StatePart::Content,
                    identifier: "$.items[0].id".to_string(),
                })
            ]
        );
        assert_eq!(t.referenced_states(), vec!["create"]);
    }

    #[test]
    fn test_state_counter_reference() {
        let r = Reference::parse("poll|counter").unwrap();
        assert_eq!(
            r,
            Reference::StateValue {
                state: "poll".to_string(),
                part: StatePart::Counter,
                identifier: String::new(),
            }
        );
    }

    #[test]
    fn test_cross_test_forms() {
        assert_eq!(
            Reference::parse("test.t1|pattern|host").unwrap(),
            Reference::CrossTest(CrossTestRef::Pattern {
                test_id: "t1".to_string(),
                key: "host".to_string()
            })
        );
        assert_eq!(
            Reference::parse("test.t1|wait|headers|etag").unwrap(),
            Reference::CrossTest(CrossTestRef::Header {
                test_id: "t1".to_string(),
                state: "wait".to_string(),
                name: "etag".to_string()
            })
        );
        assert!(matches!(
            Reference::parse("test.t1|wait|content|/a/b").unwrap(),
            Reference::CrossTest(CrossTestRef::Content { .. })
        ));
    }

    #[test]
    fn test_counter_macro() {
        let t = Template::parse("coap://node/item/%counter.loop%").unwrap();
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("coap://node/item/".to_string()),
                Segment::CounterMacro("loop".to_string())
            ]
        );
        assert!(!t.has_references());

        let only = Template::parse_counters("$$x$$/%counter.a%").unwrap();
        assert_eq!(only.segments()[0], Segment::Literal("$$x$$/".to_string()));
    }

    #[test]
    fn test_invalid_references() {
        assert!(Template::parse("$$open").is_err());
        assert!(Template::parse("$$$$").is_err());
        assert!(Reference::parse("a|body|x").is_err());
        assert!(Reference::parse("a|headers").is_err());
        assert!(Reference::parse("test.t1|wait").is_err());
        assert!(Reference::parse("test.|pattern|k").is_err());
        assert!(Reference::parse("two words").is_err());
        assert!(Template::parse("%counter.a").is_err());
    }
}
