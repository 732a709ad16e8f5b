//! Guard representation
//!
//! A guard is one predicate on a transition: `(label, comparison, value)`.
//! Guards are immutable; counter macros in labels are substituted into a
//! local copy at evaluation time.

use crate::parser::content::PathFormat;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reserved label of a timeout guard (value in milliseconds)
pub const TIMEOUT_LABEL: &str = "timeout";
/// Reserved label of a loop-counter guard
pub const INDEX_LABEL: &str = "index";
/// Reserved label comparing the response time of an event (milliseconds)
pub const RESPONSE_TIME_LABEL: &str = "response-time";

/// How a guard compares the extracted value with its compare-value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = "EQUALS")]
    Equals,
    #[serde(alias = "NOTEQUALS", alias = "notequals")]
    NotEquals,
    #[serde(alias = "GREATERTHAN", alias = "greaterthan")]
    GreaterThan,
    #[serde(alias = "LESSTHAN", alias = "lessthan")]
    LessThan,
    #[serde(alias = "REGEX")]
    Regex,
    #[serde(alias = "CONTAINS")]
    Contains,
    #[serde(alias = "COUNTER")]
    Counter,
}

impl Comparison {
    pub fn name(&self) -> &'static str {
        match self {
            Comparison::Equals => "EQUALS",
            Comparison::NotEquals => "NOTEQUALS",
            Comparison::GreaterThan => "GREATERTHAN",
            Comparison::LessThan => "LESSTHAN",
            Comparison::Regex => "REGEX",
            Comparison::Contains => "CONTAINS",
            Comparison::Counter => "COUNTER",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a guard label addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardTarget {
    /// Header or parameter of the event
    Header(String),
    /// Body value selected by a content path
    Content { path: String, format: PathFormat },
    Timeout,
    Index,
    ResponseTime,
}

impl GuardTarget {
    /// Classify a guard label (after counter substitution)
    pub fn classify(label: &str) -> Result<Self> {
        let label = label.trim();
        let lower = label.to_ascii_lowercase();
        match lower.as_str() {
            TIMEOUT_LABEL => return Ok(GuardTarget::Timeout),
            INDEX_LABEL => return Ok(GuardTarget::Index),
            RESPONSE_TIME_LABEL => return Ok(GuardTarget::ResponseTime),
            _ => {}
        }

        for (prefix, format) in [
            ("jsoncontent[", PathFormat::Json),
            ("xmlcontent[", PathFormat::Xml),
            ("content[", PathFormat::Auto),
        ] {
            if lower.starts_with(prefix) {
                let path = label[prefix.len()..].strip_suffix(']').ok_or_else(|| {
                    Error::reference(format!("content label '{}' is missing its closing ']'", label))
                })?;
                if path.trim().is_empty() {
                    return Err(Error::reference(format!("content label '{}' has no path", label)));
                }
                return Ok(GuardTarget::Content {
                    path: path.trim().to_string(),
                    format,
                });
            }
        }

        if label.is_empty() {
            return Err(Error::reference("guard label is empty"));
        }
        Ok(GuardTarget::Header(label.to_string()))
    }
}

/// A single predicate attached to a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    pub label: String,
    pub comparison: Comparison,
    #[serde(default)]
    pub value: String,
}

impl Guard {
    pub fn new(label: impl Into<String>, comparison: Comparison, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            comparison,
            value: value.into(),
        }
    }

    pub fn timeout(millis: u64) -> Self {
        Self::new(TIMEOUT_LABEL, Comparison::Equals, millis.to_string())
    }

    pub fn index(value: impl Into<String>) -> Self {
        Self::new(INDEX_LABEL, Comparison::Counter, value)
    }

    pub fn is_timeout(&self) -> bool {
        self.label.trim().eq_ignore_ascii_case(TIMEOUT_LABEL)
    }

    pub fn is_index(&self) -> bool {
        self.label.trim().eq_ignore_ascii_case(INDEX_LABEL)
    }

    pub fn is_response_time(&self) -> bool {
        self.label.trim().eq_ignore_ascii_case(RESPONSE_TIME_LABEL)
    }

    /// Duration of a timeout guard, if the value is a positive integer
    pub fn timeout_duration(&self) -> Option<Duration> {
        if !self.is_timeout() {
            return None;
        }
        parse_positive(&self.value).map(Duration::from_millis)
    }

    /// Whether the compare-value counts from zero (`length(...)` / `count(...)`)
    pub fn counts_from_zero(&self) -> bool {
        self.value.contains("length(") || self.value.contains("count(")
    }

    /// Get a short display string
    pub fn describe(&self) -> String {
        format!("{} {} '{}'", self.label, self.comparison, self.value)
    }
}

/// Parse a strictly positive integer
pub fn parse_positive(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_labels() {
        assert_eq!(
            GuardTarget::classify("status").unwrap(),
            GuardTarget::Header("status".to_string())
        );
        assert_eq!(GuardTarget::classify("Timeout").unwrap(), GuardTarget::Timeout);
        assert_eq!(GuardTarget::classify("index").unwrap(), GuardTarget::Index);
        assert_eq!(
            GuardTarget::classify("response-time").unwrap(),
            GuardTarget::ResponseTime
        );
        assert_eq!(
            GuardTarget::classify("content[$.items[0].id]").unwrap(),
            GuardTarget::Content {
                path: "$.items[0].id".to_string(),
                format: PathFormat::Auto
            }
        );
        assert_eq!(
            GuardTarget::classify("XMLContent[//order/@id]").unwrap(),
            GuardTarget::Content {
                path: "//order/@id".to_string(),
                format: PathFormat::Xml
            }
        );
        assert!(matches!(
            GuardTarget::classify("jsoncontent[$.a").unwrap_err(),
            Error::InvalidReference(_)
        ));
        assert!(GuardTarget::classify("content[]").is_err());
    }

    #[test]
    fn test_timeout_duration() {
        assert_eq!(
            Guard::timeout(200).timeout_duration(),
            Some(Duration::from_millis(200))
        );
        assert!(Guard::new("timeout", Comparison::Equals, "0").timeout_duration().is_none());
        assert!(Guard::new("timeout", Comparison::Equals, "soon").timeout_duration().is_none());
        assert!(Guard::new("status", Comparison::Equals, "5").timeout_duration().is_none());
    }

    #[test]
    fn test_counts_from_zero() {
        assert!(Guard::index("$$a|content|length($.items)$$").counts_from_zero());
        assert!(Guard::index("$$a|content|count(//item)$$").counts_from_zero());
        assert!(!Guard::index("3").counts_from_zero());
    }

    #[test]
    fn test_deserialize_comparison_aliases() {
        let guard: Guard =
            toml::from_str(r#"label = "status"
comparison = "NOTEQUALS"
value = "200""#)
                .unwrap();
        assert_eq!(guard.comparison, Comparison::NotEquals);

        let guard: Guard =
            toml::from_str(r#"label = "code"
comparison = "greater_than"
value = "1""#)
                .unwrap();
        assert_eq!(guard.comparison, Comparison::GreaterThan);
        assert_eq!(guard.describe(), "code GREATERTHAN '1'");
    }
}
