//! Content-path extraction from message bodies
//!
//! Routes a path to XPath or JSONPath, chosen either by an explicit
//! `jsoncontent[...]` / `xmlcontent[...]` prefix or by the declared content
//! type of the message.

use super::jsonpath::{JsonPath, value_to_string};
use super::xpath::{XPath, parse_document};
use crate::protocol::{Content, ContentFormat, MsgEvent};
use crate::{Error, Result};
use serde_json::Value;

/// How the path of a content label should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFormat {
    /// Use the message's declared content type
    Auto,
    Json,
    Xml,
}

enum Body {
    Json(Value),
    Xml(super::xpath::XmlNode),
}

fn sniff(text: &str) -> Option<ContentFormat> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('<') {
        Some(ContentFormat::Xml)
    } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Some(ContentFormat::Json)
    } else {
        None
    }
}

fn load_body(content: &Content, declared: ContentFormat, format: PathFormat) -> Result<Body> {
    let target = match format {
        PathFormat::Json => ContentFormat::Json,
        PathFormat::Xml => ContentFormat::Xml,
        PathFormat::Auto => match declared {
            ContentFormat::Plain => sniff(&content.as_text()).ok_or_else(|| {
                Error::InvalidContent("body is neither XML nor JSON".to_string())
            })?,
            other => other,
        },
    };

    match (target, content) {
        (_, Content::Empty) => Err(Error::InvalidContent("message has no body".to_string())),
        (ContentFormat::Json, Content::Json(v)) => Ok(Body::Json(v.clone())),
        (ContentFormat::Json, Content::Plain(s) | Content::Xml(s)) => Ok(Body::Json(
            serde_json::from_str(s)
                .map_err(|e| Error::InvalidContent(format!("body is not JSON: {}", e)))?,
        )),
        (ContentFormat::Xml, Content::Plain(s) | Content::Xml(s)) => {
            Ok(Body::Xml(parse_document(s)?))
        }
        (ContentFormat::Xml, Content::Json(_)) => Err(Error::InvalidContent(
            "cannot apply XPath to a JSON body".to_string(),
        )),
        (ContentFormat::Plain, _) => Err(Error::InvalidContent(
            "body is neither XML nor JSON".to_string(),
        )),
    }
}

/// Whether a path of this format is evaluated as XPath against the event's body
pub fn is_xml_path(event: &MsgEvent, format: PathFormat) -> bool {
    match format {
        PathFormat::Xml => true,
        PathFormat::Json => false,
        PathFormat::Auto => match event.content_format() {
            ContentFormat::Plain => sniff(&event.content.as_text()) == Some(ContentFormat::Xml),
            other => other == ContentFormat::Xml,
        },
    }
}

/// Extract the values selected by `path` from a body
pub fn extract_from(
    content: &Content,
    declared: ContentFormat,
    path: &str,
    format: PathFormat,
) -> Result<Vec<String>> {
    match load_body(content, declared, format)? {
        Body::Json(doc) => Ok(JsonPath::parse(path)?.evaluate(&doc)),
        Body::Xml(doc) => Ok(XPath::parse(path)?.evaluate(&doc)),
    }
}

/// Extract the values selected by `path` from an event's body
pub fn extract(event: &MsgEvent, path: &str, format: PathFormat) -> Result<Vec<String>> {
    extract_from(&event.content, event.content_format(), path, format)
}

/// Whether the element selected by `path` has a child field, key or value named `needle`
pub fn contains(event: &MsgEvent, path: &str, format: PathFormat, needle: &str) -> Result<bool> {
    match load_body(&event.content, event.content_format(), format)? {
        Body::Json(doc) => {
            let path = JsonPath::parse(path)?;
            Ok(path.select(&doc).into_iter().any(|v| match v {
                Value::Object(map) => map.contains_key(needle),
                Value::Array(items) => items.iter().any(|i| value_to_string(i) == needle),
                Value::String(s) => s.contains(needle),
                other => other.to_string() == needle,
            }))
        }
        Body::Xml(doc) => {
            let xpath = XPath::parse(path)?;
            let nodes = xpath.select_nodes(&doc);
            if nodes.is_empty() {
                return Ok(xpath.evaluate(&doc).iter().any(|v| v.contains(needle)));
            }
            Ok(nodes.into_iter().any(|n| {
                n.child(needle).is_some()
                    || n.attribute(needle).is_some()
                    || n.full_text().contains(needle)
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;
    use serde_json::json;

    fn json_event() -> MsgEvent {
        MsgEvent::new(Protocol::Http)
            .with_content(Content::Json(json!({"user": {"name": "ada", "roles": ["admin"]}})))
    }

    fn xml_event() -> MsgEvent {
        MsgEvent::new(Protocol::Soap)
            .with_header("Content-Type", "text/xml")
            .with_content(Content::Plain(
                "<user name=\"ada\"><role>admin</role></user>".to_string(),
            ))
    }

    #[test]
    fn test_auto_dispatch() {
        assert_eq!(
            extract(&json_event(), "$.user.name", PathFormat::Auto).unwrap(),
            vec!["ada"]
        );
        assert_eq!(
            extract(&xml_event(), "/user/role", PathFormat::Auto).unwrap(),
            vec!["admin"]
        );
    }

    #[test]
    fn test_sniffs_undeclared_plain_body() {
        let event = MsgEvent::new(Protocol::Coap)
            .with_content(Content::Plain(r#"{"temp": 21}"#.to_string()));
        assert_eq!(extract(&event, "$.temp", PathFormat::Auto).unwrap(), vec!["21"]);
    }

    #[test]
    fn test_explicit_format_overrides_declared() {
        let event = MsgEvent::new(Protocol::Http)
            .with_header("Content-Type", "text/plain")
            .with_content(Content::Plain(r#"{"a": "b"}"#.to_string()));
        assert_eq!(extract(&event, "$.a", PathFormat::Json).unwrap(), vec!["b"]);
        assert!(extract(&json_event(), "/user", PathFormat::Xml).is_err());
    }

    #[test]
    fn test_contains() {
        assert!(contains(&json_event(), "$.user", PathFormat::Auto, "roles").unwrap());
        assert!(contains(&json_event(), "$.user.roles", PathFormat::Auto, "admin").unwrap());
        assert!(!contains(&json_event(), "$.user", PathFormat::Auto, "email").unwrap());
        assert!(contains(&xml_event(), "/user", PathFormat::Auto, "role").unwrap());
        assert!(contains(&xml_event(), "/user", PathFormat::Auto, "name").unwrap());
        assert!(!contains(&xml_event(), "/user", PathFormat::Auto, "email").unwrap());
    }

    #[test]
    fn test_is_xml_path() {
        assert!(is_xml_path(&xml_event(), PathFormat::Auto));
        assert!(!is_xml_path(&json_event(), PathFormat::Auto));
        assert!(is_xml_path(&json_event(), PathFormat::Xml));
        let sniffed = MsgEvent::new(Protocol::Coap).with_content(Content::Plain("<a/>".to_string()));
        assert!(is_xml_path(&sniffed, PathFormat::Auto));
        assert!(!is_xml_path(&MsgEvent::new(Protocol::Coap), PathFormat::Auto));
    }

    #[test]
    fn test_errors() {
        let empty = MsgEvent::new(Protocol::Http);
        assert!(matches!(
            extract(&empty, "$.a", PathFormat::Auto).unwrap_err(),
            Error::InvalidContent(_)
        ));
        assert!(matches!(
            extract(&json_event(), "$.[", PathFormat::Auto).unwrap_err(),
            Error::InvalidJsonPath { .. }
        ));
    }
}
