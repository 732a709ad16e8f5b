//! XPath subset used by `content[...]` and `xmlcontent[...]` guards
//!
//! Documents are read with `quick-xml` into a small owned tree. Supported
//! syntax: absolute and relative location paths, `//` descendant steps, `*`,
//! `.`, `@attr`, `text()`, positional `[n]` and `[@a='v']` / `[child='v']`
//! predicates, and a `count(<path>)` wrapper. Namespace prefixes are ignored
//! when matching names.

use crate::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// An element of a parsed XML document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Direct text children, concatenated
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Text of this element and all descendants
    pub fn full_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.full_text());
        }
        out
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn element_from(start: &BytesStart) -> Result<XmlNode> {
    let mut node = XmlNode {
        name: local_name(start.name().as_ref()),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::InvalidContent(format!("XML attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::InvalidContent(format!("XML attribute: {}", e)))?;
        node.attributes
            .push((local_name(attr.key.as_ref()), value.into_owned()));
    }
    Ok(node)
}

/// Parse a document into a virtual root whose children are the top-level elements
pub fn parse_document(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlNode::default()];
    loop {
        match reader.read_event() {
            Err(e) => {
                return Err(Error::InvalidContent(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                let node = element_from(&e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(Error::InvalidContent("unbalanced XML end tag".to_string()));
                }
                if let Some(node) = stack.pop()
                    && let Some(parent) = stack.last_mut()
                {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::InvalidContent(format!("XML text: {}", e)))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(_) => {}
        }
    }

    if stack.len() != 1 {
        return Err(Error::InvalidContent("unclosed XML element".to_string()));
    }
    let root = stack.remove(0);
    if root.children.is_empty() {
        return Err(Error::InvalidContent("document has no root element".to_string()));
    }
    Ok(root)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Any,
    SelfNode,
    Attribute(String),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    AttributeEquals(String, String),
    ChildEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A parsed XPath expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    raw: String,
    steps: Vec<Step>,
    count: bool,
}

/// Selected item: an element or a string value (attribute / text node)
#[derive(Debug, Clone)]
enum Item<'a> {
    Node(&'a XmlNode),
    Value(String),
}

impl XPath {
    pub fn parse(path: &str) -> Result<Self> {
        let raw = path.trim().to_string();
        let (inner, count) = match raw
            .strip_prefix("count(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => (inner.trim().to_string(), true),
            None => (raw.clone(), false),
        };
        if inner.is_empty() {
            return Err(Error::xpath(&raw, "empty path"));
        }
        let steps = parse_steps(&inner).map_err(|msg| Error::xpath(&raw, msg))?;
        Ok(Self { raw, steps, count })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_count(&self) -> bool {
        self.count
    }

    /// Matching elements, for presence checks
    pub fn select_nodes<'a>(&self, doc: &'a XmlNode) -> Vec<&'a XmlNode> {
        self.select(doc)
            .into_iter()
            .filter_map(|item| match item {
                Item::Node(n) => Some(n),
                Item::Value(_) => None,
            })
            .collect()
    }

    /// Evaluate to string values; `count(...)` yields a single count
    pub fn evaluate(&self, doc: &XmlNode) -> Vec<String> {
        let items = self.select(doc);
        if self.count {
            return vec![items.len().to_string()];
        }
        items
            .into_iter()
            .map(|item| match item {
                Item::Node(n) => n.full_text().trim().to_string(),
                Item::Value(v) => v,
            })
            .collect()
    }

    fn select<'a>(&self, doc: &'a XmlNode) -> Vec<Item<'a>> {
        let mut current = vec![Item::Node(doc)];
        for step in &self.steps {
            let mut next = Vec::new();
            for item in &current {
                let Item::Node(node) = item else { continue };
                let node: &'a XmlNode = *node;
                let mut candidates: Vec<Item<'a>> = Vec::new();
                let mut contexts = vec![node];
                if step.axis == Axis::Descendant {
                    collect_descendants(node, &mut contexts);
                }
                for ctx in contexts {
                    match &step.test {
                        NodeTest::Name(name) => candidates.extend(
                            ctx.children
                                .iter()
                                .filter(|c| &c.name == name)
                                .map(Item::Node),
                        ),
                        NodeTest::Any => candidates.extend(ctx.children.iter().map(Item::Node)),
                        NodeTest::SelfNode => candidates.push(Item::Node(ctx)),
                        NodeTest::Attribute(name) => {
                            if let Some(v) = ctx.attribute(name) {
                                candidates.push(Item::Value(v.to_string()));
                            }
                        }
                        NodeTest::Text => {
                            if !ctx.text.is_empty() {
                                candidates.push(Item::Value(ctx.text.clone()));
                            }
                        }
                    }
                }
                next.extend(apply_predicates(candidates, &step.predicates));
            }
            current = next;
        }
        current
    }
}

fn collect_descendants<'a>(node: &'a XmlNode, out: &mut Vec<&'a XmlNode>) {
    for child in &node.children {
        out.push(child);
        collect_descendants(child, out);
    }
}

fn apply_predicates<'a>(mut items: Vec<Item<'a>>, predicates: &[Predicate]) -> Vec<Item<'a>> {
    for predicate in predicates {
        items = match predicate {
            Predicate::Position(n) => items.into_iter().nth(n - 1).into_iter().collect(),
            Predicate::AttributeEquals(attr, value) => items
                .into_iter()
                .filter(|i| matches!(i, Item::Node(n) if n.attribute(attr) == Some(value.as_str())))
                .collect(),
            Predicate::ChildEquals(child, value) => items
                .into_iter()
                .filter(|i| {
                    matches!(i, Item::Node(n) if n.children.iter()
                        .any(|c| &c.name == child && c.full_text().trim() == value.as_str()))
                })
                .collect(),
        };
    }
    items
}

fn parse_steps(path: &str) -> std::result::Result<Vec<Step>, String> {
    let mut steps = Vec::new();
    let mut rest = path;
    let mut axis = Axis::Child;
    if let Some(r) = rest.strip_prefix("//") {
        axis = Axis::Descendant;
        rest = r;
    } else if let Some(r) = rest.strip_prefix('/') {
        rest = r;
    }

    loop {
        let (token, remainder) = split_step(rest)?;
        if token.is_empty() {
            return Err("empty location step".to_string());
        }
        steps.push(parse_step(token, axis)?);
        match remainder {
            None => break,
            Some(r) => {
                if let Some(r2) = r.strip_prefix("//") {
                    axis = Axis::Descendant;
                    rest = r2;
                } else if let Some(r2) = r.strip_prefix('/') {
                    axis = Axis::Child;
                    rest = r2;
                } else {
                    return Err(format!("unexpected '{}'", r));
                }
            }
        }
    }

    if let Some(pos) = steps
        .iter()
        .position(|s| matches!(s.test, NodeTest::Attribute(_) | NodeTest::Text))
        && pos != steps.len() - 1
    {
        return Err("attribute and text() steps must be last".to_string());
    }
    Ok(steps)
}

/// Split the first step off, respecting brackets and quotes
fn split_step(input: &str) -> std::result::Result<(&str, Option<&str>), String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ']'".to_string())?
            }
            (None, '/') if depth == 0 => return Ok((&input[..i], Some(&input[i..]))),
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return Err("unclosed predicate".to_string());
    }
    Ok((input, None))
}

fn parse_step(token: &str, axis: Axis) -> std::result::Result<Step, String> {
    let (head, mut preds) = match token.find('[') {
        Some(i) => (&token[..i], &token[i..]),
        None => (token, ""),
    };

    let test = match head {
        "*" => NodeTest::Any,
        "." => NodeTest::SelfNode,
        "text()" => NodeTest::Text,
        h if h.starts_with('@') && h.len() > 1 => NodeTest::Attribute(local_name(h[1..].as_bytes())),
        h if is_name(h) => NodeTest::Name(local_name(h.as_bytes())),
        h => return Err(format!("invalid node test '{}'", h)),
    };

    let mut predicates = Vec::new();
    while !preds.is_empty() {
        let end = preds
            .find(']')
            .ok_or_else(|| "unclosed predicate".to_string())?;
        predicates.push(parse_predicate(preds[1..end].trim())?);
        preds = preds[end + 1..].trim_start();
        if !preds.is_empty() && !preds.starts_with('[') {
            return Err(format!("unexpected '{}' after predicate", preds));
        }
    }

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

fn parse_predicate(inner: &str) -> std::result::Result<Predicate, String> {
    if let Ok(n) = inner.parse::<usize>() {
        if n == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(n));
    }

    let (lhs, rhs) = inner
        .split_once('=')
        .ok_or_else(|| format!("unsupported predicate '[{}]'", inner))?;
    let rhs = rhs.trim();
    let value = if rhs.len() >= 2
        && ((rhs.starts_with('\'') && rhs.ends_with('\''))
            || (rhs.starts_with('"') && rhs.ends_with('"')))
    {
        rhs[1..rhs.len() - 1].to_string()
    } else {
        return Err(format!("predicate value must be quoted in '[{}]'", inner));
    };

    let lhs = lhs.trim();
    match lhs.strip_prefix('@') {
        Some(attr) if is_name(attr) => Ok(Predicate::AttributeEquals(attr.to_string(), value)),
        None if is_name(lhs) => Ok(Predicate::ChildEquals(lhs.to_string(), value)),
        _ => Err(format!("unsupported predicate '[{}]'", inner)),
    }
}
