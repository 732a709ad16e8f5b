//! Deferred-reference resolution
//!
//! Pure functions of the environment: pattern constants, the cross-test
//! store, the state table and the current run context. Every failure is an
//! [`Error::InvalidReference`] (or a content-path error) so callers can turn
//! it into a failed guard.

use crate::parser::content::{self, PathFormat};
use crate::parser::expression::{CrossTestRef, Reference, Segment, StatePart, Template};
use crate::protocol::{MsgEvent, Protocol, TestDataStore};
use crate::state_machine::{RunContext, StateTable};
use crate::{Error, Result};
use std::collections::HashMap;

pub struct Resolver<'a> {
    pub table: &'a StateTable,
    pub run: &'a RunContext,
    pub constants: &'a HashMap<String, String>,
    pub store: &'a dyn TestDataStore,
}

impl<'a> Resolver<'a> {
    /// Parse and fully resolve `raw`
    pub fn resolve_str(&self, raw: &str) -> Result<String> {
        self.resolve(&Template::parse(raw)?)
    }

    /// Substitute `%counter.X%` macros only
    pub fn substitute_counters(&self, raw: &str) -> Result<String> {
        self.resolve(&Template::parse_counters(raw)?)
    }

    /// Substitute `%counter.X%` macros in a content path. XPath positions
    /// count from 1, so counters written into an XPath are shifted by one.
    pub fn substitute_path_counters(&self, path: &str, xml: bool) -> Result<String> {
        self.render(&Template::parse_counters(path)?, u32::from(xml))
    }

    pub fn resolve(&self, template: &Template) -> Result<String> {
        self.render(template, 0)
    }

    fn render(&self, template: &Template, counter_base: u32) -> Result<String> {
        let mut out = String::new();
        for segment in template.segments() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::CounterMacro(state) => {
                    out.push_str(&(self.counter(state)? + counter_base).to_string())
                }
                Segment::Reference(reference) => out.push_str(&self.reference(reference)?),
            }
        }
        Ok(out)
    }

    /// Loop counter of the state labelled `label`
    pub fn counter(&self, label: &str) -> Result<u32> {
        let node = self
            .table
            .lookup(label)
            .ok_or_else(|| Error::reference(format!("counter of unknown state '{}'", label)))?;
        Ok(self.run.counter(node.id))
    }

    fn reference(&self, reference: &Reference) -> Result<String> {
        match reference {
            Reference::PatternConstant(name) => self
                .constants
                .get(name)
                .cloned()
                .ok_or_else(|| Error::reference(format!("pattern constant '{}' is not defined", name))),
            Reference::CrossTest(cross) => self.cross_test(cross),
            Reference::StateValue {
                state,
                part,
                identifier,
            } => self.state_value(state, *part, identifier),
        }
    }

    fn state_value(&self, state: &str, part: StatePart, identifier: &str) -> Result<String> {
        let node = self
            .table
            .lookup(state)
            .ok_or_else(|| Error::reference(format!("state '{}' does not exist", state)))?;

        if part == StatePart::Counter {
            return Ok(self.run.counter(node.id).to_string());
        }

        let event = self.run.saved_event(node.id).ok_or_else(|| {
            Error::reference(format!("state '{}' has not received an event yet", node.label))
        })?;

        match part {
            StatePart::Headers => {
                let name = self.substitute_counters(identifier)?;
                event.headers.get(&name).map(str::to_string).ok_or_else(|| {
                    Error::reference(format!(
                        "event of state '{}' has no header '{}'",
                        node.label, name
                    ))
                })
            }
            _ => {
                let xml = content::is_xml_path(event, PathFormat::Auto);
                let path = self.substitute_path_counters(identifier, xml)?;
                first_value(event, &path).map_err(|e| match e {
                    Error::InvalidReference(msg) => {
                        Error::reference(format!("state '{}': {}", node.label, msg))
                    }
                    other => other,
                })
            }
        }
    }

    fn cross_test(&self, cross: &CrossTestRef) -> Result<String> {
        match cross {
            CrossTestRef::Pattern { test_id, key } => {
                self.store.get_pattern_value(test_id, key).ok_or_else(|| {
                    Error::reference(format!("test '{}' has no pattern value '{}'", test_id, key))
                })
            }
            CrossTestRef::Header {
                test_id,
                state,
                name,
            } => {
                let name = self.substitute_counters(name)?;
                self.store.get_test_header(test_id, state, &name).ok_or_else(|| {
                    Error::reference(format!(
                        "test '{}' state '{}' has no header '{}'",
                        test_id, state, name
                    ))
                })
            }
            CrossTestRef::Content {
                test_id,
                state,
                path,
            } => {
                let content = self.store.get_test_content(test_id, state).ok_or_else(|| {
                    Error::reference(format!("test '{}' state '{}' has no content", test_id, state))
                })?;
                let mut event = MsgEvent::new(Protocol::Other).with_content(content);
                if let Some(ct) = self.store.get_test_header(test_id, state, "content-type") {
                    event = event.with_header("content-type", ct);
                }
                let xml = content::is_xml_path(&event, PathFormat::Auto);
                first_value(&event, &self.substitute_path_counters(path, xml)?)
            }
        }
    }
}

fn first_value(event: &MsgEvent, path: &str) -> Result<String> {
    content::extract(event, path, PathFormat::Auto)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::reference(format!("content path '{}' selects nothing", path)))
}
