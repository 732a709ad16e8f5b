//! Pattern analyzer
//!
//! Checks a state table against the structural rules of the pattern
//! language before it is run, and uses the pattern graph to warn about
//! states that can never be reached.

use super::PatternGraph;
use crate::parser::expression::Template;
use crate::state_machine::guard::{Comparison, GuardTarget, parse_positive};
use crate::state_machine::{Guard, StateKind, StateNode, StateTable, Transition, TransitionAction};
use crate::{Error, Result};
use regex::Regex;
use serde::Serialize;

/// Findings of [`validate`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Rule violations; a table with errors must not be run
    pub errors: Vec<String>,
    /// Suspicious but runnable constructs
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn errors into an [`Error::Pattern`], keeping the warnings otherwise
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(Error::pattern(self.errors.join("; ")))
        }
    }
}

/// Validate every structural rule of a pattern
pub fn validate(table: &StateTable) -> ValidationReport {
    let mut report = ValidationReport::default();

    let starts: Vec<&str> = table
        .nodes()
        .iter()
        .filter(|n| n.kind.is_start())
        .map(|n| n.label.as_str())
        .collect();
    match starts.as_slice() {
        [] => report
            .errors
            .push("pattern has no START or TRIGGERSTART state".to_string()),
        [_] => {}
        many => report.errors.push(format!(
            "pattern has {} start states ({}), expected exactly one",
            many.len(),
            many.join(", ")
        )),
    }

    for node in table.nodes() {
        check_kind(table, node, &mut report.errors);
        for transition in node.transitions() {
            check_transition(table, node, transition, &mut report);
        }
    }

    if report.errors.is_empty() {
        let graph = PatternGraph::build(table);
        for node in graph.unreachable_states() {
            report
                .warnings
                .push(format!("state '{}' is unreachable from the start state", node.label));
        }
        if graph.reachable_end_states().is_empty() {
            report
                .warnings
                .push("no END state is reachable from the start state".to_string());
        }
    }

    report
}

fn check_kind(table: &StateTable, node: &StateNode, errors: &mut Vec<String>) {
    let label = &node.label;
    match &node.kind {
        StateKind::Start { transitions } | StateKind::Normal { transitions } => {
            if transitions.is_empty() {
                errors.push(format!("state '{}' has no transitions", label));
            }
            if transitions.iter().any(|t| t.message().is_some()) {
                errors.push(format!(
                    "{} state '{}' cannot send messages",
                    node.kind, label
                ));
            }
            if transitions.iter().filter(|t| t.is_timeout()).count() > 1 {
                errors.push(format!("state '{}' has more than one timeout transition", label));
            }
            if transitions.iter().any(Transition::is_counter) {
                errors.push(format!(
                    "state '{}' has a counter transition but is not a loop",
                    label
                ));
            }
        }
        StateKind::TriggerStart { trigger } | StateKind::Trigger { trigger } => {
            if trigger.message().is_none() {
                errors.push(format!(
                    "{} state '{}' must have exactly one transition with a message",
                    node.kind, label
                ));
            }
        }
        StateKind::Loop { exit, body } => {
            if !exit.is_counter() {
                errors.push(format!(
                    "loop '{}' needs an exit transition guarded only by 'index'",
                    label
                ));
            }
            if body.message().is_none() {
                errors.push(format!("loop '{}' needs a transition with a message", label));
            }
        }
        StateKind::DataLoop { source, exit, body } => {
            if !exit.is_counter() {
                errors.push(format!(
                    "data loop '{}' needs an exit transition guarded only by 'index'",
                    label
                ));
            }
            if body.is_empty() || !body.iter().all(Transition::accepts_events) {
                errors.push(format!(
                    "data loop '{}' needs at least one guarded body transition",
                    label
                ));
            }
            match table.lookup(source) {
                None => errors.push(format!(
                    "data loop '{}' reads unknown state '{}'",
                    label, source
                )),
                Some(src) if src.id == node.id => {
                    errors.push(format!("data loop '{}' cannot read its own events", label))
                }
                Some(_) => {}
            }
        }
        StateKind::End { .. } => {}
    }
}

fn check_transition(
    table: &StateTable,
    node: &StateNode,
    transition: &Transition,
    report: &mut ValidationReport,
) {
    let from = &node.label;
    if table.lookup(&transition.target).is_none() {
        report.errors.push(format!(
            "transition from '{}' targets unknown state '{}'",
            from, transition.target
        ));
    }

    match &transition.action {
        TransitionAction::Guards(guards) => {
            if guards.is_empty() {
                report.warnings.push(format!(
                    "transition '{}' -> '{}' has no guards and can never be taken",
                    from, transition.target
                ));
            }
            for guard in guards {
                check_guard(table, from, guard, guards.len(), &mut report.errors);
            }
        }
        TransitionAction::Send(message) => {
            check_template(table, from, &message.url, Template::parse, &mut report.errors);
            for text in [&message.path, &message.content].into_iter().flatten() {
                check_template(table, from, text, Template::parse_counters, &mut report.errors);
            }
        }
    }
}

fn check_guard(
    table: &StateTable,
    from: &str,
    guard: &Guard,
    guard_count: usize,
    errors: &mut Vec<String>,
) {
    let described = guard.describe();
    check_template(table, from, &guard.label, Template::parse_counters, errors);
    let value_is_literal = check_template(table, from, &guard.value, Template::parse, errors);

    if guard.is_timeout() {
        if guard_count != 1 {
            errors.push(format!(
                "'{}' in state '{}' must be the only guard of its transition",
                described, from
            ));
        }
        if guard.comparison != Comparison::Equals {
            errors.push(format!("timeout guard in state '{}' must use EQUALS", from));
        }
        if guard.timeout_duration().is_none() {
            errors.push(format!(
                "timeout '{}' in state '{}' is not a positive number of milliseconds",
                guard.value, from
            ));
        }
        return;
    }

    if guard.is_index() {
        if guard_count != 1 {
            errors.push(format!(
                "'{}' in state '{}' must be the only guard of its transition",
                described, from
            ));
        }
        if guard.comparison != Comparison::Counter {
            errors.push(format!("index guard in state '{}' must use COUNTER", from));
        }
        return;
    }

    if guard.comparison == Comparison::Counter {
        errors.push(format!(
            "COUNTER comparison in state '{}' requires the 'index' label",
            from
        ));
    }

    if !guard.label.contains("%counter.")
        && let Err(e) = GuardTarget::classify(&guard.label)
    {
        errors.push(format!("guard in state '{}': {}", from, e));
    }

    if value_is_literal {
        if guard.is_response_time() && parse_positive(&guard.value).is_none() {
            errors.push(format!(
                "response-time '{}' in state '{}' is not a positive integer",
                guard.value, from
            ));
        }
        if guard.comparison == Comparison::Regex
            && let Err(e) = Regex::new(&guard.value)
        {
            errors.push(format!(
                "regex '{}' in state '{}' is invalid: {}",
                guard.value, from, e
            ));
        }
    }
}

/// Parse a template and check that the states it names exist.
/// Returns whether the text is a plain literal.
fn check_template(
    table: &StateTable,
    from: &str,
    text: &str,
    parse: fn(&str) -> Result<Template>,
    errors: &mut Vec<String>,
) -> bool {
    match parse(text) {
        Ok(template) => {
            for state in template.referenced_states() {
                if table.lookup(state).is_none() {
                    errors.push(format!(
                        "'{}' in state '{}' references unknown state '{}'",
                        text, from, state
                    ));
                }
            }
            template.is_literal()
        }
        Err(e) => {
            errors.push(format!("'{}' in state '{}': {}", text, from, e));
            false
        }
    }
}
