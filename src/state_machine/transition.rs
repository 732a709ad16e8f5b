//! Transition representation

use crate::protocol::Message;
use crate::state_machine::guard::Guard;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens when a transition is taken: guards to satisfy or a message to send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionAction {
    Guards(Vec<Guard>),
    Send(Message),
}

/// A directed edge to a target state label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub target: String,
    pub action: TransitionAction,
    /// Human-readable annotation written to the report when taken
    pub report: Option<String>,
}

impl Transition {
    pub fn guarded(target: impl Into<String>, guards: Vec<Guard>) -> Self {
        Self {
            target: target.into(),
            action: TransitionAction::Guards(guards),
            report: None,
        }
    }

    pub fn send(target: impl Into<String>, message: Message) -> Self {
        Self {
            target: target.into(),
            action: TransitionAction::Send(message),
            report: None,
        }
    }

    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = Some(report.into());
        self
    }

    /// Guards of a guarded transition; empty for a send
    pub fn guards(&self) -> &[Guard] {
        match &self.action {
            TransitionAction::Guards(guards) => guards,
            TransitionAction::Send(_) => &[],
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match &self.action {
            TransitionAction::Send(message) => Some(message),
            TransitionAction::Guards(_) => None,
        }
    }

    /// The single guard, when there is exactly one
    fn sole_guard(&self) -> Option<&Guard> {
        match self.guards() {
            [guard] => Some(guard),
            _ => None,
        }
    }

    /// True when the only guard is `timeout`
    pub fn is_timeout(&self) -> bool {
        self.sole_guard().is_some_and(Guard::is_timeout)
    }

    /// Duration of a timeout transition
    pub fn timeout(&self) -> Option<Duration> {
        self.sole_guard().and_then(Guard::timeout_duration)
    }

    /// True when the only guard is the loop `index` counter
    pub fn is_counter(&self) -> bool {
        self.sole_guard().is_some_and(Guard::is_index)
    }

    /// Whether an inbound event may select this transition
    pub fn accepts_events(&self) -> bool {
        !self.guards().is_empty() && !self.is_timeout() && !self.is_counter()
    }

    /// Get display label for the transition
    pub fn display_label(&self) -> String {
        if let Some(report) = &self.report {
            report.clone()
        } else {
            match &self.action {
                TransitionAction::Send(message) => message.describe(),
                TransitionAction::Guards(guards) if guards.is_empty() => "transition".to_string(),
                TransitionAction::Guards(guards) => guards
                    .iter()
                    .map(Guard::describe)
                    .collect::<Vec<_>>()
                    .join(" && "),
            }
        }
    }
}
