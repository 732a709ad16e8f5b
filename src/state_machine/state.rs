//! State representation
//!
//! A pattern is loaded into a [`StateTable`]: an arena of immutable
//! [`StateNode`]s addressed by [`StateId`], with a case-insensitive label
//! index. Everything that changes while a test runs lives in
//! [`RunContext`](super::context::RunContext) instead.

use crate::state_machine::Transition;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Index of a node in its [`StateTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub usize);

/// What a state does, with the transitions that kind allows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateKind {
    /// Entry state waiting for the first event
    Start { transitions: Vec<Transition> },
    /// Entry state that opens the exchange by sending a message
    TriggerStart { trigger: Transition },
    Trigger { trigger: Transition },
    /// Waits for one event and picks a guarded transition
    Normal { transitions: Vec<Transition> },
    /// Re-sends `body` until the `exit` counter guard fires
    Loop { exit: Transition, body: Transition },
    /// Replays the event captured by `source` against `body` until `exit` fires
    DataLoop {
        source: String,
        exit: Transition,
        body: Vec<Transition>,
    },
    End { success: bool, report: String },
}

impl StateKind {
    pub fn name(&self) -> &'static str {
        match self {
            StateKind::Start { .. } => "START",
            StateKind::TriggerStart { .. } => "TRIGGERSTART",
            StateKind::Trigger { .. } => "TRIGGER",
            StateKind::Normal { .. } => "NORMAL",
            StateKind::Loop { .. } => "LOOP",
            StateKind::DataLoop { .. } => "DATALOOP",
            StateKind::End { .. } => "END",
        }
    }

    /// Graphviz fill color
    pub fn color(&self) -> &'static str {
        match self {
            StateKind::Start { .. } | StateKind::TriggerStart { .. } => "lightblue",
            StateKind::Trigger { .. } => "lightyellow",
            StateKind::Normal { .. } => "white",
            StateKind::Loop { .. } | StateKind::DataLoop { .. } => "orange",
            StateKind::End { success: true, .. } => "green",
            StateKind::End { success: false, .. } => "red",
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, StateKind::Start { .. } | StateKind::TriggerStart { .. })
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One node of the machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNode {
    pub id: StateId,
    pub label: String,
    pub kind: StateKind,
}

impl StateNode {
    pub fn is_end(&self) -> bool {
        matches!(self.kind, StateKind::End { .. })
    }

    /// Every outgoing transition, in declaration order
    pub fn transitions(&self) -> Vec<&Transition> {
        match &self.kind {
            StateKind::Start { transitions } | StateKind::Normal { transitions } => {
                transitions.iter().collect()
            }
            StateKind::TriggerStart { trigger } | StateKind::Trigger { trigger } => vec![trigger],
            StateKind::Loop { exit, body } => vec![exit, body],
            StateKind::DataLoop { exit, body, .. } => {
                std::iter::once(exit).chain(body.iter()).collect()
            }
            StateKind::End { .. } => Vec::new(),
        }
    }

    /// Get a short display string
    pub fn display_short(&self) -> String {
        match &self.kind {
            StateKind::End { success, .. } => format!("{} [END {}]", self.label, success),
            kind => format!("{} [{}]", self.label, kind),
        }
    }
}

/// Arena of the states of one pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTable {
    nodes: Vec<StateNode>,
    index: HashMap<String, StateId>,
    first: Option<StateId>,
}

fn label_key(label: &str) -> String {
    label.trim().to_lowercase()
}

impl StateTable {
    /// Build a table from `(label, kind)` pairs in declaration order.
    ///
    /// Labels must be unique ignoring case. The first START or TRIGGERSTART
    /// becomes the entry state; a table without one is accepted here and
    /// rejected when it is validated or run.
    pub fn new(states: impl IntoIterator<Item = (String, StateKind)>) -> Result<Self> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();
        let mut first = None;

        for (label, kind) in states {
            let label = label.trim().to_string();
            if label.is_empty() {
                return Err(Error::pattern("state label must not be empty"));
            }
            let id = StateId(nodes.len());
            if index.insert(label_key(&label), id).is_some() {
                return Err(Error::pattern(format!("duplicate state label '{}'", label)));
            }
            if first.is_none() && kind.is_start() {
                first = Some(id);
            }
            nodes.push(StateNode { id, label, kind });
        }

        Ok(Self {
            nodes,
            index,
            first,
        })
    }

    /// Find a state by label, ignoring case
    pub fn lookup(&self, label: &str) -> Option<&StateNode> {
        self.index.get(&label_key(label)).map(|id| &self.nodes[id.0])
    }

    pub fn node(&self, id: StateId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub fn first(&self) -> Option<&StateNode> {
        self.first.map(|id| self.node(id))
    }

    pub fn nodes(&self) -> &[StateNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
