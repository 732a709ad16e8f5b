//! Per-run mutable state
//!
//! Counters, captured events and the current-state cursor are kept in a
//! [`RunContext`] owned by the execution loop, indexed like the
//! [`StateTable`] it runs over. A fresh context means a fresh run.

use crate::protocol::{MsgEvent, SentMessage};
use crate::state_machine::{StateId, StateTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct NodeRecord {
    counter: u32,
    saved_event: Option<MsgEvent>,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    records: Vec<NodeRecord>,
    pub current: StateId,
    pub sent: Vec<SentMessage>,
    pub test_id: String,
}

impl RunContext {
    pub fn new(table: &StateTable, start: StateId, test_id: impl Into<String>) -> Self {
        Self {
            records: vec![NodeRecord::default(); table.len()],
            current: start,
            sent: Vec::new(),
            test_id: test_id.into(),
        }
    }

    pub fn counter(&self, id: StateId) -> u32 {
        self.records[id.0].counter
    }

    pub fn increment(&mut self, id: StateId) -> u32 {
        let record = &mut self.records[id.0];
        record.counter += 1;
        record.counter
    }

    pub fn reset_counter(&mut self, id: StateId) {
        self.records[id.0].counter = 0;
    }

    pub fn save_event(&mut self, id: StateId, event: MsgEvent) {
        self.records[id.0].saved_event = Some(event);
    }

    pub fn saved_event(&self, id: StateId) -> Option<&MsgEvent> {
        self.records[id.0].saved_event.as_ref()
    }

    pub fn record_sent(&mut self, sent: SentMessage) {
        self.sent.push(sent);
    }

    /// Read-only copy for observers running on other tasks
    pub fn snapshot(&self, table: &StateTable, finished: bool) -> RunSnapshot {
        RunSnapshot {
            current: table.node(self.current).label.clone(),
            counters: table
                .nodes()
                .iter()
                .filter(|n| self.counter(n.id) > 0)
                .map(|n| (n.label.clone(), self.counter(n.id)))
                .collect(),
            captured: table
                .nodes()
                .iter()
                .filter(|n| self.saved_event(n.id).is_some())
                .map(|n| n.label.clone())
                .collect(),
            sent: self.sent.len(),
            finished,
        }
    }
}

/// Observable state of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Label of the current state
    pub current: String,
    /// Non-zero loop counters by state label
    pub counters: BTreeMap<String, u32>,
    /// Labels of states holding a captured event
    pub captured: Vec<String>,
    /// Number of messages sent so far
    pub sent: usize,
    pub finished: bool,
}
