//! Interoperability reports
//!
//! A run produces a line-oriented [`Transcript`] while it executes and a
//! single [`RunReport`] with the verdict when it ends.

use crate::protocol::SentMessage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Receives report output as it is produced
pub trait ReportSink: Send + Sync {
    /// One line of progress text
    fn progress(&self, line: &str);

    /// Final verdict flag (`"true"`, `"false"` or `"stopped"`) and report body
    fn finish(&self, success: &str, report: &str);
}

/// Transcript lines, mirrored to the log and an optional sink
#[derive(Default)]
pub struct Transcript {
    lines: Vec<String>,
    sink: Option<Arc<dyn ReportSink>>,
}

impl Transcript {
    pub fn new(sink: Option<Arc<dyn ReportSink>>) -> Self {
        Self {
            lines: Vec::new(),
            sink,
        }
    }

    pub fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        if let Some(sink) = &self.sink {
            sink.progress(&line);
        }
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn sink(&self) -> Option<&Arc<dyn ReportSink>> {
        self.sink.as_ref()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
    Stopped,
}

impl Verdict {
    /// Flag handed to a [`ReportSink`]
    pub fn as_flag(&self) -> &'static str {
        match self {
            Verdict::Success => "true",
            Verdict::Failure => "false",
            Verdict::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Verdict::Success => "SUCCESS",
            Verdict::Failure => "FAILURE",
            Verdict::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// Everything a finished run leaves behind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub test_id: String,
    pub verdict: Verdict,
    /// End-state report text, or the cause of a failure
    pub report: String,
    pub transcript: Vec<String>,
    pub sent: Vec<SentMessage>,
    /// Label of the state the run ended in
    pub final_state: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    progress: Mutex<Vec<String>>,
    result: Mutex<Option<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_lines(&self) -> Vec<String> {
        self.progress.lock().clone()
    }

    /// `(success flag, report)` once the run has finished
    pub fn result(&self) -> Option<(String, String)> {
        self.result.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn progress(&self, line: &str) {
        self.progress.lock().push(line.to_string());
    }

    fn finish(&self, success: &str, report: &str) {
        *self.result.lock() = Some((success.to_string(), report.to_string()));
    }
}
