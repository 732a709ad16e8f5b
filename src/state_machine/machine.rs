//! The execution loop
//!
//! A [`StateMachine`] runs on one task and consumes events pushed through
//! its [`MachineHandle`] from any number of producers. The bounded queue is
//! the only synchronization point; observers read [`RunSnapshot`]s.

use crate::config::EngineConfig;
use crate::parser::pattern::PatternDefinition;
use crate::protocol::{InMemoryTestStore, MessageInvoker, MsgEvent, NoopInvoker, TestDataStore};
use crate::state_machine::evaluate::EvalEnv;
use crate::state_machine::{
    ReportSink, RunContext, RunReport, RunSnapshot, StateKind, StateTable, Transcript, Transition,
    Verdict,
};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc, watch};
use tokio::time::Instant;

/// Run parameters
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// Key under which captured data is stored for later tests
    pub test_id: String,
    pub queue_capacity: usize,
    /// How long one wait on the queue lasts before the wait is logged and renewed
    pub poll_slice: Duration,
    /// Wait for [`MachineHandle::step`] before every transition
    pub debug_mode: bool,
}

impl MachineOptions {
    pub fn new(test_id: impl Into<String>) -> Self {
        Self::from_config(test_id, &EngineConfig::default())
    }

    pub fn from_config(test_id: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            test_id: test_id.into(),
            queue_capacity: config.queue_capacity,
            poll_slice: config.poll_slice(),
            debug_mode: config.debug_mode,
        }
    }
}

/// Receives "current state" updates, e.g. to highlight a node in a view
pub trait ProgressListener: Send + Sync {
    fn current_state(&self, label: &str);
}

enum Wait {
    Event(MsgEvent),
    TimedOut,
    Stopped,
}

enum Finished {
    End { success: bool, report: String },
    Stopped,
}

/// Resolves once the stop flag is set; never if every handle is gone
async fn stop_signal(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Consumer side of everything a handle can signal
struct Inbox {
    events: mpsc::Receiver<MsgEvent>,
    stop: watch::Receiver<bool>,
    step: Arc<Notify>,
    poll_slice: Duration,
}

impl Inbox {
    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Wait for the next event, for at most `timeout` when given
    async fn next_event(&mut self, timeout: Option<Duration>) -> Result<Wait> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_stopped() {
                return Ok(Wait::Stopped);
            }
            let slice_end = Instant::now() + self.poll_slice;
            let wake = deadline.map_or(slice_end, |d| d.min(slice_end));

            tokio::select! {
                biased;
                _ = stop_signal(&mut self.stop) => return Ok(Wait::Stopped),
                received = self.events.recv() => {
                    return match received {
                        Some(event) => Ok(Wait::Event(event)),
                        None => Err(Error::Interrupted("event queue closed".to_string())),
                    };
                }
                _ = tokio::time::sleep_until(wake) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Ok(Wait::TimedOut);
                    }
                    tracing::debug!("No event within {:?}, still waiting", self.poll_slice);
                }
            }
        }
    }

    /// Wait for a debug step; false when stopped instead
    async fn wait_for_step(&mut self) -> bool {
        tokio::select! {
            biased;
            _ = stop_signal(&mut self.stop) => false,
            _ = self.step.notified() => true,
        }
    }
}

/// Cloneable producer and observer side of a [`StateMachine`]
#[derive(Clone)]
pub struct MachineHandle {
    events: mpsc::Sender<MsgEvent>,
    stop: Arc<watch::Sender<bool>>,
    step: Arc<Notify>,
    snapshots: watch::Receiver<RunSnapshot>,
}

impl MachineHandle {
    /// Queue an event, waiting while the queue is full
    pub async fn push_event(&self, event: MsgEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Error::Interrupted("state machine is no longer running".to_string()))
    }

    /// Queue an event without waiting
    pub fn try_push_event(&self, event: MsgEvent) -> Result<()> {
        self.events.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => {
                Error::Interrupted("state machine is no longer running".to_string())
            }
        })
    }

    /// Queue an event from a thread outside the async runtime
    pub fn blocking_push_event(&self, event: MsgEvent) -> Result<()> {
        self.events
            .blocking_send(event)
            .map_err(|_| Error::Interrupted("state machine is no longer running".to_string()))
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Let a machine in debug mode take one transition
    pub fn step(&self) {
        self.step.notify_one();
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.clone()
    }

    pub fn current_state(&self) -> String {
        self.snapshots.borrow().current.clone()
    }
}

/// An interoperability test ready to run once
pub struct StateMachine {
    table: StateTable,
    constants: HashMap<String, String>,
    store: Arc<dyn TestDataStore>,
    invoker: Arc<dyn MessageInvoker>,
    listener: Option<Arc<dyn ProgressListener>>,
    sink: Option<Arc<dyn ReportSink>>,
    options: MachineOptions,
    inbox: Inbox,
    queue: mpsc::Sender<MsgEvent>,
    snapshots: watch::Sender<RunSnapshot>,
}

impl StateMachine {
    pub fn new(table: StateTable, options: MachineOptions) -> (Self, MachineHandle) {
        let (events_tx, events_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let step = Arc::new(Notify::new());
        let (snapshots_tx, snapshots_rx) = watch::channel(RunSnapshot {
            current: table.first().map(|n| n.label.clone()).unwrap_or_default(),
            ..RunSnapshot::default()
        });

        let handle = MachineHandle {
            events: events_tx.clone(),
            stop: Arc::new(stop_tx),
            step: step.clone(),
            snapshots: snapshots_rx,
        };
        let machine = Self {
            table,
            constants: HashMap::new(),
            store: Arc::new(InMemoryTestStore::new()),
            invoker: Arc::new(NoopInvoker),
            listener: None,
            sink: None,
            inbox: Inbox {
                events: events_rx,
                stop: stop_rx,
                step,
                poll_slice: options.poll_slice,
            },
            options,
            queue: events_tx,
            snapshots: snapshots_tx,
        };
        (machine, handle)
    }

    /// Build a machine from a loaded pattern
    pub fn from_pattern(
        pattern: &PatternDefinition,
        config: &EngineConfig,
    ) -> Result<(Self, MachineHandle)> {
        let table = pattern.build()?;
        let (machine, handle) =
            Self::new(table, MachineOptions::from_config(pattern.test_id(), config));
        Ok((machine.with_constants(pattern.constants.clone()), handle))
    }

    pub fn with_constants(mut self, constants: HashMap<String, String>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TestDataStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn MessageInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn table(&self) -> &StateTable {
        &self.table
    }

    /// Run to completion. Always yields exactly one verdict.
    pub async fn start(self) -> RunReport {
        let started_at = Utc::now();
        let StateMachine {
            table,
            constants,
            store,
            invoker,
            listener,
            sink,
            options,
            mut inbox,
            queue,
            snapshots,
        } = self;

        let mut transcript = Transcript::new(sink.clone());
        let runner = Runner {
            env: EvalEnv {
                table: &table,
                constants: &constants,
                store: &*store,
            },
            invoker: &*invoker,
            listener: listener.as_deref(),
            queue: &queue,
            snapshots: &snapshots,
            debug_mode: options.debug_mode,
        };

        let mut final_state = None;
        let mut sent = Vec::new();
        let outcome = match table.first() {
            None => Err(Error::state_machine("pattern has no START or TRIGGERSTART state")),
            Some(first) => {
                let mut run = RunContext::new(&table, first.id, options.test_id.clone());
                store.put_pattern_values(&run.test_id, &constants);
                transcript.line(format!(
                    "Test '{}' starts in state '{}'",
                    options.test_id, first.label
                ));
                if let Some(listener) = runner.listener {
                    listener.current_state(&first.label);
                }

                let outcome = runner.drive(&mut inbox, &mut run, &mut transcript).await;
                snapshots.send_replace(run.snapshot(&table, true));
                final_state = Some(table.node(run.current).label.clone());
                sent = run.sent;
                outcome
            }
        };

        let (verdict, report) = match outcome {
            Ok(Finished::End { success: true, report }) => (Verdict::Success, report),
            Ok(Finished::End { success: false, report }) => (Verdict::Failure, report),
            Ok(Finished::Stopped) => {
                transcript.line("Test stopped");
                (Verdict::Stopped, "Test stopped by user".to_string())
            }
            Err(e) => {
                tracing::warn!("Test '{}' aborted: {}", options.test_id, e);
                transcript.line(format!("Test aborted: {}", e));
                (Verdict::Failure, e.to_string())
            }
        };

        transcript.line(format!("Verdict: {}", verdict));
        if let Some(sink) = transcript.sink() {
            sink.finish(verdict.as_flag(), &report);
        }

        RunReport {
            test_id: options.test_id,
            verdict,
            report,
            transcript: transcript.into_lines(),
            sent,
            final_state,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Borrowed view of a machine while it runs
struct Runner<'a> {
    env: EvalEnv<'a>,
    invoker: &'a dyn MessageInvoker,
    listener: Option<&'a dyn ProgressListener>,
    queue: &'a mpsc::Sender<MsgEvent>,
    snapshots: &'a watch::Sender<RunSnapshot>,
    debug_mode: bool,
}

impl Runner<'_> {
    async fn drive(
        &self,
        inbox: &mut Inbox,
        run: &mut RunContext,
        transcript: &mut Transcript,
    ) -> Result<Finished> {
        loop {
            if inbox.is_stopped() {
                return Ok(Finished::Stopped);
            }

            let node = self.env.table.node(run.current);
            if let StateKind::End { success, report } = &node.kind {
                transcript.line(format!("Reached end state '{}'", node.label));
                return Ok(Finished::End {
                    success: *success,
                    report: report.clone(),
                });
            }

            if self.debug_mode {
                tracing::debug!("Waiting for a step in '{}'", node.label);
                if !inbox.wait_for_step().await {
                    return Ok(Finished::Stopped);
                }
            }

            let next = match &node.kind {
                StateKind::TriggerStart { .. } | StateKind::Trigger { .. } => {
                    node.execute_transition(&self.env, run, self.invoker, self.queue, transcript)
                        .await?
                }
                StateKind::Loop { .. } => {
                    let decision =
                        node.evaluate_conditional_transition(&self.env, run, transcript)?;
                    if decision.eq_ignore_ascii_case(&node.label) {
                        let iteration = run.increment(node.id);
                        transcript.line(format!("Loop '{}' iteration {}", node.label, iteration));
                        node.execute_transition(&self.env, run, self.invoker, self.queue, transcript)
                            .await?
                    } else {
                        decision
                    }
                }
                StateKind::DataLoop { .. } => node.replay_data_loop(&self.env, run, transcript)?,
                StateKind::Start { transitions } | StateKind::Normal { transitions } => {
                    let timeout = transitions.iter().find(|t| t.is_timeout());
                    match inbox.next_event(timeout.and_then(Transition::timeout)).await? {
                        Wait::Stopped => return Ok(Finished::Stopped),
                        Wait::Event(event) => {
                            node.evaluate_transition(&self.env, event, run, transcript)?
                        }
                        Wait::TimedOut => {
                            let Some(transition) = timeout else {
                                return Err(Error::state_machine(format!(
                                    "'{}' timed out without a timeout transition",
                                    node.label
                                )));
                            };
                            transcript.line(format!(
                                "No event reached '{}' before its timeout",
                                node.label
                            ));
                            node.announce(transition, transcript);
                            transition.target.clone()
                        }
                    }
                }
                StateKind::End { .. } => continue,
            };

            let target = self.env.table.lookup(&next).ok_or_else(|| {
                Error::state_machine(format!(
                    "transition target '{}' of state '{}' does not exist",
                    next, node.label
                ))
            })?;
            run.current = target.id;
            tracing::debug!("Current state is now '{}'", target.label);
            if let Some(listener) = self.listener {
                listener.current_state(&target.label);
            }
            self.snapshots
                .send_replace(run.snapshot(self.env.table, false));
        }
    }
}
