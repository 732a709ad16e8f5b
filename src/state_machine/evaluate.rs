//! Guard and transition evaluation
//!
//! These are the decisions a single state makes: which guarded transition
//! an event selects, whether a loop exits, what a trigger sends, and how a
//! data loop replays a captured event. Every check writes one line to the
//! transcript.

use crate::parser::content;
use crate::protocol::{MessageInvoker, MsgEvent, SentMessage, TestDataStore};
use crate::state_machine::guard::{Comparison, GuardTarget, parse_positive};
use crate::state_machine::{
    Guard, Resolver, RunContext, StateKind, StateNode, StateTable, Transcript, Transition,
};
use crate::{Error, Result};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Upper bound on data-loop replays of one captured event
pub const MAX_DATA_LOOP_ITERATIONS: u32 = 10_000;

/// Read-only environment shared by every evaluation of a run
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    pub table: &'a StateTable,
    pub constants: &'a HashMap<String, String>,
    pub store: &'a dyn TestDataStore,
}

impl<'a> EvalEnv<'a> {
    pub fn resolver<'r>(&'r self, run: &'r RunContext) -> Resolver<'r> {
        Resolver {
            table: self.table,
            run,
            constants: self.constants,
            store: self.store,
        }
    }
}

/// Result of checking one guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub passed: bool,
    pub message: String,
}

impl GuardOutcome {
    fn pass(message: String) -> Self {
        Self {
            passed: true,
            message,
        }
    }

    fn fail(message: String) -> Self {
        Self {
            passed: false,
            message,
        }
    }

    /// Transcript line
    pub fn line(&self) -> String {
        format!("{} {}", if self.passed { "PASS" } else { "FAIL" }, self.message)
    }
}

impl StateNode {
    /// Decide one guard against `event` (absent for loop-counter checks)
    pub fn evaluate_guard(
        &self,
        env: &EvalEnv<'_>,
        guard: &Guard,
        event: Option<&MsgEvent>,
        run: &RunContext,
    ) -> Result<GuardOutcome> {
        let resolver = env.resolver(run);
        let target = GuardTarget::classify(&guard.label)?;

        if guard.comparison == Comparison::Counter || target == GuardTarget::Index {
            return self.check_counter(guard, &resolver, run);
        }
        if target == GuardTarget::Timeout {
            return Ok(GuardOutcome::fail(format!(
                "'{}' is decided by waiting, not by an event",
                guard.label
            )));
        }

        let event = event.ok_or_else(|| {
            Error::reference(format!("guard on '{}' needs an event", guard.label))
        })?;
        let xml = matches!(&target, GuardTarget::Content { format, .. }
            if content::is_xml_path(event, *format));
        let label = resolver.substitute_path_counters(&guard.label, xml)?;
        let target = GuardTarget::classify(&label)?;
        let expected = resolver.resolve_str(&guard.value)?;

        let actual = match &target {
            GuardTarget::Header(name) => event.headers.get(name).map(str::to_string),
            GuardTarget::Content { path, format } => {
                if guard.comparison == Comparison::Contains {
                    let found = content::contains(event, path, *format, &expected)?;
                    return Ok(contains_outcome(&label, &expected, found));
                }
                content::extract(event, path, *format)?.into_iter().next()
            }
            GuardTarget::ResponseTime => {
                if parse_positive(&expected).is_none() {
                    return Err(Error::custom(format!(
                        "response-time value '{}' is not a positive integer",
                        expected
                    )));
                }
                event.response_time_ms.map(|ms| ms.to_string())
            }
            GuardTarget::Timeout | GuardTarget::Index => None,
        };

        compare(guard.comparison, &label, actual.as_deref(), &expected)
    }

    fn check_counter(
        &self,
        guard: &Guard,
        resolver: &Resolver<'_>,
        run: &RunContext,
    ) -> Result<GuardOutcome> {
        let resolved = resolver.resolve_str(&guard.value)?;
        let mut limit: i64 = resolved.trim().parse().map_err(|_| {
            Error::reference(format!("counter value '{}' is not an integer", resolved))
        })?;
        if guard.counts_from_zero() {
            limit -= 1;
        }

        let counter = i64::from(run.counter(self.id));
        Ok(if counter == limit {
            GuardOutcome::pass(format!("counter of '{}' reached {}", self.label, limit))
        } else {
            GuardOutcome::fail(format!(
                "COUNTER not reached: counter of '{}' is {}, waiting for {}",
                self.label, counter, limit
            ))
        })
    }

    /// Check one guard and report it; errors count as a failed guard
    pub fn check_guard(
        &self,
        env: &EvalEnv<'_>,
        guard: &Guard,
        event: Option<&MsgEvent>,
        run: &RunContext,
        transcript: &mut Transcript,
    ) -> bool {
        match self.evaluate_guard(env, guard, event, run) {
            Ok(outcome) => {
                transcript.line(outcome.line());
                outcome.passed
            }
            Err(e) => {
                tracing::debug!("Guard {} errored: {:?}", guard.describe(), e);
                transcript.line(format!("FAIL {}: {}", guard.describe(), e));
                false
            }
        }
    }

    /// All guards in order, stopping at the first failure. An empty list never passes.
    pub fn check_guards(
        &self,
        env: &EvalEnv<'_>,
        guards: &[Guard],
        event: Option<&MsgEvent>,
        run: &RunContext,
        transcript: &mut Transcript,
    ) -> bool {
        !guards.is_empty()
            && guards
                .iter()
                .all(|g| self.check_guard(env, g, event, run, transcript))
    }

    fn select_transition<'t>(
        &self,
        env: &EvalEnv<'_>,
        transitions: &'t [Transition],
        event: &MsgEvent,
        run: &RunContext,
        transcript: &mut Transcript,
    ) -> Option<&'t Transition> {
        transitions
            .iter()
            .filter(|t| t.accepts_events())
            .find(|t| self.check_guards(env, t.guards(), Some(event), run, transcript))
    }

    pub(crate) fn announce(&self, transition: &Transition, transcript: &mut Transcript) {
        match &transition.report {
            Some(report) => transcript.line(format!(
                "'{}' -> '{}': {}",
                self.label, transition.target, report
            )),
            None => transcript.line(format!("'{}' -> '{}'", self.label, transition.target)),
        }
    }

    /// Pick the target of the first transition whose guards all pass.
    ///
    /// The event is saved as this state's capture and recorded in the
    /// cross-test store before any guard runs.
    pub fn evaluate_transition(
        &self,
        env: &EvalEnv<'_>,
        event: MsgEvent,
        run: &mut RunContext,
        transcript: &mut Transcript,
    ) -> Result<String> {
        let transitions = match &self.kind {
            StateKind::Start { transitions } | StateKind::Normal { transitions } => transitions,
            other => {
                return Err(Error::state_machine(format!(
                    "state '{}' of kind {} does not evaluate events",
                    self.label, other
                )));
            }
        };

        transcript.line(format!("State '{}' received {}", self.label, event.summary()));
        env.store
            .put_test_header(&run.test_id, &self.label, &event.headers);
        if !event.content.is_empty() {
            env.store
                .put_test_content(&run.test_id, &self.label, &event.content);
        }
        run.save_event(self.id, event.clone());

        match self.select_transition(env, transitions, &event, run, transcript) {
            Some(transition) => {
                self.announce(transition, transcript);
                Ok(transition.target.clone())
            }
            None => {
                let reason = format!("no transition accepts {}", event.summary());
                transcript.line(format!("FAIL state '{}': {}", self.label, reason));
                Err(Error::UnexpectedEvent {
                    state: self.label.clone(),
                    reason,
                })
            }
        }
    }

    /// Exit target when the loop counter guard fires, otherwise this state's own label
    pub fn evaluate_conditional_transition(
        &self,
        env: &EvalEnv<'_>,
        run: &RunContext,
        transcript: &mut Transcript,
    ) -> Result<String> {
        let exit = match &self.kind {
            StateKind::Loop { exit, .. } | StateKind::DataLoop { exit, .. } => exit,
            other => {
                return Err(Error::state_machine(format!(
                    "state '{}' of kind {} has no counter transition",
                    self.label, other
                )));
            }
        };

        if self.check_guards(env, exit.guards(), None, run, transcript) {
            self.announce(exit, transcript);
            Ok(exit.target.clone())
        } else {
            Ok(self.label.clone())
        }
    }

    /// Send this state's message and return the single target.
    ///
    /// A response is queued as if it had arrived asynchronously.
    pub async fn execute_transition(
        &self,
        env: &EvalEnv<'_>,
        run: &mut RunContext,
        invoker: &dyn MessageInvoker,
        queue: &mpsc::Sender<MsgEvent>,
        transcript: &mut Transcript,
    ) -> Result<String> {
        let trigger = match &self.kind {
            StateKind::TriggerStart { trigger } | StateKind::Trigger { trigger } => trigger,
            StateKind::Loop { body, .. } => body,
            other => {
                return Err(Error::state_machine(format!(
                    "state '{}' of kind {} sends no message",
                    self.label, other
                )));
            }
        };
        let template = trigger.message().ok_or_else(|| {
            Error::state_machine(format!("transition of '{}' carries no message", self.label))
        })?;

        let mut outbound = template.clone();
        {
            let resolver = env.resolver(run);
            outbound.url = resolver.resolve_str(&template.url)?;
            if let Some(path) = &template.path {
                outbound.path = Some(resolver.substitute_counters(path)?);
            }
            if let Some(body) = &template.content {
                outbound.content = Some(resolver.substitute_counters(body)?);
            }
        }

        transcript.line(format!("State '{}' sends {}", self.label, outbound.describe()));
        let started = Instant::now();
        let response = invoker.invoke(&outbound).await?;

        run.record_sent(SentMessage {
            state: self.label.clone(),
            message: outbound,
            sent_at: Utc::now(),
            answered: response.is_some(),
        });

        if let Some(mut event) = response {
            if event.response_time_ms.is_none() {
                event.response_time_ms = Some(started.elapsed().as_millis() as u64);
            }
            let summary = event.summary();
            queue.try_send(event).map_err(|e| match e {
                TrySendError::Full(_) => Error::QueueFull,
                TrySendError::Closed(_) => Error::Interrupted("event queue closed".to_string()),
            })?;
            transcript.line(format!("Response queued: {}", summary));
        }

        self.announce(trigger, transcript);
        Ok(trigger.target.clone())
    }

    /// Replay the source state's captured event against the loop body.
    ///
    /// Each pass evaluates the body at the current counter, then checks the
    /// exit guard, then increments. A body transition leading elsewhere
    /// leaves the loop early.
    pub fn replay_data_loop(
        &self,
        env: &EvalEnv<'_>,
        run: &mut RunContext,
        transcript: &mut Transcript,
    ) -> Result<String> {
        let StateKind::DataLoop { source, exit, body } = &self.kind else {
            return Err(Error::state_machine(format!(
                "state '{}' is not a data loop",
                self.label
            )));
        };
        let source_node = env.table.lookup(source).ok_or_else(|| {
            Error::state_machine(format!(
                "data loop '{}' reads unknown state '{}'",
                self.label, source
            ))
        })?;
        let event = run.saved_event(source_node.id).cloned().ok_or_else(|| {
            Error::state_machine(format!(
                "data loop '{}' has no event captured by '{}'",
                self.label, source_node.label
            ))
        })?;

        run.reset_counter(self.id);
        for _ in 0..MAX_DATA_LOOP_ITERATIONS {
            transcript.line(format!(
                "Data loop '{}' replays event of '{}' (index {})",
                self.label,
                source_node.label,
                run.counter(self.id)
            ));

            let Some(transition) = self.select_transition(env, body, &event, run, transcript)
            else {
                let reason = format!(
                    "no body transition accepts the event of '{}' at index {}",
                    source_node.label,
                    run.counter(self.id)
                );
                transcript.line(format!("FAIL state '{}': {}", self.label, reason));
                return Err(Error::UnexpectedEvent {
                    state: self.label.clone(),
                    reason,
                });
            };
            if !transition.target.eq_ignore_ascii_case(&self.label) {
                self.announce(transition, transcript);
                return Ok(transition.target.clone());
            }

            if self.check_guards(env, exit.guards(), None, run, transcript) {
                self.announce(exit, transcript);
                return Ok(exit.target.clone());
            }
            run.increment(self.id);
        }

        Err(Error::state_machine(format!(
            "data loop '{}' did not exit after {} iterations",
            self.label, MAX_DATA_LOOP_ITERATIONS
        )))
    }
}

fn contains_outcome(label: &str, expected: &str, found: bool) -> GuardOutcome {
    if found {
        GuardOutcome::pass(format!("'{}' contains '{}'", label, expected))
    } else {
        GuardOutcome::fail(format!(
            "CONTAINS failed: '{}' does not contain '{}'",
            label, expected
        ))
    }
}

fn compare(
    comparison: Comparison,
    label: &str,
    actual: Option<&str>,
    expected: &str,
) -> Result<GuardOutcome> {
    let shown = actual.unwrap_or("<absent>");
    let outcome = match comparison {
        Comparison::Equals => {
            if actual == Some(expected) {
                GuardOutcome::pass(format!("'{}' equals '{}'", label, expected))
            } else {
                GuardOutcome::fail(format!(
                    "EQUALS failed: '{}' is '{}' but should be '{}'",
                    label, shown, expected
                ))
            }
        }
        Comparison::NotEquals => {
            if actual != Some(expected) {
                GuardOutcome::pass(format!(
                    "'{}' is '{}', which differs from '{}'",
                    label, shown, expected
                ))
            } else {
                GuardOutcome::fail(format!(
                    "NOTEQUALS failed: '{}' must not be '{}'",
                    label, expected
                ))
            }
        }
        Comparison::GreaterThan | Comparison::LessThan => {
            let number = |v: &str| v.trim().parse::<f64>().ok();
            let (Some(a), Some(e)) = (actual.and_then(number), number(expected)) else {
                return Ok(GuardOutcome::fail(format!(
                    "{} failed: '{}' is '{}', not comparable with '{}'",
                    comparison, label, shown, expected
                )));
            };
            match comparison {
                Comparison::GreaterThan if a > e => GuardOutcome::pass(format!(
                    "'{}' = {} is greater than {}",
                    label, shown, expected
                )),
                Comparison::GreaterThan => GuardOutcome::fail(format!(
                    "GREATERTHAN failed: '{}' = {} is not greater than {}",
                    label, shown, expected
                )),
                _ if a < e => GuardOutcome::pass(format!(
                    "'{}' = {} is less than {}",
                    label, shown, expected
                )),
                _ => GuardOutcome::fail(format!(
                    "LESSTHAN failed: '{}' = {} is not less than {}",
                    label, shown, expected
                )),
            }
        }
        Comparison::Regex => {
            let regex = Regex::new(&format!("^(?:{})$", expected)).map_err(|e| {
                Error::InvalidRegex {
                    pattern: expected.to_string(),
                    message: e.to_string(),
                }
            })?;
            if actual.is_some_and(|a| regex.is_match(a)) {
                GuardOutcome::pass(format!("'{}' value '{}' matches /{}/", label, shown, expected))
            } else {
                GuardOutcome::fail(format!(
                    "REGEX failed: '{}' value '{}' does not match /{}/",
                    label, shown, expected
                ))
            }
        }
        Comparison::Contains => contains_outcome(
            label,
            expected,
            actual.is_some_and(|a| a.contains(expected)),
        ),
        Comparison::Counter => {
            return Err(Error::custom(format!(
                "'{}' compares a loop counter, not an event value",
                label
            )));
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Content, InMemoryTestStore, Message, Protocol, ScriptedInvoker};
    use crate::state_machine::StateId;
    use serde_json::json;

    struct Fixture {
        table: StateTable,
        constants: HashMap<String, String>,
        store: InMemoryTestStore,
    }

    impl Fixture {
        fn new(states: Vec<(&str, StateKind)>) -> Self {
            Self {
                table: StateTable::new(states.into_iter().map(|(l, k)| (l.to_string(), k)))
                    .unwrap(),
                constants: HashMap::from([("ok".to_string(), "200".to_string())]),
                store: InMemoryTestStore::new(),
            }
        }

        fn env(&self) -> EvalEnv<'_> {
            EvalEnv {
                table: &self.table,
                constants: &self.constants,
                store: &self.store,
            }
        }

        fn run(&self) -> RunContext {
            RunContext::new(&self.table, StateId(0), "t1")
        }

        fn node(&self, label: &str) -> &StateNode {
            self.table.lookup(label).unwrap()
        }
    }

    fn end() -> StateKind {
        StateKind::End {
            success: true,
            report: "done".to_string(),
        }
    }

    fn guard_fixture() -> Fixture {
        Fixture::new(vec![
            ("wait", StateKind::Normal { transitions: vec![] }),
            ("done", end()),
        ])
    }

    fn check(f: &Fixture, guard: Guard, event: &MsgEvent) -> GuardOutcome {
        let run = f.run();
        f.node("wait")
            .evaluate_guard(&f.env(), &guard, Some(event), &run)
            .unwrap()
    }

    fn status(code: &str) -> MsgEvent {
        MsgEvent::new(Protocol::Http).with_header("status", code)
    }

    #[test]
    fn test_equals_and_not_equals_are_complements() {
        let f = guard_fixture();
        for (code, value) in [("200", "200"), ("404", "200"), ("200", "$$ok$$")] {
            let eq = check(&f, Guard::new("status", Comparison::Equals, value), &status(code));
            let ne = check(&f, Guard::new("status", Comparison::NotEquals, value), &status(code));
            assert_eq!(eq.passed, !ne.passed, "status {} vs {}", code, value);
        }
    }

    #[test]
    fn test_absent_value() {
        let f = guard_fixture();
        let event = MsgEvent::new(Protocol::Http);
        assert!(!check(&f, Guard::new("status", Comparison::Equals, "200"), &event).passed);
        assert!(check(&f, Guard::new("status", Comparison::NotEquals, "200"), &event).passed);
    }

    #[test]
    fn test_failure_wording() {
        let f = guard_fixture();
        let outcome = check(&f, Guard::new("status", Comparison::Equals, "200"), &status("404"));
        assert_eq!(
            outcome.line(),
            "FAIL EQUALS failed: 'status' is '404' but should be '200'"
        );

        let outcome = check(&f, Guard::new("status", Comparison::NotEquals, "404"), &status("404"));
        assert!(outcome.message.starts_with("NOTEQUALS failed"));
        let outcome = check(&f, Guard::new("status", Comparison::GreaterThan, "500"), &status("404"));
        assert!(outcome.message.starts_with("GREATERTHAN failed"));
        let outcome = check(&f, Guard::new("status", Comparison::LessThan, "400"), &status("404"));
        assert!(outcome.message.starts_with("LESSTHAN failed"));
        let outcome = check(&f, Guard::new("status", Comparison::Regex, "2\\d\\d"), &status("404"));
        assert!(outcome.message.starts_with("REGEX failed"));
        let outcome = check(&f, Guard::new("status", Comparison::Contains, "5"), &status("404"));
        assert!(outcome.message.starts_with("CONTAINS failed"));
    }

    #[test]
    fn test_numeric_and_regex() {
        let f = guard_fixture();
        assert!(check(&f, Guard::new("status", Comparison::GreaterThan, "199"), &status("200")).passed);
        assert!(check(&f, Guard::new("status", Comparison::LessThan, "300"), &status("200")).passed);
        assert!(!check(&f, Guard::new("status", Comparison::LessThan, "x"), &status("200")).passed);
        assert!(check(&f, Guard::new("status", Comparison::Regex, "2\\d\\d"), &status("204")).passed);
        // anchored: a partial match is not enough
        assert!(!check(&f, Guard::new("status", Comparison::Regex, "20"), &status("204")).passed);

        let run = f.run();
        let err = f
            .node("wait")
            .evaluate_guard(
                &f.env(),
                &Guard::new("status", Comparison::Regex, "("),
                Some(&status("200")),
                &run,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRegex { .. }));
    }

    #[test]
    fn test_content_guards() {
        let f = guard_fixture();
        let event = MsgEvent::new(Protocol::Http)
            .with_content(Content::Json(json!({"sensor": {"temp": 21, "unit": "C"}})));

        assert!(check(&f, Guard::new("content[$.sensor.temp]", Comparison::Equals, "21"), &event).passed);
        assert!(check(&f, Guard::new("jsoncontent[$.sensor]", Comparison::Contains, "unit"), &event).passed);
        assert!(!check(&f, Guard::new("content[$.sensor]", Comparison::Contains, "humidity"), &event).passed);

        let xml = MsgEvent::new(Protocol::Soap)
            .with_content(Content::Xml("<r><item id=\"3\"/></r>".to_string()));
        assert!(check(&f, Guard::new("xmlcontent[/r/item/@id]", Comparison::Equals, "3"), &xml).passed);
    }

    #[test]
    fn test_response_time_guard() {
        let f = guard_fixture();
        let event = status("200").with_response_time(40);
        assert!(check(&f, Guard::new("response-time", Comparison::LessThan, "100"), &event).passed);

        let run = f.run();
        let err = f
            .node("wait")
            .evaluate_guard(
                &f.env(),
                &Guard::new("response-time", Comparison::LessThan, "-5"),
                Some(&event),
                &run,
            )
            .unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn test_unresolved_reference_fails_guard() {
        let f = guard_fixture();
        let run = f.run();
        let mut transcript = Transcript::default();
        let passed = f.node("wait").check_guard(
            &f.env(),
            &Guard::new("status", Comparison::Equals, "$$nope$$"),
            Some(&status("200")),
            &run,
            &mut transcript,
        );
        assert!(!passed);
        assert!(transcript.lines()[0].contains("pattern constant 'nope' is not defined"));
    }

    #[test]
    fn test_evaluate_transition_order_and_capture() {
        let f = Fixture::new(vec![
            (
                "wait",
                StateKind::Normal {
                    transitions: vec![
                        Transition::guarded("never", vec![]),
                        Transition::guarded(
                            "ok",
                            vec![Guard::new("status", Comparison::Equals, "200")],
                        ),
                        Transition::guarded(
                            "also",
                            vec![Guard::new("status", Comparison::Regex, "2..")],
                        ),
                    ],
                },
            ),
            ("never", end()),
            ("ok", end()),
            ("also", end()),
        ]);
        let mut run = f.run();
        let mut transcript = Transcript::default();

        let target = f
            .node("wait")
            .evaluate_transition(&f.env(), status("200"), &mut run, &mut transcript)
            .unwrap();
        assert_eq!(target, "ok");
        assert!(run.saved_event(StateId(0)).is_some());
        assert_eq!(
            f.store.get_test_header("t1", "wait", "status"),
            Some("200".to_string())
        );
    }

    #[test]
    fn test_unexpected_event() {
        let f = Fixture::new(vec![
            (
                "wait",
                StateKind::Normal {
                    transitions: vec![
                        Transition::guarded("empty", vec![]),
                        Transition::guarded(
                            "ok",
                            vec![Guard::new("status", Comparison::Equals, "200")],
                        ),
                    ],
                },
            ),
            ("empty", end()),
            ("ok", end()),
        ]);
        let mut run = f.run();
        let mut transcript = Transcript::default();

        let err = f
            .node("wait")
            .evaluate_transition(&f.env(), status("500"), &mut run, &mut transcript)
            .unwrap_err();
        assert!(err.is_interop_violation());
        assert!(transcript.lines().iter().any(|l| l.contains("EQUALS failed")));
    }

    fn loop_fixture(limit: &str) -> Fixture {
        Fixture::new(vec![
            (
                "poll",
                StateKind::Loop {
                    exit: Transition::guarded("done", vec![Guard::index(limit)]),
                    body: Transition::send(
                        "wait",
                        Message::new(Protocol::Coap, "coap://node/item/%counter.poll%"),
                    ),
                },
            ),
            ("wait", StateKind::Normal { transitions: vec![] }),
            ("done", end()),
        ])
    }

    #[test]
    fn test_counter_guard_exits_after_n_increments() {
        for n in 0..5u32 {
            let f = loop_fixture(&n.to_string());
            let node = f.node("poll");
            let mut run = f.run();
            let mut transcript = Transcript::default();

            for i in 0..n {
                assert_eq!(
                    node.evaluate_conditional_transition(&f.env(), &run, &mut transcript)
                        .unwrap(),
                    "poll",
                    "count {} of {}",
                    i,
                    n
                );
                run.increment(node.id);
            }
            assert_eq!(
                node.evaluate_conditional_transition(&f.env(), &run, &mut transcript)
                    .unwrap(),
                "done"
            );
        }
    }

    #[tokio::test]
    async fn test_execute_transition_queues_response() {
        let f = loop_fixture("3");
        let node = f.node("poll");
        let mut run = f.run();
        run.increment(node.id);
        let mut transcript = Transcript::default();
        let invoker = ScriptedInvoker::new([Some(status("205"))]);
        let (tx, mut rx) = mpsc::channel(1);

        let target = node
            .execute_transition(&f.env(), &mut run, &invoker, &tx, &mut transcript)
            .await
            .unwrap();

        assert_eq!(target, "wait");
        assert_eq!(invoker.calls()[0].url, "coap://node/item/1");
        assert_eq!(run.sent.len(), 1);
        assert!(run.sent[0].answered);
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.headers.get("status"), Some("205"));
        assert!(queued.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_execute_transition_full_queue() {
        let f = loop_fixture("3");
        let mut run = f.run();
        let mut transcript = Transcript::default();
        let invoker = ScriptedInvoker::new([Some(status("200"))]);
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(status("100")).unwrap();

        let err = f
            .node("poll")
            .execute_transition(&f.env(), &mut run, &invoker, &tx, &mut transcript)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull));
    }

    #[tokio::test]
    async fn test_unresolved_url_aborts() {
        let f = Fixture::new(vec![
            (
                "send",
                StateKind::TriggerStart {
                    trigger: Transition::send("done", Message::new(Protocol::Http, "$$host$$/x")),
                },
            ),
            ("done", end()),
        ]);
        let mut run = f.run();
        let mut transcript = Transcript::default();
        let (tx, _rx) = mpsc::channel(1);

        let err = f
            .node("send")
            .execute_transition(&f.env(), &mut run, &ScriptedInvoker::default(), &tx, &mut transcript)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
        assert!(run.sent.is_empty());
    }

    fn data_loop_fixture() -> Fixture {
        Fixture::new(vec![
            (
                "capture",
                StateKind::Start {
                    transitions: vec![Transition::guarded(
                        "check",
                        vec![Guard::new("status", Comparison::Equals, "200")],
                    )],
                },
            ),
            (
                "check",
                StateKind::DataLoop {
                    source: "capture".to_string(),
                    exit: Transition::guarded(
                        "done",
                        vec![Guard::index("$$capture|content|length($.items)$$")],
                    ),
                    body: vec![
                        Transition::guarded(
                            "check",
                            vec![Guard::new(
                                "content[$.items[%counter.check%]]",
                                Comparison::Contains,
                                "id",
                            )],
                        ),
                        Transition::guarded(
                            "broken",
                            vec![Guard::new(
                                "content[$.items[%counter.check%].broken]",
                                Comparison::Equals,
                                "true",
                            )],
                        ),
                    ],
                },
            ),
            ("done", end()),
            ("broken", end()),
        ])
    }

    fn capture(f: &Fixture, run: &mut RunContext, items: serde_json::Value) {
        let event = status("200").with_content(Content::Json(json!({ "items": items })));
        let mut transcript = Transcript::default();
        f.node("capture")
            .evaluate_transition(&f.env(), event, run, &mut transcript)
            .unwrap();
    }

    #[test]
    fn test_data_loop_replays_every_item() {
        let f = data_loop_fixture();
        let mut run = f.run();
        capture(&f, &mut run, json!([{"id": 1}, {"id": 2}, {"id": 3}]));

        let mut transcript = Transcript::default();
        let node = f.node("check");
        let target = node.replay_data_loop(&f.env(), &mut run, &mut transcript).unwrap();

        assert_eq!(target, "done");
        assert_eq!(run.counter(node.id), 2);
        let replays = transcript
            .lines()
            .iter()
            .filter(|l| l.starts_with("Data loop"))
            .count();
        assert_eq!(replays, 3);
    }

    #[test]
    fn test_data_loop_leaves_on_diverging_body() {
        let f = data_loop_fixture();
        let mut run = f.run();
        capture(&f, &mut run, json!([{"id": 1}, {"broken": true}, {"id": 3}]));

        let mut transcript = Transcript::default();
        let target = f
            .node("check")
            .replay_data_loop(&f.env(), &mut run, &mut transcript)
            .unwrap();
        assert_eq!(target, "broken");
    }

    fn xml_data_loop_fixture() -> Fixture {
        Fixture::new(vec![
            (
                "capture",
                StateKind::Start {
                    transitions: vec![Transition::guarded(
                        "check",
                        vec![Guard::new("status", Comparison::Equals, "200")],
                    )],
                },
            ),
            (
                "check",
                StateKind::DataLoop {
                    source: "capture".to_string(),
                    exit: Transition::guarded(
                        "done",
                        vec![Guard::index("$$capture|content|count(//item)$$")],
                    ),
                    body: vec![Transition::guarded(
                        "check",
                        vec![Guard::new(
                            "xmlcontent[//item[%counter.check%]]",
                            Comparison::Contains,
                            "id",
                        )],
                    )],
                },
            ),
            ("done", end()),
        ])
    }

    #[test]
    fn test_xml_data_loop_indexes_from_one() {
        let f = xml_data_loop_fixture();
        let mut run = f.run();
        let event = status("200").with_content(Content::Xml(
            r#"<r><item id="1"/><item id="2"/><item id="3"/></r>"#.to_string(),
        ));
        let mut transcript = Transcript::default();
        f.node("capture")
            .evaluate_transition(&f.env(), event, &mut run, &mut transcript)
            .unwrap();

        let node = f.node("check");
        let target = node.replay_data_loop(&f.env(), &mut run, &mut transcript).unwrap();

        assert_eq!(target, "done");
        assert_eq!(run.counter(node.id), 2);
        assert!(transcript.lines().iter().any(|l| l.contains("//item[3]")));
        assert!(!transcript.lines().iter().any(|l| l.starts_with("FAIL xmlcontent")));
    }

    #[test]
    fn test_data_loop_without_capture() {
        let f = data_loop_fixture();
        let mut run = f.run();
        let mut transcript = Transcript::default();
        let err = f
            .node("check")
            .replay_data_loop(&f.env(), &mut run, &mut transcript)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateMachine(_)));
    }
}
