//! Pattern files
//!
//! A pattern is the model of one interoperability test: its states,
//! guarded transitions, messages to send and constants. Patterns are
//! written in TOML and built into a [`StateTable`].

use crate::protocol::Message;
use crate::state_machine::{Guard, StateKind, StateTable, Transition};
use crate::{Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Pattern file root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub pattern: PatternInfo,
    #[serde(default)]
    pub constants: HashMap<String, String>,
    pub states: Vec<StateDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInfo {
    pub name: String,
    pub description: Option<String>,
    /// Key for cross-test data; defaults to the pattern name
    pub test_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    #[serde(alias = "START")]
    Start,
    #[serde(alias = "TRIGGERSTART", alias = "triggerstart")]
    TriggerStart,
    #[serde(alias = "TRIGGER")]
    Trigger,
    #[serde(alias = "NORMAL")]
    Normal,
    #[serde(alias = "LOOP")]
    Loop,
    #[serde(alias = "DATALOOP", alias = "dataloop")]
    DataLoop,
    #[serde(alias = "END")]
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDefinition {
    pub label: String,
    pub kind: StateType,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    /// END states only
    #[serde(default)]
    pub success: bool,
    /// END states only
    pub report: Option<String>,
    /// DATA_LOOP states only: label of the state whose captured event is replayed
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub target: String,
    #[serde(default)]
    pub guards: Vec<Guard>,
    pub message: Option<Message>,
    pub report: Option<String>,
}

impl PatternDefinition {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)?;
        let pattern = Self::parse_str(&contents)?;
        tracing::debug!(
            "Loaded pattern '{}' with {} state(s) from {:?}",
            pattern.pattern.name,
            pattern.states.len(),
            path
        );
        Ok(pattern)
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn test_id(&self) -> String {
        self.pattern
            .test_id
            .clone()
            .unwrap_or_else(|| self.pattern.name.clone())
    }

    /// Build the state table
    pub fn build(&self) -> Result<StateTable> {
        let states = self
            .states
            .iter()
            .map(|s| Ok((s.label.clone(), s.build()?)))
            .collect::<Result<Vec<_>>>()?;
        StateTable::new(states)
    }
}

impl TransitionDefinition {
    fn build(&self, from: &str) -> Result<Transition> {
        let transition = match &self.message {
            Some(message) => {
                ensure!(
                    self.guards.is_empty(),
                    "transition '{}' -> '{}' has both guards and a message",
                    from,
                    self.target
                );
                Transition::send(self.target.clone(), message.clone())
            }
            None => Transition::guarded(self.target.clone(), self.guards.clone()),
        };
        Ok(match &self.report {
            Some(report) => transition.with_report(report.clone()),
            None => transition,
        })
    }
}

impl StateDefinition {
    fn transitions(&self) -> Result<Vec<Transition>> {
        self.transitions
            .iter()
            .map(|t| t.build(&self.label))
            .collect()
    }

    /// Split loop transitions into the counter exit and the rest
    fn split_exit(&self) -> Result<(Transition, Vec<Transition>)> {
        let (mut exits, rest): (Vec<_>, Vec<_>) = self
            .transitions()?
            .into_iter()
            .partition(Transition::is_counter);
        ensure!(
            exits.len() == 1,
            "loop state '{}' needs exactly one transition guarded only by 'index', found {}",
            self.label,
            exits.len()
        );
        Ok((exits.remove(0), rest))
    }

    fn build(&self) -> Result<StateKind> {
        let label = &self.label;
        let kind = match self.kind {
            StateType::Start => StateKind::Start {
                transitions: self.transitions()?,
            },
            StateType::Normal => StateKind::Normal {
                transitions: self.transitions()?,
            },
            StateType::TriggerStart | StateType::Trigger => {
                let mut transitions = self.transitions()?;
                ensure!(
                    transitions.len() == 1 && transitions[0].message().is_some(),
                    "trigger state '{}' needs exactly one transition with a message",
                    label
                );
                let trigger = transitions.remove(0);
                if self.kind == StateType::TriggerStart {
                    StateKind::TriggerStart { trigger }
                } else {
                    StateKind::Trigger { trigger }
                }
            }
            StateType::Loop => {
                let (exit, mut rest) = self.split_exit()?;
                ensure!(
                    rest.len() == 1 && rest[0].message().is_some(),
                    "loop state '{}' needs exactly one transition with a message",
                    label
                );
                StateKind::Loop {
                    exit,
                    body: rest.remove(0),
                }
            }
            StateType::DataLoop => {
                let Some(source) = &self.source else {
                    bail!("data loop state '{}' needs a 'source' state", label);
                };
                let (exit, body) = self.split_exit()?;
                StateKind::DataLoop {
                    source: source.clone(),
                    exit,
                    body,
                }
            }
            StateType::End => {
                ensure!(
                    self.transitions.is_empty(),
                    "end state '{}' cannot have transitions",
                    label
                );
                StateKind::End {
                    success: self.success,
                    report: self.report.clone().unwrap_or_default(),
                }
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::state_machine::{Comparison, validate};
    use std::io::Write;

    const GET_PATTERN: &str = r#"
[pattern]
name = "GET returns 200"
test_id = "t1"

[constants]
expected = "200"

[[states]]
label = "send"
kind = "trigger_start"
  [[states.transitions]]
  target = "wait"
  [states.transitions.message]
  protocol = "http"
  url = "http://server/items"
  method = "GET"

[[states]]
label = "wait"
kind = "normal"
  [[states.transitions]]
  target = "ok"
  report = "server answered"
  guards = [{ label = "status", comparison = "equals", value = "$$expected$$" }]

  [[states.transitions]]
  target = "late"
  guards = [{ label = "timeout", comparison = "EQUALS", value = "1000" }]

[[states]]
label = "ok"
kind = "end"
success = true
report = "interoperable"

[[states]]
label = "late"
kind = "END"
report = "no answer"
"#;

    #[test]
    fn test_parse_and_build() {
        let pattern = PatternDefinition::parse_str(GET_PATTERN).unwrap();
        assert_eq!(pattern.test_id(), "t1");
        assert_eq!(pattern.constants.get("expected").map(String::as_str), Some("200"));

        let table = pattern.build().unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.first().unwrap().label, "send");
        assert!(matches!(
            table.lookup("late").unwrap().kind,
            StateKind::End { success: false, .. }
        ));

        let wait = table.lookup("wait").unwrap();
        let transitions = wait.transitions();
        assert_eq!(transitions[0].guards()[0].comparison, Comparison::Equals);
        assert_eq!(transitions[0].display_label(), "server answered");
        assert!(transitions[1].is_timeout());

        assert!(validate(&table).is_valid());
    }

    #[test]
    fn test_loop_states() {
        let pattern = PatternDefinition::parse_str(
            r#"
[pattern]
name = "loop"

[[states]]
label = "poll"
kind = "loop"
  [[states.transitions]]
  target = "wait"
  message = { protocol = "coap", url = "coap://n/%counter.poll%" }
  [[states.transitions]]
  target = "replay"
  guards = [{ label = "index", comparison = "COUNTER", value = "3" }]

[[states]]
label = "replay"
kind = "DATALOOP"
source = "wait"
  [[states.transitions]]
  target = "done"
  guards = [{ label = "index", comparison = "counter", value = "$$wait|content|length($.items)$$" }]
  [[states.transitions]]
  target = "replay"
  guards = [{ label = "content[$.items[%counter.replay%]]", comparison = "contains", value = "id" }]
"#,
        )
        .unwrap();
        assert_eq!(pattern.test_id(), "loop");

        let kinds: Vec<StateKind> = pattern.states.iter().map(|s| s.build().unwrap()).collect();
        match &kinds[0] {
            StateKind::Loop { exit, body } => {
                assert_eq!(exit.target, "replay");
                assert!(body.message().is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        match &kinds[1] {
            StateKind::DataLoop { source, exit, body } => {
                assert_eq!(source, "wait");
                assert_eq!(exit.target, "done");
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_structural_errors() {
        let cases = [
            // trigger without message
            r#"
[pattern]
name = "x"
[[states]]
label = "s"
kind = "trigger"
  [[states.transitions]]
  target = "e"
"#,
            // end with transitions
            r#"
[pattern]
name = "x"
[[states]]
label = "e"
kind = "end"
  [[states.transitions]]
  target = "e"
"#,
            // data loop without source
            r#"
[pattern]
name = "x"
[[states]]
label = "d"
kind = "data_loop"
"#,
            // guards and message together
            r#"
[pattern]
name = "x"
[[states]]
label = "s"
kind = "normal"
  [[states.transitions]]
  target = "e"
  guards = [{ label = "status", comparison = "equals", value = "1" }]
  message = { url = "http://a" }
"#,
        ];

        for case in cases {
            let err = PatternDefinition::parse_str(case)
                .unwrap()
                .build()
                .unwrap_err();
            assert!(matches!(err, Error::Pattern(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", GET_PATTERN).unwrap();
        let pattern = PatternDefinition::from_file(file.path()).unwrap();
        assert_eq!(pattern.pattern.name, "GET returns 200");

        let err = PatternDefinition::parse_str("[pattern]\nname = 1").unwrap_err();
        assert!(matches!(err, Error::Pattern(_)));
    }
}
