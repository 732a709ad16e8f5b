//! State machine module - pattern states, guard evaluation and the execution loop

pub mod analyzer;
pub mod context;
pub mod evaluate;
pub mod graph;
pub mod guard;
pub mod machine;
pub mod report;
pub mod resolve;
pub mod state;
pub mod transition;

// Re-export key types
pub use analyzer::{ValidationReport, validate};
pub use context::{RunContext, RunSnapshot};
pub use evaluate::{EvalEnv, GuardOutcome};
pub use graph::{GraphStats, PatternGraph};
pub use guard::{Comparison, Guard, GuardTarget};
pub use machine::{MachineHandle, MachineOptions, ProgressListener, StateMachine};
pub use report::{MemorySink, ReportSink, RunReport, Transcript, Verdict};
pub use resolve::Resolver;
pub use state::{StateId, StateKind, StateNode, StateTable};
pub use transition::{Transition, TransitionAction};
