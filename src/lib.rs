//! Interoperability test state machine engine
//!
//! Runs interoperability test patterns against captured protocol traffic.
//!
//! This library provides functionality for:
//! - Loading test patterns (states, guarded transitions, trigger messages) from TOML
//! - Evaluating guards over headers and XML/JSON content of captured events
//! - Resolving `$$state|headers|name$$` and `%counter.state%` references
//! - Driving a run from an inbound event queue to a success or failure verdict
//! - Validating pattern structure and exporting it as a Graphviz graph

pub mod cli;
pub mod config;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod state_machine;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{Message, MsgEvent, Protocol};
pub use state_machine::{MachineHandle, RunReport, StateMachine, Verdict};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the given log level
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "interop-fsm");
    }
}
