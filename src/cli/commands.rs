//! CLI command implementations
//!
//! This module contains the implementation for each CLI command.

use crate::parser::PatternDefinition;
use crate::state_machine::{ValidationReport, validate as validate_table};
use crate::{Config, Result, cli::Cli};
use std::path::PathBuf;

/// Load a pattern and run the structural validation on it
fn load_and_validate(path: &PathBuf) -> Result<(PatternDefinition, ValidationReport)> {
    tracing::info!("Loading pattern from {:?}", path);
    let pattern = PatternDefinition::from_file(path)?;
    let table = pattern.build()?;
    let report = validate_table(&table);
    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    Ok((pattern, report))
}

/// Run command implementation
pub mod run {
    use super::*;
    use crate::cli::{Commands, OutputFormat};
    use crate::protocol::{InMemoryTestStore, MsgEvent, ScriptedInvoker};
    use crate::state_machine::{MachineHandle, StateMachine};
    use serde::Deserialize;
    use std::io::BufRead;
    use std::sync::Arc;
    use std::time::Duration;

    /// One entry of an events file
    #[derive(Debug, Clone, Deserialize)]
    pub struct ScheduledEvent {
        /// Delay after the previous event
        #[serde(default)]
        pub delay_ms: u64,
        pub event: MsgEvent,
    }

    pub fn load_events(path: &PathBuf) -> Result<Vec<ScheduledEvent>> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            crate::Error::InvalidContent(format!("Failed to parse events file {:?}: {}", path, e))
        })
    }

    /// Push scheduled events in order, honoring their delays
    async fn produce(handle: MachineHandle, events: Vec<ScheduledEvent>) {
        for scheduled in events {
            if scheduled.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(scheduled.delay_ms)).await;
            }
            tracing::debug!("Pushing {}", scheduled.event.summary());
            if let Err(e) = handle.push_event(scheduled.event).await {
                tracing::debug!("Stopped pushing events: {}", e);
                break;
            }
        }
    }

    /// Execute the run command
    pub async fn execute(args: Cli, config: Config) -> Result<()> {
        let (pattern_path, events, responses, debug, store_path, test_id, output) =
            match args.command {
                Commands::Run {
                    pattern,
                    events,
                    responses,
                    debug,
                    store,
                    test_id,
                    output,
                } => (pattern, events, responses, debug, store, test_id, output),
                _ => unreachable!("run::execute called with wrong command"),
            };

        let (mut pattern, validation) = load_and_validate(&pattern_path)?;
        validation.into_result()?;
        if test_id.is_some() {
            pattern.pattern.test_id = test_id;
        }

        let mut engine = config.engine.clone();
        engine.debug_mode |= debug;

        let store_path = store_path.or(config.store.path.clone());
        let store = Arc::new(match &store_path {
            Some(path) => InMemoryTestStore::load(path).await?,
            None => InMemoryTestStore::new(),
        });

        let (machine, handle) = StateMachine::from_pattern(&pattern, &engine)?;
        let machine = machine.with_store(store.clone());

        finish(
            machine,
            handle,
            events,
            responses,
            engine.debug_mode,
            output,
            store,
            store_path,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        machine: StateMachine,
        handle: MachineHandle,
        events: Option<PathBuf>,
        responses: Option<PathBuf>,
        debug_mode: bool,
        output: OutputFormat,
        store: Arc<InMemoryTestStore>,
        store_path: Option<PathBuf>,
    ) -> Result<()> {
        let mut machine = machine;
        if let Some(path) = &responses {
            tracing::info!("Loading scripted responses from {:?}", path);
            machine = machine.with_invoker(Arc::new(ScriptedInvoker::from_file(path)?));
        }

        if let Some(path) = &events {
            let scheduled = load_events(path)?;
            tracing::info!("Replaying {} event(s) from {:?}", scheduled.len(), path);
            tokio::spawn(produce(handle.clone(), scheduled));
        }

        if debug_mode {
            let stepper = handle.clone();
            eprintln!("Debug mode: press Enter to take each transition");
            std::thread::spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    if line.is_err() || stepper.is_stopped() {
                        break;
                    }
                    stepper.step();
                }
            });
        }

        let stopper = handle.clone();
        let running = tokio::spawn(machine.start());
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping test");
                stopper.stop();
            }
        });

        let report = running
            .await
            .map_err(|e| crate::Error::Interrupted(format!("test task failed: {}", e)))?;
        ctrl_c.abort();

        if let Some(path) = store_path {
            store.save(&path).await?;
            tracing::info!("Saved cross-test data to {:?}", path);
        }

        match output {
            OutputFormat::Text => crate::cli::output::output_text(&mut std::io::stdout(), &report)?,
            OutputFormat::Json => crate::cli::output::output_json(&mut std::io::stdout(), &report)?,
        }

        if report.is_success() {
            Ok(())
        } else {
            Err(crate::custom_error!("Test verdict: {}", report.verdict))
        }
    }
}

/// Validate command implementation
pub mod validate {
    use super::*;

    /// Execute the validate command
    pub fn execute(pattern_path: PathBuf) -> Result<()> {
        let (pattern, report) = match load_and_validate(&pattern_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("❌ Failed to load pattern: {}", e);
                return Err(e);
            }
        };

        crate::cli::output::output_validation(
            &mut std::io::stdout(),
            &pattern_path,
            &pattern,
            &report,
        )?;

        if report.is_valid() {
            Ok(())
        } else {
            Err(crate::Error::custom("Pattern validation failed"))
        }
    }
}

/// Dot command implementation
pub mod dot {
    use super::*;
    use crate::state_machine::PatternGraph;

    /// Execute the dot command
    pub fn execute(pattern_path: PathBuf, output: Option<PathBuf>) -> Result<()> {
        let pattern = PatternDefinition::from_file(&pattern_path)?;
        let table = pattern.build()?;
        let dot = PatternGraph::build(&table).to_dot();

        match output {
            Some(path) => {
                std::fs::write(&path, dot)?;
                println!("Graph exported to {}", path.display());
            }
            None => print!("{}", dot),
        }
        Ok(())
    }
}
