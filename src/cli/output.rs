//! Output formatting module
//!
//! This module handles formatting run reports and validation results.

use crate::parser::PatternDefinition;
use crate::state_machine::{RunReport, ValidationReport};
use crate::Result;
use serde_json::json;
use std::path::Path;

/// Output a run report as JSON
pub fn output_json(w: &mut impl std::io::Write, report: &RunReport) -> Result<()> {
    let output = json!({
        "summary": {
            "test_id": report.test_id,
            "success": report.verdict.as_flag(),
            "final_state": report.final_state,
            "duration_ms": report.duration_ms(),
            "messages_sent": report.sent.len(),
        },
        "report": report.report,
        "transcript": report.transcript,
        "sent": report.sent.iter().map(|sent| {
            json!({
                "state": sent.state,
                "message": sent.message.describe(),
                "sent_at": sent.sent_at.to_rfc3339(),
                "answered": sent.answered,
            })
        }).collect::<Vec<_>>(),
    });

    serde_json::to_writer_pretty(&mut *w, &output)?;
    writeln!(w)?; // Add trailing newline
    Ok(())
}

/// Output a run report as plain text
pub fn output_text(w: &mut impl std::io::Write, report: &RunReport) -> Result<()> {
    writeln!(w, "Interoperability Test - {}", report.test_id)?;
    writeln!(w, "{}", "=".repeat(80))?;
    writeln!(w)?;

    for line in &report.transcript {
        writeln!(w, "  {}", line)?;
    }
    writeln!(w)?;

    if !report.sent.is_empty() {
        writeln!(w, "Messages sent:")?;
        writeln!(w, "{:-<80}", "")?;
        writeln!(w, "{:<20} {:<9} {:<49}", "State", "Answered", "Message")?;
        writeln!(w, "{:-<80}", "")?;
        for sent in &report.sent {
            let describe = sent.message.describe();
            let describe = if describe.len() > 49 {
                format!("{}...", truncate(&describe, 46))
            } else {
                describe
            };
            let answered = if sent.answered { "yes" } else { "no" };
            writeln!(w, "{:<20} {:<9} {:<49}", sent.state, answered, describe)?;
        }
        writeln!(w)?;
    }

    writeln!(w, "Summary:")?;
    writeln!(w, "  Verdict:     {}", report.verdict)?;
    if let Some(state) = &report.final_state {
        writeln!(w, "  Final state: {}", state)?;
    }
    writeln!(w, "  Duration:    {} ms", report.duration_ms())?;
    if !report.report.is_empty() {
        writeln!(w, "  Report:      {}", report.report)?;
    }
    Ok(())
}

/// Output the result of validating a pattern file
pub fn output_validation(
    w: &mut impl std::io::Write,
    path: &Path,
    pattern: &PatternDefinition,
    report: &ValidationReport,
) -> Result<()> {
    writeln!(w, "Validating pattern: {}", path.display())?;
    writeln!(w, "  Name:   {}", pattern.pattern.name)?;
    writeln!(w, "  States: {}", pattern.states.len())?;
    writeln!(w)?;

    for error in &report.errors {
        writeln!(w, "❌ {}", error)?;
    }
    for warning in &report.warnings {
        writeln!(w, "⚠️  {}", warning)?;
    }

    if report.is_valid() {
        writeln!(w, "✅ Pattern is valid")?;
    } else {
        writeln!(w, "❌ Pattern has {} error(s)", report.errors.len())?;
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
