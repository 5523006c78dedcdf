//! Trust policy commands

use colored::*;
use eyre::Result;
use serde::Serialize;

use super::print_structured;
use crate::cli::{OutputFormat, TrustAction};
use crate::trust::{Capability, Decision, TrustLevel, TrustSource, classify, decide};

pub fn run(action: TrustAction) -> Result<()> {
    match action {
        TrustAction::Table { format } => table(OutputFormat::resolve(format)),
        TrustAction::Classify { source } => {
            println!("{}", classify(source));
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct Row {
    level: TrustLevel,
    sources: Vec<TrustSource>,
    capability: Capability,
    decision: Decision,
}

fn decision_colored(decision: Decision) -> ColoredString {
    match decision {
        Decision::Allow => decision.to_string().green(),
        Decision::AllowWithConfirmation => decision.to_string().yellow(),
        Decision::DenyUnlessOptIn => decision.to_string().red(),
    }
}

fn table(format: OutputFormat) -> Result<()> {
    let mut rows = Vec::new();
    for level in TrustLevel::ALL {
        let sources: Vec<TrustSource> = TrustSource::ALL.into_iter().filter(|s| classify(*s) == level).collect();
        for capability in Capability::ALL {
            rows.push(Row {
                level,
                sources: sources.clone(),
                capability,
                decision: decide(level, capability),
            });
        }
    }

    if print_structured(format, &rows)? {
        return Ok(());
    }

    println!("{}", "Trust policy:".bold());
    for level in TrustLevel::ALL {
        let sources: Vec<String> = TrustSource::ALL
            .into_iter()
            .filter(|s| classify(*s) == level)
            .map(|s| s.to_string())
            .collect();
        println!();
        println!("  {} ({})", level.to_string().bold(), sources.join(", ").dimmed());
        for row in rows.iter().filter(|r| r.level == level) {
            println!("    {:<18} {}", row.capability.to_string(), decision_colored(row.decision));
        }
    }
    Ok(())
}
