//! Audit log commands

use chrono::{DateTime, Utc};
use colored::*;
use eyre::{Context, Result};

use super::print_structured;
use crate::agent::ledger::VersionLedger;
use crate::agent::{Version, VersionSelector};
use crate::audit::{AgentExecution, AuditLog, AuditQuery, RecordOutcome};
use crate::cli::{AuditAction, Globals, OutputFormat};
use crate::config::Config;

pub fn run(action: AuditAction, config: &Config, globals: Globals) -> Result<()> {
    let ledger = VersionLedger::new(config.agents_dir());
    match action {
        AuditAction::Record {
            agent,
            version,
            correlation_id,
            input_tokens,
            output_tokens,
            session,
            at,
        } => {
            let loaded = ledger.get(&agent, version.parse()?)?;
            let mut execution = AgentExecution::for_version(&agent, &loaded).with_tokens(input_tokens, output_tokens);
            if let Some(at) = at {
                let at = parse_time(&at)?;
                if at < loaded.created_at {
                    eyre::bail!(
                        "--at {} is earlier than {}@{} was created ({})",
                        at.to_rfc3339(),
                        agent,
                        loaded.version,
                        loaded.created_at.to_rfc3339()
                    );
                }
                execution = execution.with_timestamp(at);
            }
            if let Some(id) = correlation_id {
                execution = execution.with_correlation_id(id);
            }
            if let Some(session) = session {
                execution = execution.with_session(session);
            }

            let log = AuditLog::new(ledger, config.audit.append_timeout);
            match log.record(&execution) {
                RecordOutcome::Recorded => {
                    if !globals.quiet {
                        println!(
                            "{} Recorded {} for {}@{}",
                            "✓".green(),
                            execution.execution_id.dimmed(),
                            agent.cyan(),
                            execution.version
                        );
                    }
                }
                RecordOutcome::Warned(reason) => {
                    eprintln!("{} audit record not written: {}", "warning:".yellow(), reason);
                }
                RecordOutcome::Pending(reason) => {
                    eprintln!("{} audit record {}: {}", "warning:".yellow(), execution.execution_id, reason);
                }
            }
            Ok(())
        }
        AuditAction::Query {
            agent,
            version,
            since,
            until,
            correlation_id,
            limit,
            format,
        } => {
            let filter = AuditQuery {
                version: version.as_deref().map(parse_version).transpose()?,
                since: since.as_deref().map(parse_time).transpose()?,
                until: until.as_deref().map(parse_time).transpose()?,
                agent,
                correlation_id,
                limit,
            };
            let log = AuditLog::new(ledger, config.audit.append_timeout);
            query(&log, &filter, OutputFormat::resolve(format))
        }
        AuditAction::Export {
            output,
            agent,
            since,
            until,
            export_format,
        } => {
            let filter = AuditQuery {
                agent,
                since: since.as_deref().map(parse_time).transpose()?,
                until: until.as_deref().map(parse_time).transpose()?,
                ..Default::default()
            };
            let log = AuditLog::new(ledger, config.audit.append_timeout);
            let count = log.export(&filter, export_format, &output)?;
            if !globals.quiet {
                println!("{} Exported {} record(s) to {}", "✓".green(), count, output.display());
            }
            Ok(())
        }
        AuditAction::Verify { format } => {
            let log = AuditLog::new(ledger, config.audit.append_timeout);
            let report = log.verify()?;
            if !print_structured(OutputFormat::resolve(format), &report)? {
                println!(
                    "Checked {} record(s), skipped {} unreadable line(s)",
                    report.checked, report.skipped_lines
                );
                for m in &report.mismatches {
                    println!(
                        "  {} {} {}@{}: {}",
                        "✗".red(),
                        m.execution_id.dimmed(),
                        m.agent,
                        m.version,
                        m.reason
                    );
                }
                if report.is_clean() {
                    println!("{} Audit log is consistent with the ledger", "✓".green());
                }
            }
            if !report.is_clean() {
                eyre::bail!("{} audit record(s) do not match the ledger", report.mismatches.len());
            }
            Ok(())
        }
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).context(format!("Invalid RFC 3339 timestamp: {}", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

fn parse_version(raw: &str) -> Result<Version> {
    match raw.parse::<VersionSelector>()? {
        VersionSelector::Exact(v) => Ok(v),
        other => eyre::bail!("--version filters need an exact version, got '{}'", other),
    }
}

fn query(log: &AuditLog, filter: &AuditQuery, format: OutputFormat) -> Result<()> {
    let records: Vec<AgentExecution> = log.query(filter)?.collect();
    if print_structured(format, &records)? {
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No matching audit records".dimmed());
        return Ok(());
    }
    for r in &records {
        println!(
            "{}  {}@{}  {}  {}/{}  in={} out={}  {}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.agent.cyan(),
            r.version,
            &r.fingerprint[..r.fingerprint.len().min(19)],
            r.provider,
            r.model,
            r.input_tokens,
            r.output_tokens,
            r.correlation_id.dimmed()
        );
    }
    Ok(())
}
