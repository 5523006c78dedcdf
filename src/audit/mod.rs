//! Append-only audit log of agent executions
//!
//! Each agent keeps `audit.jsonl` beside its versions. Every line is one
//! [`AgentExecution`], written with a single `write_all` and synced before the
//! handle is released. Appends run on a worker thread and never hold the
//! caller past the configured timeout; a worker that has not started writing
//! by then gives the record up instead of appending it late.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::agent::ledger::VersionLedger;
use crate::agent::{AgentVersion, Version, VersionSelector};
use crate::error::{Error, IoContext, Result};
use crate::fsutil::write_atomic;

/// One invocation of an agent against the remote gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecution {
    pub execution_id: String,
    pub agent: String,
    pub version: Version,
    pub fingerprint: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentExecution {
    /// Start a record from the version that was actually used
    pub fn for_version(agent: &str, version: &AgentVersion) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            agent: agent.to_string(),
            version: version.version,
            fingerprint: version.fingerprint.clone(),
            correlation_id: String::new(),
            model: version.fields.model.clone(),
            provider: version.fields.provider.clone(),
            input_tokens: 0,
            output_tokens: 0,
            timestamp: Utc::now().trunc_subsecs(0),
            session_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session_id = Some(session.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Result of an append; failures are reported, never raised
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded,
    /// Nothing was written
    Warned(String),
    /// The write started but did not finish before the timeout
    Pending(String),
}

/// Filters for [`AuditLog::query`]
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub agent: Option<String>,
    pub version: Option<Version>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_agent(agent: &str) -> Self {
        Self {
            agent: Some(agent.to_string()),
            ..Default::default()
        }
    }

    fn matches(&self, e: &AgentExecution) -> bool {
        self.version.is_none_or(|v| e.version == v)
            && self.since.is_none_or(|t| e.timestamp >= t)
            && self.until.is_none_or(|t| e.timestamp <= t)
            && self.correlation_id.as_deref().is_none_or(|c| e.correlation_id == c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    /// One JSON array
    Json,
    /// One record per line
    Jsonl,
}

/// A stored record that no longer matches the ledger
#[derive(Debug, Clone, Serialize)]
pub struct AuditMismatch {
    pub execution_id: String,
    pub agent: String,
    pub version: Version,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub skipped_lines: usize,
    pub mismatches: Vec<AuditMismatch>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Audit log over every agent in one ledger
pub struct AuditLog {
    ledger: VersionLedger,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(ledger: VersionLedger, timeout: Duration) -> Self {
        Self { ledger, timeout }
    }

    /// Append one record, bounded by the configured timeout.
    ///
    /// The (agent, version, fingerprint) triple must name a stored version,
    /// and the timestamp may not predate that version.
    pub fn record(&self, execution: &AgentExecution) -> RecordOutcome {
        let path = match self.ledger.audit_path(&execution.agent) {
            Ok(path) => path,
            Err(e) => return warned(execution, e.to_string()),
        };
        if !self.ledger.exists(&execution.agent).unwrap_or(false) {
            return warned(execution, format!("agent '{}' does not exist", execution.agent));
        }
        let stored = match self.ledger.get(&execution.agent, VersionSelector::Exact(execution.version)) {
            Ok(stored) => stored,
            Err(e) => return warned(execution, e.to_string()),
        };
        if stored.fingerprint != execution.fingerprint {
            return warned(
                execution,
                format!(
                    "fingerprint {} does not match ledger {}",
                    execution.fingerprint, stored.fingerprint
                ),
            );
        }
        if execution.timestamp < stored.created_at {
            return warned(
                execution,
                format!(
                    "timestamp {} predates version {} ({})",
                    execution.timestamp.to_rfc3339(),
                    stored.version,
                    stored.created_at.to_rfc3339()
                ),
            );
        }
        let line = match serde_json::to_string(execution) {
            Ok(line) => line,
            Err(e) => return warned(execution, e.to_string()),
        };

        let state = Arc::new(AtomicU8::new(PENDING));
        let worker_state = Arc::clone(&state);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let claim = || {
                worker_state
                    .compare_exchange(PENDING, WRITING, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            };
            let _ = tx.send(append_line(&path, &line, claim));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(true)) => {
                log::debug!("Recorded execution {} for {}", execution.execution_id, execution.agent);
                RecordOutcome::Recorded
            }
            Ok(Ok(false)) => warned(execution, "append abandoned".to_string()),
            Ok(Err(e)) => warned(execution, e.to_string()),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let abandoned = state
                    .compare_exchange(PENDING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if abandoned {
                    warned(
                        execution,
                        format!("append timed out after {}ms", self.timeout.as_millis()),
                    )
                } else {
                    // Already writing; the line may still land, so a retry could duplicate it
                    pending(execution, self.timeout)
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => warned(execution, "append worker exited".to_string()),
        }
    }

    /// Matching records, most recent first
    pub fn query(&self, filter: &AuditQuery) -> Result<impl Iterator<Item = AgentExecution>> {
        let agents = match &filter.agent {
            Some(agent) => {
                if !self.ledger.exists(agent)? {
                    return Err(Error::not_found("agent", agent));
                }
                vec![agent.clone()]
            }
            None => self.ledger.list_agents()?,
        };

        let mut records = Vec::new();
        for agent in &agents {
            let (loaded, _) = read_records(&self.ledger.audit_path(agent)?)?;
            records.extend(loaded);
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let filter = filter.clone();
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(records.into_iter().filter(move |e| filter.matches(e)).take(limit))
    }

    /// Write matching records to `dest` atomically; returns the record count
    pub fn export(&self, filter: &AuditQuery, format: ExportFormat, dest: &Path) -> Result<usize> {
        let records: Vec<AgentExecution> = self.query(filter)?.collect();
        let encode = |e: serde_json::Error| Error::parse(dest, e);

        let body = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&records).map_err(encode)? + "\n",
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for record in &records {
                    out.push_str(&serde_json::to_string(record).map_err(encode)?);
                    out.push('\n');
                }
                out
            }
        };

        write_atomic(dest, body.as_bytes())?;
        log::info!("Exported {} audit records to {}", records.len(), dest.display());
        Ok(records.len())
    }

    /// Re-check every stored (agent, version, fingerprint) triple against the ledger
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        for agent in self.ledger.list_agents()? {
            let (records, skipped) = read_records(&self.ledger.audit_path(&agent)?)?;
            report.skipped_lines += skipped;

            for record in records {
                report.checked += 1;
                let mismatch = |reason: String| AuditMismatch {
                    execution_id: record.execution_id.clone(),
                    agent: record.agent.clone(),
                    version: record.version,
                    reason,
                };

                if record.agent != agent {
                    report
                        .mismatches
                        .push(mismatch(format!("record stored under agent '{}'", agent)));
                    continue;
                }
                match self.ledger.get(&agent, VersionSelector::Exact(record.version)) {
                    Ok(version) if version.fingerprint == record.fingerprint => {}
                    Ok(version) => report.mismatches.push(mismatch(format!(
                        "fingerprint {} does not match ledger {}",
                        record.fingerprint, version.fingerprint
                    ))),
                    Err(e) => report.mismatches.push(mismatch(e.to_string())),
                }
            }
        }
        Ok(report)
    }
}

const PENDING: u8 = 0;
const WRITING: u8 = 1;
const ABANDONED: u8 = 2;

fn pending(execution: &AgentExecution, timeout: Duration) -> RecordOutcome {
    let reason = format!(
        "append still in progress after {}ms; the record may be written late",
        timeout.as_millis()
    );
    log::warn!(
        "Audit record {} for {}@{}: {}",
        execution.execution_id,
        execution.agent,
        execution.version,
        reason
    );
    RecordOutcome::Pending(reason)
}

fn warned(execution: &AgentExecution, reason: String) -> RecordOutcome {
    log::warn!(
        "Audit record {} for {}@{} not written: {}",
        execution.execution_id,
        execution.agent,
        execution.version,
        reason
    );
    RecordOutcome::Warned(reason)
}

/// Append one line with a single write, repairing a torn tail first.
///
/// `claim` runs right before the write; returning false skips it.
fn append_line(path: &Path, line: &str, claim: impl FnOnce() -> bool) -> Result<bool> {
    let mut buf = String::with_capacity(line.len() + 2);
    if ends_without_newline(path)? {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path).at(path)?;
    if !claim() {
        return Ok(false);
    }
    file.write_all(buf.as_bytes()).at(path)?;
    file.sync_data().at(path)?;
    Ok(true)
}

fn ends_without_newline(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).at(path),
    };
    let len = file.metadata().at(path)?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).at(path)?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).at(path)?;
    Ok(last[0] != b'\n')
}

/// Parse an audit file, skipping lines that do not decode.
///
/// Lines are split as bytes so a tail torn inside a multi-byte character
/// costs only that line.
fn read_records(path: &Path) -> Result<(Vec<AgentExecution>, usize)> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e).at(path),
    };

    let torn_tail = !content.is_empty() && !content.ends_with(b"\n");
    let lines: Vec<&[u8]> = content.split(|b| *b == b'\n').collect();
    let mut records = Vec::with_capacity(lines.len());
    let mut skipped = 0;
    for (idx, raw) in lines.iter().enumerate() {
        if raw.trim_ascii().is_empty() {
            continue;
        }
        let last = idx + 1 == lines.len();
        let parsed = std::str::from_utf8(raw)
            .map_err(|e| e.to_string())
            .and_then(|line| serde_json::from_str::<AgentExecution>(line).map_err(|e| e.to_string()));
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                if last && torn_tail {
                    log::warn!("Skipping torn trailing line in {}", path.display());
                } else {
                    log::warn!("Skipping unreadable line {} in {}: {}", idx + 1, path.display(), e);
                }
            }
        }
    }
    Ok((records, skipped))
}
