//! Risk scanner for skill bundles
//!
//! Flags lines matching known high-risk patterns. Findings never block an
//! install on their own; they are shown so the user can decide.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::archive::{ArchiveEntry, EntryKind};
use crate::error::{Error, IoContext, Result};

/// Files larger than this are not scanned
const MAX_SCAN_BYTES: usize = 1024 * 1024;
const MAX_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCategory {
    ShellOut,
    DynamicEval,
    PrivilegeEscalation,
    DestructiveFs,
    PipeToShell,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskCategory::ShellOut => "shell-out",
            RiskCategory::DynamicEval => "dynamic-eval",
            RiskCategory::PrivilegeEscalation => "privilege-escalation",
            RiskCategory::DestructiveFs => "destructive-fs",
            RiskCategory::PipeToShell => "pipe-to-shell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Path relative to the skill root
    pub path: String,
    /// 1-based line number
    pub line: usize,
    pub category: RiskCategory,
    pub excerpt: String,
}

struct RiskPattern {
    category: RiskCategory,
    patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

static RISK_PATTERNS: Lazy<Vec<RiskPattern>> = Lazy::new(|| {
    vec![
        // Checked first so a `curl | sh` line is reported as a download, not a shell-out
        RiskPattern {
            category: RiskCategory::PipeToShell,
            patterns: compile(&[
                r"(curl|wget)\b.*\|\s*(sudo\s+)?(ba|z|da)?sh\b",
                r"(curl|wget)\b.*\|\s*(python3?|perl|ruby|node)\b",
                r"(curl|wget)\b.*-o\s+/tmp/.*&&.*sh",
            ]),
        },
        RiskPattern {
            category: RiskCategory::DestructiveFs,
            patterns: compile(&[
                r"rm\s+-[a-zA-Z]*[rR][a-zA-Z]*\s+(-[a-zA-Z]+\s+)*[/~*$]",
                r"rm\s+--recursive",
                r"shutil\.rmtree\(",
                r"mkfs\.",
                r"dd\s+if=.*of=/dev",
                r">\s*/dev/sd[a-z]",
            ]),
        },
        RiskPattern {
            category: RiskCategory::PrivilegeEscalation,
            patterns: compile(&[
                r"\bsudo\s",
                r"\bdoas\s",
                r"\bsu\s+(-|root\b)",
                r"chmod\s+(-R\s+)?([0-7]*4[0-7]{3}|u\+s|\+s)",
                r"chown\s+(-R\s+)?root\b",
            ]),
        },
        RiskPattern {
            category: RiskCategory::DynamicEval,
            patterns: compile(&[
                r"\beval\s*\(",
                r"\bexec\s*\(",
                r"^\s*eval\s",
                r"\bnew\s+Function\s*\(",
                r"__import__\s*\(",
                r"base64\s+(-d|--decode).*\|",
            ]),
        },
        RiskPattern {
            category: RiskCategory::ShellOut,
            patterns: compile(&[
                r"os\.system\s*\(",
                r"subprocess\.(run|call|Popen|check_output|check_call)\s*\(",
                r"child_process",
                r"\bexecSync\s*\(",
                r"Runtime\.getRuntime\(\)\.exec",
                r"shell\s*=\s*True",
                r"`[^`]*\$\([^)]*\)[^`]*`",
            ]),
        },
    ]
});

/// Scan one file's text; at most one finding per line
pub fn scan_text(path: &str, text: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let hit = RISK_PATTERNS
            .iter()
            .find(|p| p.patterns.iter().any(|re| re.is_match(line)));
        if let Some(pattern) = hit {
            findings.push(Finding {
                path: path.to_string(),
                line: idx + 1,
                category: pattern.category,
                excerpt: excerpt(line),
            });
        }
    }
    findings
}

/// Scan decoded archive entries before anything is written
pub fn scan_entries(entries: &[ArchiveEntry]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for entry in entries {
        if let EntryKind::File { contents, .. } = &entry.kind {
            if let Some(text) = as_text(contents) {
                let path = entry.path.to_string_lossy().replace('\\', "/");
                findings.extend(scan_text(&path, text));
            }
        }
    }
    findings
}

/// Scan every regular file under a skill directory
pub fn scan_dir(dir: &Path) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::parse(dir, e))?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    for path in paths {
        let bytes = fs::read(&path).at(&path)?;
        if let Some(text) = as_text(&bytes) {
            let relative = path.strip_prefix(dir).unwrap_or(&path);
            findings.extend(scan_text(&relative.to_string_lossy().replace('\\', "/"), text));
        }
    }
    Ok(findings)
}

/// Binary, oversized and non-UTF-8 files are skipped
fn as_text(bytes: &[u8]) -> Option<&str> {
    if bytes.len() > MAX_SCAN_BYTES || bytes.contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

fn excerpt(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_EXCERPT_CHARS).collect();
    format!("{}…", cut)
}
