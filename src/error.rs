//! Error taxonomy for the agent ledger, audit log, renderer and skill pipeline
//!
//! Library modules return [`Result`]; the command layer wraps these in
//! `eyre` reports with extra context.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("version not found: {name}@{version}")]
    VersionNotFound { name: String, version: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("illegal status transition for {name}@{version}: {from} -> {to}")]
    IllegalTransition {
        name: String,
        version: String,
        from: String,
        to: String,
    },

    #[error("missing template variable(s): {}", names.join(", "))]
    MissingVariable { names: Vec<String> },

    #[error(
        "cannot resolve skill reference '{reference}': {reason}\n\
         Supported forms:\n  <name>\n  registry:<name>\n  vcs:<owner>/<repo>[/<path>][@<ref>]\n  https://… | file://…"
    )]
    UnresolvedReference { reference: String, reason: String },

    #[error("integrity check failed for {subject}: expected {expected}, got {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("path escapes {}: {path}", root.display())]
    PathTraversal { root: PathBuf, path: String },

    #[error("unsafe archive entry '{entry}': {reason}")]
    UnsafeEntry { entry: String, reason: String },

    #[error("permission denied: {action}: {reason}")]
    PermissionDenied { action: String, reason: String },

    #[error("{operation} timed out after {}s", elapsed.as_secs_f32())]
    Timeout { operation: String, elapsed: Duration },

    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("invalid skill manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("skill manifest name mismatch: directory is '{expected}', manifest says '{found}'")]
    ManifestNameMismatch { expected: String, found: String },

    #[error("{0} cancelled")]
    Cancelled(String),

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("command failed (exit {code}): {command}\n{stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn parse(path: &Path, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn denied(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Attach the offending path to an `io::Result`
pub trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variable_lists_all_names() {
        let err = Error::MissingVariable {
            names: vec!["company".to_string(), "tone".to_string()],
        };
        assert_eq!(err.to_string(), "missing template variable(s): company, tone");
    }

    #[test]
    fn test_unresolved_reference_lists_forms() {
        let err = Error::UnresolvedReference {
            reference: "ftp:thing".to_string(),
            reason: "unknown prefix".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("registry:<name>"));
        assert!(msg.contains("vcs:<owner>/<repo>"));
    }

    #[test]
    fn test_io_context_keeps_path() {
        let result: std::io::Result<()> = Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result.at(Path::new("/tmp/agent.toml")).unwrap_err();
        assert!(err.to_string().contains("/tmp/agent.toml"));
    }
}
