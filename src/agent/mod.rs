//! Versioned agent configurations
//!
//! An agent is a named AI-assistant configuration. Every edit produces a new
//! immutable [`AgentVersion`]; the [`Agent`] record only carries a movable
//! pointer to the version currently in use.
//!
//! - [`version`]: semantic version numbers and bump kinds
//! - [`fingerprint`]: content addressing of a version's semantic fields
//! - [`ledger`]: the on-disk store
//! - [`diff`]: field-level comparison of two versions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::template::extract_variables;

pub mod diff;
pub mod fingerprint;
pub mod ledger;
pub mod version;

pub use version::{BumpKind, Version};

/// Provider tag used when none is given
pub const DEFAULT_PROVIDER: &str = "default";

/// Agent summary stored in `agent.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub current_version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Governance status of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Draft,
    Approved,
    Deprecated,
}

impl AgentStatus {
    /// Legal moves: draft -> approved, approved -> deprecated, draft -> deprecated
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        matches!(
            (self, next),
            (AgentStatus::Draft, AgentStatus::Approved)
                | (AgentStatus::Approved, AgentStatus::Deprecated)
                | (AgentStatus::Draft, AgentStatus::Deprecated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == AgentStatus::Deprecated
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Draft => write!(f, "draft"),
            AgentStatus::Approved => write!(f, "approved"),
            AgentStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// A tool the agent may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// A file attached to the agent's context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The semantically meaningful part of a version.
///
/// Everything in here feeds the content fingerprint; metadata such as creator,
/// time, reason and status lives on [`AgentVersion`] instead.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionFields {
    pub instructions: String,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl VersionFields {
    pub fn new(instructions: impl Into<String>, model: impl Into<String>) -> Self {
        let instructions = instructions.into();
        Self {
            variables: extract_variables(&instructions),
            instructions,
            model: model.into(),
            provider: DEFAULT_PROVIDER.to_string(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_skill(mut self, reference: &str) -> Self {
        self.skills.push(reference.to_string());
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Replace the instructions and re-derive the declared variables
    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.instructions = instructions.into();
        self.variables = extract_variables(&self.instructions);
    }

    /// Check the fields before anything touches disk
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = Error::InvalidConfig;

        if self.model.trim().is_empty() {
            return Err(invalid("model is required".to_string()));
        }
        if self.provider.trim().is_empty() {
            return Err(invalid("provider cannot be empty".to_string()));
        }
        if let Some(key) = self.params.iter().find(|(_, v)| contains_null(v)).map(|(k, _)| k) {
            return Err(invalid(format!("parameter '{}' contains a null value", key)));
        }
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(invalid("tool definitions need a name".to_string()));
            }
            if tool.parameters.values().any(contains_null) {
                return Err(invalid(format!("tool '{}' has a null parameter", tool.name)));
            }
        }
        if self.files.iter().any(|f| f.path.trim().is_empty()) {
            return Err(invalid("file references need a path".to_string()));
        }
        Ok(())
    }
}

fn contains_null(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.iter().any(contains_null),
        serde_json::Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

/// One immutable snapshot of an agent's configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentVersion {
    pub version: Version,
    pub fingerprint: String,
    pub parent_version: Option<Version>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub change_reason: String,
    #[serde(flatten)]
    pub fields: VersionFields,
}

/// Which version of an agent to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    /// Whatever `current_version` points at
    Current,
    /// Highest version number
    Latest,
    Exact(Version),
}

impl FromStr for VersionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "current" | "" => Ok(Self::Current),
            "latest" => Ok(Self::Latest),
            other => Ok(Self::Exact(other.parse()?)),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Current => write!(f, "current"),
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Validate an agent name before it is used as a directory name
pub fn validate_agent_name(name: &str) -> Result<&str, Error> {
    let invalid = |reason: &str| Error::InvalidName {
        kind: "agent",
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(invalid("cannot be '.' or '..'"));
    }
    if trimmed.contains('\0') {
        return Err(invalid("cannot contain null bytes"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(invalid("cannot contain path separators"));
    }
    if trimmed.starts_with('.') {
        return Err(invalid("cannot start with '.'"));
    }
    if trimmed.chars().count() > 64 {
        return Err(invalid("must be at most 64 characters"));
    }
    Ok(trimmed)
}
