//! On-disk version ledger
//!
//! Layout under the agents root:
//!
//! ```text
//! <name>/agent.toml              summary + current_version pointer
//! <name>/versions/<semver>.toml  one immutable AgentVersion per file
//! <name>/audit.jsonl             execution records (see crate::audit)
//! ```
//!
//! Version files are never rewritten except for the governance `status`
//! field. Fingerprints are recomputed on every read and compared with the
//! stored value.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::diff::VersionDiff;
use super::fingerprint::fingerprint;
use super::{
    Agent, AgentStatus, AgentVersion, BumpKind, FileRef, ToolDefinition, Version, VersionFields, VersionSelector,
    validate_agent_name,
};
use crate::error::{Error, IoContext, Result};
use crate::fsutil::{write_atomic, write_new_atomic};

const MANIFEST_FILE: &str = "agent.toml";
const VERSIONS_DIR: &str = "versions";
const AUDIT_FILE: &str = "audit.jsonl";

/// Who and why, attached to every new version
#[derive(Debug, Clone, Default)]
pub struct CommitInfo {
    pub creator: String,
    pub reason: String,
}

impl CommitInfo {
    pub fn new(creator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            reason: reason.into(),
        }
    }
}

/// On-disk shape of a version file.
///
/// Scalars come first so the TOML serializer never has to emit a plain value
/// after a table.
#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    version: Version,
    fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_version: Option<Version>,
    status: AgentStatus,
    created_at: DateTime<Utc>,
    #[serde(default)]
    created_by: String,
    #[serde(default)]
    change_reason: String,
    model: String,
    provider: String,
    instructions: String,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    params: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    files: Vec<FileRef>,
}

impl From<&AgentVersion> for VersionRecord {
    fn from(v: &AgentVersion) -> Self {
        let f = &v.fields;
        Self {
            version: v.version,
            fingerprint: v.fingerprint.clone(),
            parent_version: v.parent_version,
            status: v.status,
            created_at: v.created_at,
            created_by: v.created_by.clone(),
            change_reason: v.change_reason.clone(),
            model: f.model.clone(),
            provider: f.provider.clone(),
            instructions: f.instructions.clone(),
            skills: f.skills.clone(),
            variables: f.variables.clone(),
            params: f.params.clone(),
            tools: f.tools.clone(),
            files: f.files.clone(),
        }
    }
}

impl VersionRecord {
    fn into_version(self) -> (AgentVersion, String) {
        let stored = self.fingerprint;
        let fields = VersionFields {
            instructions: self.instructions,
            model: self.model,
            provider: self.provider,
            tools: self.tools,
            files: self.files,
            skills: self.skills,
            variables: self.variables,
            params: self.params,
        };
        let version = AgentVersion {
            version: self.version,
            fingerprint: fingerprint(&fields),
            parent_version: self.parent_version,
            status: self.status,
            created_at: self.created_at,
            created_by: self.created_by,
            change_reason: self.change_reason,
            fields,
        };
        (version, stored)
    }
}

/// Full snapshot of one agent, used by `agent export`
#[derive(Debug, Serialize)]
pub struct AgentExport {
    pub agent: Agent,
    pub versions: Vec<AgentVersion>,
}

/// Versioned agent store rooted at one directory
#[derive(Debug, Clone)]
pub struct VersionLedger {
    root: PathBuf,
}

impl VersionLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn agent_dir(&self, name: &str) -> Result<PathBuf> {
        let name = validate_agent_name(name)?;
        Ok(self.root.join(name))
    }

    fn version_path(&self, name: &str, version: Version) -> Result<PathBuf> {
        Ok(self.agent_dir(name)?.join(VERSIONS_DIR).join(format!("{}.toml", version)))
    }

    /// Path of the agent's append-only audit file
    pub fn audit_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.agent_dir(name)?.join(AUDIT_FILE))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.agent_dir(name)?.join(MANIFEST_FILE).is_file())
    }

    /// Create a new agent whose first version is 1.0.0 (draft)
    pub fn create(
        &self,
        name: &str,
        description: &str,
        fields: VersionFields,
        info: &CommitInfo,
    ) -> Result<(Agent, AgentVersion)> {
        let name = validate_agent_name(name)?.to_string();
        fields.validate()?;

        let target = self.root.join(&name);
        if target.exists() {
            return Err(Error::AlreadyExists { kind: "agent", name });
        }
        fs::create_dir_all(&self.root).at(&self.root)?;

        let now = Utc::now().trunc_subsecs(0);
        let agent = Agent {
            id: new_agent_id(),
            name: name.clone(),
            description: description.to_string(),
            current_version: Version::INITIAL,
            created_at: now,
            updated_at: now,
        };
        let version = AgentVersion {
            version: Version::INITIAL,
            fingerprint: fingerprint(&fields),
            parent_version: None,
            status: AgentStatus::Draft,
            created_at: now,
            created_by: info.creator.clone(),
            change_reason: info.reason.clone(),
            fields,
        };

        // Build the whole directory beside its final location, then move it in
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)
            .at(&self.root)?;
        write_atomic(&staging.path().join(MANIFEST_FILE), encode_agent(&agent)?.as_bytes())?;
        write_atomic(
            &staging
                .path()
                .join(VERSIONS_DIR)
                .join(format!("{}.toml", version.version)),
            encode_version(&version)?.as_bytes(),
        )?;

        if target.exists() {
            return Err(Error::AlreadyExists { kind: "agent", name });
        }
        fs::rename(staging.path(), &target).at(&target)?;

        log::info!("Created agent {}@{}", name, version.version);
        Ok((agent, version))
    }

    /// Commit a new immutable version derived from the highest existing one
    pub fn commit_new_version(
        &self,
        name: &str,
        fields: VersionFields,
        bump: BumpKind,
        info: &CommitInfo,
        advance_current: bool,
    ) -> Result<AgentVersion> {
        fields.validate()?;
        let mut agent = self.load_agent(name)?;
        let highest = self
            .history(name)?
            .into_iter()
            .max()
            .unwrap_or(agent.current_version);

        let now = Utc::now().trunc_subsecs(0);
        let version = AgentVersion {
            version: highest.bump(bump)?,
            fingerprint: fingerprint(&fields),
            parent_version: Some(agent.current_version),
            status: AgentStatus::Draft,
            created_at: now,
            created_by: info.creator.clone(),
            change_reason: info.reason.clone(),
            fields,
        };

        let path = self.version_path(name, version.version)?;
        write_new_atomic(
            &path,
            encode_version(&version)?.as_bytes(),
            "version",
            &format!("{}@{}", agent.name, version.version),
        )?;

        if advance_current {
            agent.current_version = version.version;
            agent.updated_at = now;
            if let Err(e) = self.write_agent(&agent) {
                if let Err(cleanup) = fs::remove_file(&path) {
                    log::warn!("Failed to remove orphaned version {}: {}", path.display(), cleanup);
                }
                return Err(e);
            }
        }

        log::info!(
            "Committed {}@{} ({} bump from {})",
            agent.name,
            version.version,
            bump,
            highest
        );
        Ok(version)
    }

    pub fn load_agent(&self, name: &str) -> Result<Agent> {
        let path = self.agent_dir(name)?.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(Error::not_found("agent", name));
        }
        let content = fs::read_to_string(&path).at(&path)?;
        toml::from_str(&content).map_err(|e| Error::parse(&path, e))
    }

    /// Load one version, verifying its stored fingerprint
    pub fn get(&self, name: &str, selector: VersionSelector) -> Result<AgentVersion> {
        let version = match selector {
            VersionSelector::Current => self.load_agent(name)?.current_version,
            VersionSelector::Latest => {
                self.load_agent(name)?;
                self.history(name)?.into_iter().max().ok_or_else(|| Error::VersionNotFound {
                    name: name.to_string(),
                    version: "latest".to_string(),
                })?
            }
            VersionSelector::Exact(v) => v,
        };
        self.read_version(name, version)
    }

    fn read_version(&self, name: &str, version: Version) -> Result<AgentVersion> {
        let path = self.version_path(name, version)?;
        if !path.is_file() {
            if !self.exists(name)? {
                return Err(Error::not_found("agent", name));
            }
            return Err(Error::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        let content = fs::read_to_string(&path).at(&path)?;
        let record: VersionRecord = toml::from_str(&content).map_err(|e| Error::parse(&path, e))?;
        if record.version != version {
            return Err(Error::Integrity {
                subject: path.display().to_string(),
                expected: version.to_string(),
                actual: record.version.to_string(),
            });
        }

        let (loaded, stored) = record.into_version();
        if loaded.fingerprint != stored {
            return Err(Error::Integrity {
                subject: format!("{}@{}", name, version),
                expected: stored,
                actual: loaded.fingerprint,
            });
        }
        Ok(loaded)
    }

    /// Version numbers, oldest first
    pub fn history(&self, name: &str) -> Result<Vec<Version>> {
        let dir = self.agent_dir(name)?.join(VERSIONS_DIR);
        if !self.exists(name)? {
            return Err(Error::not_found("agent", name));
        }
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).at(&dir)? {
            let path = entry.at(&dir)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<Version>() {
                Ok(v) => versions.push(v),
                Err(_) => log::warn!("Ignoring stray file in version store: {}", path.display()),
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Lazily load every version, oldest first.
    ///
    /// Calling this again yields a fresh iterator over the same set.
    pub fn list_versions(&self, name: &str) -> Result<VersionIter<'_>> {
        Ok(VersionIter {
            ledger: self,
            name: name.to_string(),
            pending: self.history(name)?.into_iter(),
        })
    }

    /// Repoint `current` at an existing version (rollback or roll forward)
    pub fn set_current(&self, name: &str, version: Version) -> Result<Agent> {
        let mut agent = self.load_agent(name)?;
        // Loading verifies the target exists and is intact
        self.read_version(name, version)?;

        let previous = agent.current_version;
        agent.current_version = version;
        agent.updated_at = Utc::now().trunc_subsecs(0);
        self.write_agent(&agent)?;

        log::info!("Moved {} current from {} to {}", agent.name, previous, version);
        Ok(agent)
    }

    /// Move a version through the governance state machine
    pub fn set_status(&self, name: &str, version: Version, status: AgentStatus) -> Result<AgentVersion> {
        let mut loaded = self.read_version(name, version)?;
        if !loaded.status.can_transition_to(status) {
            return Err(Error::IllegalTransition {
                name: name.to_string(),
                version: version.to_string(),
                from: loaded.status.to_string(),
                to: status.to_string(),
            });
        }

        let from = loaded.status;
        loaded.status = status;
        let path = self.version_path(name, version)?;
        write_atomic(&path, encode_version(&loaded)?.as_bytes())?;

        log::info!("{}@{}: {} -> {}", name, version, from, status);
        Ok(loaded)
    }

    /// Field-level comparison of two versions
    pub fn diff(&self, name: &str, from: Version, to: Version) -> Result<VersionDiff> {
        let old = self.read_version(name, from)?;
        let new = self.read_version(name, to)?;
        Ok(VersionDiff::between(&old, &new))
    }

    /// Names of every agent under the root, sorted
    pub fn list_agents(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).at(&self.root)? {
            let path = entry.at(&self.root)?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            names.push(name.to_string());
        }
        names.sort();
        Ok(names)
    }

    /// Remove an agent with all its versions and audit records
    pub fn delete(&self, name: &str) -> Result<PathBuf> {
        let dir = self.agent_dir(name)?;
        if !self.exists(name)? {
            return Err(Error::not_found("agent", name));
        }
        fs::remove_dir_all(&dir).at(&dir)?;
        log::info!("Deleted agent {}", name);
        Ok(dir)
    }

    pub fn export_agent(&self, name: &str) -> Result<AgentExport> {
        let agent = self.load_agent(name)?;
        let versions = self.list_versions(name)?.collect::<Result<Vec<_>>>()?;
        Ok(AgentExport { agent, versions })
    }

    fn write_agent(&self, agent: &Agent) -> Result<()> {
        let path = self.agent_dir(&agent.name)?.join(MANIFEST_FILE);
        write_atomic(&path, encode_agent(agent)?.as_bytes())
    }
}

/// Iterator returned by [`VersionLedger::list_versions`]
pub struct VersionIter<'a> {
    ledger: &'a VersionLedger,
    name: String,
    pending: std::vec::IntoIter<Version>,
}

impl Iterator for VersionIter<'_> {
    type Item = Result<AgentVersion>;

    fn next(&mut self) -> Option<Self::Item> {
        let version = self.pending.next()?;
        Some(self.ledger.read_version(&self.name, version))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

fn new_agent_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("agt_{}", &hex[..16])
}

fn encode_agent(agent: &Agent) -> Result<String> {
    toml::to_string_pretty(agent).map_err(|e| Error::InvalidConfig(format!("cannot encode agent: {}", e)))
}

fn encode_version(version: &AgentVersion) -> Result<String> {
    toml::to_string_pretty(&VersionRecord::from(version))
        .map_err(|e| Error::InvalidConfig(format!("cannot encode version {}: {}", version.version, e)))
}
