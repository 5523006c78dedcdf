//! Skills: reusable instruction bundles with optional scripts and references
//!
//! A skill is a directory under the skills root holding `SKILL.md` (YAML
//! front-matter plus a Markdown body) and optionally `scripts/`,
//! `references/` and `assets/`. Installed skills also carry an
//! [`InstallReceipt`] recording where they came from.
//!
//! - [`resolver`]: reference string to fetch location
//! - [`installer`] / [`archive`]: fetch, verify and unpack bundles
//! - [`scanner`]: flag risky content before install
//! - [`store`]: progressive-disclosure access to installed skills
//! - [`context`]: inject skill bodies into agent instructions
//! - [`script`]: policy-gated script execution

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::trust::{TrustLevel, TrustSource, classify};

pub mod archive;
pub mod context;
pub mod installer;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod script;
pub mod store;
pub mod template;
pub mod validate;

/// Manifest file name inside every skill directory
pub const MANIFEST_FILE: &str = "SKILL.md";
/// Install receipt written next to installed skills
pub const RECEIPT_FILE: &str = ".steward.json";

/// Resource subdirectories exposed through progressive disclosure
pub const RESOURCE_DIRS: [&str; 3] = ["scripts", "references", "assets"];

/// Front-matter of a SKILL.md
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, serde_json::Value>,
    /// Advisory only; never turned into granted tool access
    #[serde(rename = "allowed-tools", skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
}

/// Kind of location a skill was obtained from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SkillSourceKind {
    Local,
    Registry,
    Vcs,
    Url,
}

impl fmt::Display for SkillSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkillSourceKind::Local => "local",
            SkillSourceKind::Registry => "registry",
            SkillSourceKind::Vcs => "vcs",
            SkillSourceKind::Url => "url",
        };
        f.write_str(s)
    }
}

/// Provenance record persisted as `.steward.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub source: SkillSourceKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub trust_source: TrustSource,
    pub trust: TrustLevel,
    pub installed_at: DateTime<Utc>,
}

/// Resource paths of a skill, relative to its root
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkillResources {
    pub scripts: Vec<String>,
    pub references: Vec<String>,
    pub assets: Vec<String>,
}

/// A fully loaded skill
#[derive(Debug, Clone, Serialize)]
pub struct Skill {
    #[serde(flatten)]
    pub metadata: SkillMetadata,
    pub instructions: String,
    pub path: PathBuf,
    pub source: SkillSourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    pub trust: TrustLevel,
}

impl Skill {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Trust of a stored skill: receipts carry provenance, otherwise it was authored here
pub fn trust_of(receipt: Option<&InstallReceipt>) -> (TrustSource, TrustLevel) {
    match receipt {
        Some(r) => (r.trust_source, classify(r.trust_source)),
        None => (TrustSource::LocalAuthored, classify(TrustSource::LocalAuthored)),
    }
}
