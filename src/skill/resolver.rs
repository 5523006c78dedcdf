//! Skill reference grammar
//!
//! ```text
//! code-review                          local skill under the skills root
//! registry:code-review                 <registry>/code-review.zip
//! vcs:owner/repo[/path][@ref]          <vcs>/owner/repo/archive/<ref>.zip, narrowed to path
//! https://… | http://… | file://…      direct download, used verbatim
//! ```
//!
//! Resolution is pure: no network or filesystem access.

use lazy_regex::regex_is_match;
use serde::Serialize;

use super::SkillSourceKind;
use super::validate::validate_skill_name;
use crate::error::{Error, Result};
use crate::trust::TrustSource;

pub const DEFAULT_REGISTRY_BASE: &str = "https://skills.steward.dev/registry";
pub const DEFAULT_VCS_BASE: &str = "https://github.com";

/// Base URLs the grammar expands against
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub registry_base: String,
    pub vcs_base: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            registry_base: DEFAULT_REGISTRY_BASE.to_string(),
            vcs_base: DEFAULT_VCS_BASE.to_string(),
        }
    }
}

/// Where and how to obtain a skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchDescriptor {
    /// The reference as given
    pub reference: String,
    pub source: SkillSourceKind,
    pub trust_source: TrustSource,
    /// Download location; `None` for a skill already in the skills root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Directory inside the archive holding the skill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
    /// Name the manifest must carry, when the reference implies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_name: Option<String>,
}

impl FetchDescriptor {
    pub fn is_local(&self) -> bool {
        self.url.is_none()
    }
}

/// Resolve a reference; `git_ref` supplies the ref for `vcs:` references without `@ref`
pub fn resolve(reference: &str, config: &ResolverConfig, git_ref: Option<&str>) -> Result<FetchDescriptor> {
    let reference = reference.trim();
    let unresolved = |reason: &str| Error::UnresolvedReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    if reference.is_empty() {
        return Err(unresolved("empty reference"));
    }

    if let Some((scheme, _)) = reference.split_once("://") {
        let trust_source = match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => TrustSource::Url,
            "file" => TrustSource::LocalInstalled,
            _ => return Err(unresolved(&format!("unsupported scheme '{}'", scheme))),
        };
        return Ok(FetchDescriptor {
            reference: reference.to_string(),
            source: SkillSourceKind::Url,
            trust_source,
            url: Some(reference.to_string()),
            subpath: None,
            expected_name: None,
        });
    }

    if let Some(name) = reference.strip_prefix("registry:") {
        let name = validate_skill_name(name).map_err(|e| unresolved(&e.to_string()))?;
        return Ok(FetchDescriptor {
            reference: reference.to_string(),
            source: SkillSourceKind::Registry,
            trust_source: TrustSource::Registry,
            url: Some(format!("{}/{}.zip", config.registry_base.trim_end_matches('/'), name)),
            subpath: None,
            expected_name: Some(name.to_string()),
        });
    }

    if let Some(rest) = reference.strip_prefix("vcs:") {
        return resolve_vcs(reference, rest, config, git_ref);
    }

    if reference.contains(':') {
        return Err(unresolved("unknown prefix"));
    }

    let name = validate_skill_name(reference).map_err(|e| unresolved(&e.to_string()))?;
    Ok(FetchDescriptor {
        reference: reference.to_string(),
        source: SkillSourceKind::Local,
        trust_source: TrustSource::LocalAuthored,
        url: None,
        subpath: None,
        expected_name: Some(name.to_string()),
    })
}

fn resolve_vcs(reference: &str, rest: &str, config: &ResolverConfig, git_ref: Option<&str>) -> Result<FetchDescriptor> {
    let unresolved = |reason: String| Error::UnresolvedReference {
        reference: reference.to_string(),
        reason,
    };

    let (path, inline_ref) = match rest.rsplit_once('@') {
        Some((path, r)) => (path, Some(r)),
        None => (rest, None),
    };
    let git_ref = inline_ref
        .or(git_ref)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| unresolved("an explicit ref is required (vcs:owner/repo@ref or --ref)".to_string()))?;
    if git_ref.contains("..") || !regex_is_match!(r"^[A-Za-z0-9._/-]+$", git_ref) {
        return Err(unresolved(format!("invalid ref '{}'", git_ref)));
    }

    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    if parts.len() < 2 {
        return Err(unresolved("expected vcs:owner/repo[/path]".to_string()));
    }
    for part in &parts {
        if part.is_empty() || *part == "." || *part == ".." || !regex_is_match!(r"^[A-Za-z0-9._-]+$", part) {
            return Err(unresolved(format!("invalid path segment '{}'", part)));
        }
    }

    let (owner, repo) = (parts[0], parts[1]);
    let subpath = (parts.len() > 2).then(|| parts[2..].join("/"));
    let expected_name = parts.last().map(|s| s.to_string());

    Ok(FetchDescriptor {
        reference: reference.to_string(),
        source: SkillSourceKind::Vcs,
        trust_source: TrustSource::Vcs,
        url: Some(format!(
            "{}/{}/{}/archive/{}.zip",
            config.vcs_base.trim_end_matches('/'),
            owner,
            repo,
            git_ref
        )),
        subpath,
        expected_name,
    })
}
