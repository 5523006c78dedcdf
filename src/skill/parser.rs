//! SKILL.md front-matter parsing
//!
//! # Format
//!
//! ```markdown
//! ---
//! name: code-review
//! description: Review diffs for correctness and style
//! license: MIT
//! allowed-tools: Read Grep
//! ---
//!
//! # Code Review
//! ...
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::SkillMetadata;
use crate::error::{Error, IoContext, Result};

/// `allowed-tools` may be a space-delimited string or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AllowedTools {
    Line(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    #[serde(default)]
    name: Option<serde_yaml::Value>,
    #[serde(default)]
    description: Option<serde_yaml::Value>,
    #[serde(default)]
    license: Option<serde_yaml::Value>,
    #[serde(default)]
    compatibility: Option<serde_yaml::Value>,
    #[serde(default)]
    metadata: Option<serde_yaml::Value>,
    #[serde(default, rename = "allowed-tools", alias = "allowed_tools")]
    allowed_tools: Option<AllowedTools>,
}

/// Parse SKILL.md from disk
pub fn parse_skill_md(path: &Path) -> Result<(SkillMetadata, String)> {
    let content = fs::read_to_string(path).at(path)?;
    parse_frontmatter(&content)
}

/// Split and parse front-matter; returns the metadata and the Markdown body
pub fn parse_frontmatter(content: &str) -> Result<(SkillMetadata, String)> {
    let invalid = |msg: &str| Error::InvalidManifest(msg.to_string());

    if content.trim().is_empty() {
        return Err(invalid("SKILL.md is empty"));
    }

    let lines: Vec<&str> = content.lines().collect();
    if lines.first().map(|l| l.trim()) != Some("---") {
        return Err(invalid("SKILL.md must start with YAML front-matter (---)"));
    }
    let end = lines
        .iter()
        .skip(1)
        .position(|l| l.trim() == "---")
        .map(|i| i + 1)
        .ok_or_else(|| invalid("no closing front-matter delimiter (---) found"))?;

    let yaml = lines[1..end].join("\n");
    let body = lines[end + 1..].join("\n").trim_start_matches('\n').to_string();

    if yaml.trim().is_empty() {
        return Err(invalid("skill name is required"));
    }
    let raw: RawFrontmatter = serde_yaml::from_str(&yaml)
        .map_err(|e| Error::InvalidManifest(format!("invalid YAML front-matter: {}", e)))?;

    let name = scalar(raw.name).unwrap_or_default();
    let description = scalar(raw.description).unwrap_or_default();
    if name.is_empty() {
        return Err(invalid("skill name is required"));
    }
    if description.is_empty() {
        return Err(invalid("skill description is required"));
    }

    let metadata = match raw.metadata {
        None | Some(serde_yaml::Value::Null) => IndexMap::new(),
        Some(serde_yaml::Value::Mapping(map)) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (key, value) in map {
                let key = scalar(Some(key)).ok_or_else(|| invalid("metadata keys must be scalars"))?;
                let value = serde_json::to_value(value)
                    .map_err(|e| Error::InvalidManifest(format!("invalid metadata value for '{}': {}", key, e)))?;
                out.insert(key, value);
            }
            out
        }
        Some(_) => return Err(invalid("metadata must be a mapping")),
    };

    let allowed_tools = match raw.allowed_tools {
        None => Vec::new(),
        Some(AllowedTools::Line(line)) => line.split_whitespace().map(String::from).collect(),
        Some(AllowedTools::List(items)) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    };

    Ok((
        SkillMetadata {
            name,
            description,
            license: scalar(raw.license),
            compatibility: scalar(raw.compatibility),
            metadata,
            allowed_tools,
        },
        body,
    ))
}

/// Render a YAML scalar as trimmed text; mappings and sequences are rejected as absent
fn scalar(value: Option<serde_yaml::Value>) -> Option<String> {
    let text = match value? {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(text.trim().to_string())
}
