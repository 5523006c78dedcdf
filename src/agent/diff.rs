//! Field-level comparison of two agent versions

use serde::Serialize;
use std::collections::BTreeSet;

use super::{AgentVersion, Version};

/// One line of the instructions diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum DiffLine {
    Same(String),
    Removed(String),
    Added(String),
}

/// Old and new value of a scalar field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// A parameter that was added, removed or modified
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamChange {
    pub key: String,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

/// Items present on only one side of a list field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ListChange {
    fn between<'a>(old: impl Iterator<Item = &'a str>, new: impl Iterator<Item = &'a str>) -> Self {
        let old: BTreeSet<&str> = old.collect();
        let new: BTreeSet<&str> = new.collect();
        Self {
            added: new.difference(&old).map(|s| s.to_string()).collect(),
            removed: old.difference(&new).map(|s| s.to_string()).collect(),
        }
    }
}

/// Read-only delta between two versions
#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub from: Version,
    pub to: Version,
    pub fingerprint: Change<String>,
    pub instructions: Vec<DiffLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Change<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Change<String>>,
    pub params: Vec<ParamChange>,
    pub tools: ListChange,
    /// Tools present on both sides whose definition changed
    pub tools_modified: Vec<String>,
    pub skills: ListChange,
    pub files: ListChange,
}

impl VersionDiff {
    pub fn between(old: &AgentVersion, new: &AgentVersion) -> Self {
        let (a, b) = (&old.fields, &new.fields);

        let changed = |x: &String, y: &String| {
            (x != y).then(|| Change {
                old: x.clone(),
                new: y.clone(),
            })
        };

        let keys: BTreeSet<&String> = a.params.keys().chain(b.params.keys()).collect();
        let params = keys
            .into_iter()
            .filter_map(|key| {
                let (o, n) = (a.params.get(key), b.params.get(key));
                (o != n).then(|| ParamChange {
                    key: key.clone(),
                    old: o.cloned(),
                    new: n.cloned(),
                })
            })
            .collect();

        let tools_modified = a
            .tools
            .iter()
            .filter_map(|t| {
                let other = b.tools.iter().find(|u| u.name == t.name)?;
                (other != t).then(|| t.name.clone())
            })
            .collect();

        Self {
            from: old.version,
            to: new.version,
            fingerprint: Change {
                old: old.fingerprint.clone(),
                new: new.fingerprint.clone(),
            },
            instructions: line_diff(&a.instructions, &b.instructions),
            model: changed(&a.model, &b.model),
            provider: changed(&a.provider, &b.provider),
            params,
            tools: ListChange::between(
                a.tools.iter().map(|t| t.name.as_str()),
                b.tools.iter().map(|t| t.name.as_str()),
            ),
            tools_modified,
            skills: ListChange::between(a.skills.iter().map(String::as_str), b.skills.iter().map(String::as_str)),
            files: ListChange::between(
                a.files.iter().map(|f| f.path.as_str()),
                b.files.iter().map(|f| f.path.as_str()),
            ),
        }
    }

    pub fn fingerprint_changed(&self) -> bool {
        self.fingerprint.old != self.fingerprint.new
    }

    pub fn instructions_changed(&self) -> bool {
        self.instructions.iter().any(|l| !matches!(l, DiffLine::Same(_)))
    }

    /// True when the versions are content-equivalent
    pub fn is_empty(&self) -> bool {
        !self.fingerprint_changed()
    }

    /// Render the instructions delta as unified-diff hunks
    pub fn unified_instructions(&self, context: usize) -> String {
        unified(&self.instructions, context, &self.from.to_string(), &self.to.to_string())
    }
}

/// Above this many LCS cells the changed middle is shown as one replaced block
const MAX_LCS_CELLS: usize = 4_000_000;

/// Line diff via longest common subsequence.
///
/// The shared prefix and suffix are matched first; only the middle goes
/// through the quadratic table, and only while it fits under [`MAX_LCS_CELLS`].
pub fn line_diff(old: &str, new: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let (mid_a, mid_b) = (&a[prefix..a.len() - suffix], &b[prefix..b.len() - suffix]);

    let mut out = Vec::with_capacity(a.len().max(b.len()));
    out.extend(a[..prefix].iter().map(|l| DiffLine::Same(l.to_string())));
    if (mid_a.len() + 1).saturating_mul(mid_b.len() + 1) > MAX_LCS_CELLS {
        log::debug!("Instructions diff of {}x{} lines shown as a block replace", mid_a.len(), mid_b.len());
        out.extend(mid_a.iter().map(|l| DiffLine::Removed(l.to_string())));
        out.extend(mid_b.iter().map(|l| DiffLine::Added(l.to_string())));
    } else {
        lcs_diff(mid_a, mid_b, &mut out);
    }
    out.extend(a[a.len() - suffix..].iter().map(|l| DiffLine::Same(l.to_string())));
    out
}

fn lcs_diff(a: &[&str], b: &[&str], out: &mut Vec<DiffLine>) {
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push(DiffLine::Same(a[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine::Removed(a[i].to_string()));
            i += 1;
        } else {
            out.push(DiffLine::Added(b[j].to_string()));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|l| DiffLine::Removed(l.to_string())));
    out.extend(b[j..].iter().map(|l| DiffLine::Added(l.to_string())));
}

fn unified(lines: &[DiffLine], context: usize, from: &str, to: &str) -> String {
    let changed: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| !matches!(l, DiffLine::Same(_)))
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return String::new();
    }

    // Group changed lines whose context windows overlap
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &idx in &changed {
        let start = idx.saturating_sub(context);
        let end = (idx + context + 1).min(lines.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }

    let mut out = format!("--- {}\n+++ {}\n", from, to);
    for (start, end) in ranges {
        // Line numbers on each side before the hunk
        let old_before = lines[..start].iter().filter(|l| !matches!(l, DiffLine::Added(_))).count();
        let new_before = lines[..start].iter().filter(|l| !matches!(l, DiffLine::Removed(_))).count();
        let hunk = &lines[start..end];
        let old_len = hunk.iter().filter(|l| !matches!(l, DiffLine::Added(_))).count();
        let new_len = hunk.iter().filter(|l| !matches!(l, DiffLine::Removed(_))).count();

        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_before + 1,
            old_len,
            new_before + 1,
            new_len
        ));
        for line in hunk {
            let (prefix, text) = match line {
                DiffLine::Same(t) => (' ', t),
                DiffLine::Removed(t) => ('-', t),
                DiffLine::Added(t) => ('+', t),
            };
            out.push(prefix);
            out.push_str(text);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::fingerprint::fingerprint;
    use crate::agent::{AgentStatus, ToolDefinition, VersionFields};
    use chrono::Utc;
    use serde_json::json;

    fn version(v: Version, fields: VersionFields) -> AgentVersion {
        AgentVersion {
            version: v,
            fingerprint: fingerprint(&fields),
            parent_version: None,
            status: AgentStatus::Draft,
            created_at: Utc::now(),
            created_by: String::new(),
            change_reason: String::new(),
            fields,
        }
    }

    #[test]
    fn test_line_diff() {
        let diff = line_diff("a\nb\nc", "a\nx\nc\nd");
        assert_eq!(
            diff,
            vec![
                DiffLine::Same("a".into()),
                DiffLine::Removed("b".into()),
                DiffLine::Added("x".into()),
                DiffLine::Same("c".into()),
                DiffLine::Added("d".into()),
            ]
        );
    }

    #[test]
    fn test_large_bodies_stay_bounded() {
        let old: String = (0..20_000).map(|i| format!("old {}\n", i)).collect();
        let new: String = (0..20_000).map(|i| format!("new {}\n", i)).collect();
        let old = format!("header\n{}footer", old);
        let new = format!("header\n{}footer", new);

        let diff = line_diff(&old, &new);
        assert_eq!(diff.len(), 40_002);
        assert_eq!(diff[0], DiffLine::Same("header".into()));
        assert_eq!(diff[1], DiffLine::Removed("old 0".into()));
        assert_eq!(diff[20_001], DiffLine::Added("new 0".into()));
        assert_eq!(diff[40_001], DiffLine::Same("footer".into()));
    }

    #[test]
    fn test_identical_versions_have_empty_diff() {
        let fields = VersionFields::new("Hi", "gpt-4o");
        let a = version(Version::new(1, 0, 0), fields.clone());
        let b = version(Version::new(1, 0, 1), fields);
        let diff = VersionDiff::between(&a, &b);
        assert!(diff.is_empty());
        assert!(!diff.instructions_changed());
        assert!(diff.params.is_empty());
        assert_eq!(diff.unified_instructions(3), "");
    }

    #[test]
    fn test_field_changes() {
        let tool = |desc: &str| ToolDefinition {
            name: "search".to_string(),
            description: desc.to_string(),
            parameters: Default::default(),
        };
        let a = version(
            Version::new(1, 0, 0),
            VersionFields::new("Hi", "gpt-4o")
                .with_param("temperature", json!(0.2))
                .with_param("top_p", json!(1))
                .with_skill("code-review")
                .with_tool(tool("old")),
        );
        let b = version(
            Version::new(1, 1, 0),
            VersionFields::new("Hello", "gpt-4o-mini")
                .with_provider("openai")
                .with_param("temperature", json!(0.5))
                .with_param("seed", json!(7))
                .with_skill("registry:pdf")
                .with_tool(tool("new")),
        );

        let diff = VersionDiff::between(&a, &b);
        assert!(diff.fingerprint_changed());
        assert!(diff.instructions_changed());
        assert_eq!(diff.model.as_ref().unwrap().new, "gpt-4o-mini");
        assert_eq!(diff.provider.as_ref().unwrap().old, "default");

        let keys: Vec<&str> = diff.params.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["seed", "temperature", "top_p"]);
        assert_eq!(diff.skills.added, vec!["registry:pdf"]);
        assert_eq!(diff.skills.removed, vec!["code-review"]);
        assert!(diff.tools.added.is_empty() && diff.tools.removed.is_empty());
        assert_eq!(diff.tools_modified, vec!["search"]);
    }

    #[test]
    fn test_unified_hunks() {
        let old = (1..=10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let new = old.replace("line 5", "line five");
        let a = version(Version::new(1, 0, 0), VersionFields::new(old, "m"));
        let b = version(Version::new(1, 0, 1), VersionFields::new(new, "m"));

        let text = VersionDiff::between(&a, &b).unified_instructions(1);
        assert!(text.starts_with("--- 1.0.0\n+++ 1.0.1\n"));
        assert!(text.contains("@@ -4,3 +4,3 @@\n line 4\n-line 5\n+line five\n line 6\n"));
    }
}
