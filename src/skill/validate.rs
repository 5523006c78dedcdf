//! Skill name and manifest validation

use lazy_regex::regex_is_match;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::parser::parse_skill_md;
use super::{MANIFEST_FILE, SkillMetadata};
use crate::error::{Error, IoContext, Result};
use crate::fsutil::{ensure_within_root, normalize_relative};

pub const MAX_DESCRIPTION_CHARS: usize = 1024;
pub const MAX_COMPATIBILITY_CHARS: usize = 500;

/// Check a skill name against the allowed pattern; returns it trimmed
pub fn validate_skill_name(name: &str) -> Result<&str> {
    let invalid = |reason: &str| Error::InvalidName {
        kind: "skill",
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed.contains("..") {
        return Err(invalid("cannot contain path separators or '..'"));
    }
    if !regex_is_match!(r"^[a-z0-9][a-z0-9-]{0,62}[a-z0-9]?$", trimmed) {
        return Err(invalid("must be 1-64 chars of lowercase letters, digits and hyphens"));
    }
    Ok(trimmed)
}

/// Validate parsed front-matter, optionally against the directory it lives in
pub fn validate_metadata(meta: &SkillMetadata, expected_name: Option<&str>) -> Result<()> {
    validate_skill_name(&meta.name)?;

    if let Some(expected) = expected_name {
        if meta.name != expected {
            return Err(Error::ManifestNameMismatch {
                expected: expected.to_string(),
                found: meta.name.clone(),
            });
        }
    }

    let desc_len = meta.description.chars().count();
    if desc_len == 0 {
        return Err(Error::InvalidManifest("description cannot be empty".to_string()));
    }
    if desc_len > MAX_DESCRIPTION_CHARS {
        return Err(Error::InvalidManifest(format!(
            "description exceeds {} characters",
            MAX_DESCRIPTION_CHARS
        )));
    }
    if meta
        .compatibility
        .as_ref()
        .is_some_and(|c| c.chars().count() > MAX_COMPATIBILITY_CHARS)
    {
        return Err(Error::InvalidManifest(format!(
            "compatibility exceeds {} characters",
            MAX_COMPATIBILITY_CHARS
        )));
    }
    Ok(())
}

/// Validate a skill directory in place.
///
/// Parses the manifest, checks that its name matches the directory, and that
/// no file or symlink inside escapes the skill root.
pub fn validate_skill_dir(dir: &Path) -> Result<(SkillMetadata, String)> {
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::not_found("skill", dir.display().to_string()))?;
    if !dir.is_dir() {
        return Err(Error::not_found("skill", dir_name));
    }

    let manifest = dir.join(MANIFEST_FILE);
    if !manifest.is_file() {
        return Err(Error::InvalidManifest(format!("{} missing for skill '{}'", MANIFEST_FILE, dir_name)));
    }

    let (meta, body) = parse_skill_md(&manifest)?;
    validate_metadata(&meta, Some(dir_name))?;
    check_tree(dir)?;
    Ok((meta, body))
}

/// Every entry under `root` must resolve inside it
fn check_tree(root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::parse(root, e))?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        normalize_relative(root, &relative.to_string_lossy())?;

        if entry.path_is_symlink() {
            let meta = fs::symlink_metadata(path).at(path)?;
            if meta.file_type().is_symlink() {
                ensure_within_root(root, path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    fn meta(name: &str, description: &str) -> SkillMetadata {
        SkillMetadata {
            name: name.to_string(),
            description: description.to_string(),
            license: None,
            compatibility: None,
            metadata: IndexMap::new(),
            allowed_tools: Vec::new(),
        }
    }

    #[test]
    fn test_skill_names() {
        for good in ["a", "code-review", "pdf2", "x1-y2"] {
            assert!(validate_skill_name(good).is_ok(), "rejected {good}");
        }
        for bad in ["", "../evil", "Code", "-lead", "a/b", "has space", "under_score"] {
            assert!(validate_skill_name(bad).is_err(), "accepted {bad}");
        }
        assert!(validate_skill_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_metadata_limits() {
        assert!(validate_metadata(&meta("pdf", "Handle PDFs"), Some("pdf")).is_ok());
        assert!(validate_metadata(&meta("pdf", ""), None).is_err());
        assert!(validate_metadata(&meta("pdf", &"d".repeat(1025)), None).is_err());

        let mut long_compat = meta("pdf", "ok");
        long_compat.compatibility = Some("c".repeat(501));
        assert!(validate_metadata(&long_compat, None).is_err());
    }

    #[test]
    fn test_name_mismatch() {
        let err = validate_metadata(&meta("code-review", "Reviews"), Some("other")).unwrap_err();
        assert!(matches!(err, Error::ManifestNameMismatch { .. }));
    }

    #[test]
    fn test_validate_dir() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("pdf");
        fs::create_dir_all(dir.join("scripts")).unwrap();
        fs::write(dir.join(MANIFEST_FILE), "---\nname: pdf\ndescription: PDFs\n---\nUse it.").unwrap();
        fs::write(dir.join("scripts/run.sh"), "echo hi").unwrap();

        let (meta, body) = validate_skill_dir(&dir).unwrap();
        assert_eq!(meta.name, "pdf");
        assert_eq!(body, "Use it.");
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_dir_rejects_escaping_symlink() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("pdf");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), "---\nname: pdf\ndescription: PDFs\n---\n").unwrap();
        fs::write(temp.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("secret"), dir.join("leak")).unwrap();

        let err = validate_skill_dir(&dir).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
    }
}
