//! Installed skills under the skills root
//!
//! Access is split into three depths so callers only pay for what they use:
//! [`SkillStore::metadata`] reads front-matter, [`SkillStore::load`] adds the
//! body and provenance, [`SkillStore::resources`] lists bundled files.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::parser::{parse_frontmatter, parse_skill_md};
use super::template::generate_skill_template;
use super::validate::{validate_metadata, validate_skill_name};
use super::{InstallReceipt, MANIFEST_FILE, RECEIPT_FILE, RESOURCE_DIRS, Skill, SkillMetadata, SkillResources, SkillSourceKind, trust_of};
use crate::error::{Error, IoContext, Result};
use crate::fsutil::{ensure_within_root, normalize_relative, write_atomic, write_new_atomic};

#[derive(Debug, Clone)]
pub struct SkillStore {
    root: PathBuf,
}

impl SkillStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a skill; the name is validated, existence is not checked
    pub fn skill_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_skill_name(name)?))
    }

    fn existing_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.skill_dir(name)?;
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(Error::not_found("skill", name));
        }
        Ok(dir)
    }

    /// Names of directories holding a SKILL.md, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).at(&self.root)? {
            let entry = entry.at(&self.root)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Staging directories and other hidden entries
            if name.starts_with('.') {
                continue;
            }
            if entry.path().join(MANIFEST_FILE).is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Front-matter only
    pub fn metadata(&self, name: &str) -> Result<SkillMetadata> {
        let dir = self.existing_dir(name)?;
        let (meta, _) = parse_skill_md(&dir.join(MANIFEST_FILE))?;
        validate_metadata(&meta, Some(name))?;
        Ok(meta)
    }

    /// Front-matter, body and provenance
    pub fn load(&self, name: &str) -> Result<Skill> {
        let dir = self.existing_dir(name)?;
        let (metadata, instructions) = parse_skill_md(&dir.join(MANIFEST_FILE))?;
        validate_metadata(&metadata, Some(name))?;

        let receipt = read_receipt(&dir)?;
        let (_, trust) = trust_of(receipt.as_ref());
        let (source, source_ref) = match receipt {
            Some(r) => (r.source, Some(r.reference)),
            None => (SkillSourceKind::Local, None),
        };

        Ok(Skill {
            metadata,
            instructions,
            path: dir,
            source,
            source_ref,
            trust,
        })
    }

    /// Install receipt, if the skill was installed rather than authored here
    pub fn receipt(&self, name: &str) -> Result<Option<InstallReceipt>> {
        read_receipt(&self.existing_dir(name)?)
    }

    /// Files under `scripts/`, `references/` and `assets/`, relative to the skill root
    pub fn resources(&self, name: &str) -> Result<SkillResources> {
        let dir = self.existing_dir(name)?;
        let mut resources = SkillResources::default();

        for sub in RESOURCE_DIRS {
            let base = dir.join(sub);
            if !base.is_dir() {
                continue;
            }
            let mut found = Vec::new();
            for entry in WalkDir::new(&base).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::parse(&base, e))?;
                if entry.file_type().is_dir() {
                    continue;
                }
                ensure_within_root(&dir, entry.path())?;
                let relative = entry.path().strip_prefix(&dir).unwrap_or(entry.path());
                found.push(relative.to_string_lossy().replace('\\', "/"));
            }
            match sub {
                "scripts" => resources.scripts = found,
                "references" => resources.references = found,
                _ => resources.assets = found,
            }
        }
        Ok(resources)
    }

    /// Path of one bundled file, checked against the skill root
    pub fn resource_path(&self, name: &str, relative: &str) -> Result<PathBuf> {
        let dir = self.existing_dir(name)?;
        let path = dir.join(normalize_relative(&dir, relative)?);
        if !path.exists() {
            return Err(Error::not_found("resource", format!("{}/{}", name, relative)));
        }
        ensure_within_root(&dir, &path)?;
        Ok(path)
    }

    /// Read one bundled file as text
    pub fn read_resource(&self, name: &str, relative: &str) -> Result<String> {
        let path = self.resource_path(name, relative)?;
        fs::read_to_string(&path).at(&path)
    }

    /// Replace a skill's SKILL.md after validating it
    pub fn save(&self, name: &str, content: &str) -> Result<PathBuf> {
        let dir = self.skill_dir(name)?;
        let (meta, _) = parse_frontmatter(content)?;
        validate_metadata(&meta, Some(name))?;

        let path = dir.join(MANIFEST_FILE);
        write_atomic(&path, content.as_bytes())?;
        log::info!("Saved skill {}", name);
        Ok(path)
    }

    /// Scaffold a new skill from the template
    pub fn create(&self, name: &str, description: Option<&str>) -> Result<PathBuf> {
        let dir = self.skill_dir(name)?;
        let path = dir.join(MANIFEST_FILE);
        let content = generate_skill_template(name, description);
        write_new_atomic(&path, content.as_bytes(), "skill", name)?;
        log::info!("Created skill {}", name);
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<PathBuf> {
        let dir = self.existing_dir(name)?;
        fs::remove_dir_all(&dir).at(&dir)?;
        log::info!("Deleted skill {}", name);
        Ok(dir)
    }
}

pub(crate) fn read_receipt(dir: &Path) -> Result<Option<InstallReceipt>> {
    let path = dir.join(RECEIPT_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).at(&path)?;
    let receipt = serde_json::from_str(&content).map_err(|e| Error::parse(&path, e))?;
    Ok(Some(receipt))
}
