//! In-memory skill archives (ZIP and gzip-compressed tar)
//!
//! Archives are decoded entirely into memory and every entry is checked
//! before anything touches disk. A single unsafe entry rejects the whole
//! archive.

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, IoContext, Result};
use crate::fsutil::{normalize_relative, resolve_link_target};
use crate::process::{CancelFlag, Deadline};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Sniff the format from magic bytes
    pub fn detect(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) {
            Ok(ArchiveKind::Zip)
        } else if bytes.starts_with(&GZIP_MAGIC) {
            Ok(ArchiveKind::TarGz)
        } else {
            Err(Error::UnsafeEntry {
                entry: "<archive>".to_string(),
                reason: "not a ZIP or gzip-compressed tar archive".to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    Dir,
    File { contents: Vec<u8>, mode: Option<u32> },
    Symlink { target: String },
}

/// One validated archive member, path relative to the archive root
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Decoding limits
#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_unpacked_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_unpacked_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Decode and validate every entry of an archive
pub fn read_entries(bytes: &[u8], limits: &ArchiveLimits) -> Result<Vec<ArchiveEntry>> {
    let entries = match ArchiveKind::detect(bytes)? {
        ArchiveKind::Zip => read_zip(bytes, limits)?,
        ArchiveKind::TarGz => read_tar_gz(bytes, limits)?,
    };
    validate_links(&entries)?;
    Ok(entries)
}

struct Budget {
    limits: ArchiveLimits,
    entries: usize,
    bytes: u64,
}

impl Budget {
    fn new(limits: &ArchiveLimits) -> Self {
        Self {
            limits: *limits,
            entries: 0,
            bytes: 0,
        }
    }

    fn entry(&mut self, name: &str) -> Result<()> {
        self.entries += 1;
        if self.entries > self.limits.max_entries {
            return Err(unsafe_entry(name, "archive has too many entries"));
        }
        Ok(())
    }

    /// Read one member without exceeding the remaining byte budget
    fn read(&mut self, name: &str, reader: impl Read) -> Result<Vec<u8>> {
        let remaining = self.limits.max_unpacked_bytes.saturating_sub(self.bytes);
        let mut buf = Vec::new();
        reader
            .take(remaining + 1)
            .read_to_end(&mut buf)
            .map_err(|e| unsafe_entry(name, &format!("cannot read: {}", e)))?;
        if buf.len() as u64 > remaining {
            return Err(unsafe_entry(name, "archive expands beyond the size limit"));
        }
        self.bytes += buf.len() as u64;
        Ok(buf)
    }
}

fn unsafe_entry(name: &str, reason: &str) -> Error {
    Error::UnsafeEntry {
        entry: name.to_string(),
        reason: reason.to_string(),
    }
}

fn archive_root() -> PathBuf {
    PathBuf::from("<archive>")
}

fn read_zip(bytes: &[u8], limits: &ArchiveLimits) -> Result<Vec<ArchiveEntry>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| unsafe_entry("<archive>", &format!("invalid zip: {}", e)))?;
    let mut budget = Budget::new(limits);
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| unsafe_entry("<archive>", &format!("zip read error: {}", e)))?;
        // Raw name on purpose: enclosed_name() would silently drop bad entries
        let name = file.name().to_string();
        budget.entry(&name)?;
        let path = normalize_relative(&archive_root(), &name)?;
        let mode = file.unix_mode();

        let kind = if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let target = budget.read(&name, &mut file)?;
            EntryKind::Symlink {
                target: String::from_utf8(target).map_err(|_| unsafe_entry(&name, "symlink target is not UTF-8"))?,
            }
        } else if file.is_dir() {
            EntryKind::Dir
        } else if file.is_file() {
            EntryKind::File {
                contents: budget.read(&name, &mut file)?,
                mode: mode.map(|m| m & 0o777),
            }
        } else {
            return Err(unsafe_entry(&name, "unsupported entry type"));
        };

        if path.as_os_str().is_empty() {
            continue;
        }
        entries.push(ArchiveEntry { path, kind });
    }
    Ok(entries)
}

fn read_tar_gz(bytes: &[u8], limits: &ArchiveLimits) -> Result<Vec<ArchiveEntry>> {
    let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(decoder);
    let mut budget = Budget::new(limits);
    let mut entries = Vec::new();

    let members = archive
        .entries()
        .map_err(|e| unsafe_entry("<archive>", &format!("invalid tar: {}", e)))?;
    for member in members {
        let mut member = member.map_err(|e| unsafe_entry("<archive>", &format!("tar read error: {}", e)))?;
        let name = String::from_utf8_lossy(&member.path_bytes()).into_owned();
        let entry_type = member.header().entry_type();

        if entry_type.is_pax_global_extensions() || entry_type.is_pax_local_extensions() {
            continue;
        }
        budget.entry(&name)?;
        let path = normalize_relative(&archive_root(), &name)?;

        let kind = if entry_type.is_dir() {
            EntryKind::Dir
        } else if entry_type.is_symlink() {
            let target = member
                .link_name_bytes()
                .map(|t| String::from_utf8_lossy(&t).into_owned())
                .ok_or_else(|| unsafe_entry(&name, "symlink without target"))?;
            EntryKind::Symlink { target }
        } else if entry_type.is_file() || entry_type == tar::EntryType::Continuous {
            let mode = member.header().mode().ok().map(|m| m & 0o777);
            EntryKind::File {
                contents: budget.read(&name, &mut member)?,
                mode,
            }
        } else if entry_type.is_hard_link() {
            return Err(unsafe_entry(&name, "hard links are not allowed"));
        } else if entry_type.is_character_special() || entry_type.is_block_special() {
            return Err(unsafe_entry(&name, "device files are not allowed"));
        } else if entry_type.is_fifo() {
            return Err(unsafe_entry(&name, "fifos are not allowed"));
        } else {
            return Err(unsafe_entry(&name, "unsupported entry type"));
        };

        if path.as_os_str().is_empty() {
            continue;
        }
        entries.push(ArchiveEntry { path, kind });
    }
    Ok(entries)
}

/// Every symlink must resolve to a location inside the entry set's root,
/// and no entry may sit underneath a symlink.
///
/// Call again after [`narrow`]: a link that stays inside the full archive
/// can escape once the root moves down.
pub fn validate_links(entries: &[ArchiveEntry]) -> Result<()> {
    let links: HashSet<&Path> = entries
        .iter()
        .filter(|e| matches!(e.kind, EntryKind::Symlink { .. }))
        .map(|e| e.path.as_path())
        .collect();

    for entry in entries {
        if let Some(link) = entry.path.ancestors().skip(1).find(|a| links.contains(a)) {
            return Err(unsafe_entry(
                &entry.path.display().to_string(),
                &format!("entry is nested under the symlink {}", link.display()),
            ));
        }
        if let EntryKind::Symlink { target } = &entry.kind {
            let parent = entry.path.parent().unwrap_or(Path::new(""));
            if resolve_link_target(parent, target).is_none() {
                return Err(Error::PathTraversal {
                    root: archive_root(),
                    path: format!("{} -> {}", entry.path.display(), target),
                });
            }
        }
    }
    Ok(())
}

/// The single top-level directory shared by every entry, if any
pub fn common_root(entries: &[ArchiveEntry]) -> Option<String> {
    let mut root: Option<&std::ffi::OsStr> = None;
    for entry in entries {
        let mut components = entry.path.components();
        let Some(Component::Normal(first)) = components.next() else {
            return None;
        };
        // A file sitting at the top level means there is no wrapping directory
        if components.next().is_none() && !matches!(entry.kind, EntryKind::Dir) {
            return None;
        }
        match root {
            None => root = Some(first),
            Some(r) if r == first => {}
            Some(_) => return None,
        }
    }
    root.map(|r| r.to_string_lossy().into_owned())
}

/// Keep only entries under `prefix`, re-rooted at it
pub fn narrow(entries: Vec<ArchiveEntry>, prefix: &Path) -> Vec<ArchiveEntry> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let relative = entry.path.strip_prefix(prefix).ok()?.to_path_buf();
            if relative.as_os_str().is_empty() {
                return None;
            }
            Some(ArchiveEntry {
                path: relative,
                kind: entry.kind,
            })
        })
        .collect()
}

/// Find a member file by its relative path
pub fn find_file<'a>(entries: &'a [ArchiveEntry], path: &Path) -> Option<&'a [u8]> {
    entries.iter().find_map(|e| match &e.kind {
        EntryKind::File { contents, .. } if e.path == path => Some(contents.as_slice()),
        _ => None,
    })
}

/// Write validated entries under `dest`, checking cancellation between entries
pub fn extract(entries: &[ArchiveEntry], dest: &Path, cancel: &CancelFlag, deadline: &Deadline) -> Result<()> {
    fs::create_dir_all(dest).at(dest)?;

    for entry in entries {
        cancel.check("skill install")?;
        deadline.check("skill install")?;

        let out = dest.join(&entry.path);
        if let Some(parent) = entry.path.parent() {
            create_parents(dest, parent)?;
        }
        if fs::symlink_metadata(&out).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(unsafe_entry(&entry.path.display().to_string(), "would write through a symlink"));
        }
        match &entry.kind {
            EntryKind::Dir => fs::create_dir_all(&out).at(&out)?,
            EntryKind::File { contents, mode } => {
                fs::write(&out, contents).at(&out)?;
                set_mode(&out, *mode)?;
            }
            EntryKind::Symlink { target } => make_symlink(target, &out)?,
        }
    }
    Ok(())
}

/// Create each directory between `dest` and `dest/relative` without following links
fn create_parents(dest: &Path, relative: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(unsafe_entry(
                    &relative.display().to_string(),
                    &format!("parent {} is a symlink", current.display()),
                ));
            }
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(unsafe_entry(
                    &relative.display().to_string(),
                    &format!("parent {} is not a directory", current.display()),
                ));
            }
            Err(_) => fs::create_dir(&current).at(&current)?,
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        // Only carry the executable bits over; never setuid or world-writable
        let mode = 0o644 | (mode & 0o111);
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).at(path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).at(link)
}

#[cfg(not(unix))]
fn make_symlink(target: &str, link: &Path) -> Result<()> {
    log::warn!("Skipping symlink {} -> {} on this platform", link.display(), target);
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Build a ZIP from (path, contents) pairs; a `->` in contents makes a symlink
    pub fn zip(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (path, contents) in files {
            if let Some(target) = contents.strip_prefix("-> ") {
                writer.add_symlink(*path, target, options).unwrap();
            } else if path.ends_with('/') {
                writer.add_directory(*path, options).unwrap();
            } else {
                writer.start_file(*path, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// Build a tar.gz from (path, contents) pairs; a `->` in contents makes a symlink
    pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            if let Some(target) = contents.strip_prefix("-> ") {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, path, target).unwrap();
            } else {
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, path, contents.as_bytes()).unwrap();
            }
        }
        builder.into_inner().unwrap().finish().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{tar_gz, zip};
    use super::*;

    const MANIFEST: &str = "---\nname: demo\ndescription: Demo\n---\n";

    #[test]
    fn test_detect() {
        assert_eq!(ArchiveKind::detect(&zip(&[("a", "b")])).unwrap(), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::detect(&tar_gz(&[("a", "b")])).unwrap(), ArchiveKind::TarGz);
        assert!(ArchiveKind::detect(b"plain text").is_err());
    }

    #[test]
    fn test_read_zip_and_strip_root() {
        let bytes = zip(&[("demo/SKILL.md", MANIFEST), ("demo/scripts/run.sh", "echo hi")]);
        let entries = read_entries(&bytes, &ArchiveLimits::default()).unwrap();
        assert_eq!(common_root(&entries).as_deref(), Some("demo"));

        let stripped = narrow(entries, Path::new("demo"));
        assert!(find_file(&stripped, Path::new("SKILL.md")).is_some());
        assert!(find_file(&stripped, Path::new("scripts/run.sh")).is_some());
    }

    #[test]
    fn test_flat_archive_has_no_common_root() {
        let bytes = zip(&[("SKILL.md", MANIFEST), ("notes.md", "x")]);
        let entries = read_entries(&bytes, &ArchiveLimits::default()).unwrap();
        assert_eq!(common_root(&entries), None);
    }

    #[test]
    fn test_zip_traversal_rejected() {
        let bytes = zip(&[("demo/SKILL.md", MANIFEST), ("../evil.sh", "boom")]);
        let err = read_entries(&bytes, &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
    }

    #[test]
    fn test_zip_escaping_symlink_rejected() {
        let bytes = zip(&[("demo/SKILL.md", MANIFEST), ("demo/leak", "-> ../../etc/passwd")]);
        let err = read_entries(&bytes, &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { .. }));
    }

    #[test]
    fn test_tar_symlinks() {
        let ok = tar_gz(&[("demo/SKILL.md", MANIFEST), ("demo/link.md", "-> SKILL.md")]);
        assert!(read_entries(&ok, &ArchiveLimits::default()).is_ok());

        let bad = tar_gz(&[("demo/SKILL.md", MANIFEST), ("demo/leak", "-> /etc/passwd")]);
        assert!(matches!(
            read_entries(&bad, &ArchiveLimits::default()),
            Err(Error::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_narrowed_link_must_stay_inside() {
        let bytes = zip(&[("repo/skills/demo/SKILL.md", MANIFEST), ("repo/skills/demo/up", "-> ../other")]);
        let entries = read_entries(&bytes, &ArchiveLimits::default()).unwrap();
        let narrowed = narrow(entries, Path::new("repo/skills/demo"));
        assert!(validate_links(&narrowed).is_err());
    }

    #[test]
    fn test_entry_under_symlink_rejected() {
        let bytes = zip(&[
            ("demo/SKILL.md", MANIFEST),
            ("demo/x", "-> ."),
            ("demo/x/victim/SKILL.md", MANIFEST),
        ]);
        let err = read_entries(&bytes, &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, Error::UnsafeEntry { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_does_not_follow_links() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("staged");
        let outside = temp.path().join("outside");
        fs::create_dir_all(&dest).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, dest.join("x")).unwrap();

        let entries = vec![ArchiveEntry {
            path: PathBuf::from("x/victim/SKILL.md"),
            kind: EntryKind::File {
                contents: MANIFEST.as_bytes().to_vec(),
                mode: None,
            },
        }];
        let deadline = Deadline::after(std::time::Duration::from_secs(30));
        let err = extract(&entries, &dest, &CancelFlag::new(), &deadline).unwrap_err();
        assert!(matches!(err, Error::UnsafeEntry { .. }));
        assert!(fs::read_dir(&outside).unwrap().next().is_none());
    }

    #[test]
    fn test_size_limit() {
        let big = "x".repeat(4096);
        let bytes = zip(&[("demo/big", big.as_str())]);
        let limits = ArchiveLimits {
            max_entries: 10,
            max_unpacked_bytes: 1024,
        };
        assert!(matches!(read_entries(&bytes, &limits), Err(Error::UnsafeEntry { .. })));
    }

    #[test]
    fn test_extract_writes_files() {
        let temp = tempfile::tempdir().unwrap();
        let bytes = zip(&[("SKILL.md", MANIFEST), ("scripts/run.sh", "echo hi")]);
        let entries = read_entries(&bytes, &ArchiveLimits::default()).unwrap();
        let deadline = Deadline::after(std::time::Duration::from_secs(30));

        extract(&entries, temp.path(), &CancelFlag::new(), &deadline).unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("scripts/run.sh")).unwrap(), "echo hi");
    }

    #[test]
    fn test_extract_honours_cancel() {
        let temp = tempfile::tempdir().unwrap();
        let entries = read_entries(&zip(&[("SKILL.md", MANIFEST)]), &ArchiveLimits::default()).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let deadline = Deadline::after(std::time::Duration::from_secs(30));

        let err = extract(&entries, &temp.path().join("out"), &flag, &deadline).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(!temp.path().join("out/SKILL.md").exists());
    }
}
