//! Filesystem helpers shared by the ledger, audit export and skill store
//!
//! Every durable write goes through a temp file in the destination directory
//! followed by a rename, so readers see either the old file or the new one.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Atomically replace `path` with `contents`
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::parse(path, "path has no parent directory"))?;
    fs::create_dir_all(dir).at(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .at(dir)?;
    tmp.write_all(contents).at(tmp.path())?;
    tmp.as_file().sync_all().at(tmp.path())?;
    tmp.persist(path).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    log::debug!("Wrote {}", path.display());
    Ok(())
}

/// Atomically create `path`; fails if it already exists
pub fn write_new_atomic(path: &Path, contents: &[u8], kind: &'static str, name: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::parse(path, "path has no parent directory"))?;
    fs::create_dir_all(dir).at(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)
        .at(dir)?;
    tmp.write_all(contents).at(tmp.path())?;
    tmp.as_file().sync_all().at(tmp.path())?;
    tmp.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            Error::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source: e.error,
            }
        }
    })?;
    Ok(())
}

/// Lexically check that `relative` stays inside a root once joined.
///
/// Rejects absolute paths, drive prefixes and any `..` segment.
pub fn normalize_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let escape = || Error::PathTraversal {
        root: root.to_path_buf(),
        path: relative.to_string(),
    };

    if relative.contains('\0') || relative.starts_with('/') || relative.starts_with('\\') {
        return Err(escape());
    }

    let mut out = PathBuf::new();
    for segment in relative.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(escape()),
            s if s.len() >= 2 && s.as_bytes()[1] == b':' => return Err(escape()),
            s => out.push(s),
        }
    }
    Ok(out)
}

/// Check that `target` (resolved through symlinks) lives under `root`
pub fn ensure_within_root(root: &Path, target: &Path) -> Result<()> {
    let root_resolved = root.canonicalize().at(root)?;
    let target_resolved = target.canonicalize().at(target)?;
    if !target_resolved.starts_with(&root_resolved) {
        return Err(Error::PathTraversal {
            root: root.to_path_buf(),
            path: target.display().to_string(),
        });
    }
    Ok(())
}

/// Resolve a symlink target lexically against the directory holding the link.
///
/// Returns `None` when the target climbs above `base` or is absolute.
pub fn resolve_link_target(link_parent: &Path, target: &str) -> Option<PathBuf> {
    if target.starts_with('/') || target.starts_with('\\') || target.contains('\0') {
        return None;
    }

    let mut stack: Vec<String> = link_parent
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    for segment in target.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                stack.pop()?;
            }
            s if s.len() >= 2 && s.as_bytes()[1] == b':' => return None,
            s => stack.push(s.to_string()),
        }
    }
    Some(stack.iter().collect())
}
