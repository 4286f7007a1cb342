use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Pick a free `name_N.ext` next to the taken target.
    Rename,
    /// Leave the file where it is.
    Skip,
    Overwrite,
}

impl From<&str> for ConflictPolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "skip" => ConflictPolicy::Skip,
            "overwrite" => ConflictPolicy::Overwrite,
            _ => ConflictPolicy::Rename,
        }
    }
}

pub fn resolve_conflict(dest: &Path) -> Result<PathBuf> {
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Writes `bytes` at `to` under the policy and returns where they landed, or
/// `None` when skipped. Except under `Overwrite` the file is created
/// exclusively; a taken name moves on to the next free `name_N.ext`.
pub fn write_new(to: &Path, bytes: &[u8], policy: ConflictPolicy) -> Result<Option<PathBuf>> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if policy == ConflictPolicy::Overwrite {
        fs::write(to, bytes).with_context(|| format!("writing {}", to.display()))?;
        return Ok(Some(to.to_path_buf()));
    }
    let mut dest = to.to_path_buf();
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(bytes) {
                    drop(file);
                    let _ = fs::remove_file(&dest);
                    return Err(e).with_context(|| format!("writing {}", dest.display()));
                }
                return Ok(Some(dest));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match policy {
                ConflictPolicy::Skip => return Ok(None),
                _ => dest = resolve_conflict(to)?,
            },
            Err(e) => return Err(e).with_context(|| format!("creating {}", dest.display())),
        }
    }
}

/// Read the original, write it under the new path, delete the original.
/// Returns the final path, or `None` when the conflict policy skipped it.
///
/// Not atomic. When the delete fails the new copy is removed again so the
/// original stays the only copy, and the error is returned.
pub fn move_in_place(from: &Path, to: &Path, policy: ConflictPolicy) -> Result<Option<PathBuf>> {
    let bytes = fs::read(from).with_context(|| format!("reading {}", from.display()))?;
    let Some(dest) = write_new(to, &bytes, policy)? else {
        return Ok(None);
    };
    if let Err(e) = fs::remove_file(from) {
        if let Err(undo) = fs::remove_file(&dest) {
            warn!(path = %dest.display(), error = %undo, "could not remove new copy, both copies remain");
        }
        return Err(e).with_context(|| format!("deleting {}", from.display()));
    }
    Ok(Some(dest))
}

/// Writes a renamed copy into `fallback_dir`, mirroring `rel_target`.
pub fn write_fallback_copy(fallback_dir: &Path, rel_target: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dest = fallback_dir.join(rel_target);
    write_new(&dest, bytes, ConflictPolicy::Rename)?
        .ok_or_else(|| anyhow::anyhow!("no free name for {}", dest.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_creates_parents_and_removes_original() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.pdf");
        fs::write(&from, b"data").unwrap();
        let to = dir.path().join("RELAZIONI/sub/b.pdf");
        assert_eq!(move_in_place(&from, &to, ConflictPolicy::Rename).unwrap(), Some(to.clone()));
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"data");
    }

    #[test]
    fn missing_source_leaves_no_copy() {
        let dir = tempfile::tempdir().unwrap();
        let to = dir.path().join("b.pdf");
        assert!(move_in_place(&dir.path().join("nope.pdf"), &to, ConflictPolicy::Rename).is_err());
        assert!(!to.exists());
    }

    #[test]
    fn conflict_names_skip_taken_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("x.pdf");
        fs::write(&taken, b"1").unwrap();
        fs::write(dir.path().join("x_1.pdf"), b"1").unwrap();

        assert_eq!(resolve_conflict(&taken).unwrap(), dir.path().join("x_2.pdf"));
        assert_eq!(ConflictPolicy::from("SKIP"), ConflictPolicy::Skip);
        assert_eq!(ConflictPolicy::from("whatever"), ConflictPolicy::Rename);
    }

    #[test]
    fn taken_target_is_never_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let to = dir.path().join("RELAZIONI/report.pdf");
        let first = write_new(&to, b"a", ConflictPolicy::Rename).unwrap().unwrap();
        let second = write_new(&to, b"b", ConflictPolicy::Rename).unwrap().unwrap();
        assert_eq!(first, to);
        assert_eq!(second, dir.path().join("RELAZIONI/report_1.pdf"));
        assert_eq!(fs::read(&to).unwrap(), b"a");
        assert_eq!(write_new(&to, b"c", ConflictPolicy::Skip).unwrap(), None);
        assert_eq!(fs::read(&to).unwrap(), b"a");

        let from = dir.path().join("other.pdf");
        fs::write(&from, b"o").unwrap();
        assert_eq!(move_in_place(&from, &to, ConflictPolicy::Skip).unwrap(), None);
        assert!(from.exists());
    }

    #[test]
    fn fallback_copy_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_fallback_copy(dir.path(), "FOTO/p.jpg", b"1").unwrap();
        let second = write_fallback_copy(dir.path(), "FOTO/p.jpg", b"2").unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read(first).unwrap(), b"1");
        assert_eq!(fs::read(second).unwrap(), b"2");
    }
}
