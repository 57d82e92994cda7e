//! Write-then-rename primitives.
//!
//! Every write lands in a uniquely named sibling first and is renamed over
//! the target only once it is complete and synced, so a reader sees either
//! the old content or the new content, never a prefix of it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use coffer_common::{Error, IoResultExt, Result};

/// Suffix of the temp file behind an in-flight [`atomic_write`].
pub const TEMP_SUFFIX: &str = ".coffer-tmp";

/// Suffix of files staged by a migration and not yet committed.
pub const STAGE_SUFFIX: &str = ".coffer-stage";

/// Whether a file name belongs to a temp or staged file.
pub fn is_transient(name: &str) -> bool {
    name.starts_with('.') && (name.ends_with(TEMP_SUFFIX) || name.ends_with(STAGE_SUFFIX))
}

/// `dir/.<name>.<uuid><suffix>` next to `path`.
pub fn sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?;
    Ok(path.with_file_name(format!(
        ".{}.{}{}",
        name,
        uuid::Uuid::new_v4().simple(),
        suffix
    )))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).at_path(path)?;
    file.write_all(bytes).at_path(path)?;
    file.sync_all().at_path(path)?;
    Ok(())
}

/// Atomically replace `path` with `bytes`, creating parent directories.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }

    let temp_path = sibling(path, TEMP_SUFFIX)?;
    if let Err(e) = write_synced(&temp_path, bytes) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::io(path, e));
    }
    Ok(())
}

/// Write `bytes` to a staged sibling of `target` and return its path.
///
/// The target itself is not touched until [`commit`].
pub fn stage(target: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let stage_path = sibling(target, STAGE_SUFFIX)?;
    if let Err(e) = write_synced(&stage_path, bytes) {
        let _ = fs::remove_file(&stage_path);
        return Err(e);
    }
    Ok(stage_path)
}

/// Rename a staged file over its target.
pub fn commit(stage_path: &Path, target: &Path) -> Result<()> {
    fs::rename(stage_path, target).at_path(target)
}

/// Delete a staged file, ignoring failures.
pub fn discard(stage_path: &Path) {
    if let Err(e) = fs::remove_file(stage_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not discard staged file {}: {}", stage_path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("imports/2024/a.csv");

        atomic_write(&path, b"Date,Amount\n").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"Date,Amount\n");
        assert_eq!(entries(path.parent().unwrap()), ["a.csv"]);
    }

    #[test]
    fn test_atomic_write_replaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");

        atomic_write(&path, b"{\"a\":1}").unwrap();
        atomic_write(&path, b"{\"a\":2}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":2}");
        assert_eq!(entries(temp.path()), ["settings.json"]);
    }

    #[test]
    fn test_stage_leaves_target_until_commit() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("a.csv");
        fs::write(&target, b"old").unwrap();

        let staged = stage(&target, b"new").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert!(is_transient(staged.file_name().unwrap().to_str().unwrap()));

        commit(&staged, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn test_discard_removes_stage() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("a.csv");

        let staged = stage(&target, b"new").unwrap();
        discard(&staged);

        assert!(entries(temp.path()).is_empty());
        // Second discard of a missing file is silent.
        discard(&staged);
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(".a.csv.0f3c.coffer-tmp"));
        assert!(is_transient(".a.csv.0f3c.coffer-stage"));
        assert!(!is_transient("a.coffer-tmp"));
        assert!(!is_transient(".encrypted"));
    }
}
