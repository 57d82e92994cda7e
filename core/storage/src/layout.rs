//! On-disk layout of a store and the rules that decide which files are
//! ever transcoded.
//!
//! ```text
//! <base>/
//!   .encrypted            # zero-byte marker: store opens in encrypted mode
//!   .encryption-verify    # envelope of the verification token
//!   cache/**              # never encrypted
//!   **/*.csv, **/*.json   # plaintext or envelope, detected by content
//! ```

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::atomic::is_transient;
use crate::config::StoreConfig;
use coffer_common::{Error, IoResultExt, Result, StorePath};
use coffer_crypto::MAGIC;

/// Marker whose existence means the store starts in encrypted mode.
pub const MARKER_FILENAME: &str = ".encrypted";

/// Verification token, sealed under the passphrase-derived key.
pub const VERIFY_FILENAME: &str = ".encryption-verify";

/// What the marker and token on disk say about the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Neither marker nor token.
    Plaintext,
    /// Marker and token both present.
    Encrypted,
    /// Token without marker: an enable (or the tail of a disable) did not
    /// finish.
    Interrupted,
    /// Marker without token: the store cannot be unlocked.
    MissingToken,
}

/// Paths and exclusion rules for one base directory.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
    encrypted_extensions: Vec<String>,
    excluded_dirs: Vec<String>,
}

impl Layout {
    pub fn new(base: impl AsRef<Path>, config: &StoreConfig) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            encrypted_extensions: config.encrypted_extensions.clone(),
            excluded_dirs: config.excluded_dirs.clone(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn marker_path(&self) -> PathBuf {
        self.base.join(MARKER_FILENAME)
    }

    pub fn verify_path(&self) -> PathBuf {
        self.base.join(VERIFY_FILENAME)
    }

    /// Read the mode off the marker and token.
    pub fn mode(&self) -> StoreMode {
        match (self.marker_path().exists(), self.verify_path().exists()) {
            (true, true) => StoreMode::Encrypted,
            (true, false) => StoreMode::MissingToken,
            (false, true) => StoreMode::Interrupted,
            (false, false) => StoreMode::Plaintext,
        }
    }

    /// Validate a caller path and map it onto the filesystem.
    pub fn resolve(&self, path: &Path) -> Result<(StorePath, PathBuf)> {
        let store_path = StorePath::from_path(&self.base, path)?;
        let fs_path = store_path.to_fs_path(&self.base);
        Ok((store_path, fs_path))
    }

    /// Marker, token and transient files: owned by the store itself.
    pub fn is_reserved(&self, path: &StorePath) -> bool {
        let Some(name) = path.name() else {
            return false;
        };
        let at_root = path.components().len() == 1;
        (at_root && (name == MARKER_FILENAME || name == VERIFY_FILENAME)) || is_transient(name)
    }

    /// The exclusion rule: reserved files and anything below an excluded
    /// directory are never encrypted.
    pub fn is_excluded(&self, path: &StorePath) -> bool {
        self.is_reserved(path)
            || self
                .excluded_dirs
                .iter()
                .any(|dir| path.has_ancestor_named(dir))
    }

    /// Whether enabling encryption should pick this file up.
    pub fn is_migratable(&self, path: &StorePath) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        match path.extension() {
            Some(ext) => self
                .encrypted_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// Every regular file under the base directory, in a stable order.
    ///
    /// Symlinks are not followed. Transient files and files whose path is
    /// not valid UTF-8 are skipped; the latter can never be addressed
    /// through the store.
    pub fn walk_files(&self) -> Result<Vec<StorePath>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.base).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.base).to_path_buf();
                Error::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_str().is_some_and(is_transient) {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.base).map_err(|_| {
                Error::InvalidInput(format!(
                    "Walked outside the store: {}",
                    entry.path().display()
                ))
            })?;
            if relative.to_str().is_none() {
                tracing::warn!("Skipping file with a non-UTF-8 name: {}", relative.display());
                continue;
            }
            files.push(StorePath::from_path(&self.base, relative)?);
        }
        Ok(files)
    }

    /// Remove temp and staged files left behind by an interrupted write.
    ///
    /// Best-effort: failures are logged and skipped. Returns how many files
    /// were removed.
    pub fn sweep_transient(&self) -> usize {
        let mut removed = 0;
        for entry in WalkDir::new(&self.base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file()
                || !entry.file_name().to_str().is_some_and(is_transient)
            {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    "Could not remove leftover file {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        removed
    }
}

/// Sniff the first bytes of a file for the envelope magic.
pub fn sniff_envelope(path: &Path) -> Result<bool> {
    let mut prefix = [0u8; MAGIC.len()];
    let mut file = File::open(path).at_path(path)?;
    let mut filled = 0;
    while filled < prefix.len() {
        let n = file.read(&mut prefix[filled..]).at_path(path)?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(coffer_crypto::is_envelope(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout(base: &Path) -> Layout {
        Layout::new(base, &StoreConfig::default())
    }

    fn p(s: &str) -> StorePath {
        StorePath::parse(s).unwrap()
    }

    #[test]
    fn test_exclusion_rule() {
        let layout = layout(Path::new("/data"));

        assert!(layout.is_excluded(&p(".encrypted")));
        assert!(layout.is_excluded(&p(".encryption-verify")));
        assert!(layout.is_excluded(&p("cache/rates.json")));
        assert!(layout.is_excluded(&p("imports/cache/prices.csv")));
        assert!(layout.is_excluded(&p(".a.csv.123.coffer-stage")));

        assert!(!layout.is_excluded(&p("a.csv")));
        assert!(!layout.is_excluded(&p("nested/.encrypted")));
    }

    #[test]
    fn test_migratable_by_extension() {
        let layout = layout(Path::new("/data"));

        assert!(layout.is_migratable(&p("a.csv")));
        assert!(layout.is_migratable(&p("settings/app.JSON")));
        assert!(!layout.is_migratable(&p("notes.txt")));
        assert!(!layout.is_migratable(&p("cache/rates.json")));
        assert!(!layout.is_migratable(&p("README")));
    }

    #[test]
    fn test_walk_files_sorted_and_skips_transient() {
        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::create_dir_all(base.join("cache")).unwrap();
        fs::write(base.join("b.csv"), b"b").unwrap();
        fs::write(base.join("a.csv"), b"a").unwrap();
        fs::write(base.join("cache/x.json"), b"x").unwrap();
        fs::write(base.join(".a.csv.1.coffer-tmp"), b"partial").unwrap();

        let files: Vec<String> = layout(base)
            .walk_files()
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(files, ["a.csv", "b.csv", "cache/x.json"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_walk_files_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::create_dir_all(base.join("cache")).unwrap();
        fs::write(base.join("a.csv"), b"a").unwrap();
        fs::write(
            base.join("cache").join(OsStr::from_bytes(b"img\xff.png")),
            b"png",
        )
        .unwrap();

        let files: Vec<String> = layout(base)
            .walk_files()
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(files, ["a.csv"]);
    }

    #[test]
    fn test_sweep_transient() {
        let temp = TempDir::new().unwrap();
        let base = temp.path();
        fs::create_dir_all(base.join("sub")).unwrap();
        fs::write(base.join("a.csv"), b"a").unwrap();
        fs::write(base.join(".a.csv.1.coffer-tmp"), b"partial").unwrap();
        fs::write(base.join("sub/.b.json.2.coffer-stage"), b"staged").unwrap();

        assert_eq!(layout(base).sweep_transient(), 2);
        assert!(base.join("a.csv").exists());
        assert!(!base.join("sub/.b.json.2.coffer-stage").exists());
    }

    #[test]
    fn test_mode_from_marker_and_token() {
        let temp = TempDir::new().unwrap();
        let layout = layout(temp.path());
        assert_eq!(layout.mode(), StoreMode::Plaintext);

        fs::write(layout.verify_path(), b"token").unwrap();
        assert_eq!(layout.mode(), StoreMode::Interrupted);

        fs::write(layout.marker_path(), b"").unwrap();
        assert_eq!(layout.mode(), StoreMode::Encrypted);

        fs::remove_file(layout.verify_path()).unwrap();
        assert_eq!(layout.mode(), StoreMode::MissingToken);
    }

    #[test]
    fn test_sniff_envelope() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("a.csv");
        let short = temp.path().join("b.csv");
        let sealed = temp.path().join("c.csv");
        fs::write(&plain, b"Date,Amount\n2024-01-01,100\n").unwrap();
        fs::write(&short, b"x").unwrap();
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 80]);
        fs::write(&sealed, &bytes).unwrap();

        assert!(!sniff_envelope(&plain).unwrap());
        assert!(!sniff_envelope(&short).unwrap());
        assert!(sniff_envelope(&sealed).unwrap());
    }
}
