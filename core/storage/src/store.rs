//! The storage instance.
//!
//! A [`Store`] owns one base directory. Its mutable state (whether
//! encryption is enabled, and the key material once unlocked) sits behind a
//! single reader/writer lock: per-file operations share it, mode
//! transitions hold it exclusively for their whole run, so no reader can
//! observe a file mid-transcoding and no writer races a key swap.

use parking_lot::RwLock;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::atomic;
use crate::config::StoreConfig;
use crate::layout::{Layout, StoreMode};
use crate::metadata::Metadata;
use crate::migration;
use crate::token;
use coffer_common::{Error, IoResultExt, Result, StorePath};
use coffer_crypto::{is_envelope, KeyMaterial};

/// Mutable part of a store.
///
/// `keys` is only ever `Some` while `encrypted` is true.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) encrypted: bool,
    pub(crate) keys: Option<KeyMaterial>,
}

/// Transparent, optionally-encrypted view of a data directory.
///
/// Share one instance per directory across threads with `Arc<Store>`;
/// every method takes `&self`.
#[derive(Debug)]
pub struct Store {
    layout: Layout,
    config: StoreConfig,
    state: RwLock<StoreState>,
}

impl Store {
    /// Open the store at `base` with default configuration.
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(base, StoreConfig::default())
    }

    /// Open the store at `base`.
    ///
    /// # Postconditions
    /// - Base directory exists
    /// - Encrypted mode iff the marker file exists; no key material loaded
    /// - Temp and staged files from an interrupted write are removed
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Base directory cannot be created
    pub fn open_with_config(base: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let base = base.as_ref();
        fs::create_dir_all(base).at_path(base)?;

        let layout = Layout::new(base, &config);
        let swept = layout.sweep_transient();
        if swept > 0 {
            warn!("Removed {} leftover temp files under {}", swept, base.display());
        }

        let mode = layout.mode();
        match mode {
            StoreMode::Interrupted => warn!(
                "Store at {} has a verification token but no marker; an encryption change was interrupted, run recovery",
                base.display()
            ),
            StoreMode::MissingToken => warn!(
                "Store at {} is marked encrypted but its verification token is missing",
                base.display()
            ),
            _ => debug!("Opened store at {} ({:?})", base.display(), mode),
        }

        let encrypted = layout.marker_path().exists();
        Ok(Self {
            layout,
            config,
            state: RwLock::new(StoreState {
                encrypted,
                keys: None,
            }),
        })
    }

    /// Base directory of this store.
    pub fn base_dir(&self) -> &Path {
        self.layout.base()
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether the store is in encrypted mode.
    pub fn is_encrypted(&self) -> bool {
        self.state.read().encrypted
    }

    /// True when encrypted files can be read: either the store is not
    /// encrypted, or key material is loaded.
    pub fn is_unlocked(&self) -> bool {
        let state = self.state.read();
        !state.encrypted || state.keys.is_some()
    }

    /// Mode as recorded on disk by the marker and token.
    pub fn mode(&self) -> StoreMode {
        let _state = self.state.read();
        self.layout.mode()
    }

    /// Load key material for `passphrase`.
    ///
    /// No-op when the store is not encrypted.
    ///
    /// # Errors
    /// - `Authentication` if the passphrase does not open the token; state
    ///   is left untouched
    /// - `Validation` if the token is missing
    pub fn unlock(&self, passphrase: &str) -> Result<()> {
        let mut state = self.state.write();
        if !state.encrypted {
            return Ok(());
        }

        let sealed = token::load(&self.layout)?;
        let keys = token::verify(passphrase, &sealed)?;
        state.keys = Some(keys);
        info!("Store at {} unlocked", self.layout.base().display());
        Ok(())
    }

    /// Drop key material from memory. Idempotent.
    pub fn lock(&self) {
        let mut state = self.state.write();
        if state.keys.take().is_some() {
            info!("Store at {} locked", self.layout.base().display());
        }
    }

    /// Read a file, decrypting it if it is an envelope.
    ///
    /// # Errors
    /// - `Locked` if the file is an envelope and no key material is loaded
    /// - `Io` if the file cannot be read
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let state = self.state.read();
        let (store_path, fs_path) = self.layout.resolve(path.as_ref())?;

        let bytes = fs::read(&fs_path).at_path(&fs_path)?;
        if !is_envelope(&bytes) {
            return Ok(bytes);
        }

        match &state.keys {
            Some(keys) => keys.open(&bytes),
            None => Err(Error::Locked(store_path.to_string())),
        }
    }

    /// Write a file atomically, encrypting it when the store is encrypted
    /// and unlocked.
    ///
    /// Excluded paths (e.g. anything under `cache/`) are always written as
    /// given. An encrypted store that is locked writes plaintext.
    ///
    /// # Errors
    /// - `InvalidInput` for the base directory itself or the store's own
    ///   marker, token and temp files
    pub fn write_file(&self, path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
        let state = self.state.read();
        let (store_path, fs_path) = self.writable(path.as_ref())?;

        if self.layout.is_excluded(&store_path) || !state.encrypted {
            return atomic::atomic_write(&fs_path, data);
        }

        match &state.keys {
            Some(keys) => {
                let sealed = keys.seal(data)?;
                atomic::atomic_write(&fs_path, &sealed)
            }
            None => {
                // TODO: decide with product whether locked writes should fail instead.
                warn!("Store is locked; writing {} as plaintext", store_path);
                atomic::atomic_write(&fs_path, data)
            }
        }
    }

    /// Write raw bytes atomically, bypassing encryption.
    pub fn atomic_write(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
        let _state = self.state.read();
        let (_, fs_path) = self.writable(path.as_ref())?;
        atomic::atomic_write(&fs_path, bytes)
    }

    fn writable(&self, path: &Path) -> Result<(StorePath, std::path::PathBuf)> {
        let (store_path, fs_path) = self.layout.resolve(path)?;
        if store_path.is_root() || self.layout.is_reserved(&store_path) {
            return Err(Error::InvalidInput(format!(
                "Path is reserved by the store: {}",
                store_path
            )));
        }
        Ok((store_path, fs_path))
    }

    /// Metadata of a file or directory.
    pub fn stat(&self, path: impl AsRef<Path>) -> Result<Metadata> {
        let _state = self.state.read();
        let (store_path, fs_path) = self.layout.resolve(path.as_ref())?;
        let fs_meta = fs::metadata(&fs_path).at_path(&fs_path)?;
        Ok(Metadata::from_fs(
            store_path.name().unwrap_or("."),
            &fs_meta,
        ))
    }

    /// Whether a file or directory exists.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool> {
        let _state = self.state.read();
        let (_, fs_path) = self.layout.resolve(path.as_ref())?;
        Ok(fs_path.exists())
    }

    /// Delete a file.
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        let _state = self.state.read();
        let (_, fs_path) = self.writable(path.as_ref())?;
        fs::remove_file(&fs_path).at_path(&fs_path)
    }

    /// List a directory, sorted by name.
    ///
    /// The store's own marker, token and temp files are not listed.
    pub fn list_dir(&self, path: impl AsRef<Path>) -> Result<Vec<Metadata>> {
        let _state = self.state.read();
        let (store_path, fs_path) = self.layout.resolve(path.as_ref())?;

        let mut results = Vec::new();
        for entry in fs::read_dir(&fs_path).at_path(&fs_path)? {
            let entry = entry.at_path(&fs_path)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.layout.is_reserved(&store_path.join(&name)?) {
                continue;
            }
            let fs_meta = entry.metadata().at_path(entry.path())?;
            results.push(Metadata::from_fs(name, &fs_meta));
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    /// Encrypt every eligible file and switch to encrypted mode.
    ///
    /// On success the store is encrypted and unlocked. On failure no file
    /// is left encrypted and no token or marker remains.
    ///
    /// # Errors
    /// - `Validation` if already encrypted, the passphrase is too short, or
    ///   an interrupted migration needs recovery first
    /// - `PartialMigration` naming the file that failed
    pub fn enable_encryption(&self, passphrase: &str) -> Result<()> {
        let mut state = self.state.write();
        migration::enable(&self.layout, &self.config, &mut state, passphrase)
    }

    /// Decrypt every envelope and switch to plaintext mode.
    ///
    /// # Errors
    /// - `Validation` if not encrypted
    /// - `Authentication` if the passphrase is wrong
    /// - `PartialMigration` naming the file that failed
    /// - `Io` if the token cannot be removed; the store has already switched
    ///   to plaintext and [`Store::recover`] removes the leftover token
    pub fn disable_encryption(&self, passphrase: &str) -> Result<()> {
        let mut state = self.state.write();
        migration::disable(&self.layout, &mut state, passphrase)
    }

    /// Re-encrypt every envelope and the token under a new passphrase.
    ///
    /// On success the store is unlocked with the new key material.
    pub fn change_passphrase(&self, old: &str, new: &str) -> Result<()> {
        let mut state = self.state.write();
        migration::change_passphrase(&self.layout, &self.config, &mut state, old, new)
    }

    /// Roll an interrupted enable back to plaintext mode.
    ///
    /// # Errors
    /// - `Validation` if the store is not in the interrupted state
    /// - `Authentication` if the passphrase is wrong
    pub fn recover(&self, passphrase: &str) -> Result<()> {
        let mut state = self.state.write();
        migration::recover(&self.layout, &mut state, passphrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_crypto::KdfParams;
    use tempfile::TempDir;

    fn test_config() -> StoreConfig {
        StoreConfig {
            kdf: KdfParams {
                memory_cost: 1024,
                time_cost: 1,
                parallelism: 1,
            },
            ..StoreConfig::default()
        }
    }

    fn open(temp: &TempDir) -> Store {
        Store::open_with_config(temp.path(), test_config()).unwrap()
    }

    #[test]
    fn test_open_plaintext() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        assert!(!store.is_encrypted());
        assert!(store.is_unlocked());
        assert_eq!(store.mode(), StoreMode::Plaintext);
    }

    #[test]
    fn test_open_creates_base_dir() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("nested/data");

        Store::open_with_config(&base, test_config()).unwrap();
        assert!(base.is_dir());
    }

    #[test]
    fn test_open_with_marker_is_encrypted_and_locked() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".encrypted"), b"").unwrap();

        let store = open(&temp);
        assert!(store.is_encrypted());
        assert!(!store.is_unlocked());
    }

    #[test]
    fn test_plaintext_read_write() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        store.write_file("imports/a.csv", b"Date,Amount\n").unwrap();
        assert_eq!(store.read_file("imports/a.csv").unwrap(), b"Date,Amount\n");
        assert_eq!(
            fs::read(temp.path().join("imports/a.csv")).unwrap(),
            b"Date,Amount\n"
        );
    }

    #[test]
    fn test_absolute_path_inside_base() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let absolute = temp.path().join("settings.json");

        store.write_file(&absolute, b"{}").unwrap();
        assert_eq!(store.read_file("settings.json").unwrap(), b"{}");
    }

    #[test]
    fn test_path_escape_rejected() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        assert!(matches!(
            store.write_file("../outside.csv", b"x"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.read_file("/etc/hostname"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_reserved_paths_rejected() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        assert!(store.write_file(".encrypted", b"").is_err());
        assert!(store.write_file(".encryption-verify", b"").is_err());
        assert!(store.remove(".encryption-verify").is_err());
        assert!(store.write_file("", b"x").is_err());
    }

    #[test]
    fn test_unlock_noop_when_plaintext() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        store.unlock("anything").unwrap();
        assert!(!store.is_encrypted());
    }

    #[test]
    fn test_unlock_without_token_fails() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".encrypted"), b"").unwrap();
        let store = open(&temp);

        assert_eq!(store.mode(), StoreMode::MissingToken);
        assert!(matches!(
            store.unlock("correct-horse-battery"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_lock_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.enable_encryption("correct-horse-battery").unwrap();

        store.lock();
        store.lock();
        assert!(store.is_encrypted());
        assert!(!store.is_unlocked());
    }

    #[test]
    fn test_new_file_encrypted_when_unlocked() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.enable_encryption("correct-horse-battery").unwrap();

        store.write_file("settings.json", b"{\"currency\":\"EUR\"}").unwrap();

        let raw = fs::read(temp.path().join("settings.json")).unwrap();
        assert!(is_envelope(&raw));
        assert_eq!(
            store.read_file("settings.json").unwrap(),
            b"{\"currency\":\"EUR\"}"
        );
    }

    #[test]
    fn test_excluded_write_stays_plaintext() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.enable_encryption("correct-horse-battery").unwrap();

        store.write_file("cache/rates.json", b"{\"usd\":1.0}").unwrap();
        assert_eq!(
            fs::read(temp.path().join("cache/rates.json")).unwrap(),
            b"{\"usd\":1.0}"
        );
    }

    #[test]
    fn test_locked_write_is_plaintext() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.enable_encryption("correct-horse-battery").unwrap();
        store.lock();

        store.write_file("b.csv", b"Date,Amount\n").unwrap();
        assert_eq!(fs::read(temp.path().join("b.csv")).unwrap(), b"Date,Amount\n");
        assert_eq!(store.read_file("b.csv").unwrap(), b"Date,Amount\n");
    }

    #[test]
    fn test_read_envelope_while_locked() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.enable_encryption("correct-horse-battery").unwrap();
        store.write_file("a.csv", b"secret").unwrap();
        store.lock();

        match store.read_file("a.csv") {
            Err(Error::Locked(path)) => assert_eq!(path, "a.csv"),
            other => panic!("expected Locked, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_passphrase_leaves_state() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.enable_encryption("correct-horse-battery").unwrap();
        store.lock();

        assert!(matches!(
            store.unlock("wrong-horse-battery"),
            Err(Error::Authentication)
        ));
        assert!(!store.is_unlocked());
    }

    #[test]
    fn test_reopen_and_unlock() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(&temp);
            store.write_file("a.csv", b"Date,Amount\n").unwrap();
            store.enable_encryption("correct-horse-battery").unwrap();
        }

        let store = open(&temp);
        assert!(store.is_encrypted());
        assert!(!store.is_unlocked());

        store.unlock("correct-horse-battery").unwrap();
        assert_eq!(store.read_file("a.csv").unwrap(), b"Date,Amount\n");
    }

    #[test]
    fn test_stat_exists_remove() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.write_file("a.csv", b"12345").unwrap();

        let meta = store.stat("a.csv").unwrap();
        assert_eq!(meta.name, "a.csv");
        assert_eq!(meta.size, Some(5));
        assert!(!meta.is_directory);

        assert!(store.exists("a.csv").unwrap());
        store.remove("a.csv").unwrap();
        assert!(!store.exists("a.csv").unwrap());
        assert!(store.remove("a.csv").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_dir_hides_reserved_files() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.write_file("b.csv", b"b").unwrap();
        store.write_file("cache/x.json", b"x").unwrap();
        store.enable_encryption("correct-horse-battery").unwrap();

        let names: Vec<String> = store
            .list_dir("")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, ["b.csv", "cache"]);
    }

    #[test]
    fn test_open_sweeps_leftover_temp_files() {
        let temp = TempDir::new().unwrap();
        let leftover = temp.path().join(".a.csv.deadbeef.coffer-tmp");
        fs::write(&leftover, b"partial").unwrap();

        open(&temp);
        assert!(!leftover.exists());
    }
}
