//! Bulk conversion of a store between plaintext and encrypted mode.
//!
//! Every operation here runs in two phases. Staging reads each selected
//! file, transforms it, and writes the result to a sibling stage file; the
//! originals are not touched. Only when every file has been staged are the
//! stage files renamed over their targets. A failure while staging
//! discards the stage files and leaves the directory as it was.
//!
//! Callers hold the store's write lock for the whole run.

use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::atomic;
use crate::config::StoreConfig;
use crate::layout::{sniff_envelope, Layout, StoreMode};
use crate::store::StoreState;
use crate::token;
use coffer_common::{Error, IoResultExt, Result, StorePath};
use coffer_crypto::{is_envelope, KeyMaterial};

/// A transformed file waiting to be committed.
struct Staged {
    target: StorePath,
    fs_path: PathBuf,
    stage_path: PathBuf,
}

/// A commit that stopped part way.
struct CommitFailure {
    committed: Vec<StorePath>,
    error: Error,
}

fn check_passphrase(config: &StoreConfig, passphrase: &str) -> Result<()> {
    if passphrase.chars().count() < config.min_passphrase_len {
        return Err(Error::Validation(format!(
            "Passphrase must be at least {} characters",
            config.min_passphrase_len
        )));
    }
    Ok(())
}

/// Files that currently hold an envelope, wherever they sit.
///
/// Only the store's own files are skipped: an envelope under an excluded
/// directory still has to be opened, or it becomes unreadable once the
/// store leaves encrypted mode.
fn sealed_files(layout: &Layout) -> Result<Vec<StorePath>> {
    let mut selected = Vec::new();
    for path in layout.walk_files()? {
        if layout.is_reserved(&path) {
            continue;
        }
        let fs_path = path.to_fs_path(layout.base());
        let sealed =
            sniff_envelope(&fs_path).map_err(|e| Error::partial_migration(fs_path.clone(), e))?;
        if sealed {
            selected.push(path);
        }
    }
    Ok(selected)
}

/// Phase one. `transform` returns `None` to leave a file alone.
fn stage_all<F>(layout: &Layout, files: &[StorePath], mut transform: F) -> Result<Vec<Staged>>
where
    F: FnMut(&[u8]) -> Result<Option<Vec<u8>>>,
{
    let mut staged: Vec<Staged> = Vec::new();
    for target in files {
        let fs_path = target.to_fs_path(layout.base());
        let outcome = fs::read(&fs_path)
            .at_path(&fs_path)
            .and_then(|bytes| transform(&bytes))
            .and_then(|output| match output {
                Some(bytes) => atomic::stage(&fs_path, &bytes).map(Some),
                None => Ok(None),
            });

        match outcome {
            Ok(Some(stage_path)) => {
                debug!("Staged {}", target);
                staged.push(Staged {
                    target: target.clone(),
                    fs_path,
                    stage_path,
                });
            }
            Ok(None) => debug!("Skipped {}", target),
            Err(e) => {
                for entry in &staged {
                    atomic::discard(&entry.stage_path);
                }
                return Err(Error::partial_migration(fs_path, e));
            }
        }
    }
    Ok(staged)
}

/// Phase two. On failure the remaining stage files are discarded and the
/// targets already replaced are reported back.
fn commit_all(staged: Vec<Staged>) -> std::result::Result<Vec<StorePath>, CommitFailure> {
    let mut committed = Vec::with_capacity(staged.len());
    let mut pending = staged.into_iter();
    while let Some(entry) = pending.next() {
        if let Err(e) = atomic::commit(&entry.stage_path, &entry.fs_path) {
            atomic::discard(&entry.stage_path);
            for rest in pending.by_ref() {
                atomic::discard(&rest.stage_path);
            }
            return Err(CommitFailure {
                committed,
                error: Error::partial_migration(entry.fs_path, e),
            });
        }
        committed.push(entry.target);
    }
    Ok(committed)
}

/// Best-effort: reopen each file with `from` and rewrite it sealed under
/// `to`, or as plaintext when `to` is `None`. Failures are logged only.
fn reseal_quietly(
    layout: &Layout,
    files: &[StorePath],
    from: &KeyMaterial,
    to: Option<&KeyMaterial>,
) {
    for path in files {
        let fs_path = path.to_fs_path(layout.base());
        let restored = fs::read(&fs_path)
            .at_path(&fs_path)
            .and_then(|bytes| {
                if is_envelope(&bytes) {
                    from.open(&bytes)
                } else {
                    Ok(bytes)
                }
            })
            .and_then(|plain| match to {
                Some(keys) => keys.seal(&plain),
                None => Ok(plain),
            })
            .and_then(|bytes| atomic::atomic_write(&fs_path, &bytes));

        if let Err(e) = restored {
            warn!("Rollback could not restore {}: {}", path, e);
        }
    }
}

fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Encrypt every eligible file, then write the marker.
pub(crate) fn enable(
    layout: &Layout,
    config: &StoreConfig,
    state: &mut StoreState,
    passphrase: &str,
) -> Result<()> {
    if state.encrypted {
        return Err(Error::Validation("Encryption is already enabled".to_string()));
    }
    check_passphrase(config, passphrase)?;
    if layout.mode() == StoreMode::Interrupted {
        return Err(Error::Validation(
            "An interrupted encryption change was found; recover it first".to_string(),
        ));
    }

    info!("Enabling encryption for {}", layout.base().display());
    let keys = KeyMaterial::derive(passphrase.as_bytes(), &config.kdf)?;

    // The token goes first so a crash from here on is detectable.
    let verify_path = layout.verify_path();
    atomic::atomic_write(&verify_path, &token::create(&keys)?)?;

    let files: Vec<StorePath> = match layout.walk_files() {
        Ok(files) => files.into_iter().filter(|p| layout.is_migratable(p)).collect(),
        Err(e) => {
            remove_quietly(&verify_path);
            return Err(e);
        }
    };

    let staged = stage_all(layout, &files, |bytes| {
        if is_envelope(bytes) {
            Ok(None)
        } else {
            keys.seal(bytes).map(Some)
        }
    });
    let staged = match staged {
        Ok(staged) => staged,
        Err(e) => {
            remove_quietly(&verify_path);
            return Err(e);
        }
    };

    let committed = match commit_all(staged) {
        Ok(committed) => committed,
        Err(failure) => {
            reseal_quietly(layout, &failure.committed, &keys, None);
            remove_quietly(&verify_path);
            return Err(failure.error);
        }
    };

    if let Err(e) = atomic::atomic_write(&layout.marker_path(), &[]) {
        reseal_quietly(layout, &committed, &keys, None);
        remove_quietly(&verify_path);
        return Err(e);
    }

    info!("Encrypted {} files", committed.len());
    state.encrypted = true;
    state.keys = Some(keys);
    Ok(())
}

/// Decrypt every envelope, then remove the marker and token.
///
/// The marker goes first. If removing the token then fails, the error is
/// returned with the store already in plaintext mode; on disk it reads as
/// [`StoreMode::Interrupted`], which [`recover`] clears.
pub(crate) fn disable(layout: &Layout, state: &mut StoreState, passphrase: &str) -> Result<()> {
    if !state.encrypted {
        return Err(Error::Validation("Encryption is not enabled".to_string()));
    }

    let sealed = token::load(layout)?;
    let keys = token::verify(passphrase, &sealed)?;

    info!("Disabling encryption for {}", layout.base().display());
    let files = sealed_files(layout)?;
    let staged = stage_all(layout, &files, |bytes| keys.open(bytes).map(Some))?;

    // No rollback: committed files are plaintext, the rest are still
    // envelopes, and reads handle both.
    let committed = commit_all(staged).map_err(|failure| failure.error)?;
    info!("Decrypted {} files", committed.len());

    let marker_path = layout.marker_path();
    fs::remove_file(&marker_path).at_path(&marker_path)?;
    state.encrypted = false;
    state.keys = None;

    let verify_path = layout.verify_path();
    fs::remove_file(&verify_path).at_path(&verify_path)
}

/// Re-encrypt every envelope and the token under `new`.
pub(crate) fn change_passphrase(
    layout: &Layout,
    config: &StoreConfig,
    state: &mut StoreState,
    old: &str,
    new: &str,
) -> Result<()> {
    if !state.encrypted {
        return Err(Error::Validation("Encryption is not enabled".to_string()));
    }
    check_passphrase(config, new)?;

    let sealed = token::load(layout)?;
    let old_keys = token::verify(old, &sealed)?;
    let new_keys = KeyMaterial::derive(new.as_bytes(), &config.kdf)?;

    info!("Changing passphrase for {}", layout.base().display());
    let files = sealed_files(layout)?;
    let staged = stage_all(layout, &files, |bytes| {
        let plain = old_keys.open(bytes)?;
        new_keys.seal(&plain).map(Some)
    })?;

    let committed = match commit_all(staged) {
        Ok(committed) => committed,
        Err(failure) => {
            reseal_quietly(layout, &failure.committed, &new_keys, Some(&old_keys));
            return Err(failure.error);
        }
    };

    // Token last: until it is replaced the old passphrase still unlocks.
    let new_token = token::create(&new_keys)?;
    if let Err(e) = atomic::atomic_write(&layout.verify_path(), &new_token) {
        reseal_quietly(layout, &committed, &new_keys, Some(&old_keys));
        return Err(e);
    }

    info!("Re-encrypted {} files", committed.len());
    state.keys = Some(new_keys);
    Ok(())
}

/// Undo an interrupted enable: decrypt any envelopes and drop the token.
pub(crate) fn recover(layout: &Layout, state: &mut StoreState, passphrase: &str) -> Result<()> {
    if state.encrypted || layout.mode() != StoreMode::Interrupted {
        return Err(Error::Validation(
            "No interrupted encryption change to recover".to_string(),
        ));
    }

    let sealed = token::load(layout)?;
    let keys = token::verify(passphrase, &sealed)?;

    info!("Recovering interrupted migration in {}", layout.base().display());
    let files = sealed_files(layout)?;
    let staged = stage_all(layout, &files, |bytes| keys.open(bytes).map(Some))?;
    let committed = commit_all(staged).map_err(|failure| failure.error)?;
    info!("Restored {} files to plaintext", committed.len());

    let verify_path = layout.verify_path();
    fs::remove_file(&verify_path).at_path(&verify_path)
}
