//! Common error types for Coffer.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level error type for Coffer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Request rejected before any state was touched (passphrase too short,
    /// store already in the requested mode, nothing to recover).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wrong passphrase.
    ///
    /// Deliberately carries no detail: a failed decryption and a token
    /// mismatch must be indistinguishable to the caller.
    #[error("Incorrect password")]
    Authentication,

    /// An encrypted file was read while no key material is loaded.
    #[error("Storage is locked: {0}")]
    Locked(String),

    /// Filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single file failed while transcoding the whole store.
    #[error("Migration failed at {}: {source}", file.display())]
    PartialMigration {
        file: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a per-file failure from a bulk migration.
    pub fn partial_migration(file: impl AsRef<Path>, source: Error) -> Self {
        Self::PartialMigration {
            file: file.as_ref().to_path_buf(),
            source: Box::new(source),
        }
    }

    /// Whether this is an I/O error of kind `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Attach path context to `std::io::Result`.
pub trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
