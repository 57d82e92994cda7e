//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use coffer_common::{Error, IoResultExt, Result};
use coffer_crypto::KdfParams;

/// Shortest passphrase accepted when enabling encryption.
pub const DEFAULT_MIN_PASSPHRASE_LEN: usize = 8;

/// Tunables for a [`Store`](crate::Store).
///
/// Every field has a default, so a config file only needs to name the
/// values it changes:
///
/// ```json
/// { "kdf": { "memory_cost": 32768, "time_cost": 3, "parallelism": 2 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Argon2id parameters for newly derived key material.
    pub kdf: KdfParams,
    /// Minimum passphrase length, in characters.
    pub min_passphrase_len: usize,
    /// Extensions (without the dot) encrypted when encryption is enabled.
    pub encrypted_extensions: Vec<String>,
    /// Directory names whose contents are never encrypted.
    pub excluded_dirs: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            min_passphrase_len: DEFAULT_MIN_PASSPHRASE_LEN,
            encrypted_extensions: vec!["csv".to_string(), "json".to_string()],
            excluded_dirs: vec!["cache".to_string()],
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).at_path(path)?;
        Self::from_json(&json)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Reject configurations that would make the store unusable.
    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        if self.min_passphrase_len == 0 {
            return Err(Error::InvalidInput(
                "min_passphrase_len must be at least 1".to_string(),
            ));
        }
        if self
            .excluded_dirs
            .iter()
            .chain(self.encrypted_extensions.iter())
            .any(|s| s.is_empty() || s.contains('/'))
        {
            return Err(Error::InvalidInput(
                "Extensions and excluded directories must be single path components".to_string(),
            ));
        }
        Ok(())
    }
}
