//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use coffer_common::{Error, Result};

/// Upper bound on memory cost accepted from an envelope header (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;

/// Upper bound on iterations accepted from an envelope header.
pub const MAX_TIME_COST: u32 = 64;

/// Upper bound on lanes accepted from an envelope header.
pub const MAX_PARALLELISM: u32 = 64;

/// Parameters for Argon2id key derivation.
///
/// These are written into every envelope header, so a file can always be
/// opened with the parameters it was sealed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for low-memory machines.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Look up a named preset: "interactive", "moderate" or "sensitive".
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF preset '{}': use interactive, moderate, or sensitive",
                other
            ))),
        }
    }

    /// Check the parameters against the accepted bounds.
    ///
    /// Envelope headers come from disk, so their parameters are untrusted
    /// and must be bounded before any memory is committed to them.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(Error::InvalidInput(format!(
                "KDF parallelism out of range: {}",
                self.parallelism
            )));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(Error::InvalidInput(format!(
                "KDF time cost out of range: {}",
                self.time_cost
            )));
        }
        if self.memory_cost < 8 * self.parallelism || self.memory_cost > MAX_MEMORY_COST {
            return Err(Error::InvalidInput(format!(
                "KDF memory cost out of range: {} KiB",
                self.memory_cost
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a key from a passphrase and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must be within the accepted bounds
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(MasterKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(password, &salt, &cheap()).unwrap();
        let key2 = derive_key(password, &salt, &cheap()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);

        let key1 = derive_key(password, &salt1, &cheap()).unwrap();
        let key2 = derive_key(password, &salt2, &cheap()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(b"password1", &salt, &cheap()).unwrap();
        let key2 = derive_key(b"password2", &salt, &cheap()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();
        assert!(derive_key(b"", &salt, &cheap()).is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_memory() {
        let params = KdfParams {
            memory_cost: MAX_MEMORY_COST + 1,
            ..cheap()
        };
        assert!(params.validate().is_err());
        assert!(derive_key(b"password", &Salt::generate(), &params).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_lanes() {
        let params = KdfParams {
            parallelism: 0,
            ..cheap()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_presets_are_valid() {
        for name in ["interactive", "moderate", "sensitive"] {
            KdfParams::preset(name).unwrap().validate().unwrap();
        }
        assert!(KdfParams::preset("turbo").is_err());
    }
}
