//! Self-describing ciphertext envelope.
//!
//! Layout (integers little-endian):
//!
//! ```text
//! magic        19  "coffer-envelope/v1\n"
//! kdf id        1  1 = Argon2id v0x13
//! memory cost   4  KiB
//! time cost     4
//! parallelism   4
//! salt         32
//! nonce        24
//! ciphertext    n  followed by the 16-byte Poly1305 tag
//! ```
//!
//! The 64-byte header is passed to the AEAD as associated data, so
//! rewriting the parameters or salt of a stored file makes it fail to open.

use crate::aead;
use crate::kdf::KdfParams;
use crate::keys::{MasterKey, Salt, SALT_LENGTH};
use coffer_common::{Error, Result};

/// Fixed prefix identifying an envelope.
pub const MAGIC: &[u8] = b"coffer-envelope/v1\n";

/// KDF identifier for Argon2id, version 0x13.
pub const KDF_ARGON2ID: u8 = 1;

/// Total header length, magic included.
pub const HEADER_LEN: usize = MAGIC.len() + 1 + 12 + SALT_LENGTH;

/// Cheap content sniff: does `bytes` start with the envelope magic?
///
/// Never attempts decryption and carries no state, so plaintext and
/// ciphertext files can be told apart regardless of extension.
pub fn is_envelope(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// KDF parameters and salt recorded at the front of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvelopeHeader {
    pub params: KdfParams,
    pub salt: Salt,
}

impl EnvelopeHeader {
    pub fn new(params: KdfParams, salt: Salt) -> Self {
        Self { params, salt }
    }

    /// Serialize the header, magic included.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut at = MAGIC.len();
        out[..at].copy_from_slice(MAGIC);

        out[at] = KDF_ARGON2ID;
        at += 1;
        for value in [
            self.params.memory_cost,
            self.params.time_cost,
            self.params.parallelism,
        ] {
            out[at..at + 4].copy_from_slice(&value.to_le_bytes());
            at += 4;
        }
        out[at..].copy_from_slice(self.salt.as_bytes());
        out
    }

    /// Parse the header at the front of `envelope`.
    ///
    /// # Errors
    /// - Missing magic, truncated header or unknown KDF id
    /// - KDF parameters outside the accepted bounds
    pub fn parse(envelope: &[u8]) -> Result<Self> {
        if !is_envelope(envelope) {
            return Err(Error::Crypto("Not an envelope".to_string()));
        }
        if envelope.len() < HEADER_LEN {
            return Err(Error::Crypto("Envelope header truncated".to_string()));
        }

        let mut at = MAGIC.len();
        if envelope[at] != KDF_ARGON2ID {
            return Err(Error::Crypto(format!(
                "Unsupported KDF id: {}",
                envelope[at]
            )));
        }
        at += 1;

        let mut read_u32 = || {
            let mut word = [0u8; 4];
            word.copy_from_slice(&envelope[at..at + 4]);
            at += 4;
            u32::from_le_bytes(word)
        };
        let params = KdfParams {
            memory_cost: read_u32(),
            time_cost: read_u32(),
            parallelism: read_u32(),
        };
        params.validate()?;

        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(&envelope[HEADER_LEN - SALT_LENGTH..HEADER_LEN]);

        Ok(Self {
            params,
            salt: Salt::from_bytes(salt),
        })
    }
}

/// Seal `plaintext` under `key`, writing `header` in front.
///
/// `key` must be the key derived from `header`'s parameters and salt,
/// otherwise the envelope cannot be opened with the passphrase alone.
pub fn seal(key: &MasterKey, header: &EnvelopeHeader, plaintext: &[u8]) -> Result<Vec<u8>> {
    let header_bytes = header.to_bytes();
    let body = aead::encrypt(key.as_bytes(), plaintext, &header_bytes)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Open an envelope with an already-derived key.
pub fn open(key: &MasterKey, envelope: &[u8]) -> Result<Vec<u8>> {
    if !is_envelope(envelope) {
        return Err(Error::Crypto("Not an envelope".to_string()));
    }
    if envelope.len() < HEADER_LEN {
        return Err(Error::Crypto("Envelope header truncated".to_string()));
    }
    let (header_bytes, body) = envelope.split_at(HEADER_LEN);
    aead::decrypt(key.as_bytes(), body, header_bytes)
}
