//! Verification token.
//!
//! A fixed, versioned JSON string sealed under the passphrase-derived key.
//! Opening it is the only passphrase check the store performs, and it
//! happens before any real file is touched.

use serde::Serialize;
use std::fs;
use subtle::ConstantTimeEq;

use crate::layout::Layout;
use coffer_common::{Error, Result};
use coffer_crypto::KeyMaterial;

/// Magic value embedded in the token plaintext.
pub const VERIFY_MAGIC: &str = "coffer-encryption-verify";

/// Token format version.
pub const VERIFY_VERSION: u32 = 1;

#[derive(Serialize)]
struct TokenBody<'a> {
    magic: &'a str,
    version: u32,
}

/// The token plaintext: `{"magic":"coffer-encryption-verify","version":1}`.
pub fn plaintext() -> Result<Vec<u8>> {
    serde_json::to_vec(&TokenBody {
        magic: VERIFY_MAGIC,
        version: VERIFY_VERSION,
    })
    .map_err(|e| Error::Serialization(e.to_string()))
}

/// Seal the token plaintext under `keys`.
pub fn create(keys: &KeyMaterial) -> Result<Vec<u8>> {
    keys.seal(&plaintext()?)
}

/// Read the sealed token from disk.
///
/// # Errors
/// - `Validation` if the store has no token (encryption never enabled, or
///   the token was lost)
pub fn load(layout: &Layout) -> Result<Vec<u8>> {
    let path = layout.verify_path();
    match fs::read(&path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Validation(
            "Verification token is missing".to_string(),
        )),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Check `passphrase` against a sealed token and return the key material
/// it unlocks.
///
/// Every failure (malformed envelope, failed authentication, unexpected
/// plaintext) is reported as [`Error::Authentication`].
pub fn verify(passphrase: &str, sealed: &[u8]) -> Result<KeyMaterial> {
    let (keys, opened) = KeyMaterial::from_envelope(passphrase.as_bytes(), sealed)
        .map_err(|_| Error::Authentication)?;

    let expected = plaintext()?;
    if bool::from(opened.as_slice().ct_eq(expected.as_slice())) {
        Ok(keys)
    } else {
        Err(Error::Authentication)
    }
}
