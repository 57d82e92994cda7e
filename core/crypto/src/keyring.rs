//! Passphrase-derived key material held by an unlocked store.
//!
//! The encrypt side is one `(params, salt)` header plus the key derived
//! from it; every envelope sealed in a session shares that header and
//! differs only by nonce. The decrypt side keeps the passphrase so that
//! envelopes written under another header can still be opened, deriving
//! once per distinct header and caching the result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

use crate::envelope::{self, EnvelopeHeader};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{MasterKey, Salt};
use coffer_common::{Result, SensitiveBytes};

/// Encrypt and decrypt capability derived from one passphrase.
pub struct KeyMaterial {
    header: EnvelopeHeader,
    encrypt_key: MasterKey,
    passphrase: SensitiveBytes,
    derived: Mutex<HashMap<EnvelopeHeader, MasterKey>>,
}

impl KeyMaterial {
    /// Derive fresh key material under a newly generated salt.
    pub fn derive(passphrase: &[u8], params: &KdfParams) -> Result<Self> {
        let header = EnvelopeHeader::new(*params, Salt::generate());
        let key = derive_key(passphrase, &header.salt, &header.params)?;
        Ok(Self::assemble(passphrase, header, key))
    }

    /// Derive key material from the header of an existing envelope and
    /// open it in the same step.
    ///
    /// Used to check a passphrase against a known ciphertext: any failure
    /// here means the passphrase does not match that envelope.
    pub fn from_envelope(passphrase: &[u8], sealed: &[u8]) -> Result<(Self, Vec<u8>)> {
        let header = EnvelopeHeader::parse(sealed)?;
        let key = derive_key(passphrase, &header.salt, &header.params)?;
        let plaintext = envelope::open(&key, sealed)?;
        Ok((Self::assemble(passphrase, header, key), plaintext))
    }

    fn assemble(passphrase: &[u8], header: EnvelopeHeader, key: MasterKey) -> Self {
        let mut derived = HashMap::new();
        derived.insert(header, key.clone());
        Self {
            header,
            encrypt_key: key,
            passphrase: SensitiveBytes::from(passphrase),
            derived: Mutex::new(derived),
        }
    }

    /// Header written in front of every envelope this material seals.
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Encrypt `plaintext` into a new envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        envelope::seal(&self.encrypt_key, &self.header, plaintext)
    }

    /// Decrypt an envelope, whichever header it was sealed under.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let header = EnvelopeHeader::parse(sealed)?;
        let key = self.key_for(&header)?;
        envelope::open(&key, sealed)
    }

    fn key_for(&self, header: &EnvelopeHeader) -> Result<MasterKey> {
        if let Some(key) = self.derived.lock().get(header) {
            return Ok(key.clone());
        }

        // Argon2 runs without the cache lock held.
        let key = derive_key(self.passphrase.as_bytes(), &header.salt, &header.params)?;
        self.derived.lock().insert(*header, key.clone());
        Ok(key)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("header", &self.header)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}
