//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use coffer_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(())
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// `aad` is authenticated but not encrypted; the same bytes must be
/// supplied to [`decrypt`].
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
/// - The output length is plaintext length + TAG_SIZE + NONCE_SIZE
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn encrypt(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    // Prepend nonce to ciphertext
    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext using XChaCha20-Poly1305.
///
/// # Preconditions
/// - `ciphertext` must be at least NONCE_SIZE + TAG_SIZE bytes
/// - Ciphertext format: nonce || encrypted_data || tag
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if ciphertext is too short
/// - Returns error if authentication fails (wrong key, tampered data or aad)
pub fn decrypt(key: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted,
                aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Hello, World!";

        let ciphertext = encrypt(&key, plaintext, b"hdr").unwrap();
        let decrypted = decrypt(&key, &ciphertext, b"hdr").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let ciphertext = encrypt(&key, plaintext, &[]).unwrap();

        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Same plaintext";

        let ct1 = encrypt(&key, plaintext, &[]).unwrap();
        let ct2 = encrypt(&key, plaintext, &[]).unwrap();

        assert_ne!(&ct1[..NONCE_SIZE], &ct2[..NONCE_SIZE]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [1u8; KEY_LENGTH];
        let key2 = [2u8; KEY_LENGTH];

        let ciphertext = encrypt(&key1, b"Secret data", &[]).unwrap();
        assert!(decrypt(&key2, &ciphertext, &[]).is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [42u8; KEY_LENGTH];

        let ciphertext = encrypt(&key, b"Secret data", b"header-a").unwrap();
        assert!(decrypt(&key, &ciphertext, b"header-b").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];

        let mut ciphertext = encrypt(&key, b"Important data", &[]).unwrap();
        ciphertext[NONCE_SIZE + 5] ^= 0xFF;

        assert!(decrypt(&key, &ciphertext, &[]).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];
        assert!(encrypt(&short_key, b"data", &[]).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        assert!(decrypt(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1], &[]).is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_LENGTH];

        let ciphertext = encrypt(&key, b"", &[]).unwrap();
        let decrypted = decrypt(&key, &ciphertext, &[]).unwrap();

        assert!(decrypted.is_empty());
    }
}
