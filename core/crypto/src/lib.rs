//! Cryptographic primitives for Coffer.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - The self-describing file envelope and its magic-header sniffing
//! - Passphrase-derived key material with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Envelope headers are authenticated together with the ciphertext

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keyring;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use envelope::{is_envelope, EnvelopeHeader, HEADER_LEN, MAGIC};
pub use kdf::{derive_key, KdfParams};
pub use keyring::KeyMaterial;
pub use keys::{MasterKey, Salt};
