//! Transparent, optionally-encrypted storage for an application data
//! directory.
//!
//! Callers read and write files through a [`Store`] without knowing whether
//! the bytes on disk are plaintext or envelopes. Whether a file is
//! encrypted is decided by its content (the envelope magic), never by its
//! name, so plaintext and ciphertext files can sit side by side while a
//! migration runs or for files the exclusion rule leaves alone.
//!
//! # Design Principles
//! - One explicit `Store` per base directory, shared by `Arc`; no globals
//! - Every write goes through a temp file and a rename
//! - Bulk migrations stage every file before committing any of them
//! - All operations are synchronous

pub mod atomic;
pub mod config;
pub mod layout;
pub mod metadata;
mod migration;
pub mod store;
pub mod token;

pub use config::StoreConfig;
pub use layout::{Layout, StoreMode, MARKER_FILENAME, VERIFY_FILENAME};
pub use metadata::Metadata;
pub use store::Store;
