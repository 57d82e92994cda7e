//! Common utilities and types shared across Coffer crates.
//!
//! This module provides the error type every crate returns and the
//! validated path type used to address files inside a store.

pub mod error;
pub mod types;

pub use error::{Error, IoResultExt, Result};
pub use types::{SensitiveBytes, StorePath};
