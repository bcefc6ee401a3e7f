//! Secret storage contract.
//!
//! Credentials are persisted through this trait so the app layer can bind
//! it to the platform keyring while tests use an in-memory map.

use crate::errors::Result;

/// A secure key-value store for credential material.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>>;
    fn set_secret(&self, key: &str, value: &str) -> Result<()>;
    fn delete_secret(&self, key: &str) -> Result<()>;
}
