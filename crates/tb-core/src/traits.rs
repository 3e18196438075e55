//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the storage layer.

use async_trait::async_trait;

use crate::error::Result;

/// Password hashing and credential generation contract.
///
/// Hashing is intentionally slow; implementations must not block the async
/// executor while computing.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Produces a self-describing hash string for storage.
    async fn hash_password(&self, password: &str) -> Result<String>;

    /// Returns `Ok(false)` for a mismatch; `Err` only for malformed hashes
    /// or infrastructure failures.
    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool>;

    /// A fresh unguessable opaque token (sessions and invitations).
    fn generate_token(&self) -> Result<String>;
}
