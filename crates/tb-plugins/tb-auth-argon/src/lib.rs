//! # tb-auth-argon
//!
//! Argon2id-based implementation of `CredentialProvider`.
//! Handles password hashing and verification plus opaque token generation.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use base64::Engine;
use tb_core::error::{AppError, ErrorKind, Result};
use tb_core::traits::CredentialProvider;

/// Raw entropy behind every session and invitation token (256 bits).
pub const TOKEN_BYTES: usize = 32;

pub struct ArgonCredentials {
    params: Params,
    /// Upper bound for one hash or verification on the blocking pool
    timeout: Duration,
}

impl ArgonCredentials {
    /// Argon2id with the crate's recommended default cost.
    pub fn new(timeout: Duration) -> Self {
        Self::with_params(Params::default(), timeout)
    }

    /// Custom cost parameters, e.g. cheap ones for tests.
    pub fn with_params(params: Params, timeout: Duration) -> Self {
        Self { params, timeout }
    }

    pub fn into_provider(self) -> Arc<dyn CredentialProvider> {
        Arc::new(self)
    }

    fn hasher(params: Params) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }

    /// Runs `job` on the blocking pool, bounded by the configured timeout.
    async fn blocking<T, F>(&self, what: &'static str, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(job)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(AppError::internal(what, join)),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "{what} timed out");
                Err(ErrorKind::Timeout.with_context(what))
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for ArgonCredentials {
    async fn hash_password(&self, password: &str) -> Result<String> {
        let password = password.to_owned();
        let params = self.params.clone();
        self.blocking("hash password", move || {
            let salt = SaltString::generate(&mut OsRng);
            Self::hasher(params)
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| ErrorKind::Internal.with_context(format!("hash password: {e}")))
        })
        .await
    }

    /// Verifies if a provided password matches a stored Argon2 hash.
    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        let params = self.params.clone();
        self.blocking("verify password", move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| ErrorKind::Internal.with_context(format!("parse hash: {e}")))?;
            match Self::hasher(params).verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(ErrorKind::Internal.with_context(format!("verify password: {e}"))),
            }
        })
        .await
    }

    fn generate_token(&self) -> Result<String> {
        let mut raw = [0u8; TOKEN_BYTES];
        getrandom::getrandom(&mut raw)
            .map_err(|e| ErrorKind::Internal.with_context(format!("gather entropy: {e}")))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw))
    }
}
