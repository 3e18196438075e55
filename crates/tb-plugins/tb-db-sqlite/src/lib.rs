//! # tb-db-sqlite
//!
//! SQLite storage for Tagboard. [`Database`] owns the connection pool and
//! hands out one [`Transaction`] per unit of work; every permission check
//! and entity operation runs on that transaction's own connection.

mod post;
mod rows;
mod session;
mod token;
mod transaction;
mod user;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tb_core::config::CoreConfig;
use tb_core::error::{AppError, ErrorKind, Result};
use tb_core::permission::Permission;
use tb_core::traits::CredentialProvider;
use tb_core::validate;

use crate::rows::{to_millis, DbResultExt};

pub use crate::transaction::Transaction;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    pool: SqlitePool,
    config: CoreConfig,
    credentials: Arc<dyn CredentialProvider>,
    migrator: Migrator,
}

impl Database {
    /// Connects (creating the file if needed) and applies pending migrations.
    pub async fn open(
        url: &str,
        max_connections: u32,
        config: CoreConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .db("parse database url")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .db("connect")?;

        let db = Self {
            pool,
            config,
            credentials,
            migrator: sqlx::migrate!("./migrations"),
        };
        db.migrate().await?;
        tracing::info!(url, "database ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        self.migrator
            .run(&self.pool)
            .await
            .map_err(|e| AppError::internal("run migrations", e))
    }

    /// Makes sure the configured owner account exists.
    ///
    /// Returns `true` when the account was created. An existing account keeps
    /// its password; only its stored permission is brought in line.
    pub async fn bootstrap_owner(&self, password: &str) -> Result<bool> {
        let owner = self.config.owner_username.as_str();
        validate::username(owner)?;

        let exists = sqlx::query("SELECT 1 FROM users WHERE username = ?")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .db("look up owner")?
            .is_some();

        if exists {
            sqlx::query("UPDATE users SET permission = ? WHERE username = ? AND permission <> ?")
                .bind(Permission::Owner.level())
                .bind(owner)
                .bind(Permission::Owner.level())
                .execute(&self.pool)
                .await
                .db("sync owner permission")?;
            return Ok(false);
        }

        validate::password(password, &self.config)?;
        let hash = self.credentials.hash_password(password).await?;
        sqlx::query(
            "INSERT INTO users (username, joined_at, password_hash, permission) VALUES (?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(to_millis(Utc::now()))
        .bind(hash)
        .bind(Permission::Owner.level())
        .execute(&self.pool)
        .await
        .unique_as(ErrorKind::UsernameTaken, "create owner")?;

        tracing::info!(owner, "owner account created");
        Ok(true)
    }

    /// Runs `unit` inside a transaction bound to the session behind `token`.
    ///
    /// An empty token runs as a guest. The transaction commits when `unit`
    /// returns `Ok` and rolls back otherwise, or when the configured
    /// transaction timeout elapses first.
    pub async fn acquire<T, F>(&self, token: &str, unit: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let tx = self.begin(token).await?;
        self.run(tx, unit).await
    }

    /// Runs `unit` without a session and without a transaction scope.
    pub async fn acquire_guest<T, F>(&self, unit: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let tx = self.begin_guest().await?;
        self.run(tx, unit).await
    }

    async fn run<'db, T, F>(&'db self, mut tx: Transaction<'db>, unit: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let outcome = tokio::time::timeout(self.config.transaction_timeout, unit(&mut tx))
            .await
            .unwrap_or_else(|_| {
                Err(ErrorKind::Timeout.with_context(format!(
                    "unit of work exceeded {:?}",
                    self.config.transaction_timeout
                )))
            });

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Opens an authenticated transaction; prefer [`Database::acquire`].
    ///
    /// The write lock is taken up front so concurrent writers queue on the
    /// busy timeout instead of failing when a read transaction upgrades.
    pub async fn begin(&self, token: &str) -> Result<Transaction<'_>> {
        if token.is_empty() {
            return self.begin_guest().await;
        }

        let scope = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .db("begin transaction")?;
        let mut tx = Transaction::scoped(self, scope);
        if let Err(err) = tx.resume_session(token).await {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            if err.kind() == ErrorKind::SessionExpired {
                self.discard_session(token).await;
            }
            return Err(err);
        }
        Ok(tx)
    }

    /// Opens a guest transaction; prefer [`Database::acquire_guest`].
    pub async fn begin_guest(&self) -> Result<Transaction<'_>> {
        let conn = self.pool.acquire().await.db("acquire connection")?;
        Ok(Transaction::guest(self, conn))
    }

    /// Best effort removal of an expired session outside any unit of work.
    async fn discard_session(&self, token: &str) {
        let deleted = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await;
        if let Err(e) = deleted {
            tracing::warn!(error = %e, "could not delete expired session");
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub(crate) fn credentials(&self) -> &dyn CredentialProvider {
        self.credentials.as_ref()
    }

    /// Raw pool access for maintenance tasks and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use argon2::Params;
    use tb_auth_argon::ArgonCredentials;
    use tb_core::config::CoreConfig;
    use tb_core::models::Session;
    use tempfile::TempDir;

    use super::Database;

    pub const OWNER: &str = "alice";
    pub const PASSWORD: &str = "password123";

    pub fn config() -> CoreConfig {
        CoreConfig {
            owner_username: OWNER.to_string(),
            max_token_uses: 10,
            ..CoreConfig::default()
        }
    }

    /// A fresh database in a temp dir, owner bootstrapped.
    pub async fn database_with(config: CoreConfig) -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap();
        let creds = ArgonCredentials::with_params(params, Duration::from_secs(5));
        let db = Database::open(&url, 8, config, creds.into_provider())
            .await
            .unwrap();
        assert!(db.bootstrap_owner(PASSWORD).await.unwrap());
        (dir, db)
    }

    pub async fn database() -> (TempDir, Database) {
        database_with(config()).await
    }

    pub async fn signin(db: &Database, user: &str, pass: &str) -> Session {
        db.acquire_guest(async |tx| tx.signin(user, pass, "test-agent").await)
            .await
            .unwrap()
    }

    /// Signs in as the owner, issues a single-use token and signs up `user`.
    pub async fn invite(db: &Database, owner: &Session, user: &str) -> Session {
        let token = db
            .acquire(&owner.token, async |tx| tx.create_token(1).await)
            .await
            .unwrap();
        db.acquire_guest(async |tx| {
            tx.signup(user, PASSWORD, &token.token, "test-agent").await
        })
        .await
        .unwrap()
    }
}
