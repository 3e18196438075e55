//! The unit-of-work object and the permission primitives every operation
//! is checked against.

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};
use tb_core::config::CoreConfig;
use tb_core::error::{ErrorKind, Result};
use tb_core::models::Session;
use tb_core::permission::Permission;
use tb_core::traits::CredentialProvider;

use crate::rows::DbResultExt;
use crate::Database;

enum Conn {
    /// Autocommit; guests only run self-contained statements.
    Guest(PoolConnection<Sqlite>),
    Scoped(sqlx::Transaction<'static, Sqlite>),
}

/// One connection plus the session it acts for.
///
/// Dropping a transaction without [`Transaction::commit`] rolls it back and
/// returns the connection to the pool.
pub struct Transaction<'db> {
    db: &'db Database,
    conn: Conn,
    pub(crate) session: Session,
}

impl<'db> Transaction<'db> {
    pub(crate) fn guest(db: &'db Database, conn: PoolConnection<Sqlite>) -> Self {
        Self {
            db,
            conn: Conn::Guest(conn),
            session: Session::default(),
        }
    }

    pub(crate) fn scoped(db: &'db Database, tx: sqlx::Transaction<'static, Sqlite>) -> Self {
        Self {
            db,
            conn: Conn::Scoped(tx),
            session: Session::default(),
        }
    }

    pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
        match &mut self.conn {
            Conn::Guest(conn) => &mut **conn,
            Conn::Scoped(tx) => &mut **tx,
        }
    }

    pub(crate) fn config(&self) -> &'db CoreConfig {
        self.db.config()
    }

    pub(crate) fn credentials(&self) -> &'db dyn CredentialProvider {
        self.db.credentials()
    }

    /// The session this unit of work acts for; the default value is a guest.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_guest_mode(&self) -> bool {
        matches!(self.conn, Conn::Guest(_))
    }

    pub async fn commit(self) -> Result<()> {
        match self.conn {
            Conn::Guest(_) => Ok(()),
            Conn::Scoped(tx) => tx.commit().await.db("commit"),
        }
    }

    /// Always releases the connection, whatever the mode.
    pub async fn rollback(self) -> Result<()> {
        match self.conn {
            Conn::Guest(conn) => {
                drop(conn);
                Ok(())
            }
            Conn::Scoped(tx) => tx.rollback().await.db("rollback"),
        }
    }

    pub(crate) fn caller(&self) -> Option<&str> {
        self.session.username.as_deref()
    }

    pub(crate) fn is_caller(&self, username: &str) -> bool {
        self.caller() == Some(username)
    }

    /// Applies the owner override to a stored level.
    pub(crate) fn resolve(&self, username: &str, stored: Permission) -> Permission {
        if username == self.config().owner_username {
            Permission::Owner
        } else {
            stored
        }
    }

    /// Resolved permission of any user; `UserNotFound` when absent.
    pub(crate) async fn user_permission(&mut self, username: &str) -> Result<Permission> {
        let level: Option<i64> = sqlx::query_scalar("SELECT permission FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.conn())
            .await
            .db("look up permission")?;
        match level {
            Some(level) => Ok(self.resolve(username, Permission::from_level(level)?)),
            None => Err(ErrorKind::UserNotFound.with_context(format!("user {username:?}"))),
        }
    }

    /// The caller's resolved permission, `Guest` without a session.
    pub async fn permission(&mut self) -> Result<Permission> {
        match self.session.username.clone() {
            Some(username) => self.user_permission(&username).await,
            None => Ok(Permission::Guest),
        }
    }

    /// Succeeds iff the caller's permission is above `min`, or equal to it
    /// when `inclusive`.
    pub async fn has_permission(&mut self, min: Permission, inclusive: bool) -> Result<()> {
        let mine = self.permission().await?;
        if mine.satisfies(min, inclusive) {
            Ok(())
        } else {
            Err(denied(min, inclusive))
        }
    }

    /// Requires `min` (inclusive), then either the target is the caller or
    /// the target is strictly weaker than the caller.
    pub async fn has_perm_over_user(&mut self, min: Permission, username: &str) -> Result<()> {
        let mine = self.permission().await?;
        if !mine.satisfies(min, true) {
            return Err(denied(min, true));
        }
        if self.is_caller(username) {
            return Ok(());
        }
        let theirs = self.user_permission(username).await?;
        if theirs < mine {
            Ok(())
        } else {
            Err(ErrorKind::ActionNotPermitted
                .with_context(format!("{username:?} is not below {mine}")))
        }
    }

    /// Self-action always passes; anyone else goes through
    /// [`Transaction::has_perm_over_user`].
    pub async fn is_user_or_has_perm_over(&mut self, min: Permission, username: &str) -> Result<()> {
        if self.is_caller(username) {
            return Ok(());
        }
        self.has_perm_over_user(min, username).await
    }

    /// Fails with `ActionNotPermitted` for guests.
    pub(crate) fn require_signed_in(&self) -> Result<String> {
        self.session
            .username
            .clone()
            .ok_or_else(|| ErrorKind::ActionNotPermitted.with_context("sign in required"))
    }
}

fn denied(min: Permission, inclusive: bool) -> tb_core::error::AppError {
    let relation = if inclusive { "at least" } else { "above" };
    ErrorKind::ActionNotPermitted.with_context(format!("requires {relation} {min}"))
}
