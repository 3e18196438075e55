//! Session lifecycle: sign in/up/out, renewal, revocation and sweeping.

use chrono::{DateTime, TimeDelta, Utc};
use tb_core::error::{ErrorKind, Result};
use tb_core::models::Session;
use tb_core::permission::Permission;
use tb_core::validate;
use uuid::Uuid;

use crate::rows::{self, to_millis, DbResultExt, SESSION_COLUMNS, USER_COLUMNS};
use crate::transaction::Transaction;

impl Transaction<'_> {
    /// Binds this transaction to the session behind `token`, renewing its
    /// deadline when the grace window since the last (re)issue has passed.
    pub(crate) async fn resume_session(&mut self, token: &str) -> Result<()> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = ?");
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(self.conn())
            .await
            .db("look up session")?
            .ok_or(ErrorKind::SessionNotFound)?;
        let mut session = rows::session(&row)?;

        let now = Utc::now();
        if session.is_expired(now) {
            return Err(ErrorKind::SessionExpired.with_context(format!("session {}", session.id)));
        }

        let lifespan = self.config().lifespan();
        let issued = session
            .deadline
            .checked_sub_signed(lifespan)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if now - issued > self.config().grace() {
            let deadline = deadline_from(now, lifespan)?;
            sqlx::query("UPDATE sessions SET deadline = ? WHERE id = ?")
                .bind(to_millis(deadline))
                .bind(session.id)
                .execute(self.conn())
                .await
                .db("renew session")?;
            tracing::debug!(session = %session.id, %deadline, "session renewed");
            session.deadline = deadline;
        }

        self.session = session;
        Ok(())
    }

    /// Issues a new session for `username` and makes it the current one.
    /// Globally expired sessions are swept on the way.
    async fn create_session(&mut self, username: &str, user_agent: &str) -> Result<Session> {
        let now = Utc::now();
        let swept = sqlx::query("DELETE FROM sessions WHERE deadline <= ?")
            .bind(to_millis(now))
            .execute(self.conn())
            .await
            .db("sweep sessions")?
            .rows_affected();
        if swept > 0 {
            tracing::debug!(swept, "expired sessions removed");
        }

        let session = Session {
            id: Uuid::now_v7(),
            username: Some(username.to_owned()),
            token: self.credentials().generate_token()?,
            deadline: deadline_from(now, self.config().lifespan())?,
            user_agent: user_agent.to_owned(),
        };
        sqlx::query(
            "INSERT INTO sessions (id, username, token, deadline, user_agent) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session.id)
        .bind(&session.username)
        .bind(&session.token)
        .bind(to_millis(session.deadline))
        .bind(&session.user_agent)
        .execute(self.conn())
        .await
        .db("insert session")?;

        self.session = session.clone();
        Ok(session)
    }

    /// Verifies credentials and starts a session. Replaces any current one.
    pub async fn signin(&mut self, username: &str, password: &str, user_agent: &str) -> Result<Session> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(self.conn())
            .await
            .db("look up user")?
            .ok_or(ErrorKind::InvalidPassword)?;
        let user = rows::user(&row)?;

        if !self
            .credentials()
            .verify_password(password, &user.password_hash)
            .await?
        {
            return Err(ErrorKind::InvalidPassword.into());
        }

        if !self.session.is_guest() {
            self.signout().await?;
        }
        let session = self.create_session(&user.username, user_agent).await?;
        tracing::info!(username, session = %session.id, "signed in");
        Ok(session)
    }

    /// Creates an account gated by an invitation token and signs it in.
    pub async fn signup(
        &mut self,
        username: &str,
        password: &str,
        token: &str,
        user_agent: &str,
    ) -> Result<Session> {
        validate::username(username)?;
        validate::password(password, self.config())?;

        let taken = sqlx::query("SELECT 1 FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.conn())
            .await
            .db("check username")?
            .is_some();
        if taken {
            return Err(ErrorKind::UsernameTaken.with_context(format!("user {username:?}")));
        }

        let hash = self.credentials().hash_password(password).await?;
        self.use_token(token).await?;

        sqlx::query(
            "INSERT INTO users (username, joined_at, password_hash, permission) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(to_millis(Utc::now()))
        .bind(hash)
        .bind(Permission::User.level())
        .execute(self.conn())
        .await
        .unique_as(ErrorKind::UsernameTaken, "insert user")?;

        if !self.session.is_guest() {
            self.signout().await?;
        }
        let session = self.create_session(username, user_agent).await?;
        tracing::info!(username, "signed up");
        Ok(session)
    }

    /// Deletes the current session. A no-op for guests.
    pub async fn signout(&mut self) -> Result<()> {
        if self.session.is_guest() {
            return Ok(());
        }
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(self.session.id)
            .execute(self.conn())
            .await
            .db("delete session")?;
        tracing::debug!(session = %self.session.id, "signed out");
        self.session = Session::default();
        Ok(())
    }

    /// The caller's sessions, newest first.
    pub async fn sessions(&mut self) -> Result<Vec<Session>> {
        let username = self.require_signed_in()?;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE username = ? ORDER BY id DESC");
        sqlx::query(&sql)
            .bind(username)
            .fetch_all(self.conn())
            .await
            .db("list sessions")?
            .iter()
            .map(rows::session)
            .collect()
    }

    /// Revokes one of the caller's sessions; the current one means sign-out.
    pub async fn delete_session_id(&mut self, id: Uuid) -> Result<()> {
        if !self.session.is_guest() && id == self.session.id {
            return self.signout().await;
        }
        let username = self.require_signed_in()?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = ? AND username = ?")
            .bind(id)
            .bind(username)
            .execute(self.conn())
            .await
            .db("delete session")?
            .rows_affected();
        if deleted == 0 {
            return Err(ErrorKind::SessionNotFound.with_context(format!("session {id}")));
        }
        Ok(())
    }

    /// Revokes every session of the caller, the current one included.
    pub async fn delete_all_sessions(&mut self) -> Result<()> {
        let username = self.require_signed_in()?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE username = ?")
            .bind(&username)
            .execute(self.conn())
            .await
            .db("delete sessions")?
            .rows_affected();
        tracing::info!(username, deleted, "all sessions revoked");
        self.session = Session::default();
        Ok(())
    }
}

fn deadline_from(now: DateTime<Utc>, lifespan: TimeDelta) -> Result<DateTime<Utc>> {
    now.checked_add_signed(lifespan).ok_or_else(|| {
        ErrorKind::Internal.with_context(format!("session lifespan {lifespan} out of range"))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use tb_core::error::ErrorKind;
    use uuid::Uuid;

    use crate::rows::{from_millis, to_millis};
    use crate::testing::*;
    use crate::Database;

    async fn deadline_of(db: &Database, id: Uuid) -> Option<i64> {
        sqlx::query_scalar("SELECT deadline FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await
            .unwrap()
    }

    async fn set_deadline(db: &Database, id: Uuid, deadline: chrono::DateTime<Utc>) {
        sqlx::query("UPDATE sessions SET deadline = ? WHERE id = ?")
            .bind(to_millis(deadline))
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signin_rejects_bad_credentials() {
        let (_dir, db) = database().await;
        for (user, pass) in [(OWNER, "wrong-password"), ("nobody", PASSWORD)] {
            let err = db
                .acquire_guest(async |tx| tx.signin(user, pass, "agent").await)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPassword);
        }
    }

    #[tokio::test]
    async fn test_signin_sets_session() {
        let (_dir, db) = database().await;
        let (session, current) = db
            .acquire_guest(async |tx| {
                let s = tx.signin(OWNER, PASSWORD, "firefox").await?;
                Ok((s, tx.session().clone()))
            })
            .await
            .unwrap();
        assert_eq!(session.id, current.id);
        assert_eq!(session.username.as_deref(), Some(OWNER));
        assert_eq!(session.user_agent, "firefox");
        assert!(session.deadline > Utc::now());
    }

    #[tokio::test]
    async fn test_out_of_range_lifespan_fails_signin() {
        let mut config = config();
        config.session_lifespan = std::time::Duration::from_secs(8_500_000_000_000);
        let (_dir, db) = database_with(config).await;
        let err = db
            .acquire_guest(async |tx| tx.signin(OWNER, PASSWORD, "agent").await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_renewal_respects_grace_window() {
        let (_dir, db) = database().await;
        let session = signin(&db, OWNER, PASSWORD).await;
        let lifespan = db.config().lifespan();
        let grace = db.config().grace();

        // Issued just inside the grace window: untouched.
        let recent = Utc::now() + lifespan - grace / 2;
        set_deadline(&db, session.id, recent).await;
        db.acquire(&session.token, async |_| Ok(())).await.unwrap();
        assert_eq!(deadline_of(&db, session.id).await, Some(to_millis(recent)));

        // Issued well before the grace window: pushed to now + lifespan.
        let stale = Utc::now() + lifespan - grace * 2;
        set_deadline(&db, session.id, stale).await;
        let before = Utc::now();
        db.acquire(&session.token, async |_| Ok(())).await.unwrap();
        let renewed = from_millis(deadline_of(&db, session.id).await.unwrap()).unwrap();
        assert!(renewed >= before + lifespan - TimeDelta::seconds(1));
        assert!(renewed > stale);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected_and_removed() {
        let (_dir, db) = database().await;
        let session = signin(&db, OWNER, PASSWORD).await;
        set_deadline(&db, session.id, Utc::now() - TimeDelta::seconds(1)).await;

        let err = db
            .acquire(&session.token, async |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionExpired);
        assert_eq!(deadline_of(&db, session.id).await, None);

        let err = db
            .acquire(&session.token, async |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_new_session_sweeps_expired_ones() {
        let (_dir, db) = database().await;
        let old = signin(&db, OWNER, PASSWORD).await;
        set_deadline(&db, old.id, Utc::now() - TimeDelta::minutes(5)).await;

        signin(&db, OWNER, PASSWORD).await;
        assert_eq!(deadline_of(&db, old.id).await, None);
    }

    #[tokio::test]
    async fn test_signout_invalidates_token() {
        let (_dir, db) = database().await;
        let session = signin(&db, OWNER, PASSWORD).await;

        let after = db
            .acquire(&session.token, async |tx| {
                tx.signout().await?;
                Ok(tx.session().is_guest())
            })
            .await
            .unwrap();
        assert!(after);

        let err = db
            .acquire(&session.token, async |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_delete_session_by_id() {
        let (_dir, db) = database().await;
        let first = signin(&db, OWNER, PASSWORD).await;
        let second = signin(&db, OWNER, PASSWORD).await;

        let listed = db
            .acquire(&first.token, async |tx| {
                let listed = tx.sessions().await?;
                tx.delete_session_id(second.id).await?;
                Ok(listed)
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id, "newest first");
        assert_eq!(deadline_of(&db, second.id).await, None);

        let err = db
            .acquire(&first.token, async |tx| tx.delete_session_id(Uuid::now_v7()).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);

        // Current id redirects to sign-out.
        let guest = db
            .acquire(&first.token, async |tx| {
                let id = tx.session().id;
                tx.delete_session_id(id).await?;
                Ok(tx.session().is_guest())
            })
            .await
            .unwrap();
        assert!(guest);
        assert_eq!(deadline_of(&db, first.id).await, None);
    }

    #[tokio::test]
    async fn test_cannot_delete_someone_elses_session() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let bob = invite(&db, &owner, "bob").await;

        let err = db
            .acquire(&bob.token, async |tx| tx.delete_session_id(owner.id).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        assert!(deadline_of(&db, owner.id).await.is_some());
    }

    #[tokio::test]
    async fn test_delete_all_sessions() {
        let (_dir, db) = database().await;
        let a = signin(&db, OWNER, PASSWORD).await;
        let b = signin(&db, OWNER, PASSWORD).await;

        db.acquire(&a.token, async |tx| tx.delete_all_sessions().await)
            .await
            .unwrap();
        assert_eq!(deadline_of(&db, a.id).await, None);
        assert_eq!(deadline_of(&db, b.id).await, None);
    }

    #[tokio::test]
    async fn test_guest_has_no_sessions() {
        let (_dir, db) = database().await;
        let err = db
            .acquire_guest(async |tx| tx.sessions().await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionNotPermitted);
    }
}
