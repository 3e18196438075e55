//! Account lookup and management.

use tb_core::error::{ErrorKind, Result};
use tb_core::models::{Page, Session, User};
use tb_core::permission::Permission;
use tb_core::validate;
use uuid::Uuid;

use crate::rows::{self, DbResultExt, USER_COLUMNS};
use crate::transaction::Transaction;

impl Transaction<'_> {
    fn with_resolved(&self, mut user: User) -> User {
        user.permission = self.resolve(&user.username, user.permission);
        user
    }

    async fn find_user(&mut self, username: &str) -> Result<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(self.conn())
            .await
            .db("look up user")?
            .ok_or_else(|| ErrorKind::UserNotFound.with_context(format!("user {username:?}")))?;
        Ok(self.with_resolved(rows::user(&row)?))
    }

    pub async fn user(&mut self, username: &str) -> Result<User> {
        self.find_user(username).await
    }

    /// Newest accounts first.
    pub async fn users(&mut self, page: Page) -> Result<Vec<User>> {
        self.has_permission(Permission::User, true).await?;
        validate::page(page, self.config())?;
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY joined_at DESC, username LIMIT ? OFFSET ?"
        );
        let found = sqlx::query(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.conn())
            .await
            .db("list users")?;
        found
            .iter()
            .map(|row| rows::user(row).map(|u| self.with_resolved(u)))
            .collect()
    }

    /// Case-insensitive substring match on the username.
    pub async fn search_users(&mut self, query: &str, page: Page) -> Result<Vec<User>> {
        self.has_permission(Permission::User, true).await?;
        validate::page(page, self.config())?;
        let pattern = format!("%{}%", escape_like(query.trim()));
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username LIKE ? ESCAPE '\\' \
             ORDER BY username LIMIT ? OFFSET ?"
        );
        let found = sqlx::query(&sql)
            .bind(pattern)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.conn())
            .await
            .db("search users")?;
        found
            .iter()
            .map(|row| rows::user(row).map(|u| self.with_resolved(u)))
            .collect()
    }

    /// Sets `username`'s rank. The caller must rank strictly above the new
    /// level and strictly above the target.
    pub async fn promote_user(&mut self, username: &str, permission: Permission) -> Result<()> {
        if !permission.promotable() {
            return Err(ErrorKind::InvalidPermission.with_context(format!("cannot grant {permission}")));
        }
        if username == self.config().owner_username {
            return Err(ErrorKind::ActionNotPermitted.with_context("the owner's rank is fixed"));
        }
        self.has_permission(permission, false).await?;
        self.has_perm_over_user(Permission::Administrator, username)
            .await?;

        let updated = sqlx::query("UPDATE users SET permission = ? WHERE username = ?")
            .bind(permission.level())
            .bind(username)
            .execute(self.conn())
            .await
            .db("promote user")?
            .rows_affected();
        if updated == 0 {
            return Err(ErrorKind::UserNotFound.with_context(format!("user {username:?}")));
        }
        tracing::info!(by = ?self.caller(), username, %permission, "user promoted");
        Ok(())
    }

    /// Self-service requires `old`; administrators may reset weaker users
    /// without it. Every other session of the target is revoked.
    pub async fn change_password(&mut self, username: &str, old: Option<&str>, new: &str) -> Result<()> {
        self.is_user_or_has_perm_over(Permission::Administrator, username)
            .await?;
        validate::password(new, self.config())?;
        let user = self.find_user(username).await?;

        let keep = if self.is_caller(username) {
            let old = old.ok_or(ErrorKind::InvalidPassword)?;
            if !self
                .credentials()
                .verify_password(old, &user.password_hash)
                .await?
            {
                return Err(ErrorKind::InvalidPassword.into());
            }
            self.session.id
        } else {
            Uuid::nil()
        };

        let hash = self.credentials().hash_password(new).await?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE username = ?")
            .bind(hash)
            .bind(username)
            .execute(self.conn())
            .await
            .db("update password")?;
        let revoked = sqlx::query("DELETE FROM sessions WHERE username = ? AND id <> ?")
            .bind(username)
            .bind(keep)
            .execute(self.conn())
            .await
            .db("revoke sessions")?
            .rows_affected();
        tracing::info!(username, revoked, "password changed");
        Ok(())
    }

    /// Removes an account. Sessions and tokens go with it; posts are kept
    /// without a poster.
    pub async fn delete_user(&mut self, username: &str) -> Result<()> {
        if username == self.config().owner_username {
            return Err(ErrorKind::OwnerAccountStays.into());
        }
        self.is_user_or_has_perm_over(Permission::Administrator, username)
            .await?;

        let deleted = sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(self.conn())
            .await
            .db("delete user")?
            .rows_affected();
        if deleted == 0 {
            return Err(ErrorKind::UserNotFound.with_context(format!("user {username:?}")));
        }
        if self.is_caller(username) {
            self.session = Session::default();
        }
        tracing::info!(username, "user deleted");
        Ok(())
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use tb_core::error::ErrorKind;
    use tb_core::models::Page;
    use tb_core::permission::Permission;

    use super::escape_like;
    use crate::testing::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
    }

    #[tokio::test]
    async fn test_user_lookup_resolves_owner() {
        let (_dir, db) = database().await;
        let (owner, missing) = db
            .acquire_guest(async |tx| {
                let owner = tx.user(OWNER).await?;
                let missing = tx.user("ghost").await;
                Ok((owner, missing))
            })
            .await
            .unwrap();
        assert_eq!(owner.permission, Permission::Owner);
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::UserNotFound);
    }

    #[tokio::test]
    async fn test_listing_and_search() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        invite(&db, &owner, "bob").await;
        invite(&db, &owner, "bobby").await;
        invite(&db, &owner, "carol").await;

        let (all, bobs, paged) = db
            .acquire(&owner.token, async |tx| {
                let all = tx.users(Page::new(0, 10)).await?;
                let bobs = tx.search_users("BOB", Page::new(0, 10)).await?;
                let paged = tx.users(Page::new(1, 3)).await?;
                Ok((all, bobs, paged))
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        let names: Vec<_> = bobs.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["bob", "bobby"]);
        assert_eq!(paged.len(), 1);

        let err = db
            .acquire_guest(async |tx| tx.users(Page::new(0, 10)).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionNotPermitted);
        let err = db
            .acquire(&owner.token, async |tx| tx.users(Page::new(0, 1000)).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PageCountLimit);
    }

    #[tokio::test]
    async fn test_promotion_is_never_self_escalating() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let bob = invite(&db, &owner, "bob").await;
        db.acquire(&owner.token, async |tx| {
            tx.promote_user("bob", Permission::Administrator).await
        })
        .await
        .unwrap();

        for target in [Permission::Administrator, Permission::Trusted, Permission::User] {
            let result = db
                .acquire(&bob.token, async |tx| tx.promote_user("bob", target).await)
                .await;
            if target < Permission::Administrator {
                // Strictly below one's own rank: allowed (a self-demotion).
                result.unwrap();
                db.acquire(&owner.token, async |tx| {
                    tx.promote_user("bob", Permission::Administrator).await
                })
                .await
                .unwrap();
            } else {
                assert_eq!(result.unwrap_err().kind(), ErrorKind::ActionNotPermitted);
            }
        }

        let err = db
            .acquire(&owner.token, async |tx| tx.promote_user("bob", Permission::Owner).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPermission);
    }

    #[tokio::test]
    async fn test_admin_promotes_only_below_itself() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let admin = invite(&db, &owner, "admin").await;
        invite(&db, &owner, "bob").await;
        db.acquire(&owner.token, async |tx| {
            tx.promote_user("admin", Permission::Administrator).await
        })
        .await
        .unwrap();

        db.acquire(&admin.token, async |tx| tx.promote_user("bob", Permission::Trusted).await)
            .await
            .unwrap();
        let err = db
            .acquire(&admin.token, async |tx| {
                tx.promote_user("bob", Permission::Administrator).await
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionNotPermitted);

        let err = db
            .acquire(&admin.token, async |tx| tx.promote_user("ghost", Permission::User).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
    }

    #[tokio::test]
    async fn test_change_own_password_revokes_other_sessions() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let bob = invite(&db, &owner, "bob").await;
        let bob_elsewhere = signin(&db, "bob", PASSWORD).await;

        let err = db
            .acquire(&bob.token, async |tx| {
                tx.change_password("bob", Some("not-the-password"), "new-password").await
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPassword);

        db.acquire(&bob.token, async |tx| {
            tx.change_password("bob", Some(PASSWORD), "new-password").await
        })
        .await
        .unwrap();

        // The session that changed the password survives, the other does not.
        db.acquire(&bob.token, async |_| Ok(())).await.unwrap();
        let err = db
            .acquire(&bob_elsewhere.token, async |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        signin(&db, "bob", "new-password").await;
    }

    #[tokio::test]
    async fn test_admin_resets_password_of_weaker_user() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let bob = invite(&db, &owner, "bob").await;
        invite(&db, &owner, "carol").await;

        db.acquire(&owner.token, async |tx| {
            tx.change_password("bob", None, "reset-by-owner").await
        })
        .await
        .unwrap();
        let err = db.acquire(&bob.token, async |_| Ok(())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        let bob = signin(&db, "bob", "reset-by-owner").await;

        let err = db
            .acquire(&bob.token, async |tx| {
                tx.change_password("carol", None, "hijacked-pass").await
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionNotPermitted);
    }

    #[tokio::test]
    async fn test_owner_account_stays() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let err = db
            .acquire(&owner.token, async |tx| tx.delete_user(OWNER).await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OwnerAccountStays);
    }

    #[tokio::test]
    async fn test_delete_self_signs_out() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let bob = invite(&db, &owner, "bob").await;

        let guest = db
            .acquire(&bob.token, async |tx| {
                tx.delete_user("bob").await?;
                Ok(tx.session().is_guest())
            })
            .await
            .unwrap();
        assert!(guest);
        let err = db.acquire(&bob.token, async |_| Ok(())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_user_cannot_delete_others() {
        let (_dir, db) = database().await;
        let owner = signin(&db, OWNER, PASSWORD).await;
        let bob = invite(&db, &owner, "bob").await;
        invite(&db, &owner, "carol").await;

        let err = db
            .acquire(&bob.token, async |tx| tx.delete_user("carol").await)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionNotPermitted);
    }
}
