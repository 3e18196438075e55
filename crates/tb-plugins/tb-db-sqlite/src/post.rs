//! Posts and their tags. Every read path filters by the same visibility
//! predicate as [`Post::visible_to`].

use chrono::Utc;
use tb_core::error::{ErrorKind, Result};
use tb_core::models::{NewPost, Page, Post, PostTag};
use tb_core::permission::Permission;
use tb_core::validate;
use uuid::Uuid;

use crate::rows::{self, to_millis, DbResultExt, POST_COLUMNS};
use crate::transaction::Transaction;

/// `?1` is the caller's username (NULL for guests), `?2` their level.
const VISIBLE: &str = "(poster = ?1 OR ?2 <= permission)";

impl Transaction<'_> {
    async fn viewer(&mut self) -> Result<(Option<String>, Permission)> {
        let permission = self.permission().await?;
        Ok((self.session.username.clone(), permission))
    }

    /// Uploads are attributed to the caller, who may not exceed their own rank.
    pub async fn save_post(&mut self, new: NewPost) -> Result<Post> {
        self.has_permission(Permission::User, true).await?;
        self.has_permission(new.permission, true).await?;
        let poster = self.require_signed_in()?;

        let post = Post {
            id: Uuid::now_v7(),
            poster: Some(poster),
            content_type: new.content_type,
            permission: new.permission,
            size: new.size,
            attributes: new.attributes,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO posts \
                (id, poster, content_type, permission, size, width, height, phash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(post.id)
        .bind(&post.poster)
        .bind(&post.content_type)
        .bind(post.permission.level())
        .bind(post.size)
        .bind(post.attributes.width)
        .bind(post.attributes.height)
        .bind(post.attributes.phash)
        .bind(to_millis(post.created_at))
        .execute(self.conn())
        .await
        .db("insert post")?;
        tracing::debug!(post = %post.id, poster = ?post.poster, "post saved");
        Ok(post)
    }

    /// `PostNotFound` covers both missing and invisible posts.
    pub async fn post(&mut self, id: Uuid) -> Result<Post> {
        let (username, permission) = self.viewer().await?;
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE {VISIBLE} AND id = ?3");
        let row = sqlx::query(&sql)
            .bind(username)
            .bind(permission.level())
            .bind(id)
            .fetch_optional(self.conn())
            .await
            .db("look up post")?
            .ok_or_else(|| ErrorKind::PostNotFound.with_context(format!("post {id}")))?;
        rows::post(&row)
    }

    /// Newest first.
    pub async fn posts(&mut self, page: Page) -> Result<Vec<Post>> {
        validate::page(page, self.config())?;
        let (username, permission) = self.viewer().await?;
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE {VISIBLE} ORDER BY id DESC LIMIT ?3 OFFSET ?4"
        );
        sqlx::query(&sql)
            .bind(username)
            .bind(permission.level())
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.conn())
            .await
            .db("list posts")?
            .iter()
            .map(rows::post)
            .collect()
    }

    /// Posts carrying every one of `tags`, newest first.
    pub async fn post_search(&mut self, tags: &[String], page: Page) -> Result<Vec<Post>> {
        validate::page(page, self.config())?;
        let mut wanted: Vec<&str> = Vec::with_capacity(tags.len());
        for tag in tags {
            let tag = validate::tag(tag, self.config())?;
            if !wanted.iter().any(|w| w.eq_ignore_ascii_case(tag)) {
                wanted.push(tag);
            }
        }
        if wanted.is_empty() {
            return self.posts(page).await;
        }

        let (username, permission) = self.viewer().await?;
        let placeholders = vec!["?"; wanted.len()].join(", ");
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE {VISIBLE} AND id IN ( \
                SELECT post_id FROM post_tags WHERE tag IN ({placeholders}) \
                GROUP BY post_id HAVING COUNT(*) = ? \
             ) ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query(&sql).bind(username).bind(permission.level());
        for tag in &wanted {
            query = query.bind(*tag);
        }
        query
            .bind(wanted.len() as i64)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.conn())
            .await
            .db("search posts")?
            .iter()
            .map(rows::post)
            .collect()
    }

    pub async fn post_tags(&mut self, id: Uuid) -> Result<Vec<PostTag>> {
        self.post(id).await?;
        sqlx::query("SELECT post_id, tag FROM post_tags WHERE post_id = ? ORDER BY tag")
            .bind(id)
            .fetch_all(self.conn())
            .await
            .db("list tags")?
            .iter()
            .map(rows::post_tag)
            .collect()
    }

    /// Edits go to the poster or to an administrator ranking above them;
    /// orphaned posts need an administrator.
    async fn authorize_post_edit(&mut self, post: &Post) -> Result<()> {
        match &post.poster {
            Some(poster) => {
                self.is_user_or_has_perm_over(Permission::Administrator, poster)
                    .await
            }
            None => self.has_permission(Permission::Administrator, true).await,
        }
    }

    pub async fn delete_post(&mut self, id: Uuid) -> Result<()> {
        let post = self.post(id).await?;
        self.authorize_post_edit(&post).await?;

        let deleted = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(self.conn())
            .await
            .db("delete post")?
            .rows_affected();
        if deleted == 0 {
            return Err(ErrorKind::PostNotFound.with_context(format!("post {id}")));
        }
        tracing::info!(post = %id, by = ?self.caller(), "post deleted");
        Ok(())
    }

    /// Own posts may be set up to the caller's rank; anyone else's only
    /// below it, and only when the poster ranks below the caller.
    pub async fn set_post_permission(&mut self, id: Uuid, permission: Permission) -> Result<()> {
        let post = self.post(id).await?;
        match post.poster.as_deref() {
            Some(poster) if self.is_caller(poster) => {
                self.has_permission(permission, true).await?;
            }
            Some(poster) => {
                self.has_permission(permission, false).await?;
                let mine = self.permission().await?;
                let theirs = self.user_permission(poster).await?;
                if theirs >= mine {
                    return Err(ErrorKind::ActionNotPermitted
                        .with_context(format!("{poster:?} is not below {mine}")));
                }
            }
            None => {
                self.has_permission(Permission::Administrator, true).await?;
                self.has_permission(permission, false).await?;
            }
        }

        let updated = sqlx::query("UPDATE posts SET permission = ? WHERE id = ?")
            .bind(permission.level())
            .bind(id)
            .execute(self.conn())
            .await
            .db("update post permission")?
            .rows_affected();
        if updated == 0 {
            return Err(ErrorKind::PostNotFound.with_context(format!("post {id}")));
        }
        Ok(())
    }

    pub async fn tag_post(&mut self, id: Uuid, tag: &str) -> Result<()> {
        let tag = validate::tag(tag, self.config())?;
        let post = self.post(id).await?;
        self.authorize_post_edit(&post).await?;

        sqlx::query("INSERT INTO post_tags (post_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(self.conn())
            .await
            .unique_as(ErrorKind::TagAlreadyAdded, "tag post")?;
        Ok(())
    }

    /// Removing a tag the post does not carry is a no-op.
    pub async fn untag_post(&mut self, id: Uuid, tag: &str) -> Result<()> {
        let tag = validate::tag(tag, self.config())?;
        let post = self.post(id).await?;
        self.authorize_post_edit(&post).await?;

        sqlx::query("DELETE FROM post_tags WHERE post_id = ? AND tag = ?")
            .bind(id)
            .bind(tag)
            .execute(self.conn())
            .await
            .db("untag post")?;
        Ok(())
    }
}
