//! Mapping between SQLite rows and `tb-core` domain models.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tb_core::error::{AppError, ErrorKind, Result};
use tb_core::models::{Post, PostAttributes, PostTag, Session, Token, User};
use tb_core::permission::Permission;

pub(crate) const USER_COLUMNS: &str = "username, joined_at, password_hash, permission";
pub(crate) const SESSION_COLUMNS: &str = "id, username, token, deadline, user_agent";
pub(crate) const TOKEN_COLUMNS: &str = "token, creator, remaining";
pub(crate) const POST_COLUMNS: &str =
    "id, poster, content_type, permission, size, width, height, phash, created_at";

/// Translates storage failures into domain errors at the offending call.
pub(crate) trait DbResultExt<T> {
    fn db(self, context: &'static str) -> Result<T>;

    /// Like [`DbResultExt::db`], but a unique-key collision becomes `kind`.
    fn unique_as(self, kind: ErrorKind, context: &'static str) -> Result<T>;
}

impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn db(self, context: &'static str) -> Result<T> {
        self.map_err(|e| AppError::internal(context, e))
    }

    fn unique_as(self, kind: ErrorKind, context: &'static str) -> Result<T> {
        self.map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => kind.with_context(context),
            _ => AppError::internal(context, e),
        })
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| ErrorKind::Internal.with_context(format!("timestamp {ms} out of range")))
}

fn get<'r, T>(row: &'r SqliteRow, column: &'static str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).db(column)
}

/// Reads the stored permission; the owner override is applied by the caller.
pub(crate) fn user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        username: get(row, "username")?,
        joined_at: from_millis(get(row, "joined_at")?)?,
        password_hash: get(row, "password_hash")?,
        permission: Permission::from_level(get(row, "permission")?)?,
    })
}

pub(crate) fn session(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: get(row, "id")?,
        username: get(row, "username")?,
        token: get(row, "token")?,
        deadline: from_millis(get(row, "deadline")?)?,
        user_agent: get(row, "user_agent")?,
    })
}

pub(crate) fn token(row: &SqliteRow) -> Result<Token> {
    Ok(Token {
        token: get(row, "token")?,
        creator: get(row, "creator")?,
        remaining: get(row, "remaining")?,
    })
}

pub(crate) fn post(row: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: get(row, "id")?,
        poster: get(row, "poster")?,
        content_type: get(row, "content_type")?,
        permission: Permission::from_level(get(row, "permission")?)?,
        size: get(row, "size")?,
        attributes: PostAttributes {
            width: get(row, "width")?,
            height: get(row, "height")?,
            phash: get(row, "phash")?,
        },
        created_at: from_millis(get(row, "created_at")?)?,
    })
}

pub(crate) fn post_tag(row: &SqliteRow) -> Result<PostTag> {
    Ok(PostTag {
        post_id: get(row, "post_id")?,
        tag: get(row, "tag")?,
    })
}
