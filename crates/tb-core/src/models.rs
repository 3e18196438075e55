//! # Domain Models
//!
//! These structs represent the core entities of Tagboard.
//! We use UUID v7 for time-ordered, globally unique identification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permission::Permission;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub joined_at: DateTime<Utc>,
    /// PHC string produced by the credential provider
    #[serde(skip)]
    pub password_hash: String,
    pub permission: Permission,
}

/// A token-identified binding of requests to a principal.
///
/// The default value (nil id, no username) is the guest session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub deadline: DateTime<Utc>,
    pub user_agent: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            username: None,
            token: String::new(),
            deadline: DateTime::<Utc>::default(),
            user_agent: String::new(),
        }
    }
}

impl Session {
    pub fn is_guest(&self) -> bool {
        self.id.is_nil()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// An invitation credential that gates account creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub creator: String,
    /// Uses left; `-1` means unlimited
    pub remaining: i64,
}

impl Token {
    pub const UNLIMITED: i64 = -1;

    pub fn is_unlimited(&self) -> bool {
        self.remaining == Self::UNLIMITED
    }
}

/// Optional media attributes recorded by the upload pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAttributes {
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Perceptual hash
    pub phash: Option<i64>,
}

/// An uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    /// `None` once the poster account is deleted
    pub poster: Option<String>,
    pub content_type: String,
    /// Highest principal level the post is still shown to
    pub permission: Permission,
    pub size: i64,
    pub attributes: PostAttributes,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// The single visibility predicate shared by every read path.
    pub fn visible_to(&self, username: Option<&str>, permission: Permission) -> bool {
        let own = matches!((self.poster.as_deref(), username), (Some(p), Some(u)) if p == u);
        own || permission <= self.permission
    }
}

/// Input for `save_post`; id, poster and timestamp are assigned on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub content_type: String,
    pub permission: Permission,
    pub size: i64,
    #[serde(default)]
    pub attributes: PostAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTag {
    pub post_id: Uuid,
    pub tag: String,
}

/// Offset pagination, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: u32,
    pub count: u32,
}

impl Page {
    pub fn new(index: u32, count: u32) -> Self {
        Self { index, count }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.index) * i64::from(self.count)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.count)
    }
}
