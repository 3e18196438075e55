//! # AppError
//!
//! Centralized error handling for the Tagboard core.
//! Every failure carries exactly one [`ErrorKind`] plus an optional context
//! string describing where it happened.

use std::fmt;

use thiserror::Error;

/// What went wrong, independent of where.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("action not permitted")]
    ActionNotPermitted,

    #[error("invalid permission level")]
    InvalidPermission,

    #[error("session expired")]
    SessionExpired,

    #[error("session not found")]
    SessionNotFound,

    /// Invitation token does not exist or has no uses left
    #[error("unknown token")]
    UnknownToken,

    #[error("requested uses exceed the allowed limit")]
    OverUseLimit,

    #[error("username already taken")]
    UsernameTaken,

    #[error("illegal username")]
    IllegalName,

    #[error("password too short")]
    PasswordTooShort,

    #[error("invalid username or password")]
    InvalidPassword,

    #[error("the owner account cannot be deleted")]
    OwnerAccountStays,

    #[error("user not found")]
    UserNotFound,

    #[error("post not found")]
    PostNotFound,

    #[error("tag already added")]
    TagAlreadyAdded,

    #[error("tag is empty")]
    EmptyTag,

    #[error("tag too long")]
    TagTooLong,

    #[error("page count out of range")]
    PageCountLimit,

    /// The unit of work ran past its deadline
    #[error("operation timed out")]
    Timeout,

    /// Infrastructure failure (e.g., I/O, constraint we did not expect)
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Attaches a human readable context to this kind.
    pub fn with_context(self, context: impl Into<String>) -> AppError {
        AppError {
            kind: self,
            context: context.into(),
            source: None,
        }
    }
}

/// The primary error type for all tb-core operations.
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    context: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AppError {
    /// Wraps a lower level failure as [`ErrorKind::Internal`].
    pub fn internal<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::Internal,
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Adds an outer context, keeping the kind.
    pub fn context_by(mut self, outer: impl fmt::Display) -> Self {
        self.context = if self.context.is_empty() {
            outer.to_string()
        } else {
            format!("{outer}: {}", self.context)
        };
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.context, self.kind)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: String::new(),
            source: None,
        }
    }
}

/// A specialized Result type for Tagboard logic.
pub type Result<T> = std::result::Result<T, AppError>;
