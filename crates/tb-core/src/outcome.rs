//! Boundary result type consumed by the transport layer.
//!
//! The core decides what happened; the transport only maps it to a status
//! code and, for redirects, persists the session it carries.

use crate::error::{AppError, ErrorKind, Result};
use crate::models::Session;

/// "Has a status code" capability.
pub trait StatusCode {
    fn status_code(&self) -> u16;
}

impl StatusCode for ErrorKind {
    fn status_code(&self) -> u16 {
        match self {
            ErrorKind::ActionNotPermitted
            | ErrorKind::UnknownToken
            | ErrorKind::OwnerAccountStays => 403,
            ErrorKind::SessionExpired
            | ErrorKind::SessionNotFound
            | ErrorKind::InvalidPassword => 401,
            ErrorKind::UserNotFound | ErrorKind::PostNotFound => 404,
            ErrorKind::UsernameTaken | ErrorKind::TagAlreadyAdded => 409,
            ErrorKind::InvalidPermission
            | ErrorKind::OverUseLimit
            | ErrorKind::IllegalName
            | ErrorKind::PasswordTooShort
            | ErrorKind::EmptyTag
            | ErrorKind::TagTooLong
            | ErrorKind::PageCountLimit => 400,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }
}

impl StatusCode for AppError {
    fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// Navigate elsewhere; `session` is set when the unit of work changed
    /// the caller's session and the transport must persist it.
    Redirect {
        location: String,
        session: Option<Session>,
    },
    Failure(AppError),
}

impl<T> Outcome<T> {
    pub fn redirect(location: impl Into<String>) -> Self {
        Outcome::Redirect {
            location: location.into(),
            session: None,
        }
    }

    pub fn redirect_with_session(location: impl Into<String>, session: Session) -> Self {
        Outcome::Redirect {
            location: location.into(),
            session: Some(session),
        }
    }
}

impl<T> StatusCode for Outcome<T> {
    fn status_code(&self) -> u16 {
        match self {
            Outcome::Success(_) => 200,
            Outcome::Redirect { .. } => 303,
            Outcome::Failure(err) => err.status_code(),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}
