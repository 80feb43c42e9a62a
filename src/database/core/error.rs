//! Backend error classification
//!
//! Every executor converts the error it receives from its driver into a
//! [`DbError`] exactly once. Everything above the executor only looks at
//! [`DbErrorKind`].

use std::fmt;

/// Message fragment reported when the target object is already present
const ALREADY_EXISTS: &str = "already exists";

/// Message fragment reported when no primary replica can serve the write
const NO_MASTER_AVAILABLE: &str = "No master available";

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// The database, table or index is already present
    AlreadyExists,

    /// Transient: the backend cannot serve the write right now
    Unavailable,

    /// Anything else; never recovered by the provisioner
    Other,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbErrorKind::AlreadyExists => write!(f, "already exists"),
            DbErrorKind::Unavailable => write!(f, "unavailable"),
            DbErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Error returned by an [`Executor`](super::Executor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    kind: DbErrorKind,
    message: String,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a driver error that only carries a message
    ///
    /// ```
    /// use tablewright::database::{DbError, DbErrorKind};
    ///
    /// let err = DbError::from_message("Table `app.users` already exists.");
    /// assert_eq!(err.kind(), DbErrorKind::AlreadyExists);
    ///
    /// let err = DbError::from_message("No master available for `app.users`.");
    /// assert_eq!(err.kind(), DbErrorKind::Unavailable);
    /// ```
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.contains(ALREADY_EXISTS) {
            DbErrorKind::AlreadyExists
        } else if message.contains(NO_MASTER_AVAILABLE) {
            DbErrorKind::Unavailable
        } else {
            DbErrorKind::Other
        };
        Self { kind, message }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::AlreadyExists, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Unavailable, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Other, message)
    }

    pub fn kind(&self) -> DbErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == DbErrorKind::AlreadyExists
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == DbErrorKind::Unavailable
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DbError {}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return Self::unavailable(err.to_string());
            }
        }
        Self::from_message(err.to_string())
    }
}
