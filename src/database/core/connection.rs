//! Database connection handle
//!
//! A [`Connection`] pairs the name of the target database with the
//! request-execution primitive of some backend. Provisioning borrows it and
//! hands the very same handle back to the caller.

use super::error::DbError;
use super::operation::{Operation, Target};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Request-execution primitive of a database backend
///
/// Implementations classify every driver failure into a [`DbError`] before
/// returning it.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a single create operation
    async fn run(&self, op: &Operation<'_>) -> Result<(), DbError>;

    /// Check whether an object is present
    async fn exists(&self, target: &Target<'_>) -> Result<bool, DbError>;

    /// Primary key of an existing table, `None` if the table is absent
    async fn primary_key(&self, database: &str, table: &str) -> Result<Option<String>, DbError>;
}

/// Handle to a target database on some backend
#[derive(Clone)]
pub struct Connection {
    database: String,
    executor: Arc<dyn Executor>,
}

impl Connection {
    pub fn new(database: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            database: database.into(),
            executor,
        }
    }

    /// Name of the target database
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    pub async fn run(&self, op: &Operation<'_>) -> Result<(), DbError> {
        self.executor.run(op).await
    }

    pub async fn exists(&self, target: &Target<'_>) -> Result<bool, DbError> {
        self.executor.exists(target).await
    }

    pub async fn primary_key(&self, table: &str) -> Result<Option<String>, DbError> {
        self.executor.primary_key(&self.database, table).await
    }

    /// Whether two handles share the same backend and target database
    pub fn same_as(&self, other: &Connection) -> bool {
        self.database == other.database && Arc::ptr_eq(&self.executor, &other.executor)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}
