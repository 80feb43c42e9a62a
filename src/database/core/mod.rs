//! Core database infrastructure
//!
//! This module provides the foundation the provisioner runs against:
//! - `Connection`: target database name plus a shared `Executor`
//! - `Operation` / `Target`: the logical create requests and the objects they address
//! - `DbError`: backend failures, classified once at the executor boundary
//! - `SqliteExecutor` / `MemoryExecutor`: the bundled backends

mod connection;
mod error;
mod memory;
mod operation;
mod sqlite;

pub use connection::{Connection, Executor};
pub use error::{DbError, DbErrorKind};
pub use memory::MemoryExecutor;
pub use operation::{Operation, Target};
pub use sqlite::{index_name, SqliteExecutor, DOC_COLUMN};
