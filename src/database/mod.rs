//! Database module
//!
//! Everything the provisioner needs to talk to a backend.
//!
//! # Architecture
//!
//! ```text
//! database/
//! └── core/           # Foundation
//!     ├── connection  # Connection handle and the Executor trait
//!     ├── operation   # Create requests and object addressing
//!     ├── error       # DbError / DbErrorKind classification
//!     ├── sqlite      # SQLite executor (attached schemas, JSON document tables)
//!     └── memory      # In-memory executor with fault injection
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablewright::database::{Connection, SqliteExecutor};
//!
//! let executor = SqliteExecutor::open_in_dir("~/.tablewright")?;
//! let conn = Connection::new("app", Arc::new(executor));
//! ```

pub mod core;

pub use self::core::{
    index_name, Connection, DbError, DbErrorKind, Executor, MemoryExecutor, Operation,
    SqliteExecutor, Target, DOC_COLUMN,
};

