#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Tablewright - idempotent schema provisioning
//!
//! Tablewright makes sure a database, a fixed set of tables (each with its
//! primary key) and the tables' secondary indexes exist. It is meant to run
//! once at service startup against a live connection, and hands that
//! connection back once everything is in place. Running it again is a no-op.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Provisioning library, SQLite and in-memory backends | `rusqlite`, `tokio` |
//! | `display` | Table formatting of reports with `tabled` | `tabled` |
//! | `cli` | The `tablewright` binary | All above + `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`database`]**: connection handle, `Executor` trait, error classification,
//!   SQLite and in-memory executors
//! - **[`schema`]**: the static schema declaration (tables, primary keys, indexes)
//! - **[`provision`]**: the provisioner (database → tables → indexes), retry
//!   policy, report and status check
//! - **[`config`]**: configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablewright::*;
//!
//! let schema = SchemaDeclaration::new().table(
//!     "users",
//!     TableSpec::new("id").index("byEmail", IndexDefinition::field("email")),
//! );
//!
//! let executor = SqliteExecutor::open_in_dir("/var/lib/app")?;
//! let conn = Connection::new("app", Arc::new(executor));
//!
//! // creates what is missing, logs what already exists
//! let conn = provision(conn, &schema).await?;
//! ```

pub mod config;
pub mod database;
pub mod provision;
pub mod schema;
pub mod utils;

pub use crate::config::TablewrightConfig;
pub use crate::database::{
    Connection, DbError, DbErrorKind, Executor, MemoryExecutor, Operation, SqliteExecutor, Target,
};
pub use crate::provision::{
    check_status, provision, provision_with_policy, Backoff, ObjectKind, Outcome,
    ProvisionReport, Provisioner, ReportEntry, RetryPolicy, SchemaStatus,
};
pub use crate::schema::{IndexDefinition, SchemaDeclaration, TableSpec};
pub use crate::utils::OutputFormat;
