//! SQLite executor
//!
//! Maps the logical schema operations onto SQLite:
//!
//! - a *database* is an attached schema, stored as `<data_dir>/<name>.sqlite3`
//!   (or an attached in-memory schema when no data directory is configured);
//! - a *table* is a document table with the declared primary-key column and a
//!   JSON `doc` column;
//! - an *index* is an expression index over `json_extract(doc, ...)`, named
//!   `<table>__<index>` since SQLite index names are schema-wide.
//!
//! SQLite compares object names case-insensitively and `<table>__<index>` is
//! ambiguous, so two declared objects can land on one SQLite name. An
//! already-exists report only counts when the stored object is exactly the
//! declared one; any other clash is an error.
//!
//! SQLite calls are blocking, so every request runs on tokio's blocking pool.

use super::connection::Executor;
use super::error::DbError;
use super::operation::{Operation, Target};
use crate::schema::IndexDefinition;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Name of the JSON document column every table carries
pub const DOC_COLUMN: &str = "doc";

/// File extension of per-database SQLite files
const DB_FILE_EXTENSION: &str = "sqlite3";

/// SQLite-backed [`Executor`]
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
    data_dir: Option<PathBuf>,
}

/// Work to perform on the blocking pool
enum Request {
    CreateDatabase {
        name: String,
        path: Option<PathBuf>,
    },
    CreateTable {
        database: String,
        table: String,
        sql: String,
    },
    CreateIndex {
        database: String,
        table: String,
        index: String,
        definition: IndexDefinition,
    },
}

impl SqliteExecutor {
    /// Open an executor
    ///
    /// If `data_dir` is `None`, databases are attached in memory and vanish
    /// with the executor. `busy_timeout` bounds how long SQLite waits on a lock
    /// before the request is reported as unavailable.
    pub fn open(data_dir: Option<&Path>, busy_timeout: Duration) -> Result<Self> {
        if let Some(dir) = data_dir {
            std::fs::create_dir_all(dir).map_err(|e| {
                anyhow!("Failed to create data directory '{}': {}", dir.display(), e)
            })?;
        }

        let conn = Connection::open_in_memory()
            .map_err(|e| anyhow!("Failed to create SQLite connection: {}", e))?;
        Self::configure(&conn, busy_timeout)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            data_dir: data_dir.map(Path::to_path_buf),
        })
    }

    /// Open an executor storing databases under `dir`
    pub fn open_in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(Some(dir.as_ref()), Duration::ZERO)
    }

    /// Open an executor whose databases live in memory
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None, Duration::ZERO)
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Path of the file backing `database`, if file-backed
    pub fn database_path(&self, database: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", database, DB_FILE_EXTENSION)))
    }

    /// Attach `database` only if its file already exists
    ///
    /// Lets callers inspect an existing database without creating one.
    /// Returns whether the database is attached afterwards.
    pub async fn attach_existing(&self, database: &str) -> Result<bool> {
        check_database_name(database)?;
        let Some(path) = self.database_path(database) else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        let name = database.to_string();
        let result = self
            .with_conn(move |conn| attach_database(conn, &name, Some(path.as_path())))
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => Ok(true),
            Err(e) => Err(anyhow!("Failed to attach database '{}': {}", database, e)),
        }
    }

    fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| anyhow!("Failed to set busy timeout: {}", e))?;

        // Store temp tables in memory
        conn.execute("PRAGMA temp_store=MEMORY", [])
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;

        conn.execute("PRAGMA foreign_keys=ON", [])
            .map_err(|e| anyhow!("Failed to enable foreign keys: {}", e))?;

        Ok(())
    }

    /// Run `f` against the shared connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DbError::other("SQLite connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| DbError::other(format!("SQLite task failed: {}", e)))?
    }

    fn request(&self, op: &Operation<'_>) -> Result<Request, DbError> {
        match *op {
            Operation::CreateDatabase { name } => {
                check_database_name(name)?;
                Ok(Request::CreateDatabase {
                    name: name.to_string(),
                    path: self.database_path(name),
                })
            }
            Operation::CreateTable {
                database,
                table,
                primary_key,
            } => {
                if primary_key == DOC_COLUMN {
                    return Err(DbError::other(format!(
                        "Primary key of table \"{}\" clashes with the document column",
                        table
                    )));
                }
                Ok(Request::CreateTable {
                    database: database.to_string(),
                    table: table.to_string(),
                    sql: create_table_sql(database, table, primary_key),
                })
            }
            Operation::CreateIndex {
                database,
                table,
                index,
                definition,
            } => Ok(Request::CreateIndex {
                database: database.to_string(),
                table: table.to_string(),
                index: index.to_string(),
                definition: definition.clone(),
            }),
        }
    }
}

#[async_trait]
impl Executor for SqliteExecutor {
    async fn run(&self, op: &Operation<'_>) -> Result<(), DbError> {
        debug!("sqlite: {}", op);
        let request = self.request(op)?;

        self.with_conn(move |conn| match request {
            Request::CreateDatabase { name, path } => {
                attach_database(conn, &name, path.as_deref())
            }
            Request::CreateTable {
                database,
                table,
                sql,
            } => create_object(conn, &sql, &database, "table", &table, &table),
            Request::CreateIndex {
                database,
                table,
                index,
                definition,
            } => {
                // indexes over the primary key use the column directly
                let primary_key = table_primary_key(conn, &database, &table)?;
                let sql = create_index_sql(
                    &database,
                    &table,
                    &index,
                    &definition,
                    primary_key.as_deref(),
                );
                let name = index_name(&table, &index);
                create_object(conn, &sql, &database, "index", &name, &table)
            }
        })
        .await
    }

    async fn exists(&self, target: &Target<'_>) -> Result<bool, DbError> {
        let (database, object) = match *target {
            Target::Database { name } => (name.to_string(), None),
            Target::Table { database, table } => (
                database.to_string(),
                Some(("table", table.to_string(), table.to_string())),
            ),
            Target::Index {
                database,
                table,
                index,
            } => (
                database.to_string(),
                Some(("index", index_name(table, index), table.to_string())),
            ),
        };

        self.with_conn(move |conn| {
            if !is_attached(conn, &database)? {
                return Ok(false);
            }
            match object {
                None => Ok(true),
                Some((kind, name, table)) => object_exists(conn, &database, kind, &name, &table),
            }
        })
        .await
    }

    async fn primary_key(&self, database: &str, table: &str) -> Result<Option<String>, DbError> {
        let database = database.to_string();
        let table = table.to_string();
        self.with_conn(move |conn| table_primary_key(conn, &database, &table))
            .await
    }
}

fn check_database_name(name: &str) -> Result<(), DbError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DbError::other(format!("Invalid database name \"{}\"", name)))
    }
}

/// Quote an SQL identifier
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Schema-wide index name for `table.index`
pub fn index_name(table: &str, index: &str) -> String {
    format!("{}__{}", table, index)
}

fn create_table_sql(database: &str, table: &str, primary_key: &str) -> String {
    format!(
        "CREATE TABLE {}.{} ({} TEXT PRIMARY KEY NOT NULL, {} TEXT NOT NULL DEFAULT '{{}}')",
        quote_ident(database),
        quote_ident(table),
        quote_ident(primary_key),
        quote_ident(DOC_COLUMN),
    )
}

/// SQL expression extracting `path` from a document row
fn field_expr(path: &str, primary_key: Option<&str>) -> String {
    if Some(path) == primary_key {
        return quote_ident(path);
    }
    format!(
        "json_extract({}, '$.{}')",
        quote_ident(DOC_COLUMN),
        path.replace('\'', "''")
    )
}

fn create_index_sql(
    database: &str,
    table: &str,
    index: &str,
    definition: &IndexDefinition,
    primary_key: Option<&str>,
) -> String {
    let columns = match definition {
        IndexDefinition::Field(path) => field_expr(path, primary_key),
        IndexDefinition::Compound(paths) => paths
            .iter()
            .map(|p| field_expr(p, primary_key))
            .collect::<Vec<_>>()
            .join(", "),
        IndexDefinition::Expression { expression } => expression.clone(),
    };
    format!(
        "CREATE INDEX {}.{} ON {} ({})",
        quote_ident(database),
        quote_ident(&index_name(table, index)),
        quote_ident(table),
        columns
    )
}

fn is_attached(conn: &Connection, database: &str) -> Result<bool, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_database_list WHERE name = ?1",
        [database],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether `name` exists with exactly this spelling and belongs to `table`
///
/// A table belongs to itself.
fn object_exists(
    conn: &Connection,
    database: &str,
    kind: &str,
    name: &str,
    table: &str,
) -> Result<bool, DbError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = ?1 AND name = ?2 AND tbl_name = ?3",
        quote_ident(database)
    );
    let count: i64 = conn.query_row(&sql, [kind, name, table], |row| row.get(0))?;
    Ok(count > 0)
}

/// Stored spelling and owning table of the object SQLite matches to `name`
fn stored_object(
    conn: &Connection,
    database: &str,
    kind: &str,
    name: &str,
) -> Result<Option<(String, String)>, DbError> {
    let sql = format!(
        "SELECT name, tbl_name FROM {}.sqlite_master WHERE type = ?1 AND name = ?2 COLLATE NOCASE",
        quote_ident(database)
    );
    let stored = conn
        .query_row(&sql, [kind, name], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    Ok(stored)
}

/// Run a CREATE statement for `name`, owned by `table`
///
/// Already-exists is only reported when the existing object is the one
/// declared; a different object holding the name is [`DbErrorKind::Other`].
///
/// [`DbErrorKind::Other`]: super::error::DbErrorKind::Other
fn create_object(
    conn: &Connection,
    sql: &str,
    database: &str,
    kind: &str,
    name: &str,
    table: &str,
) -> Result<(), DbError> {
    let err = match conn.execute(sql, []) {
        Ok(_) => return Ok(()),
        Err(e) => DbError::from(e),
    };
    if !err.is_already_exists() {
        return Err(err);
    }

    match stored_object(conn, database, kind, name)? {
        Some((stored, owner)) if stored != name || owner != table => Err(DbError::other(format!(
            "{} \"{}\" on table \"{}\" collides with existing {} \"{}\" on table \"{}\"",
            kind, name, table, kind, stored, owner
        ))),
        _ => Err(err),
    }
}

fn table_primary_key(
    conn: &Connection,
    database: &str,
    table: &str,
) -> Result<Option<String>, DbError> {
    if !is_attached(conn, database)? || !object_exists(conn, database, "table", table, table)? {
        return Ok(None);
    }
    let pk = conn
        .query_row(
            "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk = 1",
            [table, database],
            |row| row.get(0),
        )
        .optional()?;
    Ok(pk)
}

fn attach_database(conn: &Connection, name: &str, path: Option<&Path>) -> Result<(), DbError> {
    if is_attached(conn, name)? {
        return Err(DbError::already_exists(format!(
            "Database `{}` already exists.",
            name
        )));
    }

    let (file, existed) = match path {
        Some(p) => (p.to_string_lossy().to_string(), p.exists()),
        None => (":memory:".to_string(), false),
    };

    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {}", quote_ident(name)),
        [&file],
    )?;

    if path.is_some() {
        // Enable WAL mode for better concurrent read/write performance
        let _: String = conn.query_row(
            &format!("PRAGMA {}.journal_mode=WAL", quote_ident(name)),
            [],
            |row| row.get(0),
        )?;
    }

    if existed {
        // attached for this session, but the database itself was already there
        return Err(DbError::already_exists(format!(
            "Database `{}` already exists.",
            name
        )));
    }
    Ok(())
}
