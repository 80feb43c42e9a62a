//! Schema provisioning
//!
//! Idempotently brings a target database up to a [`SchemaDeclaration`]:
//!
//! 1. create the database (already-exists is success, nothing is retried);
//! 2. create every declared table concurrently;
//! 3. once a table is present (created or already there), create each of its
//!    indexes concurrently.
//!
//! Table and index creation retry on [`DbErrorKind::Unavailable`] according
//! to a [`RetryPolicy`]. Any other failure aborts the whole run; the first
//! unrecovered error is returned and the remaining in-flight requests are
//! dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tablewright::database::{Connection, SqliteExecutor};
//! use tablewright::provision::provision;
//! use tablewright::schema::{IndexDefinition, SchemaDeclaration, TableSpec};
//!
//! let schema = SchemaDeclaration::new().table(
//!     "users",
//!     TableSpec::new("id").index("byEmail", IndexDefinition::field("email")),
//! );
//! let conn = Connection::new("app", Arc::new(SqliteExecutor::open_in_memory()?));
//! let conn = provision(conn, &schema).await?;
//! ```

mod report;
mod retry;
mod status;

pub use report::{ObjectKind, Outcome, ProvisionReport, ReportEntry};
pub use retry::{Backoff, RetryPolicy, DEFAULT_RETRY_DELAY};
pub use status::{check_status, SchemaStatus};

use crate::database::{Connection, DbError, DbErrorKind, Operation};
use crate::schema::{IndexDefinition, SchemaDeclaration, TableSpec};
use anyhow::{anyhow, Result};
use futures::future::try_join_all;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Provision `schema` on `conn` with the default retry policy
///
/// Resolves with the same connection once everything exists.
pub async fn provision(conn: Connection, schema: &SchemaDeclaration) -> Result<Connection> {
    let (conn, _) = Provisioner::new(conn, schema).run().await?;
    Ok(conn)
}

/// Provision `schema` on `conn` with a custom retry policy
pub async fn provision_with_policy(
    conn: Connection,
    schema: &SchemaDeclaration,
    policy: RetryPolicy,
) -> Result<Connection> {
    let (conn, _) = Provisioner::new(conn, schema)
        .with_retry_policy(policy)
        .run()
        .await?;
    Ok(conn)
}

/// One provisioning run over a connection
pub struct Provisioner<'a> {
    conn: Connection,
    schema: &'a SchemaDeclaration,
    policy: RetryPolicy,
    entries: Mutex<Vec<ReportEntry>>,
}

impl<'a> Provisioner<'a> {
    pub fn new(conn: Connection, schema: &'a SchemaDeclaration) -> Self {
        Self {
            conn,
            schema,
            policy: RetryPolicy::default(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Provision everything and hand the connection back with a report
    pub async fn run(self) -> Result<(Connection, ProvisionReport)> {
        self.ensure_all().await?;
        let report = self.report()?;
        Ok((self.conn, report))
    }

    async fn ensure_all(&self) -> Result<()> {
        self.schema.validate()?;

        self.ensure_database().await?;
        try_join_all(
            self.schema
                .tables
                .iter()
                .map(|(name, spec)| self.ensure_table(name, spec)),
        )
        .await?;
        Ok(())
    }

    /// Objects resolved so far, in completion order
    pub fn report(&self) -> Result<ProvisionReport> {
        let entries = self.entries()?.clone();
        Ok(ProvisionReport {
            database: self.conn.database().to_string(),
            entries,
        })
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<ReportEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("Provisioning report lock poisoned"))
    }

    /// Create the target database unless it already exists
    pub async fn ensure_database(&self) -> Result<Outcome> {
        let name = self.conn.database();
        let outcome = match self.conn.run(&Operation::CreateDatabase { name }).await {
            Ok(()) => {
                info!("Database \"{}\" created", name);
                Outcome::Created
            }
            Err(e) if e.is_already_exists() => {
                info!("Database \"{}\" already exists", name);
                Outcome::AlreadyExists
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to create database \"{}\"", name)))
            }
        };
        self.record(ObjectKind::Database, name.to_string(), outcome, 0)?;
        Ok(outcome)
    }

    /// Create a table, then all of its indexes
    ///
    /// Indexes are provisioned even when the table already existed, since a
    /// previous run may have stopped before creating them.
    pub async fn ensure_table(&self, name: &str, spec: &TableSpec) -> Result<()> {
        let op = Operation::CreateTable {
            database: self.conn.database(),
            table: name,
            primary_key: &spec.primary_key,
        };
        let (outcome, retries) = self.create_with_retry(&op).await?;
        match outcome {
            Outcome::Created => info!("Table \"{}\" created", name),
            Outcome::AlreadyExists => info!("Table \"{}\" already exists", name),
        }
        self.record(ObjectKind::Table, name.to_string(), outcome, retries)?;

        try_join_all(
            spec.indexes
                .iter()
                .map(|(index, definition)| self.ensure_index(name, index, definition)),
        )
        .await?;
        Ok(())
    }

    /// Create a secondary index on an existing table
    pub async fn ensure_index(
        &self,
        table: &str,
        index: &str,
        definition: &IndexDefinition,
    ) -> Result<()> {
        let op = Operation::CreateIndex {
            database: self.conn.database(),
            table,
            index,
            definition,
        };
        let (outcome, retries) = self.create_with_retry(&op).await?;
        match outcome {
            Outcome::Created => info!("Index \"{}\".\"{}\" created", table, index),
            Outcome::AlreadyExists => info!("Index \"{}\".\"{}\" already exists", table, index),
        }
        self.record(
            ObjectKind::Index,
            format!("{}.{}", table, index),
            outcome,
            retries,
        )?;
        Ok(())
    }

    /// Run `op` until it succeeds, reports already-exists, or fails for good
    async fn create_with_retry(&self, op: &Operation<'_>) -> Result<(Outcome, u32)> {
        let mut retries = 0;
        loop {
            let err: DbError = match self.conn.run(op).await {
                Ok(()) => return Ok((Outcome::Created, retries)),
                Err(e) if e.is_already_exists() => return Ok((Outcome::AlreadyExists, retries)),
                Err(e) => e,
            };

            if err.kind() != DbErrorKind::Unavailable {
                return Err(anyhow::Error::new(err).context(format!("Failed to {}", op)));
            }
            if !self.policy.allows_retry(retries) {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to {} after {} retries", op, retries)));
            }

            let delay = self.policy.delay(retries);
            retries += 1;
            warn!(
                "{} unavailable ({}), retry #{} in {:?}",
                op.target(),
                err,
                retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, kind: ObjectKind, name: String, outcome: Outcome, retries: u32) -> Result<()> {
        self.entries()?.push(ReportEntry {
            kind,
            name,
            outcome,
            retries,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Executor, MemoryExecutor, SqliteExecutor, Target};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    const NO_MASTER: &str = "Cannot perform write: No master available for table `app.users`.";

    fn users_schema() -> SchemaDeclaration {
        SchemaDeclaration::new().table(
            "users",
            TableSpec::new("id").index("byEmail", IndexDefinition::field("email")),
        )
    }

    fn memory_conn() -> (Arc<MemoryExecutor>, Connection) {
        let exec = Arc::new(MemoryExecutor::new());
        let conn = Connection::new("app", exec.clone());
        (exec, conn)
    }

    fn db_error(err: &anyhow::Error) -> &DbError {
        err.downcast_ref::<DbError>().unwrap()
    }

    #[tokio::test]
    async fn test_fresh_run_event_order() {
        let (exec, conn) = memory_conn();
        let schema = users_schema();

        let (returned, report) = Provisioner::new(conn.clone(), &schema).run().await.unwrap();

        assert!(returned.same_as(&conn));
        assert_eq!(
            exec.journal(),
            vec!["database:app", "table:app.users", "index:app.users.byEmail"]
        );
        let names: Vec<_> = report.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["app", "users", "users.byEmail"]);
        assert_eq!(report.created(), 3);
        assert_eq!(report.already_existing(), 0);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (exec, conn) = memory_conn();
        let schema = users_schema();

        let conn = provision(conn, &schema).await.unwrap();
        let (_, report) = Provisioner::new(conn, &schema).run().await.unwrap();

        assert_eq!(report.created(), 0);
        assert_eq!(report.already_existing(), 3);
        assert_eq!(
            report.entry(ObjectKind::Index, "users.byEmail").map(|e| e.outcome),
            Some(Outcome::AlreadyExists)
        );
        assert_eq!(
            exec.index_definition("app", "users", "byEmail"),
            Some(IndexDefinition::field("email"))
        );
    }

    #[tokio::test]
    async fn test_existing_table_still_gets_indexes() {
        let (exec, conn) = memory_conn();
        let schema = users_schema();

        conn.run(&Operation::CreateDatabase { name: "app" })
            .await
            .unwrap();
        conn.run(&Operation::CreateTable {
            database: "app",
            table: "users",
            primary_key: "id",
        })
        .await
        .unwrap();

        let (_, report) = Provisioner::new(conn, &schema).run().await.unwrap();
        assert_eq!(
            report.entry(ObjectKind::Table, "users").map(|e| e.outcome),
            Some(Outcome::AlreadyExists)
        );
        assert_eq!(
            report.entry(ObjectKind::Index, "users.byEmail").map(|e| e.outcome),
            Some(Outcome::Created)
        );
        assert!(exec
            .exists(&Target::Index {
                database: "app",
                table: "users",
                index: "byEmail",
            })
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_retries_on_no_master() {
        let (exec, conn) = memory_conn();
        exec.fail_next("app.users", NO_MASTER, 3);
        let schema = users_schema();

        let start = Instant::now();
        let (_, report) = Provisioner::new(conn, &schema).run().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(exec.attempts("table:app.users"), 4);
        assert_eq!(report.entry(ObjectKind::Table, "users").map(|e| e.retries), Some(3));
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
        // the index is only attempted once the table exists
        assert_eq!(exec.attempts("index:app.users.byEmail"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_retries_on_no_master() {
        let (exec, conn) = memory_conn();
        exec.fail_next("app.users.byEmail", NO_MASTER, 2);
        let schema = users_schema();

        let start = Instant::now();
        let (_, report) = Provisioner::new(conn, &schema).run().await.unwrap();

        assert_eq!(exec.attempts("index:app.users.byEmail"), 3);
        assert_eq!(report.total_retries(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retries_give_up() {
        let (exec, conn) = memory_conn();
        exec.fail_next("app.users", NO_MASTER, 10);
        let schema = users_schema();

        let err = Provisioner::new(conn, &schema)
            .with_retry_policy(RetryPolicy::default().with_max_retries(Some(2)))
            .run()
            .await
            .unwrap_err();

        assert_eq!(db_error(&err).kind(), DbErrorKind::Unavailable);
        assert!(err.to_string().contains("after 2 retries"));
        assert_eq!(exec.attempts("table:app.users"), 3);
        assert_eq!(exec.attempts("index:app.users.byEmail"), 0);
    }

    #[tokio::test]
    async fn test_database_creation_is_not_retried() {
        let (exec, conn) = memory_conn();
        exec.fail_next("app", NO_MASTER, 1);

        let err = provision(conn, &users_schema()).await.unwrap_err();

        assert_eq!(db_error(&err).kind(), DbErrorKind::Unavailable);
        assert_eq!(exec.journal(), vec!["database:app"]);
    }

    #[tokio::test]
    async fn test_other_error_fails_run() {
        let (exec, conn) = memory_conn();
        exec.fail_next(
            "app.users.byEmail",
            "Permission denied: user `app` does not have `config` permission.",
            1,
        );

        let err = provision(conn, &users_schema()).await.unwrap_err();

        let db_err = db_error(&err);
        assert_eq!(db_err.kind(), DbErrorKind::Other);
        assert!(db_err.message().contains("Permission denied"));
        assert_eq!(exec.attempts("index:app.users.byEmail"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_error_aborts_sibling_tables() {
        let (exec, conn) = memory_conn();
        let schema = SchemaDeclaration::new()
            .table("accounts", TableSpec::default())
            .table("users", TableSpec::default())
            .table("zones", TableSpec::default());
        // "accounts" is still waiting to retry when "users" fails
        exec.fail_next("app.accounts", NO_MASTER, 5);
        exec.fail_next(
            "app.users",
            "Permission denied: user `app` does not have `config` permission.",
            1,
        );

        let provisioner = Provisioner::new(conn, &schema);
        let err = provisioner.ensure_all().await.unwrap_err();
        assert_eq!(db_error(&err).kind(), DbErrorKind::Other);

        assert_eq!(exec.attempts("table:app.accounts"), 1);
        assert_eq!(exec.attempts("table:app.users"), 1);
        assert_eq!(exec.attempts("table:app.zones"), 0);

        let report = provisioner.report().unwrap();
        let names: Vec<_> = report.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["app"]);
        assert!(report.entry(ObjectKind::Table, "users").is_none());
    }

    #[tokio::test]
    async fn test_poisoned_report_fails_run() {
        let (_, conn) = memory_conn();
        let schema = users_schema();
        let provisioner = Provisioner::new(conn, &schema);

        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = provisioner.entries.lock().unwrap();
                panic!("poison the report");
            })
            .join()
        });

        let err = provisioner.ensure_database().await.unwrap_err();
        assert!(err.to_string().contains("lock poisoned"));
        assert!(provisioner.report().is_err());
    }

    #[tokio::test]
    async fn test_many_tables() {
        let (exec, conn) = memory_conn();
        let schema = SchemaDeclaration::new()
            .table(
                "users",
                TableSpec::new("id")
                    .index("byEmail", IndexDefinition::field("email"))
                    .index("byName", IndexDefinition::compound(["last", "first"])),
            )
            .table(
                "devices",
                TableSpec::new("serial").index("byOwner", IndexDefinition::field("owner")),
            )
            .table("logs", TableSpec::default());

        assert_eq!(
            check_status(&conn, &schema).await.unwrap(),
            SchemaStatus::NotInitialized
        );

        let (conn, report) = Provisioner::new(conn, &schema).run().await.unwrap();
        assert_eq!(report.entries.len(), 1 + 3 + 3);

        for (table, spec) in &schema.tables {
            assert_eq!(
                exec.primary_key("app", table).await.unwrap(),
                Some(spec.primary_key.clone())
            );
        }
        assert_eq!(
            check_status(&conn, &schema).await.unwrap(),
            SchemaStatus::Current
        );
    }

    #[tokio::test]
    async fn test_invalid_schema_issues_nothing() {
        let (exec, conn) = memory_conn();
        let schema = SchemaDeclaration::new().table("users", TableSpec::new(""));

        assert!(provision(conn, &schema).await.is_err());
        assert!(exec.journal().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_provision_twice() {
        let dir = tempfile::tempdir().unwrap();
        let schema = SchemaDeclaration::new().table(
            "users",
            TableSpec::new("id")
                .index("byEmail", IndexDefinition::field("email"))
                .index("byName", IndexDefinition::compound(["last", "first"])),
        );

        let exec = SqliteExecutor::open_in_dir(dir.path()).unwrap();
        let conn = Connection::new("app", Arc::new(exec));
        let (conn, first) = Provisioner::new(conn, &schema).run().await.unwrap();
        assert_eq!(first.created(), 4);
        assert_eq!(
            check_status(&conn, &schema).await.unwrap(),
            SchemaStatus::Current
        );

        // same process, same executor
        let (_, second) = Provisioner::new(conn, &schema).run().await.unwrap();
        assert_eq!(second.created(), 0);
        assert_eq!(second.already_existing(), 4);

        // fresh executor over the same files
        let exec = SqliteExecutor::open_in_dir(dir.path()).unwrap();
        let conn = Connection::new("app", Arc::new(exec));
        let (_, third) = Provisioner::new(conn, &schema).run().await.unwrap();
        assert_eq!(third.created(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_colliding_index_names_fail_run() {
        let schemas = [
            SchemaDeclaration::new()
                .table("a", TableSpec::new("id").index("b__c", IndexDefinition::field("x")))
                .table("a__b", TableSpec::new("id").index("c", IndexDefinition::field("y"))),
            SchemaDeclaration::new().table(
                "users",
                TableSpec::new("id")
                    .index("byEmail", IndexDefinition::field("email"))
                    .index("byemail", IndexDefinition::field("email")),
            ),
        ];

        for schema in &schemas {
            let exec = SqliteExecutor::open_in_memory().unwrap();
            let conn = Connection::new("app", Arc::new(exec));

            let err = provision(conn.clone(), schema).await.unwrap_err();
            assert_eq!(db_error(&err).kind(), DbErrorKind::Other);

            let status = check_status(&conn, schema).await.unwrap();
            assert!(
                matches!(&status, SchemaStatus::Incomplete { missing, .. } if missing.len() == 1),
                "unexpected status {:?}",
                status
            );
        }
    }
}
