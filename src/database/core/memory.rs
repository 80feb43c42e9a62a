//! In-memory executor
//!
//! Emulates a document store: databases hold tables, tables hold a primary
//! key and named indexes. Failures are reported with the same message texts a
//! clustered document database would send, and are classified through
//! [`DbError::from_message`] like any text-only driver.
//!
//! Faults can be injected per target to exercise the provisioner's recovery
//! paths, and every attempted operation is recorded in a journal.

use super::connection::Executor;
use super::error::DbError;
use super::operation::{Operation, Target};
use crate::schema::IndexDefinition;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct TableState {
    primary_key: String,
    indexes: BTreeMap<String, IndexDefinition>,
}

#[derive(Debug, Default)]
struct State {
    databases: BTreeMap<String, BTreeMap<String, TableState>>,
    faults: HashMap<String, Fault>,
    journal: Vec<String>,
}

#[derive(Debug)]
struct Fault {
    message: String,
    remaining: u32,
}

/// In-process [`Executor`] for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    state: Mutex<State>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DbError> {
        self.state
            .lock()
            .map_err(|_| DbError::other("memory executor state poisoned"))
    }

    /// Make the next `times` operations on `target` fail with `message`
    ///
    /// `target` uses [`Target::key`] notation: `app`, `app.users`,
    /// `app.users.byEmail`.
    pub fn fail_next(&self, target: &str, message: &str, times: u32) {
        if let Ok(mut state) = self.lock() {
            state.faults.insert(
                target.to_string(),
                Fault {
                    message: message.to_string(),
                    remaining: times,
                },
            );
        }
    }

    /// Every attempted operation, in order, as `<target key>`
    /// prefixed with the object kind (`database:`, `table:`, `index:`)
    pub fn journal(&self) -> Vec<String> {
        self.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    /// Number of attempts recorded for `entry` (see [`MemoryExecutor::journal`])
    pub fn attempts(&self, entry: &str) -> usize {
        self.journal().iter().filter(|e| *e == entry).count()
    }

    /// Definition of an existing index
    pub fn index_definition(
        &self,
        database: &str,
        table: &str,
        index: &str,
    ) -> Option<IndexDefinition> {
        let state = self.lock().ok()?;
        state
            .databases
            .get(database)?
            .get(table)?
            .indexes
            .get(index)
            .cloned()
    }

    fn apply(state: &mut State, op: &Operation<'_>) -> Result<(), DbError> {
        match *op {
            Operation::CreateDatabase { name } => {
                if state.databases.contains_key(name) {
                    return Err(DbError::from_message(format!(
                        "Database `{}` already exists.",
                        name
                    )));
                }
                state.databases.insert(name.to_string(), BTreeMap::new());
                Ok(())
            }
            Operation::CreateTable {
                database,
                table,
                primary_key,
            } => {
                let tables = state.databases.get_mut(database).ok_or_else(|| {
                    DbError::from_message(format!("Database `{}` does not exist.", database))
                })?;
                if tables.contains_key(table) {
                    return Err(DbError::from_message(format!(
                        "Table `{}.{}` already exists.",
                        database, table
                    )));
                }
                tables.insert(
                    table.to_string(),
                    TableState {
                        primary_key: primary_key.to_string(),
                        indexes: BTreeMap::new(),
                    },
                );
                Ok(())
            }
            Operation::CreateIndex {
                database,
                table,
                index,
                definition,
            } => {
                let state = state
                    .databases
                    .get_mut(database)
                    .and_then(|tables| tables.get_mut(table))
                    .ok_or_else(|| {
                        DbError::from_message(format!(
                            "Table `{}.{}` does not exist.",
                            database, table
                        ))
                    })?;
                if state.indexes.contains_key(index) {
                    return Err(DbError::from_message(format!(
                        "Index `{}` already exists on table `{}.{}`.",
                        index, database, table
                    )));
                }
                state.indexes.insert(index.to_string(), definition.clone());
                Ok(())
            }
        }
    }
}

fn journal_entry(target: &Target<'_>) -> String {
    let kind = match target {
        Target::Database { .. } => "database",
        Target::Table { .. } => "table",
        Target::Index { .. } => "index",
    };
    format!("{}:{}", kind, target.key())
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn run(&self, op: &Operation<'_>) -> Result<(), DbError> {
        debug!("memory: {}", op);
        let target = op.target();
        let key = target.key();
        let mut state = self.lock()?;
        state.journal.push(journal_entry(&target));

        if let Some(fault) = state.faults.get_mut(&key) {
            if fault.remaining > 0 {
                fault.remaining -= 1;
                return Err(DbError::from_message(fault.message.clone()));
            }
        }

        Self::apply(&mut state, op)
    }

    async fn exists(&self, target: &Target<'_>) -> Result<bool, DbError> {
        let state = self.lock()?;
        let present = match *target {
            Target::Database { name } => state.databases.contains_key(name),
            Target::Table { database, table } => state
                .databases
                .get(database)
                .is_some_and(|tables| tables.contains_key(table)),
            Target::Index {
                database,
                table,
                index,
            } => state
                .databases
                .get(database)
                .and_then(|tables| tables.get(table))
                .is_some_and(|t| t.indexes.contains_key(index)),
        };
        Ok(present)
    }

    async fn primary_key(&self, database: &str, table: &str) -> Result<Option<String>, DbError> {
        let state = self.lock()?;
        Ok(state
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(|t| t.primary_key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DbErrorKind;

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let exec = MemoryExecutor::new();
        exec.run(&Operation::CreateDatabase { name: "app" })
            .await
            .unwrap();
        let err = exec
            .run(&Operation::CreateDatabase { name: "app" })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::AlreadyExists);

        exec.run(&Operation::CreateTable {
            database: "app",
            table: "users",
            primary_key: "id",
        })
        .await
        .unwrap();
        assert_eq!(
            exec.primary_key("app", "users").await.unwrap(),
            Some("id".to_string())
        );

        let definition = IndexDefinition::field("email");
        let op = Operation::CreateIndex {
            database: "app",
            table: "users",
            index: "byEmail",
            definition: &definition,
        };
        exec.run(&op).await.unwrap();
        assert!(exec.run(&op).await.unwrap_err().is_already_exists());
        assert_eq!(
            exec.index_definition("app", "users", "byEmail"),
            Some(definition.clone())
        );

        assert_eq!(
            exec.journal(),
            vec![
                "database:app",
                "database:app",
                "table:app.users",
                "index:app.users.byEmail",
                "index:app.users.byEmail",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_parent_is_other() {
        let exec = MemoryExecutor::new();
        let err = exec
            .run(&Operation::CreateTable {
                database: "app",
                table: "users",
                primary_key: "id",
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DbErrorKind::Other);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let exec = MemoryExecutor::new();
        exec.fail_next("app", "No master available", 2);

        let op = Operation::CreateDatabase { name: "app" };
        assert!(exec.run(&op).await.unwrap_err().is_unavailable());
        assert!(exec.run(&op).await.unwrap_err().is_unavailable());
        exec.run(&op).await.unwrap();

        assert_eq!(exec.attempts("database:app"), 3);
        assert!(exec.exists(&Target::Database { name: "app" }).await.unwrap());
    }
}
