//! Logical schema operations issued through an executor

use crate::schema::IndexDefinition;
use std::fmt;

/// A create-if-absent request understood by every [`Executor`](super::Executor)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    CreateDatabase {
        name: &'a str,
    },
    CreateTable {
        database: &'a str,
        table: &'a str,
        primary_key: &'a str,
    },
    CreateIndex {
        database: &'a str,
        table: &'a str,
        index: &'a str,
        definition: &'a IndexDefinition,
    },
}

impl<'a> Operation<'a> {
    /// The object this operation creates
    pub fn target(&self) -> Target<'a> {
        match *self {
            Operation::CreateDatabase { name } => Target::Database { name },
            Operation::CreateTable {
                database, table, ..
            } => Target::Table { database, table },
            Operation::CreateIndex {
                database,
                table,
                index,
                ..
            } => Target::Index {
                database,
                table,
                index,
            },
        }
    }
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "create {}", self.target())
    }
}

/// A database object addressed by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target<'a> {
    Database {
        name: &'a str,
    },
    Table {
        database: &'a str,
        table: &'a str,
    },
    Index {
        database: &'a str,
        table: &'a str,
        index: &'a str,
    },
}

impl Target<'_> {
    /// Stable key used by the in-memory backend and fault injection,
    /// e.g. `app`, `app.users`, `app.users.byEmail`
    pub fn key(&self) -> String {
        match self {
            Target::Database { name } => name.to_string(),
            Target::Table { database, table } => format!("{}.{}", database, table),
            Target::Index {
                database,
                table,
                index,
            } => format!("{}.{}.{}", database, table, index),
        }
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Database { name } => write!(f, "database \"{}\"", name),
            Target::Table { table, .. } => write!(f, "table \"{}\"", table),
            Target::Index { table, index, .. } => write!(f, "index \"{}\".\"{}\"", table, index),
        }
    }
}
