//! Provisioning report

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Database,
    Table,
    Index,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Database => write!(f, "database"),
            ObjectKind::Table => write!(f, "table"),
            ObjectKind::Index => write!(f, "index"),
        }
    }
}

/// What a create request resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Created,
    AlreadyExists,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// One provisioned object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct ReportEntry {
    pub kind: ObjectKind,
    /// `db`, `table` or `table.index`
    pub name: String,
    pub outcome: Outcome,
    pub retries: u32,
}

/// Per-object results of a successful provisioning run, in completion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub database: String,
    pub entries: Vec<ReportEntry>,
}

impl ProvisionReport {
    /// Number of objects created by this run
    pub fn created(&self) -> usize {
        self.count(Outcome::Created)
    }

    /// Number of objects that were already present
    pub fn already_existing(&self) -> usize {
        self.count(Outcome::AlreadyExists)
    }

    pub fn total_retries(&self) -> u32 {
        self.entries.iter().map(|e| e.retries).sum()
    }

    pub fn entry(&self, kind: ObjectKind, name: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.name == name)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    /// One-line human readable summary
    pub fn summary(&self) -> String {
        format!(
            "database \"{}\": {} created, {} already existed, {} retries",
            self.database,
            self.created(),
            self.already_existing(),
            self.total_retries()
        )
    }
}
