//! Schema status check
//!
//! Compares what a declaration asks for with what the target database holds,
//! without creating anything.

use crate::database::{Connection, Target};
use crate::schema::SchemaDeclaration;
use anyhow::{Context, Result};
use serde::Serialize;

/// Status of the target database relative to a declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SchemaStatus {
    /// The target database does not exist
    NotInitialized,

    /// Every declared table and index exists with the declared primary keys
    Current,

    /// Some declared objects are absent, or a table has another primary key
    Incomplete {
        missing: Vec<String>,
        mismatched: Vec<String>,
    },
}

/// Inspect the target database of `conn` against `schema`
pub async fn check_status(conn: &Connection, schema: &SchemaDeclaration) -> Result<SchemaStatus> {
    let database = conn.database();
    let exists = conn
        .exists(&Target::Database { name: database })
        .await
        .with_context(|| format!("Failed to check database \"{}\"", database))?;
    if !exists {
        return Ok(SchemaStatus::NotInitialized);
    }

    let mut missing = vec![];
    let mut mismatched = vec![];

    for (table, spec) in &schema.tables {
        let table_target = Target::Table { database, table };
        match conn
            .primary_key(table)
            .await
            .with_context(|| format!("Failed to inspect {}", table_target))?
        {
            None => {
                // indexes cannot exist without their table
                missing.push(table_target.to_string());
                missing.extend(spec.indexes.keys().map(|index| {
                    Target::Index {
                        database,
                        table,
                        index,
                    }
                    .to_string()
                }));
                continue;
            }
            Some(pk) if pk != spec.primary_key => mismatched.push(format!(
                "{} has primary key \"{}\", declared \"{}\"",
                table_target, pk, spec.primary_key
            )),
            Some(_) => {}
        }

        for index in spec.indexes.keys() {
            let target = Target::Index {
                database,
                table,
                index,
            };
            let present = conn
                .exists(&target)
                .await
                .with_context(|| format!("Failed to inspect {}", target))?;
            if !present {
                missing.push(target.to_string());
            }
        }
    }

    if missing.is_empty() && mismatched.is_empty() {
        Ok(SchemaStatus::Current)
    } else {
        Ok(SchemaStatus::Incomplete {
            missing,
            mismatched,
        })
    }
}
