//! Schema declaration
//!
//! The static description of what should exist in the target database: a set
//! of tables, each with a primary key and a set of named secondary indexes.
//! The declaration is read-only input to the provisioner.
//!
//! Declarations can be built in code or loaded from a TOML/JSON file:
//!
//! ```toml
//! [tables.users]
//! primary_key = "id"
//!
//! [tables.users.indexes]
//! by_email = "email"
//! by_name = ["last_name", "first_name"]
//! by_domain = { expression = "lower(json_extract(doc, '$.domain'))" }
//! ```

use anyhow::{anyhow, Result};
use config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Primary key used when a table declaration does not name one
pub const DEFAULT_PRIMARY_KEY: &str = "id";

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

/// How an index derives its key from a stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexDefinition {
    /// A single (possibly nested, dot-separated) document field
    Field(String),

    /// An ordered tuple of document fields
    Compound(Vec<String>),

    /// A backend-specific expression, passed through untouched
    Expression { expression: String },
}

impl IndexDefinition {
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }

    pub fn compound<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Compound(paths.into_iter().map(Into::into).collect())
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
        }
    }

    /// Field paths referenced by this definition (empty for expressions)
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::Field(path) => vec![path.as_str()],
            Self::Compound(paths) => paths.iter().map(String::as_str).collect(),
            Self::Expression { .. } => vec![],
        }
    }
}

/// Declaration of a single table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    #[serde(default)]
    pub indexes: BTreeMap<String, IndexDefinition>,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_KEY)
    }
}

impl TableSpec {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            indexes: BTreeMap::new(),
        }
    }

    /// Add (or replace) a secondary index
    pub fn index(mut self, name: impl Into<String>, definition: IndexDefinition) -> Self {
        self.indexes.insert(name.into(), definition);
        self
    }
}

/// Mapping from table name to table declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    #[serde(default)]
    pub tables: BTreeMap<String, TableSpec>,
}

impl SchemaDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table declaration
    pub fn table(mut self, name: impl Into<String>, spec: TableSpec) -> Self {
        self.tables.insert(name.into(), spec);
        self
    }

    /// Load a declaration from a TOML or JSON file
    ///
    /// The format is inferred from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow!(
                "Schema file '{}' does not exist",
                path.to_string_lossy()
            ));
        }

        let schema: SchemaDeclaration = Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| anyhow!("Failed to read schema file '{}': {}", path.display(), e))?
            .try_deserialize()
            .map_err(|e| anyhow!("Failed to parse schema file '{}': {}", path.display(), e))?;

        schema.validate()?;
        Ok(schema)
    }

    /// Parse a declaration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let schema: SchemaDeclaration = serde_json::from_str(json)
            .map_err(|e| anyhow!("Failed to parse schema JSON: {}", e))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total number of declared indexes across all tables
    pub fn index_count(&self) -> usize {
        self.tables.values().map(|t| t.indexes.len()).sum()
    }

    /// Check that every name and field path is usable
    pub fn validate(&self) -> Result<()> {
        for (table, spec) in &self.tables {
            if table.trim().is_empty() {
                return Err(anyhow!("Table names must not be empty"));
            }
            if spec.primary_key.trim().is_empty() {
                return Err(anyhow!("Table \"{}\" has an empty primary key", table));
            }
            for (index, definition) in &spec.indexes {
                if index.trim().is_empty() {
                    return Err(anyhow!("Table \"{}\" has an index with an empty name", table));
                }
                match definition {
                    IndexDefinition::Compound(paths) if paths.is_empty() => {
                        return Err(anyhow!(
                            "Index \"{}\".\"{}\" is a compound index without fields",
                            table,
                            index
                        ));
                    }
                    IndexDefinition::Expression { expression } if expression.trim().is_empty() => {
                        return Err(anyhow!(
                            "Index \"{}\".\"{}\" has an empty expression",
                            table,
                            index
                        ));
                    }
                    _ => {}
                }
                for path in definition.fields() {
                    if !is_valid_field_path(path) {
                        return Err(anyhow!(
                            "Index \"{}\".\"{}\" references invalid field path '{}'",
                            table,
                            index,
                            path
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Field paths are dot-separated segments of `[A-Za-z0-9_]`
fn is_valid_field_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder() {
        let schema = SchemaDeclaration::new()
            .table(
                "users",
                TableSpec::new("id").index("byEmail", IndexDefinition::field("email")),
            )
            .table("sessions", TableSpec::new("token"));

        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.index_count(), 1);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let schema = SchemaDeclaration::from_json_str(
            r#"{
                "tables": {
                    "users": { "indexes": { "byEmail": "email", "byName": ["last", "first"] } },
                    "devices": { "primary_key": "serial" }
                }
            }"#,
        )
        .unwrap();

        let users = &schema.tables["users"];
        assert_eq!(users.primary_key, DEFAULT_PRIMARY_KEY);
        assert_eq!(users.indexes["byEmail"], IndexDefinition::field("email"));
        assert_eq!(
            users.indexes["byName"],
            IndexDefinition::compound(["last", "first"])
        );
        assert!(schema.tables["devices"].indexes.is_empty());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[tables.users]
primary_key = "id"

[tables.users.indexes]
by_email = "email"
by_name = ["last_name", "first_name"]
by_domain = {{ expression = "lower(json_extract(doc, '$.domain'))" }}

[tables.logs]
primary_key = "seq"
"#
        )
        .unwrap();

        let schema = SchemaDeclaration::from_path(file.path()).unwrap();
        let users = &schema.tables["users"];
        assert_eq!(users.indexes.len(), 3);
        assert_eq!(users.indexes["by_email"], IndexDefinition::field("email"));
        assert!(matches!(
            users.indexes["by_domain"],
            IndexDefinition::Expression { .. }
        ));
        assert_eq!(schema.tables["logs"].primary_key, "seq");
    }

    #[test]
    fn test_missing_file() {
        assert!(SchemaDeclaration::from_path("/nonexistent/schema.toml").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_declarations() {
        let empty_pk = SchemaDeclaration::new().table("t", TableSpec::new(""));
        assert!(empty_pk.validate().is_err());

        let empty_compound = SchemaDeclaration::new().table(
            "t",
            TableSpec::default().index("i", IndexDefinition::Compound(vec![])),
        );
        assert!(empty_compound.validate().is_err());

        let bad_path = SchemaDeclaration::new().table(
            "t",
            TableSpec::default().index("i", IndexDefinition::field("a'); DROP")),
        );
        assert!(bad_path.validate().is_err());

        let nested = SchemaDeclaration::new().table(
            "t",
            TableSpec::default().index("i", IndexDefinition::field("address.city")),
        );
        assert!(nested.validate().is_ok());
    }
}
