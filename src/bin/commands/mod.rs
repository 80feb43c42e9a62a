pub mod apply;
pub mod config;
pub mod status;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tablewright::{Connection, MemoryExecutor, SchemaDeclaration, SqliteExecutor, TablewrightConfig};

/// Schema and target selection shared by `apply` and `status`
#[derive(clap::Args, Debug)]
pub struct TargetArgs {
    /// Schema declaration file (TOML or JSON); defaults to `schema_file` from the config
    #[clap(short, long)]
    pub schema: Option<String>,

    /// Database to provision; defaults to `database` from the config
    #[clap(short, long)]
    pub database: Option<String>,

    /// Keep the database in memory instead of under the data directory
    #[clap(long)]
    pub in_memory: bool,
}

impl TargetArgs {
    pub fn load_schema(&self, config: &TablewrightConfig) -> Result<SchemaDeclaration> {
        let path = self
            .schema
            .as_deref()
            .or(config.schema_file.as_deref())
            .ok_or_else(|| {
                anyhow!("No schema file given; pass --schema or set schema_file in the config")
            })?;
        SchemaDeclaration::from_path(path)
    }

    pub fn database<'a>(&'a self, config: &'a TablewrightConfig) -> &'a str {
        self.database.as_deref().unwrap_or(&config.database)
    }

    /// Open a connection to the target database
    ///
    /// `dry_run` swaps in a throwaway in-memory document store.
    pub fn connect(&self, config: &TablewrightConfig, dry_run: bool) -> Result<Connection> {
        let database = self.database(config);
        if dry_run {
            return Ok(Connection::new(database, Arc::new(MemoryExecutor::new())));
        }

        let executor = self.open_sqlite(config)?;
        Ok(Connection::new(database, Arc::new(executor)))
    }

    pub fn open_sqlite(&self, config: &TablewrightConfig) -> Result<SqliteExecutor> {
        let data_dir = (!self.in_memory).then(|| Path::new(&config.data_dir));
        SqliteExecutor::open(data_dir, config.busy_timeout())
    }
}
