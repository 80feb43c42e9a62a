use super::TargetArgs;
use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use tablewright::{check_status, Connection, OutputFormat, SchemaStatus, TablewrightConfig};

/// Arguments for the Status command
#[derive(Args)]
pub struct StatusArgs {
    #[clap(flatten)]
    pub target: TargetArgs,
}

pub async fn run(
    config: &TablewrightConfig,
    args: StatusArgs,
    output_format: OutputFormat,
) -> Result<()> {
    let StatusArgs { target } = args;

    let schema = target.load_schema(config)?;
    let database = target.database(config);
    let executor = target.open_sqlite(config)?;
    executor.attach_existing(database).await?;
    let conn = Connection::new(database, Arc::new(executor));

    let status = check_status(&conn, &schema).await?;

    if let Some(json) = output_format.to_json(&status) {
        println!("{}", json?);
        return Ok(());
    }

    match status {
        SchemaStatus::NotInitialized => {
            println!("Database \"{}\" is not initialized", conn.database())
        }
        SchemaStatus::Current => println!(
            "Database \"{}\" is current: {} tables, {} indexes",
            conn.database(),
            schema.tables.len(),
            schema.index_count()
        ),
        SchemaStatus::Incomplete {
            missing,
            mismatched,
        } => {
            println!("Database \"{}\" is incomplete", conn.database());
            for m in missing {
                println!("  missing:    {}", m);
            }
            for m in mismatched {
                println!("  mismatched: {}", m);
            }
        }
    }
    Ok(())
}
