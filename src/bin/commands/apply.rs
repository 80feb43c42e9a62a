use super::TargetArgs;
use anyhow::Result;
use clap::Args;
use tablewright::{OutputFormat, Provisioner, TablewrightConfig};
use tabled::settings::Style;
use tabled::Table;

/// Arguments for the Apply command
#[derive(Args)]
pub struct ApplyArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Run against a throwaway in-memory store instead of the real database
    #[clap(long)]
    pub dry_run: bool,

    /// Give up after this many retries per table or index (default: retry forever)
    #[clap(long)]
    pub max_retries: Option<u32>,

    /// Delay between retries in milliseconds
    #[clap(long)]
    pub retry_delay_ms: Option<u64>,
}

pub async fn run(
    config: &TablewrightConfig,
    args: ApplyArgs,
    output_format: OutputFormat,
) -> Result<()> {
    let ApplyArgs {
        target,
        dry_run,
        max_retries,
        retry_delay_ms,
    } = args;

    let mut config = config.clone();
    if let Some(n) = max_retries {
        config.max_retries = Some(n);
    }
    if let Some(ms) = retry_delay_ms {
        config.retry_delay_ms = ms;
    }

    let schema = target.load_schema(&config)?;
    let conn = target.connect(&config, dry_run)?;

    let (_, report) = Provisioner::new(conn, &schema)
        .with_retry_policy(config.retry_policy())
        .run()
        .await?;

    if let Some(json) = output_format.to_json(&report) {
        println!("{}", json?);
        return Ok(());
    }

    match output_format {
        OutputFormat::Markdown => {
            println!("{}", Table::new(&report.entries).with(Style::markdown()));
        }
        _ => {
            println!("{}", Table::new(&report.entries).with(Style::rounded()));
        }
    }
    println!("{}", report.summary());
    Ok(())
}
