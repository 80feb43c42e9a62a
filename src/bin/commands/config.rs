use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tablewright::config::{get_database_info, DatabaseFileInfo};
use tablewright::{OutputFormat, TablewrightConfig};

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also show the database file details
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo<'a> {
    config_file: String,
    #[serde(flatten)]
    settings: &'a TablewrightConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_file: Option<DatabaseFileInfo>,
}

pub fn run(config: &TablewrightConfig, args: ConfigArgs, output_format: OutputFormat) -> Result<()> {
    let ConfigArgs { verbose } = args;

    let info = ConfigInfo {
        config_file: TablewrightConfig::config_file_path(),
        settings: config,
        database_file: verbose.then(|| get_database_info(config)),
    };

    if let Some(json) = output_format.to_json(&info) {
        println!("{}", json?);
        return Ok(());
    }

    println!("Config File:        {}", info.config_file);
    println!("{}", config.summary());
    if let Some(file) = &info.database_file {
        println!(
            "Database File:      {} ({})",
            file.path,
            if file.exists { "exists" } else { "not created yet" }
        );
    }
    Ok(())
}
