use clap::{Parser, Subcommand};
use tablewright::{OutputFormat, TablewrightConfig};
use tracing::Level;

mod commands;

use commands::apply::ApplyArgs;
use commands::config::ConfigArgs;
use commands::status::StatusArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.tablewright/tablewright.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output format: table, markdown, json, json-pretty
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database, tables and indexes that do not exist yet
    Apply(ApplyArgs),

    /// Compare the target database with the schema declaration
    Status(StatusArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let config = match TablewrightConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Apply(args) => commands::apply::run(&config, args, cli.format).await,
        Commands::Status(args) => commands::status::run(&config, args, cli.format).await,
        Commands::Config(args) => commands::config::run(&config, args, cli.format),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
