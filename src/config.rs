use crate::provision::{RetryPolicy, DEFAULT_RETRY_DELAY};
use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Target database used when none is configured
pub const DEFAULT_DATABASE: &str = "app";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablewrightConfig {
    /// Path to the directory holding the SQLite database files
    pub data_dir: String,

    /// Name of the database to provision
    pub database: String,

    /// Schema declaration file (TOML or JSON)
    pub schema_file: Option<String>,

    /// Delay between retries when the backend is unavailable (default: 1 second)
    pub retry_delay_ms: u64,

    /// Maximum retries per table/index; `None` retries forever
    pub max_retries: Option<u32>,

    /// How long SQLite waits on a lock before reporting unavailable (default: 0)
    pub busy_timeout_ms: u64,
}

const EMPTY_CONFIG: &str = r#"### tablewright configuration file

### directory holding the SQLite database files
# data_dir = "~/.tablewright"

### database to provision
# database = "app"

### schema declaration file (TOML or JSON)
# schema_file = "~/.tablewright/schema.toml"

### retry settings for an unavailable backend
# retry_delay_ms = 1000
# max_retries = 10                  # unset: retry forever
# busy_timeout_ms = 0
"#;

fn default_data_dir() -> String {
    let home_dir = dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    format!("{}/.tablewright", home_dir)
}

impl Default for TablewrightConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: DEFAULT_DATABASE.to_string(),
            schema_file: None,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            max_retries: None,
            busy_timeout_ms: 0,
        }
    }
}

impl TablewrightConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<TablewrightConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.tablewright/tablewright.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let tablewright_dir = format!("{}/.tablewright", home_dir.as_str());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    builder = builder.add_source(config::File::from(path));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(tablewright_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create tablewright directory: {}", e))?;
                let p = format!("{}/tablewright.toml", tablewright_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of TABLEWRIGHT)
        // E.g., `TABLEWRIGHT_DATABASE=orders ./tablewright apply` would set the target database
        builder = builder.add_source(config::Environment::with_prefix("TABLEWRIGHT"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config)
    }

    /// Build a configuration from flat key/value settings
    fn from_map(config: &HashMap<String, String>) -> Result<TablewrightConfig> {
        let defaults = TablewrightConfig::default();

        let data_dir = match config.get("data_dir") {
            Some(p) => expand_home(p),
            None => defaults.data_dir,
        };

        let database = config
            .get("database")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.database);

        let schema_file = config
            .get("schema_file")
            .filter(|s| !s.trim().is_empty())
            .map(|s| expand_home(s));

        let retry_delay_ms = parse_opt(config, "retry_delay_ms")?.unwrap_or(defaults.retry_delay_ms);
        let max_retries = parse_opt(config, "max_retries")?;
        let busy_timeout_ms =
            parse_opt(config, "busy_timeout_ms")?.unwrap_or(defaults.busy_timeout_ms);

        Ok(TablewrightConfig {
            data_dir,
            database,
            schema_file,
            retry_delay_ms,
            max_retries,
            busy_timeout_ms,
        })
    }

    /// Retry policy for an unavailable backend
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(self.retry_delay_ms))
            .with_max_retries(self.max_retries)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Get the path to the SQLite file backing `database`
    pub fn database_path(&self, database: &str) -> PathBuf {
        let data_dir = self.data_dir.trim_end_matches('/');
        PathBuf::from(format!("{}/{}.sqlite3", data_dir, database))
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let max_retries = self
            .max_retries
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string());

        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Database:           {}", self.database),
            format!(
                "Database Path:      {}",
                self.database_path(&self.database).display()
            ),
            format!(
                "Schema File:        {}",
                self.schema_file.as_deref().unwrap_or("(not set)")
            ),
            format!("Retry Delay:        {} ms", self.retry_delay_ms),
            format!("Max Retries:        {}", max_retries),
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
        ];

        let info = get_database_info(self);
        if let Some(size) = info.size_bytes {
            lines.push(format!("Database Size:      {}", format_size(size)));
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.tablewright/tablewright.toml", home_dir)
    }
}

fn parse_opt<T>(config: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match config.get(key).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", s, key, e)),
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{}", home.to_string_lossy(), rest),
        _ => path.to_string(),
    }
}

/// Information about the SQLite file of the configured database
#[derive(Debug, Serialize, Clone)]
pub struct DatabaseFileInfo {
    pub database: String,
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Get SQLite file information for the configured database
pub fn get_database_info(config: &TablewrightConfig) -> DatabaseFileInfo {
    let path = config.database_path(&config.database);
    let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
    DatabaseFileInfo {
        database: config.database.clone(),
        path: path.to_string_lossy().to_string(),
        exists: size_bytes.is_some(),
        size_bytes,
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
