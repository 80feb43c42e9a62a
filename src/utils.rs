//! Output formatting shared by the CLI commands

use serde::Serialize;
use std::str::FromStr;

/// Unified output format for all commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    Table,
    /// Markdown table format
    Markdown,
    /// Compact JSON (single line)
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
}

impl OutputFormat {
    /// Serialize `value` as JSON in this format's style
    ///
    /// Returns `None` for table formats.
    pub fn to_json<T: Serialize>(&self, value: &T) -> Option<serde_json::Result<String>> {
        match self {
            Self::Json => Some(serde_json::to_string(value)),
            Self::JsonPretty => Some(serde_json::to_string_pretty(value)),
            Self::Table | Self::Markdown => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: table, markdown, json, json-pretty",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("table".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert_eq!("MD".parse::<OutputFormat>(), Ok(OutputFormat::Markdown));
        assert_eq!(
            "json-pretty".parse::<OutputFormat>(),
            Ok(OutputFormat::JsonPretty)
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_to_json() {
        let value = serde_json::json!({"a": 1});
        assert!(OutputFormat::Table.to_json(&value).is_none());
        assert!(OutputFormat::Markdown.to_json(&value).is_none());
        assert_eq!(
            OutputFormat::Json.to_json(&value).unwrap().unwrap(),
            r#"{"a":1}"#
        );
    }
}
