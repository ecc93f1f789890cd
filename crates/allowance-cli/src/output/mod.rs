//! Output formatting module
//!
//! Renders command results as tables or JSON.

use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("Unknown output format '{}', expected table or json", other)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        })
    }
}

/// Two-column row for payloads that don't fit a single table row
#[derive(Debug, Serialize, Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl FieldRow {
    pub fn new(field: &str, value: impl Display) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Print rows in the specified format
pub fn print_output<T>(rows: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table if rows.is_empty() => {
            println!("Nothing to show.");
            Ok(())
        }
        OutputFormat::Table => {
            println!("{}", Table::new(rows));
            Ok(())
        }
    }
}

/// Print one row in the specified format
pub fn print_single<T>(row: &T, format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Json => print_json(row),
        OutputFormat::Table => {
            println!("{}", Table::new([row]));
            Ok(())
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", colored::Colorize::green(message));
    }
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

/// Print a warning to stderr (respects quiet mode)
pub fn print_warning(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", colored::Colorize::yellow(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("Json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        let err = "yaml".parse::<OutputFormat>().unwrap_err();
        assert!(err.contains("yaml"));
    }

    #[test]
    fn test_output_format_round_trips_display() {
        for format in [OutputFormat::Table, OutputFormat::Json] {
            assert_eq!(format.to_string().parse::<OutputFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_field_row() {
        let row = FieldRow::new("balance", 42);
        assert_eq!(row.field, "balance");
        assert_eq!(row.value, "42");
    }
}
