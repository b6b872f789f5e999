//! Shared output formatting for CLI commands
//!
//! Envelopes and listings go to stdout as JSON or as a plain table; logs go to
//! stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use serde::Serialize;
use std::str::FromStr;

use crate::api::Envelope;
use crate::domain::ConnectionDefinition;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            _ => anyhow::bail!("Unsupported output format: '{}'. Use 'json' or 'table'.", s),
        }
    }
}

/// Print data as pretty JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print an envelope; a listing payload may be rendered as a table instead.
pub fn print_envelope(envelope: &Envelope, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Table && envelope.is_ok() {
        if let Some(connections) =
            envelope.payload.as_ref().and_then(|p| p.get("connections")).cloned()
        {
            let definitions: Vec<ConnectionDefinition> = serde_json::from_value(connections)
                .context("Failed to read connection listing")?;
            print_connections_table(&definitions);
            return Ok(());
        }
    }
    print_json(envelope)
}

/// Render connection definitions as a fixed-width table
pub fn print_connections_table(definitions: &[ConnectionDefinition]) {
    if definitions.is_empty() {
        println!("No connections found");
        return;
    }

    print_table_header(&[
        ("ID", 6),
        ("Name", 24),
        ("Host", 28),
        ("Port", 6),
        ("User", 16),
        ("Active", 6),
        ("Rev", 4),
        ("Cred", 4),
    ]);
    for definition in definitions {
        let attrs = &definition.attributes;
        println!(
            "{:<6} {:<24} {:<28} {:<6} {:<16} {:<6} {:<4} {:<4}",
            definition.id,
            truncate(&attrs.name, 24),
            truncate(&attrs.host, 28),
            attrs.port,
            truncate(&attrs.user, 16),
            attrs.is_active,
            definition.revision,
            definition.credential_version,
        );
    }
    println!();
}

/// Truncate string to maximum length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a horizontal separator line
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    println!();
    let mut header = String::new();
    for (name, width) in columns {
        header.push_str(&format!("{:<width$} ", name, width = width));
    }
    println!("{}", header.trim());

    let total_width: usize = columns.iter().map(|(_, w)| w + 1).sum();
    print_separator(total_width.saturating_sub(1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("ftp.example.internal", 10), "ftp.exa...");
        assert_eq!(truncate("hello", 3), "...");
    }

    #[test]
    fn error_envelopes_print_as_json_in_table_mode() {
        let envelope = Envelope::ok(Uuid::new_v4(), json!({"id": 1, "name": "gnupg"}));
        assert!(print_envelope(&envelope, OutputFormat::Table).is_ok());
    }
}
