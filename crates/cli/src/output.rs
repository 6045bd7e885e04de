//! Output formatting utilities

use chrono::DateTime;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or `data` as JSON
pub fn print_rows<T: Tabled, S: Serialize + ?Sized>(rows: &[T], data: &S, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(data),
    }
}

pub fn print_json<S: Serialize + ?Sized>(data: &S) {
    if let Ok(json) = serde_json::to_string_pretty(data) {
        println!("{}", json);
    }
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format unix seconds as `YYYY-MM-DD HH:MM UTC`
pub fn format_time(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Format a metric value with two decimals
pub fn format_value(value: f64) -> String {
    format!("{:.2}", value)
}

pub fn format_optional(value: Option<f64>) -> String {
    value.map(format_value).unwrap_or_else(|| "-".to_string())
}

/// Format a duration in seconds as `1h02m`, `3m05s` or `12s`
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "ready" | "succeeded" | "done" => status.green().to_string(),
        "stale" | "partial" | "running" => status.yellow().to_string(),
        "missing" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}
