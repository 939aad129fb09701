//! Output formatting for the grid CLI

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Compact text format
    Text,
}

/// Types that can be printed as table rows
pub trait Formattable {
    fn table_headers() -> Vec<String>;
    fn table_row(&self) -> Vec<String>;
}

/// Output formatter
pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// True for JSON and YAML
    pub fn is_structured(&self) -> bool {
        matches!(self.format, OutputFormat::Json | OutputFormat::Yaml)
    }

    /// Print any serializable value in a structured format
    pub fn print_structured<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        match self.format {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
            _ => println!("{}", serde_json::to_string_pretty(value)?),
        }
        Ok(())
    }

    /// Format and print a list of items
    pub fn print_list<T>(&self, items: &[T]) -> Result<()>
    where
        T: Serialize + Formattable,
    {
        if items.is_empty() {
            match self.format {
                OutputFormat::Json | OutputFormat::Yaml => println!("[]"),
                OutputFormat::Table | OutputFormat::Text => {
                    println!("{}", "No results found".dimmed());
                }
            }
            return Ok(());
        }

        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => self.print_structured(items)?,
            OutputFormat::Table => self.print_table(items),
            OutputFormat::Text => {
                let headers = T::table_headers();
                println!("{}", headers.join(" | "));
                for item in items {
                    println!("{}", item.table_row().join(" | "));
                }
            }
        }
        Ok(())
    }

    fn print_table<T: Formattable>(&self, items: &[T]) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let header_cells: Vec<Cell> = T::table_headers()
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
            .collect();
        table.set_header(header_cells);

        for item in items {
            table.add_row(item.table_row());
        }

        println!("{}", table);
    }

    /// Print ordered key/value statistics
    pub fn print_stats(&self, stats: &[(&str, String)]) -> Result<()> {
        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => {
                let map: serde_json::Map<String, serde_json::Value> = stats
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                self.print_structured(&map)?;
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(vec![
                    Cell::new("Metric").add_attribute(Attribute::Bold).fg(Color::Cyan),
                    Cell::new("Value").add_attribute(Attribute::Bold).fg(Color::Cyan),
                ]);
                for (key, value) in stats {
                    table.add_row(vec![key.to_string(), value.clone()]);
                }
                println!("{}", table);
            }
            OutputFormat::Text => {
                for (key, value) in stats {
                    println!("{}: {}", key, value);
                }
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn print_success(&self, message: &str) -> Result<()> {
        self.print_status("success", message, || {
            println!("{} {}", "✓".green().bold(), message.green())
        })
    }

    /// Print a warning message
    pub fn print_warning(&self, message: &str) -> Result<()> {
        self.print_status("warning", message, || {
            eprintln!("{} {}", "⚠".yellow().bold(), message.yellow())
        })
    }

    /// Print an info message
    pub fn print_info(&self, message: &str) -> Result<()> {
        self.print_status("info", message, || {
            println!("{} {}", "ℹ".blue().bold(), message.blue())
        })
    }

    fn print_status(&self, status: &str, message: &str, human: impl FnOnce()) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let result = serde_json::json!({
                    "status": status,
                    "message": message
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            OutputFormat::Yaml => {
                println!("status: {}", status);
                println!("message: {}", message);
            }
            OutputFormat::Table | OutputFormat::Text => human(),
        }
        Ok(())
    }
}

/// Optional float with fixed precision, `-` when absent
pub fn format_optional(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

/// Helper function to format duration
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
