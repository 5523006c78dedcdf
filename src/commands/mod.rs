//! Command implementations, one module per top-level subcommand

use eyre::Result;
use serde::Serialize;

use crate::cli::OutputFormat;

pub mod agent;
pub mod audit;
pub mod completions;
pub mod config;
pub mod skill;
pub mod trust;

/// Print `value` as JSON or YAML.
///
/// Returns `false` for text output so the caller renders it by hand.
pub fn print_structured<T: Serialize>(format: OutputFormat, value: &T) -> Result<bool> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Text => return Ok(false),
    }
    Ok(true)
}
