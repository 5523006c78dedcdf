use colored::*;
use eyre::Result;
use std::path::PathBuf;

use crate::cli::{ConfigAction, OutputFormat};
use crate::config::Config;

pub fn run(action: ConfigAction, config: &Config, config_path: Option<&PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Show { format } => show(OutputFormat::resolve(format), config),
        ConfigAction::Path => {
            match Config::source_path(config_path) {
                Some(path) => println!("config: {}", path.display()),
                None => println!("config: {}", "(defaults, no file found)".dimmed()),
            }
            println!("agents: {}", config.agents_dir().display());
            println!("skills: {}", config.skills_dir().display());
            Ok(())
        }
    }
}

fn show(format: OutputFormat, config: &Config) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(config)?);
        }
        OutputFormat::Text => {
            println!("{}", "Steward Configuration".bold());
            println!();

            println!("{}:", "paths".cyan());
            println!("  agents: {}", config.agents_dir().display());
            println!("  skills: {}", config.skills_dir().display());
            println!();

            println!("{}:", "sources".cyan());
            println!("  registry: {}", config.registry.base_url);
            println!("  vcs: {}", config.vcs.archive_base);
            println!();

            println!("{}:", "install".cyan());
            println!("  timeout: {}s", config.install.timeout.as_secs());
            println!("  max_archive_bytes: {}", config.install.max_archive_bytes);
            println!("  max_entries: {}", config.install.max_entries);
            println!("  max_unpacked_bytes: {}", config.install.max_unpacked_bytes);
            println!();

            println!("{}:", "shell".cyan());
            println!("  timeout: {}s", config.shell.timeout.as_secs());
            println!("  max_output_bytes: {}", config.shell.max_output_bytes);
            println!();

            println!("{}:", "script".cyan());
            println!("  allow_scripts: {}", config.script.allow_scripts);
            println!("  allowed_interpreters: {}", config.script.allowed_interpreters.join(", "));
            println!("  timeout: {}s", config.script.timeout.as_secs());
            println!("  allow_network: {}", config.script.allow_network);
            println!("  allow_fs_write: {}", config.script.allow_fs_write);
            println!();

            println!("{}:", "audit".cyan());
            println!("  append_timeout: {}s", config.audit.append_timeout.as_secs());
            println!();

            println!("log_level: {}", config.log_level.to_filter());
        }
    }

    Ok(())
}
