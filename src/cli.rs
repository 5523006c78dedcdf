use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::agent::{AgentStatus, BumpKind};
use crate::audit::ExportFormat;
use crate::trust::TrustSource;

/// Output format for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Resolve the effective output format.
    /// If user specified a format, use it.
    /// Otherwise: TTY → Text, non-TTY (pipe) → Json
    pub fn resolve(user_choice: Option<OutputFormat>) -> OutputFormat {
        match user_choice {
            Some(fmt) => fmt,
            None => {
                if std::io::stdout().is_terminal() {
                    OutputFormat::Text
                } else {
                    OutputFormat::Json
                }
            }
        }
    }
}

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Versioned agent configurations and a trust pipeline for AI-assistant skills",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/steward/logs/steward.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to steward.yaml config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, help = "Suppress non-error output")]
    pub quiet: bool,

    /// Approve every gated action without prompting
    #[arg(short, long, global = true, help = "Skip confirmation prompts (required when stdin is not a terminal)")]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags every command may consult
#[derive(Debug, Clone, Copy)]
pub struct Globals {
    pub yes: bool,
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage versioned agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Record and inspect agent executions
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Manage, install and run skills
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },

    /// Inspect the trust policy
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Semantic fields shared by `agent create` and `agent update`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct AgentFieldArgs {
    /// Instructions template (may reference {{variables}} and !{commands})
    #[arg(long, short = 'i', conflicts_with = "instructions_file")]
    pub instructions: Option<String>,

    /// Read the instructions template from a file
    #[arg(long)]
    pub instructions_file: Option<PathBuf>,

    /// Model identifier
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Provider tag
    #[arg(long)]
    pub provider: Option<String>,

    /// Model parameter as key=value (value parsed as JSON when possible)
    #[arg(long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Skill reference to attach (repeatable)
    #[arg(long = "skill")]
    pub skills: Vec<String>,

    /// JSON or YAML list of tool definitions (replaces existing tools)
    #[arg(long)]
    pub tools_file: Option<PathBuf>,

    /// File reference as path or path=description (repeatable)
    #[arg(long = "file")]
    pub files: Vec<String>,

    /// Why this version exists
    #[arg(long, short = 'r')]
    pub reason: Option<String>,
}

#[derive(Subcommand)]
pub enum AgentAction {
    /// List agents
    List {
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show one version of an agent
    Show {
        name: String,

        /// current, latest or an exact version
        #[arg(long, default_value = "current")]
        version: String,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Create an agent at version 1.0.0
    Create {
        name: String,

        #[arg(long, short = 'd', default_value = "")]
        description: String,

        #[command(flatten)]
        fields: AgentFieldArgs,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Commit a new version derived from the current one
    Update {
        name: String,

        #[arg(long, value_enum, default_value = "minor")]
        bump: BumpKind,

        #[command(flatten)]
        fields: AgentFieldArgs,

        /// Drop all attached skills before adding --skill ones
        #[arg(long)]
        clear_skills: bool,

        /// Remove a model parameter (repeatable)
        #[arg(long = "unset-param")]
        unset_params: Vec<String>,

        /// Keep the current pointer where it is
        #[arg(long)]
        no_advance: bool,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// List versions in ascending order
    History {
        name: String,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Compare two versions
    Diff {
        name: String,
        from: String,
        to: String,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Point current at an earlier version; nothing is deleted
    Rollback { name: String, version: String },

    /// Mark a version approved
    Approve {
        name: String,

        #[arg(long, default_value = "current")]
        version: String,
    },

    /// Mark a version deprecated
    Deprecate {
        name: String,

        #[arg(long, default_value = "current")]
        version: String,
    },

    /// Delete an agent with all versions and audit records
    Delete { name: String },

    /// Export an agent with its full version history
    Export {
        name: String,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Render a version's instructions with variables and attached skills
    Render {
        name: String,

        #[arg(long, default_value = "current")]
        version: String,

        /// Template variable as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,

        /// Expand !{command} placeholders (each command needs approval)
        #[arg(long)]
        shell: bool,

        /// Leave attached skills out of the output
        #[arg(long)]
        no_skills: bool,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show allowed status transitions
    Status {
        #[arg(value_enum)]
        from: Option<AgentStatus>,
    },
}

#[derive(Subcommand)]
pub enum AuditAction {
    /// Append an execution record for an agent version
    Record {
        agent: String,

        #[arg(long, default_value = "current")]
        version: String,

        #[arg(long)]
        correlation_id: Option<String>,

        #[arg(long, default_value = "0")]
        input_tokens: u64,

        #[arg(long, default_value = "0")]
        output_tokens: u64,

        #[arg(long)]
        session: Option<String>,

        /// RFC 3339 timestamp when backfilling an earlier execution
        #[arg(long)]
        at: Option<String>,
    },

    /// Query records, most recent first
    Query {
        /// Limit to one agent
        agent: Option<String>,

        #[arg(long)]
        version: Option<String>,

        /// RFC 3339 lower bound
        #[arg(long)]
        since: Option<String>,

        /// RFC 3339 upper bound
        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        correlation_id: Option<String>,

        #[arg(long, short = 'n')]
        limit: Option<usize>,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Export records to a file
    Export {
        /// Destination file
        output: PathBuf,

        #[arg(long)]
        agent: Option<String>,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        #[arg(long = "as", value_enum, default_value = "jsonl")]
        export_format: ExportFormat,
    },

    /// Check every record's fingerprint against the ledger
    Verify {
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },
}

#[derive(Subcommand)]
pub enum SkillAction {
    /// List installed skills
    List {
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show a skill's metadata, body and resources
    Show {
        name: String,

        /// Include the instructions body and resource list
        #[arg(long)]
        full: bool,

        /// Print one bundled file instead (path relative to the skill root)
        #[arg(long)]
        resource: Option<String>,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Scaffold a new skill
    Create {
        name: String,

        #[arg(long, short = 'd')]
        description: Option<String>,
    },

    /// Replace a skill's SKILL.md with the contents of a file
    Save {
        name: String,

        /// New SKILL.md contents
        #[arg(long)]
        from: PathBuf,
    },

    /// Re-validate an installed skill in place
    Validate {
        name: String,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Delete an installed skill
    Delete { name: String },

    /// Fetch, verify and install a skill reference
    Install {
        /// name | registry:<name> | vcs:<owner>/<repo>[/<path>][@<ref>] | https://… | file://…
        reference: String,

        /// Ref for vcs: references without @ref
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Expected archive digest (sha256:<hex>)
        #[arg(long)]
        checksum: Option<String>,

        /// Replace an existing skill
        #[arg(long)]
        force: bool,

        /// Opt in to actions the trust policy denies by default
        #[arg(long)]
        allow_untrusted: bool,

        /// Install timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Install a skill from a local directory
    Import {
        path: PathBuf,

        #[arg(long)]
        force: bool,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Show where a reference would be fetched from
    Resolve {
        reference: String,

        #[arg(long = "ref")]
        git_ref: Option<String>,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Scan an installed skill or a directory for risky content
    Scan {
        /// Skill name or directory path
        target: String,

        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Run a script from a skill's scripts/ directory
    Run {
        name: String,
        script: String,

        /// Opt in when the skill's trust level denies scripts by default
        #[arg(long)]
        allow_untrusted: bool,

        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum TrustAction {
    /// Print the decision for every trust level and capability
    Table {
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Trust level assigned to a source
    Classify {
        #[arg(value_enum)]
        source: TrustSource,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Print the config file in use and the store roots
    Path,
}

/// Parse `key=value`
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert_eq!(parse_key_value("empty=").unwrap(), ("empty".to_string(), String::new()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_parse_global_yes_after_subcommand() {
        let cli = Cli::try_parse_from(["steward", "skill", "delete", "pdf", "--yes"]).unwrap();
        assert!(cli.yes);
        assert!(matches!(cli.command, Commands::Skill { action: SkillAction::Delete { .. } }));
    }

    #[test]
    fn test_skill_run_passes_hyphen_args() {
        let cli = Cli::try_parse_from(["steward", "skill", "run", "pdf", "fill.py", "--", "-v", "in.pdf"]).unwrap();
        match cli.command {
            Commands::Skill {
                action: SkillAction::Run { args, .. },
            } => assert_eq!(args, vec!["-v", "in.pdf"]),
            _ => panic!("wrong command"),
        }
    }
}
