//! Agent management commands

use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::print_structured;
use crate::agent::diff::VersionDiff;
use crate::agent::fingerprint::fingerprint;
use crate::agent::ledger::{CommitInfo, VersionLedger};
use crate::agent::{
    Agent, AgentStatus, AgentVersion, FileRef, ToolDefinition, Version, VersionFields, VersionSelector,
};
use crate::audit::{AuditLog, AuditQuery};
use crate::cli::{AgentAction, AgentFieldArgs, Globals, OutputFormat};
use crate::config::Config;
use crate::fsutil::write_atomic;
use crate::gate::{Approval, StdinPrompter};
use crate::process::interrupt_flag;
use crate::skill::context::build_system_prompt;
use crate::skill::store::SkillStore;
use crate::template::{ExecutedCommand, render, render_with_shell};

pub fn run(action: AgentAction, config: &Config, globals: Globals) -> Result<()> {
    let ledger = VersionLedger::new(config.agents_dir());
    match action {
        AgentAction::List { format } => list_agents(&ledger, OutputFormat::resolve(format)),
        AgentAction::Show { name, version, format } => {
            show_agent(&ledger, &name, &version, OutputFormat::resolve(format), config)
        }
        AgentAction::Create {
            name,
            description,
            fields,
            format,
        } => create_agent(&ledger, &name, &description, fields, OutputFormat::resolve(format), globals),
        AgentAction::Update {
            name,
            bump,
            fields,
            clear_skills,
            unset_params,
            no_advance,
            format,
        } => {
            let edit = Edit {
                fields,
                clear_skills,
                unset_params,
            };
            update_agent(&ledger, &name, bump, edit, !no_advance, OutputFormat::resolve(format), globals)
        }
        AgentAction::History { name, format } => show_history(&ledger, &name, OutputFormat::resolve(format)),
        AgentAction::Diff { name, from, to, format } => {
            diff_versions(&ledger, &name, &from, &to, OutputFormat::resolve(format))
        }
        AgentAction::Rollback { name, version } => rollback(&ledger, &name, &version, globals),
        AgentAction::Approve { name, version } => {
            change_status(&ledger, &name, &version, AgentStatus::Approved, globals)
        }
        AgentAction::Deprecate { name, version } => {
            change_status(&ledger, &name, &version, AgentStatus::Deprecated, globals)
        }
        AgentAction::Delete { name } => delete_agent(&ledger, &name, globals),
        AgentAction::Export { name, output, format } => {
            export_agent(&ledger, &name, output.as_deref(), OutputFormat::resolve(format), globals)
        }
        AgentAction::Render {
            name,
            version,
            vars,
            shell,
            no_skills,
            format,
        } => {
            let request = RenderRequest {
                name,
                version,
                vars: vars.into_iter().collect(),
                shell,
                with_skills: !no_skills,
            };
            render_agent(&ledger, request, OutputFormat::resolve(format), config, globals)
        }
        AgentAction::Status { from } => show_transitions(from),
    }
}

fn short(fingerprint: &str) -> &str {
    let end = fingerprint.len().min("sha256:".len() + 12);
    &fingerprint[..end]
}

fn status_colored(status: AgentStatus) -> ColoredString {
    match status {
        AgentStatus::Draft => status.to_string().yellow(),
        AgentStatus::Approved => status.to_string().green(),
        AgentStatus::Deprecated => status.to_string().dimmed(),
    }
}

/// Resolve `current`, `latest` or an exact version to a concrete number
fn resolve_version(ledger: &VersionLedger, name: &str, selector: &str) -> Result<Version> {
    let selector: VersionSelector = selector.parse()?;
    match selector {
        VersionSelector::Exact(v) => Ok(v),
        other => Ok(ledger.get(name, other)?.version),
    }
}

fn list_agents(ledger: &VersionLedger, format: OutputFormat) -> Result<()> {
    #[derive(Serialize)]
    struct AgentSummary {
        name: String,
        description: String,
        current_version: Version,
        status: Option<AgentStatus>,
        versions: usize,
    }

    let mut summaries = Vec::new();
    for name in ledger.list_agents()? {
        let agent = ledger.load_agent(&name)?;
        let status = match ledger.get(&name, VersionSelector::Current) {
            Ok(v) => Some(v.status),
            Err(e) => {
                log::warn!("Failed to load current version of {}: {}", name, e);
                None
            }
        };
        summaries.push(AgentSummary {
            versions: ledger.history(&name)?.len(),
            name,
            description: agent.description,
            current_version: agent.current_version,
            status,
        });
    }

    if print_structured(format, &summaries)? {
        return Ok(());
    }

    println!("{}", "Agents:".bold());
    println!();
    if summaries.is_empty() {
        println!("  {} No agents found in {}", "(none)".dimmed(), ledger.root().display());
        println!();
        println!("  Create one with: {}", "steward agent create <name> --model <model>".cyan());
        return Ok(());
    }
    for s in &summaries {
        let status = s.status.map(status_colored).unwrap_or_else(|| "corrupt".red());
        println!(
            "  {} {} [{}] ({} version{})",
            s.name.green(),
            s.current_version.to_string().cyan(),
            status,
            s.versions,
            if s.versions == 1 { "" } else { "s" }
        );
        if !s.description.is_empty() {
            println!("    {}", s.description.dimmed());
        }
    }
    Ok(())
}

fn show_agent(ledger: &VersionLedger, name: &str, selector: &str, format: OutputFormat, config: &Config) -> Result<()> {
    #[derive(Serialize)]
    struct Shown<'a> {
        agent: &'a Agent,
        version: &'a AgentVersion,
        is_current: bool,
        executions: usize,
    }

    let agent = ledger.load_agent(name)?;
    let version = ledger.get(name, selector.parse()?)?;
    let audit = AuditLog::new(ledger.clone(), config.audit.append_timeout);
    let mut filter = AuditQuery::for_agent(name);
    filter.version = Some(version.version);
    let shown = Shown {
        agent: &agent,
        version: &version,
        is_current: agent.current_version == version.version,
        executions: audit.query(&filter)?.count(),
    };
    if print_structured(format, &shown)? {
        return Ok(());
    }

    let fields = &version.fields;
    println!("{} {}", agent.name.bold(), version.version.to_string().cyan());
    if !agent.description.is_empty() {
        println!("{}", agent.description.dimmed());
    }
    println!();
    println!("  {:<14} {}", "id:", agent.id);
    println!(
        "  {:<14} {}{}",
        "status:",
        status_colored(version.status),
        if shown.is_current { " (current)".to_string() } else { format!(" (current is {})", agent.current_version) }
    );
    println!("  {:<14} {}", "fingerprint:", version.fingerprint);
    println!("  {:<14} {}", "executions:", shown.executions);
    println!("  {:<14} {} / {}", "model:", fields.model, fields.provider);
    if let Some(parent) = version.parent_version {
        println!("  {:<14} {}", "parent:", parent);
    }
    println!("  {:<14} {} by {}", "created:", version.created_at.to_rfc3339(), version.created_by);
    if !version.change_reason.is_empty() {
        println!("  {:<14} {}", "reason:", version.change_reason);
    }
    if !fields.variables.is_empty() {
        println!("  {:<14} {}", "variables:", fields.variables.join(", "));
    }
    if !fields.skills.is_empty() {
        println!("  {:<14} {}", "skills:", fields.skills.join(", "));
    }
    for (key, value) in &fields.params {
        println!("  {:<14} {} = {}", "param:", key, value);
    }
    for tool in &fields.tools {
        println!("  {:<14} {} - {}", "tool:", tool.name, tool.description);
    }
    for file in &fields.files {
        println!("  {:<14} {}", "file:", file.path);
    }
    println!();
    println!("{}", "Instructions:".bold());
    println!("{}", fields.instructions);
    Ok(())
}

fn read_instructions(args: &AgentFieldArgs) -> Result<Option<String>> {
    if let Some(path) = &args.instructions_file {
        let text = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        return Ok(Some(text));
    }
    Ok(args.instructions.clone())
}

fn read_tools(path: &Path) -> Result<Vec<ToolDefinition>> {
    let text = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    // YAML is a superset of JSON, one parser covers both
    serde_yaml::from_str(&text).context(format!("Invalid tool definitions in {}", path.display()))
}

/// `path` or `path=description`
fn file_ref(raw: &str) -> FileRef {
    match raw.split_once('=') {
        Some((path, description)) => FileRef {
            path: path.trim().to_string(),
            description: Some(description.trim().to_string()),
        },
        None => FileRef {
            path: raw.trim().to_string(),
            description: None,
        },
    }
}

/// Parameter values are JSON when they parse as JSON, strings otherwise
fn param_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn create_agent(
    ledger: &VersionLedger,
    name: &str,
    description: &str,
    args: AgentFieldArgs,
    format: OutputFormat,
    globals: Globals,
) -> Result<()> {
    let model = args
        .model
        .clone()
        .ok_or_else(|| eyre::eyre!("--model is required when creating an agent"))?;
    let instructions = read_instructions(&args)?.unwrap_or_default();

    let mut fields = VersionFields::new(instructions, model);
    if let Some(provider) = &args.provider {
        fields = fields.with_provider(provider.as_str());
    }
    for (key, raw) in &args.params {
        fields = fields.with_param(key, param_value(raw));
    }
    for skill in &args.skills {
        fields = fields.with_skill(skill);
    }
    if let Some(path) = &args.tools_file {
        for tool in read_tools(path)? {
            fields = fields.with_tool(tool);
        }
    }
    fields.files.extend(args.files.iter().map(|raw| file_ref(raw)));

    let reason = args.reason.unwrap_or_else(|| "initial version".to_string());
    let info = CommitInfo::new(Config::creator(), reason);
    let (agent, version) = ledger.create(name, description, fields, &info)?;

    if print_structured(format, &version)? {
        return Ok(());
    }
    if !globals.quiet {
        println!(
            "{} Created agent {} at {} ({})",
            "✓".green(),
            agent.name.cyan(),
            version.version,
            short(&version.fingerprint)
        );
    }
    Ok(())
}

/// Changes requested by `agent update`
struct Edit {
    fields: AgentFieldArgs,
    clear_skills: bool,
    unset_params: Vec<String>,
}

fn update_agent(
    ledger: &VersionLedger,
    name: &str,
    bump: crate::agent::BumpKind,
    edit: Edit,
    advance: bool,
    format: OutputFormat,
    globals: Globals,
) -> Result<()> {
    let current = ledger.get(name, VersionSelector::Current)?;
    let mut fields = current.fields.clone();

    if let Some(instructions) = read_instructions(&edit.fields)? {
        fields.set_instructions(instructions);
    }
    if let Some(model) = &edit.fields.model {
        fields.model = model.clone();
    }
    if let Some(provider) = &edit.fields.provider {
        fields.provider = provider.clone();
    }
    if edit.clear_skills {
        fields.skills.clear();
    }
    for skill in &edit.fields.skills {
        if !fields.skills.contains(skill) {
            fields.skills.push(skill.clone());
        }
    }
    for key in &edit.unset_params {
        fields.params.remove(key);
    }
    for (key, raw) in &edit.fields.params {
        fields.params.insert(key.clone(), param_value(raw));
    }
    if let Some(path) = &edit.fields.tools_file {
        fields.tools = read_tools(path)?;
    }
    for raw in &edit.fields.files {
        let file = file_ref(raw);
        match fields.files.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => fields.files.push(file),
        }
    }

    if fingerprint(&fields) == current.fingerprint {
        eyre::bail!("No changes to commit for {} (fields match {})", name, current.version);
    }

    let reason = edit.fields.reason.unwrap_or_default();
    let info = CommitInfo::new(Config::creator(), reason);
    let version = ledger.commit_new_version(name, fields, bump, &info, advance)?;

    if print_structured(format, &version)? {
        return Ok(());
    }
    if !globals.quiet {
        println!(
            "{} Committed {}@{} ({}){}",
            "✓".green(),
            name.cyan(),
            version.version,
            short(&version.fingerprint),
            if advance { "" } else { "; current unchanged" }
        );
    }
    Ok(())
}

fn show_history(ledger: &VersionLedger, name: &str, format: OutputFormat) -> Result<()> {
    let agent = ledger.load_agent(name)?;
    let versions = ledger.list_versions(name)?.collect::<crate::error::Result<Vec<_>>>()?;

    if format != OutputFormat::Text {
        #[derive(Serialize)]
        struct Entry<'a> {
            version: Version,
            fingerprint: &'a str,
            status: AgentStatus,
            parent_version: Option<Version>,
            created_at: String,
            created_by: &'a str,
            change_reason: &'a str,
            current: bool,
        }
        let entries: Vec<Entry> = versions
            .iter()
            .map(|v| Entry {
                version: v.version,
                fingerprint: &v.fingerprint,
                status: v.status,
                parent_version: v.parent_version,
                created_at: v.created_at.to_rfc3339(),
                created_by: &v.created_by,
                change_reason: &v.change_reason,
                current: v.version == agent.current_version,
            })
            .collect();
        print_structured(format, &entries)?;
        return Ok(());
    }

    println!("{} {}", "History of".bold(), name.cyan());
    println!();
    for v in &versions {
        let marker = if v.version == agent.current_version { "*".green().bold() } else { " ".normal() };
        println!(
            "{} {:<10} {:<11} {}  {}  {}",
            marker,
            v.version.to_string(),
            status_colored(v.status),
            short(&v.fingerprint).dimmed(),
            v.created_at.format("%Y-%m-%d %H:%M"),
            v.change_reason
        );
    }
    Ok(())
}

fn diff_versions(ledger: &VersionLedger, name: &str, from: &str, to: &str, format: OutputFormat) -> Result<()> {
    let from = resolve_version(ledger, name, from)?;
    let to = resolve_version(ledger, name, to)?;
    let diff = ledger.diff(name, from, to)?;

    if print_structured(format, &diff)? {
        return Ok(());
    }
    print_diff(name, &diff);
    Ok(())
}

fn print_diff(name: &str, diff: &VersionDiff) {
    println!("{} {} {} -> {}", "Diff".bold(), name.cyan(), diff.from, diff.to);
    if diff.is_empty() {
        println!("  {} Versions are content-identical ({})", "=".dimmed(), short(&diff.fingerprint.old));
        return;
    }
    println!(
        "  fingerprint: {} -> {}",
        short(&diff.fingerprint.old).red(),
        short(&diff.fingerprint.new).green()
    );
    if let Some(model) = &diff.model {
        println!("  model: {} -> {}", model.old.red(), model.new.green());
    }
    if let Some(provider) = &diff.provider {
        println!("  provider: {} -> {}", provider.old.red(), provider.new.green());
    }
    for p in &diff.params {
        let show = |v: &Option<serde_json::Value>| v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "(unset)".into());
        println!("  param {}: {} -> {}", p.key, show(&p.old).red(), show(&p.new).green());
    }
    for (label, change) in [("tools", &diff.tools), ("skills", &diff.skills), ("files", &diff.files)] {
        for added in &change.added {
            println!("  {} {} {}", label, "+".green(), added);
        }
        for removed in &change.removed {
            println!("  {} {} {}", label, "-".red(), removed);
        }
    }
    for tool in &diff.tools_modified {
        println!("  tools {} {}", "~".yellow(), tool);
    }

    if diff.instructions_changed() {
        println!();
        for line in diff.unified_instructions(3).lines() {
            if line.starts_with("@@") {
                println!("{}", line.cyan());
            } else if line.starts_with('+') {
                println!("{}", line.green());
            } else if line.starts_with('-') {
                println!("{}", line.red());
            } else {
                println!("{}", line);
            }
        }
    }
}

fn rollback(ledger: &VersionLedger, name: &str, version: &str, globals: Globals) -> Result<()> {
    let version = resolve_version(ledger, name, version)?;
    let agent = ledger.set_current(name, version)?;
    if !globals.quiet {
        println!("{} {} current is now {}", "✓".green(), agent.name.cyan(), agent.current_version);
    }
    Ok(())
}

fn change_status(ledger: &VersionLedger, name: &str, version: &str, status: AgentStatus, globals: Globals) -> Result<()> {
    let version = resolve_version(ledger, name, version)?;
    let updated = ledger.set_status(name, version, status)?;
    if !globals.quiet {
        println!("{} {}@{} is {}", "✓".green(), name.cyan(), updated.version, status_colored(updated.status));
    }
    Ok(())
}

fn delete_agent(ledger: &VersionLedger, name: &str, globals: Globals) -> Result<()> {
    let agent = ledger.load_agent(name)?;
    let prompter = StdinPrompter;
    let approval = Approval::from_cli(globals.yes, &prompter);
    approval.check("delete agent with all versions and audit records", &agent.name)?;

    let dir = ledger.delete(name)?;
    if !globals.quiet {
        println!("{} Deleted {} ({})", "✓".green(), name.cyan(), dir.display());
    }
    Ok(())
}

fn export_agent(
    ledger: &VersionLedger,
    name: &str,
    output: Option<&Path>,
    format: OutputFormat,
    globals: Globals,
) -> Result<()> {
    let export = ledger.export_agent(name)?;
    let encoded = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&export)?,
        OutputFormat::Json | OutputFormat::Text => serde_json::to_string_pretty(&export)?,
    };

    match output {
        Some(path) => {
            write_atomic(path, encoded.as_bytes())?;
            if !globals.quiet {
                println!(
                    "{} Exported {} ({} version(s)) to {}",
                    "✓".green(),
                    name.cyan(),
                    export.versions.len(),
                    path.display()
                );
            }
        }
        None => println!("{}", encoded.trim_end()),
    }
    Ok(())
}

struct RenderRequest {
    name: String,
    version: String,
    vars: HashMap<String, String>,
    shell: bool,
    with_skills: bool,
}

fn render_agent(
    ledger: &VersionLedger,
    request: RenderRequest,
    format: OutputFormat,
    config: &Config,
    globals: Globals,
) -> Result<()> {
    #[derive(Serialize)]
    struct Rendered<'a> {
        agent: &'a str,
        version: Version,
        fingerprint: &'a str,
        text: &'a str,
        commands: &'a [ExecutedCommand],
        skills_included: &'a [String],
        skills_skipped: &'a [String],
    }

    let version = ledger.get(&request.name, request.version.parse()?)?;
    let instructions = &version.fields.instructions;

    let (text, commands) = if request.shell {
        let prompter = StdinPrompter;
        let approval = Approval::from_cli(globals.yes, &prompter);
        let cancel = interrupt_flag();
        let outcome = render_with_shell(instructions, &request.vars, &approval, &config.shell_limits(), Some(&cancel))?;
        (outcome.text, outcome.commands)
    } else {
        (render(instructions, &request.vars)?, Vec::new())
    };

    let (text, included, skipped) = if request.with_skills && !version.fields.skills.is_empty() {
        let store = SkillStore::new(config.skills_dir());
        let prompt = build_system_prompt(&text, &version.fields.skills, &store, &config.resolver());
        (prompt.text, prompt.included, prompt.skipped)
    } else {
        (text, Vec::new(), Vec::new())
    };

    for reference in &skipped {
        eprintln!("{} skill {} is not installed; skipped", "warning:".yellow(), reference);
    }

    let rendered = Rendered {
        agent: &request.name,
        version: version.version,
        fingerprint: &version.fingerprint,
        text: &text,
        commands: &commands,
        skills_included: &included,
        skills_skipped: &skipped,
    };
    if print_structured(format, &rendered)? {
        return Ok(());
    }
    println!("{}", text);
    Ok(())
}

fn show_transitions(from: Option<AgentStatus>) -> Result<()> {
    let all = [AgentStatus::Draft, AgentStatus::Approved, AgentStatus::Deprecated];
    let sources: Vec<AgentStatus> = match from {
        Some(s) => vec![s],
        None => all.to_vec(),
    };

    for source in sources {
        let targets: Vec<String> = all
            .iter()
            .filter(|t| source.can_transition_to(**t))
            .map(|t| t.to_string())
            .collect();
        if source.is_terminal() || targets.is_empty() {
            println!("  {} -> {}", status_colored(source), "(terminal)".dimmed());
        } else {
            println!("  {} -> {}", status_colored(source), targets.join(", "));
        }
    }
    Ok(())
}
