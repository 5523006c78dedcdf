//! Skill management commands

use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::print_structured;
use crate::cli::{Globals, OutputFormat, SkillAction};
use crate::config::Config;
use crate::gate::{Approval, StdinPrompter};
use crate::process::interrupt_flag;
use crate::skill::installer::{HttpFetcher, InstallReport, Installer};
use crate::skill::resolver::resolve;
use crate::skill::scanner::{Finding, scan_dir};
use crate::skill::script::{ScriptRequest, run_script};
use crate::skill::store::SkillStore;
use crate::skill::{SkillResources, SkillSourceKind, trust_of};
use crate::trust::TrustLevel;

/// Run a skill subcommand
pub fn run(action: SkillAction, config: &Config, globals: Globals) -> Result<()> {
    let store = SkillStore::new(config.skills_dir());
    match action {
        SkillAction::List { format } => list_skills(&store, OutputFormat::resolve(format)),
        SkillAction::Show {
            name,
            full,
            resource,
            format,
        } => match resource {
            Some(rel) => {
                print!("{}", store.read_resource(&name, &rel)?);
                Ok(())
            }
            None => show_skill(&store, &name, full, OutputFormat::resolve(format)),
        },
        SkillAction::Create { name, description } => {
            let path = store.create(&name, description.as_deref())?;
            if !globals.quiet {
                println!("{} Created skill {} at {}", "✓".green(), name.cyan(), path.display());
            }
            Ok(())
        }
        SkillAction::Save { name, from } => {
            let content = fs::read_to_string(&from).context(format!("Failed to read {}", from.display()))?;
            let path = store.save(&name, &content)?;
            if !globals.quiet {
                println!("{} Saved {} ({})", "✓".green(), name.cyan(), path.display());
            }
            Ok(())
        }
        SkillAction::Validate { name, format } => validate_skill(config, &name, OutputFormat::resolve(format)),
        SkillAction::Delete { name } => {
            let dir = store.skill_dir(&name)?;
            if !dir.exists() {
                eyre::bail!("Skill not found: {}", name);
            }
            let prompter = StdinPrompter;
            Approval::from_cli(globals.yes, &prompter).check("delete skill", &name)?;
            let dir = store.delete(&name)?;
            if !globals.quiet {
                println!("{} Deleted skill {} ({})", "✓".green(), name.cyan(), dir.display());
            }
            Ok(())
        }
        SkillAction::Install {
            reference,
            git_ref,
            checksum,
            force,
            allow_untrusted,
            timeout,
            format,
        } => {
            let mut options = config.install_options();
            options.git_ref = git_ref;
            options.checksum = checksum;
            options.force = force;
            options.allow_untrusted = allow_untrusted;
            if let Some(secs) = timeout {
                options.timeout = Duration::from_secs(secs);
            }

            let fetcher = HttpFetcher;
            let hook = print_findings;
            let installer = Installer::new(config.skills_dir(), config.resolver(), &fetcher).with_findings_hook(&hook);
            let prompter = StdinPrompter;
            let approval = Approval::from_cli(globals.yes, &prompter);
            let report = installer.install(&reference, &options, &approval, &interrupt_flag())?;
            print_install(&report, OutputFormat::resolve(format), globals)
        }
        SkillAction::Import { path, force, format } => {
            let mut options = config.install_options();
            options.force = force;

            let fetcher = HttpFetcher;
            let hook = print_findings;
            let installer = Installer::new(config.skills_dir(), config.resolver(), &fetcher).with_findings_hook(&hook);
            let prompter = StdinPrompter;
            let approval = Approval::from_cli(globals.yes, &prompter);
            let report = installer.import_dir(&path, &options, &approval, &interrupt_flag())?;
            print_install(&report, OutputFormat::resolve(format), globals)
        }
        SkillAction::Resolve {
            reference,
            git_ref,
            format,
        } => {
            let descriptor = resolve(&reference, &config.resolver(), git_ref.as_deref())?;
            if !print_structured(OutputFormat::resolve(format), &descriptor)? {
                println!("{} {}", "Reference:".bold(), descriptor.reference);
                println!("  source:   {}", descriptor.source);
                println!("  trust:    {} ({})", descriptor.trust_source, crate::trust::classify(descriptor.trust_source));
                if let Some(url) = &descriptor.url {
                    println!("  url:      {}", url);
                }
                if let Some(subpath) = &descriptor.subpath {
                    println!("  subpath:  {}", subpath);
                }
                if let Some(name) = &descriptor.expected_name {
                    println!("  name:     {}", name);
                }
            }
            Ok(())
        }
        SkillAction::Scan { target, format } => scan(&store, &target, OutputFormat::resolve(format)),
        SkillAction::Run {
            name,
            script,
            allow_untrusted,
            args,
        } => {
            let request = ScriptRequest {
                skill: name,
                script,
                args,
                allow_untrusted,
            };
            let prompter = StdinPrompter;
            let approval = Approval::from_cli(globals.yes, &prompter);
            let output = run_script(&store, &request, &config.script, &approval, Some(&interrupt_flag()))?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if output.truncated {
                eprintln!("{} output truncated", "warning:".yellow());
            }
            Ok(())
        }
    }
}

fn trust_colored(level: TrustLevel) -> ColoredString {
    match level {
        TrustLevel::High => level.to_string().green(),
        TrustLevel::Medium => level.to_string().cyan(),
        TrustLevel::Low => level.to_string().yellow(),
        TrustLevel::Untrusted => level.to_string().red(),
    }
}

/// Serializable skill summary for JSON/YAML output
#[derive(Serialize)]
struct SkillInfo {
    name: String,
    description: String,
    source: SkillSourceKind,
    trust: TrustLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_ref: Option<String>,
}

fn list_skills(store: &SkillStore, format: OutputFormat) -> Result<()> {
    let mut infos = Vec::new();
    for name in store.list()? {
        // Front-matter and receipt only; bodies are not read for a listing
        let loaded = store.metadata(&name).and_then(|meta| Ok((meta, store.receipt(&name)?)));
        match loaded {
            Ok((meta, receipt)) => {
                let (_, trust) = trust_of(receipt.as_ref());
                infos.push(SkillInfo {
                    name: meta.name,
                    description: meta.description,
                    source: receipt.as_ref().map_or(SkillSourceKind::Local, |r| r.source),
                    trust,
                    source_ref: receipt.map(|r| r.reference),
                });
            }
            Err(e) => log::warn!("Skipping unreadable skill {}: {}", name, e),
        }
    }

    if print_structured(format, &infos)? {
        return Ok(());
    }

    println!("{}", "Skills:".bold());
    println!();
    if infos.is_empty() {
        println!("  {} No skills found in {}", "(none)".dimmed(), store.root().display());
        println!();
        println!("  Create one with: {}", "steward skill create <name>".cyan());
        return Ok(());
    }
    for info in &infos {
        println!("  {} [{} / {}]", info.name.green(), info.source, trust_colored(info.trust));
        if !info.description.is_empty() {
            println!("    {}", info.description.dimmed());
        }
    }
    Ok(())
}

fn show_skill(store: &SkillStore, name: &str, full: bool, format: OutputFormat) -> Result<()> {
    #[derive(Serialize)]
    struct Shown {
        #[serde(flatten)]
        skill: crate::skill::Skill,
        resources: SkillResources,
    }

    let skill = store.load(name)?;
    let resources = store.resources(name)?;

    if format != OutputFormat::Text {
        print_structured(format, &Shown { skill, resources })?;
        return Ok(());
    }

    let meta = &skill.metadata;
    println!("{}", meta.name.bold());
    println!("{}", meta.description);
    println!();
    println!("  {:<14} {}", "path:", skill.path.display());
    println!("  {:<14} {}", "source:", skill.source);
    if let Some(reference) = &skill.source_ref {
        println!("  {:<14} {}", "reference:", reference);
    }
    println!("  {:<14} {}", "trust:", trust_colored(skill.trust));
    if let Some(license) = &meta.license {
        println!("  {:<14} {}", "license:", license);
    }
    if let Some(compat) = &meta.compatibility {
        println!("  {:<14} {}", "compatibility:", compat);
    }
    if !meta.allowed_tools.is_empty() {
        println!("  {:<14} {}", "allowed-tools:", meta.allowed_tools.join(" "));
    }
    for (key, value) in &meta.metadata {
        println!("  {:<14} {} = {}", "metadata:", key, value);
    }

    if !full {
        return Ok(());
    }

    for (label, items) in [
        ("scripts", &resources.scripts),
        ("references", &resources.references),
        ("assets", &resources.assets),
    ] {
        if !items.is_empty() {
            println!();
            println!("{}:", label.cyan());
            for item in items {
                println!("  {}", item);
            }
        }
    }
    println!();
    println!("{}", "Instructions:".bold());
    println!("{}", skill.instructions);
    Ok(())
}

fn validate_skill(config: &Config, name: &str, format: OutputFormat) -> Result<()> {
    let fetcher = HttpFetcher;
    let installer = Installer::new(config.skills_dir(), config.resolver(), &fetcher);
    let report = installer.verify(name)?;

    if print_structured(format, &report)? {
        return Ok(());
    }
    println!(
        "{} {} is valid (trust {} from {})",
        "✓".green(),
        report.name.cyan(),
        trust_colored(report.trust),
        report.trust_source
    );
    print_findings(&report.name, &report.findings);
    Ok(())
}

/// Findings go to stderr so structured stdout stays parseable
fn print_findings(subject: &str, findings: &[Finding]) {
    if findings.is_empty() {
        return;
    }
    eprintln!("{} {} risky pattern(s) in {}:", "⚠".yellow(), findings.len(), subject.cyan());
    for f in findings {
        eprintln!(
            "  {}:{} {} {}",
            f.path,
            f.line,
            format!("[{}]", f.category).yellow(),
            f.excerpt.dimmed()
        );
    }
}

fn print_install(report: &InstallReport, format: OutputFormat, globals: Globals) -> Result<()> {
    if print_structured(format, report)? {
        return Ok(());
    }
    if globals.quiet {
        return Ok(());
    }
    println!(
        "{} {} {} ({} / {})",
        "✓".green(),
        if report.replaced { "Replaced" } else { "Installed" },
        report.name.cyan(),
        report.source,
        trust_colored(report.trust)
    );
    println!("  path: {}", report.path.display());
    if let Some(checksum) = &report.checksum {
        println!("  checksum: {}", checksum.dimmed());
    }
    Ok(())
}

fn scan(store: &SkillStore, target: &str, format: OutputFormat) -> Result<()> {
    let as_path = Path::new(target);
    let dir = if as_path.is_dir() {
        as_path.to_path_buf()
    } else {
        let dir = store.skill_dir(target)?;
        if !dir.is_dir() {
            eyre::bail!("No skill or directory named {}", target);
        }
        dir
    };

    let findings = scan_dir(&dir)?;
    if print_structured(format, &findings)? {
        return Ok(());
    }
    if findings.is_empty() {
        println!("{} No risky patterns in {}", "✓".green(), dir.display());
    } else {
        print_findings(target, &findings);
    }
    Ok(())
}
