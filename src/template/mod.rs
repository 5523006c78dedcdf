//! Instruction templates
//!
//! Two placeholder forms:
//!
//! - `{{name}}` / `{{name|fallback}}`: variable substitution
//! - `!{command}`: replaced by the command's stdout, gated by an [`Approval`]
//!
//! Variables are substituted first, so the command text that gets approved
//! and executed is the literal post-substitution string.

use colored::*;
use lazy_regex::{Lazy, Regex, lazy_regex};
use regex::Captures;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::gate::Approval;
use crate::process::{CancelFlag, Limits, run_shell};

static VARIABLE: Lazy<Regex> = lazy_regex!(r"\{\{\s*(\w+)\s*(?:\|([^}]*))?\}\}");
static COMMAND: Lazy<Regex> = lazy_regex!(r"(?s)!\{(.*?)\}");

/// Distinct variable names in first-appearance order
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for caps in VARIABLE.captures_iter(template) {
        let name = &caps[1];
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Names that have neither a supplied value nor an inline fallback
pub fn missing_variables(template: &str, variables: &HashMap<String, String>) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for caps in VARIABLE.captures_iter(template) {
        let name = &caps[1];
        if variables.contains_key(name) || caps.get(2).is_some() {
            continue;
        }
        if !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    missing
}

/// Validate a variable set up front, before any external call is made
pub fn check_variables(template: &str, variables: &HashMap<String, String>) -> Result<()> {
    let names = missing_variables(template, variables);
    if names.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingVariable { names })
    }
}

/// Substitute every `{{name}}` placeholder
pub fn render(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    check_variables(template, variables)?;

    let rendered = VARIABLE.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match variables.get(name) {
            Some(value) => value.clone(),
            None => caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        }
    });
    Ok(rendered.into_owned())
}

/// Distinct commands that would run for this (already variable-substituted) text
pub fn extract_commands(text: &str) -> Vec<String> {
    let mut commands: Vec<String> = Vec::new();
    for caps in COMMAND.captures_iter(text) {
        let cmd = caps[1].trim();
        if !cmd.is_empty() && !commands.iter().any(|c| c == cmd) {
            commands.push(cmd.to_string());
        }
    }
    commands
}

/// A command executed during rendering
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedCommand {
    pub command: String,
    pub output_bytes: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub text: String,
    pub commands: Vec<ExecutedCommand>,
}

/// Render variables, then expand `!{command}` placeholders.
///
/// Every command is approved before any runs, and every command runs before
/// any output is spliced in, so a refusal or failure leaves nothing applied.
pub fn render_with_shell(
    template: &str,
    variables: &HashMap<String, String>,
    approval: &Approval,
    limits: &Limits,
    cancel: Option<&CancelFlag>,
) -> Result<RenderOutcome> {
    let text = render(template, variables)?;
    let commands = extract_commands(&text);
    if commands.is_empty() {
        return Ok(RenderOutcome {
            text,
            commands: Vec::new(),
        });
    }

    approval.ensure_possible("run template command")?;
    if approval.is_bypass() {
        log::warn!("Running {} template command(s) without confirmation", commands.len());
    }
    for command in &commands {
        approval.check("run template command", command)?;
    }

    let mut outputs: HashMap<&str, String> = HashMap::new();
    let mut executed = Vec::with_capacity(commands.len());
    for command in &commands {
        if let Some(flag) = cancel {
            flag.check("template render")?;
        }

        eprintln!("{} {}", "[steward] running:".yellow(), command);
        log::info!("Template command: {}", command);

        let output = run_shell(command, limits, cancel)?;
        if output.truncated {
            eprintln!(
                "{} output of '{}' exceeded {} bytes; truncated",
                "[steward] warning:".yellow(),
                command,
                limits.max_output
            );
        }
        executed.push(ExecutedCommand {
            command: command.clone(),
            output_bytes: output.stdout.len(),
            truncated: output.truncated,
        });
        outputs.insert(command.as_str(), output.stdout);
    }

    let text = COMMAND
        .replace_all(&text, |caps: &Captures| {
            outputs.get(caps[1].trim()).cloned().unwrap_or_default()
        })
        .into_owned();

    Ok(RenderOutcome {
        text,
        commands: executed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::testing::ScriptedPrompter;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render_basic() {
        assert_eq!(render("Hello {{x}}", &vars(&[("x", "world")])).unwrap(), "Hello world");
    }

    #[test]
    fn test_render_missing_lists_all() {
        let err = render("{{a}} {{b}} {{a}}", &HashMap::new()).unwrap_err();
        match err {
            Error::MissingVariable { names } => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_fallback() {
        let template = "Tone: {{tone|friendly}}, for {{company}}";
        assert_eq!(
            render(template, &vars(&[("company", "Acme")])).unwrap(),
            "Tone: friendly, for Acme"
        );
        assert_eq!(
            render(template, &vars(&[("company", "Acme"), ("tone", "formal")])).unwrap(),
            "Tone: formal, for Acme"
        );
        assert_eq!(extract_variables(template), vec!["tone", "company"]);
        assert_eq!(missing_variables(template, &HashMap::new()), vec!["company"]);
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let out = render("{{a}}", &vars(&[("a", "{{b}}")])).unwrap();
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn test_shell_refused_runs_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("ran");
        let template = format!("x !{{touch {}}}", marker.display());

        let err = render_with_shell(&template, &HashMap::new(), &Approval::Refuse, &Limits::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(!marker.exists());
    }

    #[test]
    fn test_shell_bypass_substitutes_output() {
        let outcome = render_with_shell(
            "Branch: !{echo {{name}}}",
            &vars(&[("name", "main")]),
            &Approval::Bypass,
            &Limits::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.text, "Branch: main\n");
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(outcome.commands[0].command, "echo main");
    }

    #[test]
    fn test_shell_declined_second_runs_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("first");
        let template = format!("!{{touch {}}} !{{echo two}}", marker.display());
        let prompter = ScriptedPrompter::new(&[true, false]);

        let err = render_with_shell(
            &template,
            &HashMap::new(),
            &Approval::Interactive(&prompter),
            &Limits::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert!(!marker.exists());
    }

    #[test]
    fn test_shell_failure_fails_render() {
        let err = render_with_shell("!{exit 2}", &HashMap::new(), &Approval::Bypass, &Limits::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: 2, .. }));
    }

    #[test]
    fn test_shell_timeout() {
        let limits = Limits {
            timeout: Duration::from_millis(100),
            max_output: 1024,
        };
        let err = render_with_shell("!{sleep 5}", &HashMap::new(), &Approval::Bypass, &limits, None).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
