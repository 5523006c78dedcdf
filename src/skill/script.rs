//! Policy-gated execution of skill scripts
//!
//! A script runs only when scripts are enabled in the [`ScriptPolicy`], the
//! trust decision for `run-scripts` is satisfied, and its interpreter is on
//! the allow-list. It runs with the skill root as working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::store::SkillStore;
use crate::error::{Error, IoContext, Result};
use crate::gate::Approval;
use crate::process::{self, CancelFlag, CommandOutput, Limits};
use crate::trust::{Capability, ScriptPolicy, decide, enforce};

/// One script invocation
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub skill: String,
    /// Path relative to the skill's `scripts/` directory
    pub script: String,
    pub args: Vec<String>,
    /// Opt-in for skills whose trust level denies scripts by default
    pub allow_untrusted: bool,
}

pub fn run_script(
    store: &SkillStore,
    request: &ScriptRequest,
    policy: &ScriptPolicy,
    approval: &Approval,
    cancel: Option<&CancelFlag>,
) -> Result<CommandOutput> {
    let subject = format!("{}/{}", request.skill, request.script);
    if !policy.allow_scripts {
        return Err(Error::denied(
            format!("run-scripts: {}", subject),
            "script execution is disabled (set script.allow_scripts in config)",
        ));
    }

    let skill = store.load(&request.skill)?;
    let relative = request.script.trim_start_matches("scripts/");
    let path = store.resource_path(&request.skill, &format!("scripts/{}", relative))?;
    if !path.is_file() {
        return Err(Error::not_found("script", subject));
    }

    let interpreter = interpreter_for(&path)?;
    if !policy.allows_interpreter(&interpreter) {
        return Err(Error::denied(
            format!("run-scripts: {}", subject),
            format!("interpreter '{}' is not in script.allowed_interpreters", interpreter),
        ));
    }
    let program: PathBuf = which::which(&interpreter).map_err(|_| Error::not_found("interpreter", &interpreter))?;

    enforce(
        decide(skill.trust, Capability::RunScripts),
        &subject,
        Capability::RunScripts,
        approval,
        request.allow_untrusted,
    )?;

    let mut cmd = Command::new(program);
    cmd.arg(&path)
        .args(&request.args)
        .current_dir(&skill.path)
        .env("STEWARD_SKILL_DIR", &skill.path)
        .env("STEWARD_ALLOW_NETWORK", flag(policy.allow_network))
        .env("STEWARD_ALLOW_FS_WRITE", flag(policy.allow_fs_write));

    let limits = Limits {
        timeout: policy.timeout,
        max_output: policy.max_output_bytes,
    };
    log::info!("Running skill script {} with {} (trust {})", subject, interpreter, skill.trust);
    process::run(cmd, &subject, &limits, cancel)
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

/// Interpreter basename from the file extension, falling back to the shebang
fn interpreter_for(path: &Path) -> Result<String> {
    let by_extension = match path.extension().and_then(|e| e.to_str()) {
        Some("sh") => Some("bash"),
        Some("py") => Some("python3"),
        Some("js" | "mjs" | "cjs") => Some("node"),
        _ => None,
    };
    if let Some(interpreter) = by_extension {
        return Ok(interpreter.to_string());
    }

    let content = fs::read_to_string(path).at(path)?;
    let shebang = content
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("#!"))
        .ok_or_else(|| Error::denied(
            format!("run-scripts: {}", path.display()),
            "cannot determine interpreter (no known extension or shebang)",
        ))?;

    let mut parts = shebang.split_whitespace();
    let first = parts.next().unwrap_or_default();
    let program = if first.ends_with("/env") {
        parts.find(|p| !p.starts_with('-')).unwrap_or_default()
    } else {
        first
    };
    let name = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(Error::denied(format!("run-scripts: {}", path.display()), "empty shebang"));
    }
    Ok(name.to_string())
}
