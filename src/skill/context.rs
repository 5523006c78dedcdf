//! Skill bodies appended to rendered agent instructions

use serde::Serialize;

use super::Skill;
use super::resolver::{ResolverConfig, resolve};
use super::store::SkillStore;

/// Rendered system prompt plus which skill references made it in
#[derive(Debug, Clone, Serialize)]
pub struct SystemPrompt {
    pub text: String,
    pub included: Vec<String>,
    /// References skipped with a warning (not installed or unreadable)
    pub skipped: Vec<String>,
}

/// Format loaded skills as a Markdown `## Skills` section; empty when there are none
pub fn format_skills_context(skills: &[Skill]) -> String {
    if skills.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        "\n## Skills\n".to_string(),
        "The following skills are available to guide your responses:\n".to_string(),
    ];
    for skill in skills {
        lines.push(format!("### {}\n", skill.name()));
        if !skill.metadata.description.is_empty() {
            lines.push(format!("*{}*\n", skill.metadata.description));
        }
        lines.push(skill.instructions.trim().to_string());
        lines.push("\n".to_string());
    }
    lines.join("\n")
}

/// Append the skills named by `refs` to `instructions`.
///
/// Remote references are only used once installed; the installed copy is
/// found by its expected name or by the reference recorded in its receipt.
pub fn build_system_prompt(
    instructions: &str,
    refs: &[String],
    store: &SkillStore,
    resolver: &ResolverConfig,
) -> SystemPrompt {
    let mut skills = Vec::new();
    let mut included = Vec::new();
    let mut skipped = Vec::new();

    for reference in refs {
        match installed_name(reference, store, resolver).map(|name| store.load(&name)) {
            Some(Ok(skill)) => {
                included.push(reference.clone());
                skills.push(skill);
            }
            Some(Err(e)) => {
                log::warn!("Skipping skill {}: {}", reference, e);
                skipped.push(reference.clone());
            }
            None => {
                log::warn!("Skipping skill {}: not installed", reference);
                skipped.push(reference.clone());
            }
        }
    }

    let context = format_skills_context(&skills);
    let text = if context.is_empty() {
        instructions.to_string()
    } else {
        format!("{}\n{}", instructions, context)
    };
    SystemPrompt { text, included, skipped }
}

fn installed_name(reference: &str, store: &SkillStore, resolver: &ResolverConfig) -> Option<String> {
    // `vcs:` references without an inline ref still identify an installed copy
    let descriptor = resolve(reference, resolver, Some("HEAD")).ok()?;
    let installed = store.list().ok()?;

    if let Some(name) = descriptor.expected_name.as_deref() {
        if installed.iter().any(|n| n == name) {
            return Some(name.to_string());
        }
    }
    if descriptor.is_local() {
        return None;
    }
    installed.into_iter().find(|name| {
        store
            .receipt(name)
            .ok()
            .flatten()
            .is_some_and(|r| r.reference == reference)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_empty() {
        assert_eq!(format_skills_context(&[]), "");
    }

    #[test]
    fn test_build_system_prompt() {
        let temp = tempdir().unwrap();
        let store = SkillStore::new(temp.path());
        store.create("pdf", Some("Handle PDFs")).unwrap();
        store
            .save("pdf", "---\nname: pdf\ndescription: Handle PDFs\n---\nAlways check page count.\n")
            .unwrap();

        let refs = vec!["pdf".to_string(), "registry:missing".to_string(), "ghost".to_string()];
        let prompt = build_system_prompt("You are helpful.", &refs, &store, &ResolverConfig::default());

        assert!(prompt.text.starts_with("You are helpful.\n"));
        assert!(prompt.text.contains("## Skills"));
        assert!(prompt.text.contains("### pdf"));
        assert!(prompt.text.contains("*Handle PDFs*"));
        assert!(prompt.text.contains("Always check page count."));
        assert_eq!(prompt.included, vec!["pdf"]);
        assert_eq!(prompt.skipped, vec!["registry:missing", "ghost"]);
    }

    #[test]
    fn test_no_skills_leaves_instructions_untouched() {
        let temp = tempdir().unwrap();
        let store = SkillStore::new(temp.path());
        let prompt = build_system_prompt("Hi", &["vcs:a/b/c".to_string()], &store, &ResolverConfig::default());
        assert_eq!(prompt.text, "Hi");
        assert_eq!(prompt.skipped.len(), 1);
    }
}
