//! SKILL.md scaffolding for `skill create`

/// Generate a SKILL.md for a new skill; the result passes manifest validation
pub fn generate_skill_template(name: &str, description: Option<&str>) -> String {
    let title = name
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("Brief description of what this skill does and when to use it");

    format!(
        r#"---
name: {name}
description: {description}
license: MIT
metadata:
  version: "0.1.0"
allowed-tools: ""
---

# {title}

## When to use

- [Requests or contexts where this skill applies]

## Instructions

1. [First step]
2. [Second step]

## Resources

- `scripts/`: executable helpers, run through `steward skill run {name} <script>`
- `references/`: documents loaded on demand
- `assets/`: templates and static files
"#,
        name = name,
        description = serde_json::Value::String(description.to_string()),
        title = title
    )
}
