//! Declarative skills - SKILL.md manifests that contribute tools.
//!
//! A skill is a directory containing `SKILL.md` with YAML frontmatter
//! (`name`, `description`, `version`, `tools`) followed by free-form
//! instructions. Each declared tool is registered like any built-in; invoking
//! one returns the skill's instruction body to the model. The body is read
//! from disk lazily on first use and cached for the process lifetime.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{Tool, ToolResult};

/// YAML frontmatter metadata for a skill.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tools: Vec<SkillToolDecl>,
}

/// One tool contributed by a skill.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillToolDecl {
    pub name: String,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "skills".to_string()
}

/// A parsed skill manifest (instructions not yet loaded).
#[derive(Debug, Clone)]
pub struct SkillEntry {
    pub meta: SkillMeta,
    pub manifest_path: PathBuf,
}

/// Load all skill manifests under `dir` (one subdirectory per skill).
pub fn load_skills(dir: &Path) -> Vec<SkillEntry> {
    let mut skills = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return skills,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest = path.join("SKILL.md");
        if !manifest.is_file() {
            continue;
        }
        let raw = match std::fs::read_to_string(&manifest) {
            Ok(s) => s,
            Err(_) => continue,
        };
        match parse_frontmatter(&raw) {
            Some(meta) => skills.push(SkillEntry {
                meta,
                manifest_path: manifest,
            }),
            None => {
                debug!(path = %manifest.display(), "skipping skill: invalid frontmatter");
            }
        }
    }

    skills.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
    skills
}

/// Build the registrable tools for one skill.
pub fn skill_tools(entry: &SkillEntry) -> Vec<std::sync::Arc<dyn Tool>> {
    entry
        .meta
        .tools
        .iter()
        .map(|decl| {
            std::sync::Arc::new(SkillTool {
                decl: decl.clone(),
                skill_name: entry.meta.name.clone(),
                manifest_path: entry.manifest_path.clone(),
                body: OnceLock::new(),
            }) as std::sync::Arc<dyn Tool>
        })
        .collect()
}

/// Parse the YAML frontmatter between `---` delimiters.
pub fn parse_frontmatter(content: &str) -> Option<SkillMeta> {
    let trimmed = content.trim_start();
    let rest = trimmed.strip_prefix("---")?;
    let closing = rest.find("\n---")?;
    serde_yaml::from_str(&rest[..closing]).ok()
}

/// The instruction body after the closing frontmatter delimiter.
fn parse_body(content: &str) -> String {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return String::new();
    };
    match rest.find("\n---") {
        Some(idx) => rest[idx + 4..].trim_start_matches('\n').to_string(),
        None => String::new(),
    }
}

struct SkillTool {
    decl: SkillToolDecl,
    skill_name: String,
    manifest_path: PathBuf,
    /// Instructions, read on first use.
    body: OnceLock<String>,
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn description(&self) -> &str {
        &self.decl.description
    }

    fn category(&self) -> &str {
        &self.decl.category
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "What you want this skill to help with."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let body = self.body.get_or_init(|| {
            std::fs::read_to_string(&self.manifest_path)
                .map(|raw| parse_body(&raw))
                .unwrap_or_default()
        });
        if body.is_empty() {
            return ToolResult::error(format!(
                "skill '{}' has no instructions",
                self.skill_name
            ));
        }
        let request = input
            .get("request")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let mut out = format!("# Skill: {}\n\n{body}", self.skill_name);
        if !request.is_empty() {
            out.push_str(&format!("\n\n## Current request\n{request}"));
        }
        ToolResult::success(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"---
name: github-triage
description: Triage GitHub issues for a project
version: "1.2"
tools:
  - name: triage_issue
    description: Walk through issue triage steps
    category: github
---
## Steps

1. Read the issue body.
2. Label it.
"#;

    fn write_skill(dir: &Path, name: &str, content: &str) {
        let skill_dir = dir.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn manifest_frontmatter_parses() {
        let meta = parse_frontmatter(MANIFEST).unwrap();
        assert_eq!(meta.name, "github-triage");
        assert_eq!(meta.version.as_deref(), Some("1.2"));
        assert_eq!(meta.tools.len(), 1);
        assert_eq!(meta.tools[0].category, "github");
    }

    #[test]
    fn skills_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "triage", MANIFEST);
        write_skill(dir.path(), "broken", "no frontmatter at all");

        let skills = load_skills(dir.path());
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].meta.name, "github-triage");
    }

    #[tokio::test]
    async fn instructions_load_lazily_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "triage", MANIFEST);
        let skills = load_skills(dir.path());
        let tools = skill_tools(&skills[0]);
        assert_eq!(tools.len(), 1);

        let result = tools[0]
            .execute(serde_json::json!({"request": "issue #42"}))
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("Read the issue body"));
        assert!(result.content.contains("issue #42"));
    }

    #[test]
    fn missing_tools_key_defaults_to_empty() {
        let meta = parse_frontmatter("---\nname: x\ndescription: y\n---\nbody").unwrap();
        assert!(meta.tools.is_empty());
    }
}
