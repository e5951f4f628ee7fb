//! Initialization helpers for `.taggroup/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{Config, write_config};
use super::templates::{TemplateFile, write_template_file};
use crate::template::{PromptTemplate, VariableDefinition, VariableType};

/// All canonical paths within `.taggroup/` for a project root.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub app_dir: PathBuf,
    pub executions_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let app_dir = root.join(".taggroup");
        Self {
            root: root.clone(),
            app_dir: app_dir.clone(),
            executions_dir: app_dir.join("executions"),
            exports_dir: app_dir.join("exports"),
            gitignore_path: app_dir.join(".gitignore"),
            config_path: app_dir.join("config.toml"),
        }
    }

    /// Resolve a config-relative path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing files.
    pub force: bool,
}

/// Create `.taggroup/` scaffolding in `root`.
///
/// Fails if `.taggroup/` already exists unless `options.force` is set. A sample
/// template file is written only when the configured templates path is missing.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<WorkspacePaths> {
    let paths = WorkspacePaths::new(root);
    if paths.app_dir.exists() && !paths.app_dir.is_dir() {
        return Err(anyhow!(
            "taggroup init: .taggroup exists but is not a directory"
        ));
    }
    if paths.app_dir.exists() && !options.force {
        return Err(anyhow!(
            "taggroup init: .taggroup already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.app_dir)?;
    create_dir(&paths.executions_dir)?;
    create_dir(&paths.exports_dir)?;

    fs::write(&paths.gitignore_path, APP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    let config = Config::default();
    write_config(&paths.config_path, &config)?;

    let templates_path = paths.resolve(&config.templates_path);
    if !templates_path.exists() {
        write_template_file(&templates_path, &sample_templates())?;
    }

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn sample_templates() -> TemplateFile {
    let text_var = |name: &str, required: bool| VariableDefinition {
        name: name.to_string(),
        kind: VariableType::Text,
        required,
        options: None,
        default_value: None,
    };
    TemplateFile {
        templates: vec![
            PromptTemplate {
                id: "main-reference-character".to_string(),
                name: "Main character".to_string(),
                group_tag: "mainReference-001".to_string(),
                template_text: SAMPLE_CHARACTER_PROMPT.to_string(),
                variables: vec![text_var("premise", true)],
                model: "gpt-4o-mini".to_string(),
            },
            PromptTemplate {
                id: "main-reference-portrait".to_string(),
                name: "Character portrait".to_string(),
                group_tag: "mainReference-002".to_string(),
                template_text: SAMPLE_PORTRAIT_PROMPT.to_string(),
                variables: vec![text_var("characterName", true), text_var("look", false)],
                model: "gpt-4o-mini".to_string(),
            },
        ],
    }
}

const SAMPLE_CHARACTER_PROMPT: &str = "Invent the lead character for this premise: {{premise}}\n\
Answer with lines `characterName: <name>` and `look: <one sentence>`.";
const SAMPLE_PORTRAIT_PROMPT: &str =
    "Write an image prompt for a reference portrait of {{characterName}}. Appearance: {{look}}";
const APP_GITIGNORE: &str = "executions/\nexports/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::templates::load_templates;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let paths = init_workspace(root, &InitOptions { force: false }).expect("init");

        assert!(paths.app_dir.is_dir());
        assert!(paths.executions_dir.is_dir());
        assert!(paths.exports_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            APP_GITIGNORE
        );
        let config = load_config(&paths.config_path).expect("config");
        assert_eq!(config, Config::default());

        let templates = load_templates(&paths.resolve(&config.templates_path)).expect("templates");
        assert_eq!(templates.len(), 2);
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_keeps_existing_templates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let templates_path = paths.resolve(&Config::default().templates_path);
        write_template_file(&templates_path, &TemplateFile { templates: Vec::new() })
            .expect("write");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");
        assert!(load_templates(&templates_path).expect("load").is_empty());
    }
}
