//! Template loading with schema validation at the boundary.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::template::PromptTemplate;

const TEMPLATE_SET_SCHEMA: &str = include_str!("../../schemas/template_set.schema.json");

static TEMPLATE_SET_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(TEMPLATE_SET_SCHEMA).expect("template set schema should be JSON");
    validator_for(&schema).expect("template set schema should compile")
});

/// On-disk shape of a template file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateFile {
    pub templates: Vec<PromptTemplate>,
}

/// Load templates from a `{ "templates": [...] }` file or a directory of
/// single-template `*.json` files (visited in path order).
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_templates(path: &Path) -> Result<Vec<PromptTemplate>> {
    let templates = if path.is_dir() {
        load_template_dir(path)?
    } else {
        load_template_file(path)?
    };
    ensure_unique_ids(&templates)?;
    debug!(count = templates.len(), "loaded templates");
    Ok(templates)
}

fn load_template_file(path: &Path) -> Result<Vec<PromptTemplate>> {
    let value = read_json(path)?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let file: TemplateFile = serde_json::from_value(value)
        .with_context(|| format!("deserialize templates {}", path.display()))?;
    Ok(file.templates)
}

fn load_template_dir(dir: &Path) -> Result<Vec<PromptTemplate>> {
    let mut templates = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some("json")
        {
            continue;
        }
        let value = read_json(path)?;
        let wrapped = json!({ "templates": [value] });
        validate_schema(&wrapped).with_context(|| format!("validate {}", path.display()))?;
        let template: PromptTemplate = serde_json::from_value(value)
            .with_context(|| format!("deserialize template {}", path.display()))?;
        templates.push(template);
    }
    Ok(templates)
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read templates {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn validate_schema(value: &Value) -> Result<()> {
    let validator = &*TEMPLATE_SET_VALIDATOR;
    if validator.is_valid(value) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(anyhow!(
        "template schema validation failed: {}",
        messages.join("; ")
    ))
}

fn ensure_unique_ids(templates: &[PromptTemplate]) -> Result<()> {
    let mut seen = HashSet::new();
    for template in templates {
        if !seen.insert(template.id.as_str()) {
            return Err(anyhow!("duplicate template id '{}'", template.id));
        }
    }
    Ok(())
}

/// Write a template file (pretty JSON), creating parent directories.
pub fn write_template_file(path: &Path, file: &TemplateFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(file).context("serialize templates")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write templates {}", path.display()))
}

/// Loaded templates with lookup by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<PromptTemplate>,
    by_id: BTreeMap<String, usize>,
}

impl TemplateSet {
    pub fn new(templates: Vec<PromptTemplate>) -> Self {
        let by_id = templates
            .iter()
            .enumerate()
            .map(|(index, template)| (template.id.clone(), index))
            .collect();
        Self { templates, by_id }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(load_templates(path)?))
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.by_id.get(id).map(|&index| &self.templates[index])
    }

    /// Like [`TemplateSet::get`], but a missing template is an error.
    pub fn require(&self, id: &str) -> Result<&PromptTemplate> {
        self.get(id)
            .ok_or_else(|| anyhow!("template '{id}' not found in template set"))
    }

    pub fn all(&self) -> &[PromptTemplate] {
        &self.templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{template, template_with_vars};

    #[test]
    fn file_round_trips_through_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/templates.json");
        let file = TemplateFile {
            templates: vec![
                template_with_vars("hero", "story-001", "Hero for {{premise}}", &["premise"]),
                template("villain", "story-002", "Villain"),
            ],
        };
        write_template_file(&path, &file).expect("write");
        assert_eq!(load_templates(&path).expect("load"), file.templates);
    }

    #[test]
    fn schema_rejects_missing_fields_and_bad_variable_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("templates.json");

        fs::write(&path, r#"{"templates":[{"id":"a","name":"A","group_tag":"g-001"}]}"#)
            .expect("write");
        let err = load_templates(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));

        fs::write(
            &path,
            r#"{"templates":[{"id":"a","name":"A","group_tag":"g-001","template_text":"","model":"m","variables":[{"name":"bad name"}]}]}"#,
        )
        .expect("write");
        assert!(load_templates(&path).is_err());
    }

    #[test]
    fn directory_loads_json_files_in_name_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        for (file_name, id, tag) in [("b.json", "second", "g-002"), ("a.json", "first", "g-001")] {
            let body = serde_json::to_string(&template(id, tag, "")).expect("json");
            fs::write(dir.join(file_name), body).expect("write");
        }
        fs::write(dir.join("README.md"), "not a template").expect("write");

        let ids: Vec<String> = load_templates(dir)
            .expect("load")
            .into_iter()
            .map(|template| template.id)
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("templates.json");
        let file = TemplateFile {
            templates: vec![template("a", "g-001", ""), template("a", "g-002", "")],
        };
        write_template_file(&path, &file).expect("write");
        let err = load_templates(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate template id 'a'"));
    }

    #[test]
    fn template_set_looks_up_by_id() {
        let set = TemplateSet::new(vec![template("a", "g-001", ""), template("b", "g-002", "")]);
        assert_eq!(set.get("b").map(|t| t.group_tag.as_str()), Some("g-002"));
        assert!(set.get("c").is_none());
        assert!(set.require("c").is_err());
        assert_eq!(set.all().len(), 2);
    }
}
