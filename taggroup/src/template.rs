use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static GROUP_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)$").expect("group suffix regex"));

/// Input widget kind for a template variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    Text,
    Textarea,
    Number,
    Select,
    Boolean,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: VariableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub group_tag: String,
    pub template_text: String,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    pub model: String,
}

impl PromptTemplate {
    /// Trailing `-<digits>` of the group tag; tags without one sort as `0`.
    pub fn group_order(&self) -> u64 {
        group_order(&self.group_tag)
    }

    /// The declared variable called `name`, if any.
    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|var| var.name == name)
    }
}

impl VariableDefinition {
    /// Convert user-entered text to a value of this variable's type.
    ///
    /// Numbers and booleans are stored as JSON numbers and booleans; a select
    /// value must be one of the declared options when options are given.
    pub fn parse_value(&self, raw: &str) -> Result<Value> {
        match self.kind {
            VariableType::Text | VariableType::Textarea => Ok(Value::String(raw.to_string())),
            VariableType::Number => {
                let number: serde_json::Number = raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("{}: '{raw}' is not a number", self.name))?;
                Ok(Value::Number(number))
            }
            VariableType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(anyhow!("{}: '{raw}' is not a boolean", self.name)),
            },
            VariableType::Select => match &self.options {
                Some(options) if !options.iter().any(|option| option == raw) => Err(anyhow!(
                    "{}: '{raw}' is not one of {}",
                    self.name,
                    options.join(", ")
                )),
                _ => Ok(Value::String(raw.to_string())),
            },
        }
    }
}

/// Parse the ordering suffix of a group tag (`mainReference-002` -> `2`).
pub fn group_order(tag: &str) -> u64 {
    GROUP_SUFFIX_RE
        .captures(tag)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
        .unwrap_or(0)
}

/// Group name of a tag: the tag without its ordering suffix.
pub fn group_name_of(tag: &str) -> &str {
    match GROUP_SUFFIX_RE.find(tag) {
        Some(found) => &tag[..found.start()],
        None => tag,
    }
}

/// Distinct group names across templates, sorted.
pub fn group_names(templates: &[PromptTemplate]) -> Vec<String> {
    templates
        .iter()
        .map(|template| group_name_of(&template.group_tag).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::template;

    #[test]
    fn group_order_parses_trailing_digits() {
        assert_eq!(group_order("mainReference-001"), 1);
        assert_eq!(group_order("mainReference-120"), 120);
        assert_eq!(group_order("mainReference"), 0);
        assert_eq!(group_order("main-2-ref"), 0);
    }

    #[test]
    fn group_name_strips_suffix_only() {
        assert_eq!(group_name_of("mainReference-001"), "mainReference");
        assert_eq!(group_name_of("story-arc-12"), "story-arc");
        assert_eq!(group_name_of("loose"), "loose");
    }

    #[test]
    fn group_names_are_distinct_and_sorted() {
        let templates = vec![
            template("t3", "scenes-001", "x"),
            template("t1", "mainReference-002", "x"),
            template("t2", "mainReference-001", "x"),
        ];
        assert_eq!(group_names(&templates), vec!["mainReference", "scenes"]);
    }

    #[test]
    fn variable_looks_up_declared_names() {
        let template = crate::test_support::template_with_vars("t1", "g-001", "", &["premise"]);
        assert_eq!(
            template.variable("premise").map(|var| var.kind),
            Some(VariableType::Text)
        );
        assert!(template.variable("genre").is_none());
    }

    #[test]
    fn variable_definition_reads_type_field() {
        let raw = r#"{"name":"genre","type":"select","required":true,"options":["noir","comedy"]}"#;
        let var: VariableDefinition = serde_json::from_str(raw).expect("parse");
        assert_eq!(var.kind, VariableType::Select);
        assert!(var.required);
        assert_eq!(var.options.as_deref().map(<[String]>::len), Some(2));
        assert!(var.default_value.is_none());
    }

    #[test]
    fn parse_value_follows_variable_type() {
        let var = |kind, options: Option<Vec<String>>| VariableDefinition {
            name: "v".to_string(),
            kind,
            required: false,
            options,
            default_value: None,
        };
        assert_eq!(
            var(VariableType::Number, None).parse_value("42").expect("number"),
            serde_json::json!(42)
        );
        assert!(var(VariableType::Number, None).parse_value("many").is_err());
        assert_eq!(
            var(VariableType::Boolean, None).parse_value("Yes").expect("bool"),
            Value::Bool(true)
        );
        let genres = Some(vec!["noir".to_string(), "comedy".to_string()]);
        assert_eq!(
            var(VariableType::Select, genres.clone()).parse_value("noir").expect("select"),
            Value::String("noir".to_string())
        );
        assert!(var(VariableType::Select, genres).parse_value("horror").is_err());
        assert_eq!(
            var(VariableType::Textarea, None).parse_value(" a b ").expect("text"),
            Value::String(" a b ".to_string())
        );
    }
}
