//! Placeholder resolution for `{{name}}` template text.
//!
//! Resolution is deliberately lenient: unknown names stay in the output as
//! written so a half-filled form still previews sensibly.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::core::types::Inputs;
use crate::template::PromptTemplate;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("placeholder regex"));

/// Replace every `{{name}}` with the string form of `inputs[name]`.
///
/// Names are trimmed and matched case-sensitively. Placeholders without an input
/// are left exactly as they appear in `text`.
pub fn resolve(text: &str, inputs: &Inputs) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let name = caps[1].trim();
            match inputs.get(name) {
                Some(value) => value_to_string(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Distinct placeholder names in `text`, in first-seen order.
pub fn placeholder_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let name = caps[1].trim();
        if !name.is_empty() && !names.iter().any(|seen| seen == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// String form of an input value. Strings are inserted without JSON quoting.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// True if `inputs` holds a usable value for `name` (not null, not blank).
pub fn is_set(inputs: &Inputs, name: &str) -> bool {
    match inputs.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Required variables of `template` with no usable value in `inputs`.
pub fn missing_required(template: &PromptTemplate, inputs: &Inputs) -> Vec<String> {
    template
        .variables
        .iter()
        .filter(|var| var.required && !is_set(inputs, &var.name))
        .map(|var| var.name.clone())
        .collect()
}

/// Initial inputs built from the template's declared default values.
pub fn defaults_for(template: &PromptTemplate) -> Inputs {
    template
        .variables
        .iter()
        .filter_map(|var| {
            var.default_value
                .as_ref()
                .map(|value| (var.name.clone(), value.clone()))
        })
        .collect()
}
