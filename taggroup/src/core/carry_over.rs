//! Carry-over variable extraction from free-text model output.
//!
//! Extraction is best-effort. The engine only depends on the
//! [`CarryOverExtractor`] trait so the heuristic can be replaced without touching
//! the state machine.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Extracted variable name -> value.
pub type CarryOver = BTreeMap<String, String>;

/// Strategy that turns raw step output into reusable variables.
///
/// Implementations must never panic and return an empty map when nothing is
/// recognized.
pub trait CarryOverExtractor {
    fn extract(&self, raw_output: &str) -> CarryOver;
}

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#{1,6}\s+([A-Za-z_][A-Za-z0-9_]*)\s*#*\s*$").expect("heading regex")
});

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[-*+]\s+)?(?:\*\*|__)?([A-Za-z_][A-Za-z0-9_]*)(?:\*\*|__)?\s*:(?:\*\*|__)?\s*(.*?)\s*$",
    )
    .expect("key value regex")
});

/// Default extraction rule.
///
/// Three passes, later passes overwriting earlier ones on name collisions:
/// 1. Markdown headings named like an identifier (`## characterName`), valued by
///    the paragraph that follows.
/// 2. `key: value` lines, optionally bulleted or with a bold key.
/// 3. Scalar fields of the first JSON object in the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueExtractor;

impl CarryOverExtractor for KeyValueExtractor {
    fn extract(&self, raw_output: &str) -> CarryOver {
        let mut vars = CarryOver::new();
        extract_headings(raw_output, &mut vars);
        extract_key_values(raw_output, &mut vars);
        extract_json_fields(raw_output, &mut vars);
        vars
    }
}

/// Extract carry-over variables with the default [`KeyValueExtractor`].
pub fn extract_carry_over_variables(raw_output: &str) -> CarryOver {
    KeyValueExtractor.extract(raw_output)
}

fn extract_headings(text: &str, vars: &mut CarryOver) {
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(caps) = HEADING_RE.captures(line) {
            flush_heading(current.take(), vars);
            current = Some((caps[1].to_string(), Vec::new()));
            continue;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            flush_heading(current.take(), vars);
            continue;
        }
        if let Some((_, body)) = current.as_mut() {
            if trimmed.is_empty() {
                if !body.is_empty() {
                    flush_heading(current.take(), vars);
                }
            } else {
                body.push(trimmed);
            }
        }
    }
    flush_heading(current, vars);
}

fn flush_heading(section: Option<(String, Vec<&str>)>, vars: &mut CarryOver) {
    if let Some((name, body)) = section
        && !body.is_empty()
    {
        vars.insert(name, body.join(" "));
    }
}

fn extract_key_values(text: &str, vars: &mut CarryOver) {
    for line in text.lines() {
        let Some(caps) = KEY_VALUE_RE.captures(line) else {
            continue;
        };
        let value = strip_quotes(caps[2].trim());
        if value.is_empty() {
            continue;
        }
        vars.insert(caps[1].to_string(), value.to_string());
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn extract_json_fields(text: &str, vars: &mut CarryOver) {
    let object = top_level_objects(text).into_iter().find_map(|candidate| {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    });
    let Some(object) = object else {
        return;
    };
    for (key, value) in object {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        vars.insert(key, text);
    }
}

/// Balanced top-level `{...}` spans, skipping braces inside JSON strings.
fn top_level_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' if depth > 0 => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(begin) = start.take()
                {
                    spans.push(&text[begin..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_simple_key_value_line() {
        let vars = extract_carry_over_variables("characterName: Sarah");
        assert_eq!(vars.get("characterName").map(String::as_str), Some("Sarah"));
    }

    #[test]
    fn handles_bullets_bold_keys_and_quotes() {
        let raw = "Here you go:\n- **genre**: noir\n* tone: \"bleak\"\n**setting:** Lisbon\n";
        let vars = extract_carry_over_variables(raw);
        assert_eq!(vars.get("genre").map(String::as_str), Some("noir"));
        assert_eq!(vars.get("tone").map(String::as_str), Some("bleak"));
        assert_eq!(vars.get("setting").map(String::as_str), Some("Lisbon"));
    }

    #[test]
    fn skips_keys_that_are_not_identifiers_or_empty_values() {
        let raw = "Character Name: Sarah\nempty:\n1st: nope";
        assert!(extract_carry_over_variables(raw).is_empty());
    }

    #[test]
    fn heading_followed_by_paragraph_becomes_variable() {
        let raw = "## logline\nA detective hunts\na ghost.\n\n## Notes and more\nignored";
        let vars = extract_carry_over_variables(raw);
        assert_eq!(
            vars.get("logline").map(String::as_str),
            Some("A detective hunts a ghost.")
        );
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn json_object_fields_override_line_matches() {
        let raw = "title: Draft\n```json\n{\"title\": \"Final\", \"runtime\": 95, \"color\": true, \"cast\": [\"a\"]}\n```";
        let vars = extract_carry_over_variables(raw);
        assert_eq!(vars.get("title").map(String::as_str), Some("Final"));
        assert_eq!(vars.get("runtime").map(String::as_str), Some("95"));
        assert_eq!(vars.get("color").map(String::as_str), Some("true"));
        assert!(!vars.contains_key("cast"));
    }

    #[test]
    fn braces_inside_strings_do_not_break_json_scan() {
        let raw = "{\"motto\": \"use {braces}\"}";
        let vars = extract_carry_over_variables(raw);
        assert_eq!(vars.get("motto").map(String::as_str), Some("use {braces}"));
    }

    #[test]
    fn unrecognized_text_yields_empty_map() {
        assert!(extract_carry_over_variables("").is_empty());
        assert!(extract_carry_over_variables("just prose, nothing structured { broken").is_empty());
    }
}
