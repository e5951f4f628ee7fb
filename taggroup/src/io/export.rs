//! Execution export rendering (JSON and Markdown).

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::summary::ExecutionSummary;
use crate::core::types::TagGroupExecution;

const MARKDOWN_TEMPLATE: &str = include_str!("prompts/export.md");

static EXPORT_ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("export", MARKDOWN_TEMPLATE)
        .expect("export template should be valid");
    env
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

/// Render the execution summary in `format`.
pub fn render_export(execution: &TagGroupExecution, format: ExportFormat) -> Result<String> {
    let summary = ExecutionSummary::from_execution(execution);
    match format {
        ExportFormat::Json => render_json(&summary),
        ExportFormat::Markdown => render_markdown(&summary),
    }
}

pub fn render_json(summary: &ExecutionSummary) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(summary).context("serialize export")?;
    buf.push('\n');
    Ok(buf)
}

pub fn render_markdown(summary: &ExecutionSummary) -> Result<String> {
    let template = EXPORT_ENV.get_template("export")?;
    let rendered = template
        .render(context! {
            summary => summary,
            stats => &summary.statistics,
            success_rate => format!("{:.1}", summary.statistics.success_rate),
        })
        .context("render markdown export")?;
    let mut out = rendered.trim_end().to_string();
    out.push('\n');
    Ok(out)
}

/// Write rendered export contents, creating parent directories.
pub fn write_export(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write export {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote export");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::create_execution;
    use crate::test_support::{completed, inputs, template};

    fn finished() -> TagGroupExecution {
        let templates = vec![
            template("t1", "story-001", ""),
            template("t2", "story-002", ""),
            template("t3", "story-003", ""),
        ];
        let mut execution =
            create_execution("exec-1", "story", &templates, Some("p-1".to_string()))
                .expect("execution");
        execution.update_inputs(inputs(&[("premise", "a heist on Mars")]));
        execution.mark_completed(completed("characterName: Sarah"));
        execution.advance();
        execution.mark_skipped();
        execution.advance();
        execution.update_notes("needs a rewrite");
        execution.mark_completed(completed("logline: done"));
        execution
    }

    #[test]
    fn markdown_lists_steps_inputs_outputs_and_statistics() {
        let markdown = render_export(&finished(), ExportFormat::Markdown).expect("render");
        assert!(markdown.starts_with("# story\n"));
        assert!(markdown.contains("- Project: p-1"));
        assert!(markdown.contains("## Step 1: t1 name"));
        assert!(markdown.contains("- **premise**: a heist on Mars"));
        assert!(markdown.contains("characterName: Sarah"));
        assert!(markdown.contains("## Step 2: t2 name\n\nStatus: skipped"));
        assert!(markdown.contains("needs a rewrite"));
        assert!(markdown.contains("| 3 | 2 | 1 | 0 | 66.7% | 10 ms |"));
        assert!(markdown.ends_with('\n'));
    }

    #[test]
    fn json_export_is_the_summary() {
        let json = render_export(&finished(), ExportFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["group_name"], "story");
        assert_eq!(value["statistics"]["success_rate"], 66.7);
        assert_eq!(value["steps"][1]["status"], "skipped");
        assert_eq!(value["steps"][0]["inputs"]["premise"], "a heist on Mars");
    }

    #[test]
    fn write_export_creates_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("exports/nested/exec-1.md");
        write_export(&path, "# story\n").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "# story\n");
    }
}
