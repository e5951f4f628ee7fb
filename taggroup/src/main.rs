//! Tag-group prompt runner.
//!
//! Runs the templates of a tag group as ordered steps, one execution per
//! `taggroup start`. Executions live under `.taggroup/executions/` and every
//! command loads, changes, and saves one of them, so a run can be resumed at any
//! point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use taggroup::core::execution::create_execution;
use taggroup::core::resolver::{missing_required, value_to_string};
use taggroup::core::types::{Inputs, StepStatus, TagGroupExecution};
use taggroup::driver::{
    DriverOptions, RunStop, enter_step, run_current_step, run_until_blocked,
};
use taggroup::exit_codes;
use taggroup::io::config::{Config, load_config};
use taggroup::io::executor::CommandExecutor;
use taggroup::io::export::{ExportFormat, render_export, write_export};
use taggroup::io::init::{InitOptions, WorkspacePaths, init_workspace};
use taggroup::io::store::{ExecutionStore, FileStore, new_execution_id};
use taggroup::io::templates::TemplateSet;
use taggroup::logging;
use taggroup::template::{PromptTemplate, group_name_of, group_names};

#[derive(Parser)]
#[command(
    name = "taggroup",
    version,
    about = "Run tag groups of prompt templates as resumable step sequences"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.taggroup/` with default config and sample templates.
    Init {
        /// Overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// List tag groups found in the template source.
    Groups,
    /// Start a new execution of a tag group and print its id.
    Start {
        group: String,
        /// Project the execution belongs to.
        #[arg(long)]
        project: Option<String>,
    },
    /// List stored executions.
    List,
    /// Show steps, the current step's inputs, and its prompt preview.
    Show { id: String },
    /// Print progress; exit code reports complete (2) or blocked (3).
    Status { id: String },
    /// Set inputs of the current step.
    Input {
        id: String,
        /// `name=value` pairs.
        #[arg(required = true, value_parser = parse_key_value)]
        values: Vec<(String, String)>,
        /// Drop existing inputs instead of merging.
        #[arg(long)]
        replace: bool,
    },
    /// Replace the current step's notes.
    Notes { id: String, text: String },
    /// Run the current step.
    Run {
        id: String,
        /// Keep running steps until the group completes or a step fails.
        #[arg(long)]
        all: bool,
    },
    /// Skip the current step.
    Skip { id: String },
    /// Reset a failed current step to pending.
    Retry { id: String },
    /// Move to the next step.
    Next { id: String },
    /// Move to the previous step.
    Prev { id: String },
    /// Move to step `step` (1-based).
    Jump { id: String, step: usize },
    /// Write a summary of the execution.
    Export {
        id: String,
        #[arg(long, value_enum, default_value_t = ExportFormat::Markdown)]
        format: ExportFormat,
        /// Output path (default: `.taggroup/exports/<id>.<ext>`); `-` prints to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete a stored execution.
    Reset { id: String },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    let open = || Workspace::open(&root);
    match cli.command {
        Command::Init { force } => {
            let paths = init_workspace(&root, &InitOptions { force })?;
            println!("initialized {}", paths.app_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Groups => cmd_groups(&open()?),
        Command::Start { group, project } => cmd_start(&open()?, &group, project),
        Command::List => cmd_list(&open()?),
        Command::Show { id } => cmd_show(&open()?, &id),
        Command::Status { id } => cmd_status(&open()?, &id),
        Command::Input {
            id,
            values,
            replace,
        } => cmd_input(&open()?, &id, &values, replace),
        Command::Notes { id, text } => open()?.update(&id, |execution| {
            execution.update_notes(text);
            Ok(())
        }),
        Command::Run { id, all } => cmd_run(&open()?, &id, all),
        Command::Skip { id } => cmd_skip(&open()?, &id),
        Command::Retry { id } => open()?.update(&id, |execution| {
            if !execution.retry_step() {
                bail!("step {} is not failed", execution.current_step_index + 1);
            }
            Ok(())
        }),
        Command::Next { id } => cmd_move(&open()?, &id, |execution| execution.advance()),
        Command::Prev { id } => cmd_move(&open()?, &id, |execution| execution.retreat()),
        Command::Jump { id, step } => cmd_move(&open()?, &id, |execution| {
            step.checked_sub(1)
                .is_some_and(|index| execution.jump_to_step(index))
        }),
        Command::Export { id, format, out } => cmd_export(&open()?, &id, format, out),
        Command::Reset { id } => {
            let workspace = open()?;
            // Unreadable records are still listed, so they can be cleared here.
            if !workspace.store.list()?.contains(&id) {
                bail!("execution '{id}' not found");
            }
            workspace.store.clear(&id)?;
            println!("cleared {id}");
            Ok(exit_codes::OK)
        }
    }
}

/// Everything a command needs from `.taggroup/`.
struct Workspace {
    paths: WorkspacePaths,
    config: Config,
    store: FileStore,
}

impl Workspace {
    fn open(root: &Path) -> Result<Self> {
        let paths = WorkspacePaths::new(root);
        if !paths.app_dir.is_dir() {
            bail!("no .taggroup directory in {} (run `taggroup init` first)", root.display());
        }
        let config = load_config(&paths.config_path)?;
        let store = FileStore::new(&paths.executions_dir);
        Ok(Self {
            paths,
            config,
            store,
        })
    }

    fn templates(&self) -> Result<TemplateSet> {
        let path = self.paths.resolve(&self.config.templates_path);
        TemplateSet::load(&path).with_context(|| format!("load templates {}", path.display()))
    }

    fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            auto_advance: self.config.auto_advance,
            default_model: self.config.executor.default_model.clone(),
        }
    }

    fn load(&self, id: &str) -> Result<TagGroupExecution> {
        self.store
            .load(id)?
            .ok_or_else(|| anyhow!("execution '{id}' not found"))
    }

    /// Load, apply `change`, save, and print the resulting state.
    fn update<F>(&self, id: &str, change: F) -> Result<i32>
    where
        F: FnOnce(&mut TagGroupExecution) -> Result<()>,
    {
        let mut execution = self.load(id)?;
        change(&mut execution)?;
        self.store.save(&execution)?;
        print_position(&execution);
        Ok(exit_codes::OK)
    }
}

fn cmd_groups(workspace: &Workspace) -> Result<i32> {
    let templates = workspace.templates()?;
    for group in group_names(templates.all()) {
        let steps = templates
            .all()
            .iter()
            .filter(|template| group_name_of(&template.group_tag) == group)
            .count();
        println!("{group}\t{steps} steps");
    }
    Ok(exit_codes::OK)
}

fn cmd_start(workspace: &Workspace, group: &str, project: Option<String>) -> Result<i32> {
    let templates = workspace.templates()?;
    let mut execution = create_execution(new_execution_id(), group, templates.all(), project)?;
    enter_step(&mut execution, &templates)?;
    workspace.store.save(&execution)?;
    info!(id = %execution.id, group, steps = execution.steps.len(), "started execution");
    println!("{}", execution.id);
    Ok(exit_codes::OK)
}

fn cmd_list(workspace: &Workspace) -> Result<i32> {
    for id in workspace.store.list()? {
        match workspace.store.load(&id)? {
            Some(execution) => {
                let progress = execution.progress();
                println!(
                    "{id}\t{}\t{}\t{}/{}",
                    execution.group_name,
                    execution.status.as_str(),
                    progress.finished_steps(),
                    progress.total_steps
                );
            }
            None => println!("{id}\t(unreadable)"),
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_show(workspace: &Workspace, id: &str) -> Result<i32> {
    let execution = workspace.load(id)?;
    let templates = workspace.templates()?;
    let progress = execution.progress();
    println!(
        "{} {} [{}] {}% done",
        execution.id,
        execution.group_name,
        execution.status.as_str(),
        progress.percent_done()
    );
    if let Some(project) = &execution.project_id {
        println!("project: {project}");
    }
    for (index, step) in execution.steps.iter().enumerate() {
        let marker = if index == execution.current_step_index {
            '>'
        } else {
            ' '
        };
        println!(
            "{marker} {}. {} [{}]",
            index + 1,
            step.template_name,
            step.status.as_str()
        );
    }

    let Some(step) = execution.current_step() else {
        return Ok(exit_codes::OK);
    };
    println!();
    println!("inputs:");
    for (name, value) in &step.inputs {
        println!("  {name} = {}", value_to_string(value));
    }
    if let Some(template) = templates.get(&step.template_id) {
        let missing = missing_required(template, &step.inputs);
        if !missing.is_empty() {
            println!("missing required: {}", missing.join(", "));
        }
        if let Some(prompt) = execution.resolved_prompt(template) {
            println!("prompt:\n{}", indent(&prompt));
        }
    } else {
        warn!(template_id = %step.template_id, "template no longer in template source");
    }
    if let Some(result) = &step.execution
        && !result.raw_output.is_empty()
    {
        println!("output:\n{}", indent(&result.raw_output));
    }
    if !step.notes.is_empty() {
        println!("notes:\n{}", indent(&step.notes));
    }
    Ok(exit_codes::OK)
}

fn cmd_status(workspace: &Workspace, id: &str) -> Result<i32> {
    let execution = workspace.load(id)?;
    let progress = execution.progress();
    println!(
        "{} step {}/{} completed={} skipped={} failed={}",
        execution.status.as_str(),
        progress.current_step,
        progress.total_steps,
        progress.completed_steps,
        progress.skipped_steps,
        progress.failed_steps
    );
    Ok(status_code(&execution))
}

fn status_code(execution: &TagGroupExecution) -> i32 {
    if execution.is_complete() {
        exit_codes::COMPLETE
    } else if execution.is_blocked() {
        exit_codes::BLOCKED
    } else {
        exit_codes::OK
    }
}

fn cmd_input(
    workspace: &Workspace,
    id: &str,
    values: &[(String, String)],
    replace: bool,
) -> Result<i32> {
    let templates = workspace.templates()?;
    workspace.update(id, |execution| {
        let step = execution
            .current_step()
            .ok_or_else(|| anyhow!("execution has no steps"))?;
        let template = templates.require(&step.template_id)?;
        let mut inputs = if replace {
            Inputs::new()
        } else {
            step.inputs.clone()
        };
        for (name, raw) in values {
            inputs.insert(name.clone(), parse_input(template, name, raw)?);
        }
        execution.update_inputs(inputs);
        Ok(())
    })
}

fn parse_input(template: &PromptTemplate, name: &str, raw: &str) -> Result<serde_json::Value> {
    match template.variable(name) {
        Some(var) => var.parse_value(raw),
        None => {
            warn!(name, template_id = %template.id, "input is not declared by the template");
            Ok(serde_json::Value::String(raw.to_string()))
        }
    }
}

fn cmd_run(workspace: &Workspace, id: &str, all: bool) -> Result<i32> {
    let mut execution = workspace.load(id)?;
    let templates = workspace.templates()?;
    let executor = CommandExecutor::from_config(&workspace.config.executor)?;
    let options = workspace.driver_options();

    // A stored running step means the process driving it went away.
    if execution.has_running_step() && execution.cancel_running_step().is_ok() {
        warn!(id, "reset step left running by an interrupted run");
    }

    if !all {
        let outcome = run_current_step(&mut execution, &templates, &executor, &options)?;
        workspace.store.save(&execution)?;
        match &outcome.error {
            None => println!("step {} completed", outcome.index + 1),
            Some(error) => println!("step {} failed: {error}", outcome.index + 1),
        }
        if !outcome.carried_over.is_empty() {
            println!("carried over: {}", outcome.carried_over.join(", "));
        }
        print_position(&execution);
        return Ok(status_code(&execution));
    }

    let outcome = run_until_blocked(
        &mut execution,
        &templates,
        &executor,
        &options,
        |execution, step| {
            workspace.store.save(execution)?;
            match &step.error {
                None => println!("step {} completed", step.index + 1),
                Some(error) => println!("step {} failed: {error}", step.index + 1),
            }
            Ok(())
        },
    )?;
    workspace.store.save(&execution)?;
    match outcome.stop {
        RunStop::Complete => println!("group complete ({} steps run)", outcome.steps_executed),
        RunStop::Failed { index, .. } => println!("stopped: step {} failed", index + 1),
        RunStop::MissingInputs { index, names } => {
            println!(
                "stopped: step {} needs inputs: {}",
                index + 1,
                names.join(", ")
            );
        }
        RunStop::NoPendingAhead => println!("stopped: no pending step ahead"),
    }
    print_position(&execution);
    Ok(status_code(&execution))
}

fn cmd_skip(workspace: &Workspace, id: &str) -> Result<i32> {
    let templates = workspace.templates()?;
    let auto_advance = workspace.config.auto_advance;
    workspace.update(id, |execution| {
        match execution.current_step().map(|step| step.status) {
            Some(StepStatus::Running) => bail!("step is running"),
            None => bail!("execution has no steps"),
            Some(_) => {}
        }
        execution.mark_skipped();
        if auto_advance && execution.advance() {
            enter_step(execution, &templates)?;
        }
        Ok(())
    })
}

fn cmd_move<F>(workspace: &Workspace, id: &str, step: F) -> Result<i32>
where
    F: FnOnce(&mut TagGroupExecution) -> bool,
{
    let templates = workspace.templates()?;
    workspace.update(id, |execution| {
        if !step(execution) {
            bail!(
                "cannot move from step {} of {}",
                execution.current_step_index + 1,
                execution.steps.len()
            );
        }
        enter_step(execution, &templates)?;
        Ok(())
    })
}

fn cmd_export(
    workspace: &Workspace,
    id: &str,
    format: ExportFormat,
    out: Option<PathBuf>,
) -> Result<i32> {
    let execution = workspace.load(id)?;
    let contents = render_export(&execution, format)?;
    match out {
        Some(path) if path.as_os_str() == "-" => print!("{contents}"),
        Some(path) => {
            write_export(&path, &contents)?;
            println!("{}", path.display());
        }
        None => {
            let path = workspace
                .paths
                .exports_dir
                .join(format!("{id}.{}", format.extension()));
            write_export(&path, &contents)?;
            println!("{}", path.display());
        }
    }
    Ok(exit_codes::OK)
}

fn print_position(execution: &TagGroupExecution) {
    let progress = execution.progress();
    match execution.current_step() {
        Some(step) => println!(
            "at step {}/{}: {} [{}]",
            progress.current_step,
            progress.total_steps,
            step.template_name,
            step.status.as_str()
        ),
        None => println!("no steps"),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
