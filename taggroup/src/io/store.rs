//! Execution persistence keyed by execution id.
//!
//! Stores are explicit objects handed to whoever drives an execution; there is no
//! process-wide registry. Resuming is a convenience, so a record that cannot be
//! parsed or fails invariant checks loads as "not found" instead of an error.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, warn};

use crate::core::invariants::validate_invariants;
use crate::core::types::TagGroupExecution;

/// Durable keyed storage for executions.
pub trait ExecutionStore {
    /// Persist the full aggregate. Saving unchanged state yields identical bytes.
    fn save(&self, execution: &TagGroupExecution) -> Result<()>;
    /// `Ok(None)` when nothing usable is stored under `id`.
    fn load(&self, id: &str) -> Result<Option<TagGroupExecution>>;
    /// Remove stored state; clearing a missing id is not an error.
    fn clear(&self, id: &str) -> Result<()>;
    /// Ids of all stored executions, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

/// Generate an execution id: `exec-<YYYYmmdd_HHMMSS>-<6 lowercase alphanumerics>`.
pub fn new_execution_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("exec-{}-{}", Utc::now().format("%Y%m%d_%H%M%S"), suffix)
}

/// Serialize an execution to its canonical stored form (pretty JSON + newline).
pub fn encode(execution: &TagGroupExecution) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(execution).context("serialize execution")?;
    buf.push('\n');
    Ok(buf)
}

/// Parse a stored record, returning `None` for corrupt or invalid state.
pub fn decode(id: &str, contents: &str) -> Option<TagGroupExecution> {
    let execution: TagGroupExecution = match serde_json::from_str(contents) {
        Ok(execution) => execution,
        Err(err) => {
            warn!(id, err = %err, "discarding unparseable execution state");
            return None;
        }
    };
    if execution.id != id {
        warn!(id, stored_id = %execution.id, "discarding execution stored under wrong id");
        return None;
    }
    let errors = validate_invariants(&execution);
    if !errors.is_empty() {
        warn!(id, errors = %errors.join("; "), "discarding invalid execution state");
        return None;
    }
    Some(execution)
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("execution id must not be empty");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        bail!("invalid execution id '{id}' (allowed: ASCII letters, digits, '-', '_')");
    }
    Ok(())
}

/// One JSON file per execution under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl ExecutionStore for FileStore {
    fn save(&self, execution: &TagGroupExecution) -> Result<()> {
        validate_id(&execution.id)?;
        let path = self.path_for(&execution.id);
        debug!(path = %path.display(), id = %execution.id, status = execution.status.as_str(), "saving execution");
        write_atomic(&path, &encode(execution)?)
    }

    fn load(&self, id: &str) -> Result<Option<TagGroupExecution>> {
        validate_id(id)?;
        let path = self.path_for(id);
        debug!(path = %path.display(), "loading execution");
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                warn!(path = %path.display(), "discarding non-utf8 execution state");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read execution {}", path.display()));
            }
        };
        Ok(decode(id, &contents))
    }

    fn clear(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "cleared execution");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove execution {}", path.display())),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let entry = entry.context("read entry")?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if validate_id(stem).is_err() {
                debug!(path = %path.display(), "ignoring file that is not an execution id");
                continue;
            }
            ids.push(stem.to_string());
        }
        ids.sort();
        Ok(ids)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("execution path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp execution {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace execution {}", path.display()))?;
    Ok(())
}

/// In-process store holding the canonical encoded form of each execution.
///
/// Useful for embedding the engine in a long-lived session: create one per
/// session and drop it on disconnect.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for `id`, as they would be written to disk.
    pub fn raw(&self, id: &str) -> Option<String> {
        self.records.lock().ok()?.get(id).cloned()
    }

    /// Store arbitrary contents under `id` (used to simulate corrupt records).
    pub fn insert_raw(&self, id: &str, contents: &str) -> Result<()> {
        self.lock()?.insert(id.to_string(), contents.to_string());
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl ExecutionStore for MemoryStore {
    fn save(&self, execution: &TagGroupExecution) -> Result<()> {
        validate_id(&execution.id)?;
        let encoded = encode(execution)?;
        self.lock()?.insert(execution.id.clone(), encoded);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<TagGroupExecution>> {
        let contents = self.lock()?.get(id).cloned();
        Ok(contents.and_then(|contents| decode(id, &contents)))
    }

    fn clear(&self, id: &str) -> Result<()> {
        self.lock()?.remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
