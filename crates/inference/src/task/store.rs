use super::{TaskRecord, TaskStatus};
use crate::error::{InferenceError, Result};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Persistence boundary for task records.
///
/// A record in a terminal state is never overwritten.
pub trait TaskStore: Send + Sync {
    fn save(&self, record: &TaskRecord) -> Result<()>;

    fn load(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Known task ids, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

fn ensure_not_terminal(existing: Option<&TaskRecord>, record: &TaskRecord) -> Result<()> {
    match existing {
        Some(existing) if existing.status.is_terminal() => Err(InferenceError::IllegalState(format!(
            "task {} is already {} and cannot become {}",
            record.task_id, existing.status, record.status
        ))),
        _ => Ok(()),
    }
}

/// Task ids become file names: only `[A-Za-z0-9_-]` is accepted, so an id can neither
/// leave the directory nor alias another task's `.error.json` file.
pub(crate) fn validate_task_id(task_id: &str) -> Result<()> {
    let valid = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(InferenceError::Validation(format!("invalid task id '{}'", task_id)));
    }
    Ok(())
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<BTreeMap<String, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn save(&self, record: &TaskRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        ensure_not_terminal(records.get(&record.task_id), record)?;
        records.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

/// Stores `<task_id>.json` for pending, processing and completed tasks, and
/// `<task_id>.error.json` for failures.
pub struct FileTaskStore {
    dir: PathBuf,
}

const RECORD_EXT: &str = ".json";
const ERROR_EXT: &str = ".error.json";

impl FileTaskStore {
    /// Open or create a store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", task_id, RECORD_EXT))
    }

    fn error_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", task_id, ERROR_EXT))
    }

    fn read(path: &Path) -> Result<Option<TaskRecord>> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a temp file, then rename over the target.
    fn write(path: &Path, record: &TaskRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record)?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl TaskStore for FileTaskStore {
    fn save(&self, record: &TaskRecord) -> Result<()> {
        validate_task_id(&record.task_id)?;
        ensure_not_terminal(self.load(&record.task_id)?.as_ref(), record)?;

        let path = if record.status == TaskStatus::Failed {
            self.error_path(&record.task_id)
        } else {
            self.record_path(&record.task_id)
        };
        Self::write(&path, record)
    }

    fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        validate_task_id(task_id)?;
        if let Some(failed) = Self::read(&self.error_path(task_id))? {
            return Ok(Some(failed));
        }
        Self::read(&self.record_path(task_id))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let id = name
                .strip_suffix(ERROR_EXT)
                .or_else(|| name.strip_suffix(RECORD_EXT));
            if let Some(id) = id {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
