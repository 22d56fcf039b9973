//! Background bulk operations with a poll-based status table.
//!
//! `start` validates up front, records the task as processing and hands the
//! work to a detached tokio task. Callers poll `status` with the returned
//! process id until the record turns terminal.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::SharedEngine;
use crate::error::LexiError;
use crate::model::{ImportOutcome, NO_PIVOT};
use crate::registry::Registry;

/// Failure reason recorded for a cancelled task.
pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone)]
pub enum TaskKind {
    DeleteMemories {
        ids: Vec<String>,
    },
    Export {
        memory: String,
        file: PathBuf,
        /// `None` or empty exports every unit without a language filter.
        languages: Option<Vec<String>>,
        src_lang: Option<String>,
    },
    Import {
        memory: String,
        file: PathBuf,
        project: String,
        client: String,
        subject: String,
    },
}

impl TaskKind {
    fn label(&self) -> &'static str {
        match self {
            Self::DeleteMemories { .. } => "delete",
            Self::Export { .. } => "export",
            Self::Import { .. } => "import",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutput {
    Deleted { count: usize },
    Exported { file: PathBuf },
    Imported { imported: ImportOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskState {
    Processing,
    Completed { result: TaskOutput },
    Failed { reason: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

struct TaskEntry {
    state: TaskState,
    label: &'static str,
    started_at: Instant,
    finished_at: Option<Instant>,
    cancel: CancellationToken,
}

type Table = Arc<RwLock<HashMap<String, TaskEntry>>>;

pub struct Orchestrator {
    registry: Arc<Registry>,
    tasks: Table,
    workers: Mutex<Vec<JoinHandle<()>>>,
    root: CancellationToken,
    retention: Duration,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, retention: Duration) -> Self {
        Self {
            registry,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
            root: CancellationToken::new(),
            retention,
        }
    }

    /// Validate `kind`, launch it in the background and return its process id.
    pub fn start(&self, kind: TaskKind) -> Result<String, LexiError> {
        if self.root.is_cancelled() {
            return Err(LexiError::Internal("task orchestrator is shut down".into()));
        }
        self.validate(&kind)?;
        self.sweep();

        let pid = uuid::Uuid::new_v4().to_string();
        let token = self.root.child_token();
        let label = kind.label();
        self.tasks.write().insert(
            pid.clone(),
            TaskEntry {
                state: TaskState::Processing,
                label,
                started_at: Instant::now(),
                finished_at: None,
                cancel: token.clone(),
            },
        );
        info!(pid = %pid, task = label, "task started");

        let registry = Arc::clone(&self.registry);
        let tasks = Arc::clone(&self.tasks);
        let id = pid.clone();
        let handle = tokio::spawn(async move {
            let outcome = run(&registry, kind, &token).await;
            finish(&tasks, &id, outcome);
        });
        let mut workers = self.workers.lock();
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
        Ok(pid)
    }

    pub fn status(&self, pid: &str) -> Result<TaskState, LexiError> {
        self.tasks
            .read()
            .get(pid)
            .map(|e| e.state.clone())
            .ok_or_else(|| LexiError::NotFound(format!("process '{pid}'")))
    }

    /// Ask a running task to stop. Terminal tasks are left alone.
    pub fn cancel(&self, pid: &str) -> Result<(), LexiError> {
        let tasks = self.tasks.read();
        let entry = tasks
            .get(pid)
            .ok_or_else(|| LexiError::NotFound(format!("process '{pid}'")))?;
        if !entry.state.is_terminal() {
            entry.cancel.cancel();
            debug!(pid = %pid, "cancellation requested");
        }
        Ok(())
    }

    /// Cancel everything in flight and wait for the workers to record it.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let pending = workers.len();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "task worker panicked");
            }
        }
        info!(pending, "task orchestrator stopped");
    }

    /// Number of tasks still processing.
    pub fn active(&self) -> usize {
        self.tasks.read().values().filter(|e| !e.state.is_terminal()).count()
    }

    fn sweep(&self) {
        let retention = self.retention;
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, e| e.finished_at.map_or(true, |t| t.elapsed() < retention));
        let dropped = before - tasks.len();
        if dropped > 0 {
            debug!(dropped, "expired task records removed");
        }
    }

    fn validate(&self, kind: &TaskKind) -> Result<(), LexiError> {
        let index = self.registry.index();
        match kind {
            TaskKind::DeleteMemories { ids } => {
                if ids.is_empty() {
                    return Err(LexiError::Validation("no memories to delete".into()));
                }
                for id in ids {
                    index.require(id)?;
                }
            }
            TaskKind::Export { memory, file, .. } => {
                index.require(memory)?;
                if file.as_os_str().is_empty() {
                    return Err(LexiError::Validation("export file must be set".into()));
                }
            }
            TaskKind::Import { memory, file, .. } => {
                index.require(memory)?;
                if !file.is_file() {
                    return Err(LexiError::Validation(format!(
                        "import file not found: {}",
                        file.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn finish(tasks: &RwLock<HashMap<String, TaskEntry>>, pid: &str, outcome: Result<TaskOutput, LexiError>) {
    let mut tasks = tasks.write();
    let Some(entry) = tasks.get_mut(pid) else {
        return;
    };
    if entry.state.is_terminal() {
        return;
    }
    let elapsed_ms = entry.started_at.elapsed().as_millis() as u64;
    entry.state = match outcome {
        Ok(result) => {
            info!(pid = %pid, task = entry.label, elapsed_ms, "task completed");
            TaskState::Completed { result }
        }
        Err(e) => {
            let reason = e.to_string();
            warn!(pid = %pid, task = entry.label, elapsed_ms, reason = %reason, "task failed");
            TaskState::Failed { reason }
        }
    };
    entry.finished_at = Some(Instant::now());
}

/// Open `memory` for a worker. Construction is never interrupted, so a
/// cancelled task still hands back every handle it got.
async fn acquire(registry: &Registry, memory: &str, token: &CancellationToken) -> Result<SharedEngine, LexiError> {
    let engine = registry.open(memory).await?;
    if token.is_cancelled() {
        release(registry, memory).await;
        return Err(LexiError::Cancelled);
    }
    Ok(engine)
}

async fn run(registry: &Registry, kind: TaskKind, token: &CancellationToken) -> Result<TaskOutput, LexiError> {
    if token.is_cancelled() {
        return Err(LexiError::Cancelled);
    }
    match kind {
        TaskKind::DeleteMemories { ids } => {
            // runs to completion once started
            let count = registry.delete_memories(&ids).await?;
            Ok(TaskOutput::Deleted { count })
        }
        TaskKind::Export { memory, file, languages, src_lang } => {
            let engine = acquire(registry, &memory, token).await?;
            let languages: BTreeSet<String> = languages.unwrap_or_default().into_iter().collect();
            let src_lang = src_lang.unwrap_or_else(|| NO_PIVOT.to_string());
            let result = engine.export_memory(&file, &languages, &src_lang, token).await;
            release(registry, &memory).await;
            result?;
            Ok(TaskOutput::Exported { file })
        }
        TaskKind::Import { memory, file, project, client, subject } => {
            let engine = acquire(registry, &memory, token).await?;
            let result = engine.store_tmx(&file, &project, &client, &subject, token).await;
            release(registry, &memory).await;
            Ok(TaskOutput::Imported { imported: result? })
        }
    }
}

async fn release(registry: &Registry, memory: &str) {
    if let Err(e) = registry.close(memory).await {
        warn!(memory = %memory, error = %e, "close after task failed");
    }
}
