#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use lexibase::engine::{SharedEngine, TmEngine};
use lexibase::error::LexiError;
use lexibase::index::MemoryIndex;
use lexibase::model::{ImportOutcome, Match, MemoryRecord, Tu};
use lexibase::registry::{EngineFactory, Registry};
use lexibase::tasks::{Orchestrator, TaskState};

/// Engine that does nothing but count closes.
pub struct FakeEngine {
    id: String,
    closes: Arc<AtomicUsize>,
    work: Duration,
}

impl FakeEngine {
    /// Sleep for `work`, giving up early when cancelled.
    async fn busy(&self, cancel: &CancellationToken) -> Result<(), LexiError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(LexiError::Cancelled),
            _ = tokio::time::sleep(self.work) => Ok(()),
        }
    }
}

#[async_trait]
impl TmEngine for FakeEngine {
    fn name(&self) -> &str {
        &self.id
    }
    async fn store_tu(&self, _tu: Tu) -> Result<(), LexiError> {
        Ok(())
    }
    async fn commit(&self) -> Result<(), LexiError> {
        Ok(())
    }
    async fn remove_tu(&self, _id: &str) -> Result<(), LexiError> {
        Ok(())
    }
    async fn get_tu(&self, id: &str) -> Result<Tu, LexiError> {
        Err(LexiError::NotFound(id.to_string()))
    }
    async fn search_all(&self, _: &str, _: &str, _: u8, _: bool) -> Result<Vec<Tu>, LexiError> {
        Ok(Vec::new())
    }
    async fn search_translation(&self, _: &str, _: &str, _: &str, _: u8, _: bool) -> Result<Vec<Match>, LexiError> {
        Ok(Vec::new())
    }
    async fn concordance_search(&self, _: &str, _: &str, _: usize, _: bool, _: bool) -> Result<Vec<Tu>, LexiError> {
        Ok(Vec::new())
    }
    async fn batch_translate(&self, s: &[String], _: &str, _: &str, _: u8) -> Result<Vec<Vec<Match>>, LexiError> {
        Ok(vec![Vec::new(); s.len()])
    }
    async fn store_tmx(
        &self,
        _: &Path,
        _: &str,
        _: &str,
        _: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, LexiError> {
        self.busy(cancel).await?;
        Ok(ImportOutcome::Counted(0))
    }
    async fn export_memory(
        &self,
        _: &Path,
        _: &BTreeSet<String>,
        _: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LexiError> {
        self.busy(cancel).await
    }
    async fn get_all_languages(&self) -> Result<BTreeSet<String>, LexiError> {
        Ok(BTreeSet::new())
    }
    async fn get_all_clients(&self) -> Result<BTreeSet<String>, LexiError> {
        Ok(BTreeSet::new())
    }
    async fn get_all_projects(&self) -> Result<BTreeSet<String>, LexiError> {
        Ok(BTreeSet::new())
    }
    async fn get_all_subjects(&self) -> Result<BTreeSet<String>, LexiError> {
        Ok(BTreeSet::new())
    }
    async fn get_all_terms(&self) -> Result<Vec<Tu>, LexiError> {
        Ok(Vec::new())
    }
    async fn delete_database(&self) -> Result<(), LexiError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), LexiError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingFactory {
    pub builds: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    /// Delay inside `build`, to widen the window for racing opens.
    pub build_delay: Duration,
    /// Delay inside bulk engine operations.
    pub work: Duration,
    pub failing: HashSet<String>,
}

impl CountingFactory {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineFactory for CountingFactory {
    async fn build(&self, record: &MemoryRecord) -> Result<SharedEngine, LexiError> {
        tokio::time::sleep(self.build_delay).await;
        if self.failing.contains(&record.id) {
            return Err(LexiError::Transport(format!("cannot reach '{}'", record.id)));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeEngine {
            id: record.id.clone(),
            closes: Arc::clone(&self.closes),
            work: self.work,
        }))
    }
}

/// Index under `dir` holding local records for `(id, name)` pairs.
pub fn index_with(dir: &Path, memories: &[(&str, &str)]) -> Arc<MemoryIndex> {
    let index = MemoryIndex::load(dir).unwrap();
    for (id, name) in memories {
        index.insert(MemoryRecord::local(*id, *name)).unwrap();
    }
    Arc::new(index)
}

pub fn registry_with(dir: &Path, memories: &[(&str, &str)], factory: Arc<CountingFactory>) -> Arc<Registry> {
    Arc::new(Registry::new(index_with(dir, memories), factory, dir))
}

/// Poll until `pid` is terminal, recording every state seen.
pub async fn wait_terminal(tasks: &Orchestrator, pid: &str) -> Vec<TaskState> {
    let mut seen = Vec::new();
    for _ in 0..1000 {
        let state = tasks.status(pid).unwrap();
        let done = state.is_terminal();
        seen.push(state);
        if done {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {pid} did not finish: {seen:?}");
}
