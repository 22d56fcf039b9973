//! Reference-counted engine handles keyed by memory id.
//!
//! Each id owns a slot with its own async lock. Opening holds that lock
//! across engine construction, so concurrent opens of one id build a single
//! engine while opens of other ids proceed independently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::DocumentCodec;
use crate::engine::{validate_memory_id, LocalEngine, RemoteEngine, SharedEngine};
use crate::error::LexiError;
use crate::index::MemoryIndex;
use crate::model::{now_ms, MemoryKind, MemoryRecord};
use crate::replication::TicketIssuer;

/// Builds the engine a memory record asks for.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, record: &MemoryRecord) -> Result<SharedEngine, LexiError>;
}

pub struct DefaultEngineFactory {
    root: PathBuf,
    work_dir: PathBuf,
    http: reqwest::Client,
    issuer: Arc<dyn TicketIssuer>,
    codec: Arc<dyn DocumentCodec>,
}

impl DefaultEngineFactory {
    pub fn new(
        root: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        http: reqwest::Client,
        issuer: Arc<dyn TicketIssuer>,
        codec: Arc<dyn DocumentCodec>,
    ) -> Self {
        Self { root: root.into(), work_dir: work_dir.into(), http, issuer, codec }
    }
}

#[async_trait]
impl EngineFactory for DefaultEngineFactory {
    async fn build(&self, record: &MemoryRecord) -> Result<SharedEngine, LexiError> {
        match record.kind {
            MemoryKind::Local => {
                let (id, root, codec) = (record.id.clone(), self.root.clone(), Arc::clone(&self.codec));
                let engine = tokio::task::spawn_blocking(move || LocalEngine::open(&id, &root, codec))
                    .await
                    .map_err(|e| LexiError::Internal(e.to_string()))??;
                Ok(Arc::new(engine))
            }
            MemoryKind::Remote => {
                let (server, user, password) = record.remote_credentials()?;
                let engine = RemoteEngine::connect(
                    server,
                    user,
                    password,
                    &record.id,
                    self.issuer.as_ref(),
                    self.http.clone(),
                    Arc::clone(&self.codec),
                    &self.work_dir,
                )
                .await?;
                Ok(Arc::new(engine))
            }
        }
    }
}

struct Live {
    engine: SharedEngine,
    count: usize,
}

type Slot = Arc<tokio::sync::Mutex<Option<Live>>>;

pub struct Registry {
    index: Arc<MemoryIndex>,
    factory: Arc<dyn EngineFactory>,
    root: PathBuf,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Registry {
    pub fn new(index: Arc<MemoryIndex>, factory: Arc<dyn EngineFactory>, root: impl Into<PathBuf>) -> Self {
        Self { index, factory, root: root.into(), slots: Mutex::new(HashMap::new()) }
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, id: &str) -> Slot {
        Arc::clone(self.slots.lock().entry(id.to_string()).or_default())
    }

    fn existing_slot(&self, id: &str) -> Option<Slot> {
        self.slots.lock().get(id).cloned()
    }

    fn all_slots(&self) -> Vec<(String, Slot)> {
        self.slots.lock().iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
    }

    async fn acquire(&self, id: &str, increment: bool) -> Result<SharedEngine, LexiError> {
        let record = self.index.require(id)?;
        let slot = self.slot(id);
        let mut guard = slot.lock().await;
        if let Some(live) = guard.as_mut() {
            if increment {
                live.count += 1;
            }
            debug!(memory = %id, count = live.count, "engine reused");
            return Ok(Arc::clone(&live.engine));
        }
        let engine = self.factory.build(&record).await?;
        *guard = Some(Live { engine: Arc::clone(&engine), count: 1 });
        info!(memory = %id, kind = ?record.kind, "engine opened");
        Ok(engine)
    }

    /// Open `id`, constructing its engine on first use.
    pub async fn open(&self, id: &str) -> Result<SharedEngine, LexiError> {
        self.acquire(id, true).await
    }

    /// The live engine for `id`, opening it (count 1) if nothing holds it.
    pub async fn get(&self, id: &str) -> Result<SharedEngine, LexiError> {
        self.acquire(id, false).await
    }

    /// Release one reference; the last one closes the engine.
    pub async fn close(&self, id: &str) -> Result<(), LexiError> {
        let Some(slot) = self.existing_slot(id) else {
            return Ok(());
        };
        let mut guard = slot.lock().await;
        let Some(live) = guard.as_mut() else {
            return Ok(());
        };
        if live.count > 1 {
            live.count -= 1;
            debug!(memory = %id, count = live.count, "engine released");
            return Ok(());
        }
        match guard.take() {
            Some(live) => {
                info!(memory = %id, "engine closed");
                live.engine.close().await
            }
            None => Ok(()),
        }
    }

    /// Close `id` regardless of how many holders it has.
    pub async fn evict(&self, id: &str) -> Result<(), LexiError> {
        let Some(slot) = self.existing_slot(id) else {
            return Ok(());
        };
        let live = slot.lock().await.take();
        match live {
            Some(live) => {
                info!(memory = %id, holders = live.count, "engine evicted");
                live.engine.close().await
            }
            None => Ok(()),
        }
    }

    /// Close every live engine. Keeps going past failures and returns the first.
    pub async fn close_all(&self) -> Result<(), LexiError> {
        let mut first_err = None;
        let mut closed = 0usize;
        for (id, slot) in self.all_slots() {
            let live = slot.lock().await.take();
            if let Some(live) = live {
                closed += 1;
                if let Err(e) = live.engine.close().await {
                    warn!(memory = %id, error = %e, "close failed during shutdown");
                    first_err.get_or_insert(e);
                }
            }
        }
        info!(closed, "all engines closed");
        first_err.map_or(Ok(()), Err)
    }

    pub async fn is_open(&self, id: &str) -> bool {
        self.open_count(id).await > 0
    }

    /// Current reference count of `id` (0 when not live).
    pub async fn open_count(&self, id: &str) -> usize {
        match self.existing_slot(id) {
            Some(slot) => slot.lock().await.as_ref().map_or(0, |l| l.count),
            None => 0,
        }
    }

    pub async fn live_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for (id, slot) in self.all_slots() {
            if slot.lock().await.is_some() {
                ids.push(id);
            }
        }
        ids.sort();
        ids
    }

    /// Register a new memory. Local memories get their storage created.
    pub async fn create_memory(&self, record: MemoryRecord) -> Result<MemoryRecord, LexiError> {
        let record = self.prepare(record)?;
        if record.kind == MemoryKind::Local {
            let engine = self.factory.build(&record).await?;
            engine.close().await?;
        }
        self.index.insert(record.clone())?;
        info!(memory = %record.id, name = %record.name, kind = ?record.kind, "memory created");
        Ok(record)
    }

    /// Register a record whose storage already exists, locally or on a server.
    pub fn add_memory(&self, record: MemoryRecord) -> Result<MemoryRecord, LexiError> {
        let record = self.prepare(record)?;
        self.index.insert(record.clone())?;
        info!(memory = %record.id, name = %record.name, kind = ?record.kind, "memory added");
        Ok(record)
    }

    fn prepare(&self, mut record: MemoryRecord) -> Result<MemoryRecord, LexiError> {
        if record.id.trim().is_empty() {
            record.id = uuid::Uuid::new_v4().simple().to_string();
        }
        if record.creation_date == 0 {
            record.creation_date = now_ms();
        }
        if record.name.trim().is_empty() {
            return Err(LexiError::Validation("memory name must not be empty".into()));
        }
        validate_memory_id(&record.id)?;
        if self.index.contains(&record.id) {
            return Err(LexiError::Validation(format!("memory '{}' already exists", record.id)));
        }
        if record.kind == MemoryKind::Remote {
            record.remote_credentials()?;
        }
        Ok(record)
    }

    /// Metadata update. The id picks the record and never changes.
    pub fn update_memory(&self, record: MemoryRecord) -> Result<(), LexiError> {
        self.index.update(record)
    }

    /// Close, drop local storage and unregister each id. Returns how many were removed.
    pub async fn delete_memories(&self, ids: &[String]) -> Result<usize, LexiError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.index.require(id)?);
        }
        for record in &records {
            if let Err(e) = self.evict(&record.id).await {
                warn!(memory = %record.id, error = %e, "close before delete failed");
            }
            if record.kind == MemoryKind::Local {
                let dir = self.root.join(&record.id);
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(memory = %record.id, error = %e, "could not delete memory folder"),
                }
            }
        }
        let removed = self.index.remove_many(ids)?;
        info!(count = removed.len(), "memories deleted");
        Ok(removed.len())
    }

    pub fn memory_name(&self, id: &str) -> Result<String, LexiError> {
        Ok(self.index.require(id)?.name)
    }

    /// `(id, name)` of every known memory, sorted by name.
    pub fn list_memories(&self) -> Vec<(String, String)> {
        self.index.sorted().into_iter().map(|r| (r.id, r.name)).collect()
    }

    pub fn records(&self) -> Vec<MemoryRecord> {
        self.index.sorted()
    }
}
