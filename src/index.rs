//! Whole-file index of known memories (`glossaries.json`).
//!
//! The file is a JSON object mapping id → record. It is always read and
//! written in full; every mutation rewrites it through a temp file + rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::LexiError;
use crate::model::MemoryRecord;

pub const INDEX_FILE: &str = "glossaries.json";

pub struct MemoryIndex {
    path: PathBuf,
    records: Mutex<BTreeMap<String, MemoryRecord>>,
}

impl MemoryIndex {
    /// Load the index in `dir`, creating an empty one if missing.
    pub fn load(dir: &Path) -> Result<Self, LexiError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    LexiError::Backend(format!("corrupt index {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };
        let index = Self { path, records: Mutex::new(records) };
        if !index.path.exists() {
            index.persist(&index.records.lock())?;
        }
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<MemoryRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn require(&self, id: &str) -> Result<MemoryRecord, LexiError> {
        self.get(id).ok_or_else(|| LexiError::NotFound(format!("memory '{id}'")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().contains_key(id)
    }

    /// Insert a new record. Fails if the id is taken.
    pub fn insert(&self, record: MemoryRecord) -> Result<(), LexiError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(LexiError::Validation(format!("memory '{}' already exists", record.id)));
        }
        records.insert(record.id.clone(), record);
        self.persist(&records)
    }

    /// Replace the metadata of an existing record.
    pub fn update(&self, record: MemoryRecord) -> Result<(), LexiError> {
        let mut records = self.records.lock();
        match records.get_mut(&record.id) {
            Some(slot) => *slot = record,
            None => return Err(LexiError::NotFound(format!("memory '{}'", record.id))),
        }
        self.persist(&records)
    }

    /// Remove several records with a single write. Unknown ids are skipped.
    pub fn remove_many(&self, ids: &[String]) -> Result<Vec<MemoryRecord>, LexiError> {
        let mut records = self.records.lock();
        let removed: Vec<MemoryRecord> = ids.iter().filter_map(|id| records.remove(id)).collect();
        if !removed.is_empty() {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    /// All records sorted by name (case-insensitive), then id.
    pub fn sorted(&self) -> Vec<MemoryRecord> {
        let mut all: Vec<MemoryRecord> = self.records.lock().values().cloned().collect();
        all.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn persist(&self, records: &BTreeMap<String, MemoryRecord>) -> Result<(), LexiError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| LexiError::Internal(format!("encode index: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), count = records.len(), "index saved");
        Ok(())
    }
}
