//! lexibase: translation memories and glossaries behind one engine interface.
//!
//! Memories live either in a local SQLite store or on a remote server; the
//! [`registry::Registry`] hands out shared engines and the
//! [`tasks::Orchestrator`] runs bulk imports, exports and deletions in the
//! background.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod glossary;
pub mod index;
pub mod model;
pub mod registry;
pub mod replication;
pub mod similarity;
pub mod tasks;

use std::sync::Arc;

use tracing::info;

use crate::codec::{DocumentCodec, JsonCodec};
use crate::config::Config;
use crate::error::LexiError;
use crate::index::MemoryIndex;
use crate::registry::{DefaultEngineFactory, Registry};
use crate::replication::HttpTicketIssuer;
use crate::tasks::Orchestrator;

pub type SharedRegistry = Arc<Registry>;

/// Everything a front end needs, wired from one [`Config`].
pub struct Lexibase {
    pub config: Config,
    pub registry: SharedRegistry,
    pub tasks: Arc<Orchestrator>,
}

impl Lexibase {
    /// Load the memory index under `config.home` and wire the default backends.
    pub fn open(config: Config) -> Result<Self, LexiError> {
        let index = Arc::new(MemoryIndex::load(&config.home)?);
        let http = config.http_client()?;
        let codec: Arc<dyn DocumentCodec> = Arc::new(JsonCodec);
        let factory = DefaultEngineFactory::new(
            config.memories_dir(),
            config.work_dir(),
            http.clone(),
            Arc::new(HttpTicketIssuer::new(http)),
            codec,
        );
        let registry = Arc::new(Registry::new(index, Arc::new(factory), config.memories_dir()));
        let tasks = Arc::new(Orchestrator::new(Arc::clone(&registry), config.task_retention));
        info!(home = %config.home.display(), memories = registry.index().len(), "lexibase ready");
        Ok(Self { config, registry, tasks })
    }

    /// Stop background tasks, then close every open engine.
    pub async fn shutdown(&self) -> Result<(), LexiError> {
        self.tasks.shutdown().await;
        self.registry.close_all().await
    }
}
