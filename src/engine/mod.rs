//! Translation memory engines: one trait, a local SQLite store and a remote proxy.

mod local;
mod remote;

pub use local::{validate_memory_id, LocalEngine};
pub use remote::RemoteEngine;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LexiError;
use crate::model::{ImportOutcome, Match, Tu};

pub type SharedEngine = Arc<dyn TmEngine>;

/// Operations every backend supports with the same contract.
///
/// `close` is not guaranteed idempotent; the registry makes sure it runs
/// once per open handle.
#[async_trait]
pub trait TmEngine: Send + Sync {
    /// Memory id this engine serves.
    fn name(&self) -> &str;

    async fn store_tu(&self, tu: Tu) -> Result<(), LexiError>;
    async fn commit(&self) -> Result<(), LexiError>;
    /// Unknown ids are ignored.
    async fn remove_tu(&self, id: &str) -> Result<(), LexiError>;
    async fn get_tu(&self, id: &str) -> Result<Tu, LexiError>;

    async fn search_all(
        &self,
        query: &str,
        lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError>;

    async fn search_translation(
        &self,
        query: &str,
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Match>, LexiError>;

    async fn concordance_search(
        &self,
        query: &str,
        lang: &str,
        limit: usize,
        is_regexp: bool,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError>;

    /// Best matches for each segment, in input order.
    async fn batch_translate(
        &self,
        segments: &[String],
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
    ) -> Result<Vec<Vec<Match>>, LexiError>;

    /// Import every unit of `file`, stamping the non-empty tags on each.
    ///
    /// `cancel` is honoured only while nothing is committed: a cancelled
    /// import returns [`LexiError::Cancelled`] and leaves the memory as it
    /// was. Once the batch commits the import reports its outcome.
    async fn store_tmx(
        &self,
        file: &Path,
        project: &str,
        client: &str,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, LexiError>;

    /// `languages` empty means every unit unfiltered; `src_lang` may be
    /// [`crate::model::NO_PIVOT`]. A cancelled export leaves `file` untouched.
    async fn export_memory(
        &self,
        file: &Path,
        languages: &BTreeSet<String>,
        src_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LexiError>;

    async fn get_all_languages(&self) -> Result<BTreeSet<String>, LexiError>;
    async fn get_all_clients(&self) -> Result<BTreeSet<String>, LexiError>;
    async fn get_all_projects(&self) -> Result<BTreeSet<String>, LexiError>;
    async fn get_all_subjects(&self) -> Result<BTreeSet<String>, LexiError>;

    /// Every stored unit. Backends that cannot enumerate return an empty list.
    async fn get_all_terms(&self) -> Result<Vec<Tu>, LexiError>;

    async fn delete_database(&self) -> Result<(), LexiError>;
    async fn close(&self) -> Result<(), LexiError>;
}

/// Restrict `units` to `languages` and the optional pivot, as exports do.
///
/// With a language filter, units left with fewer than two variants are
/// dropped. A pivot other than [`crate::model::NO_PIVOT`] keeps only units
/// that contain it.
pub fn filter_for_export(units: Vec<Tu>, languages: &BTreeSet<String>, src_lang: &str) -> Vec<Tu> {
    let pivot = (src_lang != crate::model::NO_PIVOT && !src_lang.is_empty()).then_some(src_lang);
    units
        .into_iter()
        .filter_map(|mut tu| {
            if !languages.is_empty() {
                tu.variants.retain(|v| languages.contains(&v.lang));
                if tu.variants.len() < 2 {
                    return None;
                }
            }
            if let Some(p) = pivot {
                tu.get(p)?;
            }
            (!tu.variants.is_empty()).then_some(tu)
        })
        .collect()
}
