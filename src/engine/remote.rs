//! Memory proxied to a remote server over the command channel.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::TmEngine;
use crate::codec::DocumentCodec;
use crate::error::LexiError;
use crate::model::{ImportOutcome, Match, Tu};
use crate::replication::protocol::{self as wire, decode_matches, get_array, get_str, string_items};
use crate::replication::{ReplicationClient, TicketIssuer};

pub struct RemoteEngine {
    client: ReplicationClient,
    codec: Arc<dyn DocumentCodec>,
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl RemoteEngine {
    /// Authenticate, then open `memory` on `server`.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        server: &str,
        user: &str,
        password: &str,
        memory: &str,
        issuer: &dyn TicketIssuer,
        http: reqwest::Client,
        codec: Arc<dyn DocumentCodec>,
        work_dir: &Path,
    ) -> Result<Self, LexiError> {
        let ticket = issuer.issue(server, user, password).await?;
        let client = ReplicationClient::new(server, memory, ticket, http, work_dir);
        client.command(wire::OPEN_MEMORY, Map::new()).await?;
        info!(memory, server = %client.server(), "remote memory opened");
        Ok(Self { client, codec })
    }

    async fn catalog(&self, command: &str, key: &str) -> Result<BTreeSet<String>, LexiError> {
        let reply = self.client.command(command, Map::new()).await?;
        Ok(string_items(get_array(&reply, key)?)?.into_iter().map(String::from).collect())
    }

    fn decode_units(&self, items: &[Value]) -> Result<Vec<Tu>, LexiError> {
        string_items(items)?.into_iter().map(|raw| self.codec.decode_unit(raw)).collect()
    }
}

#[async_trait]
impl TmEngine for RemoteEngine {
    fn name(&self) -> &str {
        self.client.memory()
    }

    async fn store_tu(&self, tu: Tu) -> Result<(), LexiError> {
        let encoded = self.codec.encode_unit(&tu)?;
        self.client.command(wire::STORE_TU, params(json!({ "tu": encoded }))).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), LexiError> {
        self.client.command(wire::COMMIT, Map::new()).await?;
        Ok(())
    }

    async fn remove_tu(&self, id: &str) -> Result<(), LexiError> {
        self.client.command(wire::REMOVE_TU, params(json!({ "tuid": id }))).await?;
        Ok(())
    }

    async fn get_tu(&self, id: &str) -> Result<Tu, LexiError> {
        let reply = self.client.command(wire::GET_TU, params(json!({ "tuid": id }))).await?;
        match reply.get("tu").and_then(Value::as_str) {
            Some(raw) if !raw.is_empty() => self.codec.decode_unit(raw),
            _ => Err(LexiError::NotFound(format!("unit '{id}' in memory '{}'", self.name()))),
        }
    }

    async fn search_all(
        &self,
        query: &str,
        lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError> {
        let reply = self
            .client
            .command(
                wire::SEARCH_ALL,
                params(json!({
                    "searchStr": query,
                    "srcLang": lang,
                    "similarity": min_similarity,
                    "caseSensitive": case_sensitive,
                })),
            )
            .await?;
        self.decode_units(get_array(&reply, "tus")?)
    }

    async fn search_translation(
        &self,
        query: &str,
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Match>, LexiError> {
        let reply = self
            .client
            .command(
                wire::SEARCH_TRANSLATION,
                params(json!({
                    "searchStr": query,
                    "srcLang": src_lang,
                    "tgtLang": tgt_lang,
                    "similarity": min_similarity,
                    "caseSensitive": case_sensitive,
                })),
            )
            .await?;
        decode_matches(get_array(&reply, "matches")?, self.codec.as_ref())
    }

    async fn concordance_search(
        &self,
        query: &str,
        lang: &str,
        limit: usize,
        is_regexp: bool,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError> {
        let reply = self
            .client
            .command(
                wire::CONCORDANCE_SEARCH,
                params(json!({
                    "searchStr": query,
                    "srcLang": lang,
                    "limit": limit,
                    "isRegexp": is_regexp,
                    "caseSensitive": case_sensitive,
                })),
            )
            .await?;
        let mut units = self.decode_units(get_array(&reply, "tus")?)?;
        units.truncate(limit);
        Ok(units)
    }

    async fn batch_translate(
        &self,
        segments: &[String],
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
    ) -> Result<Vec<Vec<Match>>, LexiError> {
        let reply = self
            .client
            .command(
                wire::BATCH_TRANSLATE,
                params(json!({
                    "segments": segments,
                    "srcLang": src_lang,
                    "tgtLang": tgt_lang,
                    "similarity": min_similarity,
                })),
            )
            .await?;
        get_array(&reply, "matches")?
            .iter()
            .map(|per_segment| {
                let items = per_segment
                    .as_array()
                    .ok_or_else(|| LexiError::Protocol("expected an array of matches".into()))?;
                decode_matches(items, self.codec.as_ref())
            })
            .collect()
    }

    async fn store_tmx(
        &self,
        file: &Path,
        project: &str,
        client: &str,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, LexiError> {
        let token = self.client.upload(file).await?;
        // the server owns the import once it has the command
        if cancel.is_cancelled() {
            return Err(LexiError::Cancelled);
        }
        self.client
            .command(
                wire::IMPORT_TMX,
                params(json!({
                    "file": token,
                    "project": project,
                    "subject": subject,
                    "client": client,
                    "close": false,
                })),
            )
            .await?;
        info!(memory = %self.name(), "document handed to remote server");
        Ok(ImportOutcome::Deferred)
    }

    async fn export_memory(
        &self,
        file: &Path,
        languages: &BTreeSet<String>,
        src_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LexiError> {
        let mut p = params(json!({ "srcLang": src_lang }));
        if !languages.is_empty() {
            p.insert("languages".into(), json!(languages));
        }
        let reply = self.client.command(wire::EXPORT_MEMORY, p).await?;
        let token = get_str(&reply, "file")?;
        self.client.download(token, file, cancel).await
    }

    async fn get_all_languages(&self) -> Result<BTreeSet<String>, LexiError> {
        self.catalog(wire::MEMORY_LANGUAGES, "languages").await
    }

    async fn get_all_clients(&self) -> Result<BTreeSet<String>, LexiError> {
        self.catalog(wire::MEMORY_CLIENTS, "clients").await
    }

    async fn get_all_projects(&self) -> Result<BTreeSet<String>, LexiError> {
        self.catalog(wire::MEMORY_PROJECTS, "projects").await
    }

    async fn get_all_subjects(&self) -> Result<BTreeSet<String>, LexiError> {
        self.catalog(wire::MEMORY_SUBJECTS, "subjects").await
    }

    async fn get_all_terms(&self) -> Result<Vec<Tu>, LexiError> {
        // the protocol has no enumeration command
        debug!(memory = %self.name(), "term listing not available for remote memories");
        Ok(Vec::new())
    }

    async fn delete_database(&self) -> Result<(), LexiError> {
        self.client.command(wire::REMOVE_MEMORY, Map::new()).await?;
        info!(memory = %self.name(), "remote memory removed");
        Ok(())
    }

    async fn close(&self) -> Result<(), LexiError> {
        self.client.command(wire::CLOSE_MEMORY, Map::new()).await?;
        debug!(memory = %self.name(), "remote memory closed");
        Ok(())
    }
}
