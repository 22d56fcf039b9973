//! SQLite-backed memory stored under `{root}/{id}/database.db`.
//!
//! One connection per engine. Writes open a transaction lazily and stay
//! pending until `commit` (or `close`), so reads through the same engine see
//! them immediately while other processes do not.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{filter_for_export, TmEngine};
use crate::codec::DocumentCodec;
use crate::error::LexiError;
use crate::model::{
    now_ms, ImportOutcome, Match, Properties, Tu, Tuv, PROP_CLIENT, PROP_PROJECT, PROP_SUBJECT,
};
use crate::similarity;

pub const DATABASE_FILE: &str = "database.db";

/// Matches kept per segment in a batch translation.
const BATCH_MAX_MATCHES: usize = 5;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tus (
    tuid TEXT PRIMARY KEY,
    project TEXT NOT NULL DEFAULT '',
    client TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL DEFAULT '',
    properties TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tuvs (
    tuid TEXT NOT NULL,
    lang TEXT NOT NULL,
    seg TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (tuid, lang)
);

CREATE INDEX IF NOT EXISTS idx_tuvs_lang ON tuvs(lang);
CREATE INDEX IF NOT EXISTS idx_tus_project ON tus(project);
CREATE INDEX IF NOT EXISTS idx_tus_client ON tus(client);
CREATE INDEX IF NOT EXISTS idx_tus_subject ON tus(subject);
"#;

struct Store {
    conn: Connection,
    in_tx: bool,
}

pub struct LocalEngine {
    id: String,
    dir: PathBuf,
    store: Arc<Mutex<Option<Store>>>,
    codec: Arc<dyn DocumentCodec>,
}

/// Memory ids become directory names, so keep them to one plain path component.
pub fn validate_memory_id(id: &str) -> Result<(), LexiError> {
    let bad = id.trim().is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.len() > 128;
    if bad {
        return Err(LexiError::Validation(format!("invalid memory id '{id}'")));
    }
    Ok(())
}

impl LocalEngine {
    /// Open (or create) the store for `id` below `root`. Blocking.
    pub fn open(id: &str, root: &Path, codec: Arc<dyn DocumentCodec>) -> Result<Self, LexiError> {
        validate_memory_id(id)?;
        let dir = root.join(id);
        std::fs::create_dir_all(&dir)?;
        let conn = Connection::open(dir.join(DATABASE_FILE))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        debug!(memory = %id, dir = %dir.display(), "local memory opened");
        Ok(Self {
            id: id.to_string(),
            dir,
            store: Arc::new(Mutex::new(Some(Store { conn, in_tx: false }))),
            codec,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run a blocking store operation on tokio's blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, LexiError>
    where
        F: FnOnce(&mut Store) -> Result<T, LexiError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || -> Result<T, LexiError> {
            let mut guard = store.lock();
            let s = guard
                .as_mut()
                .ok_or_else(|| LexiError::Backend(format!("memory '{id}' is closed")))?;
            f(s)
        })
        .await
        .map_err(|e| LexiError::Internal(e.to_string()))?
    }
}

impl Store {
    fn begin(&mut self) -> Result<(), LexiError> {
        if !self.in_tx {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_tx = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), LexiError> {
        if self.in_tx {
            self.conn.execute_batch("COMMIT")?;
            self.in_tx = false;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if self.in_tx {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
            self.in_tx = false;
        }
    }

    fn store_unit(&mut self, tu: &Tu) -> Result<String, LexiError> {
        if tu.variants.is_empty() {
            return Err(LexiError::Validation("translation unit has no variants".into()));
        }
        let tuid = match tu.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => tu.content_key(),
        };
        self.begin()?;
        let now = now_ms();
        let tag = |key: &str| tu.property(key).unwrap_or_default().to_string();
        self.conn.execute(
            "INSERT INTO tus (tuid, project, client, subject, properties, created_at, modified_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(tuid) DO UPDATE SET project = ?2, client = ?3, subject = ?4, \
             properties = ?5, modified_at = ?6",
            params![
                tuid,
                tag(PROP_PROJECT),
                tag(PROP_CLIENT),
                tag(PROP_SUBJECT),
                props_to_json(&tu.properties),
                now
            ],
        )?;
        self.conn.execute("DELETE FROM tuvs WHERE tuid = ?1", [&tuid])?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO tuvs (tuid, lang, seg, properties) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for tuv in &tu.variants {
            stmt.execute(params![tuid, tuv.lang, tuv.text, props_to_json(&tuv.properties)])?;
        }
        Ok(tuid)
    }

    fn remove_unit(&mut self, tuid: &str) -> Result<(), LexiError> {
        self.begin()?;
        self.conn.execute("DELETE FROM tuvs WHERE tuid = ?1", [tuid])?;
        self.conn.execute("DELETE FROM tus WHERE tuid = ?1", [tuid])?;
        Ok(())
    }

    fn variants(&self, tuid: &str) -> Result<Vec<Tuv>, LexiError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT lang, seg, properties FROM tuvs WHERE tuid = ?1 ORDER BY lang")?;
        let rows = stmt
            .query_map([tuid], row_to_tuv)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_unit(&self, tuid: &str) -> Result<Option<Tu>, LexiError> {
        let props: Option<String> = self
            .conn
            .query_row("SELECT properties FROM tus WHERE tuid = ?1", [tuid], |r| r.get(0))
            .optional()?;
        let Some(props) = props else {
            return Ok(None);
        };
        Ok(Some(Tu {
            id: Some(tuid.to_string()),
            variants: self.variants(tuid)?,
            properties: props_from_json(&props),
        }))
    }

    fn load_units(&self, tuids: &[String]) -> Result<Vec<Tu>, LexiError> {
        let mut out = Vec::with_capacity(tuids.len());
        for tuid in tuids {
            if let Some(tu) = self.load_unit(tuid)? {
                out.push(tu);
            }
        }
        Ok(out)
    }

    /// Every unit in insertion order, loaded in two passes.
    fn load_all(&self) -> Result<Vec<Tu>, LexiError> {
        let mut stmt = self.conn.prepare("SELECT tuid, properties FROM tus ORDER BY rowid")?;
        let mut units: Vec<Tu> = stmt
            .query_map([], |r| {
                Ok(Tu {
                    id: Some(r.get(0)?),
                    variants: Vec::new(),
                    properties: props_from_json(&r.get::<_, String>(1)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let pos: HashMap<String, usize> = units
            .iter()
            .enumerate()
            .filter_map(|(i, tu)| tu.id.clone().map(|id| (id, i)))
            .collect();
        let mut stmt = self
            .conn
            .prepare("SELECT tuid, lang, seg, properties FROM tuvs ORDER BY tuid, lang")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let tuid: String = row.get(0)?;
            if let Some(&i) = pos.get(&tuid) {
                units[i].variants.push(Tuv {
                    lang: row.get(1)?,
                    text: row.get(2)?,
                    properties: props_from_json(&row.get::<_, String>(3)?),
                });
            }
        }
        Ok(units)
    }

    /// `(tuid, segment)` pairs for one language in insertion order.
    fn segments(&self, lang: &str) -> Result<Vec<(String, String)>, LexiError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT v.tuid, v.seg FROM tuvs v JOIN tus t ON t.tuid = v.tuid \
             WHERE v.lang = ?1 ORDER BY t.rowid",
        )?;
        let rows = stmt
            .query_map([lang], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn translations(
        &self,
        origin: &str,
        query: &str,
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Match>, LexiError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.seg, s.properties, t.seg, t.properties, u.properties \
             FROM tuvs s \
             JOIN tuvs t ON t.tuid = s.tuid AND t.lang = ?2 \
             JOIN tus u ON u.tuid = s.tuid \
             WHERE s.lang = ?1 ORDER BY u.rowid",
        )?;
        let mut rows = stmt.query(params![src_lang, tgt_lang])?;
        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            let seg: String = row.get(0)?;
            let Some(similarity) = passes(query, &seg, min_similarity, case_sensitive) else {
                continue;
            };
            matches.push(Match {
                source: Tuv {
                    lang: src_lang.to_string(),
                    text: seg,
                    properties: props_from_json(&row.get::<_, String>(1)?),
                },
                target: Tuv {
                    lang: tgt_lang.to_string(),
                    text: row.get(2)?,
                    properties: props_from_json(&row.get::<_, String>(3)?),
                },
                similarity,
                origin: origin.to_string(),
                properties: props_from_json(&row.get::<_, String>(4)?),
            });
        }
        // stable sort keeps insertion order among equal scores
        matches.sort_by(|a, b| b.similarity.cmp(&a.similarity));
        Ok(matches)
    }

    fn distinct(&self, sql: &str) -> Result<BTreeSet<String>, LexiError> {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(values)
    }
}

/// Score of `seg` against `query` if it reaches `min_similarity`.
fn passes(query: &str, seg: &str, min_similarity: u8, case_sensitive: bool) -> Option<u8> {
    if case_sensitive
        && similarity::upper_bound(query.chars().count(), seg.chars().count()) < min_similarity
    {
        return None;
    }
    let s = similarity::score(query, seg, case_sensitive);
    (s >= min_similarity).then_some(s)
}

fn row_to_tuv(row: &rusqlite::Row) -> rusqlite::Result<Tuv> {
    Ok(Tuv {
        lang: row.get(0)?,
        text: row.get(1)?,
        properties: props_from_json(&row.get::<_, String>(2)?),
    })
}

fn props_to_json(props: &Properties) -> String {
    serde_json::to_string(props).unwrap_or_else(|_| "{}".into())
}

fn props_from_json(raw: &str) -> Properties {
    serde_json::from_str(raw).unwrap_or_default()
}

enum Needle {
    Regex(regex::Regex),
    Plain { text: String, case_sensitive: bool },
}

impl Needle {
    fn new(query: &str, is_regexp: bool, case_sensitive: bool) -> Result<Self, LexiError> {
        if is_regexp {
            let re = regex::RegexBuilder::new(query)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| LexiError::Validation(format!("invalid regular expression: {e}")))?;
            Ok(Self::Regex(re))
        } else {
            let text = if case_sensitive { query.to_string() } else { query.to_lowercase() };
            Ok(Self::Plain { text, case_sensitive })
        }
    }

    fn matches(&self, seg: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(seg),
            Self::Plain { text, case_sensitive: true } => seg.contains(text.as_str()),
            Self::Plain { text, case_sensitive: false } => seg.to_lowercase().contains(text.as_str()),
        }
    }
}

#[async_trait]
impl TmEngine for LocalEngine {
    fn name(&self) -> &str {
        &self.id
    }

    async fn store_tu(&self, tu: Tu) -> Result<(), LexiError> {
        self.call(move |s| s.store_unit(&tu).map(|_| ())).await
    }

    async fn commit(&self) -> Result<(), LexiError> {
        self.call(|s| s.commit()).await
    }

    async fn remove_tu(&self, id: &str) -> Result<(), LexiError> {
        let id = id.to_string();
        self.call(move |s| s.remove_unit(&id)).await
    }

    async fn get_tu(&self, id: &str) -> Result<Tu, LexiError> {
        let tuid = id.to_string();
        let memory = self.id.clone();
        self.call(move |s| {
            s.load_unit(&tuid)?
                .ok_or_else(|| LexiError::NotFound(format!("unit '{tuid}' in memory '{memory}'")))
        })
        .await
    }

    async fn search_all(
        &self,
        query: &str,
        lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError> {
        let query = query.to_string();
        let lang = lang.to_string();
        self.call(move |s| {
            let mut hits: Vec<(u8, String)> = s
                .segments(&lang)?
                .into_iter()
                .filter_map(|(tuid, seg)| {
                    passes(&query, &seg, min_similarity, case_sensitive).map(|sc| (sc, tuid))
                })
                .collect();
            hits.sort_by(|a, b| b.0.cmp(&a.0));
            let tuids: Vec<String> = hits.into_iter().map(|(_, t)| t).collect();
            s.load_units(&tuids)
        })
        .await
    }

    async fn search_translation(
        &self,
        query: &str,
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Match>, LexiError> {
        let (origin, query, src, tgt) =
            (self.id.clone(), query.to_string(), src_lang.to_string(), tgt_lang.to_string());
        self.call(move |s| s.translations(&origin, &query, &src, &tgt, min_similarity, case_sensitive))
            .await
    }

    async fn concordance_search(
        &self,
        query: &str,
        lang: &str,
        limit: usize,
        is_regexp: bool,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError> {
        let needle = Needle::new(query, is_regexp, case_sensitive)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lang = lang.to_string();
        self.call(move |s| {
            let tuids: Vec<String> = s
                .segments(&lang)?
                .into_iter()
                .filter(|(_, seg)| needle.matches(seg))
                .map(|(tuid, _)| tuid)
                .take(limit)
                .collect();
            s.load_units(&tuids)
        })
        .await
    }

    async fn batch_translate(
        &self,
        segments: &[String],
        src_lang: &str,
        tgt_lang: &str,
        min_similarity: u8,
    ) -> Result<Vec<Vec<Match>>, LexiError> {
        let (origin, src, tgt) = (self.id.clone(), src_lang.to_string(), tgt_lang.to_string());
        let segments = segments.to_vec();
        self.call(move |s| {
            segments
                .iter()
                .map(|seg| -> Result<Vec<Match>, LexiError> {
                    let mut m = s.translations(&origin, seg, &src, &tgt, min_similarity, false)?;
                    m.truncate(BATCH_MAX_MATCHES);
                    Ok(m)
                })
                .collect()
        })
        .await
    }

    async fn store_tmx(
        &self,
        file: &Path,
        project: &str,
        client: &str,
        subject: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, LexiError> {
        let codec = Arc::clone(&self.codec);
        let path = file.to_path_buf();
        let units = tokio::task::spawn_blocking(move || codec.read_document(&path))
            .await
            .map_err(|e| LexiError::Internal(e.to_string()))??;
        let cancel = cancel.clone();
        let stamps: Vec<(&'static str, String)> =
            [(PROP_PROJECT, project), (PROP_CLIENT, client), (PROP_SUBJECT, subject)]
                .into_iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k, v.to_string()))
                .collect();
        let memory = self.id.clone();
        let count = self
            .call(move |s| -> Result<usize, LexiError> {
                let mut count = 0usize;
                for mut tu in units {
                    if cancel.is_cancelled() {
                        s.rollback();
                        return Err(LexiError::Cancelled);
                    }
                    if tu.variants.is_empty() {
                        continue;
                    }
                    for (k, v) in &stamps {
                        tu.properties.insert(k.to_string(), v.clone());
                    }
                    if let Err(e) = s.store_unit(&tu) {
                        s.rollback();
                        return Err(e);
                    }
                    count += 1;
                }
                s.commit()?;
                Ok(count)
            })
            .await?;
        info!(memory = %memory, imported = count, "document imported");
        Ok(ImportOutcome::Counted(count))
    }

    async fn export_memory(
        &self,
        file: &Path,
        languages: &BTreeSet<String>,
        src_lang: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LexiError> {
        let codec = Arc::clone(&self.codec);
        let (path, languages, src_lang) = (file.to_path_buf(), languages.clone(), src_lang.to_string());
        let cancel = cancel.clone();
        let exported = self
            .call(move |s| -> Result<usize, LexiError> {
                let units = filter_for_export(s.load_all()?, &languages, &src_lang);
                if cancel.is_cancelled() {
                    return Err(LexiError::Cancelled);
                }
                codec.write_document(&path, &units)?;
                Ok(units.len())
            })
            .await?;
        info!(memory = %self.id, file = %file.display(), units = exported, "memory exported");
        Ok(())
    }

    async fn get_all_languages(&self) -> Result<BTreeSet<String>, LexiError> {
        self.call(|s| s.distinct("SELECT DISTINCT lang FROM tuvs")).await
    }

    async fn get_all_clients(&self) -> Result<BTreeSet<String>, LexiError> {
        self.call(|s| s.distinct("SELECT DISTINCT client FROM tus WHERE client <> ''")).await
    }

    async fn get_all_projects(&self) -> Result<BTreeSet<String>, LexiError> {
        self.call(|s| s.distinct("SELECT DISTINCT project FROM tus WHERE project <> ''")).await
    }

    async fn get_all_subjects(&self) -> Result<BTreeSet<String>, LexiError> {
        self.call(|s| s.distinct("SELECT DISTINCT subject FROM tus WHERE subject <> ''")).await
    }

    async fn get_all_terms(&self) -> Result<Vec<Tu>, LexiError> {
        self.call(|s| s.load_all()).await
    }

    async fn delete_database(&self) -> Result<(), LexiError> {
        let store = Arc::clone(&self.store);
        let dir = self.dir.clone();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || -> Result<(), LexiError> {
            if let Some(mut s) = store.lock().take() {
                s.rollback();
                if let Err((_, e)) = s.conn.close() {
                    warn!(memory = %id, error = %e, "close before delete failed");
                }
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LexiError::from(e)),
            }
            info!(memory = %id, "local memory deleted");
            Ok(())
        })
        .await
        .map_err(|e| LexiError::Internal(e.to_string()))?
    }

    async fn close(&self) -> Result<(), LexiError> {
        let store = Arc::clone(&self.store);
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || -> Result<(), LexiError> {
            let Some(mut s) = store.lock().take() else {
                return Ok(());
            };
            s.commit()?;
            s.conn.close().map_err(|(_, e)| LexiError::Database(e))?;
            debug!(memory = %id, "local memory closed");
            Ok(())
        })
        .await
        .map_err(|e| LexiError::Internal(e.to_string()))?
    }
}
