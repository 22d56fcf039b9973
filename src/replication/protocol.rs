//! Wire vocabulary of the remote memory server.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::codec::DocumentCodec;
use crate::error::LexiError;
use crate::model::{Match, Properties};

pub const COMMAND_PATH: &str = "/memories";
pub const UPLOAD_PATH: &str = "/upload";
pub const DOWNLOAD_PATH: &str = "/download";
pub const AUTHORIZE_PATH: &str = "/authorize";

pub const SESSION_HEADER: &str = "Session";
pub const STATUS_OK: &str = "OK";

pub const OPEN_MEMORY: &str = "openMemory";
pub const CLOSE_MEMORY: &str = "closeMemory";
pub const IMPORT_TMX: &str = "importTMX";
pub const EXPORT_MEMORY: &str = "exportMemory";
pub const MEMORY_CLIENTS: &str = "memoryClients";
pub const MEMORY_LANGUAGES: &str = "memoryLanguages";
pub const MEMORY_PROJECTS: &str = "memoryProjects";
pub const MEMORY_SUBJECTS: &str = "memorySubjects";
pub const SEARCH_TRANSLATION: &str = "searchTranslation";
pub const SEARCH_ALL: &str = "searchAll";
pub const CONCORDANCE_SEARCH: &str = "concordanceSearch";
pub const STORE_TU: &str = "storeTu";
pub const COMMIT: &str = "commit";
pub const GET_TU: &str = "getTu";
pub const REMOVE_TU: &str = "removeTu";
pub const REMOVE_MEMORY: &str = "removeMemory";
pub const BATCH_TRANSLATE: &str = "batchTranslate";

/// Check the `status` marker of a peer reply and hand back the payload.
pub fn check_reply(body: &str) -> Result<Map<String, Value>, LexiError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LexiError::Protocol(format!("unparseable reply: {e}")))?;
    let Value::Object(map) = value else {
        return Err(LexiError::Protocol("reply is not a JSON object".into()));
    };
    match map.get("status").and_then(Value::as_str) {
        Some(STATUS_OK) => Ok(map),
        Some(_) => {
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("remote server reported an error without a reason");
            Err(LexiError::Protocol(reason.to_string()))
        }
        None => Err(LexiError::Protocol("reply has no status".into())),
    }
}

pub fn get_str<'a>(reply: &'a Map<String, Value>, key: &str) -> Result<&'a str, LexiError> {
    reply
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| LexiError::Protocol(format!("reply is missing '{key}'")))
}

pub fn get_array<'a>(reply: &'a Map<String, Value>, key: &str) -> Result<&'a Vec<Value>, LexiError> {
    reply
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| LexiError::Protocol(format!("reply is missing array '{key}'")))
}

pub fn string_items(items: &[Value]) -> Result<Vec<&str>, LexiError> {
    items
        .iter()
        .map(|v| v.as_str().ok_or_else(|| LexiError::Protocol("expected a string item".into())))
        .collect()
}

/// A match as carried in `matches`: variants are codec-encoded strings.
#[derive(Debug, Deserialize)]
pub struct WireMatch {
    pub source: String,
    pub target: String,
    pub similarity: u8,
    pub origin: String,
    #[serde(default)]
    pub properties: Properties,
}

impl WireMatch {
    pub fn decode(self, codec: &dyn DocumentCodec) -> Result<Match, LexiError> {
        Ok(Match {
            source: codec.decode_variant(&self.source)?,
            target: codec.decode_variant(&self.target)?,
            similarity: self.similarity.min(100),
            origin: self.origin,
            properties: self.properties,
        })
    }
}

pub fn decode_matches(items: &[Value], codec: &dyn DocumentCodec) -> Result<Vec<Match>, LexiError> {
    items
        .iter()
        .map(|v| {
            let wire: WireMatch = serde_json::from_value(v.clone())?;
            wire.decode(codec)
        })
        .collect()
}
