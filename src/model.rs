//! Translation units, memory records and search results shared by every backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LexiError;

/// `src_lang` value meaning "export every unit regardless of pivot language".
pub const NO_PIVOT: &str = "*all*";

pub type Properties = BTreeMap<String, String>;

/// Property keys stamped on imported units.
pub const PROP_PROJECT: &str = "project";
pub const PROP_CLIENT: &str = "client";
pub const PROP_SUBJECT: &str = "subject";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    #[serde(default)]
    pub creation_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl MemoryRecord {
    pub fn local(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: MemoryKind::Local,
            creation_date: now_ms(),
            client: None,
            subject: None,
            project: None,
            server: None,
            user: None,
            password: None,
        }
    }

    pub fn remote(
        id: impl Into<String>,
        name: impl Into<String>,
        server: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            kind: MemoryKind::Remote,
            server: Some(server.into()),
            user: Some(user.into()),
            password: Some(password.into()),
            ..Self::local(id, name)
        }
    }

    /// Server, user and password of a remote record.
    pub fn remote_credentials(&self) -> Result<(&str, &str, &str), LexiError> {
        match (&self.server, &self.user, &self.password) {
            (Some(s), Some(u), Some(p)) if self.kind == MemoryKind::Remote => {
                Ok((s.as_str(), u.as_str(), p.as_str()))
            }
            _ => Err(LexiError::Validation(format!(
                "memory '{}' has no remote server credentials",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuv {
    pub lang: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl Tuv {
    pub fn new(lang: impl Into<String>, text: impl Into<String>) -> Self {
        Self { lang: lang.into(), text: text.into(), properties: Properties::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub variants: Vec<Tuv>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl Tu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()), ..Self::default() }
    }

    /// Adds or replaces the variant for `lang`.
    pub fn variant(mut self, lang: impl Into<String>, text: impl Into<String>) -> Self {
        self.set_variant(Tuv::new(lang, text));
        self
    }

    pub fn set_variant(&mut self, tuv: Tuv) {
        match self.variants.iter_mut().find(|v| v.lang == tuv.lang) {
            Some(existing) => *existing = tuv,
            None => self.variants.push(tuv),
        }
    }

    pub fn get(&self, lang: &str) -> Option<&Tuv> {
        self.variants.iter().find(|v| v.lang == lang)
    }

    pub fn text(&self, lang: &str) -> Option<&str> {
        self.get(lang).map(|v| v.text.as_str())
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Variants as a map keyed by language, for order-insensitive comparison.
    pub fn variant_map(&self) -> BTreeMap<&str, &str> {
        self.variants.iter().map(|v| (v.lang.as_str(), v.text.as_str())).collect()
    }

    /// Deterministic key for a unit stored without an id.
    ///
    /// Derived from the sorted language/segment pairs, so storing the same
    /// content twice upserts instead of duplicating.
    pub fn content_key(&self) -> String {
        let mut seed = String::new();
        for (lang, text) in self.variant_map() {
            seed.push_str(lang);
            seed.push('\u{1f}');
            seed.push_str(text);
            seed.push('\u{1e}');
        }
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub source: Tuv,
    pub target: Tuv,
    pub similarity: u8,
    pub origin: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// Result of a bulk import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "count")]
pub enum ImportOutcome {
    Counted(usize),
    /// The backend accepted the document but did not count units synchronously.
    Deferred,
}

impl ImportOutcome {
    pub fn count(self) -> Option<usize> {
        match self {
            Self::Counted(n) => Some(n),
            Self::Deferred => None,
        }
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_ignores_variant_order() {
        let a = Tu::new().variant("en", "cat").variant("fr", "chat");
        let b = Tu::new().variant("fr", "chat").variant("en", "cat");
        assert_eq!(a.content_key(), b.content_key());
        let c = Tu::new().variant("en", "cat").variant("fr", "chien");
        assert_ne!(a.content_key(), c.content_key());
    }

    #[test]
    fn set_variant_replaces_same_language() {
        let tu = Tu::new().variant("en", "cat").variant("en", "kitten");
        assert_eq!(tu.variants.len(), 1);
        assert_eq!(tu.text("en"), Some("kitten"));
    }

    #[test]
    fn record_round_trips_with_type_field() {
        let rec = MemoryRecord::remote("r1", "Remote", "https://tm.example.com", "u", "p");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "remote");
        assert_eq!(json["creationDate"], rec.creation_date);
        let back: MemoryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
        assert!(back.remote_credentials().is_ok());
        assert!(MemoryRecord::local("l", "L").remote_credentials().is_err());
    }
}
