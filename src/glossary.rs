//! Term editing on glossaries.
//!
//! A term is a two-variant unit. Each call opens the glossary, applies the
//! change, commits and closes again, so it composes with other holders of
//! the same handle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LexiError;
use crate::model::Tu;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub src_lang: String,
    pub tgt_lang: String,
    pub source_term: String,
    pub target_term: String,
}

impl Term {
    pub fn new(
        src_lang: impl Into<String>,
        tgt_lang: impl Into<String>,
        source_term: impl Into<String>,
        target_term: impl Into<String>,
    ) -> Self {
        Self {
            src_lang: src_lang.into(),
            tgt_lang: tgt_lang.into(),
            source_term: source_term.into(),
            target_term: target_term.into(),
        }
    }

    fn validate(&self) -> Result<(), LexiError> {
        let blank = [&self.src_lang, &self.tgt_lang, &self.source_term, &self.target_term]
            .iter()
            .any(|s| s.trim().is_empty());
        if blank {
            return Err(LexiError::Validation("term needs both languages and both texts".into()));
        }
        if self.src_lang == self.tgt_lang {
            return Err(LexiError::Validation(format!(
                "source and target language are both '{}'",
                self.src_lang
            )));
        }
        Ok(())
    }

    fn to_unit(&self, id: String) -> Tu {
        Tu::with_id(id)
            .variant(&self.src_lang, &self.source_term)
            .variant(&self.tgt_lang, &self.target_term)
    }
}

fn require_term_id(term_id: &str) -> Result<(), LexiError> {
    if term_id.trim().is_empty() {
        return Err(LexiError::Validation("term id must not be empty".into()));
    }
    Ok(())
}

impl Registry {
    /// Close `glossary` after a term edit. A close failure only surfaces
    /// when the edit itself succeeded.
    async fn release_after<T>(&self, glossary: &str, result: Result<T, LexiError>) -> Result<T, LexiError> {
        if let Err(e) = self.close(glossary).await {
            warn!(glossary = %glossary, error = %e, "close after term edit failed");
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }

    /// Store `term` as a new unit and return its id.
    pub async fn add_term(&self, glossary: &str, term: &Term) -> Result<String, LexiError> {
        term.validate()?;
        let mut unit = term.to_unit(String::new());
        let id = unit.content_key();
        unit.id = Some(id.clone());
        let engine = self.open(glossary).await?;
        let result = async {
            engine.store_tu(unit).await?;
            engine.commit().await
        }
        .await;
        self.release_after(glossary, result).await?;
        info!(glossary = %glossary, term = %id, "term added");
        Ok(id)
    }

    /// Replace the unit `term_id` with `term`, keeping the id.
    pub async fn update_term(&self, glossary: &str, term_id: &str, term: &Term) -> Result<(), LexiError> {
        require_term_id(term_id)?;
        term.validate()?;
        let unit = term.to_unit(term_id.to_string());
        let engine = self.open(glossary).await?;
        let result = async {
            engine.remove_tu(term_id).await?;
            engine.store_tu(unit).await?;
            engine.commit().await
        }
        .await;
        self.release_after(glossary, result).await?;
        info!(glossary = %glossary, term = %term_id, "term updated");
        Ok(())
    }

    /// Remove the unit `term_id`. Unknown ids are ignored.
    pub async fn delete_term(&self, glossary: &str, term_id: &str) -> Result<(), LexiError> {
        require_term_id(term_id)?;
        let engine = self.open(glossary).await?;
        let result = async {
            engine.remove_tu(term_id).await?;
            engine.commit().await
        }
        .await;
        self.release_after(glossary, result).await?;
        info!(glossary = %glossary, term = %term_id, "term deleted");
        Ok(())
    }

    /// Fuzzy lookup of `query` among the `src_lang` side of `glossary`.
    pub async fn search_terms(
        &self,
        glossary: &str,
        query: &str,
        src_lang: &str,
        min_similarity: u8,
        case_sensitive: bool,
    ) -> Result<Vec<Tu>, LexiError> {
        let engine = self.open(glossary).await?;
        let result = engine.search_all(query, src_lang, min_similarity, case_sensitive).await;
        let hits = self.release_after(glossary, result).await?;
        debug!(glossary = %glossary, hits = hits.len(), "term search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_need_two_languages_and_texts() {
        assert!(Term::new("en", "fr", "cat", "chat").validate().is_ok());
        assert!(Term::new("en", "fr", " ", "chat").validate().is_err());
        assert!(Term::new("en", "", "cat", "chat").validate().is_err());
        assert!(Term::new("en", "en", "cat", "cat").validate().is_err());
    }

    #[test]
    fn term_unit_carries_both_sides() {
        let tu = Term::new("en", "fr", "cat", "chat").to_unit("t1".into());
        assert_eq!(tu.id.as_deref(), Some("t1"));
        assert_eq!(tu.text("en"), Some("cat"));
        assert_eq!(tu.text("fr"), Some("chat"));
    }
}
