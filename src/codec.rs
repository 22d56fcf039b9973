//! Bilingual document codec.
//!
//! The document grammar is owned by whoever supplies a [`DocumentCodec`];
//! engines only need units in and units out. [`JsonCodec`] is the bundled
//! implementation: a document is `{"version": 1, "units": [...]}`.

use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LexiError;
use crate::model::{Tu, Tuv};

pub trait DocumentCodec: Send + Sync {
    /// Parse a whole document into units.
    fn read_document(&self, path: &Path) -> Result<Vec<Tu>, LexiError>;

    /// Write units as a document, replacing `path`.
    fn write_document(&self, path: &Path, units: &[Tu]) -> Result<(), LexiError>;

    /// Single unit as carried on the remote command channel.
    fn encode_unit(&self, tu: &Tu) -> Result<String, LexiError>;
    fn decode_unit(&self, raw: &str) -> Result<Tu, LexiError>;

    fn encode_variant(&self, tuv: &Tuv) -> Result<String, LexiError>;
    fn decode_variant(&self, raw: &str) -> Result<Tuv, LexiError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DocumentOut<'a> {
    version: u32,
    units: &'a [Tu],
}

#[derive(Deserialize)]
struct DocumentIn {
    #[serde(default)]
    version: u32,
    units: Vec<Tu>,
}

fn malformed(path: &Path, e: serde_json::Error) -> LexiError {
    LexiError::Validation(format!("malformed document {}: {e}", path.display()))
}

impl DocumentCodec for JsonCodec {
    fn read_document(&self, path: &Path) -> Result<Vec<Tu>, LexiError> {
        let file = std::fs::File::open(path)?;
        let doc: DocumentIn =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| malformed(path, e))?;
        if doc.version > DOCUMENT_VERSION {
            return Err(LexiError::Validation(format!(
                "unsupported document version {} in {}",
                doc.version,
                path.display()
            )));
        }
        Ok(doc.units)
    }

    fn write_document(&self, path: &Path, units: &[Tu]) -> Result<(), LexiError> {
        let file = std::fs::File::create(path)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, &DocumentOut { version: DOCUMENT_VERSION, units })
            .map_err(|e| LexiError::Internal(format!("encode document: {e}")))?;
        out.flush()?;
        Ok(())
    }

    fn encode_unit(&self, tu: &Tu) -> Result<String, LexiError> {
        serde_json::to_string(tu).map_err(|e| LexiError::Internal(format!("encode unit: {e}")))
    }

    fn decode_unit(&self, raw: &str) -> Result<Tu, LexiError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn encode_variant(&self, tuv: &Tuv) -> Result<String, LexiError> {
        serde_json::to_string(tuv).map_err(|e| LexiError::Internal(format!("encode variant: {e}")))
    }

    fn decode_variant(&self, raw: &str) -> Result<Tuv, LexiError> {
        Ok(serde_json::from_str(raw)?)
    }
}
