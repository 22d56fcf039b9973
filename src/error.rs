use axum::http::StatusCode;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum LexiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    Protocol(String),

    #[error("storage error: {0}")]
    Backend(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    /// Work stopped on request before it changed anything.
    #[error("cancelled")]
    Cancelled,
}

/// Coarse classification of a [`LexiError`], exposed next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transport,
    Backend,
    Protocol,
    Internal,
    Cancelled,
}

impl LexiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Backend(_) | Self::Database(_) | Self::Io(_) => ErrorKind::Backend,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transport | ErrorKind::Protocol => StatusCode::BAD_GATEWAY,
            ErrorKind::Backend | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<reqwest::Error> for LexiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Protocol(format!("malformed response: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for LexiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed document: {e}"))
    }
}

impl From<zip::result::ZipError> for LexiError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Backend(format!("archive: {e}"))
    }
}

impl axum::response::IntoResponse for LexiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string(), "kind": self.kind() }));
        (status, body).into_response()
    }
}
