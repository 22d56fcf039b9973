//! Session tickets for remote memory servers.

use async_trait::async_trait;
use tracing::debug;

use super::protocol::{check_reply, get_str, AUTHORIZE_PATH};
use crate::error::LexiError;

/// Exchanges credentials for an opaque session ticket.
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    async fn issue(&self, server: &str, user: &str, password: &str) -> Result<String, LexiError>;
}

/// Asks the server's authorize endpoint with HTTP basic credentials.
pub struct HttpTicketIssuer {
    http: reqwest::Client,
}

impl HttpTicketIssuer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TicketIssuer for HttpTicketIssuer {
    async fn issue(&self, server: &str, user: &str, password: &str) -> Result<String, LexiError> {
        let url = format!("{}{AUTHORIZE_PATH}", normalize_server(server));
        let resp = self
            .http
            .get(&url)
            .basic_auth(user, Some(password))
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LexiError::Protocol(format!("server rejected credentials for '{user}'")));
        }
        let reply = check_reply(&body)?;
        let ticket = get_str(&reply, "ticket")?.to_string();
        debug!(server = %url, user, "ticket issued");
        Ok(ticket)
    }
}

/// Trim whitespace and a trailing slash from a server URL.
pub fn normalize_server(server: &str) -> String {
    server.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_urls_are_normalized() {
        assert_eq!(normalize_server(" https://tm.example.com/ "), "https://tm.example.com");
        assert_eq!(normalize_server("https://tm.example.com"), "https://tm.example.com");
    }
}
