//! Command, upload and download legs of the remote memory protocol.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::auth::normalize_server;
use super::protocol::{check_reply, get_str, COMMAND_PATH, DOWNLOAD_PATH, SESSION_HEADER, UPLOAD_PATH};
use crate::error::LexiError;

/// One authenticated session against one memory on a remote server.
pub struct ReplicationClient {
    server: String,
    memory: String,
    ticket: String,
    http: reqwest::Client,
    work_dir: PathBuf,
}

impl ReplicationClient {
    pub fn new(
        server: &str,
        memory: impl Into<String>,
        ticket: impl Into<String>,
        http: reqwest::Client,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server: normalize_server(server),
            memory: memory.into(),
            ticket: ticket.into(),
            http,
            work_dir: work_dir.into(),
        }
    }

    pub fn memory(&self) -> &str {
        &self.memory
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send `command` for this memory with extra `params`; returns the reply payload.
    pub async fn command(
        &self,
        command: &str,
        mut params: Map<String, Value>,
    ) -> Result<Map<String, Value>, LexiError> {
        params.insert("command".into(), Value::from(command));
        params.insert("memory".into(), Value::from(self.memory.as_str()));
        let body = serde_json::to_vec(&Value::Object(params))
            .map_err(|e| LexiError::Internal(format!("encode command: {e}")))?;
        let resp = self
            .http
            .post(format!("{}{COMMAND_PATH}", self.server))
            .header(SESSION_HEADER, &self.ticket)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(memory = %self.memory, command, http = status.as_u16(), "remote command");
        check_reply(&text).map_err(|e| match e {
            LexiError::Protocol(reason) if !status.is_success() => {
                LexiError::Protocol(format!("{reason} (HTTP {status})"))
            }
            other => other,
        })
    }

    /// Zip `file`, upload it and return the server's file token.
    ///
    /// The temporary archive is removed as soon as the request finishes.
    pub async fn upload(&self, file: &Path) -> Result<String, LexiError> {
        let src = file.to_path_buf();
        let work_dir = self.work_dir.clone();
        let archive = tokio::task::spawn_blocking(move || zip_single(&src, &work_dir))
            .await
            .map_err(|e| LexiError::Internal(e.to_string()))??;
        let bytes = match tokio::fs::read(&archive).await {
            Ok(b) => b,
            Err(e) => {
                remove_quietly(&archive).await;
                return Err(e.into());
            }
        };
        let size = bytes.len();
        let sent = self
            .http
            .post(format!("{}{UPLOAD_PATH}", self.server))
            .header(SESSION_HEADER, &self.ticket)
            .header("Accept", "application/json")
            .header("Content-Type", "application/zip")
            .body(bytes)
            .send()
            .await;
        remove_quietly(&archive).await;
        let text = sent?.text().await?;
        let reply = check_reply(&text)?;
        let token = get_str(&reply, "file")?.to_string();
        debug!(memory = %self.memory, bytes = size, "archive uploaded");
        Ok(token)
    }

    /// Fetch the file behind `token` into `dest`.
    ///
    /// The body streams into a temporary file next to `dest`, which is only
    /// renamed into place once the whole body arrived.
    pub async fn download(
        &self,
        token: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), LexiError> {
        let url = format!(
            "{}{DOWNLOAD_PATH}?session={}&file={}",
            self.server,
            urlencoding::encode(&self.ticket),
            urlencoding::encode(token)
        );
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(LexiError::Transport(format!("download failed: HTTP {}", resp.status())));
        }
        let part = partial_path(dest)?;
        let received = match stream_to(resp, &part, cancel).await {
            Ok(n) => n,
            Err(e) => {
                remove_quietly(&part).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&part, dest).await {
            remove_quietly(&part).await;
            return Err(e.into());
        }
        debug!(memory = %self.memory, bytes = received, dest = %dest.display(), "file downloaded");
        Ok(())
    }
}

/// Hidden sibling of `dest` that receives a download in progress.
fn partial_path(dest: &Path) -> Result<PathBuf, LexiError> {
    let name = dest
        .file_name()
        .ok_or_else(|| LexiError::Validation(format!("not a file path: {}", dest.display())))?;
    let part = format!(".{}.{}.part", name.to_string_lossy(), uuid::Uuid::new_v4().simple());
    Ok(dest.with_file_name(part))
}

async fn stream_to(
    resp: reqwest::Response,
    part: &Path,
    cancel: &CancellationToken,
) -> Result<usize, LexiError> {
    let mut out = tokio::fs::File::create(part).await?;
    let mut stream = resp.bytes_stream();
    let mut total = 0usize;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(LexiError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        total += chunk.len();
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(total)
}

/// Package `src` as the only entry of a new zip file in `work_dir`.
fn zip_single(src: &Path, work_dir: &Path) -> Result<PathBuf, LexiError> {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| LexiError::Validation(format!("not a file: {}", src.display())))?;
    let mut input = std::fs::File::open(src)?;
    std::fs::create_dir_all(work_dir)?;
    let archive = work_dir.join(format!("upload-{}.zip", uuid::Uuid::new_v4()));
    let result = (|| -> Result<(), LexiError> {
        let out = std::fs::File::create(&archive)?;
        let mut zip = zip::ZipWriter::new(out);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        zip.start_file(name, options)?;
        std::io::copy(&mut input, &mut zip)?;
        zip.finish()?.flush()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&archive);
        return Err(e);
    }
    Ok(archive)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "could not remove temporary file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn zip_holds_one_named_entry() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("terms.json");
        std::fs::write(&src, b"{\"units\":[]}").unwrap();
        let archive = zip_single(&src, &dir.path().join("work")).unwrap();

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        let mut entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), "terms.json");
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "{\"units\":[]}");
    }

    #[test]
    fn missing_source_leaves_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        assert!(zip_single(&dir.path().join("nope.json"), &work).is_err());
        assert!(!work.exists() || std::fs::read_dir(&work).unwrap().next().is_none());
    }
}
