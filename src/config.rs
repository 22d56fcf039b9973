//! Runtime settings read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::LexiError;

pub const DEFAULT_HOME: &str = "./lexibase-data";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TASK_RETENTION_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    /// Work folder: memory index, one sub-folder per local memory, temp archives.
    pub home: PathBuf,
    pub http_timeout: Duration,
    /// How long finished task records stay pollable.
    pub task_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: PathBuf::from(DEFAULT_HOME),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            task_retention: Duration::from_secs(DEFAULT_TASK_RETENTION_SECS),
        }
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Self {
        let home = std::env::var("LEXIBASE_HOME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));
        Self {
            home,
            http_timeout: env_secs("LEXIBASE_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            task_retention: env_secs("LEXIBASE_TASK_RETENTION_SECS", DEFAULT_TASK_RETENTION_SECS),
        }
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into(), ..Self::default() }
    }

    /// Local memories live directly under the home folder.
    pub fn memories_dir(&self) -> PathBuf {
        self.home.clone()
    }

    /// Scratch space for upload archives.
    pub fn work_dir(&self) -> PathBuf {
        self.home.join(".work")
    }

    pub fn http_client(&self) -> Result<reqwest::Client, LexiError> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| LexiError::Internal(format!("http client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_derived_paths() {
        let cfg = Config::with_home("/srv/tm");
        assert_eq!(cfg.memories_dir(), PathBuf::from("/srv/tm"));
        assert_eq!(cfg.work_dir(), PathBuf::from("/srv/tm/.work"));
        assert_eq!(cfg.http_timeout, Duration::from_secs(120));
        assert_eq!(cfg.task_retention, Duration::from_secs(3600));
    }
}
