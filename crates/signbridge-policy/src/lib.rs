//! Origin gate for inbound signing requests.
//!
//! An origin is admitted only when it appears verbatim in the allowlist.
//! There is no wildcard or suffix matching: `https://app.example.com` does not
//! admit `https://app.example.com:8443` or `https://sub.app.example.com`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

#[derive(Debug, thiserror::Error)]
pub enum AllowlistError {
    #[error("failed to read allowlist {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write allowlist {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("allowlist {path:?} is not a JSON array of strings: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("origin must be a non-empty string")]
    EmptyOrigin,
}

#[async_trait]
pub trait OriginPolicy: Send + Sync {
    async fn is_allowed(&self, origin: &str) -> bool;
}

/// In-memory allowlist fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticOriginAllowlist {
    origins: IndexSet<String>,
}

impl StaticOriginAllowlist {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, origin: &str) -> bool {
        !origin.is_empty() && self.origins.contains(origin)
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.origins.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

#[async_trait]
impl OriginPolicy for StaticOriginAllowlist {
    async fn is_allowed(&self, origin: &str) -> bool {
        self.contains(origin)
    }
}

/// Allowlist persisted as a JSON array of origin strings.
///
/// The file is re-read on every check so edits take effect without a restart.
/// A missing file is an empty allowlist. An unreadable or malformed file
/// denies everything and logs a warning.
#[derive(Debug, Clone)]
pub struct FileOriginAllowlist {
    path: PathBuf,
    write_lock: Arc<RwLock<()>>,
}

impl FileOriginAllowlist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<StaticOriginAllowlist, AllowlistError> {
        let _guard = self.write_lock.read().await;
        self.read_unlocked().await
    }

    /// Adds `origin`; returns `false` if it was already present.
    pub async fn add(&self, origin: &str) -> Result<bool, AllowlistError> {
        if origin.is_empty() {
            return Err(AllowlistError::EmptyOrigin);
        }
        let _guard = self.write_lock.write().await;
        let mut origins = self.read_unlocked().await?.origins;
        let inserted = origins.insert(origin.to_owned());
        if inserted {
            self.write_unlocked(&origins).await?;
        }
        Ok(inserted)
    }

    /// Removes `origin`; returns `false` if it was not present.
    pub async fn remove(&self, origin: &str) -> Result<bool, AllowlistError> {
        let _guard = self.write_lock.write().await;
        let mut origins = self.read_unlocked().await?.origins;
        let removed = origins.shift_remove(origin);
        if removed {
            self.write_unlocked(&origins).await?;
        }
        Ok(removed)
    }

    async fn read_unlocked(&self) -> Result<StaticOriginAllowlist, AllowlistError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(StaticOriginAllowlist::default());
            }
            Err(source) => {
                return Err(AllowlistError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let origins: Vec<String> =
            serde_json::from_slice(&bytes).map_err(|source| AllowlistError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(StaticOriginAllowlist::new(origins))
    }

    async fn write_unlocked(&self, origins: &IndexSet<String>) -> Result<(), AllowlistError> {
        let write_error = |source: io::Error| AllowlistError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let list: Vec<&String> = origins.iter().collect();
        let mut body = serde_json::to_vec_pretty(&list).map_err(|source| AllowlistError::Parse {
            path: self.path.clone(),
            source,
        })?;
        body.push(b'\n');
        fs::write(&self.path, body).await.map_err(write_error)
    }
}

#[async_trait]
impl OriginPolicy for FileOriginAllowlist {
    #[instrument(skip(self), fields(path = ?self.path))]
    async fn is_allowed(&self, origin: &str) -> bool {
        match self.load().await {
            Ok(allowlist) => {
                let allowed = allowlist.contains(origin);
                debug!(allowed, entries = allowlist.len(), "origin checked");
                allowed
            }
            Err(error) => {
                warn!(%error, "allowlist unavailable; denying origin");
                false
            }
        }
    }
}
