pub mod http_store;
pub mod http_util;
pub mod local_store;

use std::path::Path;

use deltaship_types::content_hash::ContentHash;
use deltaship_types::error::{DeltashipError, Result};
use serde::{Deserialize, Serialize};

pub use http_store::HttpStore;
pub use local_store::LocalStore;

/// One file in an atomic multi-file commit.
#[derive(Debug, Clone)]
pub struct CommitFile {
    pub path: String,
    pub data: Vec<u8>,
}

/// A remote key paired with its local file, for whole-set transfers.
#[derive(Debug, Clone, Copy)]
pub struct BulkItem<'a> {
    pub remote: &'a str,
    pub local: &'a Path,
}

/// Byte transport to a remote origin.
///
/// Implementations move whole objects only. Retry, backoff and rate-limit
/// handling belong to the caller; a store reports every failure once, with a
/// message that keeps the remote's own wording (status, `Retry-After`, body).
pub trait RemoteStore: Send + Sync {
    /// Short label used in logs ("local", "http").
    fn label(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Whether `key` already holds exactly this content. Stores that can
    /// inspect objects in place should override the default download.
    fn holds(&self, key: &str, size: u64, hash: &str) -> Result<bool> {
        Ok(match self.get(key)? {
            Some(data) => data.len() as u64 == size && ContentHash::of_bytes(&data).matches(hash),
            None => false,
        })
    }

    /// Write several files as one operation. Stores without native multi-file
    /// commits fall back to sequential puts.
    fn commit(&self, files: &[CommitFile], message: &str) -> Result<()> {
        tracing::debug!("{} commit '{message}' ({} files)", self.label(), files.len());
        for file in files {
            self.put(&file.path, &file.data)?;
        }
        Ok(())
    }

    /// Push a whole job set in one call, with the store's own parallelism and
    /// resume rules.
    fn push_all(&self, _items: &[BulkItem<'_>]) -> Result<()> {
        Err(DeltashipError::BulkUnsupported)
    }

    /// Fetch a whole job set in one call.
    fn pull_all(&self, _items: &[BulkItem<'_>]) -> Result<()> {
        Err(DeltashipError::BulkUnsupported)
    }
}

/// Connection settings for a remote store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Bare path, `file://` URL, or `http(s)://` base URL.
    pub url: String,
    /// Bearer token for HTTP stores.
    #[serde(default)]
    pub token: Option<String>,
    /// Allow plaintext HTTP (unsafe; defaults to false).
    #[serde(default)]
    pub allow_insecure_http: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUrl {
    Local { path: String },
    Http { url: String },
}

/// Classify a store URL by scheme.
pub fn parse_store_url(raw: &str) -> Result<ParsedUrl> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DeltashipError::Config("store url must not be empty".into()));
    }
    if let Some(path) = raw.strip_prefix("file://") {
        return Ok(ParsedUrl::Local {
            path: path.to_string(),
        });
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(ParsedUrl::Http {
            url: raw.to_string(),
        });
    }
    if let Some((scheme, _)) = raw.split_once("://") {
        return Err(DeltashipError::Config(format!(
            "unsupported store scheme '{scheme}://'"
        )));
    }
    Ok(ParsedUrl::Local {
        path: raw.to_string(),
    })
}

/// Build a store from its configuration.
pub fn store_from_config(cfg: &StoreConfig) -> Result<Box<dyn RemoteStore>> {
    match parse_store_url(&cfg.url)? {
        ParsedUrl::Local { path } => Ok(Box::new(LocalStore::new(&path)?)),
        ParsedUrl::Http { url } => {
            if url.starts_with("http://") && !cfg.allow_insecure_http {
                return Err(DeltashipError::Config(format!(
                    "refusing plaintext HTTP store '{url}' (set allow_insecure_http to override)"
                )));
            }
            Ok(Box::new(HttpStore::new(&url, cfg.token.as_deref())))
        }
    }
}
