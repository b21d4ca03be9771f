use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::github::error::FetchError;

/// Get the platform-appropriate cache directory for pr-metrics
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("pr-metrics/fetch-cache"))
        .unwrap_or_else(|| {
            PathBuf::from(format!(
                "{}/.cache/pr-metrics/fetch-cache",
                std::env::var("HOME").unwrap_or_default()
            ))
        })
}

/// Fingerprint of one paginated list fetch: query identity plus cursor.
/// Two fetches with the same fingerprint request the same content. The
/// listing's filter parameters are fixed, so the repository and cursor
/// identify a page fully.
pub fn page_fingerprint(owner: &str, repo: &str, cursor: Option<&str>) -> String {
    format!(
        "page:{}/{}?cursor={}",
        owner,
        repo,
        cursor.unwrap_or("first")
    )
}

/// Fingerprint of the per-PR detail-and-reviews fetch.
pub fn detail_fingerprint(owner: &str, repo: &str, number: u64) -> String {
    format!("pr:{}/{}#{}", owner, repo, number)
}

/// One cached unit: the raw payload plus whether it may be served on a later
/// run. An incomplete entry (the final, possibly-still-growing page of a
/// fetch, or an open PR's detail) must be refetched and replaced next time.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub complete: bool,
    pub body: serde_json::Value,
    pub next_cursor: Option<String>,
}

/// Durable fingerprint -> payload store backed by cacache.
///
/// Writes land immediately after each successful page fetch, so a crash
/// mid-fetch loses at most the in-flight page. Entries are overwritten in
/// place when refetched; cacache keeps the newest write for a key.
#[derive(Clone, Debug)]
pub struct PageCache {
    path: PathBuf,
    enabled: bool, // false when --no-cache
}

impl PageCache {
    pub fn new(path: PathBuf, enabled: bool) -> Self {
        Self { path, enabled }
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, FetchError> {
        if !self.enabled {
            return Ok(None);
        }
        let bytes = match cacache::read_sync(&self.path, fingerprint) {
            Ok(bytes) => bytes,
            Err(cacache::Error::EntryNotFound(_, _)) => return Ok(None),
            Err(e) => return Err(FetchError::CacheUnavailable(e.to_string())),
        };
        // An undecodable entry (written by an older version) is a miss; the
        // page is refetched and the entry replaced.
        Ok(serde_json::from_slice(&bytes).ok())
    }

    pub fn put(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), FetchError> {
        if !self.enabled {
            return Ok(());
        }
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| FetchError::CacheUnavailable(e.to_string()))?;
        cacache::write_sync(&self.path, fingerprint, &bytes)
            .map_err(|e| FetchError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }
}
