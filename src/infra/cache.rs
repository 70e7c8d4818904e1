#![allow(dead_code)]

//! Persistent read-through caching for idempotent carrier lookups, with TTL
//! and hit/miss accounting.
//!
//! Each CLI invocation is a short-lived process, so entries (and counters)
//! live in a JSON file under the platform data directory. Only read paths go
//! through here; mutating workflow operations always hit the carrier and the
//! store directly.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::{format_age, unix_now};

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "RateKeeper";
const APP_NAME: &str = "RateKeeper";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Cached,
    Stale,
}

/// A value returned through the cache, tagged with where it came from.
#[derive(Clone, Debug)]
pub struct CachedPayload<T> {
    pub data: T,
    pub fetched_at: SystemTime,
    pub status: CacheStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix timestamp (seconds) when the value was fetched.
    stored_at: u64,
    ttl_secs: u64,
    value: serde_json::Value,
}

impl CacheEntry {
    fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.stored_at)
    }

    fn is_expired(&self) -> bool {
        self.age_secs() > self.ttl_secs
    }

    fn fetched_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.stored_at)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
    #[serde(default)]
    hits: u64,
    #[serde(default)]
    misses: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Age of the oldest live entry, humanized, when any exist.
    pub oldest_entry_age: Option<String>,
}

/// Read-through cache with per-entry TTL, keyed by a deterministic
/// fingerprint of operation name + parameters.
pub struct ResultCache {
    path: PathBuf,
    namespace: String,
    default_ttl: Duration,
    enabled: bool,
}

impl ResultCache {
    /// Cache file in the platform data directory, named after the namespace.
    pub fn open_default(namespace: &str, default_ttl: Duration) -> Option<Self> {
        let base = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())?;
        let _ = fs::create_dir_all(&base);
        Some(Self::with_path(
            base.join(format!("{namespace}_cache.json")),
            namespace,
            default_ttl,
        ))
    }

    /// Cache file at an explicit path. Used by tests for isolation.
    pub fn with_path(path: PathBuf, namespace: &str, default_ttl: Duration) -> Self {
        Self {
            path,
            namespace: namespace.to_string(),
            default_ttl,
            enabled: true,
        }
    }

    /// Force every lookup to bypass the cache (the `--no-cache` switch).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Return the cached value when present, unexpired, and not bypassed;
    /// otherwise run `fetch`, store the result under `ttl` (default TTL when
    /// `None`), and return it. On a failed fetch an expired entry is served
    /// as a stale fallback; with no entry at all the fetch error propagates.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        operation: &str,
        params: &[&str],
        ttl: Option<Duration>,
        bypass: bool,
        fetch: F,
    ) -> Result<CachedPayload<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.fingerprint(operation, params);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let use_cache = self.enabled && !bypass;

        let mut file = self.load_file();

        if use_cache {
            if let Some(entry) = file.entries.get(&key) {
                if !entry.is_expired() {
                    if let Ok(data) = serde_json::from_value::<T>(entry.value.clone()) {
                        let payload = CachedPayload {
                            data,
                            fetched_at: entry.fetched_at(),
                            status: CacheStatus::Cached,
                        };
                        file.hits += 1;
                        self.save_file(&file);
                        return Ok(payload);
                    }
                    // Entry no longer deserializes (schema drift): treat as a miss.
                }
            }
        }

        match fetch().await {
            Ok(data) => {
                let fetched_at = SystemTime::now();
                if let Ok(value) = serde_json::to_value(&data) {
                    file.entries.insert(
                        key,
                        CacheEntry {
                            stored_at: unix_now(),
                            ttl_secs: ttl.as_secs(),
                            value,
                        },
                    );
                }
                file.misses += 1;
                self.save_file(&file);
                Ok(CachedPayload {
                    data,
                    fetched_at,
                    status: CacheStatus::Fresh,
                })
            }
            Err(error) => {
                if use_cache {
                    if let Some(entry) = file.entries.get(&key) {
                        if let Ok(data) = serde_json::from_value::<T>(entry.value.clone()) {
                            println!(
                                "[cache] Fetch failed; serving stale {} entry (age: {})",
                                operation,
                                format_age(entry.age_secs())
                            );
                            file.misses += 1;
                            let payload = CachedPayload {
                                data,
                                fetched_at: entry.fetched_at(),
                                status: CacheStatus::Stale,
                            };
                            self.save_file(&file);
                            return Ok(payload);
                        }
                    }
                }
                Err(error)
            }
        }
    }

    /// Drop every entry and reset the counters. Returns how many entries
    /// were removed.
    pub fn clear(&self) -> usize {
        let file = self.load_file();
        let removed = file.entries.len();
        self.save_file(&CacheFile::default());
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let file = self.load_file();
        let oldest_entry_age = file
            .entries
            .values()
            .map(CacheEntry::age_secs)
            .max()
            .map(format_age);
        CacheStats {
            entries: file.entries.len(),
            hits: file.hits,
            misses: file.misses,
            oldest_entry_age,
        }
    }

    fn fingerprint(&self, operation: &str, params: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(b"|");
        hasher.update(operation.as_bytes());
        for param in params {
            hasher.update(b"|");
            hasher.update(param.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn load_file(&self) -> CacheFile {
        if !self.path.exists() {
            return CacheFile::default();
        }
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(file) => file,
                Err(e) => {
                    println!("[cache] Failed to parse {}: {e}", self.path.display());
                    CacheFile::default()
                }
            },
            Err(e) => {
                println!("[cache] Failed to read {}: {e}", self.path.display());
                CacheFile::default()
            }
        }
    }

    fn save_file(&self, file: &CacheFile) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string(file) {
            Ok(content) => {
                if let Err(e) = fs::write(&self.path, content) {
                    println!("[cache] Failed to write {}: {e}", self.path.display());
                }
            }
            Err(e) => println!("[cache] Failed to encode cache: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_cache(dir: &tempfile::TempDir, ttl: Duration) -> ResultCache {
        ResultCache::with_path(dir.path().join("test_cache.json"), "test", ttl)
    }

    async fn fetch_counting(
        cache: &ResultCache,
        calls: &AtomicUsize,
        bypass: bool,
    ) -> CachedPayload<String> {
        cache
            .get_or_fetch::<String, String, _, _>("detail", &["shp_1"], None, bypass, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("payload".to_string())
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        let first = fetch_counting(&cache, &calls, false).await;
        let second = fetch_counting(&cache, &calls, false).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.status, CacheStatus::Fresh);
        assert_eq!(second.status, CacheStatus::Cached);
        assert_eq!(second.data, "payload");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_fetches_again() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(0));
        let calls = AtomicUsize::new(0);

        fetch_counting(&cache, &calls, false).await;
        // TTL of zero expires immediately (entry age must exceed ttl).
        std::thread::sleep(Duration::from_millis(1100));
        let second = fetch_counting(&cache, &calls, false).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.status, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn bypass_skips_cached_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        fetch_counting(&cache, &calls, false).await;
        let second = fetch_counting(&cache, &calls, true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.status, CacheStatus::Fresh);
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = test_cache(&dir, Duration::from_secs(300));
        cache.set_enabled(false);
        let calls = AtomicUsize::new(0);

        fetch_counting(&cache, &calls, false).await;
        fetch_counting(&cache, &calls, false).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_entry_served_when_fetch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(0));
        let calls = AtomicUsize::new(0);

        fetch_counting(&cache, &calls, false).await;
        std::thread::sleep(Duration::from_millis(1100));

        let fallback = cache
            .get_or_fetch::<String, String, _, _>("detail", &["shp_1"], None, false, || async {
                Err("carrier unreachable".to_string())
            })
            .await
            .unwrap();

        assert_eq!(fallback.status, CacheStatus::Stale);
        assert_eq!(fallback.data, "payload");
    }

    #[tokio::test]
    async fn fetch_error_with_no_entry_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(300));

        let result = cache
            .get_or_fetch::<String, String, _, _>("detail", &["shp_2"], None, false, || async {
                Err("carrier unreachable".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "carrier unreachable");
    }

    #[tokio::test]
    async fn clear_reports_removed_count_and_resets_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(300));
        let calls = AtomicUsize::new(0);

        fetch_counting(&cache, &calls, false).await;
        cache
            .get_or_fetch::<String, String, _, _>("detail", &["shp_other"], None, false, || async {
                Ok("other".to_string())
            })
            .await
            .unwrap();

        assert_eq!(cache.clear(), 2);
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn distinct_params_get_distinct_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(&dir, Duration::from_secs(300));

        for id in ["shp_a", "shp_b"] {
            cache
                .get_or_fetch::<String, String, _, _>("detail", &[id], None, false, || async {
                    Ok(id.to_string())
                })
                .await
                .unwrap();
        }

        assert_eq!(cache.stats().entries, 2);
    }
}
