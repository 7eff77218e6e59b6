use crate::atomic::remove_file_best_effort;
use crate::cache::Cache;
use crate::error::CacheError;
use crate::fetch::{DefaultFetcher, Fetcher};
use crate::fingerprint::FileLocation;
use crate::lock::CacheLock;
use crate::meta::{now_seconds, FileMeta};
use std::path::PathBuf;
use std::time::Duration;

/// The file-store half of [`Cache`]: keyed storage for opaque binary files
/// fetched from a local path or a remote URL. Shares the value store's
/// keying, locking, and atomic-publish machinery under a distinct domain tag
/// so the same key never collides between the two stores.
impl Cache {
    fn file_location(&self, key: &[u8]) -> FileLocation {
        let files_root = self.config().files_root();
        FileLocation::for_key(
            &files_root,
            &self.config().salt,
            self.config().shard_depth,
            key,
        )
    }

    /// Looks up the cached file for `key`. Returns `None` on miss: absent
    /// entry, expired entry, or a content file that has gone missing out
    /// from under the meta (all purged as a side effect).
    pub fn get_file_path(&self, key: &[u8]) -> Option<PathBuf> {
        let loc = self.file_location(key);
        let meta = match FileMeta::load(&loc.meta) {
            Some(meta) => meta,
            None => {
                if loc.meta.exists() {
                    remove_file_best_effort(&loc.meta);
                }
                return None;
            }
        };

        if meta.is_expired(now_seconds()) {
            remove_file_best_effort(&loc.meta);
            remove_file_best_effort(&meta.p);
            return None;
        }

        if !meta.p.exists() {
            tracing::debug!(
                target = "filecache",
                path = %meta.p.display(),
                "cached file content missing; purging meta"
            );
            remove_file_best_effort(&loc.meta);
            return None;
        }

        Some(meta.p)
    }

    /// Stampede-safe fetch-and-cache: at most one caller per host fetches
    /// `source` for a given key at a time. Uses the cache's configured
    /// connect/read timeouts and user agent for URL sources, dispatching to
    /// a local-path copy when `source` names an existing file.
    pub fn remember_file(
        &self,
        key: &[u8],
        ttl: impl Into<Option<Duration>>,
        source: &str,
        ext: &str,
    ) -> Result<PathBuf, CacheError> {
        let fetcher = DefaultFetcher::new(
            self.config().connect_timeout,
            self.config().read_timeout,
            self.config().user_agent.clone(),
        );
        self.remember_file_with(key, ttl, source, ext, &fetcher)
    }

    /// Like [`Cache::remember_file`], but with an explicit [`Fetcher`] so
    /// callers (and tests) can substitute a deterministic source instead of
    /// performing real local or network I/O.
    pub fn remember_file_with(
        &self,
        key: &[u8],
        ttl: impl Into<Option<Duration>>,
        source: &str,
        ext: &str,
        fetcher: &dyn Fetcher,
    ) -> Result<PathBuf, CacheError> {
        let ttl = ttl.into().unwrap_or(self.config().default_ttl);
        if let Some(path) = self.get_file_path(key) {
            return Ok(path);
        }

        let loc = self.file_location(key);
        let guard = match CacheLock::lock_exclusive(&loc.lock) {
            Ok(guard) => Some(guard),
            Err(err) => {
                tracing::warn!(
                    target = "filecache",
                    path = %loc.lock.display(),
                    error = %err,
                    "lock acquisition failed; falling back to unlocked fetch-and-set"
                );
                None
            }
        };

        if guard.is_some() {
            if let Some(path) = self.get_file_path(key) {
                return Ok(path);
            }
        }

        let content_path = loc.content_path(ext);
        fetcher.fetch(source, &content_path)?;

        let expires_at = if ttl.is_zero() {
            0
        } else {
            now_seconds().saturating_add(ttl.as_secs())
        };
        let meta = FileMeta {
            e: expires_at,
            p: content_path.clone(),
        };
        meta.save(&loc.meta)?;

        drop(guard);
        Ok(content_path)
    }
}
