use crate::atomic::{atomic_write, remove_file_best_effort};
use crate::codec::{compress_if_worthwhile, decompress, deserialize_value, serialize_value};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::fingerprint::ValueLocation;
use crate::gc::{self, Stats};
use crate::lock::CacheLock;
use crate::meta::{now_seconds, ValueMeta};
use crate::value::Value;
use base64::Engine as _;
use rand::Rng;
use std::time::Duration;
use walkdir::WalkDir;

/// A single-node, filesystem-backed cache for serialized values and fetched
/// files. Constructed once from a [`CacheConfig`] and shared by every caller
/// that needs access (see the file-store operations in the sibling module
/// for `get_file_path`/`remember_file`).
#[derive(Clone, Debug)]
pub struct Cache {
    config: CacheConfig,
}

impl Cache {
    /// Validates that `config.root()` exists and is writable (creating it if
    /// absent), the single fallible, fatal step in this crate's API.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        std::fs::create_dir_all(config.root()).map_err(|err| CacheError::Configuration {
            path: config.root().to_path_buf(),
            message: err.to_string(),
        })?;
        ensure_writable(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn location(&self, key: &[u8]) -> ValueLocation {
        ValueLocation::for_key(
            self.config.root(),
            &self.config.salt,
            self.config.shard_depth,
            key,
        )
    }

    /// Looks up `key`. Returns `None` on any cache miss: absent entry,
    /// expired entry, or unrecoverable corruption (all of which are purged
    /// as a side effect; see module docs for the exact taxonomy).
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        let loc = self.location(key);
        let meta = match ValueMeta::load(&loc.meta) {
            Some(meta) => meta,
            None => {
                if loc.meta.exists() {
                    tracing::debug!(
                        target = "filecache",
                        path = %loc.meta.display(),
                        "purging unparseable meta file"
                    );
                    self.purge_value(&loc);
                }
                return None;
            }
        };

        if meta.is_expired(now_seconds()) {
            tracing::debug!(target = "filecache", path = %loc.meta.display(), "entry expired");
            self.purge_value(&loc);
            return None;
        }

        let payload = if meta.i {
            match meta.v.as_deref() {
                Some(encoded) => match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::debug!(
                            target = "filecache",
                            path = %loc.meta.display(),
                            error = %err,
                            "failed to decode inline payload; purging"
                        );
                        self.purge_value(&loc);
                        return None;
                    }
                },
                None => {
                    self.purge_value(&loc);
                    return None;
                }
            }
        } else {
            match std::fs::read(&loc.bin) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(
                        target = "filecache",
                        path = %loc.bin.display(),
                        "external payload missing; purging meta"
                    );
                    remove_file_best_effort(&loc.meta);
                    return None;
                }
                Err(err) => {
                    tracing::debug!(
                        target = "filecache",
                        path = %loc.bin.display(),
                        error = %err,
                        "transient read error loading external payload"
                    );
                    return None;
                }
            }
        };

        let payload = if meta.c {
            match decompress(&payload) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::debug!(
                        target = "filecache",
                        path = %loc.meta.display(),
                        error = %err,
                        "failed to decompress payload; purging"
                    );
                    self.purge_value(&loc);
                    return None;
                }
            }
        } else {
            payload
        };

        match deserialize_value(&payload, &meta.s) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(
                    target = "filecache",
                    path = %loc.meta.display(),
                    error = %err,
                    "failed to deserialize payload; purging"
                );
                self.purge_value(&loc);
                None
            }
        }
    }

    /// Stores `value` under `key` with `ttl` (a zero `Duration` means never
    /// expires). Picks the serializer, attempts compression above
    /// `compress_threshold`, and decides inline vs. external storage based
    /// on `max_inline_bytes`.
    pub fn set(
        &self,
        key: &[u8],
        value: &Value,
        ttl: impl Into<Option<Duration>>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.into().unwrap_or(self.config.default_ttl);
        let loc = self.location(key);

        let (encoded, tag) = serialize_value(value, self.config.allow_classes)?;
        let (payload, compressed) = compress_if_worthwhile(&encoded, self.config.compress_threshold);

        let expires_at = if ttl.is_zero() {
            0
        } else {
            now_seconds().saturating_add(ttl.as_secs())
        };

        if payload.len() > self.config.max_inline_bytes {
            atomic_write(&loc.bin, &payload)?;
            let meta = ValueMeta {
                e: expires_at,
                i: false,
                c: compressed,
                s: tag.to_string(),
                v: None,
            };
            meta.save(&loc.meta)?;
        } else {
            let encoded_payload = base64::engine::general_purpose::STANDARD.encode(&payload);
            let meta = ValueMeta {
                e: expires_at,
                i: true,
                c: compressed,
                s: tag.to_string(),
                v: Some(encoded_payload),
            };
            meta.save(&loc.meta)?;
            remove_file_best_effort(&loc.bin);
        }

        if self.config.gc_probability > 0.0 {
            let roll: f64 = rand::thread_rng().gen_range(0.0..1.0);
            if roll < self.config.gc_probability {
                let deleted = self.gc(1000);
                tracing::debug!(target = "filecache", deleted, "opportunistic gc ran inside set");
            }
        }

        Ok(())
    }

    /// Best-effort removal of `key`'s meta, external payload, and lock file.
    /// Absence of any of the three is not an error.
    pub fn delete(&self, key: &[u8]) {
        let loc = self.location(key);
        self.purge_value(&loc);
        remove_file_best_effort(&loc.lock);
    }

    fn purge_value(&self, loc: &ValueLocation) {
        remove_file_best_effort(&loc.meta);
        remove_file_best_effort(&loc.bin);
    }

    /// Removes every file under the cache root and then the emptied
    /// directories. Tolerates concurrent additions racing the sweep: they
    /// may survive.
    pub fn clear(&self) -> Result<(), CacheError> {
        clear_dir(self.config.root())
    }

    /// Runs one bounded garbage-collection sweep over the whole cache root
    /// (value store and file store alike) and returns the number of entries
    /// deleted.
    pub fn gc(&self, limit: usize) -> usize {
        gc::sweep(self.config.root(), limit)
    }

    /// Non-mutating occupancy summary: number of entries and aggregate bytes
    /// on disk under the cache root.
    pub fn stats(&self) -> Stats {
        gc::stats(self.config.root())
    }

    /// Stampede-safe get-or-compute. At most one caller per host executes
    /// `compute` for a given key at a time; concurrent callers observe the
    /// value that caller just published. If the advisory lock can't be
    /// acquired, falls back to an unlocked compute-and-set: liveness is
    /// preserved, deduplication is not.
    pub fn remember(
        &self,
        key: &[u8],
        ttl: impl Into<Option<Duration>>,
        compute: impl FnOnce() -> Value,
    ) -> Result<Value, CacheError> {
        let ttl = ttl.into().unwrap_or(self.config.default_ttl);
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let loc = self.location(key);
        let guard = match CacheLock::lock_exclusive(&loc.lock) {
            Ok(guard) => Some(guard),
            Err(err) => {
                tracing::warn!(
                    target = "filecache",
                    path = %loc.lock.display(),
                    error = %err,
                    "lock acquisition failed; falling back to unlocked compute-and-set"
                );
                None
            }
        };

        if guard.is_some() {
            if let Some(value) = self.get(key) {
                return Ok(value);
            }
        }

        let value = compute();
        self.set(key, &value, ttl)?;
        drop(guard);
        Ok(value)
    }
}

fn ensure_writable(config: &CacheConfig) -> Result<(), CacheError> {
    let probe = config.root().join(format!(".write-check-{}", std::process::id()));
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            remove_file_best_effort(&probe);
            Ok(())
        }
        Err(err) => Err(CacheError::Configuration {
            path: config.root().to_path_buf(),
            message: format!("root is not writable: {err}"),
        }),
    }
}

fn clear_dir(root: &std::path::Path) -> Result<(), CacheError> {
    if !root.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(root)
        .follow_links(false)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path == root {
            continue;
        }
        if entry.file_type().is_dir() {
            let _ = std::fs::remove_dir(path);
        } else {
            remove_file_best_effort(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cache_in(dir: &std::path::Path) -> Cache {
        Cache::new(CacheConfig::new(dir)).unwrap()
    }

    #[test]
    fn trivial_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        cache
            .set(b"greet", &Value::from("hello"), Duration::from_secs(60))
            .unwrap();

        assert_eq!(cache.get(b"greet"), Some(Value::from("hello")));
    }

    #[test]
    fn miss_on_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        assert_eq!(cache.get(b"nope"), None);
    }

    #[test]
    fn expiry_purges_entry_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        cache
            .set(b"t", &Value::from("x"), Duration::from_secs(1))
            .unwrap();
        std::thread::sleep(Duration::from_secs(2));

        assert_eq!(cache.get(b"t"), None);
        let loc = cache.location(b"t");
        assert!(!loc.meta.exists());
    }

    #[test]
    fn large_value_is_stored_externally_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path()).with_max_inline_bytes(1024);
        let cache = Cache::new(config).unwrap();

        let payload = Value::Bytes(vec![7u8; 4096]);
        cache.set(b"big", &payload, Duration::from_secs(60)).unwrap();

        let loc = cache.location(b"big");
        assert!(loc.bin.exists());
        let meta = ValueMeta::load(&loc.meta).unwrap();
        assert!(!meta.i);

        assert_eq!(cache.get(b"big"), Some(payload));
    }

    #[test]
    fn double_store_transition_removes_stale_bin() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path()).with_max_inline_bytes(1024);
        let cache = Cache::new(config).unwrap();

        cache
            .set(b"k", &Value::Bytes(vec![1u8; 300 * 1024]), Duration::from_secs(60))
            .unwrap();
        let loc = cache.location(b"k");
        assert!(loc.bin.exists());

        cache
            .set(b"k", &Value::Bytes(vec![2u8; 10]), Duration::from_secs(60))
            .unwrap();

        assert!(!loc.bin.exists());
        let meta = ValueMeta::load(&loc.meta).unwrap();
        assert!(meta.i);
    }

    #[test]
    fn delete_removes_all_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set(b"k", &Value::from("v"), Duration::from_secs(60)).unwrap();

        cache.delete(b"k");

        let loc = cache.location(b"k");
        assert!(!loc.meta.exists());
        assert!(!loc.bin.exists());
        assert_eq!(cache.get(b"k"), None);
    }

    #[test]
    fn clear_removes_everything_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        for i in 0..10 {
            cache
                .set(format!("k{i}").as_bytes(), &Value::from("v"), Duration::from_secs(60))
                .unwrap();
        }

        cache.clear().unwrap();

        for i in 0..10 {
            assert_eq!(cache.get(format!("k{i}").as_bytes()), None);
        }
    }

    #[test]
    fn remember_computes_once_and_reuses_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        let calls = std::sync::atomic::AtomicUsize::new(0);

        let first = cache
            .remember(b"top", Duration::from_secs(60), || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Value::from("computed")
            })
            .unwrap();
        let second = cache
            .remember(b"top", Duration::from_secs(60), || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Value::from("computed")
            })
            .unwrap();

        assert_eq!(first, Value::from("computed"));
        assert_eq!(second, Value::from("computed"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn remember_is_stampede_safe_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(cache_in(dir.path()));
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = std::sync::Arc::clone(&cache);
                let calls = std::sync::Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .remember(b"stampede", Duration::from_secs(60), || {
                            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Value::Int(42)
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        for value in results {
            assert_eq!(value, Value::Int(42));
        }
    }

    #[test]
    fn gc_bound_deletes_exactly_limit_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        for i in 0..5 {
            cache
                .set(format!("exp{i}").as_bytes(), &Value::from("x"), Duration::from_secs(1))
                .unwrap();
        }
        for i in 0..5 {
            cache
                .set(format!("keep{i}").as_bytes(), &Value::from("x"), Duration::from_secs(3600))
                .unwrap();
        }
        std::thread::sleep(Duration::from_secs(2));

        let deleted = cache.gc(1000);
        assert_eq!(deleted, 5);

        for i in 0..5 {
            assert_eq!(cache.get(format!("keep{i}").as_bytes()), Some(Value::from("x")));
        }
    }

    #[test]
    fn compression_adopted_for_low_entropy_payload_and_rejected_for_random() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path()).with_compress_threshold(8192);
        let cache = Cache::new(config).unwrap();

        cache
            .set(b"repeated", &Value::Bytes(vec![b'a'; 1024 * 1024]), Duration::from_secs(60))
            .unwrap();
        let loc = cache.location(b"repeated");
        let meta = ValueMeta::load(&loc.meta).unwrap();
        assert!(meta.c);

        let mut state: u64 = 0x243F6A8885A308D3;
        let random_bytes: Vec<u8> = (0..1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xff) as u8
            })
            .collect();
        cache
            .set(b"random", &Value::Bytes(random_bytes), Duration::from_secs(60))
            .unwrap();
        let loc = cache.location(b"random");
        let meta = ValueMeta::load(&loc.meta).unwrap();
        assert!(!meta.c);
    }

    #[test]
    fn map_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::Bool(true));
        let value = Value::Map(map);

        cache.set(b"m", &value, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get(b"m"), Some(value));
    }
}
