use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for a [`crate::Cache`] instance.
///
/// Every field has a default matching the historical `file-cache` behavior.
/// Construct with [`CacheConfig::new`] and adjust via the `with_*` builders,
/// or start from [`CacheConfig::from_env`] to layer environment overrides
/// under explicit construction.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(crate) root: PathBuf,
    pub(crate) salt: String,
    pub(crate) default_ttl: Duration,
    pub(crate) shard_depth: u8,
    pub(crate) max_inline_bytes: usize,
    pub(crate) compress_threshold: usize,
    pub(crate) allow_classes: bool,
    pub(crate) gc_probability: f64,
    pub(crate) file_subdir: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) user_agent: String,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            salt: "file-cache".to_string(),
            default_ttl: Duration::from_secs(300),
            shard_depth: 2,
            max_inline_bytes: 262_144,
            compress_threshold: 8_192,
            allow_classes: false,
            gc_probability: 0.0,
            file_subdir: "files".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(20),
            user_agent: "FileCache/1.0".to_string(),
        }
    }

    /// Like [`CacheConfig::new`], but overlays `FILECACHE_*` environment
    /// variables on top of the defaults before any builder calls are applied.
    /// An explicit `with_*` call still wins, since builders run after this.
    pub fn from_env(root: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(root);

        if let Ok(v) = std::env::var("FILECACHE_SALT") {
            cfg.salt = v;
        }
        if let Some(v) = env_u64("FILECACHE_DEFAULT_TTL") {
            cfg.default_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("FILECACHE_SHARD_DEPTH") {
            cfg.shard_depth = v.min(3) as u8;
        }
        if let Some(v) = env_u64("FILECACHE_MAX_INLINE_BYTES") {
            cfg.max_inline_bytes = v as usize;
        }
        if let Some(v) = env_u64("FILECACHE_COMPRESS_THRESHOLD") {
            cfg.compress_threshold = v as usize;
        }
        if let Ok(v) = std::env::var("FILECACHE_ALLOW_CLASSES") {
            cfg.allow_classes = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("FILECACHE_GC_PROBABILITY") {
            if let Ok(p) = v.parse::<f64>() {
                cfg.gc_probability = p.clamp(0.0, 1.0);
            }
        }
        if let Ok(v) = std::env::var("FILECACHE_FILE_SUBDIR") {
            cfg.file_subdir = v;
        }
        if let Some(v) = env_u64("FILECACHE_CONNECT_TIMEOUT") {
            cfg.connect_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("FILECACHE_READ_TIMEOUT") {
            cfg.read_timeout = Duration::from_secs(v);
        }
        if let Ok(v) = std::env::var("FILECACHE_USER_AGENT") {
            cfg.user_agent = v;
        }

        cfg
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_shard_depth(mut self, depth: u8) -> Self {
        self.shard_depth = depth.min(3);
        self
    }

    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }

    pub fn with_compress_threshold(mut self, bytes: usize) -> Self {
        self.compress_threshold = bytes;
        self
    }

    pub fn with_allow_classes(mut self, allow: bool) -> Self {
        self.allow_classes = allow;
        self
    }

    pub fn with_gc_probability(mut self, probability: f64) -> Self {
        self.gc_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_file_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.file_subdir = subdir.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn files_root(&self) -> PathBuf {
        self.root.join(&self.file_subdir)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
