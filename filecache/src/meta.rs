use crate::atomic::atomic_write;
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard upper bound on any meta file we will attempt to parse. Cache
/// corruption should degrade to a cache miss, not an out-of-memory read.
const META_READ_LIMIT_BYTES: u64 = 8 * 1024 * 1024;

/// The authoritative value-store record. Field names intentionally match
/// the on-disk keys so the JSON is exactly the mapping described by the
/// persisted format, not an implementation-detail rename of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValueMeta {
    /// Absolute expiration instant, seconds since epoch. `0` means never.
    pub e: u64,
    /// `true` if the payload is embedded in `v`; `false` if it lives in the sibling `.bin`.
    pub i: bool,
    /// `true` if the payload is deflate-compressed.
    pub c: bool,
    /// Serializer tag (`"native"` or `"compact-binary"`).
    pub s: String,
    /// Base64-encoded payload, present iff `i == true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,
}

impl ValueMeta {
    pub fn is_expired(&self, now: u64) -> bool {
        self.e != 0 && self.e < now
    }

    pub fn load(path: &Path) -> Option<Self> {
        let bytes = read_bounded(path)?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_vec(self)?;
        atomic_write(path, &json)
    }
}

/// The file-store analog of [`ValueMeta`]: the payload is an external file
/// at an absolute path rather than an inline/external byte string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMeta {
    pub e: u64,
    pub p: PathBuf,
}

impl FileMeta {
    pub fn is_expired(&self, now: u64) -> bool {
        self.e != 0 && self.e < now
    }

    pub fn load(path: &Path) -> Option<Self> {
        let bytes = read_bounded(path)?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_vec(self)?;
        atomic_write(path, &json)
    }
}

/// Reads `path` into memory, refusing symlinks and oversized files so that a
/// corrupted or hostile meta file can't be used to exhaust memory or escape
/// the cache directory. Any irregularity is treated as "no meta present"
/// rather than surfaced as an error.
fn read_bounded(path: &Path) -> Option<Vec<u8>> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    if metadata.file_type().is_symlink() || !metadata.is_file() {
        return None;
    }
    if metadata.len() > META_READ_LIMIT_BYTES {
        return None;
    }
    std::fs::read(path).ok()
}

pub fn now_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => 0,
    }
}
