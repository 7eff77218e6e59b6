use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hashes `(salt, domain, key)` into the lowercase hex slot identifier that
/// names every file belonging to one entry.
///
/// `domain` is `""` for the value store and `"file"` for the file store, so
/// the two stores never collide even for an identical caller-supplied key.
pub fn slot_hash(salt: &str, domain: &str, key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(domain.as_bytes());
    hasher.update([0u8]);
    hasher.update(key);
    hex::encode(hasher.finalize())
}

/// Builds the sharded directory that a slot's files live under, taking
/// `shard_depth` two-hex-character levels from the front of `hash`.
pub fn shard_dir(root: &Path, hash: &str, shard_depth: u8) -> PathBuf {
    let depth = shard_depth.min(3) as usize;
    let mut dir = root.to_path_buf();
    for level in 0..depth {
        let offset = level * 2;
        dir.push(&hash[offset..offset + 2]);
    }
    dir
}

/// The three on-disk paths a value-store entry is split across: meta (`.php`,
/// historical name retained for on-disk compatibility), external payload
/// (`.bin`), and the anti-stampede lock file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueLocation {
    pub hash: String,
    pub meta: PathBuf,
    pub bin: PathBuf,
    pub lock: PathBuf,
}

impl ValueLocation {
    pub fn for_key(root: &Path, salt: &str, shard_depth: u8, key: &[u8]) -> Self {
        let hash = slot_hash(salt, "", key);
        let dir = shard_dir(root, &hash, shard_depth);
        Self {
            meta: dir.join(format!("{hash}.php")),
            bin: dir.join(format!("{hash}.bin")),
            lock: dir.join(format!("{hash}.lock")),
            hash,
        }
    }
}

/// The on-disk paths a file-store entry is split across. The content file's
/// extension is caller-chosen, so it isn't fixed here; see
/// [`FileLocation::content_path`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLocation {
    pub hash: String,
    pub dir: PathBuf,
    pub meta: PathBuf,
    pub lock: PathBuf,
}

impl FileLocation {
    pub fn for_key(files_root: &Path, salt: &str, shard_depth: u8, key: &[u8]) -> Self {
        let hash = slot_hash(salt, "file", key);
        let dir = shard_dir(files_root, &hash, shard_depth);
        Self {
            meta: dir.join(format!("{hash}.meta.php")),
            lock: dir.join(format!("{hash}.lock")),
            dir,
            hash,
        }
    }

    pub fn content_path(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.hash, ext))
    }
}
