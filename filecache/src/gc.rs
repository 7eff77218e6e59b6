use crate::atomic::remove_file_best_effort;
use crate::meta::{now_seconds, FileMeta, ValueMeta};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const VALUE_META_SUFFIX: &str = ".php";
const FILE_META_SUFFIX: &str = ".meta.php";

/// Non-mutating occupancy summary produced by walking the same tree [`sweep`]
/// walks, without deleting anything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of meta files on disk (value-store and file-store entries combined).
    pub entries: u64,
    /// Aggregate size in bytes of every file under the root.
    pub bytes: u64,
}

/// Performs one bounded, depth-first sweep under `root`, deleting expired or
/// unparseable meta files (and their siblings) until `limit` deletions have
/// happened. Returns the number of entries deleted.
///
/// Non-meta stray files (an orphaned `.bin` whose meta vanished) are left
/// alone: they are harmless and this pass only recognizes files ending in
/// the meta suffixes.
pub fn sweep(root: &Path, limit: usize) -> usize {
    if limit == 0 {
        return 0;
    }
    let now = now_seconds();
    let mut deleted = 0usize;

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if deleted >= limit {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if name.ends_with(FILE_META_SUFFIX) {
            deleted += sweep_file_meta(path, now);
        } else if name.ends_with(VALUE_META_SUFFIX) {
            deleted += sweep_value_meta(path, now);
        }
    }

    deleted
}

/// Walks the same tree [`sweep`] does, counting meta files and total bytes
/// on disk without deleting anything.
pub fn stats(root: &Path) -> Stats {
    let mut out = Stats::default();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            out.bytes = out.bytes.saturating_add(metadata.len());
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(VALUE_META_SUFFIX) {
            out.entries += 1;
        }
    }
    out
}

fn sweep_value_meta(path: &Path, now: u64) -> usize {
    match ValueMeta::load(path) {
        None => {
            remove_file_best_effort(path);
            1
        }
        Some(meta) if meta.is_expired(now) => {
            remove_file_best_effort(path);
            remove_file_best_effort(&path.with_extension("bin"));
            remove_file_best_effort(&path.with_extension("lock"));
            1
        }
        Some(_) => 0,
    }
}

fn sweep_file_meta(path: &Path, now: u64) -> usize {
    match FileMeta::load(path) {
        None => {
            remove_file_best_effort(path);
            1
        }
        Some(meta) if meta.is_expired(now) => {
            remove_file_best_effort(path);
            remove_file_best_effort(&meta.p);
            remove_file_best_effort(&file_lock_sibling(path));
            1
        }
        Some(_) => 0,
    }
}

fn file_lock_sibling(meta_path: &Path) -> PathBuf {
    let file_name = meta_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let base = file_name.strip_suffix(FILE_META_SUFFIX).unwrap_or(file_name);
    meta_path.with_file_name(format!("{base}.lock"))
}
