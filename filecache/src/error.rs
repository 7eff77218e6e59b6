use std::path::PathBuf;

/// Errors produced by cache construction and by the write/fetch paths that
/// cannot be silently recovered by falling back to a cache miss.
///
/// Corruption and lock contention are deliberately *not* represented here:
/// both degrade to a miss or an unlocked compute-and-set at the call site
/// rather than surfacing as an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache root {path} is not usable: {message}")]
    Configuration { path: PathBuf, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("failed to fetch {source}: {message}")]
    Fetch { source: String, message: String },
}
