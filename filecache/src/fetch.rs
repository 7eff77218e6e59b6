use crate::atomic::atomic_write_with;
use crate::error::CacheError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A byte-stream source that can deliver its full content to a destination
/// path atomically. `rememberFile` is generic over this trait so tests can
/// substitute a deterministic double instead of performing real network I/O.
pub trait Fetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<(), CacheError>;
}

/// Reads `source` as a local filesystem path (an explicit `file://` prefix is
/// stripped if present) and copies it to `dest`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFetcher;

impl Fetcher for LocalFetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<(), CacheError> {
        let path = local_path(source);
        atomic_write_with(dest, |out| {
            let mut reader = File::open(&path).map_err(|err| CacheError::Fetch {
                source: source.to_string(),
                message: err.to_string(),
            })?;
            io::copy(&mut reader, out)?;
            Ok(())
        })
    }
}

/// Streams `source` as an HTTP(S) URL, honoring the configured connect/read
/// timeouts and `User-Agent` header.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            user_agent: user_agent.into(),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<(), CacheError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(self.connect_timeout)
            .timeout_read(self.read_timeout)
            .build();

        let response = agent
            .get(source)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|err| CacheError::Fetch {
                source: source.to_string(),
                message: err.to_string(),
            })?;

        atomic_write_with(dest, |out| {
            let mut reader = response.into_reader();
            io::copy(&mut reader, out)?;
            Ok(())
        })
    }
}

/// Dispatches to [`LocalFetcher`] when `source` names an existing local file
/// (or carries an explicit `file://` prefix), and to [`HttpFetcher`]
/// otherwise. This is what `rememberFile` uses unless a caller supplies its
/// own [`Fetcher`].
#[derive(Clone, Debug)]
pub struct DefaultFetcher {
    http: HttpFetcher,
}

impl DefaultFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            http: HttpFetcher::new(connect_timeout, read_timeout, user_agent),
        }
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch(&self, source: &str, dest: &Path) -> Result<(), CacheError> {
        if source.starts_with("file://") || local_path(source).exists() {
            LocalFetcher.fetch(source, dest)
        } else {
            self.http.fetch(source, dest)
        }
    }
}

fn local_path(source: &str) -> PathBuf {
    match source.strip_prefix("file://") {
        Some(stripped) => PathBuf::from(stripped),
        None => PathBuf::from(source),
    }
}
