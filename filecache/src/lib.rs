//! Single-node, filesystem-backed cache for serialized values and fetched
//! files.
//!
//! Two parallel stores sit under a configured root directory: a *value
//! store* ([`Cache::get`]/[`Cache::set`]/[`Cache::remember`]) for serialized
//! in-memory values, and a *file store*
//! ([`Cache::get_file_path`]/[`Cache::remember_file`]) for opaque binary
//! files fetched from a local path or a remote URL. Both share the same
//! on-disk recipe: a salted SHA-256 hash shards entries across directories,
//! writes publish via tmp-file-then-rename, and a per-key advisory lock file
//! makes the stampede-safe `remember`/`remember_file` paths safe across
//! independent host processes that share only the filesystem.
//!
//! There is no external cache service and no in-process daemon: every
//! operation is a synchronous, blocking call that talks directly to disk.

mod atomic;
mod cache;
mod codec;
mod config;
mod error;
mod fetch;
mod file_store;
mod fingerprint;
mod gc;
mod lock;
mod meta;
mod value;

pub use crate::cache::Cache;
pub use crate::config::CacheConfig;
pub use crate::error::CacheError;
pub use crate::fetch::{DefaultFetcher, Fetcher, HttpFetcher, LocalFetcher};
pub use crate::gc::Stats;
pub use crate::value::Value;
