use fs2::FileExt as _;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// An advisory, per-key exclusive lock backed by a `.lock` file, used by the
/// stampede-safe `remember`/`remember_file` paths.
///
/// Released when dropped. Acquisition is deliberately fallible rather than
/// panicking: callers fall back to an unlocked compute-and-set when the
/// filesystem refuses advisory locking.
pub struct CacheLock {
    file: File,
    _process_guard: MutexGuard<'static, ()>,
}

impl CacheLock {
    /// Acquires an exclusive lock on `path`, creating the lock file (and its
    /// parent directory) if needed. Blocks until the lock is available.
    pub fn lock_exclusive(path: &Path) -> io::Result<Self> {
        let mutex = process_lock_for_path(path);
        let process_guard = lock_with_recovery(mutex, path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;

        Ok(Self {
            file,
            _process_guard: process_guard,
        })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// `fs2` exclusive locks only exclude across independent processes on most
/// platforms, not across threads within one process. Pair the file lock
/// with a leaked, per-path in-process mutex so concurrent threads of one
/// process are also serialized.
fn process_lock_for_path(path: &Path) -> &'static Mutex<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = lock_with_recovery(locks, path);
    if let Some(existing) = map.get(path) {
        return existing;
    }

    let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), mutex);
    mutex
}

#[track_caller]
fn lock_with_recovery<'a, T>(mutex: &'a Mutex<T>, path: &Path) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            let loc = std::panic::Location::caller();
            tracing::error!(
                target = "filecache",
                path = %path.display(),
                file = loc.file(),
                line = loc.line(),
                "lock mutex poisoned; continuing with recovered guard"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_threads_serialize_on_the_same_lock_path() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("k.lock");
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock_path = lock_path.clone();
                let counter = Arc::clone(&counter);
                let max_concurrent = Arc::clone(&max_concurrent);
                thread::spawn(move || {
                    let _guard = CacheLock::lock_exclusive(&lock_path).unwrap();
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(5));
                    counter.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
