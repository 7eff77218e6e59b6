use crate::error::CacheError;
use rand::Rng;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Publishes `bytes` at `path` such that no reader ever observes a partial,
/// truncated, or empty file there, and concurrent publishers to the same
/// path yield exactly one winning final content.
///
/// Parent directories are created as needed (tolerating races with other
/// publishers). The payload is written to a uniquely-named sibling temp file
/// and `fsync`'d before an atomic rename makes it visible at `path`. Any
/// failure before the rename best-effort deletes the temp file and surfaces
/// a write error.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    atomic_write_with(path, |file| {
        file.write_all(bytes)?;
        Ok(())
    })
}

/// Like [`atomic_write`], but the payload is produced by a callback that
/// writes directly into the temp file. Used when the caller already has an
/// open source to stream from (the byte-stream fetcher) and would rather
/// not buffer the whole payload first.
pub fn atomic_write_with(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> Result<(), CacheError>,
) -> Result<(), CacheError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    create_dir_all_rwxrwxr_x(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;

    let write_result = (|| -> Result<(), CacheError> {
        write(&mut file)?;
        file.sync_all()?;
        set_rw_rw_r(&file)?;
        Ok(())
    })();

    if let Err(err) = write_result {
        drop(file);
        remove_file_best_effort(&tmp_path);
        return Err(err);
    }
    drop(file);

    match rename_with_windows_retry(&tmp_path, path) {
        Ok(()) => {
            sync_dir_best_effort(parent);
            Ok(())
        }
        Err(err) => {
            remove_file_best_effort(&tmp_path);
            Err(CacheError::from(err))
        }
    }
}

fn create_dir_all_rwxrwxr_x(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Best-effort: another publisher may have already set (or be
        // concurrently setting) the same mode; races here are harmless.
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o775));
    }
    Ok(())
}

fn set_rw_rw_r(file: &fs::File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o664))?;
    }
    #[cfg(not(unix))]
    {
        let _ = file;
    }
    Ok(())
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;

    loop {
        let suffix: String = {
            let mut rng = rand::thread_rng();
            (0..6).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
        };
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".{suffix}.tmp"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

fn rename_with_windows_retry(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let mut attempts = 0usize;
    loop {
        match fs::rename(tmp_path, dest) {
            Ok(()) => return Ok(()),
            Err(err)
                if cfg!(windows)
                    && (err.kind() == io::ErrorKind::AlreadyExists || dest.exists()) =>
            {
                // Windows `rename` refuses to overwrite an existing file.
                // Concurrent publishers can race a remove+rename pair; retry
                // until this call wins or we give up.
                match fs::remove_file(dest) {
                    Ok(()) => {}
                    Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                    Err(remove_err) => return Err(remove_err),
                }
                attempts += 1;
                if attempts >= MAX_RENAME_ATTEMPTS {
                    return Err(err);
                }
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(unix)]
fn sync_dir_best_effort(dir: &Path) {
    if let Ok(dir_file) = fs::File::open(dir) {
        if let Err(err) = dir_file.sync_all() {
            tracing::debug!(
                target = "filecache",
                dir = %dir.display(),
                error = %err,
                "failed to fsync parent directory after publish"
            );
        }
    }
}

#[cfg(not(unix))]
fn sync_dir_best_effort(_dir: &Path) {}

pub(crate) fn remove_file_best_effort(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target = "filecache",
                path = %path.display(),
                error = %err,
                "failed to remove file"
            );
            false
        }
    }
}
