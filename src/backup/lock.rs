use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

static LOCK_FILE_NAME: &str = ".backup.lock";
static MAX_LOCK_ATTEMPTS: usize = 8;

/// Exclusive lock on a backup directory, held for the duration of one run
///
/// Acquisition never blocks: a second run targeting the same directory fails
/// with `Error::AlreadyRunning`. The lock file is unlinked on drop while the
/// lock is still held, so a run that locked an unlinked inode notices it and
/// starts over on the current file.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    pub fn acquire<P: AsRef<Path>>(backup_dir: P) -> Result<Self> {
        let backup_dir = backup_dir.as_ref();
        std::fs::create_dir_all(backup_dir)
            .map_err(Error::from)
            .add_msg(format!("Cannot create backup directory {:?}", backup_dir))?;

        let path = backup_dir.join(LOCK_FILE_NAME);
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(Error::from)
                .add_msg(format!("Cannot open lock file {:?}", path))?;

            if file.try_lock_exclusive().is_err() {
                return Err(Error::AlreadyRunning(path));
            }

            if is_same_file(&file, &path) {
                tracing::debug!("Acquired run lock {:?}", path);
                return Ok(Self { path, _file: file });
            }
            tracing::debug!("Lock file {:?} was replaced while locking, retrying", path);
        }

        Err(Error::AlreadyRunning(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether `path` still names the inode behind `file`.
#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

/// Open files cannot be unlinked on this platform, so the path always matches.
#[cfg(not(unix))]
fn is_same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // unlink before the file closes and releases the lock
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Cannot remove lock file {:?}: {e}", self.path);
        }
    }
}
