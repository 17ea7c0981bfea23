//! Single-instance enforcement via an advisory-locked PID file (spec §6:
//! "at most one instance of a given binary may run against a given config at
//! a time"). The original enforces this the same way, `flock`-ing a file
//! under `/var/run`; `nix::fcntl::flock` is already a teacher dependency for
//! `signal`, generalized here to `fs`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};

use crate::error::{Error, Result};

/// A locked PID file. The lock is released (and, best-effort, the file
/// removed) when this value is dropped.
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Opens (creating if needed) and exclusively, non-blockingly locks
    /// `path`, then writes the current process id into it. Fails with
    /// [`Error::ResourceAcquisition`] if another instance already holds the
    /// lock (spec §6).
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::resource(format!("cannot open pid file {}: {e}", path.display())))?;
        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|e| {
            Error::resource(format!(
                "another instance is already running (pid file {} is locked: {e})",
                path.display()
            ))
        })?;
        let mut file = file;
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { path, file })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::UnlockNonblock);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_path_fails() {
        let dir = std::env::temp_dir().join(format!("cyclone-pidfile-test-{}", std::process::id()));
        let _guard = PidFile::acquire(&dir).unwrap();
        let second = PidFile::acquire(&dir);
        assert!(second.is_err());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = std::env::temp_dir().join(format!("cyclone-pidfile-test-drop-{}", std::process::id()));
        {
            let _guard = PidFile::acquire(&dir).unwrap();
        }
        let reacquired = PidFile::acquire(&dir);
        assert!(reacquired.is_ok());
    }
}
