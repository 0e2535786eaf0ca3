//! Exclusive lock on the application directory (spec §6): a second
//! instance pointed at the same `confdir` refuses to start (exit code 1).

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub struct DirLock {
    _file: File,
}

impl DirLock {
    /// Takes an exclusive, non-blocking `flock` on `path`. The lock is
    /// released automatically when the returned `DirLock` (and its
    /// underlying file descriptor) is dropped.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");

        let first = DirLock::acquire(&path).unwrap();
        let second = DirLock::acquire(&path);
        assert!(second.is_err());
        drop(first);
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");

        {
            let _held = DirLock::acquire(&path).unwrap();
        }
        let reacquired = DirLock::acquire(&path);
        assert!(reacquired.is_ok());
    }
}
