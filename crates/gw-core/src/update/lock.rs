//! Cross-process update lock.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Advisory `flock` held for the duration of one update run.
///
/// The lock file is never removed; deleting it would let a waiter lock an
/// unlinked inode while a newcomer creates a fresh file.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
}

impl UpdateLock {
    /// Take the lock without blocking. `Ok(None)` means another process
    /// holds it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return Ok(None);
                }
                return Err(err);
            }
        }

        file.set_len(0)?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();
        Ok(Some(Self { file }))
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}
