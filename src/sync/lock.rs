//! Single-upload lock backed by a pid file

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether a process with this pid exists
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // exists, but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Held for the duration of an upload; the pid file is removed on drop
#[derive(Debug)]
pub struct UploadLock {
    path: PathBuf,
}

impl UploadLock {
    /// Take the lock for the current process
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_for(path, std::process::id() as i32)
    }

    /// Take the lock on behalf of `pid`. A lock left by a dead process, or
    /// one whose content is not a pid, is reclaimed.
    pub fn acquire_for(path: &Path, pid: i32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", pid)?;
                    debug!("Acquired upload lock {} for pid {}", path.display(), pid);
                    return Ok(UploadLock {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match read_pid(path)? {
                Some(holder) if pid_alive(holder) => {
                    return Err(Error::UploadInProgress {
                        pid: holder,
                        lock_file: path.to_path_buf(),
                    });
                }
                Some(holder) => warn!(
                    "Removing stale upload lock {} left by pid {}",
                    path.display(),
                    holder
                ),
                None => warn!("Removing unreadable upload lock {}", path.display()),
            }

            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove upload lock {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Pid stored in a lock file; `None` when the file vanished or is garbage
fn read_pid(path: &Path) -> Result<Option<i32>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
