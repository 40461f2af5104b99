//! PID-tagged lock file guarding a record store against concurrent runs.

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::{
    ffi::OsString,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::LockError;

/// Attempts before giving up when other processes keep recreating the lock.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Lock path for a store: the store path with `suffix` appended to its file name.
pub fn lock_path(store_path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(store_path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// A held lock. The lock file is removed on [`LockHandle::release`] or on drop.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the lock file unconditionally.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = remove_if_present(&self.path) {
                warn!("Failed to remove lock {}: {e}", self.path.display());
            }
        }
    }
}

/// Acquires the lock at `path` for the current process.
pub fn acquire(path: &Path) -> Result<LockHandle, LockError> {
    acquire_as(path, std::process::id())
}

fn acquire_as(path: &Path, pid: u32) -> Result<LockHandle, LockError> {
    let handle = || LockHandle {
        path: path.to_path_buf(),
        released: false,
    };

    for _ in 0..ACQUIRE_ATTEMPTS {
        match create_lock_file(path, pid) {
            Ok(()) => {
                debug!("Acquired lock {}", path.display());
                return Ok(handle());
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            // Released between our create and read, try again
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let holder: u32 = contents.trim().parse().map_err(|_| LockError::Corrupt {
            path: path.to_path_buf(),
            contents: contents.clone(),
        })?;

        if holder == pid {
            info!("Lock {} is already held by this process", path.display());
            return Ok(handle());
        }

        if is_process_alive(holder) {
            return Err(LockError::HeldByOther(holder));
        }

        warn!(
            "Removing stale lock {} left by dead process {holder}",
            path.display()
        );
        remove_stale(path, holder, pid)?;
    }

    Err(LockError::Io(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("lock {} keeps being recreated", path.display()),
    )))
}

fn create_lock_file(path: &Path, pid: u32) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{pid}")
}

/// Removes the lock at `path` only if it still names the dead `holder`.
///
/// The file is first renamed aside, so two runs replacing the same stale lock
/// cannot both delete it. If what was moved aside turns out to be a fresh lock
/// written by another run, it is linked back into place. A third run creating
/// a lock between the rename and the link-back wins that slot, and the run
/// whose lock was moved aside is then unprotected; this needs three runs
/// racing over one dead holder.
fn remove_stale(path: &Path, holder: u32, pid: u32) -> io::Result<()> {
    let mut aside = OsString::from(path.as_os_str());
    aside.push(format!(".stale.{pid}"));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    let taken = fs::read_to_string(&aside).unwrap_or_default();
    if taken.trim() != holder.to_string() {
        debug!("Lock {} was replaced before removal, restoring it", path.display());
        if let Err(e) = fs::hard_link(&aside, path) {
            warn!("Could not restore lock {}: {e}", path.display());
        }
    }

    remove_if_present(&aside)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Whether a process with `pid` exists, checked with the null signal.
///
/// `EPERM` means the process exists but belongs to someone else.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
