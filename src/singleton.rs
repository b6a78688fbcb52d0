//! Lock-file singleton: one stressgen daemon per host.
//!
//! The running instance keeps an exclusive advisory lock (`flock(2)`) on a
//! well-known file that holds its decimal pid.  A new instance asks the
//! holder to terminate, waits for the lock to clear, then takes it over.
//!
//! | file      | lock   | meaning                    |
//! |-----------|--------|----------------------------|
//! | absent    | -      | nothing running            |
//! | present   | held   | instance running           |
//! | present   | free   | stale, safe to reclaim     |

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

pub const LOCK_FILE_DEFAULT: &str = "/tmp/stressgen.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("lock file {path} is held by another process")]
    Held { path: PathBuf },

    #[error("lock file {path} is locked but holds no valid pid")]
    UnreadablePid { path: PathBuf },

    #[error("previous instance {pid} is still running (possibly started by another user)")]
    StillRunning { pid: u32 },

    #[error("lock {path} was already released")]
    Released { path: PathBuf },
}

/// Lifecycle of a [`DaemonLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Acquired,
    /// Terminal.
    Released,
}

/// Outcome of [`terminate_previous`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Takeover {
    /// No lock file.
    NoPrevious,
    /// Lock file present but not locked.
    Stale,
    /// A running instance was asked to stop and released the lock.
    Terminated { pid: u32 },
}

/// How long to wait for a previous instance to let go.
#[derive(Debug, Clone, Copy)]
pub struct TakeoverPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for TakeoverPolicy {
    fn default() -> Self {
        Self {
            attempts: 7,
            interval: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// DaemonLock
// ---------------------------------------------------------------------------

/// Scoped ownership of the singleton lock; dropping it releases the lock.
#[derive(Debug)]
pub struct DaemonLock {
    path: PathBuf,
    file: Option<File>,
    state: LockState,
}

impl DaemonLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            state: LockState::Unlocked,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Take the lock and record our pid in the file.
    ///
    /// The lock is taken before the file is truncated, so a losing contender
    /// never wipes the holder's pid.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        match self.state {
            LockState::Acquired => return Ok(()),
            LockState::Released => {
                return Err(LockError::Released {
                    path: self.path.clone(),
                })
            }
            LockState::Unlocked => {}
        }

        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(&self.path)
            .map_err(io_err)?;

        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(LockError::Held {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(io_err(e)),
        }

        let pid = std::process::id();
        file.set_len(0).map_err(io_err)?;
        file.write_all(pid.to_string().as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        info!(path = %self.path.display(), pid, "daemon lock acquired");
        self.file = Some(file);
        self.state = LockState::Acquired;
        Ok(())
    }

    /// Unlock and close the file.  No-op unless acquired.
    pub fn release(&mut self) {
        if self.state != LockState::Acquired {
            return;
        }
        if let Some(file) = self.file.take() {
            if let Err(e) = flock(&file, libc::LOCK_UN) {
                warn!(path = %self.path.display(), error = %e, "failed to unlock daemon lock");
            }
        }
        self.state = LockState::Released;
        info!(path = %self.path.display(), "daemon lock released");
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Previous instance handling
// ---------------------------------------------------------------------------

/// Pid of the process holding the lock at `path`, if any.
pub fn holder(path: &Path) -> Result<Option<u32>, LockError> {
    let Some(mut file) = open_existing(path)? else {
        return Ok(None);
    };
    if !is_locked(&file).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })? {
        return Ok(None);
    }
    read_pid(&mut file, path).map(Some)
}

/// Ask a running instance to stop and wait for its lock to clear.
pub fn terminate_previous(path: &Path, policy: TakeoverPolicy) -> Result<Takeover, LockError> {
    terminate_previous_with(path, policy, send_sigterm)
}

/// [`terminate_previous`] with a custom way of signalling the holder.
pub fn terminate_previous_with<F>(
    path: &Path,
    policy: TakeoverPolicy,
    mut signal: F,
) -> Result<Takeover, LockError>
where
    F: FnMut(u32) -> io::Result<()>,
{
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };

    let Some(mut file) = open_existing(path)? else {
        debug!(path = %path.display(), "no lock file");
        return Ok(Takeover::NoPrevious);
    };
    if !is_locked(&file).map_err(io_err)? {
        debug!(path = %path.display(), "stale lock file");
        return Ok(Takeover::Stale);
    }

    let pid = read_pid(&mut file, path)?;
    info!(pid, "terminating previous instance");
    if let Err(e) = signal(pid) {
        warn!(pid, error = %e, "failed to signal previous instance");
    }

    for _ in 0..policy.attempts {
        if !is_locked(&file).map_err(io_err)? {
            info!(pid, "previous instance exited");
            return Ok(Takeover::Terminated { pid });
        }
        std::thread::sleep(policy.interval);
    }
    Err(LockError::StillRunning { pid })
}

fn send_sigterm(pid: u32) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn open_existing(path: &Path) -> Result<Option<File>, LockError> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_pid(file: &mut File, path: &Path) -> Result<u32, LockError> {
    let mut content = String::new();
    file.read_to_string(&mut content).map_err(|source| LockError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|&pid| pid != 0)
        .ok_or_else(|| LockError::UnreadablePid {
            path: path.to_path_buf(),
        })
}

/// Probe for a conflicting lock by taking and dropping a shared one.
fn is_locked(file: &File) -> io::Result<bool> {
    match flock(file, libc::LOCK_SH | libc::LOCK_NB) {
        Ok(()) => {
            flock(file, libc::LOCK_UN)?;
            Ok(false)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
        Err(e) => Err(e),
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // SAFETY: the descriptor is valid for the lifetime of `file`.
    if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> TakeoverPolicy {
        TakeoverPolicy {
            attempts: 3,
            interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_acquire_writes_pid_and_release_is_terminal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stressgen.lock");

        let mut lock = DaemonLock::new(&path);
        assert_eq!(lock.state(), LockState::Unlocked);
        lock.acquire().unwrap();
        assert_eq!(lock.state(), LockState::Acquired);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
        assert_eq!(holder(&path).unwrap(), Some(std::process::id()));

        lock.release();
        assert_eq!(lock.state(), LockState::Released);
        assert_eq!(holder(&path).unwrap(), None);
        assert!(matches!(lock.acquire(), Err(LockError::Released { .. })));
    }

    #[test]
    fn test_second_lock_is_refused_while_held() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stressgen.lock");

        let mut first = DaemonLock::new(&path);
        first.acquire().unwrap();

        let mut second = DaemonLock::new(&path);
        assert!(matches!(second.acquire(), Err(LockError::Held { .. })));
        // The loser must not clobber the holder's pid.
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        drop(first);
        second.acquire().unwrap();
    }

    #[test]
    fn test_no_previous_and_stale() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stressgen.lock");
        assert_eq!(
            terminate_previous(&path, quick()).unwrap(),
            Takeover::NoPrevious
        );

        std::fs::write(&path, "12345").unwrap();
        assert_eq!(terminate_previous(&path, quick()).unwrap(), Takeover::Stale);
    }

    #[test]
    fn test_takeover_after_holder_exits() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stressgen.lock");
        let mut first = DaemonLock::new(&path);
        first.acquire().unwrap();

        let mut signalled = None;
        let outcome = terminate_previous_with(&path, quick(), |pid| {
            signalled = Some(pid);
            first.release();
            Ok(())
        })
        .unwrap();

        assert_eq!(signalled, Some(std::process::id()));
        assert_eq!(
            outcome,
            Takeover::Terminated {
                pid: std::process::id()
            }
        );
        let mut next = DaemonLock::new(&path);
        next.acquire().unwrap();
    }

    #[test]
    fn test_takeover_gives_up_after_bound() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stressgen.lock");
        let mut first = DaemonLock::new(&path);
        first.acquire().unwrap();

        let mut calls = 0;
        let err = terminate_previous_with(&path, quick(), |_| {
            calls += 1;
            Err(io::Error::from_raw_os_error(libc::EPERM))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, LockError::StillRunning { .. }));
        assert_eq!(first.state(), LockState::Acquired);
    }

    #[test]
    fn test_locked_file_with_garbage_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stressgen.lock");
        let mut first = DaemonLock::new(&path);
        first.acquire().unwrap();
        std::fs::write(&path, "not a pid").unwrap();

        assert!(matches!(
            terminate_previous_with(&path, quick(), |_| Ok(())),
            Err(LockError::UnreadablePid { .. })
        ));
    }
}
