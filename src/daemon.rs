//! Process-level daemon plumbing: detaching, privilege checks, exit codes.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;

use thiserror::Error;

use crate::singleton::LockError;

/// Exit status for a prior-instance conflict or failed lock acquisition.
pub const EXIT_LOCK: u8 = 1;
/// Exit status when a new session cannot be created.
pub const EXIT_SESSION: u8 = 2;
/// Exit status when raw-frame mode lacks root privileges.
pub const EXIT_PRIVILEGE: u8 = 3;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),

    #[error("failed to create a new session: {0}")]
    Session(#[source] io::Error),

    #[error("raw frame mode needs root privileges; try without -E")]
    Privilege,

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl DaemonError {
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::Fork(_) | DaemonError::Lock(_) => EXIT_LOCK,
            DaemonError::Session(_) => EXIT_SESSION,
            DaemonError::Privilege => EXIT_PRIVILEGE,
        }
    }
}

/// Which side of [`detach`] the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Invoking process; should exit 0.
    Parent,
    /// Background daemon.
    Child,
}

/// Fork into the background and start a new session.
///
/// Must run before any threads (including the tokio runtime) exist.  The
/// child gets umask 0 and stdio redirected to `/dev/null`.
pub fn detach() -> Result<Detached, DaemonError> {
    // SAFETY: called while the process is still single-threaded.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(DaemonError::Fork(io::Error::last_os_error()));
    }
    if pid > 0 {
        return Ok(Detached::Parent);
    }

    // SAFETY: setsid has no memory-safety preconditions.
    if unsafe { libc::setsid() } < 0 {
        return Err(DaemonError::Session(io::Error::last_os_error()));
    }
    // SAFETY: umask only swaps the process file-mode mask and cannot fail.
    unsafe { libc::umask(0) };

    redirect_stdio().map_err(DaemonError::Session)?;
    Ok(Detached::Child)
}

fn redirect_stdio() -> io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid; dup2 atomically replaces `fd`.
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Raw packet sockets need an effective uid of 0.
pub fn require_root() -> Result<(), DaemonError> {
    // SAFETY: geteuid cannot fail.
    if unsafe { libc::geteuid() } == 0 {
        Ok(())
    } else {
        Err(DaemonError::Privilege)
    }
}
