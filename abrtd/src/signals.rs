// SPDX-License-Identifier: GPL-2.0-or-later

//! Self-pipe signal handling.
//!
//! A classic self-pipe: `SIGTERM`/`SIGINT`/`SIGCHLD`/`SIGALRM` are converted
//! from asynchronous signals into a synchronous byte read the event loop can
//! `poll()` alongside everything else. The handler itself is kept to the
//! bare minimum required to be async-signal-safe: it snapshots the signal
//! number into an atomic, writes one byte, and restores `errno`. Global
//! mutable state here is unavoidable — signal handlers cannot close over
//! anything — so it is confined to a couple of atomics, the same shape the
//! teacher's own signal-adjacent code uses for crash-handler globals.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{close, pipe};

/// Write end of the self-pipe. `-1` until [`install`] enables it, so that
/// signals received during early startup are observable via
/// [`last_caught`] but do not yet wake a poll loop that isn't listening.
static SIGNAL_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

/// Last signal number seen by the handler. Not a substitute for the pipe —
/// purely so startup code can tell "did something arrive" before the pipe
/// is live.
static SIG_CAUGHT: AtomicI32 = AtomicI32::new(0);

/// Read/write ends of the self-pipe, owned by the event loop.
pub struct SelfPipe {
    pub read_fd: RawFd,
}

/// Snapshots `signo` and writes one byte carrying it to the self-pipe, if
/// the pipe is enabled. Must stay async-signal-safe: no allocation, no
/// locking, `errno` preserved across the body.
extern "C" fn handle_signal(signo: i32) {
    let saved_errno = errno_get();
    SIG_CAUGHT.store(signo, Ordering::SeqCst);
    let write_fd = SIGNAL_PIPE_WRITE.load(Ordering::SeqCst);
    if write_fd >= 0 {
        let byte = signo as u8;
        // Safety: write_fd is either -1 (skipped above) or a pipe fd that
        // outlives the process; a single-byte write is atomic under POSIX.
        unsafe {
            libc::write(write_fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
    errno_set(saved_errno);
}

fn errno_get() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn errno_set(value: i32) {
    // Safety: setting errno is always safe; it is thread-local storage.
    unsafe {
        *libc::__errno_location() = value;
    }
}

/// Creates the self-pipe and installs handlers for TERM/INT/CHLD, and ALRM
/// when an idle timeout was requested. The write end is *not* armed yet —
/// call [`SelfPipe::arm`] once the rest of startup has completed.
pub fn install(install_alarm: bool) -> nix::Result<SelfPipe> {
    let (read_fd, write_fd) = pipe()?;
    let read_fd: RawFd = read_fd.into();
    let write_fd_raw: RawFd = write_fd.into();
    // Stash the write fd for `arm`, but don't publish it to the handler yet.
    SELF_PIPE_WRITE_STAGED.store(write_fd_raw, Ordering::SeqCst);

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // Safety: `handle_signal` only touches async-signal-safe state.
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action)?;
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGCHLD, &action)?;
        if install_alarm {
            signal::sigaction(Signal::SIGALRM, &action)?;
        }
    }

    Ok(SelfPipe { read_fd })
}

static SELF_PIPE_WRITE_STAGED: AtomicI32 = AtomicI32::new(-1);

impl SelfPipe {
    /// Enables the write end so the handler starts feeding the pipe.
    /// Called once startup has fully completed, mirroring the source's
    /// "only now we want signal pipe to work" comment.
    pub fn arm(&self) {
        let staged = SELF_PIPE_WRITE_STAGED.load(Ordering::SeqCst);
        SIGNAL_PIPE_WRITE.store(staged, Ordering::SeqCst);
    }

    pub fn close(self) {
        let write_fd = SELF_PIPE_WRITE_STAGED.swap(-1, Ordering::SeqCst);
        SIGNAL_PIPE_WRITE.store(-1, Ordering::SeqCst);
        if write_fd >= 0 {
            let _ = close(write_fd);
        }
        let _ = close(self.read_fd);
    }
}

/// Last signal observed by the handler, regardless of pipe state. Used
/// during the daemonization parent/child handshake, before the pipe read
/// end has a reader.
pub fn last_caught() -> i32 {
    SIG_CAUGHT.load(Ordering::SeqCst)
}

pub fn reset_last_caught() {
    SIG_CAUGHT.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_caught_roundtrips() {
        reset_last_caught();
        assert_eq!(last_caught(), 0);
        SIG_CAUGHT.store(Signal::SIGTERM as i32, Ordering::SeqCst);
        assert_eq!(last_caught(), Signal::SIGTERM as i32);
        reset_last_caught();
    }
}
