// SPDX-License-Identifier: GPL-2.0-or-later

//! Daemonization (part of component H's startup/teardown sequencing).
//!
//! Forks to background, detaches the session, and runs a parent/child
//! handshake over signals: the child signals `SIGTERM` once its own
//! initialization has succeeded, or `SIGINT` if it failed. The parent waits
//! up to two seconds, polling [`crate::signals::last_caught`], before giving
//! up. Grounded directly on `Daemon.cpp::main`'s fork/`setsid`/handshake
//! block.

use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::{fork, setsid, ForkResult, Pid};

use crate::signals;

/// How the handshake poll loop in the parent behaves: twenty checks, 100ms
/// apart, matching the source's `i = 20; usleep(100 * 1000)` loop.
const HANDSHAKE_POLLS: u32 = 20;
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Forks to background and detaches the session in the child. The original
/// foreground process never returns from this call: it blocks in
/// [`wait_for_child_handshake`] and then exits with the handshake's verdict.
/// Only the detached child returns, with its parent's pid (to signal once
/// startup finishes or fails).
pub fn daemonize() -> nix::Result<Pid> {
    let parent = nix::unistd::getpid();
    // Safety: called once, early in `main`, before any thread is spawned.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => wait_for_child_handshake(child),
        ForkResult::Child => {
            setsid()?;
            Ok(parent)
        }
    }
}

/// Polls [`crate::signals::last_caught`] for up to two seconds waiting for
/// the child's handshake signal, then exits the process: `0` on `SIGTERM`
/// (child started cleanly), non-zero otherwise (child failed or timed out).
/// Never returns.
fn wait_for_child_handshake(_child: Pid) -> ! {
    signals::reset_last_caught();
    for _ in 0..HANDSHAKE_POLLS {
        match signals::last_caught() {
            0 => std::thread::sleep(HANDSHAKE_POLL_INTERVAL),
            caught if caught == Signal::SIGTERM as i32 => std::process::exit(0),
            caught => {
                eprintln!("abrtd: failed to start: got signal {caught}");
                std::process::exit(1);
            }
        }
    }
    eprintln!("abrtd: failed to start: timeout waiting for child");
    std::process::exit(1);
}

/// Sends the success handshake signal (`SIGTERM`) to the original foreground
/// process. Called by the daemonized child once initialization completes.
pub fn signal_parent_success(parent: Pid) {
    let _ = nix::sys::signal::kill(parent, Signal::SIGTERM);
}

/// Sends the failure handshake signal (`SIGINT`) to the original foreground
/// process. Called by the daemonized child if initialization fails partway
/// through.
pub fn signal_parent_failure(parent: Pid) {
    let _ = nix::sys::signal::kill(parent, Signal::SIGINT);
}

/// `true` if the process was launched under the real root user. The source
/// refuses to start otherwise; crash reporting needs to read arbitrary
/// users' spool directories.
pub fn running_as_root() -> bool {
    nix::unistd::getuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_poll_budget_is_two_seconds() {
        let total = HANDSHAKE_POLL_INTERVAL * HANDSHAKE_POLLS;
        assert_eq!(total, Duration::from_secs(2));
    }
}
