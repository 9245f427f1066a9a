// SPDX-License-Identifier: GPL-2.0-or-later

//! Child Reaper (component F).
//!
//! Drains exited children with non-blocking waits whenever a `SIGCHLD` byte
//! is read off the self-pipe. Resolves the source's `socket_client_count`
//! underflow risk (see `DESIGN.md`, Open Question 3): a reaped pid only
//! touches [`ClientCounter`] when the role map says it was a socket helper.

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::error::ReapError;
use crate::model::{ClientCounter, Role, RoleMap};

/// Drains every currently-reapable child. Returns `true` if the listener's
/// readiness callback should be re-armed as a result (i.e. some reaped pid
/// was a socket helper and the counter just dropped back below the
/// ceiling). `log_scanner` is cleared in place if the reaped pid matches it.
///
/// `Err` only for a genuine `waitpid` failure other than `ECHILD` (which
/// just means "no children left" and is the ordinary loop exit).
pub fn drain_children(
    roles: &mut RoleMap,
    counter: &mut ClientCounter,
    log_scanner: &mut Option<Pid>,
) -> Result<bool, ReapError> {
    let mut rearm = false;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => break,
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                reap_one(pid, roles, counter, log_scanner, &mut rearm);
            }
            Ok(_) => {
                // WaitStatus::Continued / Stopped: not a terminal state, not our concern.
            }
            Err(e) => return Err(ReapError::WaitError(e)),
        }
    }
    Ok(rearm)
}

fn reap_one(
    pid: Pid,
    roles: &mut RoleMap,
    counter: &mut ClientCounter,
    log_scanner: &mut Option<Pid>,
    rearm: &mut bool,
) {
    if Some(pid) == *log_scanner {
        tracing::info!(pid = pid.as_raw(), "log scanner exited");
        *log_scanner = None;
        return;
    }
    match roles.take(pid) {
        Some(Role::SocketHelper) => {
            if counter.decrement() {
                *rearm = true;
            }
        }
        Some(Role::LogScanner) => {
            *log_scanner = None;
        }
        Some(Role::UploadHelper) | None => {
            // No counter effect: upload helpers and unrecognized pids are
            // reaped silently, per the role-map design (DESIGN.md §3).
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_unknown_pid_has_no_counter_effect() {
        let mut roles = RoleMap::new();
        let mut counter = ClientCounter::new(10);
        let mut scanner = None;
        let mut rearm = false;
        reap_one(Pid::from_raw(1234), &mut roles, &mut counter, &mut scanner, &mut rearm);
        assert_eq!(counter.count(), 0);
        assert!(!rearm);
    }

    #[test]
    fn reap_socket_helper_decrements_and_can_rearm() {
        let mut roles = RoleMap::new();
        let pid = Pid::from_raw(42);
        roles.insert(pid, Role::SocketHelper);
        let mut counter = ClientCounter::new(1);
        counter.increment();
        assert!(counter.at_ceiling());
        let mut scanner = None;
        let mut rearm = false;
        reap_one(pid, &mut roles, &mut counter, &mut scanner, &mut rearm);
        assert_eq!(counter.count(), 0);
        assert!(rearm);
    }

    #[test]
    fn reap_upload_helper_has_no_counter_effect() {
        let mut roles = RoleMap::new();
        let pid = Pid::from_raw(99);
        roles.insert(pid, Role::UploadHelper);
        let mut counter = ClientCounter::new(10);
        counter.increment();
        let mut scanner = None;
        let mut rearm = false;
        reap_one(pid, &mut roles, &mut counter, &mut scanner, &mut rearm);
        assert_eq!(counter.count(), 1, "upload helper reap must not touch the client counter");
        assert!(!rearm);
    }

    #[test]
    fn reap_log_scanner_clears_slot_without_touching_counter() {
        let mut roles = RoleMap::new();
        let pid = Pid::from_raw(7);
        let mut counter = ClientCounter::new(10);
        let mut scanner = Some(pid);
        let mut rearm = false;
        reap_one(pid, &mut roles, &mut counter, &mut scanner, &mut rearm);
        assert_eq!(scanner, None);
        assert_eq!(counter.count(), 0);
    }
}
