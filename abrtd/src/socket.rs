// SPDX-License-Identifier: GPL-2.0-or-later

//! Socket Listener (component D).
//!
//! Binds the well-known local socket, accepts connections up to
//! `MAX_CLIENT_COUNT` concurrently, and forks one `abrt-server` helper per
//! connection. Grounded on `Daemon.cpp`'s `dumpsocket_init`/
//! `server_socket_cb`, and on `ddcommon`'s `get_receiver_unix_socket`
//! (stale-socket removal before bind) and `PreparedExecve` (argv/envp
//! construction for the post-fork `execve`).

use std::fs;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use anyhow::Context;
use nix::unistd::{close, dup2, fork, ForkResult, Pid};

use crate::constants::{ABRT_SERVER_HELPER, SOCKET_PERMISSIONS};
use crate::error::DaemonError;
use crate::model::{ClientCounter, Role, RoleMap};

/// Binds the listener socket at `path`, removing a stale socket file left
/// behind by an unclean shutdown first. `backlog` is `MAX_CLIENT_COUNT`.
pub fn bind_listener(path: &Path, backlog: i32) -> anyhow::Result<UnixListener> {
    if fs::metadata(path).is_ok() {
        fs::remove_file(path)
            .with_context(|| format!("could not remove stale socket at {path:?}"))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("could not bind listener socket at {path:?}"))?;
    listener.set_nonblocking(true)?;
    fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(SOCKET_PERMISSIONS))
        .with_context(|| format!("could not chmod socket {path:?}"))?;
    // std's UnixListener has no explicit backlog knob; the OS default is
    // already >= MAX_CLIENT_COUNT on every platform this daemon targets.
    // `backlog` is kept as a parameter to document the source's intended
    // listen(2) argument even though std doesn't expose it.
    let _ = backlog;
    Ok(listener)
}

/// Outcome of one accept attempt, for the event loop to act on.
pub enum AcceptOutcome {
    /// A connection was accepted and a helper forked for it.
    Accepted(Pid),
    /// No connection was actually ready (spurious wakeup / transient error).
    WouldBlock,
    /// The client ceiling was hit; the listener's readiness callback must be
    /// detached until the reaper re-arms it.
    Detach,
}

/// Accepts one connection if the client ceiling allows it, forks a helper,
/// and updates `counter`/`roles` accordingly. Mirrors `server_socket_cb`.
pub fn accept_one(
    listener: &UnixListener,
    counter: &mut ClientCounter,
    roles: &mut RoleMap,
    syslog_mode: bool,
) -> anyhow::Result<AcceptOutcome> {
    if counter.at_ceiling() {
        let err = DaemonError::AdmissionDenied;
        tracing::warn!(error = %err, "refusing connections");
        return Ok(AcceptOutcome::Detach);
    }

    let (stream, _addr) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(AcceptOutcome::WouldBlock),
        Err(e) => return Err(e).context("accept on listener socket failed"),
    };

    tracing::info!("new client connected");
    // Safety: single-threaded event loop; no other thread touches fds
    // between fork and the child's execvp in `run_helper_child`.
    match unsafe { fork() }.context("fork for socket helper failed")? {
        ForkResult::Child => run_helper_child(stream, syslog_mode),
        ForkResult::Parent { child } => {
            counter.increment();
            roles.insert(child, Role::SocketHelper);
            drop(stream);
            Ok(AcceptOutcome::Accepted(child))
        }
    }
}

/// Runs in the forked child: replaces stdin/stdout with the connection
/// socket and execs `abrt-server`. Never returns; `_exit`s on failure to
/// avoid double-running any parent cleanup code.
fn run_helper_child(stream: UnixStream, syslog_mode: bool) -> ! {
    let fd: RawFd = stream.as_raw_fd();
    let _ = dup2(fd, 0);
    let _ = dup2(fd, 1);
    if fd > 1 {
        let _ = close(fd);
    }

    let args: &[String] = if syslog_mode {
        &[ABRT_SERVER_HELPER.to_string(), "-s".to_string()]
    } else {
        &[ABRT_SERVER_HELPER.to_string()]
    };
    match crate::exechelper::exec_helper(ABRT_SERVER_HELPER, args) {
        Ok(never) => match never {},
        Err(e) => {
            eprintln!("can't execute '{ABRT_SERVER_HELPER}': {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_listener_removes_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abrt.socket");
        std::fs::write(&path, b"not a socket").unwrap();
        let listener = bind_listener(&path, 10).unwrap();
        drop(listener);
        assert!(path.exists());
    }

    #[test]
    fn accept_at_ceiling_detaches_without_accepting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abrt.socket");
        let listener = bind_listener(&path, 10).unwrap();
        let mut counter = ClientCounter::new(0);
        let mut roles = RoleMap::new();
        let outcome = accept_one(&listener, &mut counter, &mut roles, false).unwrap();
        assert!(matches!(outcome, AcceptOutcome::Detach));
    }
}
