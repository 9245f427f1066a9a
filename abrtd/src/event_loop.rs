// SPDX-License-Identifier: GPL-2.0-or-later

//! Event Loop (component H).
//!
//! A cooperative single-threaded multiplexer over three sources: the
//! signal self-pipe, the inotify channel (dump root + optional upload
//! dir), and the listener socket. Grounded on `Daemon.cpp::run_main_loop`
//! (prepare/query/poll/dispatch structure) and `ddcommon`'s
//! `wait_for_pollhup` (raw `libc::poll` idiom, generalized here to several
//! fds instead of one).
//!
//! Dispatch order is fixed every iteration: self-pipe first (signals must
//! be drained before anything else, so a `SIGCHLD` re-arms the listener
//! before that same iteration would otherwise try to poll it), then
//! inotify, then the listener socket.

use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::inotify::{AddWatchFlags, Inotify, InitFlags, WatchDescriptor};
use nix::unistd::{fork, execvp, ForkResult, Pid};

use crate::bus::Bus;
use crate::error::PollError;
use crate::middleware::MiddleWare;
use crate::model::{ClientCounter, RoleMap};
use crate::settings::Settings;
use crate::workers::WorkerFatal;
use crate::{reaper, socket, spool, upload};

/// Everything the loop owns for the life of the process. Constructed once
/// by [`crate::lib::run`] after settings/logging/pidfile/directory-rights
/// setup has already completed.
pub struct EventLoop {
    inotify: Inotify,
    dump_watch: WatchDescriptor,
    upload_watch: Option<WatchDescriptor>,
    self_pipe_read: RawFd,
    listener: UnixListener,
    settings: Settings,
    bus: Arc<dyn Bus>,
    middleware: Arc<Mutex<dyn MiddleWare>>,
    counter: ClientCounter,
    roles: RoleMap,
    log_scanner_pid: Option<Pid>,
    syslog_mode: bool,
    idle_timeout: Option<Duration>,
    fatal_tx: Sender<WorkerFatal>,
    fatal_rx: Receiver<WorkerFatal>,
    exiting: bool,
}

impl EventLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        self_pipe_read: RawFd,
        listener: UnixListener,
        bus: Arc<dyn Bus>,
        middleware: Arc<Mutex<dyn MiddleWare>>,
        client_ceiling: usize,
        syslog_mode: bool,
        idle_timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)?;
        let dump_watch = inotify.add_watch(
            &settings.dump_root,
            AddWatchFlags::IN_CREATE | AddWatchFlags::IN_MOVED_TO,
        )?;
        let upload_watch = match &settings.watch_crashdump_archive_dir {
            Some(dir) => Some(inotify.add_watch(
                dir,
                AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_MOVED_TO,
            )?),
            None => None,
        };
        let (fatal_tx, fatal_rx) = channel();

        Ok(Self {
            inotify,
            dump_watch,
            upload_watch,
            self_pipe_read,
            listener,
            settings,
            bus,
            middleware,
            counter: ClientCounter::new(client_ceiling),
            roles: RoleMap::new(),
            log_scanner_pid: None,
            syslog_mode,
            idle_timeout,
            fatal_tx,
            fatal_rx,
            exiting: false,
        })
    }

    /// Forks `/bin/sh -c <cmd>` as the optional log scanner, if configured.
    /// Mirrors the source's `fork_execv_on_steroids` call right before
    /// entering the main loop.
    pub fn start_log_scanner(&mut self) -> anyhow::Result<()> {
        let Some(cmd) = self.settings.log_scanners.clone() else {
            return Ok(());
        };
        // Safety: single-threaded event loop; child execs immediately.
        match unsafe { fork() }? {
            ForkResult::Child => {
                let sh = std::ffi::CString::new("/bin/sh").unwrap();
                let dash_c = std::ffi::CString::new("-c").unwrap();
                let cmd_c = std::ffi::CString::new(cmd).unwrap_or_else(|_| {
                    std::process::exit(1);
                });
                let _ = execvp(&sh, &[sh.clone(), dash_c, cmd_c]);
                std::process::exit(1);
            }
            ForkResult::Parent { child } => {
                tracing::info!(pid = child.as_raw(), "started log scanner");
                self.log_scanner_pid = Some(child);
            }
        }
        Ok(())
    }

    /// A handle workers can use to report a fatal condition back to the
    /// loop. Cloned into each [`crate::workers::spawn_report_worker`] call.
    pub fn fatal_sender(&self) -> Sender<WorkerFatal> {
        self.fatal_tx.clone()
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub fn middleware(&self) -> Arc<Mutex<dyn MiddleWare>> {
        self.middleware.clone()
    }

    /// Runs until `SIGTERM`/`SIGINT`/`SIGALRM` sets `s_exiting`, or a worker
    /// reports a fatal condition.
    pub fn run(&mut self) {
        while !self.exiting {
            self.run_one_iteration();
        }
    }

    fn run_one_iteration(&mut self) {
        let listener_fd = self.listener.as_raw_fd();
        let poll_listener = !self.counter.listener_detached();

        let mut fds = vec![
            libc::pollfd {
                fd: self.self_pipe_read,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.inotify.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        if poll_listener {
            fds.push(libc::pollfd {
                fd: listener_fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }

        if let Some(timeout) = self.idle_timeout {
            // Safety: no preconditions; matches the source's bare alarm(2) use.
            unsafe { libc::alarm(timeout.as_secs() as libc::c_uint) };
        }
        let poll_result = poll_fds(&mut fds);
        if self.idle_timeout.is_some() {
            unsafe { libc::alarm(0) };
        }
        if let Err(e) = poll_result {
            tracing::warn!(error = %e, "poll failed");
            return;
        }

        if fds[0].revents & libc::POLLIN != 0 {
            self.dispatch_signals();
        }
        if self.exiting {
            return;
        }
        if fds[1].revents & libc::POLLIN != 0 {
            self.dispatch_inotify();
        }
        if poll_listener && fds.len() > 2 && fds[2].revents & libc::POLLIN != 0 {
            self.dispatch_listener();
        }
        self.drain_worker_faults();
    }

    fn dispatch_signals(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.self_pipe_read,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
            for &signo in &buf[..n as usize] {
                if signo as i32 == libc::SIGCHLD {
                    match reaper::drain_children(
                        &mut self.roles,
                        &mut self.counter,
                        &mut self.log_scanner_pid,
                    ) {
                        Ok(true) => tracing::info!("accepting connections again"),
                        Ok(false) => {}
                        Err(e) => tracing::warn!(error = %e, "failed to reap children"),
                    }
                } else {
                    tracing::info!(signal = signo as i32, "caught terminating signal");
                    self.exiting = true;
                }
            }
            if (n as usize) < buf.len() {
                break;
            }
        }
    }

    fn dispatch_inotify(&mut self) {
        let events = match self.inotify.read_events() {
            Ok(events) => events,
            Err(nix::Error::EAGAIN) => return,
            Err(e) => {
                tracing::warn!(error = %e, "error reading inotify fd");
                return;
            }
        };
        for event in events {
            let Some(name) = event.name else { continue };
            if Some(event.wd) == self.upload_watch {
                if event.mask.contains(AddWatchFlags::IN_ISDIR) {
                    continue;
                }
                let Some(upload_dir) = self.settings.watch_crashdump_archive_dir.clone() else {
                    continue;
                };
                match upload::handle_event(&self.settings.dump_root, &upload_dir, &name, &mut self.roles) {
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "upload watcher dispatch failed"),
                }
                continue;
            }
            if event.wd == self.dump_watch {
                if !event.mask.contains(AddWatchFlags::IN_ISDIR) {
                    continue;
                }
                let middleware = self.middleware.clone();
                let mw = middleware.lock().unwrap();
                spool::handle_arrival(
                    &self.settings.dump_root,
                    &name,
                    self.settings.max_crash_reports_size_mib,
                    self.bus.as_ref(),
                    &*mw,
                );
            }
        }
    }

    fn dispatch_listener(&mut self) {
        match socket::accept_one(&self.listener, &mut self.counter, &mut self.roles, self.syslog_mode) {
            Ok(socket::AcceptOutcome::Accepted(_)) | Ok(socket::AcceptOutcome::WouldBlock) => {}
            Ok(socket::AcceptOutcome::Detach) => {
                // Nothing further to do: `run_one_iteration` re-reads
                // `counter.listener_detached()` on its next pass and simply
                // stops polling the listener fd until the reaper re-arms it.
            }
            Err(e) => tracing::warn!(error = %e, "socket accept failed"),
        }
    }

    fn drain_worker_faults(&mut self) {
        while let Ok(fault) = self.fatal_rx.try_recv() {
            debug_assert!(fault.error.is_fatal(), "only Fatal conditions reach fatal_tx");
            tracing::error!(peer = %fault.peer, reason = %fault.error, "worker reported a fatal condition");
            self.exiting = true;
        }
    }

    /// Sends `SIGTERM` to the log scanner, if one is running. Called during
    /// teardown, after the loop has returned.
    pub fn terminate_log_scanner(&self) {
        if let Some(pid) = self.log_scanner_pid {
            tracing::info!(pid = pid.as_raw(), "sending SIGTERM to log scanner");
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        }
    }

    pub fn dump_root(&self) -> PathBuf {
        self.settings.dump_root.clone()
    }
}

/// Blocks on `fds` until one is readable, mirroring `wait_for_pollhup`'s raw
/// `libc::poll` idiom generalized to several fds instead of one. `EINTR` is
/// treated as a benign zero-event wakeup (a caught signal already woke the
/// self-pipe reader, nothing else to do); any other negative return or an
/// error condition on a watched fd (`POLLERR`/`POLLHUP`/`POLLNVAL`, none of
/// which this daemon's long-lived fds should ever show) is reported back.
fn poll_fds(fds: &mut [libc::pollfd]) -> Result<(), PollError> {
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
    if rc < 0 {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        if errno == libc::EINTR {
            return Ok(());
        }
        return Err(PollError::PollError(errno));
    }
    for pfd in fds.iter() {
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(PollError::UnexpectedResult(pfd.revents));
        }
    }
    Ok(())
}
