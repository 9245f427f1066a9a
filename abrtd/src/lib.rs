// SPDX-License-Identifier: GPL-2.0-or-later

//! Crate root.
//!
//! [`run`] performs the startup sequence from `SPEC_FULL.md` §4.H (load
//! settings → sanitize directory permissions → construct the event
//! loop's sources → register the self-pipe → lock the pidfile → bind the
//! socket → bring up the Bus) and then hands control to the event loop
//! until `SIGTERM`/`SIGINT`/`SIGALRM`. Every step that acquires a
//! resource records it in [`Startup`] so a failure partway through only
//! unwinds what actually completed, in reverse order.
//!
//! [`crate::bus::Bus`] and [`crate::middleware::MiddleWare`] are external
//! collaborators per spec.md §1; the concrete transports wired in here
//! ([`bus::LoggingBus`], [`middleware::InMemoryMiddleWare`]) are the
//! in-crate stand-ins used when no real D-Bus/database backend is
//! plugged in, and are good enough to run the daemon core standalone.

pub mod bus;
pub mod cli;
pub mod constants;
pub mod daemonize;
pub mod dumpdir;
pub mod error;
pub mod event_loop;
pub mod exechelper;
pub mod extractor;
pub mod logging;
pub mod middleware;
pub mod model;
pub mod pidfile;
pub mod reaper;
pub mod settings;
pub mod signals;
pub mod socket;
pub mod spool;
pub mod upload;
pub mod workers;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};

use bus::LoggingBus;
use cli::Cli;
use constants::{DUMP_DIR_MODE, MAX_CLIENT_COUNT, PIDFILE_PATH, SOCKET_PATH, VAR_RUN_ABRT_DIR};
use event_loop::EventLoop;
use logging::{LogSink, SyslogSink};
use middleware::{InMemoryMiddleWare, MiddleWare};
use pidfile::PidFile;
use settings::Settings;
use signals::SelfPipe;

/// Resources acquired during startup, torn down in reverse order whether
/// the daemon shuts down cleanly or startup aborts partway through.
/// Fields are populated only once their step actually succeeded.
struct Startup {
    self_pipe: Option<SelfPipe>,
    socket_path: Option<PathBuf>,
    pidfile: Option<PidFile>,
    pidfile_path: Option<PathBuf>,
}

impl Startup {
    fn empty() -> Self {
        Self {
            self_pipe: None,
            socket_path: None,
            pidfile: None,
            pidfile_path: None,
        }
    }
}

impl Drop for Startup {
    fn drop(&mut self) {
        // Reverse of acquisition order: pidfile, then socket file, then
        // self-pipe. The pidfile's advisory lock is released implicitly
        // when its fd closes, but the file itself is only removed here.
        drop(self.pidfile.take());
        if let Some(path) = self.pidfile_path.take() {
            PidFile::remove(&path);
        }
        if let Some(path) = self.socket_path.take() {
            let _ = std::fs::remove_file(path);
        }
        if let Some(pipe) = self.self_pipe.take() {
            pipe.close();
        }
    }
}

fn sanitize_dir(path: &Path, mode: u32) -> anyhow::Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("can't create directory {path:?}"))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("can't chmod {path:?} to {mode:o}"))?;
    Ok(())
}

/// Runs the daemon to completion. The caller has already parsed `cli`
/// (see `src/bin/abrtd.rs`) so tests can drive startup without going
/// through `std::env::args`. Returns the process exit code on clean
/// shutdown (always `0`, per spec.md §6 — the only way out of
/// [`event_loop::EventLoop::run`] is `s_exiting`, which is always set by
/// an orderly termination signal).
pub fn run(cli: Cli) -> anyhow::Result<i32> {
    if !daemonize::running_as_root() {
        bail!("must be run as root");
    }

    let settings = Settings::load(cli.config.as_deref()).context("invalid settings")?;

    let parent = if cli.foreground {
        None
    } else {
        Some(daemonize::daemonize().context("daemonize failed")?)
    };

    let result = run_daemonized(&cli, settings);

    // Only reached in the daemonized child (or directly, in foreground
    // mode); `daemonize()`'s parent branch never returns from that call.
    if let Some(parent) = parent {
        match &result {
            Ok(_) => daemonize::signal_parent_success(parent),
            Err(_) => daemonize::signal_parent_failure(parent),
        }
    }

    result
}

fn run_daemonized(cli: &Cli, settings: Settings) -> anyhow::Result<i32> {
    exechelper::export_daemon_env(cli.verbose, cli.syslog);

    let mirror: Option<Box<dyn LogSink>> = if cli.syslog || !cli.foreground {
        Some(Box::new(SyslogSink::open("abrtd")))
    } else {
        None
    };
    logging::init(cli.verbose, mirror);

    let mut startup = Startup::empty();

    sanitize_dir(&settings.dump_root, DUMP_DIR_MODE)
        .context("can't sanitize dump spool directory")?;
    sanitize_dir(Path::new(VAR_RUN_ABRT_DIR), DUMP_DIR_MODE)
        .context("can't sanitize /var/run/abrt")?;

    let self_pipe =
        signals::install(cli.idle_timeout.is_some()).context("can't install signal self-pipe")?;
    let self_pipe_read = self_pipe.read_fd;
    startup.self_pipe = Some(self_pipe);

    let socket_path = PathBuf::from(SOCKET_PATH);
    let listener = socket::bind_listener(&socket_path, MAX_CLIENT_COUNT as i32)
        .context("can't bind listener socket")?;
    startup.socket_path = Some(socket_path);

    let pidfile_path = PathBuf::from(PIDFILE_PATH);
    let pidfile =
        PidFile::create(&pidfile_path).context("another instance is already running")?;
    startup.pidfile = Some(pidfile);
    startup.pidfile_path = Some(pidfile_path);

    // "Bringing up the Bus" is a no-op for the in-crate LoggingBus/
    // InMemoryMiddleWare stand-ins: neither opens a connection, so there
    // is nothing to sequence last beyond constructing them here, right
    // before the event loop that will call into them.
    let bus = Arc::new(LoggingBus::new());
    let middleware: Arc<Mutex<dyn MiddleWare>> = Arc::new(Mutex::new(InMemoryMiddleWare::new()));

    let mut event_loop = EventLoop::new(
        settings,
        self_pipe_read,
        listener,
        bus,
        middleware,
        MAX_CLIENT_COUNT,
        cli.syslog,
        cli.idle_timeout.map(Duration::from_secs),
    )
    .context("can't construct event loop")?;

    event_loop
        .start_log_scanner()
        .context("can't start log scanner")?;

    // Only now do we want the signal pipe to actually wake the poll loop;
    // signals caught during the steps above are still observable via
    // `signals::last_caught` but don't queue up bytes nobody is reading.
    if let Some(pipe) = &startup.self_pipe {
        pipe.arm();
    }

    tracing::info!(dump_root = %event_loop.dump_root().display(), "abrtd started");
    event_loop.run();
    event_loop.terminate_log_scanner();
    tracing::info!("abrtd exiting");

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_dir_creates_missing_directory_with_mode() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("spool");
        sanitize_dir(&target, 0o755).unwrap();
        let meta = std::fs::metadata(&target).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn startup_drop_is_idempotent_on_empty_state() {
        // Guards against a panic-on-drop if no step ever completed, e.g.
        // `Settings::load` failing before `Startup` is even constructed
        // in `run_daemonized` -- this exercises the all-`None` case.
        drop(Startup::empty());
    }
}
