// SPDX-License-Identifier: GPL-2.0-or-later

//! Error taxonomy for the daemon core.
//!
//! `DaemonError` classifies conditions the way the component design table
//! does: most variants are caught and logged by the component that raised
//! them, and only [`DaemonError::Fatal`] is allowed to propagate out of a
//! dispatch callback into the event loop.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("recoverable OS error in {component}: {source}")]
    RecoverableOps {
        component: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted dump directory {dir}: {reason}")]
    DumpCorrupted { dir: PathBuf, reason: String },

    #[error("duplicate dump directory {dir}, original at {original}")]
    DuplicateDump { dir: PathBuf, original: PathBuf },

    #[error("admission denied: client counter at ceiling")]
    AdmissionDenied,

    #[error("quota exceeded: spool over {limit_mib} MiB")]
    QuotaExceeded { limit_mib: u64 },
}

impl DaemonError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaemonError::Fatal(_))
    }
}

/// Non-blocking child reap failures, mirroring the teacher's own reap
/// helper. The teacher's `reap_child_non_blocking` also has a `Timeout`
/// variant for its wall-clock-bounded wait; this daemon's reaper only ever
/// drains with `WNOHANG` off a `SIGCHLD` wakeup, so there is nothing to time
/// out on and that variant has no counterpart here.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReapError {
    #[error("error waiting for child process to exit: {0}")]
    WaitError(#[from] nix::Error),
}

/// Errors from the raw `poll()`-based wait used by the event loop and by
/// listener-socket readiness checks.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PollError {
    #[error("poll failed with errno: {0}")]
    PollError(i32),
    #[error("poll returned unexpected result: revents = {0}")]
    UnexpectedResult(i16),
}

/// Settings validation failures; always `Fatal` per the error-handling design.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("dump_root must be an absolute path, got {0:?}")]
    DumpRootNotAbsolute(PathBuf),
    #[error("watch_crashdump_archive_dir must differ from dump_root")]
    WatchDirSameAsDumpRoot,
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
