// SPDX-License-Identifier: GPL-2.0-or-later

//! Advisory-locked pidfile, marking the territory so a second instance
//! refuses to start rather than fighting the first one over the socket.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use nix::fcntl::{Flock, FlockArg};

/// A locked pidfile. Holding one open for the life of the process is the
/// lock; there is nothing to poll or refresh. Intentionally leaks its fd on
/// drop into the OS picture the way the source does — closing it would
/// release the lock before the process actually exits.
pub struct PidFile {
    _file: Flock<std::fs::File>,
}

impl PidFile {
    /// Creates (or reuses a stale) pidfile at `path`, takes an exclusive
    /// advisory lock, and writes the current pid into it.
    ///
    /// No `O_EXCL`: a pidfile left behind by an unclean shutdown is
    /// harmless to reopen. No `O_TRUNC`: if the lock fails because another
    /// instance holds it, truncating first would have erased its pid.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("can't open pidfile {path:?}"))?;

        let mut file = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|(_, errno)| anyhow::anyhow!("can't lock pidfile {path:?}: {errno}"))?;

        let contents = format!("{}\n", std::process::id());
        file.set_len(0)
            .with_context(|| format!("can't truncate pidfile {path:?}"))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("can't write pidfile {path:?}"))?;

        Ok(Self { _file: file })
    }

    /// Removes the pidfile from disk. Called only after a fully-completed
    /// startup; a partially-completed one never reaches here.
    pub fn remove(path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abrtd.pid");
        let _guard = PidFile::create(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn second_lock_attempt_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abrtd.pid");
        let _first = PidFile::create(&path).unwrap();
        assert!(PidFile::create(&path).is_err());
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abrtd.pid");
        let guard = PidFile::create(&path).unwrap();
        drop(guard);
        PidFile::remove(&path);
        assert!(!path.exists());
    }
}
