// SPDX-License-Identifier: GPL-2.0-or-later

//! Upload Watcher (component C).
//!
//! Reacts to inotify events on the optional archive-upload directory: for
//! each finished file, forks, `chdir`s into the upload directory, and execs
//! `abrt-handle-upload`. Grounded on `Daemon.cpp::handle_inotify_cb`'s
//! upload-dir half.

use std::ffi::OsStr;
use std::path::Path;

use anyhow::Context;
use nix::unistd::{chdir, fork, ForkResult, Pid};

use crate::constants::ABRT_HANDLE_UPLOAD_HELPER;
use crate::model::{Role, RoleMap};

/// `true` if `name`'s extension (the part after the last `.`) is
/// `"working"` — the uploader's in-progress convention.
fn is_in_progress_name(name: &OsStr) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == "working")
}

/// Handles one finished-upload file event: forks a helper that `chdir`s
/// into `upload_dir` and execs `abrt-handle-upload dump_root upload_dir
/// name`. Returns the forked pid (tagged [`Role::UploadHelper`] in `roles`)
/// or `None` if the event should be ignored.
pub fn handle_event(
    dump_root: &Path,
    upload_dir: &Path,
    name: &OsStr,
    roles: &mut RoleMap,
) -> anyhow::Result<Option<Pid>> {
    if is_in_progress_name(name) {
        return Ok(None);
    }
    tracing::info!(
        name = %name.to_string_lossy(),
        dir = %upload_dir.display(),
        "detected creation of file in upload directory"
    );

    // Safety: single-threaded event loop; the child execs immediately.
    match unsafe { fork() }.context("fork for upload helper failed")? {
        ForkResult::Child => run_helper_child(dump_root, upload_dir, name),
        ForkResult::Parent { child } => {
            roles.insert(child, Role::UploadHelper);
            Ok(Some(child))
        }
    }
}

fn run_helper_child(dump_root: &Path, upload_dir: &Path, name: &OsStr) -> ! {
    if chdir(upload_dir).is_err() {
        std::process::exit(1);
    }
    let args = [
        ABRT_HANDLE_UPLOAD_HELPER.to_string(),
        dump_root.to_string_lossy().into_owned(),
        upload_dir.to_string_lossy().into_owned(),
        name.to_string_lossy().into_owned(),
    ];
    match crate::exechelper::exec_helper(ABRT_HANDLE_UPLOAD_HELPER, &args) {
        Ok(never) => match never {},
        Err(e) => {
            eprintln!("can't execute '{ABRT_HANDLE_UPLOAD_HELPER}': {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_extension_is_ignored() {
        assert!(is_in_progress_name(OsStr::new("archive.tar.gz.working")));
        assert!(!is_in_progress_name(OsStr::new("archive.tar.gz")));
        assert!(!is_in_progress_name(OsStr::new("no_extension")));
    }
}
