// SPDX-License-Identifier: GPL-2.0-or-later

//! Shared argv/envp preparation for the one-shot helpers this daemon forks
//! (`abrt-server`, `abrt-handle-upload`). Grounded on `ddcommon`'s
//! `PreparedExecve`: build every `CString` up front so the post-fork child
//! only has to call `execvp`, never allocate.

use std::ffi::CString;

use nix::unistd::execvp;

use crate::constants::{ENV_ABRT_SYSLOG, ENV_ABRT_VERBOSE, FALLBACK_PATH};

/// Never-constructible type used as the `Ok` payload of [`exec_helper`]:
/// a successful `execvp` never returns, so there is nothing to hand back.
pub enum Never {}

/// Execs `program` (searched on `PATH`) with `args` as argv (argv[0] is
/// `program`'s basename by convention; callers pass it explicitly as
/// `args[0]`). Returns `Err` only if `execvp` itself failed to replace the
/// process image.
pub fn exec_helper(program: &str, args: &[String]) -> Result<Never, nix::Error> {
    let program_c = CString::new(program).expect("helper program name has no NUL bytes");
    let args_c: Vec<CString> = args
        .iter()
        .map(|a| CString::new(a.as_str()).expect("helper argv has no NUL bytes"))
        .collect();
    execvp(&program_c, &args_c)?;
    unreachable!("execvp only returns on error")
}

/// Re-exports `ABRT_VERBOSE`/`ABRT_SYSLOG` into the child's environment the
/// way the source's `main` does with `putenv`, before forking helpers.
/// Also ensures `PATH` is set, so `execvp`'s search in [`exec_helper`]
/// has somewhere to look when the daemon was launched with a stripped
/// environment (spec.md §6, Environment).
pub fn export_daemon_env(verbose: u8, syslog: bool) {
    std::env::set_var(ENV_ABRT_VERBOSE, verbose.to_string());
    if syslog {
        std::env::set_var(ENV_ABRT_SYSLOG, "1");
    }
    if std::env::var_os("PATH").is_none() {
        std::env::set_var("PATH", FALLBACK_PATH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `std::env` is process-global; serialize the two tests that touch PATH.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_path_is_set_to_fallback() {
        let _guard = ENV_LOCK.lock().unwrap();
        let saved = std::env::var_os("PATH");
        std::env::remove_var("PATH");
        export_daemon_env(0, false);
        assert_eq!(std::env::var("PATH").unwrap(), FALLBACK_PATH);
        match saved {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
    }

    #[test]
    fn existing_path_is_left_untouched() {
        let _guard = ENV_LOCK.lock().unwrap();
        let saved = std::env::var_os("PATH");
        std::env::set_var("PATH", "/custom/bin");
        export_daemon_env(0, false);
        assert_eq!(std::env::var("PATH").unwrap(), "/custom/bin");
        match saved {
            Some(path) => std::env::set_var("PATH", path),
            None => std::env::remove_var("PATH"),
        }
    }
}
