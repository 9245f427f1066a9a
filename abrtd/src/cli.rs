// SPDX-License-Identifier: GPL-2.0-or-later

//! CLI Surface (component K).
//!
//! A thin structured front end over the same four flags and one value
//! option the source's hand-rolled option parser recognized. Grounded on
//! the `clap::Parser` derive usage in the profiling validator binary:
//! one flat struct, doc comments become `--help` text, no subcommands.

use std::path::PathBuf;

use clap::Parser;

/// Crash-capture daemon: watches for kernel oopses and user-space crash
/// dumps, dedupes them, and announces them to subscribers.
#[derive(Debug, Parser)]
#[command(name = "abrtd", version)]
pub struct Cli {
    /// Increase logging verbosity. Repeatable; each occurrence lowers the
    /// effective filter level by one step (WARN -> INFO -> DEBUG -> TRACE).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'd')]
    pub foreground: bool,

    /// Force syslog logging even in foreground mode.
    #[arg(short = 's')]
    pub syslog: bool,

    /// Terminate after N seconds of inactivity (delivered via SIGALRM).
    #[arg(short = 't', value_name = "SECONDS")]
    pub idle_timeout: Option<u64>,

    /// Optional path to a settings file (JSON); falls back to built-in
    /// defaults when omitted.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_v_flags_count() {
        let cli = Cli::parse_from(["abrtd", "-vvv"]);
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn defaults_are_foreground_off_and_no_timeout() {
        let cli = Cli::parse_from(["abrtd"]);
        assert!(!cli.foreground);
        assert!(!cli.syslog);
        assert_eq!(cli.idle_timeout, None);
    }

    #[test]
    fn idle_timeout_parses_as_seconds() {
        let cli = Cli::parse_from(["abrtd", "-t", "30"]);
        assert_eq!(cli.idle_timeout, Some(30));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["abrtd", "--bogus"]).is_err());
    }
}
