// SPDX-License-Identifier: GPL-2.0-or-later

//! Binary entry point: parse the command line and hand off to
//! `abrtd::run`. Exit codes follow spec.md §6: `0` on clean shutdown,
//! non-zero with a diagnostic on stderr for any startup failure.

use clap::Parser;

fn main() {
    let cli = abrtd::cli::Cli::parse();
    match abrtd::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("abrtd: {e:#}");
            std::process::exit(1);
        }
    }
}
