// SPDX-License-Identifier: GPL-2.0-or-later

//! Paths, sizes and timeouts shared across the daemon. Kept in one place the
//! way a config header would be in a C codebase, so that every module that
//! cares about `/var/run/abrt` agrees on the spelling.

use std::time::Duration;

/// Pidfile path. Text, `"<pid>\n"`, advisory-locked.
pub const PIDFILE_PATH: &str = "/var/run/abrtd.pid";

/// Local socket path clients connect to in order to hand us a dump.
pub const SOCKET_PATH: &str = "/var/run/abrt/abrt.socket";

/// Mode the socket is chmod'd to after bind. World-writable by design: any
/// local user may report a crash.
pub const SOCKET_PERMISSIONS: u32 = 0o666;

/// Directory the pidfile/socket live under; created with 0755 if missing.
pub const VAR_RUN_ABRT_DIR: &str = "/var/run/abrt";

/// Root of the crash-dump spool.
pub const DEBUG_DUMPS_DIR: &str = "/var/spool/abrt";

/// Mode the spool root and debuginfo cache are sanitized to at startup.
pub const DUMP_DIR_MODE: u32 = 0o755;

/// Maximum number of concurrently accepted socket clients; also the listen backlog.
pub const MAX_CLIENT_COUNT: usize = 10;

/// Oops-queue capacity. Insertions past this are silently dropped.
pub const MAX_OOPS: usize = 16;

/// Emitted oops records shorter than this many bytes are not reported.
pub const MIN_OOPS_LEN: usize = 100;

/// Line-array growth chunk used by the extractor's tokenization pass.
pub const LINE_ARRAY_CHUNK: usize = 1000;

/// Lines since `oops_start` after which a candidate is abandoned outright.
pub const BAILOUT_MAX_AGE_LINES: usize = 50;

/// Lines since `oops_start` without entering a backtrace after which a
/// candidate is abandoned.
pub const BAILOUT_MAX_PRE_BACKTRACE_LINES: usize = 30;

/// Lookahead window for `"---[ end trace"` right after a start trigger.
pub const END_TRACE_LOOKAHEAD_LINES: usize = 50;

/// Sentinel kernel version used when none could be extracted.
pub const UNDEFINED_KERNEL_VERSION: &str = "undefined";

/// Default idle-reap timeout for a non-blocking child wait loop.
pub const DEFAULT_REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Environment variable carrying the verbosity level to re-export to children.
pub const ENV_ABRT_VERBOSE: &str = "ABRT_VERBOSE";

/// Environment variable marking syslog mode, re-exported to children.
pub const ENV_ABRT_SYSLOG: &str = "ABRT_SYSLOG";

/// Fallback `PATH` set when the environment doesn't provide one (e.g. when
/// started by a bus activation daemon that only sets its own variables).
pub const FALLBACK_PATH: &str = "/usr/sbin:/usr/bin:/sbin:/bin";

/// Single-shot helper that ingests one connection from the socket listener.
pub const ABRT_SERVER_HELPER: &str = "abrt-server";

/// Single-shot helper that ingests one finished upload archive.
pub const ABRT_HANDLE_UPLOAD_HELPER: &str = "abrt-handle-upload";
