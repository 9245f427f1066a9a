// SPDX-License-Identifier: GPL-2.0-or-later

//! Kernel-oops extractor.
//!
//! Recovers self-contained oops reports (plus a best-effort kernel version)
//! out of an arbitrary slab of kernel ring-buffer or syslog-framed text.
//! Byte-oriented throughout: the input is not assumed to be valid UTF-8,
//! only the emitted record text is lossily converted for display.
//!
//! The tokenization and recognition passes below mirror a known-good C
//! implementation line for line, with two deliberate behavioral changes
//! recorded in `DESIGN.md`: `extract_version` always null-terminates (moot
//! in Rust — there is no fixed-width byte copy to begin with), and the
//! runaway-candidate bailout applies uniformly regardless of where the
//! candidate starts, rather than special-casing index 0.

use crate::constants::{
    BAILOUT_MAX_AGE_LINES, BAILOUT_MAX_PRE_BACKTRACE_LINES, END_TRACE_LOOKAHEAD_LINES,
    LINE_ARRAY_CHUNK, MIN_OOPS_LEN, UNDEFINED_KERNEL_VERSION,
};
use crate::model::{LogLine, OopsQueue, OopsRecord};

#[derive(Clone, Copy, PartialEq, Eq)]
enum SyslogFormat {
    Maybe,
    Yes,
    No,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return if needle.is_empty() { Some(0) } else { None };
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// First-line heuristic: does this line open with `"Mmm DD HH:MM:SS"`?
fn looks_like_syslog_timestamp(line: &[u8]) -> bool {
    const TEMPLATE_LEN: usize = 15; // "Jul  4 11:11:41"
    if line.len() <= TEMPLATE_LEN + 1 {
        return false;
    }
    let digit = |i: usize| line[i].is_ascii_digit();
    line[3] == b' '
        && line[6] == b' '
        && line[9] == b':'
        && line[12] == b':'
        && digit(5)
        && digit(7)
        && digit(8)
        && digit(10)
        && digit(11)
        && digit(13)
        && digit(14)
}

/// Skips a syslog line to the payload after the third `':'` (the one
/// terminating `"... kernel:"` or `"... abrt:"`), or returns `None` if the
/// line is not kernel-tagged and should be ignored entirely.
fn skip_syslog_header(line_start: usize, line_end: usize, buf: &[u8]) -> Option<usize> {
    let line = &buf[line_start..line_end];
    if !contains(line, b"kernel:") && !contains(line, b"abrt:") {
        return None;
    }
    let mut c = line_start;
    for _ in 0..3 {
        let rel = buf[c..line_end].iter().position(|&b| b == b':')?;
        c += rel + 1;
    }
    c += 1; // the space after "kernel:"/"abrt:"
    if c > line_end {
        return None;
    }
    Some(c)
}

/// Tokenizes `buf` into a flat array of [`LogLine`]s, applying syslog-header
/// stripping, kernel-level-prefix stripping, jiffies-stamp stripping, and
/// the `"Abrt"` replay-marker reset.
fn tokenize(buf: &[u8]) -> Vec<LogLine<'_>> {
    let n = buf.len();
    let mut lines: Vec<LogLine> = Vec::with_capacity(LINE_ARRAY_CHUNK);
    let mut syslog_format = SyslogFormat::Maybe;

    let mut pos = 0usize;
    while pos < n {
        let nl = buf[pos..n]
            .iter()
            .position(|&b| b == b'\n')
            .map(|off| pos + off)
            .unwrap_or(n - 1);
        let line_end = nl;
        let mut start = pos;

        let mut skip_line = false;
        match syslog_format {
            SyslogFormat::Yes => match skip_syslog_header(start, line_end, buf) {
                Some(payload_start) => start = payload_start,
                None => skip_line = true,
            },
            SyslogFormat::Maybe => {
                if looks_like_syslog_timestamp(&buf[start..line_end]) {
                    syslog_format = SyslogFormat::Yes;
                    match skip_syslog_header(start, line_end, buf) {
                        Some(payload_start) => start = payload_start,
                        None => skip_line = true,
                    }
                } else if line_end > start {
                    syslog_format = SyslogFormat::No;
                }
            }
            SyslogFormat::No => {}
        }

        if !skip_line {
            let mut c = start;
            let mut level = 0u8;
            if line_end - c >= 3 && buf[c] == b'<' && buf[c + 2] == b'>' {
                level = buf[c + 1];
                c += 3;
            }
            if c < line_end && buf[c] == b'[' {
                let window = &buf[c..line_end];
                let dot = window.iter().position(|&b| b == b'.');
                let rb = window.iter().position(|&b| b == b']');
                if let (Some(dot), Some(rb)) = (dot, rb) {
                    if dot < rb && rb < 14 && dot < 8 {
                        c += rb + 1;
                        if c < line_end && buf[c] == b' ' {
                            c += 1;
                        }
                    }
                }
            }

            let payload = &buf[c..line_end];
            if payload.len() >= 4 && contains(payload, b"Abrt") {
                lines.clear();
            }
            if lines.len() == lines.capacity() {
                lines.reserve(LINE_ARRAY_CHUNK);
            }
            lines.push(LogLine { payload, level });
        }

        pos = nl + 1;
    }
    lines
}

/// Start-of-oops trigger substrings, in source order.
const START_TRIGGERS: &[&[u8]] = &[
    b"general protection fault:",
    b"BUG:",
    b"kernel BUG at",
    b"do_IRQ: stack overflow:",
    b"RTNL: assertion failed",
    b"Eeek! page_mapcount(page) went negative!",
    b"near stack overflow (cur:",
    b"double fault:",
    b"Badness at",
    b"NETDEV WATCHDOG",
    b"Unable to handle kernel",
    b"sysctl table check failed",
    b"------------[ cut here ]------------",
    b"list_del corruption.",
    b"list_add corruption.",
];

fn extract_version(line: &[u8]) -> Option<String> {
    let has_marker = contains(line, b"Pid")
        || contains(line, b"comm")
        || contains(line, b"CPU")
        || contains(line, b"REGS")
        || contains(line, b"EFLAGS");
    if !has_marker {
        return None;
    }
    let start = find(line, b"2.6.")?;
    let rest = &line[start..];
    let end = rest.iter().position(|&b| b == b' ').unwrap_or(rest.len());
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

fn close_oops(lines: &[LogLine], start: i64, end_inclusive: i64, queue: &mut OopsQueue) {
    if queue.is_full() || start < 0 || end_inclusive < start {
        return;
    }
    let mut text = String::new();
    let mut version: Option<String> = None;
    for line in &lines[start as usize..=end_inclusive as usize] {
        if version.is_none() {
            version = extract_version(line.payload);
        }
        text.push_str(&String::from_utf8_lossy(line.payload));
        text.push('\n');
    }
    if text.len() > MIN_OOPS_LEN {
        queue.push(OopsRecord {
            text,
            kernel_version: version.unwrap_or_else(|| UNDEFINED_KERNEL_VERSION.to_string()),
        });
    }
}

/// Walks the tokenized line array and emits oops records into `queue`.
fn recognize(lines: &[LogLine], queue: &mut OopsQueue) {
    let linecount = lines.len() as i64;
    let mut prevlevel: u8 = 0;
    let mut oopsstart: i64 = -1;
    let mut oopsend: i64 = linecount;
    let mut inbacktrace = false;
    let mut i: i64 = 0;

    while i < linecount {
        if oopsstart < 0 {
            let line = lines[i as usize].payload;
            let has_warning = contains(line, b"WARNING:")
                && !contains(line, b"appears to be on the same physical disk");
            if START_TRIGGERS.iter().any(|t| contains(line, t)) || has_warning {
                oopsstart = i;
            }
            if contains(line, b"Oops:") && i >= 3 {
                oopsstart = i - 3;
            }

            if oopsstart >= 0 {
                let mut i2 = i + 1;
                while i2 < linecount && i2 < i + END_TRACE_LOOKAHEAD_LINES as i64 {
                    if contains(lines[i2 as usize].payload, b"---[ end trace") {
                        inbacktrace = true;
                        i = i2;
                        break;
                    }
                    i2 += 1;
                }
            }
        }

        if oopsstart >= 0 {
            let idx = i as usize;
            let line = lines[idx].payload;
            if contains(line, b"Call Trace:") {
                inbacktrace = true;
            } else if !inbacktrace && line.len() > 8 {
                let leads_with_frame = line.len() >= 3
                    && line[0] == b' '
                    && line[1] == b'['
                    && line[2] == b'<'
                    && find(line, b">]").is_some()
                    && find(line, b"+0x").is_some()
                    && find(line, b"/0x").is_some();
                if leads_with_frame {
                    inbacktrace = true;
                }
            } else if inbacktrace {
                let c2 = line.first().copied().unwrap_or(0);
                let c3 = line.get(1).copied().unwrap_or(0);
                if (c2 != b' ' || c3 != b'[')
                    && !contains(line, b"] [")
                    && !contains(line, b"--- Exception")
                    && !contains(line, b"    LR =")
                    && !contains(line, b"<#DF>")
                    && !contains(line, b"<IRQ>")
                    && !contains(line, b"<EOI>")
                    && !contains(line, b"<<EOE>>")
                {
                    oopsend = i - 1;
                }
                if line.len() < 8 {
                    oopsend = i - 1;
                }
                if lines[idx].level != prevlevel {
                    oopsend = i - 1;
                }
                if contains(line, b"Code:") {
                    oopsend = i;
                }
                if contains(line, b"Instruction dump::") {
                    oopsend = i;
                }
                if contains(line, b"WARNING:") && oopsstart != i {
                    oopsend = i - 1;
                }
                if contains(line, b"Unable to handle") && oopsstart != i {
                    oopsend = i - 1;
                }
                if contains(line, b"---[ end trace") {
                    oopsend = i;
                }

                if oopsend <= i {
                    close_oops(lines, oopsstart, oopsend, queue);
                    oopsstart = -1;
                    inbacktrace = false;
                    oopsend = linecount;
                }
            }
        }
        prevlevel = lines[i as usize].level;

        i += 1;
        if oopsstart >= 0 && i - oopsstart > BAILOUT_MAX_AGE_LINES as i64 {
            oopsstart = -1;
            inbacktrace = false;
            oopsend = linecount;
        }
        if oopsstart >= 0 && !inbacktrace && i - oopsstart > BAILOUT_MAX_PRE_BACKTRACE_LINES as i64
        {
            oopsstart = -1;
            inbacktrace = false;
            oopsend = linecount;
        }
    }

    if oopsstart >= 0 {
        close_oops(lines, oopsstart, linecount - 1, queue);
    }
}

/// Extracts zero or more oops records from `buf`, forcing a trailing `'\n'`
/// onto the buffer as the tokenizer requires.
pub fn extract_oops(buf: &mut [u8]) -> OopsQueue {
    let mut queue = OopsQueue::new();
    let n = buf.len();
    if n == 0 {
        return queue;
    }
    buf[n - 1] = b'\n';
    let lines = tokenize(buf);
    recognize(&lines, &mut queue);
    queue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oops_text() -> String {
        concat!(
            "<4>------------[ cut here ]------------\n",
            "<4>WARNING: at fs/x.c:42 foo+0x10/0x20()\n",
            "<4>CPU: 0 PID: 1 Comm: init 2.6.31.5\n",
            "<4>Call Trace:\n",
            "<4> [<c0100000>] foo+0x10/0x20\n",
            "<4> [<c0100100>] bar+0x0/0x10\n",
            "<4>---[ end trace abc ]---\n",
        )
        .to_string()
    }

    #[test]
    fn bare_dmesg_single_oops() {
        let mut buf = oops_text().into_bytes();
        let queue = extract_oops(&mut buf);
        assert_eq!(queue.len(), 1);
        let record = queue.iter().next().unwrap();
        assert_eq!(record.kernel_version, "2.6.31.5");
        assert!(record.text.len() > 100);
        assert!(record.text.ends_with('\n'));
    }

    #[test]
    fn syslog_framed_matches_bare() {
        let framed: String = oops_text()
            .lines()
            .map(|l| format!("Jul  4 11:11:41 host kernel: {l}\n"))
            .collect();
        let mut buf = framed.into_bytes();
        let queue = extract_oops(&mut buf);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().kernel_version, "2.6.31.5");
    }

    #[test]
    fn two_oopses_split_on_code_line() {
        let mut text = String::new();
        text.push_str("<4>------------[ cut here ]------------\n");
        text.push_str("<4>WARNING: at fs/x.c:42 foo+0x10/0x20()\n");
        text.push_str("<4>CPU: 0 PID: 1 Comm: init 2.6.31.5\n");
        text.push_str("<4>Call Trace:\n");
        text.push_str("<4> [<c0100000>] foo+0x10/0x20\n");
        text.push_str("<4> [<c0100100>] bar+0x0/0x10\n");
        text.push_str("<4>Code: 00 11 22 33 44 55 66 77 88 99 aa bb cc dd ee ff\n");
        text.push_str(&oops_text());
        let mut buf = text.into_bytes();
        let queue = extract_oops(&mut buf);
        assert_eq!(queue.len(), 2, "first oops ends at Code:, second is independent");
    }

    #[test]
    fn abrt_marker_discards_replayed_oops() {
        let mut text = String::from("Abrt: submitted oops above\n");
        text.push_str(&oops_text());
        let mut buf = text.into_bytes();
        let queue = extract_oops(&mut buf);
        assert_eq!(queue.len(), 1, "the oops after the marker is still live");
    }

    #[test]
    fn abrt_marker_alone_with_no_trailing_oops_yields_nothing() {
        let mut buf = b"Abrt: submitted oops above\n".to_vec();
        let queue = extract_oops(&mut buf);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn short_fragment_is_dropped() {
        let mut buf = b"<4>BUG: short\n".to_vec();
        let queue = extract_oops(&mut buf);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let mut text = String::new();
        for _ in 0..(crate::constants::MAX_OOPS + 5) {
            text.push_str(&oops_text());
        }
        let mut buf = text.into_bytes();
        let queue = extract_oops(&mut buf);
        assert!(queue.len() <= crate::constants::MAX_OOPS);
    }
}
