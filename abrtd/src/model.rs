// SPDX-License-Identifier: GPL-2.0-or-later

//! Shared data types for the daemon core: the extractor's record types and
//! the event-loop's small pieces of long-lived state.

use std::collections::VecDeque;

use nix::unistd::Pid;

use crate::constants::MAX_OOPS;

/// An immutable, fully-assembled kernel oops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OopsRecord {
    pub text: String,
    pub kernel_version: String,
}

/// Bounded FIFO of [`OopsRecord`]s. Insertions past capacity are dropped
/// silently; this mirrors `MAX_OOPS` in the source rather than growing
/// without bound on a log flood.
#[derive(Debug, Default)]
pub struct OopsQueue {
    records: VecDeque<OopsRecord>,
}

impl OopsQueue {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= MAX_OOPS
    }

    /// Returns `true` if the record was kept, `false` if dropped for being
    /// past capacity.
    pub fn push(&mut self, record: OopsRecord) -> bool {
        if self.is_full() {
            return false;
        }
        self.records.push_back(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<OopsRecord> {
        self.records.into_iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OopsRecord> {
        self.records.iter()
    }
}

/// A single tokenized line, extractor-internal. `payload` borrows from the
/// caller's buffer for the lifetime of one extraction call; it never
/// outlives it. Kept as raw bytes rather than `&str`: kernel ring-buffer
/// output is not guaranteed to be valid UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct LogLine<'a> {
    pub payload: &'a [u8],
    pub level: u8,
}

/// `"{uid}:{uuid}"`, the opaque handle clients use to address one crash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrashRef {
    pub uid: Option<String>,
    pub uuid: String,
}

impl std::fmt::Display for CrashRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.uid.as_deref().unwrap_or(""), self.uuid)
    }
}

/// Metadata read out of a dump directory; the subset the daemon core itself
/// needs (quota ordering, dedup, the published `uid`). The richer
/// per-analyzer metadata belongs to MiddleWare.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DumpDirMeta {
    pub uid: String,
    pub uuid: String,
    pub package: String,
    #[serde(default)]
    pub inform_all: bool,
}

impl DumpDirMeta {
    /// The uid published on the Bus: empty when the crash is marked
    /// inform-all, otherwise the owning uid.
    pub fn published_uid(&self) -> &str {
        if self.inform_all {
            ""
        } else {
            &self.uid
        }
    }
}

/// What a forked child is for, so the reaper can decide what bookkeeping a
/// reaped pid affects. Resolves the source's `socket_client_count`
/// underflow risk: only `SocketHelper` reaps ever touch [`ClientCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    LogScanner,
    SocketHelper,
    UploadHelper,
}

/// `socket_client_count` from the source, reimplemented as a small
/// pid-tagged counter instead of a bare integer decremented on every reap.
#[derive(Debug, Default)]
pub struct ClientCounter {
    count: usize,
    ceiling: usize,
    listener_detached: bool,
}

impl ClientCounter {
    pub fn new(ceiling: usize) -> Self {
        Self {
            count: 0,
            ceiling,
            listener_detached: false,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn at_ceiling(&self) -> bool {
        self.count >= self.ceiling
    }

    pub fn listener_detached(&self) -> bool {
        self.listener_detached
    }

    /// Called after successfully forking a socket helper.
    pub fn increment(&mut self) {
        self.count += 1;
        if self.at_ceiling() {
            self.listener_detached = true;
        }
    }

    /// Called when a reaped pid is known to have been a socket helper.
    /// Re-arms the listener if it had been detached and we've now dropped
    /// below the ceiling.
    pub fn decrement(&mut self) -> bool {
        self.count = self.count.saturating_sub(1);
        if self.listener_detached && !self.at_ceiling() {
            self.listener_detached = false;
            return true;
        }
        false
    }
}

/// pid -> role table populated at spawn time and consulted by the reaper.
#[derive(Debug, Default)]
pub struct RoleMap {
    roles: std::collections::HashMap<Pid, Role>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self {
            roles: std::collections::HashMap::new(),
        }
    }

    pub fn insert(&mut self, pid: Pid, role: Role) {
        self.roles.insert(pid, role);
    }

    pub fn take(&mut self, pid: Pid) -> Option<Role> {
        self.roles.remove(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drops_past_capacity() {
        let mut q = OopsQueue::new();
        for i in 0..MAX_OOPS {
            assert!(q.push(OopsRecord {
                text: format!("oops {i}"),
                kernel_version: "undefined".into(),
            }));
        }
        assert!(q.is_full());
        assert!(!q.push(OopsRecord {
            text: "overflow".into(),
            kernel_version: "undefined".into(),
        }));
        assert_eq!(q.len(), MAX_OOPS);
    }

    #[test]
    fn client_counter_detaches_and_rearms() {
        let mut c = ClientCounter::new(2);
        c.increment();
        assert!(!c.at_ceiling());
        c.increment();
        assert!(c.at_ceiling());
        assert!(c.listener_detached());
        let rearmed = c.decrement();
        assert!(rearmed);
        assert!(!c.listener_detached());
    }

    #[test]
    fn role_map_only_tracks_known_pids() {
        let mut roles = RoleMap::new();
        let pid = Pid::from_raw(4242);
        roles.insert(pid, Role::SocketHelper);
        assert_eq!(roles.take(pid), Some(Role::SocketHelper));
        assert_eq!(roles.take(pid), None);
    }

    #[test]
    fn published_uid_hidden_when_inform_all() {
        let meta = DumpDirMeta {
            uid: "1000".into(),
            uuid: "abc".into(),
            package: "foo".into(),
            inform_all: true,
        };
        assert_eq!(meta.published_uid(), "");
    }
}
