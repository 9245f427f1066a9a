// SPDX-License-Identifier: GPL-2.0-or-later

//! Bus seam (external collaborator per spec.md §1).
//!
//! The source's `CCommLayerServer` is polymorphic over concrete transports
//! (`DBus`, a raw socket, an in-process "inner" variant). Per the Design
//! Note in `SPEC_FULL.md` §9 ("Polymorphism"), this is modeled as a plain
//! capability-set trait rather than a transport enum — concrete transports
//! (a D-Bus binding, a JSON-lines socket) would each implement [`Bus`], and
//! nothing in this crate depends on which one is live. [`LoggingBus`] is an
//! in-crate test double that records every publish for assertions and also
//! logs it, standing in for a real subscriber-facing transport.

use std::sync::Mutex;

use crate::model::CrashRef;

/// One event published on the Bus, in the shape the event loop hands to
/// any concrete transport. Kept flat (no transport-specific encoding)
/// deliberately: encoding is a transport concern, not a core concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Crash {
        package: String,
        crash_ref: String,
        dump_path: String,
        uid_or_empty: String,
    },
    JobStarted {
        peer: String,
    },
    JobDone {
        peer: String,
        uuid: String,
    },
    Warning {
        msg: String,
        peer: String,
        job_id: u64,
    },
    Update {
        msg: String,
        peer: String,
        job_id: u64,
    },
    QuotaExceed {
        msg: String,
    },
}

/// Capability set a concrete Bus transport must provide. Every method is a
/// fire-and-forget publish; there is no request/response half here (the
/// consumed calls in spec.md §6 belong to the transport's own dispatch
/// loop, not to this crate's event core).
pub trait Bus: Send + Sync {
    fn crash(&self, package: &str, crash_ref: &CrashRef, dump_path: &str, uid_or_empty: &str);
    fn job_started(&self, peer: &str);
    fn job_done(&self, peer: &str, uuid: &str);
    fn warning(&self, msg: &str, peer: &str, job_id: u64);
    fn update(&self, msg: &str, peer: &str, job_id: u64);
    fn quota_exceed(&self, msg: &str);
}

/// In-crate test double. Logs every publish at `INFO`/`WARN` (matching the
/// source's own `VERB1 log(...)` right before each `g_pCommLayer->Foo()`
/// call) and additionally records it for test assertions.
#[derive(Default)]
pub struct LoggingBus {
    events: Mutex<Vec<BusEvent>>,
}

impl LoggingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Bus for LoggingBus {
    fn crash(&self, package: &str, crash_ref: &CrashRef, dump_path: &str, uid_or_empty: &str) {
        tracing::info!(package, %crash_ref, dump_path, uid_or_empty, "Crash");
        self.events.lock().unwrap().push(BusEvent::Crash {
            package: package.to_string(),
            crash_ref: crash_ref.to_string(),
            dump_path: dump_path.to_string(),
            uid_or_empty: uid_or_empty.to_string(),
        });
    }

    fn job_started(&self, peer: &str) {
        tracing::info!(peer, "JobStarted");
        self.events.lock().unwrap().push(BusEvent::JobStarted {
            peer: peer.to_string(),
        });
    }

    fn job_done(&self, peer: &str, uuid: &str) {
        tracing::info!(peer, uuid, "JobDone");
        self.events.lock().unwrap().push(BusEvent::JobDone {
            peer: peer.to_string(),
            uuid: uuid.to_string(),
        });
    }

    fn warning(&self, msg: &str, peer: &str, job_id: u64) {
        tracing::warn!(peer, job_id, "{msg}");
        self.events.lock().unwrap().push(BusEvent::Warning {
            msg: msg.to_string(),
            peer: peer.to_string(),
            job_id,
        });
    }

    fn update(&self, msg: &str, peer: &str, job_id: u64) {
        tracing::info!(peer, job_id, "{msg}");
        self.events.lock().unwrap().push(BusEvent::Update {
            msg: msg.to_string(),
            peer: peer.to_string(),
            job_id,
        });
    }

    fn quota_exceed(&self, msg: &str) {
        tracing::warn!("QuotaExceed: {msg}");
        self.events
            .lock()
            .unwrap()
            .push(BusEvent::QuotaExceed { msg: msg.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_published_events_in_order() {
        let bus = LoggingBus::new();
        bus.job_started("peer-1");
        bus.job_done("peer-1", "uuid-1");
        let events = bus.events();
        assert_eq!(
            events,
            vec![
                BusEvent::JobStarted {
                    peer: "peer-1".into()
                },
                BusEvent::JobDone {
                    peer: "peer-1".into(),
                    uuid: "uuid-1".into()
                },
            ]
        );
    }
}
