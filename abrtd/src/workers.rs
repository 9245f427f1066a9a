// SPDX-License-Identifier: GPL-2.0-or-later

//! Report Workers (component G).
//!
//! One OS thread per `CreateReport` request, detached from the event loop.
//! Grounded on `CrashWatcher.cpp`'s `create_report`/`CreateReportThread`,
//! reexpressed per the Design Notes in `SPEC_FULL.md` §9: the per-worker
//! `thread_data_t` becomes a single owned, move-only [`ReportRequest`], and
//! a worker that hits a fatal condition reports it on a channel instead of
//! re-raising across the thread boundary (which was undefined behavior in
//! the source).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::bus::Bus;
use crate::error::DaemonError;
use crate::middleware::{CreateReportOutcome, MiddleWare};

/// A `CreateReport` request, owned by the worker for its entire lifetime.
/// Replaces the source's four separately `strdup`'d fields.
pub struct ReportRequest {
    pub uuid: String,
    pub uid: String,
    pub force: bool,
    pub peer: String,
}

/// A fatal condition observed by a worker, read by the event loop so it can
/// initiate shutdown. Workers never propagate a panic or exception across
/// the thread boundary; this channel is the only way a worker's terminal
/// failure becomes visible to the rest of the daemon.
pub struct WorkerFatal {
    pub peer: String,
    pub error: DaemonError,
}

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Per-peer "current client" binding, a thread-local stand-in for the
/// source's global `set_client_name`/`g_pCurrentClient`. Scoped to the
/// worker thread it's set on, so concurrent workers never race over it.
struct CurrentClientGuard;

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<String>> = const { std::cell::RefCell::new(None) };
}

impl CurrentClientGuard {
    fn bind(peer: &str) -> Self {
        CURRENT_CLIENT.with(|c| *c.borrow_mut() = Some(peer.to_string()));
        Self
    }
}

impl Drop for CurrentClientGuard {
    /// Always resets the thread-local binding, on every exit path
    /// including an early return or panic unwind — the Rust reimplementation
    /// of "worker clears its thread-local client on every exit path"
    /// (spec.md §4.G step 5).
    fn drop(&mut self) {
        CURRENT_CLIENT.with(|c| *c.borrow_mut() = None);
    }
}

/// Spawns a detached report-builder thread for `request`. Returns the
/// `JoinHandle`; the event loop does not wait on it (workers in flight at
/// shutdown are not cancelled, per spec.md §5).
pub fn spawn_report_worker(
    request: ReportRequest,
    bus: Arc<dyn Bus>,
    middleware: Arc<Mutex<dyn MiddleWare>>,
    fatal_tx: Sender<WorkerFatal>,
) -> JoinHandle<()> {
    std::thread::spawn(move || run_worker(request, bus, middleware, fatal_tx))
}

fn run_worker(
    request: ReportRequest,
    bus: Arc<dyn Bus>,
    middleware: Arc<Mutex<dyn MiddleWare>>,
    fatal_tx: Sender<WorkerFatal>,
) {
    let job_id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
    bus.job_started(&request.peer);
    let _client = CurrentClientGuard::bind(&request.peer);

    tracing::info!(uuid = %request.uuid, peer = %request.peer, "creating report");
    let outcome = {
        let mw = middleware.lock().unwrap();
        mw.create_crash_report(&request.uuid, &request.uid, request.force)
    };

    match outcome {
        CreateReportOutcome::Ok => {
            bus.job_done(&request.peer, &request.uuid);
        }
        CreateReportOutcome::InDbError => {
            bus.warning(
                &format!("Did not find crash with UUID {} in database", request.uuid),
                &request.peer,
                job_id,
            );
        }
        CreateReportOutcome::PluginError => {
            bus.warning(
                "Particular analyzer plugin isn't loaded or there is an error within plugin(s)",
                &request.peer,
                job_id,
            );
        }
        CreateReportOutcome::Corrupted | CreateReportOutcome::FileError => {
            // Per SPEC_FULL.md §9 Open Question 1: both deletion-on-corruption
            // paths (scanner and worker) behave the same way.
            bus.warning(
                &format!("Corrupted crash with UUID {}, deleting", request.uuid),
                &request.peer,
                job_id,
            );
            let deleted_dir = middleware
                .lock()
                .unwrap()
                .delete_crash_info(&request.uuid, &request.uid);
            if let Some(dir) = deleted_dir {
                if let Err(e) = crate::dumpdir::delete_dump_dir(&dir) {
                    let err = DaemonError::DumpCorrupted {
                        dir: dir.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %err, "could not remove corrupted dump directory");
                    let _ = fatal_tx.send(WorkerFatal {
                        peer: request.peer.clone(),
                        error: DaemonError::Fatal(err.to_string()),
                    });
                }
            }
        }
        CreateReportOutcome::Other(reason) => {
            bus.warning(&reason, &request.peer, job_id);
        }
        CreateReportOutcome::Fatal(reason) => {
            // Unlike the other outcomes, this one never reaches the Bus: the
            // source's matching condition (`EXCEP_FATAL` rethrown out of
            // `create_report`) terminated the daemon, not just the client's
            // request, so there is no client left to warn.
            let _ = fatal_tx.send(WorkerFatal {
                peer: request.peer.clone(),
                error: DaemonError::Fatal(reason),
            });
        }
    }
    // `_client` drops here, clearing the thread-local binding unconditionally.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoggingBus;
    use crate::middleware::{InMemoryMiddleWare, MiddleWare};
    use std::sync::mpsc::channel;

    fn spawn_and_join(request: ReportRequest, mw: Arc<InMemoryMiddleWare>) -> Vec<crate::bus::BusEvent> {
        let bus = Arc::new(LoggingBus::new());
        let (tx, _rx) = channel();
        let handle = spawn_report_worker(request, bus.clone(), mw, tx);
        handle.join().unwrap();
        bus.events()
    }

    #[test]
    fn unknown_uuid_warns_without_job_done() {
        let mw = Arc::new(InMemoryMiddleWare::new());
        let events = spawn_and_join(
            ReportRequest {
                uuid: "nope".into(),
                uid: "1000".into(),
                force: false,
                peer: "peer-1".into(),
            },
            mw,
        );
        assert!(matches!(events[0], crate::bus::BusEvent::JobStarted { .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, crate::bus::BusEvent::Warning { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, crate::bus::BusEvent::JobDone { .. })));
    }

    #[test]
    fn corrupted_outcome_deletes_and_warns() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("dump");
        std::fs::create_dir(&dump).unwrap();
        let meta = crate::model::DumpDirMeta {
            uid: "1000".into(),
            uuid: "u1".into(),
            package: "foo".into(),
            inform_all: false,
        };
        std::fs::write(dump.join("meta.json"), serde_json::to_string(&meta).unwrap()).unwrap();

        let mw = Arc::new(InMemoryMiddleWare::new());
        assert!(matches!(
            mw.load_debug_dump(&dump),
            crate::middleware::LoadOutcome::Ok(_)
        ));
        mw.force_create_report_outcome("corrupted");

        let events = spawn_and_join(
            ReportRequest {
                uuid: "u1".into(),
                uid: "1000".into(),
                force: false,
                peer: "peer-1".into(),
            },
            mw,
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, crate::bus::BusEvent::Warning { .. })));
        assert!(!dump.exists());
    }

    #[test]
    fn fatal_outcome_reports_on_fatal_channel_without_warning_client() {
        let mw = Arc::new(InMemoryMiddleWare::new());
        mw.force_create_report_outcome("fatal");
        let bus = Arc::new(LoggingBus::new());
        let (tx, rx) = channel();
        let handle = spawn_report_worker(
            ReportRequest {
                uuid: "u1".into(),
                uid: "1000".into(),
                force: false,
                peer: "peer-1".into(),
            },
            bus.clone(),
            mw,
            tx,
        );
        handle.join().unwrap();

        let fault = rx.try_recv().expect("fatal outcome must reach fatal_tx");
        assert!(fault.error.is_fatal());
        assert!(!bus
            .events()
            .iter()
            .any(|e| matches!(e, crate::bus::BusEvent::Warning { .. })));
    }
}
