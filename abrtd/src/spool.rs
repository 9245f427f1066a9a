// SPDX-License-Identifier: GPL-2.0-or-later

//! Spool Scanner (component B).
//!
//! Reacts to inotify events on the crash-dump root: quota-prunes, loads via
//! MiddleWare, dedupes, and publishes `Crash` on the Bus. Grounded on
//! `Daemon.cpp::handle_inotify_cb`'s dump-root half.

use std::ffi::OsStr;
use std::path::Path;

use crate::bus::Bus;
use crate::dumpdir::{delete_dump_dir, find_largest_sibling, total_size_mib};
use crate::error::DaemonError;
use crate::middleware::{LoadOutcome, MiddleWare};
use crate::model::CrashRef;

/// `true` if `name`'s first dotted component ends in `.new` — the
/// in-progress-write convention the source checks with
/// `strcmp(strchrnul(name, '.'), ".new")`.
fn is_in_progress_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    match name.find('.') {
        Some(dot) => &name[dot..] == ".new",
        None => false,
    }
}

/// Evicts siblings of `arrived_name` under `root` until `root`'s total size
/// is within `max_mib` (0 disables quota enforcement entirely, matching the
/// source's `g_settings_nMaxCrashReportsSize > 0` guard). Publishes
/// `QuotaExceed` once per eviction.
pub fn enforce_quota(root: &Path, arrived_name: &OsStr, max_mib: u64, bus: &dyn Bus) {
    if max_mib == 0 {
        return;
    }
    let arrived = arrived_name.to_string_lossy().into_owned();
    loop {
        if total_size_mib(root) < max_mib {
            break;
        }
        let Some(worst) = find_largest_sibling(root, &arrived) else {
            break;
        };
        let err = DaemonError::QuotaExceeded { limit_mib: max_mib };
        tracing::warn!(dir = %worst.display(), error = %err, "evicting largest sibling");
        bus.quota_exceed(
            "The size of the report exceeded the quota. Please check system's \
             MaxCrashReportsSize value in abrt.conf.",
        );
        if let Err(e) = delete_dump_dir(&worst) {
            tracing::warn!(dir = %worst.display(), error = %e, "failed to evict sibling");
            break;
        }
    }
}

/// Handles one newly-arrived directory under the dump root: quota-prune,
/// then load/dedupe/publish. `name` is the directory's basename.
pub fn handle_arrival(
    dump_root: &Path,
    name: &OsStr,
    max_mib: u64,
    bus: &dyn Bus,
    middleware: &dyn MiddleWare,
) {
    if is_in_progress_name(name) {
        return;
    }
    tracing::info!(name = %name.to_string_lossy(), "directory creation detected");

    enforce_quota(dump_root, name, max_mib, bus);

    let full_path = dump_root.join(name);
    match middleware.load_debug_dump(&full_path) {
        LoadOutcome::Ok(meta) => {
            tracing::info!(path = %full_path.display(), "new crash, processing");
            let crash_ref = CrashRef {
                uid: Some(meta.uid.clone()),
                uuid: meta.uuid.clone(),
            };
            bus.crash(
                &meta.package,
                &crash_ref,
                &full_path.to_string_lossy(),
                meta.published_uid(),
            );
        }
        LoadOutcome::Occurred { original, meta } => {
            let err = DaemonError::DuplicateDump {
                dir: full_path.clone(),
                original: original.clone(),
            };
            tracing::info!(error = %err, "deleting duplicate crash, publishing for the original");
            let _ = delete_dump_dir(&full_path);
            let crash_ref = CrashRef {
                uid: Some(meta.uid.clone()),
                uuid: meta.uuid.clone(),
            };
            bus.crash(
                &meta.package,
                &crash_ref,
                &original.to_string_lossy(),
                meta.published_uid(),
            );
        }
        LoadOutcome::Corrupted | LoadOutcome::GpgError | LoadOutcome::Other(_) => {
            let err = DaemonError::DumpCorrupted {
                dir: full_path.clone(),
                reason: "middleware could not load dump directory metadata".into(),
            };
            tracing::warn!(error = %err, "deleting");
            let _ = delete_dump_dir(&full_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, LoggingBus};
    use crate::middleware::InMemoryMiddleWare;
    use crate::model::DumpDirMeta;

    fn write_meta(dir: &Path, uuid: &str, inform_all: bool) {
        std::fs::create_dir_all(dir).unwrap();
        let meta = DumpDirMeta {
            uid: "1000".into(),
            uuid: uuid.into(),
            package: "foo".into(),
            inform_all,
        };
        std::fs::write(dir.join("meta.json"), serde_json::to_string(&meta).unwrap()).unwrap();
    }

    #[test]
    fn in_progress_name_is_ignored() {
        assert!(is_in_progress_name(OsStr::new("ccpp-2021.new")));
        assert!(!is_in_progress_name(OsStr::new("ccpp-2021")));
        assert!(!is_in_progress_name(OsStr::new("no-dot-new")));
    }

    #[test]
    fn new_crash_publishes_crash_event() {
        let root = tempfile::tempdir().unwrap();
        write_meta(&root.path().join("d1"), "u1", false);
        let bus = LoggingBus::new();
        let mw = InMemoryMiddleWare::new();
        handle_arrival(root.path(), OsStr::new("d1"), 0, &bus, &mw);
        let events = bus.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BusEvent::Crash { ref uid_or_empty, .. } if uid_or_empty == "1000"));
    }

    #[test]
    fn inform_all_crash_publishes_empty_uid() {
        let root = tempfile::tempdir().unwrap();
        write_meta(&root.path().join("d1"), "u1", true);
        let bus = LoggingBus::new();
        let mw = InMemoryMiddleWare::new();
        handle_arrival(root.path(), OsStr::new("d1"), 0, &bus, &mw);
        let events = bus.events();
        assert!(matches!(events[0], BusEvent::Crash { ref uid_or_empty, .. } if uid_or_empty.is_empty()));
    }

    #[test]
    fn duplicate_crash_deletes_copy_and_publishes_for_original() {
        let root = tempfile::tempdir().unwrap();
        write_meta(&root.path().join("d1"), "dup-uuid", false);
        write_meta(&root.path().join("d2"), "dup-uuid", false);
        let bus = LoggingBus::new();
        let mw = InMemoryMiddleWare::new();
        handle_arrival(root.path(), OsStr::new("d1"), 0, &bus, &mw);
        handle_arrival(root.path(), OsStr::new("d2"), 0, &bus, &mw);
        assert!(!root.path().join("d2").exists());
        assert!(root.path().join("d1").exists());
        let events = bus.events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn corrupted_crash_is_deleted_silently() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("broken")).unwrap();
        let bus = LoggingBus::new();
        let mw = InMemoryMiddleWare::new();
        handle_arrival(root.path(), OsStr::new("broken"), 0, &bus, &mw);
        assert!(!root.path().join("broken").exists());
        assert!(bus.events().is_empty());
    }

    #[test]
    fn over_quota_arrival_evicts_and_preserves_new_dir() {
        let root = tempfile::tempdir().unwrap();
        let old = root.path().join("old");
        std::fs::create_dir(&old).unwrap();
        std::fs::write(old.join("payload"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        write_meta(&root.path().join("new"), "new-uuid", false);
        std::fs::write(root.path().join("new").join("payload"), vec![0u8; 10]).unwrap();

        let bus = LoggingBus::new();
        let mw = InMemoryMiddleWare::new();
        handle_arrival(root.path(), OsStr::new("new"), 1, &bus, &mw);

        assert!(!old.exists(), "oversized sibling should have been evicted");
        assert!(root.path().join("new").exists());
        assert!(bus
            .events()
            .iter()
            .any(|e| matches!(e, BusEvent::QuotaExceed { .. })));
    }
}
