// SPDX-License-Identifier: GPL-2.0-or-later

//! MiddleWare seam (external collaborator per spec.md §1).
//!
//! The real plugin registry, database and analyzer machinery live outside
//! this crate. What the daemon core needs from it is a narrow trait: load a
//! dump directory's metadata (for dedup/quota decisions) and build a report
//! from one (for [`crate::workers`]). [`InMemoryMiddleWare`] is an in-crate
//! test double good enough to exercise the scanner and worker logic without
//! a real plugin stack, grounded on the shape of the source's `MW_*` return
//! codes (`CrashWatcher.cpp`, `Daemon.cpp`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::DumpDirMeta;

/// Outcome of loading a dump directory, mirroring `mw_result_t` at the call
/// sites the spool scanner cares about.
pub enum LoadOutcome {
    /// A new crash; metadata read successfully.
    Ok(DumpDirMeta),
    /// A duplicate of an existing, already-recorded crash.
    Occurred {
        original: PathBuf,
        meta: DumpDirMeta,
    },
    Corrupted,
    GpgError,
    Other(String),
}

/// Outcome of `CreateCrashReport`, consumed by [`crate::workers`].
pub enum CreateReportOutcome {
    Ok,
    InDbError,
    PluginError,
    Corrupted,
    FileError,
    Other(String),
    /// The plugin registry or database is unusable beyond this one request
    /// (mirrors the source's `EXCEP_FATAL`, which unwound out of
    /// `create_report` and terminated the daemon rather than just failing
    /// the client). The worker escalates this straight to the event loop
    /// instead of warning the client.
    Fatal(String),
}

/// The subset of MiddleWare the daemon core calls directly. Implementors
/// must serialize their own internal state (plugin registry, database
/// handle) behind one mutex per the concurrency caveat in spec.md §4.G —
/// from this crate's point of view that's an implementation detail behind
/// `&self`, since workers only ever see a shared `Arc<dyn MiddleWare>`.
pub trait MiddleWare: Send + Sync {
    fn load_debug_dump(&self, dir: &Path) -> LoadOutcome;
    fn create_crash_report(&self, uuid: &str, uid: &str, force: bool) -> CreateReportOutcome;
    /// Removes a crash's database record and returns the dump directory
    /// path it pointed at, if known.
    fn delete_crash_info(&self, uuid: &str, uid: &str) -> Option<PathBuf>;
}

/// In-crate test double: dedups by `uuid` read out of a `meta.json` file
/// dropped in each dump directory (a stand-in for the real per-analyzer
/// metadata files MiddleWare actually reads).
#[derive(Default)]
pub struct InMemoryMiddleWare {
    by_uuid: Mutex<HashMap<String, PathBuf>>,
    force_outcome: Mutex<Option<CreateReportOutcomeKind>>,
}

#[derive(Clone, PartialEq, Eq)]
enum CreateReportOutcomeKind {
    Ok,
    InDbError,
    PluginError,
    Corrupted,
    FileError,
    Fatal(String),
}

impl InMemoryMiddleWare {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: force every subsequent `create_crash_report` call to
    /// return a specific outcome, regardless of whether the uuid is known.
    pub fn force_create_report_outcome(&self, outcome: &str) {
        let kind = match outcome {
            "ok" => CreateReportOutcomeKind::Ok,
            "in_db_error" => CreateReportOutcomeKind::InDbError,
            "plugin_error" => CreateReportOutcomeKind::PluginError,
            "corrupted" => CreateReportOutcomeKind::Corrupted,
            "file_error" => CreateReportOutcomeKind::FileError,
            "fatal" => CreateReportOutcomeKind::Fatal("plugin registry unusable".into()),
            _ => return,
        };
        *self.force_outcome.lock().unwrap() = Some(kind);
    }

    fn read_meta(dir: &Path) -> Option<DumpDirMeta> {
        let contents = std::fs::read_to_string(dir.join("meta.json")).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl MiddleWare for InMemoryMiddleWare {
    fn load_debug_dump(&self, dir: &Path) -> LoadOutcome {
        let Some(meta) = Self::read_meta(dir) else {
            return LoadOutcome::Corrupted;
        };
        let mut seen = self.by_uuid.lock().unwrap();
        if let Some(original) = seen.get(&meta.uuid) {
            if original != dir {
                return LoadOutcome::Occurred {
                    original: original.clone(),
                    meta,
                };
            }
        }
        seen.insert(meta.uuid.clone(), dir.to_path_buf());
        LoadOutcome::Ok(meta)
    }

    fn create_crash_report(&self, uuid: &str, _uid: &str, _force: bool) -> CreateReportOutcome {
        if let Some(forced) = self.force_outcome.lock().unwrap().clone() {
            return match forced {
                CreateReportOutcomeKind::Ok => CreateReportOutcome::Ok,
                CreateReportOutcomeKind::InDbError => CreateReportOutcome::InDbError,
                CreateReportOutcomeKind::PluginError => CreateReportOutcome::PluginError,
                CreateReportOutcomeKind::Corrupted => CreateReportOutcome::Corrupted,
                CreateReportOutcomeKind::FileError => CreateReportOutcome::FileError,
                CreateReportOutcomeKind::Fatal(reason) => CreateReportOutcome::Fatal(reason),
            };
        }
        let known = self.by_uuid.lock().unwrap().contains_key(uuid);
        if known {
            CreateReportOutcome::Ok
        } else {
            CreateReportOutcome::InDbError
        }
    }

    fn delete_crash_info(&self, uuid: &str, _uid: &str) -> Option<PathBuf> {
        self.by_uuid.lock().unwrap().remove(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_meta(dir: &Path, uuid: &str) {
        let meta = DumpDirMeta {
            uid: "1000".into(),
            uuid: uuid.into(),
            package: "foo".into(),
            inform_all: false,
        };
        std::fs::write(dir.join("meta.json"), serde_json::to_string(&meta).unwrap()).unwrap();
    }

    #[test]
    fn first_load_is_ok_second_is_occurred() {
        let root = tempfile::tempdir().unwrap();
        let d1 = root.path().join("d1");
        let d2 = root.path().join("d2");
        std::fs::create_dir(&d1).unwrap();
        std::fs::create_dir(&d2).unwrap();
        write_meta(&d1, "same-uuid");
        write_meta(&d2, "same-uuid");

        let mw = InMemoryMiddleWare::new();
        assert!(matches!(mw.load_debug_dump(&d1), LoadOutcome::Ok(_)));
        match mw.load_debug_dump(&d2) {
            LoadOutcome::Occurred { original, .. } => assert_eq!(original, d1),
            _ => panic!("expected Occurred"),
        }
    }

    #[test]
    fn missing_metadata_is_corrupted() {
        let root = tempfile::tempdir().unwrap();
        let mw = InMemoryMiddleWare::new();
        assert!(matches!(
            mw.load_debug_dump(root.path()),
            LoadOutcome::Corrupted
        ));
    }

    #[test]
    fn create_report_unknown_uuid_is_in_db_error() {
        let mw = InMemoryMiddleWare::new();
        assert!(matches!(
            mw.create_crash_report("nope", "1000", false),
            CreateReportOutcome::InDbError
        ));
    }
}
