// SPDX-License-Identifier: GPL-2.0-or-later

//! Daemon-wide settings, loaded once at startup from an optional JSON file.
//! Unlike the per-call data the rest of the crate deals in, this is small
//! and long-lived: it's read before any fd is opened and handed around by
//! reference for the life of the process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEBUG_DUMPS_DIR;
use crate::error::SettingsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dump_root: PathBuf,
    pub watch_crashdump_archive_dir: Option<PathBuf>,
    pub max_crash_reports_size_mib: u64,
    pub log_scanners: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dump_root: PathBuf::from(DEBUG_DUMPS_DIR),
            watch_crashdump_archive_dir: None,
            max_crash_reports_size_mib: 0,
            log_scanners: None,
        }
    }
}

impl Settings {
    /// Validates a loaded (or default) record. Failure here is always
    /// `Fatal`: it aborts startup before any fd is opened.
    pub fn validate(self) -> Result<Self, SettingsError> {
        if !self.dump_root.is_absolute() {
            return Err(SettingsError::DumpRootNotAbsolute(self.dump_root));
        }
        if let Some(watch_dir) = &self.watch_crashdump_archive_dir {
            if watch_dir == &self.dump_root {
                return Err(SettingsError::WatchDirSameAsDumpRoot);
            }
        }
        Ok(self)
    }

    /// Loads settings from `path` if given, falling back to built-in
    /// defaults when the path is `None` (the source behaves the same way:
    /// `abrt.conf` is optional, and its absence is not an error).
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings = match path {
            None => Settings::default(),
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };
        settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn relative_dump_root_is_rejected() {
        let settings = Settings {
            dump_root: PathBuf::from("relative/path"),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::DumpRootNotAbsolute(_))
        ));
    }

    #[test]
    fn watch_dir_equal_to_dump_root_is_rejected() {
        let settings = Settings {
            watch_crashdump_archive_dir: Some(PathBuf::from(DEBUG_DUMPS_DIR)),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::WatchDirSameAsDumpRoot)
        ));
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let loaded = Settings::load(None).unwrap();
        assert_eq!(loaded, Settings::default());
    }
}
