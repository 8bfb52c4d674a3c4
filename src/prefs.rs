//! Process-wide preferences: currently only the folder the graphical file
//! picker last used. Kept apart from the pipeline so the storage mechanism
//! can change without touching it.

use std::path::{Path, PathBuf};
use std::{fs, io};

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub last_folder: Option<PathBuf>,
}

impl Preferences {
    /// Loads preferences from `path`. An absent or unreadable file degrades
    /// to defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                debug!("ignoring malformed preferences at {path:?}: {e}");
                Preferences::default()
            }),
            Err(e) => {
                debug!("no preferences at {path:?}: {e}");
                Preferences::default()
            }
        }
    }

    pub fn store(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let prefs = Preferences {
            last_folder: Some(PathBuf::from("/music/incoming")),
        };
        prefs.store(&path).unwrap();

        let loaded = Preferences::load(&path);
        assert_eq!(loaded.last_folder.as_deref(), Some(Path::new("/music/incoming")));
    }

    #[test]
    fn missing_or_garbled_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(Preferences::load(&missing).last_folder.is_none());

        let garbled = dir.path().join("garbled.json");
        fs::write(&garbled, b"not json").unwrap();
        assert!(Preferences::load(&garbled).last_folder.is_none());
    }
}
