//! Session-scoped transient scan file
//!
//! Each orchestrator owns one slot: a unique `paperless-scan-<uuid>.jpg`
//! path in the temp directory. At most one file exists at that path, and it
//! is removed when the slot is cleared or dropped.

use crate::scanner::discard_transient;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PREFIX: &str = "paperless-scan-";
const EXTENSION: &str = "jpg";

/// Leftovers younger than this may belong to a live session
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub struct TransientSlot {
    path: PathBuf,
}

impl TransientSlot {
    /// Slot in the system temp directory
    pub fn new() -> Self {
        Self::new_in(&std::env::temp_dir())
    }

    pub fn new_in(dir: &Path) -> Self {
        let path = dir.join(format!("{}{}.{}", PREFIX, Uuid::new_v4(), EXTENSION));
        debug!(path = %path.display(), "Transient slot allocated");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn clear(&self) {
        discard_transient(&self.path);
    }
}

impl Default for TransientSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransientSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

fn is_transient_name(name: &str) -> bool {
    name.strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_suffix(&format!(".{}", EXTENSION)))
        .map(|id| Uuid::parse_str(id).is_ok())
        .unwrap_or(false)
}

/// Remove transient files left behind by earlier sessions
///
/// Only files not modified within `older_than` are touched. Returns the
/// number of files removed; unreadable entries are skipped.
pub fn sweep_stale(dir: &Path, older_than: Duration) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read temp directory for sweep");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_str().map(is_transient_name).unwrap_or(false) {
            continue;
        }

        let stale = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age >= older_than)
            .unwrap_or(false);
        if !stale {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale scan"),
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "Swept stale transient scans");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_slots_never_collide() {
        let dir = tempdir().unwrap();
        let a = TransientSlot::new_in(dir.path());
        let b = TransientSlot::new_in(dir.path());
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempdir().unwrap();
        let path = {
            let slot = TransientSlot::new_in(dir.path());
            fs::write(slot.path(), b"jpeg").unwrap();
            assert!(slot.exists());
            slot.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let slot = TransientSlot::new_in(dir.path());
        slot.clear();
        fs::write(slot.path(), b"jpeg").unwrap();
        slot.clear();
        slot.clear();
        assert!(!slot.exists());
    }

    #[test]
    fn test_sweep_only_removes_transient_names() {
        let dir = tempdir().unwrap();
        let leftover = dir.path().join(format!("paperless-scan-{}.jpg", Uuid::new_v4()));
        let unrelated = dir.path().join("paperless-scan-notes.jpg");
        let other = dir.path().join("holiday.jpg");
        for path in [&leftover, &unrelated, &other] {
            fs::write(path, b"x").unwrap();
        }

        assert_eq!(sweep_stale(dir.path(), Duration::ZERO), 1);
        assert!(!leftover.exists());
        assert!(unrelated.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_sweep_spares_recent_files() {
        let dir = tempdir().unwrap();
        let slot = TransientSlot::new_in(dir.path());
        fs::write(slot.path(), b"x").unwrap();

        assert_eq!(sweep_stale(dir.path(), STALE_AFTER), 0);
        assert!(slot.exists());
    }

    #[test]
    fn test_sweep_missing_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(sweep_stale(&dir.path().join("gone"), Duration::ZERO), 0);
    }
}
