//! Durable per-label block cursors.
//!
//! One tiny file per watcher label (`.last-block-<label>`), content a
//! decimal block number. Writes go through a temp file plus atomic rename
//! so the last successful save is observed by the next load even across a
//! crash. A lost write costs at worst a short re-scan, which is idempotent
//! because event processing is deduplicated by work-item id.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CursorStore {
    dir: PathBuf,
}

impl CursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, label: &str) -> PathBuf {
        self.dir.join(format!(".last-block-{label}"))
    }

    /// Last inclusively-scanned block for `label`; 0 when never saved or
    /// unreadable (forces the default-lookback scan).
    pub fn load(&self, label: &str) -> u64 {
        let path = self.path_for(label);
        match fs::read_to_string(&path) {
            Ok(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(label, path = %path.display(), "cursor file corrupt; treating as 0");
                0
            }),
            Err(_) => 0,
        }
    }

    pub fn save(&self, label: &str, block: u64) -> std::io::Result<()> {
        let path = self.path_for(label);
        let tmp = self.dir.join(format!(".last-block-{label}.tmp"));
        write_atomic(&tmp, &path, block)
    }
}

fn write_atomic(tmp: &Path, path: &Path, block: u64) -> std::io::Result<()> {
    {
        let mut file = fs::File::create(tmp)?;
        write!(file, "{block}")?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cursor_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path());
        assert_eq!(store.load("hub-watcher"), 0);
    }

    #[test]
    fn cursor_round_trips_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path());
        store.save("hub-watcher", 123_456_789).unwrap();
        assert_eq!(store.load("hub-watcher"), 123_456_789);

        // A fresh store over the same directory observes the last save.
        let reopened = CursorStore::new(dir.path());
        assert_eq!(reopened.load("hub-watcher"), 123_456_789);

        store.save("hub-watcher", u64::MAX).unwrap();
        assert_eq!(reopened.load("hub-watcher"), u64::MAX);
    }

    #[test]
    fn labels_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path());
        store.save("hub-watcher", 10).unwrap();
        store.save("hub-fallback", 20).unwrap();
        store.save("hub-sweeper", 30).unwrap();
        assert_eq!(store.load("hub-watcher"), 10);
        assert_eq!(store.load("hub-fallback"), 20);
        assert_eq!(store.load("hub-sweeper"), 30);
    }

    #[test]
    fn corrupt_cursor_degrades_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".last-block-hub-watcher"), "not-a-number").unwrap();
        let store = CursorStore::new(dir.path());
        assert_eq!(store.load("hub-watcher"), 0);
    }
}
