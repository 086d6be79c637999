use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Category of emitted record; selects the durable ID file and bus topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Video,
    Comment,
    Account,
}

impl RecordKind {
    pub fn id_file(&self) -> &'static str {
        match self {
            RecordKind::Video => "sent_videos.txt",
            RecordKind::Comment => "sent_comments.txt",
            RecordKind::Account => "sent_accounts.txt",
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            RecordKind::Video => "claw_video",
            RecordKind::Comment => "claw_comment",
            RecordKind::Account => "claw_account",
        }
    }
}

pub const PENDING_MIDS_FILE: &str = "pending_mids.txt";
pub const PROGRESS_FILE: &str = "video_comment_progress.json";

/// Per-video comment traversal checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoProgress {
    pub done: bool,
    pub cursor: String,
    pub aid: u64,
}

/// Flat-directory durable state: append-only ID files, the pending-MIDs set,
/// and the per-video progress document.
///
/// ID appends rely on `O_APPEND` for crash-safety; each line is short enough
/// to land atomically. The progress document and pending set are rewritten in
/// full through a temp-file-then-rename.
pub struct RecordStore {
    dir: PathBuf,
    progress: Mutex<HashMap<String, VideoProgress>>,
    pending: Mutex<BTreeSet<String>>,
}

impl RecordStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| eyre!("failed to create record dir {}: {e}", dir.display()))?;

        // A corrupt progress document is recovered as empty rather than
        // aborting the crawl; at worst some videos are re-walked.
        let progress_path = dir.join(PROGRESS_FILE);
        let progress = match fs::read_to_string(&progress_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %progress_path.display(),
                    error = %e,
                    "progress file corrupt; starting from an empty map"
                );
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        let pending_path = dir.join(PENDING_MIDS_FILE);
        let pending = match fs::read_to_string(&pending_path) {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => BTreeSet::new(),
        };

        Ok(Self {
            dir,
            progress: Mutex::new(progress),
            pending: Mutex::new(pending),
        })
    }

    /// Append `id` to the emitted set for `kind`. Duplicates on disk are
    /// tolerated; dedup happens when the set is loaded.
    pub fn record_emitted(&self, kind: RecordKind, id: &str) -> Result<()> {
        let path = self.dir.join(kind.id_file());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| eyre!("failed to open {}: {e}", path.display()))?;
        writeln!(file, "{id}").map_err(|e| eyre!("failed to append to {}: {e}", path.display()))?;
        Ok(())
    }

    pub fn load_emitted(&self, kind: RecordKind) -> Result<BTreeSet<String>> {
        let path = self.dir.join(kind.id_file());
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(eyre!("failed to read {}: {e}", path.display())),
        }
    }

    /// Record an in-progress cursor for `bvid`. Clears any previous `done`.
    pub fn save_progress(&self, bvid: &str, cursor: &str, aid: u64) -> Result<()> {
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        progress.insert(
            bvid.to_string(),
            VideoProgress {
                done: false,
                cursor: cursor.to_string(),
                aid,
            },
        );
        self.write_progress(&progress)
    }

    /// Terminal state for `bvid`: comment traversal finished. The cached aid
    /// is kept so a later inspection does not need to re-resolve it.
    pub fn mark_done(&self, bvid: &str) -> Result<()> {
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        let entry = progress.entry(bvid.to_string()).or_default();
        entry.done = true;
        entry.cursor.clear();
        self.write_progress(&progress)
    }

    pub fn get_progress(&self, bvid: &str) -> VideoProgress {
        let progress = self.progress.lock().expect("progress lock poisoned");
        progress.get(bvid).cloned().unwrap_or_default()
    }

    pub fn load_all_progress(&self) -> HashMap<String, VideoProgress> {
        self.progress.lock().expect("progress lock poisoned").clone()
    }

    fn write_progress(&self, progress: &HashMap<String, VideoProgress>) -> Result<()> {
        let json = serde_json::to_string_pretty(progress)
            .map_err(|e| eyre!("failed to serialize progress: {e}"))?;
        atomic_write(&self.dir.join(PROGRESS_FILE), json.as_bytes())
    }

    /// Add one MID to the pending set and persist it.
    pub fn save_pending(&self, mid: &str) -> Result<()> {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        if pending.insert(mid.to_string()) {
            self.write_pending(&pending)?;
        }
        Ok(())
    }

    pub fn load_pending(&self) -> BTreeSet<String> {
        self.pending.lock().expect("pending lock poisoned").clone()
    }

    /// Replace the pending set wholesale. An empty set removes the file.
    pub fn update_pending(&self, mids: BTreeSet<String>) -> Result<()> {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        *pending = mids;
        self.write_pending(&pending)
    }

    fn write_pending(&self, pending: &BTreeSet<String>) -> Result<()> {
        let path = self.dir.join(PENDING_MIDS_FILE);
        if pending.is_empty() {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| eyre!("failed to remove {}: {e}", path.display()))?;
            }
            return Ok(());
        }
        let mut body = pending.iter().cloned().collect::<Vec<_>>().join("\n");
        body.push('\n');
        atomic_write(&path, body.as_bytes())
    }
}

/// Write to a temp file then rename over the destination so an interrupted
/// process cannot leave a half-written file behind.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| eyre!("failed to write {}: {e}", tmp.display()))?;
    fs::rename(&tmp, path)
        .map_err(|e| eyre!("failed to replace {}: {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("sent_records")).unwrap();
        (dir, store)
    }

    #[test]
    fn emitted_ids_dedup_and_skip_blanks() {
        let (_dir, store) = store();
        store.record_emitted(RecordKind::Video, "BV1").unwrap();
        store.record_emitted(RecordKind::Video, "BV2").unwrap();
        store.record_emitted(RecordKind::Video, "BV1").unwrap();
        store.record_emitted(RecordKind::Video, "").unwrap();
        let got = store.load_emitted(RecordKind::Video).unwrap();
        assert_eq!(
            got,
            ["BV1", "BV2"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn emitted_sets_are_independent_per_kind() {
        let (_dir, store) = store();
        store.record_emitted(RecordKind::Comment, "100").unwrap();
        store.record_emitted(RecordKind::Account, "7").unwrap();
        assert!(store.load_emitted(RecordKind::Video).unwrap().is_empty());
        assert!(store
            .load_emitted(RecordKind::Comment)
            .unwrap()
            .contains("100"));
        assert!(store
            .load_emitted(RecordKind::Account)
            .unwrap()
            .contains("7"));
    }

    #[test]
    fn progress_lifecycle() {
        let (_dir, store) = store();
        store.save_progress("BV1", "cur7", 42).unwrap();
        assert_eq!(
            store.get_progress("BV1"),
            VideoProgress {
                done: false,
                cursor: "cur7".to_string(),
                aid: 42
            }
        );
        store.mark_done("BV1").unwrap();
        assert_eq!(
            store.get_progress("BV1"),
            VideoProgress {
                done: true,
                cursor: String::new(),
                aid: 42
            }
        );
        // Unknown videos read back as "not yet started".
        assert_eq!(store.get_progress("BVx"), VideoProgress::default());
    }

    #[test]
    fn progress_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sent_records");
        {
            let store = RecordStore::open(&path).unwrap();
            store.save_progress("BV1", "c7", 10).unwrap();
        }
        let store = RecordStore::open(&path).unwrap();
        let progress = store.get_progress("BV1");
        assert_eq!(progress.cursor, "c7");
        assert_eq!(progress.aid, 10);
    }

    #[test]
    fn corrupt_progress_recovers_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sent_records");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(PROGRESS_FILE), "{not json").unwrap();
        let store = RecordStore::open(&path).unwrap();
        assert!(store.load_all_progress().is_empty());
    }

    #[test]
    fn pending_set_persists_and_empties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sent_records");
        {
            let store = RecordStore::open(&path).unwrap();
            store.save_pending("m1").unwrap();
            store.save_pending("m2").unwrap();
        }
        let store = RecordStore::open(&path).unwrap();
        assert_eq!(
            store.load_pending(),
            ["m1", "m2"].iter().map(|s| s.to_string()).collect()
        );
        store.update_pending(BTreeSet::new()).unwrap();
        assert!(!path.join(PENDING_MIDS_FILE).exists());
        assert!(store.load_pending().is_empty());
    }
}
