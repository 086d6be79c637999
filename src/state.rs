use crate::store::{RecordKind, RecordStore};
use eyre::Result;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

// No I/O happens under these locks; every critical section is a set probe
// or insert.
#[derive(Default)]
pub struct CrawlState {
    videos: Mutex<HashSet<String>>,
    comments: Mutex<HashSet<u64>>,
    accounts: Mutex<HashSet<u64>>,
    discovered_mids: Mutex<HashSet<u64>>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hydrate(&self, store: &RecordStore) -> Result<()> {
        let videos = store.load_emitted(RecordKind::Video)?;
        let comments = store.load_emitted(RecordKind::Comment)?;
        let accounts = store.load_emitted(RecordKind::Account)?;
        tracing::info!(
            videos = videos.len(),
            comments = comments.len(),
            accounts = accounts.len(),
            "hydrated emitted sets from durable store"
        );
        *self.videos.lock().expect("state lock poisoned") = videos.into_iter().collect();
        *self.comments.lock().expect("state lock poisoned") =
            comments.iter().filter_map(|s| s.parse().ok()).collect();
        *self.accounts.lock().expect("state lock poisoned") =
            accounts.iter().filter_map(|s| s.parse().ok()).collect();
        Ok(())
    }

    pub fn video_emitted(&self, bvid: &str) -> bool {
        self.videos
            .lock()
            .expect("state lock poisoned")
            .contains(bvid)
    }

    pub fn mark_video(&self, bvid: &str) -> bool {
        self.videos
            .lock()
            .expect("state lock poisoned")
            .insert(bvid.to_string())
    }

    pub fn comment_emitted(&self, rpid: u64) -> bool {
        self.comments
            .lock()
            .expect("state lock poisoned")
            .contains(&rpid)
    }

    pub fn mark_comment(&self, rpid: u64) -> bool {
        self.comments
            .lock()
            .expect("state lock poisoned")
            .insert(rpid)
    }

    pub fn account_emitted(&self, mid: u64) -> bool {
        self.accounts
            .lock()
            .expect("state lock poisoned")
            .contains(&mid)
    }

    pub fn mark_account(&self, mid: u64) -> bool {
        self.accounts
            .lock()
            .expect("state lock poisoned")
            .insert(mid)
    }

    pub fn discover_mid(&self, mid: u64) -> bool {
        self.discovered_mids
            .lock()
            .expect("state lock poisoned")
            .insert(mid)
    }

    /// MIDs discovered this run that were never emitted; persisted as the
    /// pending set at shutdown.
    pub fn unemitted_discoveries(&self) -> BTreeSet<String> {
        let discovered = self.discovered_mids.lock().expect("state lock poisoned");
        let accounts = self.accounts.lock().expect("state lock poisoned");
        discovered
            .iter()
            .filter(|mid| !accounts.contains(mid))
            .map(|mid| mid.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordStore;
    use tempfile::TempDir;

    #[test]
    fn marks_are_idempotent() {
        let state = CrawlState::new();
        assert!(state.mark_video("BV1"));
        assert!(!state.mark_video("BV1"));
        assert!(state.video_emitted("BV1"));
        assert!(!state.video_emitted("BV2"));
    }

    #[test]
    fn hydrate_reflects_durable_sets() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store.record_emitted(RecordKind::Video, "BV1").unwrap();
        store.record_emitted(RecordKind::Comment, "100").unwrap();
        store.record_emitted(RecordKind::Account, "7").unwrap();

        let state = CrawlState::new();
        state.hydrate(&store).unwrap();
        assert!(state.video_emitted("BV1"));
        assert!(state.comment_emitted(100));
        assert!(state.account_emitted(7));
        assert!(!state.comment_emitted(101));
    }

    #[test]
    fn pending_is_discovered_minus_emitted() {
        let state = CrawlState::new();
        state.discover_mid(1);
        state.discover_mid(2);
        state.discover_mid(3);
        state.mark_account(2);
        let pending = state.unemitted_discoveries();
        assert_eq!(
            pending,
            ["1", "3"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn discover_mid_dedups() {
        let state = CrawlState::new();
        assert!(state.discover_mid(9));
        assert!(!state.discover_mid(9));
    }
}
