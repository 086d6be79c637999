use std::sync::atomic::{AtomicUsize, Ordering};

/// Crawl-wide counters. Incremented per item with relaxed atomics; snapshotted
/// once at the end of the run.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub videos_emitted: AtomicUsize,
    pub videos_skipped: AtomicUsize,
    pub comments_emitted: AtomicUsize,
    pub comments_skipped: AtomicUsize,
    pub accounts_emitted: AtomicUsize,
    pub accounts_skipped: AtomicUsize,
    pub errors: AtomicUsize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub videos_emitted: usize,
    pub videos_skipped: usize,
    pub comments_emitted: usize,
    pub comments_skipped: usize,
    pub accounts_emitted: usize,
    pub accounts_skipped: usize,
    pub errors: usize,
}

impl CrawlStats {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            videos_emitted: self.videos_emitted.load(Ordering::Relaxed),
            videos_skipped: self.videos_skipped.load(Ordering::Relaxed),
            comments_emitted: self.comments_emitted.load(Ordering::Relaxed),
            comments_skipped: self.comments_skipped.load(Ordering::Relaxed),
            accounts_emitted: self.accounts_emitted.load(Ordering::Relaxed),
            accounts_skipped: self.accounts_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_all_counters() {
        let stats = CrawlStats::default();
        CrawlStats::bump(&stats.videos_emitted);
        CrawlStats::bump(&stats.videos_emitted);
        CrawlStats::bump(&stats.errors);
        let snap = stats.snapshot();
        assert_eq!(snap.videos_emitted, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.comments_emitted, 0);
    }
}
