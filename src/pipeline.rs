use crate::client::{self, ApiSession};
use crate::config::Config;
use crate::cookies::CookiePool;
use crate::ratelimit;
use crate::sink::BusSink;
use crate::state::CrawlState;
use crate::stats::{CrawlStats, StatsSnapshot};
use crate::store::{RecordKind, RecordStore, VideoProgress};
use crate::wbi::WbiSigner;
use eyre::{eyre, Result};
use futures::{stream, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const SEARCH_PAGE_SIZE: usize = 50;

// Queue bounds; sends block (backpressure) everywhere except MID discovery.
const SEARCH_FANIN_CAP: usize = 100;
const VIDEO_DETAIL_CAP: usize = 100;
const VIDEO_TASK_CAP: usize = 100;
const COMMENT_TASK_CAP: usize = 500;
const ACCOUNT_MID_CAP: usize = 1000;

/// A search hit: the raw record plus its extracted key.
struct VideoStub {
    bvid: String,
    record: Value,
}

/// Comment-traversal work item for one video.
struct VideoTask {
    bvid: String,
    aid: Option<u64>,
}

/// Reply-traversal work item for one root comment with children.
struct ReplyTask {
    aid: u64,
    root: u64,
}

struct Shared {
    cfg: Config,
    pool: Arc<CookiePool>,
    signer: Arc<WbiSigner>,
    store: Arc<RecordStore>,
    state: Arc<CrawlState>,
    sink: Arc<BusSink>,
    stats: Arc<CrawlStats>,
}

type SharedRx<T> = Arc<Mutex<mpsc::Receiver<T>>>;

async fn next_item<T>(rx: &SharedRx<T>) -> Option<T> {
    rx.lock().await.recv().await
}

pub struct Crawler {
    shared: Arc<Shared>,
}

impl Crawler {
    pub async fn new(cfg: Config) -> Result<Self> {
        ratelimit::init_global(cfg.rate_limit_rate, cfg.rate_limit_capacity);

        let pool = Arc::new(CookiePool::load(&cfg.cookie_config_path)?);
        if pool.validate_on_load {
            validate_cookies(&cfg, &pool).await?;
        }
        let status = pool.status();
        tracing::info!(
            total = status.total,
            enabled = status.enabled,
            valid = status.valid,
            strategy = ?status.strategy,
            "cookie pool loaded"
        );

        let signer = Arc::new(WbiSigner::new(client::build_http_client(
            &cfg.user_agent,
            cfg.request_timeout(),
        )?));

        let store = Arc::new(RecordStore::open(&cfg.data_dir)?);
        let state = Arc::new(CrawlState::new());
        if cfg.resume {
            state.hydrate(&store)?;
        }

        let sink = Arc::new(BusSink::connect(&cfg.kafka_brokers, store.clone())?);

        Ok(Self {
            shared: Arc::new(Shared {
                cfg,
                pool,
                signer,
                store,
                state,
                sink,
                stats: Arc::new(CrawlStats::default()),
            }),
        })
    }

    /// Run the crawl to completion and return the final counters.
    ///
    /// Shutdown is driven by channel closure in stage order: when the search
    /// workers finish, their fan-in closes, which drains the dedup consumer,
    /// which closes the detail queue, and so on down to the account stage.
    /// The pending-MIDs file is reconciled last.
    pub async fn run(&self) -> Result<StatsSnapshot> {
        let shared = &self.shared;
        let cfg = &shared.cfg;
        let n = cfg.n_threads;

        tracing::info!(
            keyword = %cfg.keyword,
            n_threads = n,
            pages_per_thread = cfg.pages_per_thread,
            resume = cfg.resume,
            resume_pending_mids = cfg.resume_pending_mids,
            rate = cfg.rate_limit_rate,
            capacity = cfg.rate_limit_capacity,
            "crawl starting"
        );

        let (stub_tx, mut stub_rx) = mpsc::channel::<Value>(SEARCH_FANIN_CAP);
        let (detail_tx, detail_rx) = mpsc::channel::<VideoStub>(VIDEO_DETAIL_CAP);
        let (video_tx, video_rx) = mpsc::channel::<VideoTask>(VIDEO_TASK_CAP);
        let (reply_tx, reply_rx) = mpsc::channel::<ReplyTask>(COMMENT_TASK_CAP);
        let (mid_tx, mid_rx) = mpsc::channel::<u64>(ACCOUNT_MID_CAP);

        // Stage S4 first so the pending backlog has a consumer.
        let mid_rx: SharedRx<u64> = Arc::new(Mutex::new(mid_rx));
        let s4: Vec<JoinHandle<()>> = (0..n)
            .map(|_| tokio::spawn(account_worker(shared.clone(), mid_rx.clone())))
            .collect();

        if cfg.resume_pending_mids {
            self.enqueue_pending_backlog(&mid_tx);
        }

        let reply_rx: SharedRx<ReplyTask> = Arc::new(Mutex::new(reply_rx));
        let s3_1: Vec<JoinHandle<()>> = (0..n)
            .map(|_| tokio::spawn(reply_worker(shared.clone(), reply_rx.clone(), mid_tx.clone())))
            .collect();

        let video_rx: SharedRx<VideoTask> = Arc::new(Mutex::new(video_rx));
        let s3: Vec<JoinHandle<()>> = (0..n)
            .map(|_| {
                tokio::spawn(comment_worker(
                    shared.clone(),
                    video_rx.clone(),
                    reply_tx.clone(),
                    mid_tx.clone(),
                ))
            })
            .collect();

        let detail_rx: SharedRx<VideoStub> = Arc::new(Mutex::new(detail_rx));
        let s2: Vec<JoinHandle<()>> = (0..n)
            .map(|_| {
                tokio::spawn(detail_worker(
                    shared.clone(),
                    detail_rx.clone(),
                    video_tx.clone(),
                    mid_tx.clone(),
                ))
            })
            .collect();

        let consumer = {
            let shared = shared.clone();
            let video_tx = video_tx.clone();
            tokio::spawn(async move {
                let mut seen = HashSet::new();
                while let Some(stub) = stub_rx.recv().await {
                    match route_stub(&mut seen, &shared.state, &stub) {
                        Some((bvid, true)) => {
                            // Already on the bus from an earlier run; its
                            // comments still get walked.
                            CrawlStats::bump(&shared.stats.videos_skipped);
                            let aid = stub.get("aid").and_then(as_u64_lenient);
                            if video_tx.send(VideoTask { bvid, aid }).await.is_err() {
                                return;
                            }
                        }
                        Some((bvid, false)) => {
                            if detail_tx.send(VideoStub { bvid, record: stub }).await.is_err() {
                                return;
                            }
                        }
                        None => {}
                    }
                }
            })
        };

        let s1: Vec<JoinHandle<()>> = (0..n)
            .map(|i| tokio::spawn(search_worker(shared.clone(), i, stub_tx.clone())))
            .collect();

        // The orchestrator's own sender handles must go away so each queue
        // closes once its producing stage is done.
        drop(stub_tx);
        drop(video_tx);
        drop(reply_tx);
        drop(mid_tx);

        join_stage("search", s1).await?;
        consumer
            .await
            .map_err(|e| eyre!("stub consumer panicked: {e}"))?;
        join_stage("detail", s2).await?;
        join_stage("comments", s3).await?;
        join_stage("replies", s3_1).await?;
        join_stage("accounts", s4).await?;

        let remaining = shared.state.unemitted_discoveries();
        tracing::info!(remaining = remaining.len(), "reconciling pending mids");
        shared.store.update_pending(remaining)?;

        let snapshot = shared.stats.snapshot();
        tracing::info!(?snapshot, "crawl complete");
        Ok(snapshot)
    }

    /// Re-enqueue MIDs left over from an interrupted run. A full queue is not
    /// an error: whatever does not fit stays in the pending file.
    fn enqueue_pending_backlog(&self, mid_tx: &mpsc::Sender<u64>) {
        let shared = &self.shared;
        let backlog = shared.store.load_pending();
        let mut queued = 0usize;
        for mid_s in &backlog {
            let Ok(mid) = mid_s.parse::<u64>() else {
                continue;
            };
            if shared.state.account_emitted(mid) {
                continue;
            }
            if !shared.state.discover_mid(mid) {
                continue;
            }
            if mid_tx.try_send(mid).is_ok() {
                queued += 1;
            }
        }
        tracing::info!(backlog = backlog.len(), queued, "pending mids re-enqueued");
    }
}

async fn validate_cookies(cfg: &Config, pool: &CookiePool) -> Result<()> {
    let http = client::build_http_client(&cfg.user_agent, cfg.request_timeout())?;
    stream::iter(pool.enabled_values())
        .for_each_concurrent(cfg.n_threads, |value| {
            let http = http.clone();
            async move {
                match client::validate_cookie(&http, &value).await {
                    Ok(true) => {}
                    Ok(false) => pool.mark_invalid(&value, true),
                    Err(err) => {
                        tracing::warn!(error = %err, "cookie validation probe failed; keeping cookie");
                    }
                }
            }
        })
        .await;
    Ok(())
}

async fn join_stage(name: &str, handles: Vec<JoinHandle<()>>) -> Result<()> {
    for handle in handles {
        handle
            .await
            .map_err(|e| eyre!("{name} worker panicked: {e}"))?;
    }
    tracing::debug!(stage = name, "stage drained");
    Ok(())
}

/// Random pause between units of work, independent of the rate limiter.
async fn politeness_pause(cfg: &Config) {
    let secs = rand::thread_rng().gen_range(cfg.delay_min..=cfg.delay_max);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

async fn open_session(shared: &Shared) -> Result<ApiSession, client::ApiError> {
    ApiSession::new(
        shared.pool.clone(),
        shared.signer.clone(),
        &shared.cfg.user_agent,
        shared.cfg.request_timeout(),
        shared.cfg.max_retries,
    )
    .await
}

/// Dedup-aware MID discovery: persist first, then a non-blocking enqueue. A
/// dropped send is rescued by the pending file on a later run.
async fn discover_mid(shared: &Shared, mid_tx: &mpsc::Sender<u64>, mid: u64) {
    if mid == 0 || !shared.state.discover_mid(mid) {
        return;
    }
    if let Err(err) = shared.store.save_pending(&mid.to_string()) {
        tracing::warn!(mid, error = %err, "failed to persist pending mid");
    }
    let _ = mid_tx.try_send(mid);
}

/// Stage S1: fetch this worker's contiguous page range and fan every hit into
/// the dedup consumer.
async fn search_worker(shared: Arc<Shared>, worker_idx: usize, stub_tx: mpsc::Sender<Value>) {
    let cfg = &shared.cfg;
    let session = match open_session(&shared).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(worker_idx, error = %err, "search session failed to open");
            CrawlStats::bump(&shared.stats.errors);
            return;
        }
    };

    let first = worker_idx * cfg.pages_per_thread + 1;
    let last = (worker_idx + 1) * cfg.pages_per_thread;
    for page in first..=last {
        match session.search_page(&cfg.keyword, page, SEARCH_PAGE_SIZE).await {
            Ok(data) => {
                let total_pages = data.get("numPages").and_then(Value::as_u64);
                let hits = data
                    .get("result")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                tracing::debug!(page, hits = hits.len(), "search page fetched");
                for stub in hits {
                    if stub_tx.send(stub).await.is_err() {
                        return;
                    }
                }
                if total_pages.is_some_and(|total| page as u64 >= total) {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(page, error = %err, "search page failed");
                CrawlStats::bump(&shared.stats.errors);
            }
        }
        politeness_pause(cfg).await;
    }
}

/// Stage S2: fetch the detail record, publish it, and hand the video to the
/// comment stage.
async fn detail_worker(
    shared: Arc<Shared>,
    detail_rx: SharedRx<VideoStub>,
    video_tx: mpsc::Sender<VideoTask>,
    mid_tx: mpsc::Sender<u64>,
) {
    let cfg = &shared.cfg;
    let session = match open_session(&shared).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "detail session failed to open");
            CrawlStats::bump(&shared.stats.errors);
            return;
        }
    };

    while let Some(stub) = next_item(&detail_rx).await {
        politeness_pause(cfg).await;
        let mut record = match session.video_detail(&stub.bvid).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(bvid = %stub.bvid, error = %err, "detail fetch failed");
                CrawlStats::bump(&shared.stats.errors);
                continue;
            }
        };
        if let Some(obj) = record.as_object_mut() {
            obj.insert("topic_keyword".to_string(), json!(cfg.keyword));
        }

        if let Err(err) = shared.sink.emit(RecordKind::Video, &stub.bvid, &record).await {
            tracing::warn!(bvid = %stub.bvid, error = %err, "video emit failed");
            CrawlStats::bump(&shared.stats.errors);
            continue;
        }
        shared.state.mark_video(&stub.bvid);
        CrawlStats::bump(&shared.stats.videos_emitted);

        if let Some(mid) = record
            .get("owner")
            .and_then(|o| o.get("mid"))
            .and_then(as_u64_lenient)
        {
            discover_mid(&shared, &mid_tx, mid).await;
        }

        let aid = record
            .get("aid")
            .and_then(as_u64_lenient)
            .or_else(|| stub.record.get("aid").and_then(as_u64_lenient));
        if video_tx
            .send(VideoTask {
                bvid: stub.bvid,
                aid,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Stage S3: walk the root-comment pages of one video, checkpointing the
/// cursor so an interrupted walk resumes where it stopped.
async fn comment_worker(
    shared: Arc<Shared>,
    video_rx: SharedRx<VideoTask>,
    reply_tx: mpsc::Sender<ReplyTask>,
    mid_tx: mpsc::Sender<u64>,
) {
    let cfg = &shared.cfg;
    let session = match open_session(&shared).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "comment session failed to open");
            CrawlStats::bump(&shared.stats.errors);
            return;
        }
    };

    'tasks: while let Some(task) = next_item(&video_rx).await {
        let progress = if cfg.resume {
            shared.store.get_progress(&task.bvid)
        } else {
            VideoProgress::default()
        };
        if progress.done {
            tracing::debug!(bvid = %task.bvid, "comments already complete; skipping");
            continue;
        }

        let aid = match resolve_aid(&session, &task, &progress).await {
            Some(aid) => aid,
            None => {
                tracing::warn!(bvid = %task.bvid, "could not resolve aid");
                CrawlStats::bump(&shared.stats.errors);
                continue;
            }
        };

        let mut cursor = progress.cursor;
        loop {
            let data = match session.main_comments(aid, &cursor).await {
                Ok(v) => v,
                Err(err) => {
                    // Checkpoint so the next run picks up from this offset.
                    tracing::warn!(bvid = %task.bvid, error = %err, "comment page failed; checkpointing");
                    CrawlStats::bump(&shared.stats.errors);
                    if let Err(e) = shared.store.save_progress(&task.bvid, &cursor, aid) {
                        tracing::warn!(bvid = %task.bvid, error = %e, "checkpoint write failed");
                    }
                    continue 'tasks;
                }
            };

            let replies = data
                .get("replies")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for reply in &replies {
                handle_comment(&shared, &mid_tx, Some(&reply_tx), aid, reply).await;
            }

            if cursor_is_end(&data) || replies.is_empty() {
                if let Err(e) = shared.store.mark_done(&task.bvid) {
                    tracing::warn!(bvid = %task.bvid, error = %e, "mark_done failed");
                }
                break;
            }
            match next_cursor(&data) {
                Some(next) if !next.is_empty() => cursor = next,
                _ => {
                    // No further offset offered: treat as exhausted.
                    if let Err(e) = shared.store.mark_done(&task.bvid) {
                        tracing::warn!(bvid = %task.bvid, error = %e, "mark_done failed");
                    }
                    break;
                }
            }
            if let Err(e) = shared.store.save_progress(&task.bvid, &cursor, aid) {
                tracing::warn!(bvid = %task.bvid, error = %e, "checkpoint write failed");
            }
            politeness_pause(cfg).await;
        }
    }
}

async fn resolve_aid(session: &ApiSession, task: &VideoTask, progress: &VideoProgress) -> Option<u64> {
    if progress.aid > 0 {
        return Some(progress.aid);
    }
    if let Some(aid) = task.aid {
        return Some(aid);
    }
    match session.video_detail(&task.bvid).await {
        Ok(detail) => detail.get("aid").and_then(as_u64_lenient),
        Err(err) => {
            tracing::warn!(bvid = %task.bvid, error = %err, "aid lookup failed");
            None
        }
    }
}

/// Stage S3.1: paginate the child replies under one root comment. An error
/// abandons this parent only.
async fn reply_worker(shared: Arc<Shared>, reply_rx: SharedRx<ReplyTask>, mid_tx: mpsc::Sender<u64>) {
    let cfg = &shared.cfg;
    let session = match open_session(&shared).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "reply session failed to open");
            CrawlStats::bump(&shared.stats.errors);
            return;
        }
    };

    while let Some(task) = next_item(&reply_rx).await {
        let mut page: u32 = 1;
        let mut fetched: usize = 0;
        loop {
            let data = match session.replies(task.aid, task.root, page).await {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(root = task.root, page, error = %err, "reply page failed; abandoning parent");
                    CrawlStats::bump(&shared.stats.errors);
                    break;
                }
            };
            let replies = data
                .get("replies")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let total = data
                .get("page")
                .and_then(|p| p.get("count"))
                .and_then(as_u64_lenient);

            for reply in &replies {
                handle_comment(&shared, &mid_tx, None, task.aid, reply).await;
            }
            fetched += replies.len();

            if reply_traversal_done(fetched, replies.len(), total) {
                break;
            }
            page += 1;
            politeness_pause(cfg).await;
        }
    }
}

/// Shared emit path for root comments and child replies: discover the author,
/// dedup on rpid, publish, and (for roots) enqueue the reply subtree.
async fn handle_comment(
    shared: &Shared,
    mid_tx: &mpsc::Sender<u64>,
    reply_tx: Option<&mpsc::Sender<ReplyTask>>,
    aid: u64,
    reply: &Value,
) {
    let Some(rpid) = reply.get("rpid").and_then(as_u64_lenient) else {
        return;
    };
    if let Some(mid) = reply.get("mid").and_then(as_u64_lenient) {
        discover_mid(shared, mid_tx, mid).await;
    }

    if shared.state.comment_emitted(rpid) {
        CrawlStats::bump(&shared.stats.comments_skipped);
    } else {
        match shared
            .sink
            .emit(RecordKind::Comment, &rpid.to_string(), reply)
            .await
        {
            Ok(()) => {
                shared.state.mark_comment(rpid);
                CrawlStats::bump(&shared.stats.comments_emitted);
            }
            Err(err) => {
                tracing::warn!(rpid, error = %err, "comment emit failed");
                CrawlStats::bump(&shared.stats.errors);
                // Not marked emitted; a later pass retries it, children wait.
                return;
            }
        }
    }

    let rcount = reply.get("rcount").and_then(as_u64_lenient).unwrap_or(0);
    if rcount > 0 {
        if let Some(tx) = reply_tx {
            let _ = tx.send(ReplyTask { aid, root: rpid }).await;
        }
    }
}

/// Stage S4: fetch the profile card for each discovered user.
async fn account_worker(shared: Arc<Shared>, mid_rx: SharedRx<u64>) {
    let cfg = &shared.cfg;
    let session = match open_session(&shared).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "account session failed to open");
            CrawlStats::bump(&shared.stats.errors);
            return;
        }
    };

    while let Some(mid) = next_item(&mid_rx).await {
        if shared.state.account_emitted(mid) {
            CrawlStats::bump(&shared.stats.accounts_skipped);
            continue;
        }
        politeness_pause(cfg).await;
        let card = match session.user_card(mid).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(mid, error = %err, "user card fetch failed");
                CrawlStats::bump(&shared.stats.errors);
                continue;
            }
        };
        match shared.sink.emit(RecordKind::Account, &mid.to_string(), &card).await {
            Ok(()) => {
                shared.state.mark_account(mid);
                CrawlStats::bump(&shared.stats.accounts_emitted);
            }
            Err(err) => {
                tracing::warn!(mid, error = %err, "account emit failed");
                CrawlStats::bump(&shared.stats.errors);
            }
        }
    }
}

/// Decide where a search stub goes: `None` drops it (no key, or repeat within
/// this run); `(bvid, true)` replays straight to the comment stage; `(bvid,
/// false)` is fresh work for the detail stage.
fn route_stub(
    seen: &mut HashSet<String>,
    state: &CrawlState,
    stub: &Value,
) -> Option<(String, bool)> {
    let bvid = stub.get("bvid").and_then(Value::as_str)?.to_string();
    if bvid.is_empty() || !seen.insert(bvid.clone()) {
        return None;
    }
    let replay = state.video_emitted(&bvid);
    Some((bvid, replay))
}

/// Reply pagination stops on an empty page or once the cumulative count
/// (including dedup-skipped replies) reaches the server-reported total.
fn reply_traversal_done(fetched: usize, page_len: usize, total: Option<u64>) -> bool {
    if page_len == 0 {
        return true;
    }
    match total {
        Some(t) => fetched as u64 >= t,
        None => false,
    }
}

/// Numeric fields sometimes arrive as JSON strings; accept both.
fn as_u64_lenient(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn cursor_is_end(data: &Value) -> bool {
    data.get("cursor")
        .and_then(|c| c.get("is_end"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn next_cursor(data: &Value) -> Option<String> {
    data.get("cursor")
        .and_then(|c| c.get("pagination_reply"))
        .and_then(|p| p.get("next_offset"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_traversal_stops_at_server_total() {
        // 25 replies served as a page of 20 then a page of 5.
        assert!(!reply_traversal_done(20, 20, Some(25)));
        assert!(reply_traversal_done(25, 5, Some(25)));
    }

    #[test]
    fn reply_traversal_stops_on_empty_page() {
        assert!(reply_traversal_done(0, 0, None));
        assert!(reply_traversal_done(40, 0, Some(100)));
    }

    #[test]
    fn reply_traversal_continues_without_total() {
        assert!(!reply_traversal_done(40, 20, None));
    }

    #[test]
    fn route_stub_dedups_and_replays() {
        let state = CrawlState::new();
        state.mark_video("BV_old");
        let mut seen = HashSet::new();

        let fresh = json!({"bvid": "BV_new", "aid": 10});
        assert_eq!(
            route_stub(&mut seen, &state, &fresh),
            Some(("BV_new".to_string(), false))
        );
        // Repeat within the same run is dropped outright.
        assert_eq!(route_stub(&mut seen, &state, &fresh), None);

        // Emitted in an earlier run: bypasses detail, still crawled.
        let replay = json!({"bvid": "BV_old"});
        assert_eq!(
            route_stub(&mut seen, &state, &replay),
            Some(("BV_old".to_string(), true))
        );

        assert_eq!(route_stub(&mut seen, &state, &json!({"title": "x"})), None);
    }

    #[test]
    fn lenient_u64_accepts_numbers_and_strings() {
        assert_eq!(as_u64_lenient(&json!(42)), Some(42));
        assert_eq!(as_u64_lenient(&json!("42")), Some(42));
        assert_eq!(as_u64_lenient(&json!("x")), None);
        assert_eq!(as_u64_lenient(&json!(null)), None);
    }

    #[test]
    fn cursor_projection() {
        let data = json!({
            "cursor": {
                "is_end": false,
                "pagination_reply": {"next_offset": "c7"}
            },
            "replies": []
        });
        assert!(!cursor_is_end(&data));
        assert_eq!(next_cursor(&data), Some("c7".to_string()));

        let done = json!({"cursor": {"is_end": true}});
        assert!(cursor_is_end(&done));
        assert_eq!(next_cursor(&done), None);

        // Absent cursor block reads as "not ended" with no next offset.
        assert!(!cursor_is_end(&json!({})));
        assert_eq!(next_cursor(&json!({})), None);
    }
}
