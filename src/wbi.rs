use crate::ratelimit;
use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Reorder applied to `img_key ∥ sub_key` to derive the mixin key.
const MIXIN_KEY_TABLE: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Known-good mixin key used when the nav endpoint cannot be reached.
const FALLBACK_MIXIN_KEY: &str = "ea1db124af3c7062474693fa704f4ff8";

const MIXIN_KEY_TTL: Duration = Duration::from_secs(3600);

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

struct CachedKey {
    key: String,
    fetched_at: Instant,
}

/// Computes the time-bound `w_rid` signature required by the wbi endpoints.
///
/// The mixin key is derived from two URLs served by the nav endpoint and
/// cached for an hour. The cache lock is held across the refresh so that
/// concurrent signers cause at most one nav fetch per TTL epoch.
pub struct WbiSigner {
    http: reqwest::Client,
    cache: Mutex<Option<CachedKey>>,
}

impl WbiSigner {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: Mutex::new(None),
        }
    }

    /// Sign `params` in place: inserts `wts` (current Unix seconds) and
    /// returns the computed `w_rid` together with the timestamp used.
    ///
    /// Values must already be URL-encoded by the caller where applicable; the
    /// signature covers the literal byte sequence that goes on the wire.
    pub async fn sign(&self, params: &mut BTreeMap<String, String>) -> (String, u64) {
        let mixin = self.mixin_key().await;
        let wts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        params.insert("wts".to_string(), wts.to_string());
        let query = encode_query(params);
        (w_rid(&query, &mixin), wts)
    }

    /// Current mixin key, refreshed from the nav endpoint when the cached one
    /// has expired. Falls back to the baked-in key on fetch failure.
    async fn mixin_key(&self) -> String {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < MIXIN_KEY_TTL {
                return cached.key.clone();
            }
        }

        let key = match self.fetch_keys().await {
            Ok((img_key, sub_key)) => mixin_key(&format!("{img_key}{sub_key}")),
            Err(err) => {
                tracing::warn!(error = %err, "nav key fetch failed; using fallback mixin key");
                FALLBACK_MIXIN_KEY.to_string()
            }
        };
        *cache = Some(CachedKey {
            key: key.clone(),
            fetched_at: Instant::now(),
        });
        key
    }

    async fn fetch_keys(&self) -> eyre::Result<(String, String)> {
        ratelimit::global().acquire(1.0, true).await;
        let body: serde_json::Value = self.http.get(NAV_URL).send().await?.json().await?;
        let wbi_img = body
            .get("data")
            .and_then(|d| d.get("wbi_img"))
            .ok_or_else(|| eyre::eyre!("nav response missing wbi_img"))?;
        let img_url = wbi_img
            .get("img_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| eyre::eyre!("nav response missing img_url"))?;
        let sub_url = wbi_img
            .get("sub_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| eyre::eyre!("nav response missing sub_url"))?;
        Ok((key_stem(img_url).to_string(), key_stem(sub_url).to_string()))
    }
}

/// Filename stem of a key URL: the final path segment up to the first dot.
fn key_stem(url: &str) -> &str {
    let name = url.rsplit('/').next().unwrap_or(url);
    name.split('.').next().unwrap_or(name)
}

/// Apply the fixed reorder to the concatenated keys; the mixin key is the
/// first 32 characters of the result.
pub fn mixin_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    MIXIN_KEY_TABLE
        .iter()
        .filter_map(|&i| bytes.get(i).copied())
        .take(32)
        .map(char::from)
        .collect()
}

/// `k1=v1&k2=v2&…` over lexicographically ordered keys.
pub fn encode_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase-hex MD5 over the sorted query with the mixin key appended.
pub fn w_rid(query: &str, mixin: &str) -> String {
    format!("{:x}", md5::compute(format!("{query}{mixin}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_KEYS: &str = "7cd084941338484aae1ad9425b84077c4932caff0ff746eab6f01bf08b70ac45";

    #[test]
    fn mixin_key_applies_reorder_and_truncates() {
        let key = mixin_key(RAW_KEYS);
        assert_eq!(key.len(), 32);
        assert_eq!(key, "ea1db124af3c7062474693fa704f4ff8");
        // Deterministic for identical input.
        assert_eq!(key, mixin_key(RAW_KEYS));
    }

    #[test]
    fn signature_is_deterministic_for_fixed_time() {
        let mut params = BTreeMap::new();
        params.insert("type".to_string(), "1".to_string());
        params.insert("oid".to_string(), "5".to_string());
        params.insert("wts".to_string(), "1700000000".to_string());
        let query = encode_query(&params);
        assert_eq!(query, "oid=5&type=1&wts=1700000000");
        let rid = w_rid(&query, &mixin_key(RAW_KEYS));
        assert_eq!(rid, "978beea166257e83538499e8a8f1df35");
    }

    #[test]
    fn query_keys_sort_lexicographically() {
        let mut params = BTreeMap::new();
        params.insert("page".to_string(), "1".to_string());
        params.insert("keyword".to_string(), "rust".to_string());
        params.insert("wts".to_string(), "1700000000".to_string());
        let query = encode_query(&params);
        assert_eq!(query, "keyword=rust&page=1&wts=1700000000");
        let rid = w_rid(&query, FALLBACK_MIXIN_KEY);
        assert_eq!(rid, "193bc5fa1c576687c955d847fc73491f");
    }

    #[test]
    fn key_stem_strips_path_and_extension() {
        assert_eq!(
            key_stem("https://i0.example.com/bfs/wbi/7cd08494.png"),
            "7cd08494"
        );
        assert_eq!(key_stem("plain"), "plain");
    }
}
