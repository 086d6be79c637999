use crate::cookies::CookiePool;
use crate::ratelimit;
use crate::wbi::{self, WbiSigner};
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub const API_BASE: &str = "https://api.bilibili.com";
const HOME_URL: &str = "https://www.bilibili.com";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Platform codes that indicate the attached identity is bad, not the request.
const CREDENTIAL_ERROR_CODES: [i64; 3] = [-101, -352, -412];

const RETRY_BASE_DELAY: f64 = 1.0;
const RETRY_MAX_DELAY: f64 = 30.0;

pub const REPLY_PAGE_SIZE: u32 = 20;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("platform error {code}: {message}")]
    Platform { code: i64, message: String },
}

impl ApiError {
    pub fn is_credential_error(&self) -> bool {
        matches!(self, ApiError::Platform { code, .. } if CREDENTIAL_ERROR_CODES.contains(code))
    }
}

/// Unwrap the `{code, message, data}` envelope every endpoint responds with.
fn decode_envelope(mut body: Value) -> Result<Value, ApiError> {
    let code = body.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        return Err(ApiError::Platform { code, message });
    }
    Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

/// `pagination_str` for the signed main-comments endpoint: the JSON offset
/// wrapper, URL-encoded except that `:` stays literal. The upstream signature
/// is over exactly these bytes, so the encoding must not drift.
pub fn encode_pagination(cursor: &str) -> String {
    let raw = format!(r#"{{"offset":"{cursor}"}}"#);
    urlencoding::encode(&raw).replace("%3A", ":")
}

/// One HTTP session per worker: an identity from the cookie pool, default
/// headers, and a warmed-up client. Rebinds its identity when the platform
/// reports the current one failed.
pub struct ApiSession {
    http: reqwest::Client,
    cookie: Mutex<String>,
    pool: Arc<CookiePool>,
    signer: Arc<WbiSigner>,
    max_retries: u32,
}

impl ApiSession {
    pub async fn new(
        pool: Arc<CookiePool>,
        signer: Arc<WbiSigner>,
        user_agent: &str,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ApiError> {
        let http = build_http_client(user_agent, timeout)?;

        // Warm-up against the home page establishes server-side session state
        // before the first API call.
        ratelimit::global().acquire(1.0, true).await;
        http.get(HOME_URL).send().await?;

        Ok(Self {
            http,
            cookie: Mutex::new(pool.get()),
            pool,
            signer,
            max_retries,
        })
    }

    /// Retry an outbound call with exponential backoff and uniform jitter.
    /// Every attempt independently passes the rate-limiter gate.
    pub async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    let delay = (RETRY_BASE_DELAY * 2f64.powi(attempt as i32)
                        + rand::thread_rng().gen::<f64>())
                    .min(RETRY_MAX_DELAY);
                    tracing::warn!(attempt, delay_s = delay, error = %err, "request failed; retrying");
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn raw_get(&self, url: &str) -> Result<Value, ApiError> {
        ratelimit::global().acquire(1.0, true).await;
        let cookie = self.cookie.lock().expect("cookie slot poisoned").clone();
        let mut req = self.http.get(url);
        if !cookie.is_empty() {
            req = req.header(header::COOKIE, cookie.as_str());
        }
        let body: Value = req.send().await?.json().await?;
        match decode_envelope(body) {
            Err(err) if err.is_credential_error() => {
                // Count a strike against the identity and rebind before the
                // caller decides whether to retry.
                self.pool.mark_invalid(&cookie, false);
                *self.cookie.lock().expect("cookie slot poisoned") = self.pool.get();
                Err(err)
            }
            other => other,
        }
    }

    pub async fn search_page(
        &self,
        keyword: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Value, ApiError> {
        let url = format!(
            "{API_BASE}/x/web-interface/search/type?page={page}&page_size={page_size}&keyword={}&search_type=video&order=",
            urlencoding::encode(keyword)
        );
        self.with_retry(|| self.raw_get(&url)).await
    }

    pub async fn video_detail(&self, bvid: &str) -> Result<Value, ApiError> {
        let url = format!("{API_BASE}/x/web-interface/view?bvid={bvid}");
        self.with_retry(|| self.raw_get(&url)).await
    }

    /// One page of root comments for `aid`, signed. An empty cursor asks for
    /// the first page and carries the extra empty `seek_rpid` the endpoint
    /// expects there.
    pub async fn main_comments(&self, aid: u64, cursor: &str) -> Result<Value, ApiError> {
        self.with_retry(|| async {
            let mut params = BTreeMap::new();
            params.insert("mode".to_string(), "2".to_string());
            params.insert("oid".to_string(), aid.to_string());
            params.insert("plat".to_string(), "1".to_string());
            params.insert("type".to_string(), "1".to_string());
            params.insert("web_location".to_string(), "1315875".to_string());
            params.insert("pagination_str".to_string(), encode_pagination(cursor));
            if cursor.is_empty() {
                params.insert("seek_rpid".to_string(), String::new());
            }
            // Signed per attempt so wts stays fresh across backoff sleeps.
            let (w_rid, _wts) = self.signer.sign(&mut params).await;
            let query = wbi::encode_query(&params);
            let url = format!("{API_BASE}/x/v2/reply/wbi/main?{query}&w_rid={w_rid}");
            self.raw_get(&url).await
        })
        .await
    }

    /// One page of child replies under root comment `root`.
    pub async fn replies(&self, aid: u64, root: u64, page: u32) -> Result<Value, ApiError> {
        let url = format!(
            "{API_BASE}/x/v2/reply/reply?oid={aid}&type=1&root={root}&ps={REPLY_PAGE_SIZE}&pn={page}"
        );
        self.with_retry(|| self.raw_get(&url)).await
    }

    pub async fn user_card(&self, mid: u64) -> Result<Value, ApiError> {
        let url = format!("{API_BASE}/x/web-interface/card?mid={mid}&photo=true");
        self.with_retry(|| self.raw_get(&url)).await
    }
}

pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(header::REFERER, HeaderValue::from_static(HOME_URL));
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .cookie_store(true)
        .timeout(timeout)
        .build()?)
}

/// Probe the nav endpoint with one cookie. `Ok(false)` means the platform
/// rejected the identity outright.
pub async fn validate_cookie(http: &reqwest::Client, cookie: &str) -> Result<bool, ApiError> {
    ratelimit::global().acquire(1.0, true).await;
    let url = format!("{API_BASE}/x/web-interface/nav");
    let mut req = http.get(&url);
    if !cookie.is_empty() {
        req = req.header(header::COOKIE, cookie);
    }
    let body: Value = req.send().await?.json().await?;
    match decode_envelope(body) {
        Ok(_) => Ok(true),
        Err(err) if err.is_credential_error() => Ok(false),
        // Any other platform code is not evidence against the cookie itself.
        Err(ApiError::Platform { .. }) => Ok(true),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_zero_code_yields_data() {
        let body = json!({"code": 0, "message": "0", "data": {"aid": 10}});
        let data = decode_envelope(body).unwrap();
        assert_eq!(data["aid"], 10);
    }

    #[test]
    fn envelope_nonzero_code_is_platform_error() {
        let body = json!({"code": -400, "message": "bad request", "data": null});
        let err = decode_envelope(body).unwrap_err();
        match err {
            ApiError::Platform { code, message } => {
                assert_eq!(code, -400);
                assert_eq!(message, "bad request");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn credential_codes_are_classified() {
        for code in [-101, -352, -412] {
            let err = decode_envelope(json!({"code": code, "message": "x"})).unwrap_err();
            assert!(err.is_credential_error(), "code {code} not classified");
        }
        let err = decode_envelope(json!({"code": -400, "message": "x"})).unwrap_err();
        assert!(!err.is_credential_error());
    }

    #[test]
    fn pagination_str_preserves_colon() {
        assert_eq!(encode_pagination(""), "%7B%22offset%22:%22%22%7D");
        let encoded = encode_pagination("cursor-7");
        assert_eq!(encoded, "%7B%22offset%22:%22cursor-7%22%7D");
        assert!(!encoded.contains("%3A"));
    }

    #[test]
    fn missing_data_field_decodes_to_null() {
        let data = decode_envelope(json!({"code": 0})).unwrap();
        assert!(data.is_null());
    }
}
