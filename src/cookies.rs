use eyre::{eyre, Result};
use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use std::sync::RwLock;

/// Transient failures tolerated before a cookie is evicted from rotation.
const DEFAULT_MAX_FAILS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Random,
}

#[derive(Debug, Clone)]
pub struct Cookie {
    pub value: String,
    pub name: String,
    pub enabled: bool,
    pub valid: bool,
    pub fail_count: u32,
    pub max_fails: u32,
}

impl Cookie {
    fn usable(&self) -> bool {
        self.enabled && self.valid
    }
}

#[derive(Debug, Deserialize)]
struct CookieFileEntry {
    value: String,
    #[serde(default)]
    name: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CookieFileSettings {
    #[serde(default = "default_strategy")]
    strategy: String,
    #[serde(default)]
    validate_on_load: bool,
}

impl Default for CookieFileSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            validate_on_load: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CookieFile {
    #[serde(default)]
    cookies: Vec<CookieFileEntry>,
    #[serde(default)]
    settings: CookieFileSettings,
}

fn default_true() -> bool {
    true
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub total: usize,
    pub enabled: usize,
    pub valid: usize,
    pub strategy: Strategy,
}

struct PoolInner {
    cookies: Vec<Cookie>,
    rr_index: usize,
}

/// Rotating pool of attachable identities.
///
/// Eviction only ever shrinks the usable set; cookies are never rehabilitated
/// within a process lifetime.
pub struct CookiePool {
    inner: RwLock<PoolInner>,
    strategy: Strategy,
    pub validate_on_load: bool,
}

impl CookiePool {
    pub fn new(values: Vec<(String, String, bool)>, strategy: Strategy) -> Self {
        let cookies = values
            .into_iter()
            .map(|(value, name, enabled)| Cookie {
                value,
                name,
                enabled,
                valid: true,
                fail_count: 0,
                max_fails: DEFAULT_MAX_FAILS,
            })
            .collect();
        Self {
            inner: RwLock::new(PoolInner {
                cookies,
                rr_index: 0,
            }),
            strategy,
            validate_on_load: false,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| eyre!("failed to read cookie file {}: {e}", path.display()))?;
        let file: CookieFile = serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse cookie file {}: {e}", path.display()))?;

        let strategy = match file.settings.strategy.as_str() {
            "round_robin" => Strategy::RoundRobin,
            "random" => Strategy::Random,
            other => return Err(eyre!("unknown cookie strategy '{other}'")),
        };

        let mut pool = Self::new(
            file.cookies
                .into_iter()
                .map(|c| (c.value, c.name, c.enabled))
                .collect(),
            strategy,
        );
        pool.validate_on_load = file.settings.validate_on_load;
        Ok(pool)
    }

    /// Next usable cookie value under the configured strategy. An empty usable
    /// set yields the empty string; requests then go out anonymously.
    pub fn get(&self) -> String {
        let mut inner = self.inner.write().expect("cookie pool lock poisoned");
        let usable: Vec<usize> = inner
            .cookies
            .iter()
            .enumerate()
            .filter(|(_, c)| c.usable())
            .map(|(i, _)| i)
            .collect();
        if usable.is_empty() {
            return String::new();
        }
        let pick = match self.strategy {
            Strategy::RoundRobin => {
                let pick = usable[inner.rr_index % usable.len()];
                inner.rr_index = (inner.rr_index + 1) % usable.len();
                pick
            }
            Strategy::Random => usable[rand::thread_rng().gen_range(0..usable.len())],
        };
        inner.cookies[pick].value.clone()
    }

    /// Record a failure for the cookie carrying `value`. Permanent failures
    /// disable the cookie outright; transient ones count toward eviction.
    pub fn mark_invalid(&self, value: &str, permanent: bool) {
        if value.is_empty() {
            return;
        }
        let mut inner = self.inner.write().expect("cookie pool lock poisoned");
        for cookie in inner.cookies.iter_mut().filter(|c| c.value == value) {
            if permanent {
                cookie.enabled = false;
                cookie.valid = false;
                tracing::warn!(name = %cookie.name, "cookie permanently disabled");
            } else {
                cookie.fail_count += 1;
                if cookie.fail_count >= cookie.max_fails {
                    cookie.valid = false;
                    tracing::warn!(
                        name = %cookie.name,
                        fails = cookie.fail_count,
                        "cookie evicted after repeated failures"
                    );
                }
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.read().expect("cookie pool lock poisoned");
        PoolStatus {
            total: inner.cookies.len(),
            enabled: inner.cookies.iter().filter(|c| c.enabled).count(),
            valid: inner.cookies.iter().filter(|c| c.valid).count(),
            strategy: self.strategy,
        }
    }

    /// Snapshot of cookie values that are enabled, for startup validation.
    pub fn enabled_values(&self) -> Vec<String> {
        let inner = self.inner.read().expect("cookie pool lock poisoned");
        inner
            .cookies
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.value.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(values: &[&str]) -> CookiePool {
        CookiePool::new(
            values
                .iter()
                .map(|v| (v.to_string(), format!("cookie-{v}"), true))
                .collect(),
            Strategy::RoundRobin,
        )
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let pool = pool_of(&["c1", "c2", "c3"]);
        let got: Vec<String> = (0..4).map(|_| pool.get()).collect();
        assert_eq!(got, vec!["c1", "c2", "c3", "c1"]);
    }

    #[test]
    fn three_transient_failures_evict() {
        let pool = pool_of(&["c1"]);
        pool.mark_invalid("c1", false);
        pool.mark_invalid("c1", false);
        assert_eq!(pool.get(), "c1");
        pool.mark_invalid("c1", false);
        assert_eq!(pool.get(), "");
        assert_eq!(pool.status().valid, 0);
    }

    #[test]
    fn eviction_shrinks_rotation() {
        let pool = pool_of(&["c1", "c2"]);
        for _ in 0..3 {
            pool.mark_invalid("c1", false);
        }
        assert_eq!(pool.get(), "c2");
        assert_eq!(pool.get(), "c2");
        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.valid, 1);
        assert_eq!(status.enabled, 2);
    }

    #[test]
    fn permanent_failure_clears_enabled_and_valid() {
        let pool = pool_of(&["c1"]);
        pool.mark_invalid("c1", true);
        let status = pool.status();
        assert_eq!(status.enabled, 0);
        assert_eq!(status.valid, 0);
        assert_eq!(pool.get(), "");
    }

    #[test]
    fn parses_cookie_file() {
        let raw = r#"{
            "cookies": [
                {"value": "SESSDATA=a", "name": "main"},
                {"value": "SESSDATA=b", "enabled": false}
            ],
            "settings": {"strategy": "round_robin", "validate_on_load": true}
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, raw).unwrap();
        let pool = CookiePool::load(&path).unwrap();
        assert!(pool.validate_on_load);
        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.enabled, 1);
        // The disabled cookie never enters rotation.
        assert_eq!(pool.get(), "SESSDATA=a");
        assert_eq!(pool.get(), "SESSDATA=a");
    }
}
