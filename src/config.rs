use crate::client::DEFAULT_USER_AGENT;
use eyre::{eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Crawl configuration, loaded from a JSON file. Every field has a default so
/// a minimal config only needs the keyword.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Search term driving discovery.
    pub keyword: String,
    /// Workers per pipeline stage.
    pub n_threads: usize,
    /// Search pages each discovery worker fetches.
    pub pages_per_thread: usize,
    /// Politeness jitter bounds in seconds.
    pub delay_min: f64,
    pub delay_max: f64,
    /// Hydrate dedup and progress state from the durable store on start.
    pub resume: bool,
    /// Re-enqueue the persisted pending MIDs on start.
    pub resume_pending_mids: bool,
    pub cookie_config_path: PathBuf,
    pub rate_limit_rate: f64,
    pub rate_limit_capacity: f64,
    pub user_agent: String,
    pub kafka_brokers: String,
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            n_threads: 3,
            pages_per_thread: 2,
            delay_min: 2.0,
            delay_max: 4.0,
            resume: true,
            resume_pending_mids: true,
            cookie_config_path: PathBuf::from("cookies.json"),
            rate_limit_rate: 2.0,
            rate_limit_capacity: 5.0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            kafka_brokers: "localhost:9092".to_string(),
            data_dir: PathBuf::from("sent_records"),
            request_timeout_secs: 12,
            max_retries: 3,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| eyre!("failed to read config {}: {e}", path.display()))?;
        let cfg: Config = serde_json::from_str(&raw)
            .map_err(|e| eyre!("failed to parse config {}: {e}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.keyword.is_empty() {
            return Err(eyre!("config: keyword must not be empty"));
        }
        if self.n_threads == 0 {
            return Err(eyre!("config: n_threads must be > 0"));
        }
        if self.pages_per_thread == 0 {
            return Err(eyre!("config: pages_per_thread must be > 0"));
        }
        if self.delay_min < 0.0 || self.delay_max < self.delay_min {
            return Err(eyre!(
                "config: politeness window invalid ({} .. {})",
                self.delay_min,
                self.delay_max
            ));
        }
        if self.rate_limit_rate <= 0.0 || self.rate_limit_capacity <= 0.0 {
            return Err(eyre!("config: rate limit parameters must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_str(raw: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, raw).unwrap();
        Config::load(&path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = load_str(r#"{"keyword": "rust"}"#).unwrap();
        assert_eq!(cfg.keyword, "rust");
        assert_eq!(cfg.n_threads, 3);
        assert_eq!(cfg.pages_per_thread, 2);
        assert!(cfg.resume);
        assert!(cfg.resume_pending_mids);
        assert_eq!(cfg.rate_limit_rate, 2.0);
        assert_eq!(cfg.rate_limit_capacity, 5.0);
        assert_eq!(cfg.data_dir, PathBuf::from("sent_records"));
        assert_eq!(cfg.kafka_brokers, "localhost:9092");
    }

    #[test]
    fn overrides_apply() {
        let cfg = load_str(
            r#"{
                "keyword": "cats",
                "n_threads": 5,
                "delay_min": 0.5,
                "delay_max": 1.5,
                "resume": false,
                "kafka_brokers": "broker:9092"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.n_threads, 5);
        assert!(!cfg.resume);
        assert_eq!(cfg.kafka_brokers, "broker:9092");
    }

    #[test]
    fn empty_keyword_rejected() {
        assert!(load_str(r#"{}"#).is_err());
    }

    #[test]
    fn inverted_delay_window_rejected() {
        assert!(load_str(r#"{"keyword": "x", "delay_min": 5.0, "delay_max": 1.0}"#).is_err());
    }
}
