//! Endpoints and transport settings for the EMT web trading service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Production host of the web trading service.
pub const DEFAULT_BASE_URL: &str = "https://jywg.18.cn";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const CAPTCHA_PATH: &str = "/Login/YZM?randNum=";
const LOGIN_PATH: &str = "/Login/Authentication?validatekey=";
const KEY_PAGE_PATH: &str = "/Trade/Buy";
const LOGIN_REFERER_PATH: &str = "/Login?el=1&clear=&returl=%2fTrade%2fBuy";
const PROBE_PATH: &str = "/Com/queryAssetAndPositionV1?validatekey=";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Endpoint configuration for [`EmtClient`](crate::EmtClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmtConfig {
    /// Scheme and host of the service, without a trailing slash.
    pub base_url: String,

    /// Per-request timeout, in seconds.
    pub timeout: u64,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for EmtConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EmtConfig {
    /// Configuration pointing at `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_secs().max(1);
        self
    }

    /// Per-request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub(crate) fn captcha_url(&self, rand_num: f64) -> String {
        format!("{}{CAPTCHA_PATH}{rand_num}", self.base_url)
    }

    pub(crate) fn login_url(&self) -> String {
        format!("{}{LOGIN_PATH}", self.base_url)
    }

    pub(crate) fn login_referer(&self) -> String {
        format!("{}{LOGIN_REFERER_PATH}", self.base_url)
    }

    pub(crate) fn key_page_url(&self) -> String {
        format!("{}{KEY_PAGE_PATH}", self.base_url)
    }

    pub(crate) fn probe_url(&self, validate_key: &str) -> String {
        format!("{}{PROBE_PATH}{validate_key}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let config = EmtConfig::default();
        assert_eq!(config.login_url(), "https://jywg.18.cn/Login/Authentication?validatekey=");
        assert_eq!(config.key_page_url(), "https://jywg.18.cn/Trade/Buy");
        assert_eq!(
            config.probe_url("abc"),
            "https://jywg.18.cn/Com/queryAssetAndPositionV1?validatekey=abc"
        );
        assert!(config.captcha_url(0.5).ends_with("/Login/YZM?randNum=0.5"));
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = EmtConfig::default().with_base_url("http://127.0.0.1:8080/");
        assert_eq!(config.key_page_url(), "http://127.0.0.1:8080/Trade/Buy");
    }
}
