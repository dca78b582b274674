//! Session with the EMT web trading service.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use emtl_session::{Credential, Error, Result, TradingSession};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER, SET_COOKIE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::captcha::SharedCaptchaSolver;
use crate::config::EmtConfig;
use crate::crypto::encrypt_password;
use crate::response::{check_response, message, status_code, transport_error};

static VALIDATE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"id="em_validatekey" type="hidden" value="(.*?)""#)
        .unwrap_or_else(|e| unreachable!("static pattern is valid: {e}"))
});

/// Everything needed to resume an authenticated session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmtState {
    /// Account the session belongs to.
    pub username: String,

    /// Key the service issued at login; `None` until logged in.
    pub validate_key: Option<String>,

    /// Cookies set by the service, by name.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

/// One authenticated connection to the service.
///
/// Each client keeps its own cookies and key; only the captcha solver is
/// shared. Not safe for concurrent use.
pub struct EmtClient {
    http: Client,
    config: Arc<EmtConfig>,
    solver: SharedCaptchaSolver,
    state: EmtState,
}

impl EmtClient {
    /// Create an unauthenticated client.
    pub fn new(config: Arc<EmtConfig>, solver: SharedCaptchaSolver) -> Result<Self> {
        Self::with_state(config, solver, EmtState::default())
    }

    /// Resume a client from a saved state.
    pub fn with_state(
        config: Arc<EmtConfig>,
        solver: SharedCaptchaSolver,
        state: EmtState,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            solver,
            state,
        })
    }

    /// Account name, empty before the first login.
    pub fn username(&self) -> &str {
        &self.state.username
    }

    /// Current validation key.
    pub fn validate_key(&self) -> Option<&str> {
        self.state.validate_key.as_deref()
    }

    /// Current session state.
    pub fn state(&self) -> &EmtState {
        &self.state
    }

    /// Download a captcha and solve it. Returns the random number the
    /// image was requested with and the recognised code.
    fn captcha(&mut self) -> Result<(f64, String)> {
        let rand_num: f64 = rand::random();
        let request = self.http.get(self.config.captcha_url(rand_num));
        let (_, image) = self.send(request)?;
        let code = self.solver.solve(&image)?;
        debug!(rand_num, "Captcha solved");
        Ok((rand_num, code))
    }

    /// Scrape the validation key from the trade page.
    fn fetch_validate_key(&mut self) -> Result<Option<String>> {
        let request = self.http.get(self.config.key_page_url());
        let (_, body) = self.send(request)?;
        let page = String::from_utf8_lossy(&body);

        let key = VALIDATE_KEY_RE
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|k| !k.is_empty());
        Ok(key)
    }

    /// Send a request with this session's cookies, record any new ones and
    /// check the response.
    fn send(&mut self, request: RequestBuilder) -> Result<(Option<serde_json::Value>, Vec<u8>)> {
        let response = self.with_cookies(request).send().map_err(transport_error)?;
        let (status, content_type, body) = self.read(response)?;
        let json = check_response(status, &content_type, &body)?;
        Ok((json, body))
    }

    fn with_cookies(&self, request: RequestBuilder) -> RequestBuilder {
        if self.state.cookies.is_empty() {
            return request;
        }
        let header = self
            .state
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        request.header(COOKIE, header)
    }

    fn read(&mut self, response: Response) -> Result<(u16, String, Vec<u8>)> {
        for value in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            if let Some((name, value)) = parse_set_cookie(raw) {
                self.state.cookies.insert(name, value);
            }
        }

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().map_err(transport_error)?.to_vec();
        Ok((status, content_type, body))
    }
}

impl TradingSession for EmtClient {
    type State = EmtState;

    fn login(&mut self, credential: &Credential, duration: Duration) -> Result<Option<String>> {
        let username = credential.username().to_string();
        self.state.username = username.clone();
        self.state.validate_key = None;

        let (rand_num, code) = self.captcha()?;
        let form = [
            ("userId", username.clone()),
            ("password", encrypt_password(credential.password())?),
            ("randNumber", rand_num.to_string()),
            ("identifyCode", code),
            ("duration", (duration.as_secs() / 60).to_string()),
            ("authCode", String::new()),
            ("type", "Z".to_string()),
            ("secInfo", String::new()),
        ];

        let request = self
            .http
            .post(self.config.login_url())
            .header("X-Requested-With", "XMLHttpRequest")
            .header(REFERER, self.config.login_referer())
            .form(&form);
        let response = self.with_cookies(request).send().map_err(transport_error)?;
        let (status, content_type, body) = self.read(response)?;

        // A rejected captcha or password comes back as a non-zero Status;
        // that is an ordinary failure, not a protocol error.
        let json = match check_response(status, &content_type, &body) {
            Ok(json) => json,
            Err(Error::Api {
                status: Some(200),
                message,
                ..
            }) => {
                warn!(identity = %username, reason = %message, "Login rejected");
                return Ok(None);
            }
            Err(Error::SessionExpired(response)) => {
                warn!(identity = %username, response = %response, "Login rejected as expired");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if let Some(code) = json.as_ref().and_then(status_code).filter(|c| *c != 0) {
            warn!(identity = %username, status = code, reason = %message(json.as_ref()), "Login rejected");
            return Ok(None);
        }

        let key = self.fetch_validate_key()?;
        match &key {
            Some(_) => info!(identity = %username, "Login succeeded"),
            None => warn!(identity = %username, "Login response had no validation key"),
        }
        self.state.validate_key = key.clone();
        Ok(key)
    }

    fn validate(&mut self) -> Result<bool> {
        let Some(key) = self.state.validate_key.clone() else {
            return Ok(false);
        };

        let form = [("qqhs", "100"), ("dwc", "")];
        let request = self
            .http
            .post(self.config.probe_url(&key))
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&form);

        match self.send(request) {
            Ok(_) => Ok(true),
            Err(Error::SessionExpired(_)) => {
                debug!(identity = %self.state.username, "Validation key no longer accepted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn snapshot(&self) -> EmtState {
        self.state.clone()
    }
}

impl std::fmt::Debug for EmtClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmtClient")
            .field("base_url", &self.config.base_url)
            .field("username", &self.state.username)
            .field("logged_in", &self.state.validate_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Name and value of a `Set-Cookie` header; attributes are ignored.
fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "b7a5c1f4-3d2e-4f60-9a8b-1c2d3e4f5a6b";

    fn trade_page(key: &str) -> String {
        format!(
            r#"<html><body><input id="em_validatekey" type="hidden" value="{key}" /></body></html>"#
        )
    }

    fn client(base_url: &str, state: EmtState) -> EmtClient {
        let config = Arc::new(EmtConfig::default().with_base_url(base_url));
        let solver: SharedCaptchaSolver = Arc::new(|_: &[u8]| Ok("4821".to_string()));
        EmtClient::with_state(config, solver, state).unwrap()
    }

    fn logged_in(username: &str) -> EmtState {
        EmtState {
            username: username.to_string(),
            validate_key: Some(KEY.to_string()),
            cookies: BTreeMap::from([("Uid".to_string(), "abc".to_string())]),
        }
    }

    async fn mount_captcha(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/Login/YZM"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("Uid=abc; path=/; HttpOnly"),
            Some(("Uid".to_string(), "abc".to_string()))
        );
        assert_eq!(
            parse_set_cookie("mobileimei=a=b"),
            Some(("mobileimei".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_set_cookie("=orphan"), None);
        assert_eq!(parse_set_cookie("novalue"), None);
    }

    #[test]
    fn test_validate_key_pattern() {
        let page = trade_page(KEY);
        let key = VALIDATE_KEY_RE.captures(&page).and_then(|c| c.get(1));
        assert_eq!(key.map(|m| m.as_str()), Some(KEY));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_success_stores_key_and_cookies() {
        let server = MockServer::start().await;
        mount_captcha(&server).await;
        Mock::given(method("POST"))
            .and(path("/Login/Authentication"))
            .and(body_string_contains("userId=540975189038"))
            .and(body_string_contains("identifyCode=4821"))
            .and(body_string_contains("duration=180"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Set-Cookie", "Uid=abc; path=/; HttpOnly")
                    .set_body_string(r#"{"Status":0,"Message":"","Data":[{}]}"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Trade/Buy"))
            .and(header("Cookie", "Uid=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(trade_page(KEY)))
            .expect(1)
            .mount(&server)
            .await;

        let base = server.uri();
        let (key, state) = tokio::task::spawn_blocking(move || {
            let mut client = client(&base, EmtState::default());
            let credential = Credential::new("540975189038", "123731");
            let key = client
                .login(&credential, Duration::from_secs(180 * 60))
                .unwrap();
            (key, client.snapshot())
        })
        .await
        .unwrap();

        assert_eq!(key.as_deref(), Some(KEY));
        assert_eq!(state.username, "540975189038");
        assert_eq!(state.validate_key.as_deref(), Some(KEY));
        assert_eq!(state.cookies.get("Uid").map(String::as_str), Some("abc"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_captcha_rejected_is_none() {
        let server = MockServer::start().await;
        mount_captcha(&server).await;
        Mock::given(method("POST"))
            .and(path("/Login/Authentication"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"Status":-1,"Message":"验证码错误"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Trade/Buy"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let base = server.uri();
        let (key, state) = tokio::task::spawn_blocking(move || {
            let mut client = client(&base, EmtState::default());
            let key = client
                .login(&Credential::new("u", "p"), Duration::from_secs(3600))
                .unwrap();
            (key, client.snapshot())
        })
        .await
        .unwrap();

        assert!(key.is_none());
        assert!(state.validate_key.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_expired_status_is_none() {
        let server = MockServer::start().await;
        mount_captcha(&server).await;
        Mock::given(method("POST"))
            .and(path("/Login/Authentication"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"Status":-2,"Message":"会话已超时"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let base = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            client(&base, EmtState::default())
                .login(&Credential::new("u", "p"), Duration::from_secs(3600))
        })
        .await
        .unwrap();

        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_without_key_on_page_is_none() {
        let server = MockServer::start().await;
        mount_captcha(&server).await;
        Mock::given(method("POST"))
            .and(path("/Login/Authentication"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Status":0}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/Trade/Buy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let base = server.uri();
        let key = tokio::task::spawn_blocking(move || {
            client(&base, EmtState::default())
                .login(&Credential::new("u", "p"), Duration::from_secs(3600))
                .unwrap()
        })
        .await
        .unwrap();

        assert!(key.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_login_server_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Login/YZM"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let base = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            client(&base, EmtState::default())
                .login(&Credential::new("u", "p"), Duration::from_secs(3600))
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::Api { status: Some(502), .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validate_live_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Com/queryAssetAndPositionV1"))
            .and(query_param("validatekey", KEY))
            .and(header("Cookie", "Uid=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Status":0,"Data":[]}"#))
            .expect(1)
            .mount(&server)
            .await;

        let base = server.uri();
        let valid = tokio::task::spawn_blocking(move || {
            client(&base, logged_in("540975189038")).validate().unwrap()
        })
        .await
        .unwrap();

        assert!(valid);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validate_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Com/queryAssetAndPositionV1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"Status":-2,"Message":"会话已超时"}"#),
            )
            .mount(&server)
            .await;

        let base = server.uri();
        let valid = tokio::task::spawn_blocking(move || {
            client(&base, logged_in("540975189038")).validate().unwrap()
        })
        .await
        .unwrap();

        assert!(!valid);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_validate_http_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Com/queryAssetAndPositionV1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let base = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            client(&base, logged_in("540975189038")).validate()
        })
        .await
        .unwrap();

        match result {
            Err(Error::Api {
                status, response, ..
            }) => {
                assert_eq!(status, Some(500));
                assert_eq!(response.as_deref(), Some("oops"));
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_without_key_makes_no_request() {
        // Nothing listens on this port; any request would fail.
        let mut client = client("http://127.0.0.1:9", EmtState::default());
        assert!(!client.validate().unwrap());
    }
}
