//! Minimal W3C WebDriver client: just the endpoints the capture loop needs.

use std::time::Duration;

use anyhow::Result;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::AnimateError;

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

// W3C error codes that describe a broken session rather than a slow page.
const SESSION_FATAL_ERRORS: &[&str] = &[
    "invalid session id",
    "session not created",
    "no such window",
    "invalid argument",
    "unknown command",
];

#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    base: Url,
}

#[derive(Debug)]
pub struct WebDriverSession {
    client: WebDriverClient,
    session_id: String,
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

impl WebDriverClient {
    pub fn new(base: Url, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .no_proxy()
            .timeout(request_timeout)
            .build()
            .map_err(|error| {
                AnimateError::configuration(format!("failed to create HTTP client: {error}"))
            })?;
        Ok(Self { http, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn new_session(&self, headless: bool) -> Result<WebDriverSession> {
        let value = self
            .command(Method::POST, "session", Some(session_capabilities(headless)))
            .await
            .map_err(|error| {
                AnimateError::configuration(format!(
                    "could not start a browser session at {}: {error:#}",
                    self.base
                ))
            })?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AnimateError::configuration("webdriver did not return a session id")
            })?
            .to_owned();
        tracing::debug!(session_id = %session_id, webdriver = %self.base, "browser session started");
        Ok(WebDriverSession {
            client: self.clone(),
            session_id,
            closed: false,
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.base.join(path).map_err(|error| {
            AnimateError::configuration(format!("invalid webdriver endpoint '{path}': {error}"))
        })?;
        let mut request = self.http.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(&body);
        } else if method == Method::POST {
            request = request.json(&json!({}));
        }

        let response = request.send().await.map_err(|error| {
            AnimateError::render_transient(format!("webdriver request to '{path}' failed: {error}"))
        })?;
        let status = response.status();
        let wire: WireResponse = response.json().await.map_err(|error| {
            AnimateError::render_transient(format!(
                "webdriver returned an unreadable response for '{path}' (status {status}): {error}"
            ))
        })?;

        if status.is_success() {
            return Ok(wire.value);
        }
        Err(classify_wire_error(path, status, wire.value).into())
    }
}

fn session_capabilities(headless: bool) -> Value {
    let (firefox_args, chrome_args) = if headless {
        (vec!["-headless"], vec!["--headless=new", "--hide-scrollbars"])
    } else {
        (Vec::new(), vec!["--hide-scrollbars"])
    };
    json!({
        "capabilities": {
            "alwaysMatch": {
                "acceptInsecureCerts": true,
                "moz:firefoxOptions": { "args": firefox_args },
                "goog:chromeOptions": { "args": chrome_args }
            }
        }
    })
}

fn classify_wire_error(path: &str, status: StatusCode, value: Value) -> AnimateError {
    let (code, message) = match serde_json::from_value::<WireError>(value) {
        Ok(wire) => (wire.error, wire.message),
        Err(_) => ("unknown error".to_owned(), String::new()),
    };
    let detail = format!("webdriver '{path}' failed with {status} ({code}): {message}");
    if SESSION_FATAL_ERRORS.contains(&code.as_str()) {
        AnimateError::render_fatal(detail)
    } else {
        AnimateError::render_transient(detail)
    }
}

impl WebDriverSession {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    fn endpoint(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("session/{}", self.session_id)
        } else {
            format!("session/{}/{suffix}", self.session_id)
        }
    }

    pub async fn set_window_size(&self, width: u32, height: u32) -> Result<()> {
        self.client
            .command(
                Method::POST,
                &self.endpoint("window/rect"),
                Some(json!({ "width": width, "height": height })),
            )
            .await?;
        Ok(())
    }

    pub async fn set_script_timeout(&self, timeout: Duration) -> Result<()> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.client
            .command(
                Method::POST,
                &self.endpoint("timeouts"),
                Some(json!({ "script": millis })),
            )
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &Url) -> Result<()> {
        self.client
            .command(
                Method::POST,
                &self.endpoint("url"),
                Some(json!({ "url": url.as_str() })),
            )
            .await?;
        Ok(())
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.client
            .command(
                Method::POST,
                &self.endpoint("execute/sync"),
                Some(json!({ "script": script, "args": args })),
            )
            .await
    }

    /// Run a script whose last argument is a completion callback.
    pub async fn execute_async(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.client
            .command(
                Method::POST,
                &self.endpoint("execute/async"),
                Some(json!({ "script": script, "args": args })),
            )
            .await
    }

    pub async fn title(&self) -> Result<String> {
        let value = self
            .client
            .command(Method::GET, &self.endpoint("title"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_owned())
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let value = self
            .client
            .command(Method::GET, &self.endpoint("screenshot"), None)
            .await?;
        let encoded = value.as_str().ok_or_else(|| {
            AnimateError::render_transient("webdriver screenshot response was not a string")
        })?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|error| {
                AnimateError::render_transient(format!(
                    "webdriver screenshot was not valid base64: {error}"
                ))
                .into()
            })
    }

    pub async fn delete(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client
            .command(Method::DELETE, &self.endpoint(""), None)
            .await?;
        tracing::debug!(session_id = %self.session_id, "browser session closed");
        Ok(())
    }
}
