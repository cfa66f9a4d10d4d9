//! HTTP browser relay driver
//!
//! Talks to a local relay process that owns the real browser. Each launch
//! opens a persistent context on the profile's data directory and every
//! page primitive is one JSON request.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DriverLauncher, LaunchRequest, SessionDriver};
use crate::config::RelayConfig;
use crate::descriptor::Locator;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let resp = request
            .send()
            .await
            .map_err(|e| Error::Driver(format!("relay request failed: {}", e)))?;
        let status = resp.status();

        let body: Value = if status == reqwest::StatusCode::NO_CONTENT {
            Value::Null
        } else {
            resp.json()
                .await
                .map_err(|e| Error::Driver(format!("relay response error: {}", e)))?
        };

        if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
            return Err(relay_error(body.get("code").and_then(|v| v.as_str()), err));
        }
        if !status.is_success() {
            return Err(Error::Driver(format!("relay returned HTTP {}", status)));
        }
        Ok(body)
    }

    async fn post(&self, path: &str, params: Value) -> Result<Value> {
        self.send(self.http.post(self.url(path)).json(&params)).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.send(self.http.get(self.url(path))).await
    }
}

fn relay_error(code: Option<&str>, message: &str) -> Error {
    match code {
        Some("element_not_found") => Error::ElementNotFound {
            locator: message.to_string(),
        },
        _ => Error::Driver(message.to_string()),
    }
}

/// Launches browser contexts through the relay
#[derive(Debug, Clone)]
pub struct RelayLauncher {
    client: RelayClient,
    headless: bool,
}

impl RelayLauncher {
    /// Create a launcher from relay configuration
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Driver(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client: RelayClient {
                http,
                base_url: config.url.trim_end_matches('/').to_string(),
            },
            headless: config.headless,
        })
    }

    /// Whether the relay answers its status endpoint
    pub async fn is_available(&self) -> bool {
        match self.client.get("/status").await {
            Ok(body) => body.get("ready").and_then(|v| v.as_bool()).unwrap_or(true),
            Err(e) => {
                warn!(error = %e, url = %self.client.base_url, "Relay status check failed");
                false
            }
        }
    }
}

#[async_trait]
impl DriverLauncher for RelayLauncher {
    fn name(&self) -> &str {
        "relay"
    }

    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SessionDriver>> {
        let stealth = &request.stealth;
        let body = self
            .client
            .post(
                "/sessions",
                json!({
                    "service_id": request.service_id,
                    "user_data_dir": request.user_data_dir,
                    "headless": self.headless,
                    "user_agent": stealth.user_agent,
                    "viewport": {
                        "width": stealth.viewport_width,
                        "height": stealth.viewport_height,
                    },
                    "locale": stealth.locale,
                    "timezone": stealth.timezone,
                }),
            )
            .await?;

        let session_id = body
            .get("session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Driver("relay did not return a session_id".to_string()))?
            .to_string();

        info!(
            service = %request.service_id,
            session_id = %session_id,
            "Opened relay browser context"
        );

        Ok(Box::new(RelayDriver {
            client: self.client.clone(),
            session_id,
            closed: false,
        }))
    }
}

/// One relay-backed browser context
#[derive(Debug)]
pub struct RelayDriver {
    client: RelayClient,
    session_id: String,
    closed: bool,
}

impl RelayDriver {
    fn path(&self, action: &str) -> String {
        format!("/sessions/{}/{}", self.session_id, action)
    }

    async fn query(&self, locator: &Locator) -> Result<Value> {
        self.client
            .post(&self.path("query"), json!({ "locator": locator.as_str() }))
            .await
    }
}

#[async_trait]
impl SessionDriver for RelayDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(session_id = %self.session_id, url = %url, "Relay navigate");
        self.client
            .post(&self.path("navigate"), json!({ "url": url }))
            .await
            .map(|_| ())
    }

    async fn current_url(&mut self) -> Result<String> {
        let body = self.client.get(&self.path("url")).await?;
        body.get("url")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Driver("relay did not return a url".to_string()))
    }

    async fn is_present(&mut self, locator: &Locator) -> Result<bool> {
        let body = self.query(locator).await?;
        Ok(body.get("present").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<Option<String>> {
        let body = self.query(locator).await?;
        if !body.get("present").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Ok(None);
        }
        Ok(Some(
            body.get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ))
    }

    async fn fill(&mut self, locator: &Locator, text: &str, keystroke_delay: Duration) -> Result<()> {
        self.client
            .post(
                &self.path("fill"),
                json!({
                    "locator": locator.as_str(),
                    "text": text,
                    "delay_ms": keystroke_delay.as_millis() as u64,
                }),
            )
            .await
            .map(|_| ())
    }

    async fn click(&mut self, locator: &Locator) -> Result<()> {
        self.client
            .post(&self.path("click"), json!({ "locator": locator.as_str() }))
            .await
            .map(|_| ())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let url = self.client.url(&format!("/sessions/{}", self.session_id));
        self.client.send(self.client.http.delete(url)).await?;
        self.closed = true;
        info!(session_id = %self.session_id, "Closed relay browser context");
        Ok(())
    }
}
