//! Service descriptors
//!
//! Everything the engine knows about a particular external service lives in
//! a descriptor: where it is, how to recognise an authenticated page, and
//! which locators reach the prompt input, the submit control and the
//! response area. Adding a service means adding a descriptor, not code.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Opaque element locator, interpreted by the driver (CSS, XPath, `text=...`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    /// Wrap a locator expression
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    /// Locator expression
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Element locators for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Locators {
    /// Prompt input field
    pub input: Locator,
    /// Submit control
    pub submit: Locator,
    /// Latest response container
    pub output: Locator,
    /// Element that appears once generation has finished
    #[serde(default)]
    pub completion: Option<Locator>,
    /// Element present while the service is still generating
    #[serde(default)]
    pub busy: Option<Locator>,
    /// Error banner the service shows on refusals or rate limits
    #[serde(default)]
    pub error_banner: Option<Locator>,
    /// Login form username field
    #[serde(default)]
    pub login_username: Option<Locator>,
    /// Login form password field
    #[serde(default)]
    pub login_password: Option<Locator>,
    /// Login form submit control
    #[serde(default)]
    pub login_submit: Option<Locator>,
    /// One-time code input
    #[serde(default)]
    pub otp_input: Option<Locator>,
    /// One-time code submit control (falls back to `login_submit`)
    #[serde(default)]
    pub otp_submit: Option<Locator>,
}

/// Capability descriptor for one external service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Stable service identifier
    pub id: String,

    /// Human readable name
    #[serde(default)]
    pub display_name: Option<String>,

    /// Page that hosts the prompt input
    pub home_url: String,

    /// Login page (defaults to `home_url`)
    #[serde(default)]
    pub login_url: Option<String>,

    /// URL patterns (regex) of pages only reachable when signed in
    #[serde(default)]
    pub authenticated_url_patterns: Vec<String>,

    /// URL patterns (regex) of login or sign-in pages
    #[serde(default)]
    pub login_url_patterns: Vec<String>,

    /// Locators whose presence proves an authenticated session
    #[serde(default)]
    pub auth_indicators: Vec<Locator>,

    /// Where one-time codes are delivered (mailbox, phone number)
    #[serde(default)]
    pub otp_destination: Option<String>,

    /// Credential reference resolved at login time
    #[serde(default)]
    pub credentials_ref: Option<String>,

    /// Element locators
    pub locators: Locators,

    /// Default completion budget in seconds
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Budget for locating the input and submitting, in seconds
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    /// How long output text must stay unchanged to count as complete, in milliseconds
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,

    /// Polling interval for element probes, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ServiceDescriptor {
    /// Parse a descriptor from TOML and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let descriptor: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid service descriptor: {}", e)))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check required fields and compile URL patterns
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Configuration(
                "service descriptor id must not be empty".to_string(),
            ));
        }
        if self.home_url.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "service '{}' has no home_url",
                self.id
            )));
        }
        for (name, locator) in [
            ("input", &self.locators.input),
            ("submit", &self.locators.submit),
            ("output", &self.locators.output),
        ] {
            if locator.as_str().trim().is_empty() {
                return Err(Error::Configuration(format!(
                    "service '{}' has an empty '{}' locator",
                    self.id, name
                )));
            }
        }
        self.authenticated_patterns()?;
        self.login_patterns()?;
        Ok(())
    }

    /// Name for display
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Login page URL
    pub fn login_url(&self) -> &str {
        self.login_url.as_deref().unwrap_or(&self.home_url)
    }

    /// Compiled authenticated-page patterns
    pub fn authenticated_patterns(&self) -> Result<Vec<Regex>> {
        compile_patterns(&self.id, &self.authenticated_url_patterns)
    }

    /// Compiled login-page patterns
    pub fn login_patterns(&self) -> Result<Vec<Regex>> {
        compile_patterns(&self.id, &self.login_url_patterns)
    }

    /// Whether `url` looks like a login page
    pub fn is_login_url(&self, url: &str) -> bool {
        self.login_patterns()
            .map(|patterns| patterns.iter().any(|p| p.is_match(url)))
            .unwrap_or(false)
    }

    /// Default completion budget
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Submission budget
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    /// Output stability window
    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    /// Probe interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

fn compile_patterns(service: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                Error::Configuration(format!("service '{}' has invalid pattern '{}': {}", service, p, e))
            })
        })
        .collect()
}

fn default_response_timeout_secs() -> u64 {
    120
}

fn default_submit_timeout_secs() -> u64 {
    20
}

fn default_stability_window_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r##"
        id = "alpha"
        home_url = "https://alpha.example/chat"
        login_url = "https://alpha.example/login"
        authenticated_url_patterns = ["^https://alpha\\.example/chat"]
        login_url_patterns = ["/login", "/signin"]
        auth_indicators = ["#account-menu"]
        otp_destination = "ops@example.com"
        credentials_ref = "ALPHA"

        [locators]
        input = "textarea#prompt"
        submit = "button[type=submit]"
        output = ".message:last-child"
        busy = ".spinner"
        login_username = "#email"
        login_password = "#password"
        login_submit = "#sign-in"
        otp_input = "#code"
    "##;

    #[test]
    fn test_descriptor_from_toml() {
        let descriptor = ServiceDescriptor::from_toml_str(DESCRIPTOR).unwrap();
        assert_eq!(descriptor.id, "alpha");
        assert_eq!(descriptor.name(), "alpha");
        assert_eq!(descriptor.locators.input.as_str(), "textarea#prompt");
        assert_eq!(descriptor.response_timeout(), Duration::from_secs(120));
        assert_eq!(descriptor.stability_window(), Duration::from_millis(2000));
        assert!(descriptor.locators.completion.is_none());
    }

    #[test]
    fn test_login_url_detection() {
        let descriptor = ServiceDescriptor::from_toml_str(DESCRIPTOR).unwrap();
        assert!(descriptor.is_login_url("https://alpha.example/login?next=/chat"));
        assert!(!descriptor.is_login_url("https://alpha.example/chat/123"));
        assert_eq!(descriptor.login_url(), "https://alpha.example/login");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let broken = DESCRIPTOR.replace("\"/signin\"", "\"(unclosed\"");
        let err = ServiceDescriptor::from_toml_str(&broken).unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("invalid pattern")));
    }

    #[test]
    fn test_empty_locator_rejected() {
        let broken = DESCRIPTOR.replace("\"textarea#prompt\"", "\"\"");
        assert!(ServiceDescriptor::from_toml_str(&broken).is_err());
    }
}
