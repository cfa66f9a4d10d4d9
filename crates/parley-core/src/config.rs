//! Engine configuration
//!
//! Every section has serde defaults so a partial file (or none at all)
//! yields a working engine. Loading layered sources is left to the binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::descriptor::ServiceDescriptor;
use crate::driver::StealthProfile;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Profile store settings
    #[serde(default)]
    pub profiles: ProfilesConfig,
    /// Dispatch and retry settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Session validation settings
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Login and one-time code settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Response normalization settings
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Cross-service aggregation settings
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// Health loop settings
    #[serde(default)]
    pub health: HealthConfig,
    /// Report persistence
    #[serde(default)]
    pub reports: ReportsConfig,
    /// Browser relay endpoint
    #[serde(default)]
    pub relay: RelayConfig,
    /// Pacing and fingerprint settings
    #[serde(default)]
    pub stealth: StealthProfile,
    /// Configured services
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

impl EngineConfig {
    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate descriptors and numeric ranges
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.id.as_str()) {
                return Err(Error::Configuration(format!(
                    "service '{}' is configured twice",
                    service.id
                )));
            }
        }
        for (name, value) in [
            ("aggregation.similarity_threshold", self.aggregation.similarity_threshold),
            ("aggregation.contradiction_overlap", self.aggregation.contradiction_overlap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.stealth.min_action_delay_ms > self.stealth.max_action_delay_ms {
            return Err(Error::Configuration(
                "stealth.min_action_delay_ms exceeds max_action_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a service descriptor
    pub fn service(&self, id: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// Profile store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Root directory for persistent profiles
    #[serde(default = "default_profiles_root")]
    pub root: PathBuf,
    /// Bounded wait for a held profile, in seconds
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
    /// Age after which a foreign lock marker is considered stale, in seconds
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            root: default_profiles_root(),
            lock_wait_secs: default_lock_wait_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl ProfilesConfig {
    /// Lock wait budget
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    /// Stale marker threshold
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Default per-service completion timeout, in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Default retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff cap, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Extra budget per attempt for acquisition, validation and login, in seconds
    #[serde(default = "default_setup_timeout_secs")]
    pub setup_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            setup_timeout_secs: default_setup_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    /// Default per-service timeout
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Setup allowance per attempt
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    /// Retry policy for dispatch attempts
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
    }
}

/// Session validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Total budget for one validation, in milliseconds
    #[serde(default = "default_validation_budget_ms")]
    pub budget_ms: u64,
    /// Cap per strategy, in milliseconds
    #[serde(default = "default_strategy_timeout_ms")]
    pub strategy_timeout_ms: u64,
    /// Settle time after navigation before inspecting the URL, in milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_validation_budget_ms(),
            strategy_timeout_ms: default_strategy_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl ValidationConfig {
    /// Total budget
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    /// Per-strategy cap
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }

    /// Navigation settle time
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Login and one-time code configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Budget for each login form step, in seconds
    #[serde(default = "default_login_step_secs")]
    pub login_step_secs: u64,
    /// How long to look for a one-time code prompt after login, in milliseconds
    #[serde(default = "default_otp_prompt_wait_ms")]
    pub otp_prompt_wait_ms: u64,
    /// Window passed to the code provider on each poll, in seconds
    #[serde(default = "default_otp_window_secs")]
    pub otp_window_secs: u64,
    /// Polls after the first one
    #[serde(default = "default_otp_max_polls")]
    pub otp_max_polls: u32,
    /// Delay between polls, in milliseconds
    #[serde(default = "default_otp_poll_interval_ms")]
    pub otp_poll_interval_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_step_secs: default_login_step_secs(),
            otp_prompt_wait_ms: default_otp_prompt_wait_ms(),
            otp_window_secs: default_otp_window_secs(),
            otp_max_polls: default_otp_max_polls(),
            otp_poll_interval_ms: default_otp_poll_interval_ms(),
        }
    }
}

impl AuthConfig {
    /// Login step budget
    pub fn login_step(&self) -> Duration {
        Duration::from_secs(self.login_step_secs)
    }

    /// Code prompt wait
    pub fn otp_prompt_wait(&self) -> Duration {
        Duration::from_millis(self.otp_prompt_wait_ms)
    }

    /// Provider window
    pub fn otp_window(&self) -> Duration {
        Duration::from_secs(self.otp_window_secs)
    }

    /// Polling policy for one-time codes (fixed interval)
    pub fn otp_policy(&self) -> RetryPolicy {
        let interval = Duration::from_millis(self.otp_poll_interval_ms);
        RetryPolicy::new()
            .with_max_retries(self.otp_max_polls)
            .with_initial_delay(interval)
            .with_max_delay(interval)
            .with_backoff_multiplier(1.0)
            .with_jitter(false)
    }
}

/// Response normalization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum key points kept per response
    #[serde(default = "default_max_key_points")]
    pub max_key_points: usize,
    /// Maximum summary length in characters
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_key_points: default_max_key_points(),
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

/// Aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Jaccard similarity at which two key points are the same claim
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Topic overlap at which opposite-polarity points are a disagreement
    #[serde(default = "default_contradiction_overlap")]
    pub contradiction_overlap: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            contradiction_overlap: default_contradiction_overlap(),
        }
    }
}

/// Health loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether the periodic loop runs
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval between passes, in seconds
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_interval_secs(),
        }
    }
}

impl HealthConfig {
    /// Loop interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Report persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Persist reports to disk
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Report directory
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_reports_dir(),
        }
    }
}

/// Browser relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay base URL
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Launch browsers headless
    #[serde(default = "default_true")]
    pub headless: bool,
    /// HTTP request timeout, in seconds
    #[serde(default = "default_relay_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            headless: true,
            request_timeout_secs: default_relay_timeout_secs(),
        }
    }
}

impl RelayConfig {
    /// HTTP request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley")
}

fn default_profiles_root() -> PathBuf {
    data_dir().join("profiles")
}

fn default_reports_dir() -> PathBuf {
    data_dir().join("reports")
}

fn default_lock_wait_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    6 * 60 * 60
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    15_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_setup_timeout_secs() -> u64 {
    90
}

fn default_validation_budget_ms() -> u64 {
    15_000
}

fn default_strategy_timeout_ms() -> u64 {
    6_000
}

fn default_settle_ms() -> u64 {
    1_500
}

fn default_login_step_secs() -> u64 {
    20
}

fn default_otp_prompt_wait_ms() -> u64 {
    5_000
}

fn default_otp_window_secs() -> u64 {
    300
}

fn default_otp_max_polls() -> u32 {
    24
}

fn default_otp_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_key_points() -> usize {
    5
}

fn default_summary_max_chars() -> usize {
    280
}

fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_contradiction_overlap() -> f64 {
    0.3
}

fn default_health_interval_secs() -> u64 {
    300
}

fn default_relay_url() -> String {
    "http://127.0.0.1:9323".to_string()
}

fn default_relay_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
