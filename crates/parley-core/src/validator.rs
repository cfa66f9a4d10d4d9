//! Session validation
//!
//! A session is checked with an ordered list of strategies, cheapest
//! first. The first conclusive verdict decides; when every strategy is
//! inconclusive, fails, or the time budget runs out the session is treated
//! as unauthenticated.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ValidationConfig;
use crate::descriptor::ServiceDescriptor;
use crate::driver::SessionDriver;
use crate::error::Result;
use crate::profile::ProfileStore;
use crate::session::{Session, SessionState};

/// Verdict of a single strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proven authenticated
    Valid,
    /// Proven unauthenticated, with reason
    Invalid(String),
    /// No conclusion
    Inconclusive,
}

/// Result of a full validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Session is authenticated
    Valid,
    /// Session needs authentication
    Invalid(String),
}

impl Validation {
    /// Whether the session is usable
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// One way of checking whether a session is authenticated
#[async_trait]
pub trait ValidationStrategy: Send + Sync {
    /// Strategy name for logs
    fn name(&self) -> &'static str;

    /// Relative cost; cheaper strategies run first
    fn cost(&self) -> u32;

    /// Inspect the session
    async fn evaluate(
        &self,
        driver: &mut dyn SessionDriver,
        descriptor: &ServiceDescriptor,
    ) -> Result<Verdict>;
}

/// Current URL matches an authenticated-only page, or a login page
#[derive(Debug, Default)]
pub struct EndpointStrategy;

#[async_trait]
impl ValidationStrategy for EndpointStrategy {
    fn name(&self) -> &'static str {
        "endpoint"
    }

    fn cost(&self) -> u32 {
        10
    }

    async fn evaluate(
        &self,
        driver: &mut dyn SessionDriver,
        descriptor: &ServiceDescriptor,
    ) -> Result<Verdict> {
        let url = driver.current_url().await?;
        if descriptor.is_login_url(&url) {
            return Ok(Verdict::Invalid(format!("on login page {}", url)));
        }
        let authenticated = descriptor
            .authenticated_patterns()?
            .iter()
            .any(|pattern| pattern.is_match(&url));
        Ok(if authenticated {
            Verdict::Valid
        } else {
            Verdict::Inconclusive
        })
    }
}

/// An authenticated-only element is present, or the login form is
#[derive(Debug, Default)]
pub struct IndicatorStrategy;

#[async_trait]
impl ValidationStrategy for IndicatorStrategy {
    fn name(&self) -> &'static str {
        "indicator"
    }

    fn cost(&self) -> u32 {
        20
    }

    async fn evaluate(
        &self,
        driver: &mut dyn SessionDriver,
        descriptor: &ServiceDescriptor,
    ) -> Result<Verdict> {
        for indicator in &descriptor.auth_indicators {
            if driver.is_present(indicator).await? {
                return Ok(Verdict::Valid);
            }
        }
        if let Some(username) = &descriptor.locators.login_username {
            if driver.is_present(username).await? {
                return Ok(Verdict::Invalid("login form is shown".to_string()));
            }
        }
        Ok(Verdict::Inconclusive)
    }
}

/// Reload the home page and check that no login redirect happens
#[derive(Debug)]
pub struct RedirectStrategy {
    settle: Duration,
}

impl RedirectStrategy {
    /// Strategy waiting `settle` after navigation
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }
}

#[async_trait]
impl ValidationStrategy for RedirectStrategy {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn cost(&self) -> u32 {
        50
    }

    async fn evaluate(
        &self,
        driver: &mut dyn SessionDriver,
        descriptor: &ServiceDescriptor,
    ) -> Result<Verdict> {
        driver.navigate(&descriptor.home_url).await?;
        tokio::time::sleep(self.settle).await;

        let url = driver.current_url().await?;
        if descriptor.is_login_url(&url) {
            return Ok(Verdict::Invalid(format!("redirected to {}", url)));
        }
        Ok(if driver.is_present(&descriptor.locators.input).await? {
            Verdict::Valid
        } else {
            Verdict::Inconclusive
        })
    }
}

/// Runs strategies in cost order under a time budget
pub struct SessionValidator {
    strategies: Vec<Box<dyn ValidationStrategy>>,
    budget: Duration,
    strategy_timeout: Duration,
    profiles: Arc<ProfileStore>,
}

impl std::fmt::Debug for SessionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("SessionValidator")
            .field("strategies", &names)
            .field("budget", &self.budget)
            .finish()
    }
}

impl SessionValidator {
    /// Validator with the built-in strategies
    pub fn new(config: &ValidationConfig, profiles: Arc<ProfileStore>) -> Self {
        Self::with_strategies(
            vec![
                Box::new(EndpointStrategy),
                Box::new(IndicatorStrategy),
                Box::new(RedirectStrategy::new(config.settle())),
            ],
            config,
            profiles,
        )
    }

    /// Validator with custom strategies (sorted by cost)
    pub fn with_strategies(
        mut strategies: Vec<Box<dyn ValidationStrategy>>,
        config: &ValidationConfig,
        profiles: Arc<ProfileStore>,
    ) -> Self {
        strategies.sort_by_key(|s| s.cost());
        Self {
            strategies,
            budget: config.budget(),
            strategy_timeout: config.strategy_timeout(),
            profiles,
        }
    }

    /// Validate a session.
    ///
    /// On `Valid` the session becomes `Authenticated` and the profile's
    /// last validation time is updated; on `Invalid` it becomes
    /// `Unauthenticated`.
    pub async fn validate(&self, session: &mut Session, descriptor: &ServiceDescriptor) -> Validation {
        match session.state() {
            SessionState::Closed => return Validation::Invalid("session is closed".to_string()),
            SessionState::Busy => return Validation::Invalid("session is busy".to_string()),
            _ => {}
        }

        let service = session.service_id().to_string();
        let deadline = Instant::now() + self.budget;
        let mut verdict = None;

        for strategy in &self.strategies {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(service = %service, "Validation budget exhausted");
                break;
            }

            let budget = remaining.min(self.strategy_timeout);
            match tokio::time::timeout(budget, strategy.evaluate(session.driver(), descriptor)).await {
                Ok(Ok(Verdict::Inconclusive)) => {
                    debug!(service = %service, strategy = strategy.name(), "Inconclusive");
                }
                Ok(Ok(conclusive)) => {
                    debug!(service = %service, strategy = strategy.name(), verdict = ?conclusive, "Conclusive");
                    verdict = Some(conclusive);
                    break;
                }
                Ok(Err(e)) => {
                    debug!(service = %service, strategy = strategy.name(), error = %e, "Strategy failed");
                }
                Err(_) => {
                    debug!(service = %service, strategy = strategy.name(), "Strategy timed out");
                }
            }
        }

        match verdict {
            Some(Verdict::Valid) => {
                if session.mark_authenticated().is_err() {
                    return Validation::Invalid("session changed state during validation".to_string());
                }
                if let Err(e) = self.profiles.mark_validated(&service, Utc::now()) {
                    warn!(service = %service, error = %e, "Failed to record validation time");
                }
                info!(service = %service, "Session validated");
                Validation::Valid
            }
            Some(Verdict::Invalid(reason)) => {
                session.mark_unauthenticated();
                info!(service = %service, reason = %reason, "Session not authenticated");
                Validation::Invalid(reason)
            }
            Some(Verdict::Inconclusive) | None => {
                session.mark_unauthenticated();
                warn!(service = %service, "No validation strategy was conclusive");
                Validation::Invalid("no validation strategy was conclusive".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests;
