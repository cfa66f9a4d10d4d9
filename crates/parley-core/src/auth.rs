//! Authentication flows
//!
//! When validation reports a session as unauthenticated, an
//! [`AuthenticationFlow`] signs it back in. The built-in [`FormLoginFlow`]
//! fills the descriptor's login form, polls an [`OtpProvider`] for a
//! one-time code when the service asks for one, and re-validates.
//! Secrets and codes are never logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::automation::ServiceAutomation;
use crate::config::AuthConfig;
use crate::descriptor::{Locator, ServiceDescriptor};
use crate::driver::{SessionDriver, StealthProfile};
use crate::error::{Error, Result};
use crate::retry::retry_with_backoff;
use crate::session::Session;
use crate::validator::{SessionValidator, Validation};
use crate::wait::{pause, BoundedWait};

/// Resolved login credentials
#[derive(Clone)]
pub struct Credentials {
    /// Login name
    pub username: String,
    secret: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Password or token
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Resolves a credentials reference into credentials
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Look up credentials
    async fn resolve(&self, reference: &str) -> Result<Credentials>;
}

/// Reads `<PREFIX><REF>_USERNAME` and `<PREFIX><REF>_PASSWORD` from the environment
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    prefix: String,
}

impl EnvCredentials {
    /// Resolver using `PARLEY_` as prefix
    pub fn new() -> Self {
        Self::with_prefix("PARLEY_")
    }

    /// Resolver with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, reference: &str, suffix: &str) -> Result<String> {
        let name = format!(
            "{}{}_{}",
            self.prefix,
            reference.to_uppercase().replace(['-', '.'], "_"),
            suffix
        );
        std::env::var(&name)
            .map_err(|_| Error::Configuration(format!("environment variable {} is not set", name)))
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialResolver for EnvCredentials {
    async fn resolve(&self, reference: &str) -> Result<Credentials> {
        Ok(Credentials::new(
            self.var(reference, "USERNAME")?,
            self.var(reference, "PASSWORD")?,
        ))
    }
}

/// In-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentials {
    /// Empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    #[must_use]
    pub fn with(mut self, reference: &str, credentials: Credentials) -> Self {
        self.entries.insert(reference.to_string(), credentials);
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, reference: &str) -> Result<Credentials> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no credentials for '{}'", reference)))
    }
}

/// Source of one-time codes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OtpProvider: Send + Sync {
    /// Look for a code sent to `destination` after `issued_after`.
    ///
    /// `window` bounds how long a single lookup may take. `Ok(None)` means
    /// no code has arrived yet.
    async fn fetch_code(
        &self,
        destination: &str,
        issued_after: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<String>>;
}

/// Restores an authenticated state for a session
#[async_trait]
pub trait AuthenticationFlow: Send + Sync {
    /// Sign the session in. Success means the session re-validated as authenticated.
    async fn authenticate(
        &self,
        session: &mut Session,
        descriptor: &ServiceDescriptor,
        credentials_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Login through the descriptor's form locators
pub struct FormLoginFlow {
    credentials: Arc<dyn CredentialResolver>,
    otp: Option<Arc<dyn OtpProvider>>,
    validator: Arc<SessionValidator>,
    config: AuthConfig,
    stealth: StealthProfile,
}

impl fmt::Debug for FormLoginFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormLoginFlow")
            .field("otp", &self.otp.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FormLoginFlow {
    /// Create a login flow
    pub fn new(
        credentials: Arc<dyn CredentialResolver>,
        validator: Arc<SessionValidator>,
        config: AuthConfig,
        stealth: StealthProfile,
    ) -> Self {
        Self {
            credentials,
            otp: None,
            validator,
            config,
            stealth,
        }
    }

    /// Attach a one-time code provider
    #[must_use]
    pub fn with_otp_provider(mut self, provider: Arc<dyn OtpProvider>) -> Self {
        self.otp = Some(provider);
        self
    }

    async fn fill_form(
        &self,
        driver: &mut dyn SessionDriver,
        descriptor: &ServiceDescriptor,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Utc>> {
        let locators = &descriptor.locators;
        let (Some(username), Some(password), Some(submit)) = (
            &locators.login_username,
            &locators.login_password,
            &locators.login_submit,
        ) else {
            return Err(failed(descriptor, "descriptor has no login form locators"));
        };
        let automation = ServiceAutomation::new(descriptor, &self.stealth);

        driver.navigate(descriptor.login_url()).await?;
        automation
            .wait_for(driver, username, self.config.login_step(), cancel)
            .await
            .map_err(|e| step_failed(descriptor, "login form did not appear", e))?;

        pause(self.stealth.action_delay(), cancel).await?;
        driver
            .fill(username, &credentials.username, self.stealth.keystroke_delay())
            .await?;
        pause(self.stealth.action_delay(), cancel).await?;
        driver
            .fill(password, credentials.secret(), self.stealth.keystroke_delay())
            .await?;

        let issued_after = Utc::now();
        pause(self.stealth.action_delay(), cancel).await?;
        driver.click(submit).await?;
        Ok(issued_after)
    }

    /// Whether the service asks for a one-time code after the password step
    async fn otp_requested(
        &self,
        driver: &mut dyn SessionDriver,
        descriptor: &ServiceDescriptor,
        otp_input: &Locator,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let wait = BoundedWait::new(self.config.otp_prompt_wait(), descriptor.poll_interval());
        loop {
            if driver.is_present(otp_input).await? {
                return Ok(true);
            }
            if !descriptor.is_login_url(&driver.current_url().await?) {
                return Ok(false);
            }
            if !wait.tick(cancel).await? {
                return Ok(false);
            }
        }
    }

    async fn poll_code(
        &self,
        descriptor: &ServiceDescriptor,
        issued_after: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let provider = self.otp.as_ref().ok_or_else(|| {
            failed(descriptor, "one-time code required but no provider is configured")
        })?;
        let destination = descriptor
            .otp_destination
            .as_deref()
            .unwrap_or(descriptor.id.as_str());
        let window = self.config.otp_window();

        info!(service = %descriptor.id, destination = %destination, "Waiting for one-time code");

        let lookup = retry_with_backoff(
            &self.config.otp_policy(),
            cancel,
            |attempt| async move {
                debug!(attempt = attempt, "Polling for one-time code");
                match provider.fetch_code(destination, issued_after, window).await? {
                    Some(code) => Ok(code),
                    None => Err(Error::OtpTimeout {
                        destination: destination.to_string(),
                    }),
                }
            },
            |e| !matches!(e, Error::Cancelled),
        )
        .await;

        match lookup {
            Ok((code, attempts)) => {
                info!(service = %descriptor.id, attempts = attempts, "One-time code received");
                Ok(code)
            }
            Err(e) => {
                warn!(service = %descriptor.id, attempts = e.attempts, error = %e.last_error, "No one-time code");
                Err(e.last_error)
            }
        }
    }
}

#[async_trait]
impl AuthenticationFlow for FormLoginFlow {
    async fn authenticate(
        &self,
        session: &mut Session,
        descriptor: &ServiceDescriptor,
        credentials_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let reference = credentials_ref
            .or(descriptor.credentials_ref.as_deref())
            .ok_or_else(|| failed(descriptor, "no credentials reference configured"))?;
        let credentials = self
            .credentials
            .resolve(reference)
            .await
            .map_err(|e| failed(descriptor, &e.to_string()))?;

        info!(service = %descriptor.id, "Signing in");
        let driver = session.driver();
        let issued_after = self.fill_form(driver, descriptor, &credentials, cancel).await?;

        let locators = &descriptor.locators;
        if let Some(otp_input) = &locators.otp_input {
            if self.otp_requested(driver, descriptor, otp_input, cancel).await? {
                let code = self.poll_code(descriptor, issued_after, cancel).await?;
                let submit = locators
                    .otp_submit
                    .as_ref()
                    .or(locators.login_submit.as_ref())
                    .ok_or_else(|| failed(descriptor, "descriptor has no code submit locator"))?;

                pause(self.stealth.action_delay(), cancel).await?;
                driver
                    .fill(otp_input, &code, self.stealth.keystroke_delay())
                    .await?;
                pause(self.stealth.action_delay(), cancel).await?;
                driver.click(submit).await?;
            }
        }

        let settle = BoundedWait::new(self.config.login_step(), descriptor.poll_interval());
        while descriptor.is_login_url(&driver.current_url().await?) {
            if !settle.tick(cancel).await? {
                break;
            }
        }

        match self.validator.validate(session, descriptor).await {
            Validation::Valid => {
                info!(service = %descriptor.id, "Signed in");
                Ok(())
            }
            Validation::Invalid(reason) => Err(failed(descriptor, &reason)),
        }
    }
}

fn failed(descriptor: &ServiceDescriptor, reason: &str) -> Error {
    Error::AuthenticationFailed {
        service: descriptor.id.clone(),
        reason: reason.to_string(),
    }
}

fn step_failed(descriptor: &ServiceDescriptor, step: &str, error: Error) -> Error {
    match error {
        Error::Cancelled => Error::Cancelled,
        other => failed(descriptor, &format!("{}: {}", step, other)),
    }
}

#[cfg(test)]
mod tests;
