//! Concurrent prompt fan-out
//!
//! Every target service runs independently: acquire a session, make sure it
//! is signed in, submit the composed prompt, wait for completion and release.
//! Attempts are retried per the dispatch policy for retryable outcomes only.
//! One service failing never affects another; each one yields exactly one
//! [`RawOutput`] in request order.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthenticationFlow;
use crate::automation::ServiceAutomation;
use crate::config::DispatchConfig;
use crate::descriptor::ServiceDescriptor;
use crate::error::{Error, Result};
use crate::job::{PromptJob, RawOutput};
use crate::prompt::compose_prompt;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::session::{Session, SessionFactory};
use crate::validator::{SessionValidator, Validation};

/// Sends jobs to services
pub struct PromptDispatcher {
    factory: Arc<SessionFactory>,
    validator: Arc<SessionValidator>,
    auth: Arc<dyn AuthenticationFlow>,
    descriptors: Vec<ServiceDescriptor>,
    retry: RetryPolicy,
    setup_timeout: Duration,
}

impl std::fmt::Debug for PromptDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services: Vec<&str> = self.descriptors.iter().map(|d| d.id.as_str()).collect();
        f.debug_struct("PromptDispatcher")
            .field("services", &services)
            .field("retry", &self.retry)
            .field("setup_timeout", &self.setup_timeout)
            .finish_non_exhaustive()
    }
}

impl PromptDispatcher {
    /// Create a dispatcher over the given descriptors
    pub fn new(
        factory: Arc<SessionFactory>,
        validator: Arc<SessionValidator>,
        auth: Arc<dyn AuthenticationFlow>,
        descriptors: Vec<ServiceDescriptor>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            factory,
            validator,
            auth,
            descriptors,
            retry: config.retry_policy(),
            setup_timeout: config.setup_timeout(),
        }
    }

    /// Configured service descriptors
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    /// Descriptor for a service
    pub fn descriptor(&self, service_id: &str) -> Option<&ServiceDescriptor> {
        self.descriptors.iter().find(|d| d.id == service_id)
    }

    /// Session factory
    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    /// Run a job against all its target services concurrently.
    ///
    /// Returns one output per target service in request order, after every
    /// service reached a terminal state.
    pub async fn dispatch(&self, job: &PromptJob, cancel: &CancellationToken) -> Vec<RawOutput> {
        info!(
            job_id = %job.job_id(),
            services = ?job.target_services(),
            timeout_secs = job.per_service_timeout().as_secs(),
            max_retries = job.max_retries(),
            "Dispatching job"
        );

        let runs = job
            .target_services()
            .iter()
            .map(|service_id| self.run_service(job, service_id, cancel));
        let outputs = join_all(runs).await;

        let succeeded = outputs.iter().filter(|o| o.outcome.is_success()).count();
        info!(
            job_id = %job.job_id(),
            succeeded = succeeded,
            failed = outputs.len() - succeeded,
            "Job dispatched"
        );
        outputs
    }

    async fn run_service(&self, job: &PromptJob, service_id: &str, cancel: &CancellationToken) -> RawOutput {
        let Some(descriptor) = self.descriptor(service_id) else {
            warn!(job_id = %job.job_id(), service = %service_id, "No descriptor for service");
            let error = Error::UnknownService(service_id.to_string());
            return RawOutput::failure(job.job_id(), service_id, 0, error.outcome());
        };

        let policy = self.retry.clone().with_max_retries(job.max_retries());
        let result = retry_with_backoff(
            &policy,
            cancel,
            |attempt| self.attempt(job, descriptor, attempt, cancel),
            Error::is_retryable,
        )
        .await;

        match result {
            Ok((text, attempt)) => {
                info!(job_id = %job.job_id(), service = %service_id, attempt = attempt, chars = text.len(), "Service answered");
                RawOutput::success(job.job_id(), service_id, text, attempt)
            }
            Err(e) => {
                warn!(
                    job_id = %job.job_id(),
                    service = %service_id,
                    attempts = e.attempts,
                    code = e.last_error.code(),
                    error = %e.last_error,
                    "Service failed"
                );
                RawOutput::failure(job.job_id(), service_id, e.attempts, e.last_error.outcome())
            }
        }
    }

    /// One bounded attempt. Dropping the inner future on cancellation or
    /// timeout still releases the session through the lease.
    async fn attempt(
        &self,
        job: &PromptJob,
        descriptor: &ServiceDescriptor,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        debug!(job_id = %job.job_id(), service = %descriptor.id, attempt = attempt, "Starting attempt");
        let budget = job.per_service_timeout() + self.setup_timeout;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(budget, self.exchange(job, descriptor, cancel)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::ResponseTimeout {
                        service: descriptor.id.clone(),
                        after: budget,
                    }),
                }
            }
        }
    }

    async fn exchange(
        &self,
        job: &PromptJob,
        descriptor: &ServiceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut lease = self.factory.acquire(&descriptor.id).await?;
        let credentials_ref = lease.profile().and_then(|p| p.credentials_ref.clone());

        let result = self
            .converse(lease.session_mut(), descriptor, job, credentials_ref.as_deref(), cancel)
            .await;

        if let Err(e) = lease.release().await {
            debug!(service = %descriptor.id, error = %e, "Ignoring release failure");
        }
        result
    }

    async fn converse(
        &self,
        session: &mut Session,
        descriptor: &ServiceDescriptor,
        job: &PromptJob,
        credentials_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        session.driver().navigate(&descriptor.home_url).await?;
        self.ensure_authenticated(session, descriptor, credentials_ref, cancel)
            .await?;

        session.begin_operation()?;
        let result = self.submit_and_wait(session, descriptor, job, cancel).await;
        match &result {
            Err(Error::AuthenticationRequired { reason, .. }) => {
                warn!(service = %descriptor.id, reason = %reason, "Session lost authentication");
                session.mark_unauthenticated();
            }
            _ => session.end_operation(),
        }
        result
    }

    async fn submit_and_wait(
        &self,
        session: &mut Session,
        descriptor: &ServiceDescriptor,
        job: &PromptJob,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let automation = ServiceAutomation::new(descriptor, self.factory.stealth());
        let driver = session.driver();

        automation.locate_input(driver, cancel).await?;
        let baseline = automation.peek_output(driver).await?;
        automation
            .submit_input(driver, &compose_prompt(job.prompt()), cancel)
            .await?;
        automation
            .detect_completion(driver, baseline.as_deref(), job.per_service_timeout(), cancel)
            .await
    }

    async fn ensure_authenticated(
        &self,
        session: &mut Session,
        descriptor: &ServiceDescriptor,
        credentials_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.validator.validate(session, descriptor).await {
            Validation::Valid => Ok(()),
            Validation::Invalid(reason) => {
                info!(service = %descriptor.id, reason = %reason, "Session invalid, re-authenticating");
                self.auth
                    .authenticate(session, descriptor, credentials_ref, cancel)
                    .await
            }
        }
    }

    /// Open a session, bring it to a signed-in state and release it.
    /// Used by health checks.
    pub async fn probe(&self, service_id: &str, cancel: &CancellationToken) -> Result<()> {
        let descriptor = self
            .descriptor(service_id)
            .ok_or_else(|| Error::UnknownService(service_id.to_string()))?;

        let check = async {
            let mut lease = self.factory.acquire(service_id).await?;
            let credentials_ref = lease.profile().and_then(|p| p.credentials_ref.clone());
            let session = lease.session_mut();

            let result = match session.driver().navigate(&descriptor.home_url).await {
                Ok(()) => {
                    self.ensure_authenticated(session, descriptor, credentials_ref.as_deref(), cancel)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = lease.release().await {
                debug!(service = %service_id, error = %e, "Ignoring release failure");
            }
            result
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.setup_timeout, check) => match result {
                Ok(inner) => inner,
                Err(_) => Err(Error::ResponseTimeout {
                    service: service_id.to_string(),
                    after: self.setup_timeout,
                }),
            },
        }
    }
}
