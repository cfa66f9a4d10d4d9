//! Orchestration manager
//!
//! Entry point of the engine. Wires profiles, sessions, validation,
//! authentication, dispatch, processing and aggregation together, tracks a
//! readiness state per service and runs the periodic health loop.
//!
//! `submit_job` always produces a report: per-service failures become
//! failure records, never errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::Aggregator;
use crate::auth::{AuthenticationFlow, CredentialResolver, EnvCredentials, FormLoginFlow, OtpProvider};
use crate::config::EngineConfig;
use crate::dispatcher::PromptDispatcher;
use crate::driver::{DriverLauncher, RelayLauncher};
use crate::error::{Error, Result};
use crate::job::{JobRequest, Outcome, PromptJob, RawOutput};
use crate::processor::ResponseProcessor;
use crate::profile::ProfileStore;
use crate::report::AggregatedReport;
use crate::report_store::ReportStore;
use crate::session::SessionFactory;
use crate::validator::SessionValidator;

/// Service id used for answers from the local processor
pub const LOCAL_SERVICE_ID: &str = "local";

/// Handles confidential prompts without any external service
#[async_trait]
pub trait LocalProcessor: Send + Sync {
    /// Answer a prompt locally
    async fn process(&self, prompt: &str) -> Result<String>;
}

/// Readiness of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Not checked yet
    #[default]
    Unknown,
    /// Health check in progress
    Checking,
    /// Signed in and usable
    Ready,
    /// Last check or job failed
    Unavailable,
}

/// Health view of one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Current state
    pub state: ServiceState,
    /// Last successful validation recorded on the profile
    pub last_validated_at: Option<DateTime<Utc>>,
    /// Last failure detail
    pub last_error: Option<String>,
    /// Time of the last state change
    pub updated_at: Option<DateTime<Utc>>,
}

impl ServiceStatus {
    /// Whether the service is ready for prompts
    pub fn is_ready(&self) -> bool {
        self.state == ServiceState::Ready
    }
}

/// Assembles an [`OrchestrationManager`]
pub struct ManagerBuilder {
    config: EngineConfig,
    launcher: Option<Arc<dyn DriverLauncher>>,
    credentials: Option<Arc<dyn CredentialResolver>>,
    otp: Option<Arc<dyn OtpProvider>>,
    auth: Option<Arc<dyn AuthenticationFlow>>,
    local: Option<Arc<dyn LocalProcessor>>,
    reports: Option<Option<ReportStore>>,
}

impl fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("services", &self.config.services.len())
            .field("launcher", &self.launcher.as_ref().map(|l| l.name().to_string()))
            .field("otp", &self.otp.is_some())
            .field("local", &self.local.is_some())
            .finish_non_exhaustive()
    }
}

impl ManagerBuilder {
    /// Start from an engine configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            launcher: None,
            credentials: None,
            otp: None,
            auth: None,
            local: None,
            reports: None,
        }
    }

    /// Driver launcher (defaults to the HTTP relay)
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn DriverLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Credential resolver (defaults to environment variables)
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// One-time code provider for the built-in login flow
    #[must_use]
    pub fn otp_provider(mut self, provider: Arc<dyn OtpProvider>) -> Self {
        self.otp = Some(provider);
        self
    }

    /// Replace the built-in login flow
    #[must_use]
    pub fn authentication(mut self, flow: Arc<dyn AuthenticationFlow>) -> Self {
        self.auth = Some(flow);
        self
    }

    /// Processor for confidential jobs
    #[must_use]
    pub fn local_processor(mut self, processor: Arc<dyn LocalProcessor>) -> Self {
        self.local = Some(processor);
        self
    }

    /// Report store override; `None` disables persistence
    #[must_use]
    pub fn report_store(mut self, store: Option<ReportStore>) -> Self {
        self.reports = Some(store);
        self
    }

    /// Validate the configuration and wire the engine
    pub fn build(self) -> Result<OrchestrationManager> {
        let config = self.config;
        config.validate()?;

        let profiles = Arc::new(ProfileStore::new(&config.profiles));
        for service in &config.services {
            if !profiles.is_registered(&service.id) {
                profiles.register(&service.id, service.credentials_ref.as_deref())?;
            }
        }

        let launcher: Arc<dyn DriverLauncher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(RelayLauncher::new(&config.relay)?),
        };
        let validator = Arc::new(SessionValidator::new(&config.validation, profiles.clone()));
        let auth: Arc<dyn AuthenticationFlow> = match self.auth {
            Some(flow) => flow,
            None => {
                let credentials = self
                    .credentials
                    .unwrap_or_else(|| Arc::new(EnvCredentials::new()));
                let mut flow = FormLoginFlow::new(
                    credentials,
                    validator.clone(),
                    config.auth.clone(),
                    config.stealth.clone(),
                );
                if let Some(otp) = self.otp {
                    flow = flow.with_otp_provider(otp);
                }
                Arc::new(flow)
            }
        };

        let factory = Arc::new(SessionFactory::new(profiles, launcher, config.stealth.clone()));
        let dispatcher = PromptDispatcher::new(
            factory,
            validator,
            auth,
            config.services.clone(),
            &config.dispatch,
        );

        let reports = match self.reports {
            Some(store) => store,
            None if config.reports.enabled => Some(ReportStore::new(config.reports.dir.clone())),
            None => None,
        };

        let states = config
            .services
            .iter()
            .map(|s| (s.id.clone(), ServiceStatus::default()))
            .collect();

        info!(
            services = config.services.len(),
            reports = reports.is_some(),
            local = self.local.is_some(),
            "Orchestration manager ready"
        );

        Ok(OrchestrationManager {
            processor: ResponseProcessor::new(config.processing.clone()),
            aggregator: Aggregator::new(config.aggregation.clone()),
            config,
            dispatcher,
            local: self.local,
            reports,
            states: RwLock::new(states),
            cancel: CancellationToken::new(),
        })
    }
}

/// Top-level façade over the dispatch pipeline
pub struct OrchestrationManager {
    config: EngineConfig,
    dispatcher: PromptDispatcher,
    processor: ResponseProcessor,
    aggregator: Aggregator,
    local: Option<Arc<dyn LocalProcessor>>,
    reports: Option<ReportStore>,
    states: RwLock<HashMap<String, ServiceStatus>>,
    cancel: CancellationToken,
}

impl fmt::Debug for OrchestrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestrationManager")
            .field("dispatcher", &self.dispatcher)
            .field("local", &self.local.is_some())
            .field("reports", &self.reports)
            .finish_non_exhaustive()
    }
}

impl OrchestrationManager {
    /// Start building a manager
    pub fn builder(config: EngineConfig) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Configured service ids, in configuration order
    pub fn services(&self) -> Vec<String> {
        self.config.services.iter().map(|s| s.id.clone()).collect()
    }

    /// Profile store
    pub fn profiles(&self) -> &Arc<ProfileStore> {
        self.dispatcher.factory().profiles()
    }

    /// Report store, when persistence is enabled
    pub fn reports(&self) -> Option<&ReportStore> {
        self.reports.as_ref()
    }

    /// Cancel every in-flight job and stop the health loop
    pub fn cancel(&self) {
        info!("Cancelling in-flight work");
        self.cancel.cancel();
    }

    /// Run a job to completion and return its report
    pub async fn submit_job(&self, request: JobRequest) -> AggregatedReport {
        let cancel = self.cancel.child_token();
        self.submit_job_with_cancel(request, cancel).await
    }

    /// Run a job with its own cancellation token
    pub async fn submit_job_with_cancel(
        &self,
        request: JobRequest,
        cancel: CancellationToken,
    ) -> AggregatedReport {
        let report = if request.confidential {
            self.run_confidential(&request, &cancel).await
        } else {
            self.run_dispatch(request, &cancel).await
        };

        if let Some(store) = &self.reports {
            if let Err(e) = store.save(&report) {
                warn!(job_id = %report.job_id, error = %e, "Failed to persist report");
            }
        }
        report
    }

    async fn run_dispatch(&self, request: JobRequest, cancel: &CancellationToken) -> AggregatedReport {
        let services = if request.services.is_empty() {
            self.services()
        } else {
            request.services
        };
        let job = PromptJob::new(
            request.prompt,
            services,
            request
                .timeout
                .unwrap_or_else(|| self.config.dispatch.default_timeout()),
            request.max_retries.unwrap_or(self.config.dispatch.max_retries),
        );

        let outputs = self.dispatcher.dispatch(&job, cancel).await;
        self.record_outputs(&outputs).await;
        self.finish(job.job_id(), &outputs)
    }

    async fn run_confidential(&self, request: &JobRequest, cancel: &CancellationToken) -> AggregatedReport {
        let job_id = Uuid::new_v4();
        info!(job_id = %job_id, "Routing confidential job to the local processor");

        let output = match &self.local {
            None => RawOutput::failure(
                job_id,
                LOCAL_SERVICE_ID,
                0,
                Outcome::Error("no local processor is configured".to_string()),
            ),
            Some(local) => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    result = local.process(&request.prompt) => result,
                };
                match result {
                    Ok(text) => RawOutput::success(job_id, LOCAL_SERVICE_ID, text, 1),
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Local processor failed");
                        RawOutput::failure(job_id, LOCAL_SERVICE_ID, 1, e.outcome())
                    }
                }
            }
        };

        let mut report = self.finish(job_id, std::slice::from_ref(&output));
        report.confidential = true;
        report
    }

    fn finish(&self, job_id: Uuid, outputs: &[RawOutput]) -> AggregatedReport {
        let responses = outputs.iter().map(|o| self.processor.process(o)).collect();
        let report = self.aggregator.aggregate(job_id, responses);
        info!(
            job_id = %job_id,
            answered = report.answered(),
            failed = report.failures.len(),
            consensus = report.consensus.len(),
            "Job finished"
        );
        report
    }

    async fn record_outputs(&self, outputs: &[RawOutput]) {
        let mut states = self.states.write().await;
        for output in outputs {
            let Some(status) = states.get_mut(&output.service_id) else {
                continue;
            };
            match &output.outcome {
                Outcome::Success => {
                    status.state = ServiceState::Ready;
                    status.last_error = None;
                    status.last_validated_at = self.last_validated(&output.service_id);
                }
                Outcome::Cancelled | Outcome::Timeout => continue,
                other => {
                    status.state = ServiceState::Unavailable;
                    status.last_error = Some(other.to_string());
                }
            }
            status.updated_at = Some(Utc::now());
        }
    }

    fn last_validated(&self, service_id: &str) -> Option<DateTime<Utc>> {
        self.profiles()
            .load(service_id)
            .ok()
            .and_then(|p| p.last_validated_at)
    }

    /// Current status of every configured service, keyed by id.
    ///
    /// Services not validated during this run report the validation time
    /// persisted in their profile.
    pub async fn get_service_status(&self) -> BTreeMap<String, ServiceStatus> {
        let mut statuses: BTreeMap<String, ServiceStatus> = self
            .states
            .read()
            .await
            .iter()
            .map(|(id, status)| (id.clone(), status.clone()))
            .collect();
        for (id, status) in statuses.iter_mut() {
            if status.last_validated_at.is_none() {
                status.last_validated_at = self.last_validated(id);
            }
        }
        statuses
    }

    /// Validate (and if needed re-authenticate) one service
    pub async fn check_service(&self, service_id: &str) -> Result<ServiceState> {
        let previous = {
            let mut states = self.states.write().await;
            let status = states
                .get_mut(service_id)
                .ok_or_else(|| Error::UnknownService(service_id.to_string()))?;
            let previous = status.state;
            status.state = ServiceState::Checking;
            previous
        };
        debug!(service = %service_id, previous = ?previous, "Checking service");

        let result = self.dispatcher.probe(service_id, &self.cancel.child_token()).await;

        let mut states = self.states.write().await;
        let status = states.entry(service_id.to_string()).or_default();
        match result {
            Ok(()) => {
                status.state = ServiceState::Ready;
                status.last_error = None;
                status.last_validated_at = self.last_validated(service_id);
                info!(service = %service_id, "Service ready");
            }
            Err(Error::ProfileLocked { .. }) | Err(Error::Cancelled) => {
                // In use by a job or shutting down; the check proves nothing
                status.state = previous;
                debug!(service = %service_id, "Health check skipped");
                return Ok(previous);
            }
            Err(e) => {
                status.state = ServiceState::Unavailable;
                status.last_error = Some(e.to_string());
                warn!(service = %service_id, error = %e, "Service unavailable");
            }
        }
        status.updated_at = Some(Utc::now());
        Ok(status.state)
    }

    /// Check every configured service concurrently
    pub async fn check_all(&self) -> BTreeMap<String, ServiceState> {
        let services = self.services();
        let checks = services.iter().map(|id| self.check_service(id));
        let results = join_all(checks).await;

        services
            .into_iter()
            .zip(results)
            .map(|(id, result)| (id, result.unwrap_or(ServiceState::Unavailable)))
            .collect()
    }

    /// Run `check_all` on the configured interval until cancelled
    pub fn spawn_health_loop(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.config.health.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "Health loop started");
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let states = self.check_all().await;
                        let ready = states.values().filter(|s| **s == ServiceState::Ready).count();
                        debug!(ready = ready, total = states.len(), "Health pass complete");
                    }
                }
            }
            info!("Health loop stopped");
        })
    }
}

#[cfg(test)]
mod tests;
