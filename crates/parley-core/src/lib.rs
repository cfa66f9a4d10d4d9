//! Parley Core - Prompt Dispatch Engine
//!
//! This crate drives authenticated browser sessions against several
//! chat-style web services at once, including:
//! - Profiles: Persistent per-service profiles with exclusive locking
//! - Sessions: Scoped driver acquisition that always releases
//! - Validation: Layered checks for a signed-in session
//! - Authentication: Form login with one-time code polling
//! - Dispatch: Concurrent fan-out with bounded retries and cancellation
//! - Processing: Structured or heuristic normalization of answers
//! - Aggregation: Consensus, disagreements and attributed points
//! - Manager: Job façade, readiness tracking and the health loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod auth;
pub mod automation;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod job;
pub mod manager;
pub mod processor;
pub mod profile;
pub mod prompt;
pub mod report;
pub mod report_store;
pub mod retry;
pub mod session;
pub mod validator;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregate::Aggregator;
pub use auth::{
    AuthenticationFlow, CredentialResolver, Credentials, EnvCredentials, FormLoginFlow,
    OtpProvider, StaticCredentials,
};
pub use config::{
    AggregationConfig, AuthConfig, DispatchConfig, EngineConfig, HealthConfig, ProcessingConfig,
    ProfilesConfig, RelayConfig, ReportsConfig, ValidationConfig,
};
pub use descriptor::{Locator, Locators, ServiceDescriptor};
pub use dispatcher::PromptDispatcher;
pub use driver::{DriverLauncher, LaunchRequest, RelayLauncher, SessionDriver, StealthProfile};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use job::{JobRequest, Outcome, PromptJob, RawOutput};
pub use manager::{
    LocalProcessor, ManagerBuilder, OrchestrationManager, ServiceState, ServiceStatus,
    LOCAL_SERVICE_ID,
};
pub use processor::ResponseProcessor;
pub use profile::{LockState, ProfileStore, ServiceProfile};
pub use report::{
    AggregatedReport, AttributedPoint, Category, ConsensusPoint, Disagreement, NormalizedResponse,
    ParseMode, Position, ServiceFailure,
};
pub use report_store::ReportStore;
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
pub use session::{Session, SessionFactory, SessionLease, SessionState};
pub use validator::{SessionValidator, Validation, Verdict};
