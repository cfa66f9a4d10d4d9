//! Error types for parley-core
//!
//! This module provides the failure taxonomy shared by the session engine,
//! its mapping onto per-attempt outcomes, and user-friendly error formatting.

use std::time::Duration;
use thiserror::Error;

use crate::job::Outcome;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Another operation holds the profile and the bounded wait elapsed
    #[error("profile for '{service}' is locked by another operation")]
    ProfileLocked {
        /// Service identifier
        service: String,
    },

    /// Profile directory or metadata is missing or unreadable
    #[error("profile for '{service}' is corrupt: {reason}")]
    ProfileCorrupt {
        /// Service identifier
        service: String,
        /// What was wrong with the profile
        reason: String,
    },

    /// The session lost (or never had) an authenticated state
    #[error("authentication required for '{service}': {reason}")]
    AuthenticationRequired {
        /// Service identifier
        service: String,
        /// Why the session is considered unauthenticated
        reason: String,
    },

    /// Login was attempted and did not produce a valid session
    #[error("authentication failed for '{service}': {reason}")]
    AuthenticationFailed {
        /// Service identifier
        service: String,
        /// Failure detail
        reason: String,
    },

    /// No one-time code arrived within the polling window
    #[error("one-time code for '{destination}' did not arrive in time")]
    OtpTimeout {
        /// Where the code was sent (mailbox, phone, ...)
        destination: String,
    },

    /// A configured locator matched nothing within its wait budget
    #[error("element not found: {locator}")]
    ElementNotFound {
        /// Locator expression that failed
        locator: String,
    },

    /// Prompt text could not be submitted in time
    #[error("prompt submission to '{service}' timed out after {after:?}")]
    SubmissionTimeout {
        /// Service identifier
        service: String,
        /// Elapsed budget
        after: Duration,
    },

    /// The service did not signal completion in time
    #[error("response from '{service}' timed out after {after:?}")]
    ResponseTimeout {
        /// Service identifier
        service: String,
        /// Elapsed budget
        after: Duration,
    },

    /// Structured block missing or failing schema checks (absorbed by fallback)
    #[error("malformed structured response: {0}")]
    MalformedStructuredResponse(String),

    /// Operation cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The external service reported an error of its own (rate limit page, refusal, ...)
    #[error("'{service}' reported an error: {message}")]
    ServiceReported {
        /// Service identifier
        service: String,
        /// Message shown by the service
        message: String,
    },

    /// Service identifier has no descriptor
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// No persisted report for a job
    #[error("no report for job {0}")]
    ReportNotFound(String),

    /// Automation driver or relay failure
    #[error("driver error: {0}")]
    Driver(String),

    /// Local processor failure on a confidential job
    #[error("local processor error: {0}")]
    LocalProcessor(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Outcome recorded on a `RawOutput` when an attempt ends with this error.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::SubmissionTimeout { .. } | Self::ResponseTimeout { .. } => Outcome::Timeout,
            Self::ElementNotFound { .. } => Outcome::ElementNotFound,
            Self::AuthenticationRequired { .. } => Outcome::AuthLost,
            Self::Cancelled => Outcome::Cancelled,
            other => Outcome::Error(other.to_string()),
        }
    }

    /// Whether the dispatcher may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.outcome().is_retryable()
    }

    /// Short error code for logs and persisted failure records.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProfileLocked { .. } => "profile_locked",
            Self::ProfileCorrupt { .. } => "profile_corrupt",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::OtpTimeout { .. } => "otp_timeout",
            Self::ElementNotFound { .. } => "element_not_found",
            Self::SubmissionTimeout { .. } => "submission_timeout",
            Self::ResponseTimeout { .. } => "response_timeout",
            Self::MalformedStructuredResponse(_) => "malformed_structured_response",
            Self::Cancelled => "cancelled",
            Self::ServiceReported { .. } => "service_reported",
            Self::UnknownService(_) => "unknown_service",
            Self::ReportNotFound(_) => "report_not_found",
            Self::Driver(_) => "driver_error",
            Self::LocalProcessor(_) => "local_processor_error",
            Self::Configuration(_) => "configuration_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    pub(crate) fn corrupt(service: &str, reason: impl Into<String>) -> Self {
        Self::ProfileCorrupt {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn element(locator: impl std::fmt::Display) -> Self {
        Self::ElementNotFound {
            locator: locator.to_string(),
        }
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::ProfileLocked { service } => {
                format!("🔒 The {} profile is in use by another operation.", service)
            }
            Error::ProfileCorrupt { service, reason } => {
                format!("🧩 The {} profile could not be loaded: {}", service, reason)
            }
            Error::AuthenticationRequired { service, .. }
            | Error::AuthenticationFailed { service, .. } => {
                format!("🔑 Could not sign in to {}.", service)
            }
            Error::OtpTimeout { destination } => {
                format!("⏳ No one-time code arrived for {}.", destination)
            }
            Error::ElementNotFound { locator } => {
                format!("🔍 The page no longer matches locator '{}'.", locator)
            }
            Error::SubmissionTimeout { service, .. } | Error::ResponseTimeout { service, .. } => {
                format!("⏱️ {} did not answer in time.", service)
            }
            Error::Cancelled => "✋ Cancelled.".to_string(),
            Error::UnknownService(service) => format!("❓ Unknown service '{}'.", service),
            other => format!("❌ {}", other),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::ProfileLocked { .. } => Some(
                "💡 Wait for the running job to finish, or remove the lock marker if the owning process is gone."
                    .to_string(),
            ),
            Error::ProfileCorrupt { service, .. } => Some(format!(
                "💡 Re-register the profile with `parley profiles add {}`.",
                service
            )),
            Error::AuthenticationRequired { .. } | Error::AuthenticationFailed { .. } => Some(
                "💡 Check the credentials referenced by the service descriptor.".to_string(),
            ),
            Error::ElementNotFound { .. } => Some(
                "💡 The service UI may have changed; update its locators in the service descriptor."
                    .to_string(),
            ),
            Error::UnknownService(_) => {
                Some("💡 Run `parley status` to list configured services.".to_string())
            }
            Error::LocalProcessor(_) => Some(
                "💡 Confidential prompts need the local model endpoint from `[local]` to be running."
                    .to_string(),
            ),
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }
    output.push('\n');
    output
}

#[cfg(test)]
mod tests;
