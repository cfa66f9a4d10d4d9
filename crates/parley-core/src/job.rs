//! Prompt jobs and per-service raw outputs
//!
//! A [`PromptJob`] is built once from a [`JobRequest`] and never changes
//! after dispatch. Every targeted service yields exactly one [`RawOutput`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Result of the final attempt against one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Response text was captured
    Success,
    /// Submission or completion wait exceeded its budget
    Timeout,
    /// A locator matched nothing
    ElementNotFound,
    /// The session was found unauthenticated mid-operation
    AuthLost,
    /// The job was cancelled
    Cancelled,
    /// Any other failure, with detail
    Error(String),
}

impl Outcome {
    /// Transient outcomes the dispatcher may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ElementNotFound | Self::AuthLost)
    }

    /// Whether the attempt succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::ElementNotFound => write!(f, "element not found"),
            Self::AuthLost => write!(f, "authentication lost"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

/// Inbound job request as accepted by the orchestration manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Prompt text
    pub prompt: String,
    /// Target services, in the order results should be reported
    #[serde(default)]
    pub services: Vec<String>,
    /// Route to the local processor instead of external services
    #[serde(default)]
    pub confidential: bool,
    /// Per-service completion timeout override
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
    /// Retry count override
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobRequest {
    /// Create a request for the given prompt and services
    pub fn new(prompt: impl Into<String>, services: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prompt: prompt.into(),
            services: services.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Mark the request as confidential
    #[must_use]
    pub fn confidential(mut self) -> Self {
        self.confidential = true;
        self
    }

    /// Override the per-service timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry count
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Immutable unit of work dispatched to one or more services
#[derive(Debug, Clone)]
pub struct PromptJob {
    job_id: Uuid,
    prompt: String,
    target_services: Vec<String>,
    per_service_timeout: Duration,
    max_retries: u32,
    created_at: DateTime<Utc>,
}

impl PromptJob {
    /// Build a job. Duplicate service ids are dropped, first occurrence wins.
    pub fn new(
        prompt: impl Into<String>,
        services: impl IntoIterator<Item = impl Into<String>>,
        per_service_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let mut target_services: Vec<String> = Vec::new();
        for service in services {
            let service = service.into();
            if !target_services.contains(&service) {
                target_services.push(service);
            }
        }

        Self {
            job_id: Uuid::new_v4(),
            prompt: prompt.into(),
            target_services,
            per_service_timeout,
            max_retries,
            created_at: Utc::now(),
        }
    }

    /// Job identifier
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Prompt text as given by the caller
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Targeted services in request order
    pub fn target_services(&self) -> &[String] {
        &self.target_services
    }

    /// Completion budget per service attempt
    pub fn per_service_timeout(&self) -> Duration {
        self.per_service_timeout
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Raw text captured from one service for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
    /// Owning job
    pub job_id: Uuid,
    /// Service that produced the output
    pub service_id: String,
    /// Captured text (empty on failure)
    pub raw_text: String,
    /// 1-based number of the final attempt
    pub attempt_number: u32,
    /// Outcome of the final attempt
    pub outcome: Outcome,
}

impl RawOutput {
    /// Successful capture
    pub fn success(job_id: Uuid, service_id: &str, raw_text: String, attempt_number: u32) -> Self {
        Self {
            job_id,
            service_id: service_id.to_string(),
            raw_text,
            attempt_number,
            outcome: Outcome::Success,
        }
    }

    /// Failed capture
    pub fn failure(job_id: Uuid, service_id: &str, attempt_number: u32, outcome: Outcome) -> Self {
        Self {
            job_id,
            service_id: service_id.to_string(),
            raw_text: String::new(),
            attempt_number,
            outcome,
        }
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_job_dedups_services_in_order() {
        let job = PromptJob::new(
            "hello",
            ["beta", "alpha", "beta", "gamma", "alpha"],
            Duration::from_secs(30),
            2,
        );
        assert_eq!(job.target_services(), ["beta", "alpha", "gamma"]);
        assert_eq!(job.max_retries(), 2);
    }

    #[test]
    fn test_retryable_outcomes() {
        assert!(Outcome::Timeout.is_retryable());
        assert!(Outcome::ElementNotFound.is_retryable());
        assert!(Outcome::AuthLost.is_retryable());
        assert!(!Outcome::Success.is_retryable());
        assert!(!Outcome::Cancelled.is_retryable());
        assert!(!Outcome::Error("boom".to_string()).is_retryable());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Error("rate limited".to_string())).unwrap();
        assert_eq!(json, r#"{"kind":"error","detail":"rate limited"}"#);

        let json = serde_json::to_string(&Outcome::AuthLost).unwrap();
        assert_eq!(json, r#"{"kind":"auth_lost"}"#);
    }

    #[test]
    fn test_job_request_from_json() {
        let request: JobRequest = serde_json::from_str(
            r#"{"prompt": "compare", "services": ["a", "b"], "timeout": 45}"#,
        )
        .unwrap();
        assert_eq!(request.services, vec!["a", "b"]);
        assert!(!request.confidential);
        assert_eq!(request.timeout, Some(Duration::from_secs(45)));
        assert_eq!(request.max_retries, None);
    }
}
