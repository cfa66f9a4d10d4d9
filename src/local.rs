//! Local model processor for confidential prompts
//!
//! Confidential prompts never leave the machine: they go to an Ollama
//! instance over its HTTP API instead of any external service.

use async_trait::async_trait;
use parley_core::{Error, LocalProcessor, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::LocalSettings;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

/// [`LocalProcessor`] backed by Ollama's generate endpoint
pub struct OllamaProcessor {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProcessor {
    /// Create a processor from settings
    pub fn new(settings: &LocalSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| Error::LocalProcessor(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl LocalProcessor for OllamaProcessor {
    async fn process(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %self.model, "Sending confidential prompt to local model");

        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::LocalProcessor(format!(
                        "failed to connect to Ollama at {}",
                        self.base_url
                    ))
                } else if e.is_timeout() {
                    Error::LocalProcessor("local model timed out".to_string())
                } else {
                    Error::LocalProcessor(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::LocalProcessor(e.to_string()))?;

        if !status.is_success() {
            // Never echo the raw body; it may quote the prompt
            let detail = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("HTTP {}", status));
            return Err(Error::LocalProcessor(detail));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LocalProcessor(format!("invalid response: {}", e)))?;
        Ok(parsed.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> LocalSettings {
        LocalSettings {
            base_url: format!("{}/", server.uri()),
            model: "tiny".to_string(),
            ..LocalSettings::default()
        }
    }

    #[tokio::test]
    async fn test_generate_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "tiny",
                "prompt": "private question",
                "stream": false
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "  local answer\n", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let processor = OllamaProcessor::new(&settings(&server)).unwrap();
        let answer = processor.process("private question").await.unwrap();

        assert_eq!(answer, "local answer");
    }

    #[tokio::test]
    async fn test_error_body_is_reported_without_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "model 'tiny' not found"})),
            )
            .mount(&server)
            .await;

        let processor = OllamaProcessor::new(&settings(&server)).unwrap();
        let err = processor.process("private question").await.unwrap_err();

        match err {
            Error::LocalProcessor(detail) => {
                assert!(detail.contains("not found"));
                assert!(!detail.contains("private"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
