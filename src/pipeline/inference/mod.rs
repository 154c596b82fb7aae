//! Inference client adapter.
//!
//! Every call is gated by a liveness probe and bounded by a timeout. Transport
//! trouble (probe failure, connection errors, timeouts) is normalized to
//! [`InvokeError::Unavailable`], the single signal the orchestrator aborts on.
//! Anything else, such as a 4xx for an unknown model or an unparsable body,
//! is [`InvokeError::Failed`] and propagates as an ordinary error.

pub mod ollama;
#[cfg(test)]
pub(crate) mod mock;

pub use ollama::OllamaClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use zeroize::Zeroizing;

use super::sanitize::sanitize_model_output;
use crate::config::InferenceConfig;
use crate::crypto::content_digest;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference service at {0} is not reachable")]
    Unreachable(String),

    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference transport error: {0}")]
    Transport(String),

    #[error("Inference service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl InferenceError {
    /// Whether this failure means the service itself could not be used.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout(_) | Self::Transport(_)
        ) || matches!(self, Self::Status { status, .. } if *status >= 500)
    }
}

/// One generation request.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Temperature 0 so identical prompts give identical replies.
    pub deterministic: bool,
}

/// Transport to a generative model service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Liveness check; must succeed before any generation is attempted.
    async fn probe(&self) -> Result<(), InferenceError>;

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, InferenceError>;
}

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("Inference unavailable: {0}")]
    Unavailable(#[source] InferenceError),

    #[error("Inference failed: {0}")]
    Failed(#[source] InferenceError),
}

impl InvokeError {
    fn classify(err: InferenceError) -> Self {
        if err.is_unavailable() {
            Self::Unavailable(err)
        } else {
            Self::Failed(err)
        }
    }
}

/// Normalized result of one model call. `text` is plaintext and must be
/// sealed before it is stored anywhere.
pub struct Analysis {
    pub timestamp: DateTime<Utc>,
    /// SHA-512 of the sanitized text.
    pub content_digest: String,
    pub text: Zeroizing<String>,
}

impl std::fmt::Debug for Analysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analysis")
            .field("timestamp", &self.timestamp)
            .field("content_digest", &self.content_digest)
            .field("text", &format_args!("<{} chars redacted>", self.text.len()))
            .finish()
    }
}

/// Probes, dispatches and normalizes model calls.
#[derive(Clone)]
pub struct InferenceAdapter {
    client: Arc<dyn InferenceClient>,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl InferenceAdapter {
    pub fn new(client: Arc<dyn InferenceClient>, config: &InferenceConfig) -> Self {
        Self {
            client,
            request_timeout: config.request_timeout,
            probe_timeout: config.probe_timeout,
        }
    }

    /// Probe the service, then send one prompt. The model is never
    /// contacted when the probe fails.
    pub async fn invoke(&self, model: &str, prompt: &str) -> Result<Analysis, InvokeError> {
        self.probe().await?;

        let timestamp = Utc::now();
        let request = GenerateRequest {
            model,
            prompt,
            deterministic: true,
        };
        let raw = match tokio::time::timeout(self.request_timeout, self.client.generate(request)).await {
            Ok(Ok(raw)) => Zeroizing::new(raw),
            Ok(Err(e)) => {
                tracing::warn!(model = %model, error = %e, "Inference call failed");
                return Err(InvokeError::classify(e));
            }
            Err(_) => {
                tracing::warn!(model = %model, timeout = ?self.request_timeout, "Inference call timed out");
                return Err(InvokeError::Unavailable(InferenceError::Timeout(
                    self.request_timeout,
                )));
            }
        };

        let text = Zeroizing::new(sanitize_model_output(&raw));
        let digest = content_digest(&text);
        tracing::debug!(model = %model, digest = %crate::models::short_digest(&digest), chars = text.len(), "Inference reply received");
        Ok(Analysis {
            timestamp,
            content_digest: digest,
            text,
        })
    }

    /// Liveness check with its own, shorter timeout.
    pub async fn probe(&self) -> Result<(), InvokeError> {
        match tokio::time::timeout(self.probe_timeout, self.client.probe()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Inference service failed liveness probe");
                Err(InvokeError::Unavailable(e))
            }
            Err(_) => {
                tracing::error!(timeout = ?self.probe_timeout, "Inference liveness probe timed out");
                Err(InvokeError::Unavailable(InferenceError::Timeout(self.probe_timeout)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedInferenceClient;
    use super::*;

    fn adapter(client: ScriptedInferenceClient) -> (InferenceAdapter, Arc<ScriptedInferenceClient>) {
        let client = Arc::new(client);
        let config = InferenceConfig {
            base_url: "http://unused".into(),
            request_timeout: Duration::from_millis(200),
            probe_timeout: Duration::from_millis(50),
        };
        (InferenceAdapter::new(client.clone(), &config), client)
    }

    #[tokio::test]
    async fn digest_is_over_sanitized_text() {
        let (adapter, _) = adapter(ScriptedInferenceClient::new().with_default("  E11.9\x00 "));
        let analysis = adapter.invoke("medllama2", "prompt").await.unwrap();
        assert_eq!(analysis.text.as_str(), "E11.9");
        assert_eq!(analysis.content_digest, content_digest("E11.9"));
    }

    #[tokio::test]
    async fn probe_failure_never_reaches_model() {
        let (adapter, client) = adapter(ScriptedInferenceClient::new().with_probe_failure());
        let result = adapter.invoke("medllama2", "prompt").await;
        assert!(matches!(result, Err(InvokeError::Unavailable(_))));
        assert_eq!(client.generate_calls(), 0);
    }

    #[tokio::test]
    async fn slow_generation_is_unavailable() {
        let (adapter, _) = adapter(
            ScriptedInferenceClient::new()
                .with_default("late")
                .with_delay(Duration::from_secs(5)),
        );
        let result = adapter.invoke("medllama2", "prompt").await;
        assert!(matches!(
            result,
            Err(InvokeError::Unavailable(InferenceError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn transport_error_is_unavailable() {
        let (adapter, _) = adapter(ScriptedInferenceClient::new().with_error(
            "Diagnose",
            || InferenceError::Transport("connection reset".into()),
        ));
        let result = adapter.invoke("medllama2", "Diagnose this patient: x").await;
        assert!(matches!(result, Err(InvokeError::Unavailable(_))));
    }

    #[tokio::test]
    async fn client_error_propagates_as_failure() {
        let (adapter, _) = adapter(ScriptedInferenceClient::new().with_error("Diagnose", || {
            InferenceError::Status {
                status: 404,
                body: "model not found".into(),
            }
        }));
        let result = adapter.invoke("nope", "Diagnose this patient: x").await;
        assert!(matches!(result, Err(InvokeError::Failed(_))));
    }

    #[test]
    fn server_errors_count_as_unavailable() {
        assert!(InferenceError::Status {
            status: 503,
            body: String::new()
        }
        .is_unavailable());
        assert!(!InferenceError::MalformedResponse("x".into()).is_unavailable());
    }

    #[test]
    fn debug_output_redacts_text() {
        let analysis = Analysis {
            timestamp: Utc::now(),
            content_digest: "d".into(),
            text: Zeroizing::new("Type 2 diabetes".into()),
        };
        let rendered = format!("{analysis:?}");
        assert!(!rendered.contains("diabetes"));
        assert!(rendered.contains("redacted"));
    }
}
