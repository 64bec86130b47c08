//! Remote HTTP conversion service executor.
//!
//! The remote protocol is submit-then-poll: POST the job, then poll its
//! status until it reaches a terminal state, the attempt deadline
//! expires, or the task is cancelled. On cancellation the remote job is
//! deleted best effort before returning.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::ExecutionContext;
use super::error::ExecutionError;
use super::traits::{EngineExecutor, ExecutionOutput};
use crate::options::ConversionOptions;
use crate::registry::{EngineCapabilities, EngineId, MediaFormat};
use crate::task::ConversionTask;

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEngineConfig {
    pub id: String,
    /// Base URL of the service, without a trailing slash.
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout for individual HTTP requests, not the whole conversion.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    source: &'a str,
    input_format: MediaFormat,
    output_format: MediaFormat,
    options: &'a ConversionOptions,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum RemoteJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: RemoteJobStatus,
    #[serde(default)]
    output_url: Option<String>,
    #[serde(default)]
    output_size_bytes: Option<u64>,
    #[serde(default)]
    error: Option<RemoteErrorBody>,
    #[serde(default)]
    progress_pct: Option<f32>,
}

pub struct RemoteEngineExecutor {
    id: EngineId,
    config: RemoteEngineConfig,
    client: reqwest::Client,
}

impl RemoteEngineExecutor {
    pub fn new(config: RemoteEngineConfig) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ExecutionError::Internal(format!("http client init failed: {e}")))?;
        Ok(Self {
            id: EngineId::new(config.id.clone()),
            config,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn submit(&self, task: &ConversionTask) -> Result<String, ExecutionError> {
        let body = SubmitRequest {
            source: task.input.location(),
            input_format: task.input_format,
            output_format: task.output_format,
            options: &task.options,
        };
        let response = self
            .request(self.client.post(self.url("/v1/conversions")))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::Internal(format!("malformed submit response: {e}")))?;
        Ok(submitted.id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatusResponse, ExecutionError> {
        let response = self
            .request(self.client.get(self.url(&format!("/v1/conversions/{job_id}"))))
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ExecutionError::Internal(format!("malformed status response: {e}")))
    }

    async fn abandon(&self, job_id: &str) {
        let result = self
            .request(self.client.delete(self.url(&format!("/v1/conversions/{job_id}"))))
            .send()
            .await;
        if let Err(e) = result {
            warn!(job_id, error = %e, "failed to delete remote job");
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> ExecutionError {
    if e.is_timeout() {
        ExecutionError::Transient(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ExecutionError::Unavailable(format!("cannot reach remote engine: {e}"))
    } else {
        ExecutionError::Transient(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExecutionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        Err(ExecutionError::ResourceExhausted(format!(
            "remote engine rate limited: {body}"
        )))
    } else if status.is_server_error() {
        Err(ExecutionError::Transient(format!(
            "remote engine returned {status}: {body}"
        )))
    } else {
        Err(ExecutionError::Internal(format!(
            "remote engine rejected request with {status}: {body}"
        )))
    }
}

/// Map the remote service's error codes onto the local taxonomy.
fn map_remote_failure(error: Option<RemoteErrorBody>) -> ExecutionError {
    let Some(error) = error else {
        return ExecutionError::Internal("remote job failed without error details".to_string());
    };
    match error.code.as_str() {
        "corrupt_input" | "invalid_input" | "unreadable_input" => {
            ExecutionError::CorruptInput(error.message)
        }
        "unsupported_codec" | "unsupported_format" => {
            ExecutionError::UnsupportedCodec(error.message)
        }
        "rate_limited" | "overloaded" | "quota_exceeded" => {
            ExecutionError::ResourceExhausted(error.message)
        }
        "timeout" => ExecutionError::Transient(format!("remote-side timeout: {}", error.message)),
        _ => ExecutionError::Internal(format!("{}: {}", error.code, error.message)),
    }
}

#[async_trait]
impl EngineExecutor for RemoteEngineExecutor {
    fn id(&self) -> &EngineId {
        &self.id
    }

    async fn availability(&self) -> Result<(), ExecutionError> {
        let response = self
            .request(self.client.get(self.url("/health")))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ExecutionError::Unavailable(format!("health check failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ExecutionError::Unavailable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    async fn execute(
        &self,
        task: &ConversionTask,
        capabilities: &EngineCapabilities,
        ctx: ExecutionContext,
    ) -> Result<ExecutionOutput, ExecutionError> {
        if let crate::task::InputSource::Upload { location } = &task.input {
            if let Ok(meta) = tokio::fs::metadata(location).await {
                if meta.len() > capabilities.max_file_size_bytes {
                    return Err(ExecutionError::InputTooLarge {
                        size_bytes: meta.len(),
                        max_bytes: capabilities.max_file_size_bytes,
                    });
                }
            }
        }

        let started = Instant::now();
        let job_id = self.submit(task).await?;
        debug!(task_id = %task.id, job_id, engine = %self.id, "remote job submitted");

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if ctx.is_cancelled() {
                self.abandon(&job_id).await;
                return Err(ExecutionError::Cancelled);
            }
            if started.elapsed() >= ctx.deadline {
                self.abandon(&job_id).await;
                return Err(ExecutionError::Timeout {
                    timeout_secs: ctx.deadline.as_secs(),
                });
            }

            let status = self.poll(&job_id).await?;
            match status.status {
                RemoteJobStatus::Queued | RemoteJobStatus::Processing => {
                    if let Some(pct) = status.progress_pct {
                        ctx.report_progress(pct);
                    }
                }
                RemoteJobStatus::Completed => {
                    let location = status.output_url.ok_or_else(|| {
                        ExecutionError::Internal(
                            "remote job completed without an output url".to_string(),
                        )
                    })?;
                    return Ok(ExecutionOutput {
                        location,
                        size_bytes: status.output_size_bytes.unwrap_or(0),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                RemoteJobStatus::Failed => {
                    return Err(map_remote_failure(status.error));
                }
            }

            let mut cancel = ctx.cancel_signal();
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = super::context::cancelled(&mut cancel) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_mapping() {
        let corrupt = map_remote_failure(Some(RemoteErrorBody {
            code: "corrupt_input".into(),
            message: "bad header".into(),
        }));
        assert!(matches!(corrupt, ExecutionError::CorruptInput(_)));
        assert!(!corrupt.is_retryable());

        let overloaded = map_remote_failure(Some(RemoteErrorBody {
            code: "overloaded".into(),
            message: "try later".into(),
        }));
        assert!(matches!(overloaded, ExecutionError::ResourceExhausted(_)));
        assert!(overloaded.is_retryable());

        let unknown = map_remote_failure(None);
        assert!(matches!(unknown, ExecutionError::Internal(_)));
    }

    #[test]
    fn test_status_deserialization() {
        let json = r#"{
            "status": "completed",
            "output_url": "https://cdn.example/jobs/42/out.mp4",
            "output_size_bytes": 1048576
        }"#;
        let status: JobStatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, RemoteJobStatus::Completed);
        assert_eq!(status.output_size_bytes, Some(1_048_576));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let executor = RemoteEngineExecutor::new(RemoteEngineConfig {
            id: "remote-1".into(),
            base_url: "https://convert.example.com/".into(),
            api_key: None,
            poll_interval_ms: 100,
            request_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            executor.url("/v1/conversions"),
            "https://convert.example.com/v1/conversions"
        );
    }
}
