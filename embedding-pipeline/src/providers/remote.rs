use std::time::Duration;

use async_trait::async_trait;
use common::error::AppError;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, warn};

use super::{map_provider_state, EmbeddingJobProvider, ProviderJobState};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const RETRY_BASE_DELAY_MS: u64 = 500;
const MAX_RETRIES: usize = 3;

/// Adapter for a cloud batch-inference HTTP API: jobs are created against an
/// input manifest location and an output prefix, then polled until terminal.
pub struct RemoteBatchProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Seconds the provider asked us to wait, when it said so.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl RemoteBatchProvider {
    pub fn new(base_url: &str, api_key: &str, model_id: &str) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model_id: model_id.to_owned(),
        })
    }

    /// Send a request, retrying rate limits and transient failures up to
    /// [`MAX_RETRIES`] times. A 429's `Retry-After` takes precedence over the
    /// exponential schedule; 5xx and connection failures use the schedule
    /// directly. Other statuses are returned to the caller as-is.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, AppError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .map(jitter)
            .take(MAX_RETRIES);

        loop {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    let retriable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if !retriable {
                        return Ok(response);
                    }

                    match backoff.next() {
                        Some(fallback) => {
                            let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                                retry_after(&response).unwrap_or(fallback)
                            } else {
                                fallback
                            };
                            warn!(
                                %status,
                                delay_ms = delay.as_millis() as u64,
                                "retrying provider request"
                            );
                            sleep(delay).await;
                        }
                        None => {
                            let text = response.text().await.unwrap_or_default();
                            return Err(AppError::Provider(format!(
                                "provider request failed after retries ({status}): {text}"
                            )));
                        }
                    }
                }
                Err(err) => match backoff.next() {
                    Some(delay) => {
                        warn!(
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "retrying provider request"
                        );
                        sleep(delay).await;
                    }
                    None => return Err(err.into()),
                },
            }
        }
    }
}

#[async_trait]
impl EmbeddingJobProvider for RemoteBatchProvider {
    fn provider_id(&self) -> &str {
        "remote_batch"
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }

    async fn submit_job(
        &self,
        input_path: &str,
        output_path: &str,
        job_name: &str,
    ) -> Result<String, AppError> {
        let body = json!({
            "modelId": self.model_id,
            "jobName": job_name,
            "inputDataConfig": { "uri": input_path },
            "outputDataConfig": { "uri": output_path },
        });

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(format!("{}/model-invocation-jobs", self.base_url))
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "batch job submission failed ({status}): {text}"
            )));
        }

        let created: CreateJobResponse = response.json().await?;
        debug!(job_id = %created.job_id, job_name, "submitted batch inference job");

        Ok(created.job_id)
    }

    async fn get_job_status(&self, external_job_id: &str) -> Result<ProviderJobState, AppError> {
        let response = self
            .send_with_retry(|| {
                self.http
                    .get(format!(
                        "{}/model-invocation-jobs/{external_job_id}",
                        self.base_url
                    ))
                    .bearer_auth(&self.api_key)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "batch job status poll failed ({status}): {text}"
            )));
        }

        let remote: JobStatusResponse = response.json().await?;
        let status = map_provider_state(&remote.status).ok_or_else(|| {
            AppError::Provider(format!("unknown provider job state: {}", remote.status))
        })?;

        Ok(ProviderJobState {
            status,
            error_message: remote.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::batch_job::BatchJobStatus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve each canned HTTP response on its own connection, in order.
    async fn serve_canned(responses: Vec<String>) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        addr
    }

    fn rate_limited() -> String {
        "HTTP/1.1 429 Too Many Requests\r\nretry-after: 0\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            .to_string()
    }

    fn server_error() -> String {
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            .to_string()
    }

    fn ok_json(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn provider_for(addr: std::net::SocketAddr) -> RemoteBatchProvider {
        RemoteBatchProvider::new(&format!("http://{addr}"), "key", "embed-v3")
            .expect("build provider")
    }

    #[tokio::test]
    async fn status_poll_retries_through_a_rate_limit() {
        let addr = serve_canned(vec![
            rate_limited(),
            ok_json(r#"{"status": "Completed"}"#),
        ])
        .await;

        let state = provider_for(addr)
            .get_job_status("job-1")
            .await
            .expect("status after honoring retry-after");
        assert_eq!(state.status, BatchJobStatus::Completed);
    }

    #[tokio::test]
    async fn rate_limits_exhaust_into_a_provider_error() {
        // Initial attempt plus MAX_RETRIES, all throttled.
        let addr = serve_canned(vec![rate_limited(); MAX_RETRIES + 1]).await;

        let err = provider_for(addr)
            .get_job_status("job-1")
            .await
            .expect_err("retries exhausted");
        assert!(matches!(err, AppError::Provider(_)));
    }

    #[tokio::test]
    async fn submission_retries_transient_server_errors() {
        let addr = serve_canned(vec![server_error(), ok_json(r#"{"jobId": "job-9"}"#)]).await;

        let job_id = provider_for(addr)
            .submit_job("batch/input/b.jsonl", "batch/output/b", "batch-b")
            .await
            .expect("submitted after retry");
        assert_eq!(job_id, "job-9");
    }

    #[tokio::test]
    async fn non_transient_statuses_are_not_retried() {
        // One connection only: a 403 must surface immediately.
        let addr = serve_canned(vec![
            "HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string(),
        ])
        .await;

        let err = provider_for(addr)
            .get_job_status("job-1")
            .await
            .expect_err("forbidden is terminal");
        assert!(matches!(err, AppError::Provider(_)));
    }

    #[test]
    fn status_payloads_deserialize_with_optional_message() {
        let with_message: JobStatusResponse =
            serde_json::from_str(r#"{"status": "Failed", "message": "model not found"}"#)
                .expect("parse");
        assert_eq!(with_message.status, "Failed");
        assert_eq!(with_message.message.as_deref(), Some("model not found"));

        let without: JobStatusResponse =
            serde_json::from_str(r#"{"status": "InProgress"}"#).expect("parse");
        assert!(without.message.is_none());
    }

    #[test]
    fn base_url_is_normalized() {
        let provider =
            RemoteBatchProvider::new("https://inference.example.com/", "key", "embed-v3")
                .expect("build provider");
        assert_eq!(provider.base_url, "https://inference.example.com");
        assert_eq!(provider.model_name(), "embed-v3");
        assert_eq!(provider.provider_id(), "remote_batch");
    }
}
