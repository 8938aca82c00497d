//! Executes one HTTP call per timer fire and classifies the outcome.
//!
//! The run record is written in two steps: a RUNNING marker before the
//! network call, and a finalize (plus the single attempt) after it. No
//! failure of any kind escapes [`Execute::execute`]; network errors
//! become classified runs and storage errors are logged and swallowed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{error, info};

use crate::config::HttpClientConfig;
use crate::model::{HttpMethod, Run, RunStatus, Schedule, Target};
use crate::storage::{NewRun, Pool, RunOutcome, RunStore};

/// Response bodies are kept only up to this many bytes.
const RESPONSE_SNIPPET_MAX: usize = 10_000;

/// Performs one call against a target and records the outcome. The
/// engine only ever sees a normal return.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, schedule: &Schedule, target: &Target) -> Run;
}

/// Production executor over a shared reqwest client.
pub struct HttpExecutor {
    client: Client,
    runs: RunStore,
}

impl HttpExecutor {
    pub fn new(pool: Pool, http: &HttpClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_seconds))
            .connect_timeout(Duration::from_secs(http.connect_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            runs: RunStore::new(pool),
        })
    }

    async fn send_request(&self, target: &Target) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.request(to_reqwest(target.method), &target.url);
        for (name, value) in &target.headers {
            request = request.header(name, value);
        }
        if target.method.allows_body() {
            if let Some(template) = &target.body_template {
                // A template that parses as JSON goes out as JSON, the
                // rest as plain text.
                request = match serde_json::from_str::<serde_json::Value>(template) {
                    Ok(json) => request.json(&json),
                    Err(_) => request.body(template.clone()),
                };
            }
        }
        request.send().await
    }
}

#[async_trait]
impl Execute for HttpExecutor {
    async fn execute(&self, schedule: &Schedule, target: &Target) -> Run {
        let started_at = Utc::now();
        let run_id = match self.runs.begin(&NewRun {
            schedule_id: schedule.id,
            started_at,
            request_url: target.url.clone(),
            request_method: target.method,
        }) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(schedule = %schedule.name, "failed to insert run marker: {:#}", e);
                None
            }
        };

        let start = Instant::now();
        let call = self.send_request(target).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let finished_at = Utc::now();

        let outcome = match call {
            Ok(response) => {
                let code = response.status().as_u16();
                match response.bytes().await {
                    Ok(bytes) => {
                        let (status, error_type, error_message) = classify_status(code);
                        RunOutcome {
                            status,
                            finished_at,
                            latency_ms,
                            http_status: Some(code),
                            response_size_bytes: Some(bytes.len() as u64),
                            response_snippet: Some(snippet_from(&bytes)),
                            error_type,
                            error_message,
                        }
                    }
                    Err(err) => {
                        // Headers arrived but the body read failed.
                        let (status, error_type, error_message) = classify_error(&err);
                        RunOutcome {
                            status,
                            finished_at: Utc::now(),
                            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                            http_status: Some(code),
                            response_size_bytes: None,
                            response_snippet: None,
                            error_type: Some(error_type.to_string()),
                            error_message: Some(error_message),
                        }
                    }
                }
            }
            Err(err) => {
                let (status, error_type, error_message) = classify_error(&err);
                RunOutcome {
                    status,
                    finished_at,
                    latency_ms,
                    http_status: None,
                    response_size_bytes: None,
                    response_snippet: None,
                    error_type: Some(error_type.to_string()),
                    error_message: Some(error_message),
                }
            }
        };

        if let Some(run_id) = run_id {
            if let Err(e) = self.runs.finalize(run_id, &outcome) {
                error!(
                    schedule = %schedule.name,
                    run = run_id,
                    "failed to finalize run: {:#}",
                    e
                );
            }
        }

        info!(
            schedule = %schedule.name,
            status = %outcome.status,
            latency_ms = outcome.latency_ms,
            http_status = outcome.http_status,
            "request finished"
        );

        Run {
            id: run_id.unwrap_or(0),
            schedule_id: schedule.id,
            status: outcome.status,
            started_at,
            finished_at: Some(outcome.finished_at),
            latency_ms: Some(outcome.latency_ms),
            http_status: outcome.http_status,
            response_size_bytes: outcome.response_size_bytes,
            response_snippet: outcome.response_snippet,
            error_type: outcome.error_type,
            error_message: outcome.error_message,
            request_url: target.url.clone(),
            request_method: target.method,
        }
    }
}

fn to_reqwest(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

/// Map a received status code onto (run status, error_type, message).
fn classify_status(code: u16) -> (RunStatus, Option<String>, Option<String>) {
    match code {
        200..=299 => (RunStatus::Success, None, None),
        400..=499 => (
            RunStatus::Failed,
            Some("http_4xx".into()),
            Some(format!("client error: {code}")),
        ),
        500..=599 => (
            RunStatus::Failed,
            Some("http_5xx".into()),
            Some(format!("server error: {code}")),
        ),
        _ => (
            RunStatus::Failed,
            Some("http_unexpected".into()),
            Some(format!("unexpected status: {code}")),
        ),
    }
}

/// Map a transport error onto (run status, error_type, message). Total:
/// anything unrecognized lands on FAILED/unknown.
fn classify_error(err: &reqwest::Error) -> (RunStatus, &'static str, String) {
    let detail = error_chain(err);
    if err.is_timeout() {
        return (RunStatus::Timeout, "timeout", detail);
    }
    if err.is_connect() {
        let lower = detail.to_ascii_lowercase();
        if lower.contains("dns error")
            || lower.contains("lookup address")
            || lower.contains("name or service not known")
            || lower.contains("failed to resolve")
        {
            return (RunStatus::DnsError, "dns", detail);
        }
        return (RunStatus::ConnectionError, "connection", detail);
    }
    (RunStatus::Failed, "unknown", detail)
}

/// Flatten the source chain; reqwest's top-level Display often hides the
/// underlying io error.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn snippet_from(bytes: &[u8]) -> String {
    let end = bytes.len().min(RESPONSE_SNIPPET_MAX);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_covers_every_range() {
        assert_eq!(classify_status(200).0, RunStatus::Success);
        assert_eq!(classify_status(204).0, RunStatus::Success);
        assert_eq!(classify_status(299).0, RunStatus::Success);

        let (status, error_type, message) = classify_status(404);
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(error_type.as_deref(), Some("http_4xx"));
        assert_eq!(message.as_deref(), Some("client error: 404"));

        let (status, error_type, _) = classify_status(503);
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(error_type.as_deref(), Some("http_5xx"));

        let (status, error_type, _) = classify_status(302);
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(error_type.as_deref(), Some("http_unexpected"));
    }

    #[test]
    fn snippet_caps_at_limit() {
        let big = vec![b'x'; RESPONSE_SNIPPET_MAX + 500];
        let snippet = snippet_from(&big);
        assert_eq!(snippet.len(), RESPONSE_SNIPPET_MAX);

        let small = b"hello";
        assert_eq!(snippet_from(small), "hello");
    }

    #[test]
    fn snippet_survives_a_multibyte_cut() {
        // Fill right up to the limit, then place a 4-byte character
        // across it.
        let mut body = vec![b'a'; RESPONSE_SNIPPET_MAX - 2];
        body.extend_from_slice("🚀".as_bytes());
        let snippet = snippet_from(&body);
        assert!(snippet.starts_with('a'));
        assert!(snippet.ends_with('\u{FFFD}'), "partial char becomes a replacement");
    }
}
