//! HTTP probe executor

use crate::config::ServiceDefinition;
use crate::errors::{MonitorError, Result};
use crate::records::{Outcome, ProbeOutcome};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Runs one probe against one service.
///
/// Implementations are total: every failure is reported as an
/// [`Outcome::TransportFailure`], never as an error or a panic.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn execute(&self, service: &ServiceDefinition) -> ProbeOutcome;
}

/// Probe executor backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpProbeExecutor {
    client: Client,
    timeout: Duration,
}

impl HttpProbeExecutor {
    pub fn new(probe_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(probe_timeout)
            .user_agent(format!("statter/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self {
            client,
            timeout: probe_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the request and return the response status
    async fn request(&self, service: &ServiceDefinition) -> std::result::Result<u16, String> {
        let method = Method::from_bytes(service.effective_method().as_bytes())
            .map_err(|_| format!("invalid method {:?}", service.method))?;
        let headers = build_headers(service)?;

        let mut request = self.client.request(method, &service.url).headers(headers);
        if !service.body.is_empty() {
            request = request.body(service.body.clone());
        }

        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| self.timeout_message())?
            .map_err(|e| self.describe_error(&e))?;

        let status = response.status().as_u16();

        // Drain the body so the connection can be reused; its content is not needed.
        let _ = timeout(self.timeout, response.bytes()).await;

        Ok(status)
    }

    fn timeout_message(&self) -> String {
        format!("request timed out after {}ms", self.timeout.as_millis())
    }

    fn describe_error(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            return self.timeout_message();
        }

        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[async_trait]
impl ProbeExecutor for HttpProbeExecutor {
    async fn execute(&self, service: &ServiceDefinition) -> ProbeOutcome {
        let start_time = Instant::now();

        let outcome = match self.request(service).await {
            Ok(status_code) => Outcome::response(status_code),
            Err(message) => Outcome::transport_failure(message),
        };

        let latency_ms = start_time.elapsed().as_millis() as u64;
        debug!(
            "Probe {} {} finished in {}ms: {}",
            service.name, service.url, latency_ms, outcome
        );

        ProbeOutcome::new(service, outcome, latency_ms)
    }
}

/// Headers in declaration order; a repeated name replaces the earlier value
fn build_headers(service: &ServiceDefinition) -> std::result::Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    for header in &service.headers {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| format!("invalid header name {:?}", header.name))?;
        let value = HeaderValue::from_str(&header.value)
            .map_err(|_| format!("invalid value for header {}", header.name))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor(timeout_ms: u64) -> HttpProbeExecutor {
        HttpProbeExecutor::new(Duration::from_millis(timeout_ms)).unwrap()
    }

    #[test]
    fn test_executor_creation() {
        let executor = HttpProbeExecutor::new(Duration::from_secs(5));
        assert!(executor.is_ok());
        assert_eq!(executor.unwrap().timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_later_header_wins() {
        let service = ServiceDefinition::new("a", "http://a/")
            .with_header("X-Token", "first")
            .with_header("Accept", "text/plain")
            .with_header("x-token", "second");

        let headers = build_headers(&service).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-token").unwrap(), "second");
    }

    #[tokio::test]
    async fn test_successful_probe() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&mock_server)
            .await;

        let service = ServiceDefinition::new("ping", format!("{}/ping", mock_server.uri()));
        let result = executor(1000).execute(&service).await;

        assert_eq!(result.service, "ping");
        assert_eq!(result.url, service.url);
        assert_eq!(result.outcome, Outcome::response(200));
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let service = ServiceDefinition::new("down", mock_server.uri());
        let result = executor(1000).execute(&service).await;

        assert_eq!(result.outcome, Outcome::response(503));
        assert!(result.outcome.is_failure());
    }

    #[tokio::test]
    async fn test_method_body_and_headers_are_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(header("content-type", "application/json"))
            .and(header("x-token", "second"))
            .and(body_string(r#"{"user":"probe"}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let service = ServiceDefinition::new("login", format!("{}/login", mock_server.uri()))
            .with_method("post")
            .with_body(r#"{"user":"probe"}"#)
            .with_header("Content-Type", "application/json")
            .with_header("X-Token", "first")
            .with_header("X-Token", "second");

        let result = executor(1000).execute(&service).await;
        assert_eq!(result.outcome, Outcome::response(201));
    }

    #[tokio::test]
    async fn test_timeout_is_a_transport_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let service = ServiceDefinition::new("slow", mock_server.uri());
        let result = executor(200).execute(&service).await;

        assert_eq!(result.outcome.status_code(), 0);
        assert_eq!(result.outcome.error(), Some("request timed out after 200ms"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let service = ServiceDefinition::new("gone", format!("http://{}/", address));
        let result = executor(1000).execute(&service).await;

        assert_eq!(result.outcome.status_code(), 0);
        assert!(!result.outcome.error().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_definition_is_a_transport_failure() {
        let bad_method = ServiceDefinition::new("a", "http://127.0.0.1/").with_method("GE T");
        let result = executor(100).execute(&bad_method).await;
        assert!(result.outcome.error().unwrap().contains("invalid method"));

        let bad_header =
            ServiceDefinition::new("b", "http://127.0.0.1/").with_header("bad header", "x");
        let result = executor(100).execute(&bad_header).await;
        assert!(result.outcome.error().unwrap().contains("invalid header name"));

        let bad_url = ServiceDefinition::new("c", "not a url");
        let result = executor(100).execute(&bad_url).await;
        assert_eq!(result.outcome.status_code(), 0);
    }
}
