//! HTTP client shared by the remote storage providers

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::log::Log;
use crate::domain::{DomainError, RetryPolicy, StorageAccount, StorageService};

use super::auth::SharedKeySigner;
use super::xml;

/// REST API version sent with every request
pub const STORAGE_API_VERSION: &str = "2019-12-12";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// A request against one storage service
#[derive(Debug, Clone)]
pub(crate) struct StorageRequest {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    content_type: Option<&'static str>,
    body: Option<Bytes>,
}

impl StorageRequest {
    pub(crate) fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            content_type: None,
            body: None,
        }
    }

    pub(crate) fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type);
        self.body = Some(body.into());
        self
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }
}

/// A buffered response
#[derive(Debug)]
pub(crate) struct StorageResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl StorageResponse {
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub(crate) fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn text(&self) -> Result<&str, DomainError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| DomainError::storage(format!("Response body is not UTF-8: {}", e)))
    }

    pub(crate) fn json<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| DomainError::storage(format!("Failed to parse response: {}", e)))
    }

    /// Service error code, from the header or the XML error body
    pub(crate) fn error_code(&self) -> Option<String> {
        if let Some(code) = self.header("x-ms-error-code") {
            return Some(code.to_string());
        }

        std::str::from_utf8(&self.body)
            .ok()
            .and_then(|text| xml::first(&xml::CODE, text))
    }

    /// Converts an unexpected response into an error
    pub(crate) fn into_error(self, operation: &str) -> DomainError {
        let code = self.error_code().unwrap_or_else(|| "Unknown".to_string());
        let message = format!("{} failed with HTTP {} ({})", operation, self.status.as_u16(), code);

        match self.status {
            StatusCode::NOT_FOUND => DomainError::not_found(message),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => DomainError::conflict(message),
            _ => DomainError::storage(message),
        }
    }
}

/// Signed, retrying client bound to one service of an account
#[derive(Debug, Clone)]
pub(crate) struct StorageClient {
    http: reqwest::Client,
    signer: SharedKeySigner,
    endpoint: Url,
    service: StorageService,
    retry: RetryPolicy,
    log: Option<Arc<dyn Log>>,
}

impl StorageClient {
    pub(crate) fn new(
        account: &StorageAccount,
        service: StorageService,
        retry: RetryPolicy,
        log: Option<Arc<dyn Log>>,
    ) -> Result<Self, DomainError> {
        let endpoint = account.endpoint(service);
        if endpoint.query().is_some() || endpoint.fragment().is_some() {
            return Err(DomainError::construction(format!(
                "The {} endpoint '{}' must not carry a query or fragment",
                service, endpoint
            )));
        }

        let http = reqwest::Client::builder()
            .tcp_nodelay(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                DomainError::construction(format!("Failed to build {} client: {}", service, e))
            })?;

        Ok(Self {
            http,
            signer: SharedKeySigner::new(account),
            endpoint: endpoint.clone(),
            service,
            retry,
            log,
        })
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn log(&self) -> Option<&dyn Log> {
        self.log.as_deref()
    }

    /// Resource URL below the service endpoint
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, DomainError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DomainError::configuration(format!("Endpoint '{}' cannot be a base URL", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request, retrying transient failures
    ///
    /// Non-transient responses are returned as-is so callers can map the
    /// status to their own outcome.
    pub(crate) async fn execute(&self, request: StorageRequest) -> Result<StorageResponse, DomainError> {
        let mut attempt = 0;

        loop {
            let prepared = self.prepare(&request)?;
            let reason = match Self::send(prepared).await {
                Ok(response) if !is_transient_status(response.status) => return Ok(response),
                Ok(response) => {
                    if !self.retry.should_retry(attempt) {
                        return Ok(response);
                    }
                    format!("HTTP {}", response.status.as_u16())
                }
                Err(e) => {
                    if !is_transient_error(&e) || !self.retry.should_retry(attempt) {
                        return Err(DomainError::storage(format!(
                            "{} {} failed: {}",
                            request.method,
                            request.url.path(),
                            e
                        )));
                    }
                    e.to_string()
                }
            };

            let delay = self.retry.delay_for_attempt(attempt);
            let message = format!(
                "Retrying {} {} after {} (retry {} of {}) in {:?}",
                request.method,
                request.url.path(),
                reason,
                attempt + 1,
                self.retry.max_retries(),
                delay
            );
            warn!(service = %self.service, "{}", message);
            if let Some(log) = &self.log {
                log.warn(&message);
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Builds the signed request for one attempt
    fn prepare(&self, request: &StorageRequest) -> Result<reqwest::RequestBuilder, DomainError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut headers = request.headers.clone();
        headers.push(("x-ms-date".to_string(), date));
        headers.push(("x-ms-version".to_string(), STORAGE_API_VERSION.to_string()));

        let content_type = request.content_type.unwrap_or_default();
        let authorization = self.signer.authorization(
            self.service,
            &request.method,
            &request.url,
            content_type,
            &headers,
        )?;

        let mut builder = self.http.request(request.method.clone(), request.url.clone());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = builder.header("Authorization", authorization);
        if let Some(content_type) = request.content_type {
            builder = builder.header("Content-Type", content_type);
        }

        let body = match (&request.body, &request.method) {
            (Some(body), _) => Some(body.clone()),
            (None, &Method::PUT) | (None, &Method::POST) => Some(Bytes::new()),
            _ => None,
        };
        if let Some(body) = body {
            builder = builder.body(body);
        }

        debug!(
            service = %self.service,
            method = %request.method,
            path = request.url.path(),
            "Sending storage request"
        );

        Ok(builder)
    }

    async fn send(builder: reqwest::RequestBuilder) -> Result<StorageResponse, reqwest::Error> {
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(StorageResponse {
            status,
            headers,
            body,
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_body() || error.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LogLevel;
    use crate::infrastructure::logging::MemoryLog;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "c2VjcmV0LWtleQ==";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 0.0)
    }

    fn client(server: &MockServer, log: Option<Arc<dyn Log>>) -> StorageClient {
        let account = StorageAccount::new("testaccount", KEY)
            .unwrap()
            .with_endpoint(&server.uri())
            .unwrap();
        StorageClient::new(&account, StorageService::Blob, fast_retry(), log).unwrap()
    }

    #[tokio::test]
    async fn test_url_appends_segments() {
        let server = MockServer::start().await;
        let client = client(&server, None);

        let url = client.url(&["docs", "reports", "a b.json"]).unwrap();
        assert_eq!(url.path(), "/docs/reports/a%20b.json");
    }

    #[tokio::test]
    async fn test_url_keeps_account_path() {
        let account = StorageAccount::development();
        let client =
            StorageClient::new(&account, StorageService::Queue, fast_retry(), None).unwrap();

        let url = client.url(&["jobs", "messages"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:10001/devstoreaccount1/jobs/messages");
    }

    #[tokio::test]
    async fn test_requests_are_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs"))
            .and(header_exists("authorization"))
            .and(header_exists("x-ms-date"))
            .and(header_exists("x-ms-version"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, None);
        let url = client.url(&["docs"]).unwrap();
        let response = client.execute(StorageRequest::new(Method::GET, url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_retries_transient_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let log = Arc::new(MemoryLog::new());
        let client = client(&server, Some(log.clone()));
        let url = client.url(&["docs"]).unwrap();
        let response = client.execute(StorageRequest::new(Method::GET, url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().unwrap(), "ok");
        assert_eq!(log.count(LogLevel::Warn), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server, None);
        let url = client.url(&["docs"]).unwrap();
        let response = client.execute(StorageRequest::new(Method::GET, url)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(response.into_error("Get"), DomainError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).insert_header("x-ms-error-code", "BlobNotFound"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, None);
        let url = client.url(&["docs", "missing"]).unwrap();
        let response = client.execute(StorageRequest::new(Method::GET, url)).await.unwrap();

        assert_eq!(response.error_code().as_deref(), Some("BlobNotFound"));
        assert!(response.into_error("Get blob").is_not_found());
    }

    #[test]
    fn test_rejects_endpoint_with_query() {
        let account = StorageAccount::new("testaccount", "c2VjcmV0LWtleQ==")
            .unwrap()
            .with_queue_endpoint("https://queues.example.com/?sv=2019")
            .unwrap();

        let result = StorageClient::new(&account, StorageService::Queue, RetryPolicy::no_retry(), None);
        assert!(matches!(result, Err(DomainError::Construction { .. })));

        assert!(
            StorageClient::new(&account, StorageService::Blob, RetryPolicy::no_retry(), None).is_ok()
        );
    }

    #[test]
    fn test_error_code_from_xml_body() {
        let response = StorageResponse {
            status: StatusCode::CONFLICT,
            headers: HeaderMap::new(),
            body: Bytes::from_static(
                b"<?xml version=\"1.0\"?><Error><Code>ContainerAlreadyExists</Code></Error>",
            ),
        };

        assert_eq!(response.error_code().as_deref(), Some("ContainerAlreadyExists"));
        assert!(response.into_error("Create container").is_conflict());
    }
}
