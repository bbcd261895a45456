//! HTTP client used by every provider-backed probe

use crate::error::{AppError, Result};
use crate::logging::ProbeLogger;
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

const USER_AGENT: &str = concat!("network-master/", env!("CARGO_PKG_VERSION"));

/// HTTP fetcher abstraction so probes can run against fakes
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Execute a request; non-2xx statuses are returned, not raised
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// GET a JSON document. Non-2xx status and unparsable bodies are errors.
    async fn get_json(&self, url: &str, timeout: Duration) -> Result<serde_json::Value> {
        let response = self.execute(HttpRequest::get(url).with_timeout(timeout)).await?;
        response.error_for_status()?.json()
    }

    /// GET a text body, trimmed
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let response = self.execute(HttpRequest::get(url).with_timeout(timeout)).await?;
        Ok(response.error_for_status()?.text().trim().to_string())
    }
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new<S: Into<String>>(url: S, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
            timeout: crate::defaults::DEFAULT_HTTP_TIMEOUT,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get<S: Into<String>>(url: S) -> Self {
        Self::new(url, Method::GET)
    }

    pub fn post<S: Into<String>>(url: S, body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            ..Self::new(url, Method::POST)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Fully read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub final_url: String,
    pub body: Vec<u8>,
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Turn a non-2xx response into `AppError::HttpStatus`
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(AppError::http_status(self.status_code, self.final_url))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            AppError::parse(format!("Invalid JSON from {}: {}", self.final_url, e))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
    logger: Option<ProbeLogger>,
}

impl NetworkClient {
    /// Create a new network client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, logger: None })
    }

    /// Attach a logger for request tracing
    pub fn with_logger(mut self, logger: ProbeLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Underlying reqwest client, for streaming transfers
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn trace(&self, request: &HttpRequest, status: Option<u16>, elapsed: Duration) {
        if let Some(logger) = &self.logger {
            logger
                .http_request(
                    &request.url,
                    request.method.as_str(),
                    status,
                    elapsed.as_secs_f64() * 1000.0,
                )
                .await;
        }
    }
}

#[async_trait]
impl HttpFetcher for NetworkClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = Url::parse(&request.url)
            .map_err(|e| AppError::parse(format!("Invalid URL '{}': {}", request.url, e)))?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        // reqwest's own timeout covers the body read too
        let outcome = tokio::time::timeout(request.timeout, async {
            let response = builder.send().await?;
            let status_code = response.status().as_u16();
            let final_url = response.url().to_string();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status_code, final_url, body))
        })
        .await;

        let elapsed = start.elapsed();
        match outcome {
            Err(_) => {
                self.trace(&request, None, elapsed).await;
                Err(AppError::timeout(format!(
                    "{} {} exceeded {}ms",
                    request.method,
                    request.url,
                    request.timeout.as_millis()
                )))
            }
            Ok(Err(e)) => {
                self.trace(&request, None, elapsed).await;
                Err(AppError::from(e))
            }
            Ok(Ok((status_code, final_url, body))) => {
                self.trace(&request, Some(status_code), elapsed).await;
                Ok(HttpResponse {
                    status_code,
                    final_url,
                    body: body.to_vec(),
                    elapsed,
                })
            }
        }
    }
}

/// URL helpers
pub struct HttpUtils;

impl HttpUtils {
    /// Validate URL format
    pub fn validate_url(url: &str) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::validation(format!("Invalid URL format: {}", e)))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(AppError::validation(format!("Unsupported URL scheme: {}", scheme))),
        }

        if parsed.host().is_none() {
            return Err(AppError::validation("URL must have a host"));
        }

        Ok(())
    }

    /// Host part of a URL
    pub fn extract_host(url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| AppError::parse(format!("Invalid URL: {}", e)))?;

        parsed
            .host_str()
            .ok_or_else(|| AppError::validation("URL must have a host"))
            .map(|s| s.to_string())
    }

    /// Replace the last path segment of `url`, e.g. `upload.php` -> `latency.txt`
    pub fn sibling_url(url: &str, file_name: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| AppError::parse(format!("Invalid URL: {}", e)))?;
        parsed
            .join(file_name)
            .map(|u| u.to_string())
            .map_err(|e| AppError::parse(format!("Cannot derive {} from {}: {}", file_name, url, e)))
    }
}
