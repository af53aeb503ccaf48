//! HTTP transport for the collector and configure endpoints
//!
//! The worker talks to the network only through [`Transport`], so tests can
//! script responses without a server.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT as USER_AGENT_HEADER};

use crate::config::DispatchConfig;
use crate::error::{Error, Result};

/// Fixed marker sent as `User-Agent` on every request
pub const USER_AGENT: &str = "tally-dispatch";

/// Header asking the collector to validate without persisting
pub const DRY_RUN_HEADER: &str = "Dry-Run";

/// One batch upload to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorRequest {
    /// Encoded batch (`codec::encode` output)
    pub data_list: String,
    /// Send `Dry-Run: true`
    pub dry_run: bool,
}

impl CollectorRequest {
    /// `application/x-www-form-urlencoded` body
    pub fn form_body(&self) -> String {
        format!("data_list={}&gzip=1", urlencoding::encode(&self.data_list))
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    /// The collector protocol only treats 200 as success
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Network seam used by the dispatch worker.
///
/// Implementations return `Err(Error::Connect)` only for transport failures;
/// any completed exchange, whatever its status, is an `Ok(HttpReply)`.
pub trait Transport: Send + Sync + 'static {
    /// POST a batch to the collector
    fn post_batch(
        &self,
        url: &str,
        request: &CollectorRequest,
    ) -> impl Future<Output = Result<HttpReply>> + Send;

    /// GET a document
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpReply>> + Send;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport from configuration
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT_HEADER, HeaderValue::from_static(USER_AGENT));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    async fn finish(response: reqwest::Response) -> Result<HttpReply> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Connect(format!("failed to read response body: {}", e)))?;
        Ok(HttpReply { status, body })
    }
}

impl Transport for ReqwestTransport {
    async fn post_batch(&self, url: &str, request: &CollectorRequest) -> Result<HttpReply> {
        let mut builder = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.form_body());
        if request.dry_run {
            builder = builder.header(DRY_RUN_HEADER, "true");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Connect(format!("HTTP request failed: {}", e)))?;
        Self::finish(response).await
    }

    async fn get(&self, url: &str) -> Result<HttpReply> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Connect(format!("HTTP request failed: {}", e)))?;
        Self::finish(response).await
    }
}
