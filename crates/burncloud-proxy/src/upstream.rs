//! Transport to the inference API and the URL layout it expects.

use std::future::Future;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method, StatusCode};
use bytes::Bytes;

use crate::token::BearerToken;

/// One forwarded call. `body` is relayed exactly as received.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub token: BearerToken,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// What came back, exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// The call never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream connection failed: {0}")]
    Connect(String),
    #[error("upstream request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// 504 for timeouts, 502 for everything else.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Connect(_) | Self::Other(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Sends a request to the inference API. No retries: generation requests
/// are not idempotent.
pub trait Upstream: Send + Sync + 'static {
    fn call(
        &self,
        request: UpstreamRequest,
    ) -> impl Future<Output = Result<UpstreamResponse, TransportError>> + Send;
}

/// [`Upstream`] over a pooled `reqwest` client.
#[derive(Clone)]
pub struct ReqwestUpstream {
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestUpstream {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

impl Upstream for ReqwestUpstream {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .timeout(self.timeout)
            .bearer_auth(request.token.as_str());

        if let Some(content_type) = request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// Maps a client target such as `veo-001-preview:predict` onto the Vertex AI
/// publisher-model URL for the configured project and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRoute {
    base_url: String,
    project_id: String,
    region: String,
}

impl UpstreamRoute {
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            region: region.into(),
        }
    }

    /// `https://{region}-aiplatform.googleapis.com`
    pub fn default_base_url(region: &str) -> String {
        format!("https://{region}-aiplatform.googleapis.com")
    }

    /// Full upstream URL for `target`, keeping the client's query string.
    /// Fails if `target` would resolve outside the publisher-model prefix.
    pub fn url(&self, target: &str, query: Option<&str>) -> Result<String, TargetError> {
        check_target(target)?;
        let mut url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}",
            self.base_url, self.project_id, self.region, target
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        Ok(url)
    }
}

/// Why a client target cannot be mapped below the model route.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("model target is empty")]
    Empty,
    #[error("model target has an empty, `.` or `..` segment")]
    DotSegment,
    #[error("model target contains a backslash or an encoded slash")]
    Separator,
    #[error("model target is not valid UTF-8 once decoded")]
    Encoding,
}

/// Every `/`-separated segment of `target`, percent-decoded, must be a plain
/// name: not empty, not `.` or `..`, and free of `/` and `\`.
pub fn check_target(target: &str) -> Result<(), TargetError> {
    if target.is_empty() {
        return Err(TargetError::Empty);
    }
    for raw in target.split('/') {
        let segment = urlencoding::decode(raw).map_err(|_| TargetError::Encoding)?;
        if segment.contains(['/', '\\']) {
            return Err(TargetError::Separator);
        }
        if matches!(&*segment, "" | "." | "..") {
            return Err(TargetError::DotSegment);
        }
    }
    Ok(())
}
