//! Per-request forwarding: key check, token, upstream call, relay, audit.
//!
//! Stages short-circuit on the first failure. Whatever happens, each call to
//! [`ForwardingPipeline::handle`] produces exactly one audit record, including
//! when the request future is dropped half-way because the client went away.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use burncloud_std::time::{GetElapsed, GetNow, SystemClock};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, Outcome};
use crate::exchange::TokenExchanger;
use crate::keys::{mask, KeyError, KeyStore};
use crate::token::TokenProvider;
use crate::upstream::{TransportError, Upstream, UpstreamRequest, UpstreamRoute};

pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// An inbound call, already split by the router.
pub struct InboundRequest {
    pub method: Method,
    /// Path as the client sent it, used for auditing.
    pub path: String,
    /// Model target relayed to the upstream route, e.g. `veo-001-preview:predict`.
    pub target: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
}

/// What the pipeline answers with. Upstream responses are carried through
/// untouched; proxy-generated errors use a small JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl ProxyResponse {
    /// `{"error":{"code":<status>,"message":"..."}}`
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });
        Self {
            status,
            content_type: Some(HeaderValue::from_static("application/json")),
            body: Bytes::from(body.to_string()),
        }
    }
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        match self.content_type {
            Some(content_type) => {
                response.headers_mut().insert(header::CONTENT_TYPE, content_type);
            }
            None => {
                response.headers_mut().remove(header::CONTENT_TYPE);
            }
        }
        response
    }
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Read(String),
}

/// Key validation, token acquisition and forwarding for one request at a
/// time. Cheap to clone; clones share every collaborator.
pub struct ForwardingPipeline<X, U, C = SystemClock>
where
    C: GetNow,
{
    keys: Arc<KeyStore>,
    tokens: TokenProvider<X, C>,
    upstream: Arc<U>,
    audit: AuditSink,
    route: Arc<UpstreamRoute>,
    max_body_bytes: usize,
}

impl<X, U, C: GetNow> Clone for ForwardingPipeline<X, U, C> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            tokens: self.tokens.clone(),
            upstream: Arc::clone(&self.upstream),
            audit: self.audit.clone(),
            route: Arc::clone(&self.route),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl<X, U, C> ForwardingPipeline<X, U, C>
where
    X: TokenExchanger,
    U: Upstream,
    C: GetElapsed + Send + Sync + 'static,
{
    pub fn new(
        keys: KeyStore,
        tokens: TokenProvider<X, C>,
        upstream: U,
        audit: AuditSink,
        route: UpstreamRoute,
    ) -> Self {
        Self {
            keys: Arc::new(keys),
            tokens,
            upstream: Arc::new(upstream),
            audit,
            route: Arc::new(route),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    #[instrument(
        name = "proxy.request",
        skip_all,
        fields(
            method = %request.method,
            path = %request.path,
            request_id = tracing::field::Empty,
            client = tracing::field::Empty,
            upstream_status = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, request: InboundRequest) -> ProxyResponse {
        let InboundRequest {
            method,
            path,
            target,
            query,
            headers,
            body,
        } = request;

        let mut ctx = RequestContext::new(self.audit.clone(), self.tokens.clock(), &method, path);
        let span = Span::current();
        span.record("request_id", tracing::field::display(ctx.request_id));

        let presented = bearer_key(&headers);
        match self.keys.validate(presented.unwrap_or_default()) {
            Ok(record) => {
                span.record("client", record.label.as_str());
                ctx.client_label = Some(record.label.clone());
            }
            Err(KeyError::Unauthorized) => {
                tracing::warn!(
                    key = %presented.map(mask).unwrap_or_else(|| "<none>".to_string()),
                    "Rejected request with invalid API key"
                );
                return ctx.finish(
                    Outcome::Unauthorized,
                    None,
                    ProxyResponse::error(StatusCode::UNAUTHORIZED, "invalid API key"),
                );
            }
            Err(KeyError::Inactive { label }) => {
                tracing::warn!(client = %label, "Rejected request with inactive API key");
                ctx.client_label = Some(label);
                return ctx.finish(
                    Outcome::Forbidden,
                    None,
                    ProxyResponse::error(StatusCode::FORBIDDEN, "API key is inactive"),
                );
            }
        }

        let url = match self.route.url(&target, query.as_deref()) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(
                    model_target = %target,
                    error = %e,
                    "Rejected request with invalid model target"
                );
                return ctx.finish(
                    Outcome::BadRequest,
                    None,
                    ProxyResponse::error(StatusCode::BAD_REQUEST, "invalid model target"),
                );
            }
        };

        let body = match read_body(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(BodyError::TooLarge) => {
                tracing::warn!(limit = self.max_body_bytes, "Request body too large");
                return ctx.finish(
                    Outcome::BadRequest,
                    None,
                    ProxyResponse::error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"),
                );
            }
            Err(BodyError::Read(e)) => {
                tracing::warn!(error = %e, "Failed to read request body");
                return ctx.finish(
                    Outcome::BadRequest,
                    None,
                    ProxyResponse::error(StatusCode::BAD_REQUEST, "failed to read request body"),
                );
            }
        };

        let token = match self.tokens.get_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "No upstream access token available");
                return ctx.finish(
                    Outcome::CredentialError,
                    None,
                    ProxyResponse::error(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "upstream credentials unavailable",
                    ),
                );
            }
        };

        let upstream_request = UpstreamRequest {
            method,
            url,
            token,
            content_type: headers.get(header::CONTENT_TYPE).cloned(),
            body,
        };

        match self.upstream.call(upstream_request).await {
            Ok(response) => {
                span.record("upstream_status", response.status.as_u16());
                tracing::info!(status = response.status.as_u16(), "Forwarded request");
                ctx.finish(
                    Outcome::Forwarded,
                    Some(response.status.as_u16()),
                    ProxyResponse {
                        status: response.status,
                        content_type: response.content_type,
                        body: response.body,
                    },
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "Upstream call failed");
                let message = match e {
                    TransportError::Timeout => "upstream timed out",
                    TransportError::Connect(_) | TransportError::Other(_) => "upstream unreachable",
                };
                ctx.finish(
                    Outcome::UpstreamUnreachable,
                    None,
                    ProxyResponse::error(e.status(), message),
                )
            }
        }
    }
}

/// Client key from `Authorization: Bearer <key>`. The scheme is matched
/// case-insensitively.
fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, key) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| key.trim())
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BodyError::Read(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Audit bookkeeping for one request. Emits `client_cancelled` on drop if
/// the request never reached [`finish`](Self::finish). Latency is measured
/// on the pipeline's clock.
struct RequestContext<'a, C: GetElapsed> {
    audit: AuditSink,
    clock: &'a C,
    request_id: Uuid,
    timestamp: DateTime<Utc>,
    started: C::Instant,
    method: String,
    path: String,
    client_label: Option<String>,
    finished: bool,
}

impl<'a, C: GetElapsed> RequestContext<'a, C> {
    fn new(audit: AuditSink, clock: &'a C, method: &Method, path: String) -> Self {
        Self {
            audit,
            clock,
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            started: clock.now(),
            method: method.to_string(),
            path,
            client_label: None,
            finished: false,
        }
    }

    fn finish(
        &mut self,
        outcome: Outcome,
        upstream_status: Option<u16>,
        response: ProxyResponse,
    ) -> ProxyResponse {
        self.emit(outcome, upstream_status);
        response
    }

    fn emit(&mut self, outcome: Outcome, upstream_status: Option<u16>) {
        self.finished = true;
        self.audit.record(AuditRecord {
            timestamp: self.timestamp,
            request_id: self.request_id,
            client_label: self.client_label.take(),
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            upstream_status,
            latency_ms: u64::try_from(self.clock.elapsed(self.started).as_millis())
                .unwrap_or(u64::MAX),
            outcome,
        });
    }
}

impl<C: GetElapsed> Drop for RequestContext<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(request_id = %self.request_id, "Client disconnected before response");
            self.emit(Outcome::ClientCancelled, None);
        }
    }
}
