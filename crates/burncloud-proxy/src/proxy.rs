//! Axum HTTP front end.
//!
//! `/v1/vertex/{target}` (any method) goes through the [`ForwardingPipeline`];
//! `/health` answers locally. Everything else is a JSON 404.

use std::future::Future;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::{Json, Router};
use burncloud_std::fs::{OpenAppendFile, ReadFile, SystemFs};
use burncloud_std::time::GetElapsed;
use tokio::net::TcpListener;

use crate::audit::AuditSink;
use crate::config::ProxyConfig;
use crate::exchange::{GoogleTokenExchanger, TokenExchanger};
use crate::pipeline::{ForwardingPipeline, InboundRequest, ProxyResponse};
use crate::token::TokenProvider;
use crate::upstream::{ReqwestUpstream, Upstream};

pub const SERVICE_NAME: &str = "burncloud-gcp-proxy";

const VERTEX_PREFIX: &str = "/v1/vertex/";

/// Build the axum router for the proxy.
pub fn router<X, U, C>(pipeline: ForwardingPipeline<X, U, C>) -> Router
where
    X: TokenExchanger,
    U: Upstream,
    C: GetElapsed + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/v1/vertex/{*target}", any(forward::<X, U, C>))
        .fallback(not_found)
        .with_state(pipeline)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
    }))
}

async fn not_found() -> ProxyResponse {
    ProxyResponse::error(StatusCode::NOT_FOUND, "not found")
}

async fn forward<X, U, C>(
    State(pipeline): State<ForwardingPipeline<X, U, C>>,
    request: Request,
) -> ProxyResponse
where
    X: TokenExchanger,
    U: Upstream,
    C: GetElapsed + Send + Sync + 'static,
{
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    // Taken from the raw path so percent-encoding reaches upstream untouched.
    let target = path
        .strip_prefix(VERTEX_PREFIX)
        .unwrap_or_default()
        .to_string();

    pipeline
        .handle(InboundRequest {
            method: parts.method,
            path,
            target,
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        })
        .await
}

/// Wire production collaborators from `config`, listen on the configured
/// address and run until SIGINT/SIGTERM.
pub async fn serve(config: ProxyConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    run(config, &SystemFs, listener, shutdown_signal()).await
}

/// Same as [`serve`] over a caller-provided listener, filesystem and shutdown
/// trigger. Returns after in-flight requests complete and the audit queue
/// has been drained.
pub async fn run<F, S>(
    config: ProxyConfig,
    fs: &F,
    listener: TcpListener,
    shutdown: S,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: ReadFile + OpenAppendFile,
    S: Future<Output = ()> + Send + 'static,
{
    let http = reqwest::Client::builder().build()?;
    let exchanger = GoogleTokenExchanger::from_key_file(
        fs,
        &config.key_path,
        http.clone(),
        config.token_exchange_timeout,
    );
    let tokens = TokenProvider::new(exchanger, config.token_policy);
    let upstream = ReqwestUpstream::new(http, config.upstream_timeout);
    let (audit, audit_writer) =
        AuditSink::open(fs, &config.audit_log_path, config.audit_queue_capacity)?;

    let route = config.route();
    let client_keys = config.keys.len();
    let pipeline = ForwardingPipeline::new(config.keys, tokens, upstream, audit.clone(), route)
        .with_max_body_bytes(config.max_body_bytes);

    tracing::info!(
        addr = %listener.local_addr()?,
        project = %config.project_id,
        region = %config.region,
        upstream = %config.upstream_base_url,
        client_keys,
        "BurnCloud Vertex proxy listening"
    );

    let result = axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown)
        .await;

    tracing::info!(
        written = audit.written(),
        dropped = audit.dropped(),
        write_failures = audit.write_failures(),
        "Shutting down; draining audit log"
    );
    drop(audit);
    audit_writer.finished().await;

    result?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request};
    use burncloud_std::time::MockClock;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::audit::{AuditRecord, Outcome};
    use crate::keys::{ApiKeyRecord, KeyStore};
    use crate::mocks::{MockExchanger, MockUpstream};
    use crate::token::TokenPolicy;
    use crate::upstream::UpstreamRoute;

    fn app() -> (Router, MockExchanger, MockUpstream, mpsc::Receiver<AuditRecord>) {
        let keys = KeyStore::new([ApiKeyRecord::new("sk-client-veo-001", "VIP Client A")]).unwrap();
        let exchanger = MockExchanger::new();
        exchanger.push_token("tok-123", Duration::from_secs(3600));
        let upstream = MockUpstream::new();
        let tokens =
            TokenProvider::with_clock(exchanger.clone(), MockClock::new(), TokenPolicy::default());
        let (sink, audit) = AuditSink::capture(16);
        let route = UpstreamRoute::new("https://vertex.test", "burncloud-prod", "us-central1");
        let pipeline = ForwardingPipeline::new(keys, tokens, upstream.clone(), sink, route);
        (router(pipeline), exchanger, upstream, audit)
    }

    async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let (app, exchanger, _, mut audit) = app();

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, serde_json::json!({"status": "ok", "service": "burncloud-gcp-proxy"}));
        assert_eq!(exchanger.calls(), 0);
        assert!(audit.try_recv().is_err());
    }

    #[tokio::test]
    async fn vertex_path_is_forwarded_with_raw_target_and_query() {
        let (app, _, upstream, mut audit) = app();
        upstream.push_response(StatusCode::OK, "application/json", br#"{"predictions":[]}"#);

        let response = app
            .oneshot(
                Request::post("/v1/vertex/veo-001-preview:predict?alt=json")
                    .header(header::AUTHORIZATION, "Bearer sk-client-veo-001")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"instances":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(&body_bytes(response).await[..], br#"{"predictions":[]}"#);

        let sent = upstream.requests();
        assert_eq!(
            sent[0].url,
            "https://vertex.test/v1/projects/burncloud-prod/locations/us-central1/publishers/google/models/veo-001-preview:predict?alt=json"
        );
        assert_eq!(&sent[0].body[..], br#"{"instances":[]}"#);

        let record = audit.try_recv().unwrap();
        assert_eq!(record.path, "/v1/vertex/veo-001-preview:predict");
        assert_eq!(record.outcome, Outcome::Forwarded);
    }

    #[tokio::test]
    async fn any_method_is_accepted() {
        let (app, _, upstream, _audit) = app();

        let response = app
            .oneshot(
                Request::get("/v1/vertex/operations/123")
                    .header(header::AUTHORIZATION, "Bearer sk-client-veo-001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.requests()[0].method, axum::http::Method::GET);
        assert!(upstream.requests()[0].url.ends_with("/models/operations/123"));
    }

    #[tokio::test]
    async fn dot_segments_cannot_leave_the_project_route() {
        for uri in [
            "/v1/vertex/../../../../../../../../v1/projects/victim-project/locations/us-central1/publishers/google/models/m:predict",
            "/v1/vertex/%2e%2e/%2e%2e/%2e%2e/%2e%2e/%2e%2e/%2e%2e/%2e%2e/%2e%2e/v1/projects/victim-project/locations/us-central1/publishers/google/models/m:predict",
            "/v1/vertex/m:predict/..%2f..%2fadmin",
        ] {
            let (app, exchanger, upstream, mut audit) = app();

            let response = app
                .oneshot(
                    Request::post(uri)
                        .header(header::AUTHORIZATION, "Bearer sk-client-veo-001")
                        .body(Body::from("{}"))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body: serde_json::Value =
                serde_json::from_slice(&body_bytes(response).await).unwrap();
            assert_eq!(body["error"]["code"], 400);
            assert_eq!(exchanger.calls(), 0);
            assert_eq!(upstream.calls(), 0);
            let record = audit.try_recv().unwrap();
            assert_eq!(record.outcome, Outcome::BadRequest);
            assert_eq!(record.path, uri);
        }
    }

    #[tokio::test]
    async fn bad_key_gets_json_401() {
        let (app, exchanger, upstream, _audit) = app();

        let response = app
            .oneshot(
                Request::post("/v1/vertex/veo-001-preview:predict")
                    .header(header::AUTHORIZATION, "Bearer sk-bad")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"]["code"], 401);
        assert_eq!(exchanger.calls(), 0);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let (app, _, upstream, _audit) = app();

        let response = app
            .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"]["code"], 404);
        assert_eq!(upstream.calls(), 0);
    }
}
