//! # burncloud-proxy
//!
//! Credential-translating reverse proxy for Vertex AI.
//!
//! Clients authenticate with a proxy-issued API key. The proxy swaps it for a
//! short-lived Google access token minted from a service-account key, relays
//! the request body to Vertex AI untouched, relays the answer back untouched,
//! and appends one audit line per request.
//!
//! ## How it works
//!
//! ```text
//! client ──Bearer sk-…──► router ──► ForwardingPipeline::handle
//!                                        │
//!                     KeyStore::validate ┤  401 / 403 ─┐
//!                          read body     ┤  413 / 400 ─┤
//!              TokenProvider::get_token  ┤  503 ───────┤
//!          (single-flight refresh via    │             │
//!           TokenExchanger, RS256 JWT)   │             │
//!                    Upstream::call      ┤  502 / 504 ─┤
//!                                        ▼             ▼
//!                             relay status + body   AuditSink::record
//!                                                   (bounded queue → writer)
//! ```
//!
//! `/v1/vertex/{target}` maps to
//! `{base}/v1/projects/{project}/locations/{region}/publishers/google/models/{target}`,
//! keeping the query string.
//!
//! ## Configuration (env vars)
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GCP_KEY_PATH` | `vertex_creds.json` | Service-account key file |
//! | `GCP_PROJECT_ID` | — | Upstream project (required) |
//! | `GCP_REGION` | `us-central1` | Upstream region |
//! | `PROXY_HOST` | `0.0.0.0` | Listen host |
//! | `PROXY_PORT` | `8000` | Listen port |
//! | `PROXY_API_KEYS` | — | Client keys, `key=label,key=label` |
//! | `PROXY_API_KEYS_FILE` | — | Client keys, `{"keys":[{"key","label","active"}]}` |
//! | `PROXY_UPSTREAM_BASE_URL` | `https://{region}-aiplatform.googleapis.com` | Upstream override |
//! | `PROXY_UPSTREAM_TIMEOUT_SECS` | `120` | Forwarding timeout |
//! | `PROXY_TOKEN_EXCHANGE_TIMEOUT_SECS` | `10` | Token endpoint timeout |
//! | `PROXY_TOKEN_SAFETY_MARGIN_SECS` | `300` | Refresh this long before expiry |
//! | `PROXY_TOKEN_REFRESH_RETRIES` | `2` | Extra attempts on retryable exchange failures |
//! | `PROXY_SERVE_STALE_TOKEN` | `true` | Serve an unexpired token if refresh fails |
//! | `PROXY_AUDIT_LOG_PATH` | `audit.log` | Append-only audit file |
//! | `PROXY_AUDIT_QUEUE_CAPACITY` | `1024` | Audit records buffered before dropping |
//! | `PROXY_MAX_BODY_BYTES` | `33554432` | Inbound body limit |
//! | `RUST_LOG` | `info` | Log filter (tracing-subscriber) |

pub mod audit;
pub mod config;
pub mod credentials;
pub mod exchange;
pub mod keys;
pub mod pipeline;
pub mod proxy;
pub mod token;
pub mod upstream;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use config::{ConfigError, ProxyConfig};
pub use proxy::{router, serve};
