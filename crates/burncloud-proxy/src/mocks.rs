//! Scripted collaborators for testing without Google endpoints.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! burncloud-proxy = { path = "...", features = ["test-support"] }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;

use crate::credentials::CredentialError;
use crate::exchange::{ExchangedToken, TokenExchanger};
use crate::upstream::{TransportError, Upstream, UpstreamRequest, UpstreamResponse};

// ── MockExchanger ─────────────────────────────────────────────────────────────

/// Replays scripted exchange results in order and counts calls.
///
/// Once the script runs out every call fails with a non-retryable
/// [`CredentialError::KeyUnavailable`].
#[derive(Clone, Default)]
pub struct MockExchanger {
    script: Arc<Mutex<VecDeque<Result<ExchangedToken, CredentialError>>>>,
    calls: Arc<AtomicUsize>,
    delay: Arc<Mutex<Duration>>,
}

impl MockExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_token(&self, token: &str, expires_in: Duration) {
        self.push(Ok(ExchangedToken {
            token: token.to_string(),
            expires_in,
        }));
    }

    pub fn push_error(&self, error: CredentialError) {
        self.push(Err(error));
    }

    /// Make every exchange take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, result: Result<ExchangedToken, CredentialError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }
}

impl TokenExchanger for MockExchanger {
    async fn exchange(&self) -> Result<ExchangedToken, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(CredentialError::KeyUnavailable(
                    "no scripted exchange result".to_string(),
                ))
            })
    }
}

// ── MockUpstream ──────────────────────────────────────────────────────────────

/// Records every forwarded request and replies from a script.
///
/// With an empty script it answers `200 {}`.
#[derive(Clone, Default)]
pub struct MockUpstream {
    script: Arc<Mutex<VecDeque<Result<UpstreamResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<UpstreamRequest>>>,
    delay: Arc<Mutex<Duration>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: StatusCode, content_type: &'static str, body: &[u8]) {
        self.push(Ok(UpstreamResponse {
            status,
            content_type: Some(HeaderValue::from_static(content_type)),
            body: Bytes::copy_from_slice(body),
        }));
    }

    pub fn push_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn push(&self, result: Result<UpstreamResponse, TransportError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }
}

impl Upstream for MockUpstream {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Ok(UpstreamResponse {
                    status: StatusCode::OK,
                    content_type: Some(HeaderValue::from_static("application/json")),
                    body: Bytes::from_static(b"{}"),
                })
            })
    }
}
