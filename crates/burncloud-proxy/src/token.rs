//! Upstream access-token cache with single-flight refresh.
//!
//! # Concurrency
//!
//! ```text
//! get_token ──► read lock: fresh? ──yes──► clone & return
//!                     │ no
//!                     ▼
//!               refresh slot (mutex)
//!                 ├─ refresh running ──► await the same shared future
//!                 └─ idle ──► spawn refresh task, park it in the slot
//!                              │
//!                              ▼
//!                 exchange (bounded retry) ─► write cache ─► clear slot
//! ```
//!
//! The refresh runs on its own task: a caller that is cancelled while
//! waiting drops only its handle, never the refresh other callers share.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use burncloud_std::time::{GetElapsed, GetNow, SystemClock};
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::credentials::CredentialError;
use crate::exchange::{ExchangedToken, TokenExchanger};

const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);
const DEFAULT_REFRESH_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Opaque upstream bearer credential. Cheap to clone; `Debug` never prints
/// the value.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// How eagerly tokens are refreshed and what happens when refresh fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    /// A token is refreshed once less than this much validity remains.
    pub safety_margin: Duration,
    /// Extra exchange attempts after a retryable failure.
    pub refresh_retries: u32,
    /// Backoff before the first retry; doubles on each further retry.
    pub retry_delay: Duration,
    /// Hand out the previous token while it is still inside its hard
    /// lifetime when a refresh fails.
    pub serve_stale_on_refresh_failure: bool,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
            refresh_retries: DEFAULT_REFRESH_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            serve_stale_on_refresh_failure: true,
        }
    }
}

struct CachedToken<I> {
    value: BearerToken,
    issued_at: I,
    lifetime: Duration,
}

impl<I: Copy> CachedToken<I> {
    /// `expiresAt - now > margin`.
    fn is_fresh<C: GetElapsed<Instant = I>>(&self, clock: &C, margin: Duration) -> bool {
        clock.elapsed(self.issued_at).saturating_add(margin) < self.lifetime
    }

    fn is_unexpired<C: GetElapsed<Instant = I>>(&self, clock: &C) -> bool {
        clock.elapsed(self.issued_at) < self.lifetime
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<BearerToken, CredentialError>>>;

struct Inner<X, C: GetNow> {
    exchanger: X,
    clock: C,
    policy: TokenPolicy,
    cached: RwLock<Option<CachedToken<C::Instant>>>,
    refresh: Mutex<Option<SharedRefresh>>,
}

/// Produces a valid upstream token, refreshing it before it expires.
///
/// Clones share the same cache and refresh slot.
pub struct TokenProvider<X, C = SystemClock>
where
    C: GetNow,
{
    inner: Arc<Inner<X, C>>,
}

impl<X, C: GetNow> Clone for TokenProvider<X, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<X: TokenExchanger> TokenProvider<X, SystemClock> {
    pub fn new(exchanger: X, policy: TokenPolicy) -> Self {
        Self::with_clock(exchanger, SystemClock, policy)
    }
}

impl<X, C> TokenProvider<X, C>
where
    X: TokenExchanger,
    C: GetElapsed + Send + Sync + 'static,
{
    pub fn with_clock(exchanger: X, clock: C, policy: TokenPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                exchanger,
                clock,
                policy,
                cached: RwLock::new(None),
                refresh: Mutex::new(None),
            }),
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.inner.policy
    }

    pub fn clock(&self) -> &C {
        &self.inner.clock
    }

    /// Return a token with more than the safety margin of validity left,
    /// refreshing first if needed.
    pub async fn get_token(&self) -> Result<BearerToken, CredentialError> {
        if let Some(token) = self.inner.fresh_token() {
            return Ok(token);
        }

        match self.join_or_start_refresh().await {
            Ok(token) => Ok(token),
            Err(e) => {
                if self.inner.policy.serve_stale_on_refresh_failure {
                    if let Some(stale) = self.inner.unexpired_token() {
                        tracing::warn!(
                            error = %e,
                            "Token refresh failed; serving previous token until it expires"
                        );
                        return Ok(stale);
                    }
                }
                Err(e)
            }
        }
    }

    fn join_or_start_refresh(&self) -> SharedRefresh {
        let mut slot = self
            .inner
            .refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(running) = slot.as_ref() {
            return running.clone();
        }

        // A refresh may have finished between the fast path and taking the slot.
        if let Some(token) = self.inner.fresh_token() {
            return futures_util::future::ready(Ok(token)).boxed().shared();
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.refresh().await });
        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(CredentialError::RefreshAborted(e.to_string())))
        }
        .boxed()
        .shared();

        *slot = Some(shared.clone());
        shared
    }
}

impl<X, C> Inner<X, C>
where
    X: TokenExchanger,
    C: GetElapsed,
{
    fn fresh_token(&self) -> Option<BearerToken> {
        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|t| t.is_fresh(&self.clock, self.policy.safety_margin))
            .map(|t| t.value.clone())
    }

    fn unexpired_token(&self) -> Option<BearerToken> {
        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|t| t.is_unexpired(&self.clock))
            .map(|t| t.value.clone())
    }

    async fn refresh(&self) -> Result<BearerToken, CredentialError> {
        tracing::info!("Refreshing upstream access token");

        let result = self.exchange_with_retry().await;

        let outcome = match result {
            Ok((issued_at, exchanged)) => {
                if exchanged.expires_in <= self.policy.safety_margin {
                    tracing::warn!(
                        expires_in_secs = exchanged.expires_in.as_secs(),
                        safety_margin_secs = self.policy.safety_margin.as_secs(),
                        "Token lifetime is shorter than the safety margin; every request will refresh"
                    );
                }
                let value = BearerToken::new(exchanged.token);
                *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(CachedToken {
                    value: value.clone(),
                    issued_at,
                    lifetime: exchanged.expires_in,
                });
                tracing::info!(
                    expires_in_secs = exchanged.expires_in.as_secs(),
                    "Upstream access token refreshed"
                );
                Ok(value)
            }
            Err(e) => {
                tracing::error!(error = %e, "Upstream access token refresh failed");
                Err(e)
            }
        };

        // Clear only after the cache write so newcomers see the new token
        // instead of starting another refresh.
        *self.refresh.lock().unwrap_or_else(PoisonError::into_inner) = None;
        outcome
    }

    /// Exchange with exponential backoff on retryable failures. Returns the
    /// instant the successful attempt started, which anchors the lifetime.
    async fn exchange_with_retry(&self) -> Result<(C::Instant, ExchangedToken), CredentialError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let started = self.clock.now();
            match self.exchanger.exchange().await {
                Ok(token) => return Ok((started, token)),
                Err(e) if e.is_retryable() && attempts <= self.policy.refresh_retries => {
                    let delay = self.policy.retry_delay * (1u32 << (attempts - 1).min(16));
                    tracing::debug!(
                        error = %e,
                        attempt = attempts,
                        max_retries = self.policy.refresh_retries,
                        delay_ms = delay.as_millis(),
                        "Token exchange failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
