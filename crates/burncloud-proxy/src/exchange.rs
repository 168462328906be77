//! Exchange of a signed service-account assertion for an access token.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use burncloud_std::fs::ReadFile;
use serde::Deserialize;

use crate::credentials::{AssertionSigner, CredentialError, ServiceAccountCredential};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// A freshly minted upstream token and how long the identity service says it
/// is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangedToken {
    pub token: String,
    pub expires_in: Duration,
}

/// Talks to the upstream identity service. One call, one new token.
pub trait TokenExchanger: Send + Sync + 'static {
    fn exchange(&self) -> impl Future<Output = Result<ExchangedToken, CredentialError>> + Send;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

enum SignerState {
    Ready(AssertionSigner),
    Unavailable(CredentialError),
}

/// [`TokenExchanger`] for Google's OAuth 2.0 token endpoint using the
/// JWT-bearer grant.
pub struct GoogleTokenExchanger {
    signer: SignerState,
    http: reqwest::Client,
    timeout: Duration,
}

impl GoogleTokenExchanger {
    pub fn new(signer: AssertionSigner, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            signer: SignerState::Ready(signer),
            http,
            timeout,
        }
    }

    /// An exchanger whose every call fails with `cause`. Used when the key
    /// file could not be loaded so the proxy can still start.
    pub fn unavailable(cause: CredentialError, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            signer: SignerState::Unavailable(cause),
            http,
            timeout,
        }
    }

    /// Load the key file at `path`. A missing or broken file is logged and
    /// yields an [`unavailable`](Self::unavailable) exchanger rather than an
    /// error.
    pub fn from_key_file<F: ReadFile>(
        fs: &F,
        path: &Path,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        let signer = ServiceAccountCredential::load(fs, path)
            .and_then(|credential| AssertionSigner::new(&credential));

        match signer {
            Ok(signer) => {
                tracing::info!(
                    path = %path.display(),
                    client_email = %signer.client_email(),
                    "Loaded service-account credential"
                );
                Self::new(signer, http, timeout)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Service-account credential unavailable; upstream calls will fail"
                );
                Self::unavailable(e, http, timeout)
            }
        }
    }

    async fn request_token(&self, signer: &AssertionSigner) -> Result<ExchangedToken, CredentialError> {
        let assertion = signer.sign(chrono::Utc::now().timestamp())?;

        let response = self
            .http
            .post(signer.token_uri())
            .timeout(self.timeout)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(CredentialError::rejected(status.as_u16(), &body));
        }

        parse_token_response(&body)
    }
}

impl TokenExchanger for GoogleTokenExchanger {
    async fn exchange(&self) -> Result<ExchangedToken, CredentialError> {
        match &self.signer {
            SignerState::Ready(signer) => self.request_token(signer).await,
            SignerState::Unavailable(cause) => Err(cause.clone()),
        }
    }
}

fn transport_error(e: reqwest::Error) -> CredentialError {
    if e.is_timeout() {
        CredentialError::Timeout
    } else {
        CredentialError::Transport(e.to_string())
    }
}

fn parse_token_response(body: &str) -> Result<ExchangedToken, CredentialError> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| CredentialError::MalformedResponse(e.to_string()))?;

    let token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CredentialError::MalformedResponse("missing access_token".to_string()))?;
    let expires_in = parsed
        .expires_in
        .filter(|secs| *secs > 0)
        .ok_or_else(|| CredentialError::MalformedResponse("missing expires_in".to_string()))?;

    Ok(ExchangedToken {
        token,
        expires_in: Duration::from_secs(expires_in),
    })
}
