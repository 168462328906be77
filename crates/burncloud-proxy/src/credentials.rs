//! Service-account key material and the signed assertions derived from it.
//!
//! The key file is the JSON document Google Cloud issues for a service
//! account. Only the fields needed for the JWT-bearer grant are read.

use std::fmt;
use std::path::Path;

use burncloud_std::fs::ReadFile;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::keys::mask;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Lifetime requested for each assertion. Google caps this at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Why an upstream token could not be produced.
///
/// Cloneable because one refresh result is handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("service-account key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("failed to sign credential assertion: {0}")]
    Signing(String),
    #[error("token exchange request failed: {0}")]
    Transport(String),
    #[error("token exchange timed out")]
    Timeout,
    #[error("token exchange rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token exchange response malformed: {0}")]
    MalformedResponse(String),
    #[error("token refresh aborted: {0}")]
    RefreshAborted(String),
}

impl CredentialError {
    /// Build a [`CredentialError::Rejected`], truncating long error bodies.
    pub fn rejected(status: u16, body: &str) -> Self {
        Self::Rejected {
            status,
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }
    }

    /// Transport failures, timeouts and 5xx rejections are worth another
    /// attempt; everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Parsed service-account key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountCredential {
    pub client_email: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id.as_deref().map(mask))
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccountCredential {
    pub fn from_json(contents: &str) -> Result<Self, CredentialError> {
        serde_json::from_str(contents)
            .map_err(|e| CredentialError::KeyUnavailable(format!("invalid key file: {e}")))
    }

    pub fn load<F: ReadFile>(fs: &F, path: &Path) -> Result<Self, CredentialError> {
        let contents = fs.read_to_string(path).map_err(|e| {
            CredentialError::KeyUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Signs RS256 JWT assertions for the OAuth 2.0 JWT-bearer grant.
pub struct AssertionSigner {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    scope: String,
    encoding_key: EncodingKey,
}

impl AssertionSigner {
    pub fn new(credential: &ServiceAccountCredential) -> Result<Self, CredentialError> {
        let encoding_key = EncodingKey::from_rsa_pem(credential.private_key.as_bytes())
            .map_err(|e| CredentialError::Signing(format!("invalid private key: {e}")))?;
        Ok(Self {
            client_email: credential.client_email.clone(),
            key_id: credential.private_key_id.clone(),
            token_uri: credential.token_uri.clone(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            encoding_key,
        })
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Sign an assertion issued at `issued_at` (seconds since the Unix epoch).
    pub fn sign(&self, issued_at: i64) -> Result<String, CredentialError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| CredentialError::Signing(e.to_string()))
    }
}
