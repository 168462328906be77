use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use burncloud_std::env::ReadEnv;
use burncloud_std::fs::ReadFile;

use crate::keys::{self, KeyStore, KeyStoreError};
use crate::pipeline::DEFAULT_MAX_BODY_BYTES;
use crate::token::TokenPolicy;
use crate::upstream::UpstreamRoute;

const DEFAULT_KEY_PATH: &str = "vertex_creds.json";
const DEFAULT_REGION: &str = "us-central1";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOKEN_EXCHANGE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_AUDIT_LOG_PATH: &str = "audit.log";
const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("cannot read API key file {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Keys(#[from] KeyStoreError),
    #[error("no API keys configured; set PROXY_API_KEYS or PROXY_API_KEYS_FILE")]
    NoApiKeys,
}

/// Everything the proxy needs, resolved once at startup.
///
/// Resolved from environment variables:
/// - `GCP_KEY_PATH`: service-account key file (default: `vertex_creds.json`)
/// - `GCP_PROJECT_ID`: upstream project (required)
/// - `GCP_REGION`: upstream region (default: `us-central1`)
/// - `PROXY_HOST` / `PROXY_PORT`: listen address (default: `0.0.0.0:8000`)
/// - `PROXY_API_KEYS`: `key=label,...` client keys
/// - `PROXY_API_KEYS_FILE`: JSON client key file, merged with the list above
/// - `PROXY_UPSTREAM_BASE_URL`: overrides `https://{region}-aiplatform.googleapis.com`
/// - `PROXY_UPSTREAM_TIMEOUT_SECS`: forwarding timeout (default: 120)
/// - `PROXY_TOKEN_EXCHANGE_TIMEOUT_SECS`: token endpoint timeout (default: 10)
/// - `PROXY_TOKEN_SAFETY_MARGIN_SECS`: refresh this long before expiry (default: 300)
/// - `PROXY_TOKEN_REFRESH_RETRIES`: extra exchange attempts (default: 2)
/// - `PROXY_SERVE_STALE_TOKEN`: serve an unexpired token when refresh fails (default: true)
/// - `PROXY_AUDIT_LOG_PATH`: audit file (default: `audit.log`)
/// - `PROXY_AUDIT_QUEUE_CAPACITY`: audit records buffered before dropping (default: 1024)
/// - `PROXY_MAX_BODY_BYTES`: inbound body limit (default: 32 MiB)
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub key_path: PathBuf,
    pub project_id: String,
    pub region: String,
    pub host: String,
    pub port: u16,
    pub keys: KeyStore,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub token_exchange_timeout: Duration,
    pub token_policy: TokenPolicy,
    pub audit_log_path: PathBuf,
    pub audit_queue_capacity: usize,
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    pub fn from_env<E: ReadEnv, F: ReadFile>(env: &E, fs: &F) -> Result<Self, ConfigError> {
        let project_id = env
            .var("GCP_PROJECT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingVar("GCP_PROJECT_ID"))?;
        let region = env
            .var("GCP_REGION")
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());

        let keys = load_keys(env, fs)?;

        let defaults = TokenPolicy::default();
        let token_policy = TokenPolicy {
            safety_margin: Duration::from_secs(parsed_or(
                env,
                "PROXY_TOKEN_SAFETY_MARGIN_SECS",
                defaults.safety_margin.as_secs(),
            )),
            refresh_retries: parsed_or(env, "PROXY_TOKEN_REFRESH_RETRIES", defaults.refresh_retries),
            retry_delay: defaults.retry_delay,
            serve_stale_on_refresh_failure: parsed_or(
                env,
                "PROXY_SERVE_STALE_TOKEN",
                defaults.serve_stale_on_refresh_failure,
            ),
        };

        Ok(Self {
            key_path: env
                .var("GCP_KEY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_KEY_PATH)),
            upstream_base_url: env
                .var("PROXY_UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| UpstreamRoute::default_base_url(&region)),
            project_id,
            region,
            host: env
                .var("PROXY_HOST")
                .unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: parsed_or(env, "PROXY_PORT", DEFAULT_PORT),
            keys,
            upstream_timeout: Duration::from_secs(parsed_or(
                env,
                "PROXY_UPSTREAM_TIMEOUT_SECS",
                DEFAULT_UPSTREAM_TIMEOUT_SECS,
            )),
            token_exchange_timeout: Duration::from_secs(parsed_or(
                env,
                "PROXY_TOKEN_EXCHANGE_TIMEOUT_SECS",
                DEFAULT_TOKEN_EXCHANGE_TIMEOUT_SECS,
            )),
            token_policy,
            audit_log_path: env
                .var("PROXY_AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_AUDIT_LOG_PATH)),
            audit_queue_capacity: parsed_or(
                env,
                "PROXY_AUDIT_QUEUE_CAPACITY",
                DEFAULT_AUDIT_QUEUE_CAPACITY,
            ),
            max_body_bytes: parsed_or(env, "PROXY_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
        })
    }

    pub fn route(&self) -> UpstreamRoute {
        UpstreamRoute::new(&self.upstream_base_url, &self.project_id, &self.region)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_keys<E: ReadEnv, F: ReadFile>(env: &E, fs: &F) -> Result<KeyStore, ConfigError> {
    let mut records = Vec::new();

    if let Ok(path) = env.var("PROXY_API_KEYS_FILE") {
        let contents = fs
            .read_to_string(Path::new(&path))
            .map_err(|source| ConfigError::KeyFile {
                path: path.clone(),
                source,
            })?;
        records.extend(keys::parse_key_file(&contents)?);
    }
    if let Ok(list) = env.var("PROXY_API_KEYS") {
        records.extend(keys::parse_key_list(&list)?);
    }

    let store = KeyStore::new(records)?;
    if store.is_empty() {
        return Err(ConfigError::NoApiKeys);
    }
    tracing::info!(count = store.len(), "Loaded client API keys");
    Ok(store)
}

/// Parse `key`, falling back to `default` when unset. A value that does not
/// parse is logged and ignored.
fn parsed_or<E: ReadEnv, T: FromStr + Copy>(env: &E, key: &str, default: T) -> T {
    match env.var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = key, value = %raw, "Invalid value; using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use burncloud_std::env::InMemoryEnv;
    use burncloud_std::fs::MemFs;

    use super::*;

    fn base_env() -> InMemoryEnv {
        let env = InMemoryEnv::new();
        env.set("GCP_PROJECT_ID", "burncloud-prod");
        env.set("PROXY_API_KEYS", "sk-client-veo-001=VIP Client A");
        env
    }

    #[test]
    fn defaults_when_only_required_vars_set() {
        let config = ProxyConfig::from_env(&base_env(), &MemFs::new()).unwrap();

        assert_eq!(config.key_path, PathBuf::from("vertex_creds.json"));
        assert_eq!(config.project_id, "burncloud-prod");
        assert_eq!(config.region, "us-central1");
        assert_eq!(config.listen_addr(), "0.0.0.0:8000");
        assert_eq!(
            config.upstream_base_url,
            "https://us-central1-aiplatform.googleapis.com"
        );
        assert_eq!(config.upstream_timeout, Duration::from_secs(120));
        assert_eq!(config.token_exchange_timeout, Duration::from_secs(10));
        assert_eq!(config.token_policy, TokenPolicy::default());
        assert_eq!(config.audit_log_path, PathBuf::from("audit.log"));
        assert_eq!(config.audit_queue_capacity, 1024);
        assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
        assert_eq!(config.keys.len(), 1);
    }

    #[test]
    fn reads_all_env_vars() {
        let env = base_env();
        env.set("GCP_KEY_PATH", "/secrets/sa.json");
        env.set("GCP_REGION", "europe-west4");
        env.set("PROXY_HOST", "127.0.0.1");
        env.set("PROXY_PORT", "9090");
        env.set("PROXY_UPSTREAM_TIMEOUT_SECS", "30");
        env.set("PROXY_TOKEN_EXCHANGE_TIMEOUT_SECS", "5");
        env.set("PROXY_TOKEN_SAFETY_MARGIN_SECS", "600");
        env.set("PROXY_TOKEN_REFRESH_RETRIES", "0");
        env.set("PROXY_SERVE_STALE_TOKEN", "false");
        env.set("PROXY_AUDIT_LOG_PATH", "/var/log/burncloud/audit.log");
        env.set("PROXY_AUDIT_QUEUE_CAPACITY", "16");
        env.set("PROXY_MAX_BODY_BYTES", "1024");

        let config = ProxyConfig::from_env(&env, &MemFs::new()).unwrap();

        assert_eq!(config.key_path, PathBuf::from("/secrets/sa.json"));
        assert_eq!(config.region, "europe-west4");
        assert_eq!(
            config.upstream_base_url,
            "https://europe-west4-aiplatform.googleapis.com"
        );
        assert_eq!(config.listen_addr(), "127.0.0.1:9090");
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert_eq!(config.token_exchange_timeout, Duration::from_secs(5));
        assert_eq!(config.token_policy.safety_margin, Duration::from_secs(600));
        assert_eq!(config.token_policy.refresh_retries, 0);
        assert!(!config.token_policy.serve_stale_on_refresh_failure);
        assert_eq!(
            config.audit_log_path,
            PathBuf::from("/var/log/burncloud/audit.log")
        );
        assert_eq!(config.audit_queue_capacity, 16);
        assert_eq!(config.max_body_bytes, 1024);
    }

    #[test]
    fn base_url_override_feeds_the_route() {
        let env = base_env();
        env.set("PROXY_UPSTREAM_BASE_URL", "http://127.0.0.1:9999");

        let config = ProxyConfig::from_env(&env, &MemFs::new()).unwrap();

        assert_eq!(
            config.route().url("m:predict", None).unwrap(),
            "http://127.0.0.1:9999/v1/projects/burncloud-prod/locations/us-central1/publishers/google/models/m:predict"
        );
    }

    #[test]
    fn missing_project_is_an_error() {
        let env = InMemoryEnv::new();
        env.set("PROXY_API_KEYS", "sk-a=A");

        let err = ProxyConfig::from_env(&env, &MemFs::new()).unwrap_err();

        assert!(matches!(err, ConfigError::MissingVar("GCP_PROJECT_ID")));
    }

    #[test]
    fn no_api_keys_is_an_error() {
        let env = InMemoryEnv::new();
        env.set("GCP_PROJECT_ID", "p");

        let err = ProxyConfig::from_env(&env, &MemFs::new()).unwrap_err();

        assert!(matches!(err, ConfigError::NoApiKeys));
    }

    #[test]
    fn merges_key_file_and_key_list() {
        let env = base_env();
        env.set("PROXY_API_KEYS_FILE", "keys.json");
        let fs = MemFs::new();
        fs.insert(
            "keys.json",
            r#"{"keys":[{"key":"sk-burncloud-admin","label":"Admin Test"},{"key":"sk-old","label":"Old","active":false}]}"#,
        );

        let config = ProxyConfig::from_env(&env, &fs).unwrap();

        assert_eq!(config.keys.len(), 3);
        assert!(config.keys.validate("sk-burncloud-admin").is_ok());
        assert!(config.keys.validate("sk-client-veo-001").is_ok());
        assert!(config.keys.validate("sk-old").is_err());
    }

    #[test]
    fn unreadable_key_file_is_an_error() {
        let env = base_env();
        env.set("PROXY_API_KEYS_FILE", "missing.json");

        let err = ProxyConfig::from_env(&env, &MemFs::new()).unwrap_err();

        assert!(matches!(err, ConfigError::KeyFile { ref path, .. } if path == "missing.json"));
    }

    #[test]
    fn duplicate_key_across_sources_is_an_error() {
        let env = base_env();
        env.set("PROXY_API_KEYS_FILE", "keys.json");
        let fs = MemFs::new();
        fs.insert(
            "keys.json",
            r#"{"keys":[{"key":"sk-client-veo-001","label":"Again"}]}"#,
        );

        let err = ProxyConfig::from_env(&env, &fs).unwrap_err();

        assert!(matches!(err, ConfigError::Keys(KeyStoreError::Duplicate(_))));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let env = base_env();
        env.set("PROXY_PORT", "not-a-number");
        env.set("PROXY_UPSTREAM_TIMEOUT_SECS", "-5");
        env.set("PROXY_SERVE_STALE_TOKEN", "maybe");

        let config = ProxyConfig::from_env(&env, &MemFs::new()).unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.upstream_timeout, Duration::from_secs(120));
        assert!(config.token_policy.serve_stale_on_refresh_failure);
    }
}
