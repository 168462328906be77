//! BurnCloud Vertex proxy binary.
//!
//! Reads its configuration from the environment (see the library docs for
//! the full table), listens on `PROXY_HOST:PROXY_PORT` and runs until
//! SIGINT/SIGTERM, then drains the audit log.

use burncloud_proxy::{serve, ProxyConfig};
use burncloud_std::{SystemEnv, SystemFs};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::from_env(&SystemEnv, &SystemFs).expect("Invalid configuration");

    tracing::info!(
        project = %config.project_id,
        region = %config.region,
        key_path = %config.key_path.display(),
        audit_log = %config.audit_log_path.display(),
        "BurnCloud Vertex proxy starting"
    );

    serve(config).await.expect("Server failed");
}
