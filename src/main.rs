use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use twinlink::api::{create_api_router, ApiState};
use twinlink::config::{load_config, ClientCredentials, TwinConfig};
use twinlink::crypto::TokenCipher;
use twinlink::oauth::{run_state_eviction, FlowController, OAuthHttp, StateStore};
use twinlink::platforms::PlatformRegistry;
use twinlink::rate_limit::RateLimiter;
use twinlink::store::ConnectionStore;
use twinlink::validity::ValidityManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twinlink=info".into()),
        )
        .init();

    let config_path =
        std::env::var("TWINLINK_CONFIG").unwrap_or_else(|_| "twinlink.toml".to_string());
    let config: TwinConfig = match load_config(&config_path) {
        Ok(config) => config,
        Err(_) => {
            info!(path = %config_path, "No config file found, using defaults");
            TwinConfig::default()
        }
    };

    let encryption_key = std::env::var("TWINLINK_ENCRYPTION_KEY")
        .context("TWINLINK_ENCRYPTION_KEY must be set (base64, 32 bytes)")?;
    let cipher = Arc::new(
        TokenCipher::from_base64(&encryption_key).context("Invalid TWINLINK_ENCRYPTION_KEY")?,
    );

    let registry = Arc::new(PlatformRegistry::new());
    let credentials = Arc::new(ClientCredentials::from_env(&registry));
    let connections = Arc::new(
        ConnectionStore::new(&config.storage.database_path)
            .context("Failed to open connection store")?,
    );
    let states = StateStore::new(config.oauth.state_ttl_seconds);
    let http = Arc::new(OAuthHttp::new(Duration::from_secs(
        config.oauth.upstream_timeout_seconds,
    )));

    let flow = Arc::new(FlowController::new(
        Arc::clone(&registry),
        states.clone(),
        Arc::clone(&connections),
        Arc::clone(&cipher),
        credentials,
        Arc::clone(&http),
        config.server.callback_base_url.clone(),
    ));

    let validity = Arc::new(ValidityManager::new(
        Arc::clone(&registry),
        Arc::clone(&connections),
        Arc::clone(&cipher),
        Arc::clone(&flow),
        Arc::clone(&http),
        config.oauth.refresh_margin_seconds,
    ));

    let limiter = Arc::new(RateLimiter::new());

    // Periodically evict expired CSRF states
    tokio::spawn(run_state_eviction(states.clone(), 60));

    // Drop idle refresh locks and refilled rate-limit buckets so the maps
    // do not grow with every user ever seen
    {
        let validity = Arc::clone(&validity);
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                validity.evict_idle_locks();
                limiter.evict_idle();
            }
        });
    }

    let app = create_api_router(ApiState {
        registry,
        connections,
        flow,
        validity,
        limiter,
        auth_enabled: config.server.auth_enabled,
        post_connect_redirect: config.server.post_connect_redirect.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "twinlink listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
