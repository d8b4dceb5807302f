//! Token validity: the single chokepoint before any platform API call.
//!
//! Data-extraction collaborators call `valid_access_token` and never touch
//! stored tokens directly. The manager decrypts, live-probes
//! non-refreshable platforms, refreshes near-expiry tokens on refreshable
//! ones, and marks connections `NeedsReauth` when the credential is gone
//! for good.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::crypto::TokenCipher;
use crate::error::TwinError;
use crate::oauth::exchange::{OAuthHttp, ProbeOutcome};
use crate::oauth::flow::FlowController;
use crate::platforms::PlatformRegistry;
use crate::store::{ConnectionStatus, ConnectionStore};

pub struct ValidityManager {
    registry: Arc<PlatformRegistry>,
    connections: Arc<ConnectionStore>,
    cipher: Arc<TokenCipher>,
    flow: Arc<FlowController>,
    http: Arc<OAuthHttp>,
    /// Serializes the check-then-refresh critical section per key, so two
    /// concurrent near-expiry callers coalesce on one refresh.
    refresh_locks: DashMap<(String, String), Arc<tokio::sync::Mutex<()>>>,
    refresh_margin: Duration,
}

impl ValidityManager {
    pub fn new(
        registry: Arc<PlatformRegistry>,
        connections: Arc<ConnectionStore>,
        cipher: Arc<TokenCipher>,
        flow: Arc<FlowController>,
        http: Arc<OAuthHttp>,
        refresh_margin_seconds: i64,
    ) -> Self {
        Self {
            registry,
            connections,
            cipher,
            flow,
            http,
            refresh_locks: DashMap::new(),
            refresh_margin: Duration::seconds(refresh_margin_seconds),
        }
    }

    /// Drop per-key locks nobody currently holds. Called periodically so
    /// the map does not grow with every user ever seen.
    pub fn evict_idle_locks(&self) {
        self.refresh_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn lock_for(&self, user_id: &str, platform: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .entry((user_id.to_string(), platform.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Return an access token guaranteed usable at the time of return, or
    /// an explicit error describing why none is available.
    pub async fn valid_access_token(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<String, TwinError> {
        let config = self.registry.get(platform)?;

        let lock = self.lock_for(user_id, platform);
        let _guard = lock.lock().await;

        let record = self
            .connections
            .find(user_id, platform)?
            .ok_or(TwinError::NotConnected)?;

        // Decryption failure is corruption, not an invalid token: fatal to
        // this call, escalated, never retried.
        let access_token = self.cipher.decrypt(&record.access_token)?;

        if !config.refreshable {
            // No expiry by provider design; only a live probe can tell us
            // the token was revoked. A transient probe failure (429, 5xx,
            // timeout) propagates as-is and leaves the record untouched.
            match self
                .http
                .probe(&config.probe_url(), config.token_type.scheme(), &access_token)
                .await?
            {
                ProbeOutcome::Usable => {
                    debug!(user_id, platform, "Validation probe passed");
                    return Ok(access_token);
                }
                ProbeOutcome::Rejected => {
                    warn!(user_id, platform, "Validation probe rejected token");
                    self.connections
                        .set_status(user_id, platform, ConnectionStatus::NeedsReauth)?;
                    return Err(TwinError::RevokedOrInvalid);
                }
            }
        }

        let near_expiry = record
            .expires_at
            .map(|expires_at| Utc::now() >= expires_at - self.refresh_margin)
            .unwrap_or(false);

        if near_expiry {
            debug!(user_id, platform, "Access token near expiry, refreshing");
            // FlowController::refresh marks NeedsReauth on provider
            // rejection; timeouts pass through as transient.
            return self.flow.refresh(user_id, platform).await;
        }

        Ok(access_token)
    }
}
