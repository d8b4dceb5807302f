//! OAuth flow controller: the connection-attempt state machine.
//!
//! ```text
//!   Idle --initiate--> StatePending --callback(code, state)--> Exchanging
//!   Exchanging --success--> Connected (persisted)
//!   Exchanging --provider rejects--> ExchangeFailed (reported)
//!   StatePending --invalid / expired / replayed state--> InvalidState
//! ```
//!
//! State consumption fails closed: no consume, no exchange. An expired
//! state and a forged one are reported identically so the failure mode
//! cannot be distinguished from outside.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::ClientCredentials;
use crate::crypto::TokenCipher;
use crate::error::TwinError;
use crate::oauth::exchange::OAuthHttp;
use crate::oauth::state::StateStore;
use crate::platforms::PlatformRegistry;
use crate::store::{ConnectionStatus, ConnectionStore, PlatformConnection};

/// Absolute expiry from a provider's `expires_in`.
///
/// An `expires_in` that overflows chrono's range is a malformed response,
/// reported as a parse failure rather than a panic.
fn expiry_from(expires_in: Option<i64>) -> Result<Option<DateTime<Utc>>, TwinError> {
    match expires_in {
        None => Ok(None),
        Some(secs) => Duration::try_seconds(secs)
            .and_then(|d| Utc::now().checked_add_signed(d))
            .map(Some)
            .ok_or_else(|| TwinError::ExchangeFailed {
                status: None,
                detail: format!("provider returned unusable expires_in: {secs}"),
            }),
    }
}

/// Logical result of a callback, for callers that render a redirect.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Exchange succeeded; a `Connected` record was persisted.
    Connected { user_id: String, platform: String },
    /// The user denied authorization at the provider. Not a failure.
    Cancelled { platform: String },
}

/// Inbound callback query parameters.
#[derive(Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Orchestrates authorize-URL construction, callback handling, token
/// exchange, refresh, and revocation. All persistence goes through the
/// connection store; all token material passes through the cipher.
pub struct FlowController {
    registry: Arc<PlatformRegistry>,
    states: StateStore,
    connections: Arc<ConnectionStore>,
    cipher: Arc<TokenCipher>,
    credentials: Arc<ClientCredentials>,
    http: Arc<OAuthHttp>,
    callback_base_url: String,
}

impl FlowController {
    pub fn new(
        registry: Arc<PlatformRegistry>,
        states: StateStore,
        connections: Arc<ConnectionStore>,
        cipher: Arc<TokenCipher>,
        credentials: Arc<ClientCredentials>,
        http: Arc<OAuthHttp>,
        callback_base_url: String,
    ) -> Self {
        Self {
            registry,
            states,
            connections,
            cipher,
            credentials,
            http,
            callback_base_url,
        }
    }

    fn redirect_uri(&self, platform: &str) -> String {
        format!("{}/api/oauth/{}/callback", self.callback_base_url, platform)
    }

    fn credential_for(&self, platform: &str) -> Result<&crate::config::Credential, TwinError> {
        self.credentials
            .get(platform)
            .ok_or_else(|| TwinError::NotConfigured(platform.to_string()))
    }

    /// Begin a connect flow: issue a CSRF state and build the provider
    /// authorization URL. No connection record is created yet.
    pub fn initiate(&self, user_id: &str, platform: &str) -> Result<String, TwinError> {
        let config = self.registry.get(platform)?;
        let credential = self.credential_for(platform)?;

        let state = self.states.issue(user_id, platform);
        let url = config.build_auth_url(&credential.client_id, &self.redirect_uri(platform), &state);

        debug!(user_id, platform, "Issued OAuth state and authorization URL");
        Ok(url)
    }

    /// Handle the provider redirect: consume the state, exchange the code,
    /// encrypt the returned tokens, and persist a `Connected` record.
    pub async fn handle_callback(
        &self,
        platform: &str,
        params: CallbackParams,
    ) -> Result<CallbackOutcome, TwinError> {
        let config = self.registry.get(platform)?;

        // User denied at the provider: consume the state if one was sent so
        // it cannot be replayed, then report cancellation, not failure.
        if let Some(error) = &params.error {
            if let Some(state) = &params.state {
                let _ = self.states.consume(state);
            }
            info!(platform, provider_error = %error, "User cancelled authorization");
            return Ok(CallbackOutcome::Cancelled {
                platform: platform.to_string(),
            });
        }

        // Fail closed before touching the provider: a missing parameter, a
        // forged state, an expired state, and a replayed state all resolve
        // to the same InvalidState.
        let (code, state) = match (&params.code, &params.state) {
            (Some(code), Some(state)) => (code, state),
            _ => {
                warn!(platform, "Callback missing code or state parameter");
                return Err(TwinError::InvalidState);
            }
        };

        let entry = self.states.consume(state).ok_or_else(|| {
            warn!(platform, "OAuth state invalid, expired, or replayed");
            TwinError::InvalidState
        })?;

        if entry.platform != platform {
            warn!(
                expected = %entry.platform,
                actual = platform,
                "Callback platform does not match issued state"
            );
            return Err(TwinError::InvalidState);
        }

        let credential = self.credential_for(platform)?;
        let tokens = self
            .http
            .exchange_code(
                &config.token_url,
                code,
                &self.redirect_uri(platform),
                &credential.client_id,
                &credential.client_secret,
            )
            .await?;

        let access_token = self.cipher.encrypt(&tokens.access_token)?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;
        let expires_at = expiry_from(tokens.expires_in)?;

        // Persisted only after the exchange response parsed in full, so a
        // cancelled or failed exchange leaves no partial record.
        let now = Utc::now();
        self.connections.upsert(&PlatformConnection {
            user_id: entry.user_id.clone(),
            platform: platform.to_string(),
            status: ConnectionStatus::Connected,
            access_token,
            refresh_token,
            expires_at,
            connected_at: now,
            updated_at: now,
            last_sync_at: None,
            last_sync_status: None,
        })?;

        info!(
            user_id = %entry.user_id,
            platform,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Platform connected"
        );

        Ok(CallbackOutcome::Connected {
            user_id: entry.user_id,
            platform: platform.to_string(),
        })
    }

    /// Exchange the stored refresh token for new tokens and re-persist them.
    ///
    /// Returns the new plaintext access token. A provider rejection marks
    /// the connection `NeedsReauth` and fails with `RefreshFailed`; a
    /// timeout is transient and leaves the record untouched.
    pub async fn refresh(&self, user_id: &str, platform: &str) -> Result<String, TwinError> {
        let config = self.registry.get(platform)?;
        if !config.refreshable {
            return Err(TwinError::NotRefreshable(platform.to_string()));
        }

        let record = self
            .connections
            .find(user_id, platform)?
            .ok_or(TwinError::NotConnected)?;

        let refresh_plain = match &record.refresh_token {
            Some(sealed) => self.cipher.decrypt(sealed)?,
            None => {
                // Refreshable platform but no refresh token stored: the
                // grant is unusable, reauth is the only way out.
                warn!(user_id, platform, "No refresh token stored");
                self.connections
                    .set_status(user_id, platform, ConnectionStatus::NeedsReauth)?;
                return Err(TwinError::RefreshFailed);
            }
        };

        let credential = self.credential_for(platform)?;
        let tokens = match self
            .http
            .refresh_grant(
                &config.token_url,
                &refresh_plain,
                &credential.client_id,
                &credential.client_secret,
            )
            .await
        {
            Ok(tokens) => tokens,
            Err(TwinError::UpstreamTimeout) => return Err(TwinError::UpstreamTimeout),
            Err(TwinError::ExchangeFailed { status, detail }) => {
                warn!(
                    user_id,
                    platform,
                    status = ?status,
                    detail = %detail,
                    "Provider rejected refresh token"
                );
                self.connections
                    .set_status(user_id, platform, ConnectionStatus::NeedsReauth)?;
                return Err(TwinError::RefreshFailed);
            }
            Err(e) => return Err(e),
        };

        // Keep the old refresh token when the provider does not rotate it
        let new_refresh_plain = tokens.refresh_token.clone().unwrap_or(refresh_plain);
        let access_plain = tokens.access_token.clone();

        let updated = PlatformConnection {
            status: ConnectionStatus::Connected,
            access_token: self.cipher.encrypt(&access_plain)?,
            refresh_token: Some(self.cipher.encrypt(&new_refresh_plain)?),
            expires_at: expiry_from(tokens.expires_in)?,
            updated_at: Utc::now(),
            ..record
        };
        self.connections.upsert(&updated)?;

        info!(user_id, platform, "Access token refreshed");
        Ok(access_plain)
    }

    /// Delete the connection record. Idempotent: revoking an absent
    /// connection succeeds.
    pub fn revoke(&self, user_id: &str, platform: &str) -> Result<(), TwinError> {
        let existed = self.connections.delete(user_id, platform)?;
        info!(user_id, platform, existed, "Platform disconnected");
        Ok(())
    }
}
