//! Error taxonomy for the connection core.
//!
//! Variants carry operator-facing detail in fields; `Display` stays generic
//! so a message can be surfaced to the end user without leaking provider
//! responses or token material.

use thiserror::Error;

use crate::crypto::CipherError;

#[derive(Debug, Error)]
pub enum TwinError {
    /// Platform id is not in the registry. Config error, fatal to the request.
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    /// Client credentials for the platform are missing from the
    /// environment. Deployment error, fatal to the request.
    #[error("OAuth client credentials not configured for platform '{0}'")]
    NotConfigured(String),

    /// CSRF state was absent, expired, or already consumed. Security failure:
    /// the user must restart the connect flow. Expired and forged states are
    /// deliberately indistinguishable.
    #[error("invalid or expired OAuth state")]
    InvalidState,

    /// Provider rejected the code/refresh exchange or the request failed.
    /// `detail` is for operator logs only, never for user-facing output.
    #[error("token exchange failed")]
    ExchangeFailed {
        status: Option<u16>,
        detail: String,
    },

    /// Refresh requested on a platform whose tokens cannot be refreshed.
    /// Caller logic error; not retryable.
    #[error("platform '{0}' does not support token refresh")]
    NotRefreshable(String),

    /// Provider rejected the stored refresh token. The connection has been
    /// marked `NeedsReauth`; the user must reconnect.
    #[error("token refresh rejected; reconnect required")]
    RefreshFailed,

    /// Live validation probe failed. The connection has been marked
    /// `NeedsReauth`; the user must reconnect.
    #[error("access token revoked or invalid; reconnect required")]
    RevokedOrInvalid,

    /// No connection record exists for this (user, platform).
    #[error("platform is not connected")]
    NotConnected,

    /// Stored token failed authenticated decryption. Data-integrity fault:
    /// never retried, always escalated to an operator.
    #[error("stored token could not be decrypted")]
    DecryptionFailed(#[from] CipherError),

    /// Outbound provider call exceeded its timeout. Transient; safe to retry
    /// with backoff.
    #[error("upstream provider timed out")]
    UpstreamTimeout,

    /// Provider answered 429 or 5xx. Transient; says nothing about whether
    /// the stored grant is still good.
    #[error("upstream provider temporarily unavailable")]
    ProviderUnavailable { status: u16 },

    /// Connection store fault.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl TwinError {
    /// True for failures a caller may retry with backoff. Everything else is
    /// terminal for the current attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TwinError::UpstreamTimeout | TwinError::ProviderUnavailable { .. }
        )
    }
}
