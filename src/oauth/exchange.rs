//! Outbound provider HTTP: token exchange, refresh, and validation probes.
//!
//! Every call goes through one `reqwest` client built with a bounded
//! timeout; a timed-out request surfaces as `UpstreamTimeout`, never an
//! unbounded wait. Transient failures (timeout, provider 429/5xx) are
//! retried with backoff a bounded number of times before surfacing.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::TwinError;

/// Attempts per outbound call before a transient failure is surfaced.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff between attempts grows linearly from this base.
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Verdict of a validation probe.
///
/// Only an auth rejection (401/403) is evidence the grant is gone; 429 and
/// 5xx answers are transient and must not be treated as revocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Usable,
    Rejected,
}

/// Tokens returned by a provider's token endpoint (standard OAuth 2.0).
#[derive(Debug, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// HTTP client for provider token endpoints and validation probes.
pub struct OAuthHttp {
    client: reqwest::Client,
}

impl OAuthHttp {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("twinlink/0.1")
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }

    /// Exchange an authorization code for tokens
    /// (`grant_type=authorization_code`).
    pub async fn exchange_code(
        &self,
        token_url: &str,
        code: &str,
        redirect_uri: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<ProviderTokens, TwinError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", redirect_uri);
        form.insert("client_id", client_id);
        form.insert("client_secret", client_secret);

        tracing::debug!(token_url, "Exchanging authorization code for token");
        self.token_request(token_url, &form).await
    }

    /// Exchange a refresh token for a new access token
    /// (`grant_type=refresh_token`).
    pub async fn refresh_grant(
        &self,
        token_url: &str,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<ProviderTokens, TwinError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", client_id);
        form.insert("client_secret", client_secret);

        tracing::debug!(token_url, "Refreshing access token");
        self.token_request(token_url, &form).await
    }

    async fn token_request(
        &self,
        token_url: &str,
        form: &HashMap<&str, &str>,
    ) -> Result<ProviderTokens, TwinError> {
        let mut attempt = 1;
        loop {
            match self.token_request_once(token_url, form).await {
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "Transient provider failure, retrying");
                    tokio::time::sleep(BACKOFF_BASE * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn token_request_once(
        &self,
        token_url: &str,
        form: &HashMap<&str, &str>,
    ) -> Result<ProviderTokens, TwinError> {
        let response = self
            .client
            .post(token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        // 429 and 5xx say nothing about the grant itself
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(TwinError::ProviderUnavailable {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(TwinError::ExchangeFailed {
                status: Some(status.as_u16()),
                detail: body,
            });
        }

        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| TwinError::ExchangeFailed {
                status: None,
                detail: format!("failed to parse token response: {e}"),
            })
    }

    /// Authenticated GET against a platform's lightweight profile endpoint.
    ///
    /// Only 401/403 count as a rejected token; 429 and 5xx surface as
    /// transient errors so a healthy connection is never torn down over a
    /// rate-limited or failing probe.
    pub async fn probe(
        &self,
        url: &str,
        scheme: &str,
        access_token: &str,
    ) -> Result<ProbeOutcome, TwinError> {
        let mut attempt = 1;
        loop {
            match self.probe_once(url, scheme, access_token).await {
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "Transient probe failure, retrying");
                    tokio::time::sleep(BACKOFF_BASE * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn probe_once(
        &self,
        url: &str,
        scheme: &str,
        access_token: &str,
    ) -> Result<ProbeOutcome, TwinError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("{scheme} {access_token}"))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(ProbeOutcome::Usable);
        }
        match status.as_u16() {
            401 | 403 => Ok(ProbeOutcome::Rejected),
            s => Err(TwinError::ProviderUnavailable { status: s }),
        }
    }
}

fn request_error(e: reqwest::Error) -> TwinError {
    if e.is_timeout() {
        TwinError::UpstreamTimeout
    } else {
        TwinError::ExchangeFailed {
            status: None,
            detail: e.to_string(),
        }
    }
}
