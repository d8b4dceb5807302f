//! HTTP surface for the connection core.
//!
//! Routes:
//! 1. `GET  /api/platforms` — supported platforms and their scopes
//! 2. `GET  /api/connections` — the caller's connection statuses
//! 3. `GET  /api/oauth/:platform/start` — redirect to the provider
//! 4. `GET  /api/oauth/:platform/callback` — provider redirect target
//! 5. `DELETE /api/connections/:platform` — disconnect
//!
//! The callback never surfaces provider detail to the browser: every
//! outcome redirects back to the frontend with an opaque `result` code,
//! and the detail goes to the operator log.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::auth::extract_bearer_token;
use crate::error::TwinError;
use crate::oauth::flow::{CallbackOutcome, CallbackParams, FlowController};
use crate::platforms::PlatformRegistry;
use crate::rate_limit::RateLimiter;
use crate::store::ConnectionStore;
use crate::validity::ValidityManager;

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for connection endpoints
enum AppError {
    Unauthorized(String),
    NotFound(String),
    TooManyRequests(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<TwinError> for AppError {
    fn from(e: TwinError) -> Self {
        match e {
            TwinError::UnknownPlatform(p) => {
                AppError::NotFound(format!("Platform '{p}' not found"))
            }
            TwinError::NotConfigured(p) => AppError::ServerError(format!(
                "OAuth not configured for platform '{p}'. Set TWINLINK_OAUTH_{}_CLIENT_ID and \
                 TWINLINK_OAUTH_{}_CLIENT_SECRET environment variables.",
                p.to_uppercase(),
                p.to_uppercase()
            )),
            TwinError::InvalidState => {
                AppError::Unauthorized("Invalid or expired OAuth state".to_string())
            }
            TwinError::NotConnected => AppError::NotFound("Platform is not connected".to_string()),
            TwinError::UpstreamTimeout => {
                AppError::BadGateway("Provider timed out, try again shortly".to_string())
            }
            TwinError::ProviderUnavailable { .. } => AppError::BadGateway(
                "Provider temporarily unavailable, try again shortly".to_string(),
            ),
            // Generic Display wording on purpose; detail stays in the
            // operator log
            other => AppError::ServerError(other.to_string()),
        }
    }
}

/// Shared state for the connection API
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<PlatformRegistry>,
    pub connections: Arc<ConnectionStore>,
    pub flow: Arc<FlowController>,
    pub validity: Arc<ValidityManager>,
    pub limiter: Arc<RateLimiter>,
    pub auth_enabled: bool,
    /// Frontend page every callback outcome redirects to
    pub post_connect_redirect: String,
}

/// Callback query parameters as sent by providers
#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    #[allow(dead_code)]
    error_description: Option<String>,
}

#[derive(Serialize)]
struct PlatformSummary {
    id: String,
    scopes: Vec<String>,
    refreshable: bool,
}

#[derive(Serialize)]
struct ConnectionSummary {
    platform: String,
    status: String,
    connected_at: String,
    expires_at: Option<String>,
    last_sync_at: Option<String>,
    last_sync_status: Option<String>,
}

#[derive(Serialize)]
struct DisconnectResponse {
    success: bool,
    platform: String,
}

/// Create the connection API router
pub fn create_api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/platforms", get(list_platforms))
        .route("/api/connections", get(list_connections))
        .route("/api/connections/:platform", delete(disconnect))
        .route(
            "/api/connections/:platform/validate",
            axum::routing::post(validate_connection),
        )
        .route("/api/oauth/:platform/start", get(oauth_start))
        .route("/api/oauth/:platform/callback", get(oauth_callback))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn resolve_user(state: &ApiState, headers: &HeaderMap) -> Result<String, AppError> {
    if state.auth_enabled {
        extract_bearer_token(headers)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {e}")))
    } else {
        // No auth mode: single default user
        Ok("default".to_string())
    }
}

/// GET /api/platforms
async fn list_platforms(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let platforms: Vec<PlatformSummary> = state
        .registry
        .ids()
        .into_iter()
        .filter_map(|id| state.registry.get(id).ok())
        .map(|config| PlatformSummary {
            id: config.id.to_string(),
            scopes: config.scopes.iter().map(|s| s.to_string()).collect(),
            refreshable: config.refreshable,
        })
        .collect();

    Json(serde_json::json!({ "platforms": platforms }))
}

/// GET /api/connections
async fn list_connections(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = resolve_user(&state, &headers)?;

    let connections = state
        .connections
        .list_for_user(&user_id)
        .map_err(AppError::from)?
        .into_iter()
        .map(|c| ConnectionSummary {
            platform: c.platform,
            status: c.status.as_str().to_string(),
            connected_at: c.connected_at.to_rfc3339(),
            expires_at: c.expires_at.map(|dt| dt.to_rfc3339()),
            last_sync_at: c.last_sync_at.map(|dt| dt.to_rfc3339()),
            last_sync_status: c.last_sync_status,
        })
        .collect::<Vec<_>>();

    Ok(Json(serde_json::json!({ "connections": connections })))
}

/// GET /api/oauth/:platform/start
///
/// Issues a CSRF state and redirects the browser to the provider's
/// authorization page.
async fn oauth_start(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    if !state.registry.contains(&platform) {
        warn!(platform, "OAuth start for unknown platform");
        return Err(AppError::NotFound(format!(
            "Platform '{platform}' not found"
        )));
    }

    let user_id = resolve_user(&state, &headers)?;
    let url = state.flow.initiate(&user_id, &platform)?;

    Ok(Redirect::temporary(&url))
}

/// GET /api/oauth/:platform/callback
///
/// Provider redirect target. Always sends the browser back to the frontend
/// with `platform` and an opaque `result` code: `connected`, `cancelled`,
/// or `error`.
async fn oauth_callback(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    let params = CallbackParams {
        code: query.code,
        state: query.state,
        error: query.error,
    };

    let result = match state.flow.handle_callback(&platform, params).await {
        Ok(CallbackOutcome::Connected { .. }) => "connected",
        Ok(CallbackOutcome::Cancelled { .. }) => "cancelled",
        Err(e) => {
            // Operator log gets the real reason; the browser gets an opaque
            // indicator
            match &e {
                TwinError::InvalidState => {
                    warn!(platform, "Callback rejected: invalid OAuth state")
                }
                TwinError::ExchangeFailed { status, detail } => error!(
                    platform,
                    status = ?status,
                    detail = %detail,
                    "Token exchange failed"
                ),
                other => error!(platform, error = %other, "Callback failed"),
            }
            "error"
        }
    };

    Redirect::temporary(&format!(
        "{}?platform={}&result={}",
        state.post_connect_redirect,
        urlencoding::encode(&platform),
        result
    ))
}

#[derive(Serialize)]
struct ValidateResponse {
    platform: String,
    valid: bool,
    status: String,
}

/// POST /api/connections/:platform/validate
///
/// Runs the token validity chokepoint for this connection and reports the
/// resulting status. The token itself never leaves the server.
async fn validate_connection(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, AppError> {
    let user_id = resolve_user(&state, &headers)?;

    let limit = state.registry.get(&platform).map_err(AppError::from)?.rate_limit;
    if !state.limiter.check_and_consume(&user_id, &platform, &limit) {
        return Err(AppError::TooManyRequests(
            "Rate limit exceeded, try again shortly".to_string(),
        ));
    }

    match state.validity.valid_access_token(&user_id, &platform).await {
        Ok(_) => Ok(Json(ValidateResponse {
            platform,
            valid: true,
            status: "connected".to_string(),
        })),
        Err(TwinError::RevokedOrInvalid) | Err(TwinError::RefreshFailed) => {
            Ok(Json(ValidateResponse {
                platform,
                valid: false,
                status: "needs_reauth".to_string(),
            }))
        }
        Err(e) => Err(AppError::from(e)),
    }
}

/// DELETE /api/connections/:platform
///
/// Disconnect is reported as success even when no record existed.
async fn disconnect(
    State(state): State<Arc<ApiState>>,
    Path(platform): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let user_id = resolve_user(&state, &headers)?;
    state.flow.revoke(&user_id, &platform)?;

    Ok(Json(DisconnectResponse {
        success: true,
        platform,
    }))
}
