// Integration tests for the connection API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use twinlink::api::{create_api_router, ApiState};
use twinlink::config::ClientCredentials;
use twinlink::crypto::TokenCipher;
use twinlink::oauth::{FlowController, OAuthHttp, StateStore};
use twinlink::platforms::{PlatformConfig, PlatformRegistry, RateLimit, TokenType};
use twinlink::rate_limit::RateLimiter;
use twinlink::store::ConnectionStore;
use twinlink::validity::ValidityManager;

fn test_registry() -> Arc<PlatformRegistry> {
    Arc::new(PlatformRegistry::new())
}

/// A registry with one fake platform whose rate limit is exhausted after
/// two requests. Endpoints point nowhere; these tests never reach them.
fn tight_limit_registry() -> Arc<PlatformRegistry> {
    Arc::new(PlatformRegistry::with_platforms(vec![PlatformConfig {
        id: "spotify".to_string(),
        auth_url: "http://127.0.0.1:1/authorize".to_string(),
        token_url: "http://127.0.0.1:1/token".to_string(),
        scopes: vec!["user-top-read".to_string()],
        api_base_url: "http://127.0.0.1:1".to_string(),
        endpoints: HashMap::from([("profile".to_string(), "/me".to_string())]),
        token_type: TokenType::Bearer,
        refreshable: true,
        rate_limit: RateLimit {
            requests: 2,
            window_seconds: 3600,
        },
    }]))
}

fn create_test_app_with(registry: Arc<PlatformRegistry>, auth_enabled: bool) -> Router {
    let connections = Arc::new(ConnectionStore::new(":memory:").unwrap());
    let cipher = Arc::new(TokenCipher::new([0u8; 32]));
    let http = Arc::new(OAuthHttp::new(Duration::from_secs(2)));

    let mut credentials = ClientCredentials::default();
    credentials.insert("github", "test-client-id", "test-client-secret");
    credentials.insert("spotify", "test-client-id", "test-client-secret");

    let flow = Arc::new(FlowController::new(
        Arc::clone(&registry),
        StateStore::new(600),
        Arc::clone(&connections),
        Arc::clone(&cipher),
        Arc::new(credentials),
        Arc::clone(&http),
        "http://localhost:4000".to_string(),
    ));

    let validity = Arc::new(ValidityManager::new(
        Arc::clone(&registry),
        Arc::clone(&connections),
        Arc::clone(&cipher),
        Arc::clone(&flow),
        http,
        90,
    ));

    create_api_router(ApiState {
        registry,
        connections,
        flow,
        validity,
        limiter: Arc::new(RateLimiter::new()),
        auth_enabled,
        post_connect_redirect: "http://localhost:3000/connections".to_string(),
    })
}

fn create_test_app() -> Router {
    create_test_app_with(test_registry(), false)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get("location")
        .expect("no location header")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_list_platforms() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/platforms")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let platforms = json["platforms"].as_array().unwrap();
    assert_eq!(platforms.len(), 7);

    let ids: Vec<&str> = platforms
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    for id in [
        "discord", "github", "linkedin", "reddit", "slack", "spotify", "youtube",
    ] {
        assert!(ids.contains(&id), "missing platform {id}");
    }

    let github = platforms
        .iter()
        .find(|p| p["id"] == "github")
        .unwrap();
    assert_eq!(github["refreshable"], false);
    assert_eq!(
        github["scopes"],
        serde_json::json!(["user", "repo:read"])
    );
}

#[tokio::test]
async fn test_list_connections_empty() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/connections")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["connections"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_oauth_start_redirects_to_provider() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/oauth/github/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let url = location(&response);
    assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
    assert!(url.contains("client_id=test-client-id"));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("scope=user%20repo%3Aread"));
    assert!(url.contains("state="));
    assert!(url.contains(
        "redirect_uri=http%3A%2F%2Flocalhost%3A4000%2Fapi%2Foauth%2Fgithub%2Fcallback"
    ));
}

#[tokio::test]
async fn test_oauth_start_unknown_platform() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/oauth/myspace/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oauth_start_unconfigured_platform() {
    // Registry knows spotify and github, credentials only cover those two;
    // reddit has no client id and must not start a flow
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/oauth/reddit/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("TWINLINK_OAUTH_REDDIT_CLIENT_ID"));
}

#[tokio::test]
async fn test_callback_invalid_state_redirects_with_error() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/oauth/github/callback?code=abc&state=deadbeefdeadbeefdeadbeefdeadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Browser always gets a redirect, never an error page
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let url = location(&response);
    assert_eq!(
        url,
        "http://localhost:3000/connections?platform=github&result=error"
    );
}

#[tokio::test]
async fn test_callback_user_denied_redirects_with_cancelled() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/oauth/github/callback?error=access_denied")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let url = location(&response);
    assert_eq!(
        url,
        "http://localhost:3000/connections?platform=github&result=cancelled"
    );
}

#[tokio::test]
async fn test_disconnect_without_connection_still_succeeds() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/connections/spotify")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["platform"], "spotify");
}

#[tokio::test]
async fn test_validate_not_connected() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/connections/spotify/validate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validate_rate_limited() {
    let app = create_test_app_with(tight_limit_registry(), false);

    // Two requests drain the budget (both fail with 404, but they consume)
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/connections/spotify/validate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/connections/spotify/validate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_auth_required_when_enabled() {
    let app = create_test_app_with(test_registry(), true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/connections")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/connections")
                .header("Authorization", "Bearer user-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
