//! Platform registry: static OAuth and API configuration per platform.
//!
//! Per-platform quirks (GitHub's non-expiring tokens and `token` auth
//! scheme, Reddit's bearer-only API host, and so on) live here as data so
//! the flow controller and validity manager stay platform-agnostic.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::TwinError;

/// Authorization header scheme for a platform's API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TokenType {
    Bearer,
    /// GitHub's `Authorization: token <value>` scheme
    Token,
}

impl TokenType {
    pub fn scheme(&self) -> &'static str {
        match self {
            TokenType::Bearer => "Bearer",
            TokenType::Token => "token",
        }
    }
}

/// Rate limit a platform enforces on API requests.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RateLimit {
    pub requests: u64,
    pub window_seconds: u64,
}

/// Immutable OAuth and API configuration for one platform.
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub id: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub api_base_url: String,
    /// Named API paths, relative to `api_base_url`. Always includes
    /// `profile`, the lightweight endpoint used for validation probes.
    pub endpoints: HashMap<String, String>,
    pub token_type: TokenType,
    /// Whether the provider issues refresh tokens. Non-refreshable
    /// platforms are validated with a live probe instead.
    pub refreshable: bool,
    pub rate_limit: RateLimit,
}

impl PlatformConfig {
    /// Build the authorization redirect URL for this platform.
    pub fn build_auth_url(&self, client_id: &str, redirect_uri: &str, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.auth_url,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    /// Absolute URL for a named endpoint, or None if the platform does not
    /// define it.
    pub fn endpoint_url(&self, name: &str) -> Option<String> {
        self.endpoints
            .get(name)
            .map(|path| format!("{}{}", self.api_base_url, path))
    }

    /// Absolute URL of the validation probe endpoint. Every platform entry
    /// defines `profile`.
    pub fn probe_url(&self) -> String {
        self.endpoint_url("profile")
            .unwrap_or_else(|| self.api_base_url.clone())
    }
}

/// Read-only lookup of platform configurations, built once at startup.
pub struct PlatformRegistry {
    platforms: HashMap<String, PlatformConfig>,
}

impl PlatformRegistry {
    /// Registry of the seven supported platforms.
    pub fn new() -> Self {
        Self::with_platforms(builtin_platforms())
    }

    /// Registry over an explicit platform set (tests and embedders that
    /// point at non-production endpoints).
    pub fn with_platforms(platforms: Vec<PlatformConfig>) -> Self {
        Self {
            platforms: platforms.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Result<&PlatformConfig, TwinError> {
        self.platforms
            .get(id)
            .ok_or_else(|| TwinError::UnknownPlatform(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.platforms.contains_key(id)
    }

    /// Platform ids in stable (sorted) order, for listing APIs.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.platforms.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct PlatformSpec {
    id: &'static str,
    auth_url: &'static str,
    token_url: &'static str,
    scopes: &'static [&'static str],
    api_base_url: &'static str,
    endpoints: &'static [(&'static str, &'static str)],
    token_type: TokenType,
    refreshable: bool,
    rate_limit: RateLimit,
}

impl From<PlatformSpec> for PlatformConfig {
    fn from(spec: PlatformSpec) -> Self {
        PlatformConfig {
            id: spec.id.to_string(),
            auth_url: spec.auth_url.to_string(),
            token_url: spec.token_url.to_string(),
            scopes: spec.scopes.iter().map(|s| s.to_string()).collect(),
            api_base_url: spec.api_base_url.to_string(),
            endpoints: spec
                .endpoints
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            token_type: spec.token_type,
            refreshable: spec.refreshable,
            rate_limit: spec.rate_limit,
        }
    }
}

fn builtin_platforms() -> Vec<PlatformConfig> {
    [
        PlatformSpec {
            id: "spotify",
            auth_url: "https://accounts.spotify.com/authorize",
            token_url: "https://accounts.spotify.com/api/token",
            scopes: &[
                "user-read-recently-played",
                "user-top-read",
                "user-library-read",
                "playlist-read-private",
            ],
            api_base_url: "https://api.spotify.com/v1",
            endpoints: &[
                ("profile", "/me"),
                ("recently_played", "/me/player/recently-played"),
                ("top_artists", "/me/top/artists"),
                ("top_tracks", "/me/top/tracks"),
            ],
            token_type: TokenType::Bearer,
            refreshable: true,
            rate_limit: RateLimit {
                requests: 180,
                window_seconds: 60,
            },
        },
        PlatformSpec {
            id: "youtube",
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            scopes: &["https://www.googleapis.com/auth/youtube.readonly"],
            api_base_url: "https://www.googleapis.com/youtube/v3",
            endpoints: &[
                ("profile", "/channels?part=snippet&mine=true"),
                ("subscriptions", "/subscriptions?part=snippet&mine=true"),
                ("playlists", "/playlists?part=snippet&mine=true"),
            ],
            token_type: TokenType::Bearer,
            refreshable: true,
            rate_limit: RateLimit {
                requests: 100,
                window_seconds: 100,
            },
        },
        PlatformSpec {
            id: "discord",
            auth_url: "https://discord.com/oauth2/authorize",
            token_url: "https://discord.com/api/oauth2/token",
            scopes: &["identify", "guilds"],
            api_base_url: "https://discord.com/api/v10",
            endpoints: &[("profile", "/users/@me"), ("guilds", "/users/@me/guilds")],
            token_type: TokenType::Bearer,
            refreshable: true,
            rate_limit: RateLimit {
                requests: 50,
                window_seconds: 1,
            },
        },
        PlatformSpec {
            id: "github",
            auth_url: "https://github.com/login/oauth/authorize",
            token_url: "https://github.com/login/oauth/access_token",
            scopes: &["user", "repo:read"],
            api_base_url: "https://api.github.com",
            endpoints: &[
                ("profile", "/user"),
                ("repos", "/user/repos?sort=updated&per_page=30"),
                ("starred", "/user/starred?per_page=30"),
            ],
            token_type: TokenType::Token,
            refreshable: false,
            rate_limit: RateLimit {
                requests: 5000,
                window_seconds: 3600,
            },
        },
        PlatformSpec {
            id: "reddit",
            auth_url: "https://www.reddit.com/api/v1/authorize",
            token_url: "https://www.reddit.com/api/v1/access_token",
            scopes: &["identity", "history", "read"],
            api_base_url: "https://oauth.reddit.com",
            endpoints: &[
                ("profile", "/api/v1/me"),
                ("saved", "/user/me/saved"),
                ("upvoted", "/user/me/upvoted"),
            ],
            token_type: TokenType::Bearer,
            refreshable: true,
            rate_limit: RateLimit {
                requests: 60,
                window_seconds: 60,
            },
        },
        PlatformSpec {
            id: "slack",
            auth_url: "https://slack.com/oauth/v2/authorize",
            token_url: "https://slack.com/api/oauth.v2.access",
            scopes: &["users:read", "channels:history"],
            api_base_url: "https://slack.com/api",
            endpoints: &[
                ("profile", "/auth.test"),
                ("conversations", "/conversations.list"),
            ],
            token_type: TokenType::Bearer,
            refreshable: false,
            rate_limit: RateLimit {
                requests: 50,
                window_seconds: 60,
            },
        },
        PlatformSpec {
            id: "linkedin",
            auth_url: "https://www.linkedin.com/oauth/v2/authorization",
            token_url: "https://www.linkedin.com/oauth/v2/accessToken",
            scopes: &["r_liteprofile", "r_emailaddress"],
            api_base_url: "https://api.linkedin.com/v2",
            endpoints: &[("profile", "/me")],
            token_type: TokenType::Bearer,
            refreshable: false,
            rate_limit: RateLimit {
                requests: 100,
                window_seconds: 86400,
            },
        },
    ]
    .into_iter()
    .map(PlatformConfig::from)
    .collect()
}
