//! Startup configuration.
//!
//! Non-secret settings load from a TOML file with per-field defaults.
//! Secrets come from the environment and are never written to disk or
//! logged: the master encryption key from `TWINLINK_ENCRYPTION_KEY`
//! (base64, 32 bytes) and per-platform client credentials from
//! `TWINLINK_OAUTH_{PLATFORM}_CLIENT_ID` / `TWINLINK_OAUTH_{PLATFORM}_CLIENT_SECRET`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::platforms::PlatformRegistry;

/// Complete twinlink configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TwinConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Public base URL providers redirect back to.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    /// Frontend page the callback redirects to after a connect attempt.
    #[serde(default = "default_post_connect_redirect")]
    pub post_connect_redirect: String,
    /// When false, requests without a bearer token act as the default user.
    #[serde(default)]
    pub auth_enabled: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_post_connect_redirect() -> String {
    "http://localhost:3000/connections".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            callback_base_url: default_callback_base_url(),
            post_connect_redirect: default_post_connect_redirect(),
            auth_enabled: false,
        }
    }
}

/// Connection store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "twinlink.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// OAuth flow tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long a CSRF state token stays valid.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    /// Bound on every outbound provider call.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_seconds: u64,
    /// Refresh this long before the access token actually expires.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_seconds: i64,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_upstream_timeout() -> u64 {
    10
}

fn default_refresh_margin() -> i64 {
    90
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            upstream_timeout_seconds: default_upstream_timeout(),
            refresh_margin_seconds: default_refresh_margin(),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<TwinConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: TwinConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// A platform's OAuth client id and secret.
#[derive(Clone)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
}

/// Per-platform client credentials, loaded once at startup and immutable
/// afterwards.
#[derive(Default)]
pub struct ClientCredentials {
    credentials: HashMap<String, Credential>,
}

impl ClientCredentials {
    /// Read credentials from the environment for every registered platform.
    /// Platforms without both variables set are simply absent.
    pub fn from_env(registry: &PlatformRegistry) -> Self {
        let mut credentials = HashMap::new();
        for id in registry.ids() {
            let prefix = id.to_uppercase();
            let client_id = std::env::var(format!("TWINLINK_OAUTH_{prefix}_CLIENT_ID")).ok();
            let client_secret =
                std::env::var(format!("TWINLINK_OAUTH_{prefix}_CLIENT_SECRET")).ok();
            if let (Some(client_id), Some(client_secret)) = (client_id, client_secret) {
                credentials.insert(
                    id.to_string(),
                    Credential {
                        client_id,
                        client_secret,
                    },
                );
            }
        }
        Self { credentials }
    }

    /// Register credentials directly (tests and embedding callers).
    pub fn insert(&mut self, platform: &str, client_id: &str, client_secret: &str) {
        self.credentials.insert(
            platform.to_string(),
            Credential {
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
            },
        );
    }

    pub fn get(&self, platform: &str) -> Option<&Credential> {
        self.credentials.get(platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TwinConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:4000");
        assert_eq!(config.storage.database_path, "twinlink.db");
        assert_eq!(config.oauth.state_ttl_seconds, 600);
        assert_eq!(config.oauth.upstream_timeout_seconds, 10);
        assert_eq!(config.oauth.refresh_margin_seconds, 90);
        assert!(!config.server.auth_enabled);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:8080"
            callback_base_url = "https://twin.example.com"
            post_connect_redirect = "https://app.example.com/connections"
            auth_enabled = true

            [storage]
            database_path = "/var/lib/twinlink/connections.db"

            [oauth]
            state_ttl_seconds = 300
            upstream_timeout_seconds = 5
            refresh_margin_seconds = 120
        "#;

        let config: TwinConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.server.callback_base_url, "https://twin.example.com");
        assert!(config.server.auth_enabled);
        assert_eq!(
            config.storage.database_path,
            "/var/lib/twinlink/connections.db"
        );
        assert_eq!(config.oauth.state_ttl_seconds, 300);
        assert_eq!(config.oauth.upstream_timeout_seconds, 5);
        assert_eq!(config.oauth.refresh_margin_seconds, 120);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
            [oauth]
            state_ttl_seconds = 120
        "#;

        let config: TwinConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.oauth.state_ttl_seconds, 120);
        assert_eq!(config.oauth.upstream_timeout_seconds, 10); // default
        assert_eq!(config.server.bind_addr, "0.0.0.0:4000"); // default
    }

    #[test]
    fn test_client_credentials_insert_and_get() {
        let mut creds = ClientCredentials::default();
        creds.insert("spotify", "cid", "secret");

        assert!(creds.get("spotify").is_some());
        assert_eq!(creds.get("spotify").unwrap().client_id, "cid");
        assert!(creds.get("github").is_none());
    }
}
