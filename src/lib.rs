// Connection API surface
pub mod api;

// Bearer-token user extraction
pub mod auth;

// Startup configuration and client credentials
pub mod config;

// AES-256-GCM token encryption
pub mod crypto;

// Error taxonomy
pub mod error;

// Authorization flow, CSRF state, token exchange
pub mod oauth;

// Platform registry
pub mod platforms;

// Per-platform rate-limit bookkeeping
pub mod rate_limit;

// Persisted platform connections
pub mod store;

// Token validity chokepoint
pub mod validity;
