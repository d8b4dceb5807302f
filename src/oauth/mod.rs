//! OAuth 2.0 authorization-code flow for platform connections.
//!
//! 1. User clicks "Connect" in the frontend
//! 2. `GET /api/oauth/:platform/start` → redirect to provider
//! 3. User authorizes on the provider's site
//! 4. Provider redirects to `/api/oauth/:platform/callback`
//! 5. Code is exchanged for tokens, encrypted, and persisted
//! 6. The connection is `Connected`; extraction may request valid tokens

pub mod exchange;
pub mod flow;
pub mod state;

pub use exchange::{OAuthHttp, ProbeOutcome, ProviderTokens};
pub use flow::{CallbackOutcome, CallbackParams, FlowController};
pub use state::{run_state_eviction, StateStore};
