//! CSRF state tokens for the OAuth authorization flow.
//!
//! Each connect attempt issues a single-use random token binding the
//! browser redirect back to the user and platform that initiated it.
//! Tokens expire after a short TTL and are deleted on first consume, so a
//! replayed or forged callback never authorizes an exchange.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex};

/// What a state token was issued for.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub user_id: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory store of pending CSRF states with automatic expiry.
#[derive(Clone)]
pub struct StateStore {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    ttl: Duration,
}

impl StateStore {
    /// `ttl_seconds` is how long an issued state stays valid (default 600).
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Issue a new state token for a connect attempt.
    ///
    /// The token is 16 cryptographically random bytes, hex-encoded.
    pub fn issue(&self, user_id: &str, platform: &str) -> String {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = bytes.iter().fold(String::with_capacity(32), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        });

        let entry = StateEntry {
            user_id: user_id.to_string(),
            platform: platform.to_string(),
            created_at: Utc::now(),
        };

        self.states.lock().unwrap().insert(token.clone(), entry);
        token
    }

    /// Atomically fetch-and-delete a state token.
    ///
    /// Returns `None` when the token is absent, already consumed, or
    /// expired — callers must treat all three identically as an
    /// authorization failure.
    pub fn consume(&self, token: &str) -> Option<StateEntry> {
        let mut states = self.states.lock().unwrap();

        // Removed unconditionally: an expired token must not survive a
        // failed consume either
        let entry = states.remove(token)?;

        if Utc::now() - entry.created_at > self.ttl {
            return None;
        }

        Some(entry)
    }

    /// Drop expired entries. Called periodically by the eviction task.
    pub fn evict_expired(&self) {
        let now = Utc::now();
        self.states
            .lock()
            .unwrap()
            .retain(|_, entry| now - entry.created_at <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background task that periodically evicts expired states.
pub async fn run_state_eviction(store: StateStore, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        store.evict_expired();
        tracing::debug!(pending = store.len(), "OAuth state eviction complete");
    }
}
