//! Session-token capability.
//!
//! The channel and the registry only consume tokens: the client asks a
//! [`TokenProvider`] for one before each connection attempt, and the server
//! hands the token from the handshake to a [`TokenVerifier`], which either
//! yields the [`Identity`] or rejects it. How tokens are minted is up to the
//! [`TokenIssuer`].
//!
//! [`MemoryTokenStore`] is an in-process issuer/verifier pair for tests and
//! the demo server. Its tokens are random and opaque, and they expire after
//! [`TOKEN_TTL_HOURS`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::constants::TOKEN_TTL_HOURS;
use crate::error::TokenError;
use crate::types::Identity;

/// Client-side source of session tokens.
pub trait TokenProvider: Send + Sync + 'static {
    /// The current token, or `None` when the user is not signed in.
    fn session_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn session_token(&self) -> Option<String> {
        self()
    }
}

/// A provider that always yields the same token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn session_token(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

/// Server-side token verification.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token` and extract the identity it was issued for.
    fn verify(&self, token: &str) -> Result<Identity, TokenError>;
}

/// Mints session tokens for an identity.
pub trait TokenIssuer: Send + Sync + 'static {
    /// Issue a fresh token for `identity`.
    fn issue(&self, identity: &Identity) -> String;
}

#[derive(Debug, Clone)]
struct Grant {
    identity: Identity,
    expires_at: DateTime<Utc>,
}

/// In-memory token store implementing both [`TokenIssuer`] and [`TokenVerifier`].
#[derive(Debug)]
pub struct MemoryTokenStore {
    grants: RwLock<HashMap<String, Grant>>,
    ttl: Duration,
}

impl MemoryTokenStore {
    /// A store whose tokens live for [`TOKEN_TTL_HOURS`].
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(TOKEN_TTL_HOURS))
    }

    /// A store with a custom token lifetime.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Invalidate a token. Returns `true` if it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.grants.write().remove(token).is_some()
    }

    /// Drop every expired grant, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut grants = self.grants.write();
        let before = grants.len();
        grants.retain(|_, grant| grant.expires_at > now);
        before - grants.len()
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenIssuer for MemoryTokenStore {
    fn issue(&self, identity: &Identity) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let grant = Grant {
            identity: identity.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        self.grants.write().insert(token.clone(), grant);
        tracing::debug!(identity = %identity, "Issued session token");
        token
    }
}

impl TokenVerifier for MemoryTokenStore {
    fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        let grants = self.grants.read();
        let grant = grants.get(token).ok_or(TokenError::Invalid)?;
        if grant.expires_at <= Utc::now() {
            return Err(TokenError::Expired);
        }
        Ok(grant.identity.clone())
    }
}
