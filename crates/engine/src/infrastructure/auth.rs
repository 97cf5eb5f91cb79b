//! Static access-key token issuer.
//!
//! Agents are provisioned with one of a fixed set of access keys. Each
//! exchange mints an opaque bearer token that is accepted by the hub upgrade
//! until it expires.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use uuid::Uuid;

use crate::infrastructure::ports::{AuthError, ClockPort, IssuedToken, TokenIssuer};

pub struct StaticKeyTokenIssuer {
    access_keys: HashSet<String>,
    ttl: Duration,
    tokens: DashMap<String, chrono::DateTime<chrono::Utc>>,
    clock: Arc<dyn ClockPort>,
}

impl StaticKeyTokenIssuer {
    pub fn new(
        access_keys: impl IntoIterator<Item = String>,
        ttl: Duration,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            access_keys: access_keys.into_iter().collect(),
            ttl,
            tokens: DashMap::new(),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn purge_expired(&self) {
        let now = self.clock.now();
        self.tokens.retain(|_, expires_at| *expires_at > now);
    }
}

impl TokenIssuer for StaticKeyTokenIssuer {
    fn issue(&self, access_key: &str) -> Result<IssuedToken, AuthError> {
        if !self.access_keys.contains(access_key) {
            return Err(AuthError::InvalidAccessKey);
        }

        self.purge_expired();
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = self.clock.now() + self.ttl;
        self.tokens.insert(token.clone(), expires_at);

        Ok(IssuedToken { token, expires_at })
    }

    fn validate(&self, bearer: &str) -> Result<(), AuthError> {
        let expires_at = self
            .tokens
            .get(bearer)
            .map(|entry| *entry.value())
            .ok_or(AuthError::InvalidToken)?;

        if expires_at <= self.clock.now() {
            self.tokens.remove(bearer);
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }
}
