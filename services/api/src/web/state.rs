//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the bearer-session registry.

use crate::config::Config;
use chrono::{DateTime, Duration, Utc};
use getitdone_core::{Clock, EntityStore, Marketplace, SystemClock, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub market: Marketplace,
    pub sessions: AuthSessions,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>, config: Arc<Config>) -> Self {
        Self {
            market: Marketplace::new(store, clock.clone()),
            sessions: AuthSessions::default(),
            config,
            clock,
        }
    }

    /// A state backed by an empty in-memory store and the wall clock.
    pub fn in_memory(config: Arc<Config>) -> Self {
        Self::new(Arc::new(EntityStore::in_memory()), Arc::new(SystemClock), config)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.config.session_ttl_hours)
    }
}

//=========================================================================================
// AuthSessions (Bearer Tokens)
//=========================================================================================

#[derive(Debug, Clone)]
struct AuthSession {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// Live bearer tokens, held in process memory.
#[derive(Default)]
pub struct AuthSessions {
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl AuthSessions {
    /// Issues a fresh token for `user_id`.
    pub async fn create(&self, user_id: UserId, expires_at: DateTime<Utc>) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(
            token.clone(),
            AuthSession {
                user_id,
                expires_at,
            },
        );
        token
    }

    /// The user behind `token`, if it exists and has not expired at `now`.
    /// Expired tokens are dropped on sight.
    pub async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Option<UserId> {
        let session = self.sessions.read().await.get(token).cloned()?;
        if session.expires_at <= now {
            self.sessions.write().await.remove(token);
            return None;
        }
        Some(session.user_id)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_expire_and_revoke() {
        let sessions = AuthSessions::default();
        let now = Utc::now();
        let token = sessions.create(7, now + Duration::hours(1)).await;

        assert_eq!(sessions.resolve(&token, now).await, Some(7));
        assert_eq!(sessions.resolve(&token, now + Duration::hours(2)).await, None);
        // Expired tokens are gone for good.
        assert_eq!(sessions.resolve(&token, now).await, None);

        let other = sessions.create(8, now + Duration::hours(1)).await;
        assert!(sessions.revoke(&other).await);
        assert!(!sessions.revoke(&other).await);
        assert_eq!(sessions.resolve("not-a-token", now).await, None);
    }
}
