//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the registry of live sessions.

use crate::config::Config;
use plantai_core::domain::AuthSession;
use plantai_core::entitlement::EntitlementEngine;
use plantai_core::ports::{AuthService, ImageNormalizer, InferenceService};
use plantai_core::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: EntitlementEngine,
    pub auth: Arc<dyn AuthService>,
    pub inference: Arc<dyn InferenceService>,
    pub normalizer: Arc<dyn ImageNormalizer>,
    pub sessions: SessionRegistry,
    pub config: Arc<Config>,
}

//=========================================================================================
// SessionRegistry (access token -> live session)
//=========================================================================================

/// How long a registered token is trusted before it is checked with the provider again.
pub const REVALIDATE_AFTER: Duration = Duration::from_secs(300);

/// Sessions not verified for this long are dropped. Matches the cookie lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

struct Registered {
    session: Arc<Session>,
    verified_at: Instant,
}

/// Live sessions keyed by the provider's access token.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Registered>>>,
}

impl SessionRegistry {
    /// Creates the session for a fresh sign-in (or a restored token), loads
    /// its entitlement and registers it.
    pub async fn establish(&self, engine: &EntitlementEngine, auth_session: AuthSession) -> Arc<Session> {
        let session = Arc::new(Session::new(auth_session.user));
        session.bootstrap(engine).await;

        self.evict_expired(Instant::now()).await;
        let previous = self.inner.write().await.insert(
            auth_session.access_token,
            Registered {
                session: session.clone(),
                verified_at: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            previous.session.end();
        }
        info!("Session established for {}", session.user().id);
        session
    }

    /// The session for `token` and whether it still needs revalidation.
    pub async fn lookup(&self, token: &str) -> Option<(Arc<Session>, bool)> {
        let sessions = self.inner.read().await;
        sessions
            .get(token)
            .map(|r| (r.session.clone(), r.verified_at.elapsed() >= REVALIDATE_AFTER))
    }

    pub async fn mark_verified(&self, token: &str) {
        if let Some(registered) = self.inner.write().await.get_mut(token) {
            registered.verified_at = Instant::now();
        }
    }

    /// Removes and ends the session for `token`.
    pub async fn remove(&self, token: &str) -> Option<Arc<Session>> {
        let removed = self.inner.write().await.remove(token).map(|r| r.session);
        if let Some(session) = &removed {
            session.end();
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Ends and drops every session last verified more than [`SESSION_TTL`]
    /// before `now`. Returns how many were dropped.
    pub async fn evict_expired(&self, now: Instant) -> usize {
        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        sessions.retain(|_, r| {
            let alive = now.saturating_duration_since(r.verified_at) < SESSION_TTL;
            if !alive {
                r.session.end();
            }
            alive
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("Evicted {} expired sessions", evicted);
        }
        evicted
    }

    /// Runs [`SessionRegistry::evict_expired`] every `every` until the runtime stops.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                registry.evict_expired(Instant::now()).await;
            }
        })
    }
}
