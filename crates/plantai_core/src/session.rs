//! crates/plantai_core/src/session.rs
//!
//! The per-session state holder. Session and entitlement live in one explicit
//! value, [`SessionPhase`], updated only through pure transition functions and
//! published on a watch channel so views can subscribe to changes.

use crate::domain::{AnalysisRecord, AuthUser, EntitlementState};
use crate::entitlement::{EntitlementEngine, RecordOutcome};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("The session has no loaded entitlement")]
    NotReady,
}

//=========================================================================================
// Session Phase (pure transitions)
//=========================================================================================

/// `Unauthenticated -> Loading -> Ready -> {Ready | Unauthenticated}`.
/// There is no error phase: loading always ends in `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Loading { user: AuthUser },
    Ready { user: AuthUser, entitlement: EntitlementState },
}

impl SessionPhase {
    pub fn begin_loading(user: AuthUser) -> Self {
        SessionPhase::Loading { user }
    }

    /// Settles a load. A load that finishes after logout is discarded.
    pub fn loaded(self, entitlement: EntitlementState) -> Self {
        match self {
            SessionPhase::Loading { user } | SessionPhase::Ready { user, .. } => {
                SessionPhase::Ready { user, entitlement }
            }
            SessionPhase::Unauthenticated => SessionPhase::Unauthenticated,
        }
    }

    pub fn apply_record(self, record: AnalysisRecord) -> Self {
        match self {
            SessionPhase::Ready { user, entitlement } => SessionPhase::Ready {
                user,
                entitlement: entitlement.with_record(record),
            },
            other => other,
        }
    }

    pub fn apply_premium(self) -> Self {
        match self {
            SessionPhase::Ready { user, entitlement } => SessionPhase::Ready {
                user,
                entitlement: entitlement.with_premium(),
            },
            other => other,
        }
    }

    pub fn ended(self) -> Self {
        SessionPhase::Unauthenticated
    }

    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            SessionPhase::Unauthenticated => None,
            SessionPhase::Loading { user } | SessionPhase::Ready { user, .. } => Some(user),
        }
    }

    pub fn entitlement(&self) -> Option<&EntitlementState> {
        match self {
            SessionPhase::Ready { entitlement, .. } => Some(entitlement),
            _ => None,
        }
    }
}

//=========================================================================================
// Session Holder
//=========================================================================================

/// One authenticated session. Created on sign-in or session restore and
/// discarded on logout.
pub struct Session {
    user: AuthUser,
    tx: watch::Sender<SessionPhase>,
}

impl Session {
    pub fn new(user: AuthUser) -> Self {
        let (tx, _rx) = watch::channel(SessionPhase::begin_loading(user.clone()));
        Self { user, tx }
    }

    pub fn user(&self) -> &AuthUser {
        &self.user
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.tx.borrow().clone()
    }

    pub fn entitlement(&self) -> Option<EntitlementState> {
        self.tx.borrow().entitlement().cloned()
    }

    fn transition(&self, f: impl FnOnce(SessionPhase) -> SessionPhase) {
        self.tx.send_modify(|phase| {
            let current = std::mem::replace(phase, SessionPhase::Unauthenticated);
            *phase = f(current);
        });
    }

    /// Loads the entitlement from the store. Always ends `Ready` unless the
    /// session was ended meanwhile.
    pub async fn bootstrap(&self, engine: &EntitlementEngine) -> EntitlementState {
        let user = self.user.clone();
        self.transition(|_| SessionPhase::begin_loading(user));

        let entitlement = engine.load_entitlement(&self.user).await;
        debug!(
            "Session for {} ready: premium={}, history={}",
            self.user.id,
            entitlement.is_premium,
            entitlement.analyses.len()
        );
        self.transition(|phase| phase.loaded(entitlement.clone()));
        entitlement
    }

    /// Records a finished analysis against the current state.
    ///
    /// The store write happens even if the session left `Ready` while the
    /// diagnosis was running; only the in-memory update is skipped then.
    pub async fn record(
        &self,
        engine: &EntitlementEngine,
        raw_text: String,
        image_url: String,
    ) -> RecordOutcome {
        let snapshot = self.entitlement().unwrap_or_else(|| {
            debug!("Session for {} not ready, recording against defaults", self.user.id);
            engine.anonymous()
        });
        let mut outcome = engine
            .record_analysis(snapshot, &self.user.id, raw_text, image_url)
            .await;

        // Re-apply onto whatever the state is now, not the pre-await snapshot.
        let record = outcome.record.clone();
        self.transition(|phase| phase.apply_record(record));
        if let Some(current) = self.entitlement() {
            outcome.state = current;
        }
        outcome
    }

    pub async fn upgrade(&self, engine: &EntitlementEngine) -> Result<EntitlementState, SessionError> {
        let snapshot = self.entitlement().ok_or(SessionError::NotReady)?;
        let upgraded = engine.upgrade(snapshot, &self.user.id).await;
        self.transition(SessionPhase::apply_premium);
        Ok(self.entitlement().unwrap_or(upgraded))
    }

    /// Logout. Subscribers observe `Unauthenticated`.
    pub fn end(&self) {
        info!("Ending session for {}", self.user.id);
        self.transition(SessionPhase::ended);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Credits;
    use crate::entitlement::tests::{alice, BrokenStore, FakeStore};
    use std::sync::Arc;

    fn engine() -> EntitlementEngine {
        EntitlementEngine::new(Arc::new(FakeStore::default()), 3)
    }

    #[tokio::test]
    async fn bootstrap_moves_loading_to_ready() {
        let session = Session::new(alice());
        assert!(matches!(session.phase(), SessionPhase::Loading { .. }));
        assert!(session.entitlement().is_none());

        session.bootstrap(&engine()).await;
        let entitlement = session.entitlement().expect("ready");
        assert_eq!(entitlement.credits_remaining(), Credits::Remaining(3));
    }

    #[tokio::test]
    async fn bootstrap_against_a_broken_store_still_ends_ready() {
        let session = Session::new(alice());
        session
            .bootstrap(&EntitlementEngine::new(Arc::new(BrokenStore), 3))
            .await;
        assert_eq!(session.entitlement(), Some(EntitlementState::anonymous(3)));
    }

    #[tokio::test]
    async fn subscribers_see_recorded_analyses_and_logout() {
        let engine = engine();
        let session = Session::new(alice());
        let mut rx = session.subscribe();
        session.bootstrap(&engine).await;

        session.record(&engine, "texto".into(), "data:z".into()).await;
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.entitlement().unwrap().analyses.len(), 1);

        session.end();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn record_after_logout_still_reaches_the_store() {
        let store = Arc::new(FakeStore::default());
        let engine = EntitlementEngine::new(store.clone(), 3);
        let session = Session::new(alice());
        session.bootstrap(&engine).await;
        session.end();

        let outcome = session.record(&engine, "texto".into(), "data:z".into()).await;
        assert_eq!(outcome.record.raw_text, "texto");
        assert!(outcome.warning.is_none());
        assert_eq!(store.analyses.lock().unwrap().len(), 1);
        assert_eq!(session.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn upgrade_updates_the_published_state() {
        let engine = engine();
        let session = Session::new(alice());
        session.bootstrap(&engine).await;

        let upgraded = session.upgrade(&engine).await.unwrap();
        assert!(upgraded.is_premium);
        assert_eq!(session.entitlement().unwrap().credits_remaining(), Credits::Unlimited);
    }

    #[test]
    fn late_load_after_logout_is_discarded() {
        let phase = SessionPhase::begin_loading(alice()).ended();
        assert_eq!(phase.loaded(EntitlementState::anonymous(3)), SessionPhase::Unauthenticated);
    }
}
