//! crates/plantai_core/src/entitlement.rs
//!
//! The entitlement engine: decides how many free analyses a user has left and
//! reconciles the session's optimistic state with the hosted profile store.
//!
//! Store failures never escape this module. Reads degrade to defaults, writes
//! are best-effort, and the only failure reported back is the
//! [`PersistenceWarning`] attached to a recorded analysis.

use crate::domain::{AnalysisRecord, AuthUser, EntitlementState, Profile, UserId};
use crate::ports::{PortError, ProfileStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Shown when an analysis succeeded but could not be written to history.
pub const SAVE_WARNING: &str =
    "A análise foi concluída, mas não foi possível salvá-la no seu histórico permanente.";

//=========================================================================================
// Persistence Warning
//=========================================================================================

/// Why a completed analysis is missing from the permanent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFailure {
    /// The user's profile row does not exist (foreign key violation).
    ProfileMissing,
    /// The history table has not been created.
    HistoryTableMissing,
    Unavailable,
}

/// Non-blocking notice returned alongside a recorded analysis whose store
/// write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceWarning {
    pub reason: SaveFailure,
    pub message: &'static str,
}

impl PersistenceWarning {
    fn from_error(err: &PortError) -> Self {
        let reason = match err {
            PortError::MissingReference(_) => SaveFailure::ProfileMissing,
            PortError::MissingRelation(_) => SaveFailure::HistoryTableMissing,
            _ => SaveFailure::Unavailable,
        };
        Self {
            reason,
            message: SAVE_WARNING,
        }
    }

    /// The save-path error text for the specific failure.
    pub fn detail(&self) -> &'static str {
        match self.reason {
            SaveFailure::ProfileMissing => {
                "Erro de integridade: Perfil de usuário não encontrado no banco de dados."
            }
            SaveFailure::HistoryTableMissing => {
                "Erro: A tabela de histórico não existe no banco de dados."
            }
            SaveFailure::Unavailable => "Erro ao salvar a análise no histórico.",
        }
    }
}

/// The result of [`EntitlementEngine::record_analysis`].
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub state: EntitlementState,
    pub record: AnalysisRecord,
    /// `None` when the record reached the store.
    pub warning: Option<PersistenceWarning>,
}

//=========================================================================================
// The Engine
//=========================================================================================

/// Owns the credit policy and the reconciliation rules against a [`ProfileStore`].
#[derive(Clone)]
pub struct EntitlementEngine {
    store: Arc<dyn ProfileStore>,
    free_quota: u32,
}

impl EntitlementEngine {
    pub fn new(store: Arc<dyn ProfileStore>, free_quota: u32) -> Self {
        Self { store, free_quota }
    }

    /// The state of a signed-out visitor.
    pub fn anonymous(&self) -> EntitlementState {
        EntitlementState::anonymous(self.free_quota)
    }

    /// Builds the session's entitlement from the store.
    ///
    /// Never fails: every store error degrades to a default, and a store that
    /// cannot be reached at all yields [`EntitlementEngine::anonymous`]. The
    /// history is read regardless of how the profile read went, so credits
    /// always follow the stored analyses.
    pub async fn load_entitlement(&self, user: &AuthUser) -> EntitlementState {
        // 1. Profile, for the premium flag.
        let (profile, unreachable) = match self.store.get_profile(&user.id).await {
            Ok(profile) => (profile, false),
            Err(e) => {
                warn!("Profile fetch warning (might not exist yet): {}", e);
                (None, matches!(e, PortError::Unexpected(_)))
            }
        };

        // 2. History, to derive the credits.
        let analyses = self.load_history(&user.id).await;
        let state = |is_premium: bool| EntitlementState {
            is_premium,
            analyses: analyses.clone(),
            free_quota: self.free_quota,
        };

        if let Some(profile) = profile {
            return state(profile.is_premium);
        }
        if unreachable {
            // Store unreachable: skip the create.
            return state(false);
        }

        // 3. No row yet: create it, unless a server-side trigger beat us to it.
        let new_profile = Profile::free(user.id.clone(), user.email.clone());
        match self.store.create_profile(&new_profile).await {
            Ok(()) => {
                debug!("Created profile for {}", user.id);
                state(false)
            }
            Err(PortError::Conflict(_)) | Err(PortError::PermissionDenied(_)) => {
                match self.store.get_profile(&user.id).await {
                    Ok(Some(profile)) => state(profile.is_premium),
                    Ok(None) => {
                        warn!("Profile for {} still missing after create conflict. Using free tier.", user.id);
                        state(false)
                    }
                    Err(e) => {
                        warn!("Profile re-fetch for {} failed: {}. Using free tier.", user.id, e);
                        state(false)
                    }
                }
            }
            Err(e) => {
                error!("Error creating profile for {}: {}", user.id, e);
                state(false)
            }
        }
    }

    /// History newest first; any failure reads as an empty history.
    async fn load_history(&self, user_id: &UserId) -> Vec<AnalysisRecord> {
        match self.store.list_analyses(user_id).await {
            Ok(mut analyses) => {
                analyses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                analyses
            }
            Err(PortError::MissingRelation(table)) => {
                warn!("Table '{}' does not exist yet, treating history as empty.", table);
                Vec::new()
            }
            Err(e) => {
                warn!("Could not fetch analyses, defaulting to empty history: {}", e);
                Vec::new()
            }
        }
    }

    /// Whether a new analysis may start.
    pub fn can_analyze(state: &EntitlementState) -> bool {
        state.can_analyze()
    }

    /// Applies a finished analysis to `state` and makes a best-effort attempt
    /// to persist it.
    ///
    /// Does not re-check [`EntitlementEngine::can_analyze`]; the caller checked
    /// before starting the inference call.
    pub async fn record_analysis(
        &self,
        state: EntitlementState,
        user_id: &UserId,
        raw_text: String,
        image_url: String,
    ) -> RecordOutcome {
        let record = AnalysisRecord {
            id: Uuid::new_v4().to_string(),
            image_url,
            raw_text,
            created_at: Utc::now(),
        };

        let warning = match self.store.save_analysis(user_id, &record).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Could not save analysis history for {}: {}", user_id, e);
                Some(PersistenceWarning::from_error(&e))
            }
        };

        RecordOutcome {
            state: state.with_record(record.clone()),
            record,
            warning,
        }
    }

    /// Marks the user premium. Payment is settled upstream; a failed write is
    /// only logged and gets corrected on the next full load.
    pub async fn upgrade(&self, state: EntitlementState, user_id: &UserId) -> EntitlementState {
        if let Err(e) = self.store.set_premium(user_id, true).await {
            error!("Error upgrading profile for {}: {}", user_id, e);
        }
        state.with_premium()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ports::PortResult;
    use crate::domain::{Credits, MAX_FREE_CREDITS};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// In-memory store whose individual calls can be made to fail.
    #[derive(Default)]
    pub(crate) struct FakeStore {
        pub profile: Mutex<Option<Profile>>,
        pub analyses: Mutex<Vec<AnalysisRecord>>,
        pub get_profile_err: Option<PortError>,
        pub list_err: Option<PortError>,
        pub create_err: Option<PortError>,
        pub save_err: Option<PortError>,
        pub set_premium_err: Option<PortError>,
        /// Row that appears when `create_profile` fails, as if inserted by a trigger.
        pub trigger_profile: Option<Profile>,
        pub created: Mutex<Vec<Profile>>,
    }

    #[async_trait]
    impl ProfileStore for FakeStore {
        async fn get_profile(&self, _user_id: &UserId) -> PortResult<Option<Profile>> {
            if let Some(e) = &self.get_profile_err {
                return Err(e.clone());
            }
            Ok(self.profile.lock().unwrap().clone())
        }

        async fn create_profile(&self, profile: &Profile) -> PortResult<()> {
            if let Some(e) = &self.create_err {
                if let Some(row) = &self.trigger_profile {
                    *self.profile.lock().unwrap() = Some(row.clone());
                }
                return Err(e.clone());
            }
            self.created.lock().unwrap().push(profile.clone());
            *self.profile.lock().unwrap() = Some(profile.clone());
            Ok(())
        }

        async fn set_premium(&self, _user_id: &UserId, is_premium: bool) -> PortResult<()> {
            if let Some(e) = &self.set_premium_err {
                return Err(e.clone());
            }
            if let Some(profile) = self.profile.lock().unwrap().as_mut() {
                profile.is_premium = is_premium;
            }
            Ok(())
        }

        async fn list_analyses(&self, _user_id: &UserId) -> PortResult<Vec<AnalysisRecord>> {
            if let Some(e) = &self.list_err {
                return Err(e.clone());
            }
            Ok(self.analyses.lock().unwrap().clone())
        }

        async fn save_analysis(&self, _user_id: &UserId, record: &AnalysisRecord) -> PortResult<()> {
            if let Some(e) = &self.save_err {
                return Err(e.clone());
            }
            self.analyses.lock().unwrap().insert(0, record.clone());
            Ok(())
        }
    }

    /// Fails every call with a transport-level error.
    pub(crate) struct BrokenStore;

    #[async_trait]
    impl ProfileStore for BrokenStore {
        async fn get_profile(&self, _: &UserId) -> PortResult<Option<Profile>> {
            Err(PortError::Unexpected("connection refused".into()))
        }
        async fn create_profile(&self, _: &Profile) -> PortResult<()> {
            Err(PortError::Unexpected("connection refused".into()))
        }
        async fn set_premium(&self, _: &UserId, _: bool) -> PortResult<()> {
            Err(PortError::Unexpected("connection refused".into()))
        }
        async fn list_analyses(&self, _: &UserId) -> PortResult<Vec<AnalysisRecord>> {
            Err(PortError::Unexpected("connection refused".into()))
        }
        async fn save_analysis(&self, _: &UserId, _: &AnalysisRecord) -> PortResult<()> {
            Err(PortError::Unexpected("connection refused".into()))
        }
    }

    pub(crate) fn alice() -> AuthUser {
        AuthUser {
            id: UserId::new("0b7d6c1e-alice"),
            email: Some("alice@example.com".into()),
            full_name: None,
        }
    }

    pub(crate) fn record(id: &str, minutes: i64) -> AnalysisRecord {
        AnalysisRecord {
            id: id.to_string(),
            image_url: "data:image/jpeg;base64,AAAA".into(),
            raw_text: "Planta identificada:".into(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    fn engine(store: FakeStore) -> (EntitlementEngine, Arc<FakeStore>) {
        let store = Arc::new(store);
        (EntitlementEngine::new(store.clone(), MAX_FREE_CREDITS), store)
    }

    #[tokio::test]
    async fn fresh_user_gets_full_quota_and_a_profile() {
        let (engine, store) = engine(FakeStore::default());
        let state = engine.load_entitlement(&alice()).await;

        assert_eq!(state.credits_remaining(), Credits::Remaining(3));
        assert!(EntitlementEngine::can_analyze(&state));
        assert!(!state.is_premium);

        let created = store.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].email.as_deref(), Some("alice@example.com"));
        assert!(!created[0].is_premium);
    }

    #[tokio::test]
    async fn existing_profile_and_history_drive_the_state() {
        let store = FakeStore {
            profile: Mutex::new(Some(Profile::free(alice().id, None))),
            analyses: Mutex::new(vec![record("a", 0), record("c", 20), record("b", 10)]),
            ..Default::default()
        };
        let (engine, store) = engine(store);
        let state = engine.load_entitlement(&alice()).await;

        assert_eq!(state.credits_remaining(), Credits::Remaining(0));
        assert!(!state.can_analyze());
        let ids: Vec<_> = state.analyses.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn three_recordings_exhaust_the_free_tier() {
        let (engine, _) = engine(FakeStore::default());
        let mut state = engine.load_entitlement(&alice()).await;

        for n in 0..3 {
            assert!(state.can_analyze(), "analysis {} should be allowed", n + 1);
            let outcome = engine
                .record_analysis(state, &alice().id, format!("diagnóstico {n}"), "data:x".into())
                .await;
            assert!(outcome.warning.is_none());
            state = outcome.state;
        }

        assert_eq!(state.credits_remaining(), Credits::Remaining(0));
        assert!(!EntitlementEngine::can_analyze(&state));
        assert_eq!(state.analyses[0].raw_text, "diagnóstico 2");
    }

    #[tokio::test]
    async fn failed_save_still_applies_the_record_with_a_warning() {
        let (engine, _) = engine(FakeStore {
            save_err: Some(PortError::Unexpected("timeout".into())),
            ..Default::default()
        });
        let outcome = engine
            .record_analysis(engine.anonymous(), &alice().id, "texto".into(), "data:y".into())
            .await;

        assert_eq!(outcome.state.analyses, vec![outcome.record.clone()]);
        assert_eq!(outcome.state.credits_remaining(), Credits::Remaining(2));
        let warning = outcome.warning.expect("warning expected");
        assert_eq!(warning.reason, SaveFailure::Unavailable);
        assert_eq!(warning.message, SAVE_WARNING);
    }

    #[tokio::test]
    async fn foreign_key_violation_reports_missing_profile() {
        let (engine, _) = engine(FakeStore {
            save_err: Some(PortError::MissingReference("analyses_user_id_fkey".into())),
            ..Default::default()
        });
        let outcome = engine
            .record_analysis(engine.anonymous(), &alice().id, "texto".into(), "data:y".into())
            .await;

        let warning = outcome.warning.expect("warning expected");
        assert_eq!(warning.reason, SaveFailure::ProfileMissing);
        assert!(warning.detail().contains("Perfil de usuário não encontrado"));
    }

    #[tokio::test]
    async fn upgrade_unlocks_an_exhausted_user_even_if_the_write_fails() {
        let (engine, _) = engine(FakeStore {
            set_premium_err: Some(PortError::PermissionDenied("profiles".into())),
            ..Default::default()
        });
        let exhausted = EntitlementState {
            is_premium: false,
            analyses: vec![record("a", 0), record("b", 1), record("c", 2)],
            free_quota: 3,
        };
        assert!(!exhausted.can_analyze());

        let upgraded = engine.upgrade(exhausted, &alice().id).await;
        assert!(upgraded.is_premium);
        assert!(upgraded.can_analyze());
        assert_eq!(upgraded.analyses.len(), 3);
    }

    #[tokio::test]
    async fn upgrade_persists_the_premium_flag() {
        let (engine, store) = engine(FakeStore {
            profile: Mutex::new(Some(Profile::free(alice().id, None))),
            ..Default::default()
        });
        engine.upgrade(engine.anonymous(), &alice().id).await;
        assert!(store.profile.lock().unwrap().as_ref().unwrap().is_premium);
    }

    #[tokio::test]
    async fn missing_history_table_reads_as_empty_history() {
        let (engine, _) = engine(FakeStore {
            list_err: Some(PortError::MissingRelation("analyses".into())),
            ..Default::default()
        });
        let state = engine.load_entitlement(&alice()).await;

        assert_eq!(state.credits_remaining(), Credits::Remaining(3));
        assert!(state.analyses.is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_yields_the_anonymous_state() {
        let engine = EntitlementEngine::new(Arc::new(BrokenStore), MAX_FREE_CREDITS);
        let state = engine.load_entitlement(&alice()).await;
        assert_eq!(state, EntitlementState::anonymous(3));
    }

    #[tokio::test]
    async fn profile_read_timeout_still_counts_the_stored_history() {
        let (engine, store) = engine(FakeStore {
            get_profile_err: Some(PortError::Unexpected("timeout".into())),
            analyses: Mutex::new(vec![record("a", 0), record("b", 1), record("c", 2)]),
            ..Default::default()
        });
        let state = engine.load_entitlement(&alice()).await;

        assert_eq!(state.analyses.len(), 3);
        assert_eq!(state.credits_remaining(), Credits::Remaining(0));
        assert!(!state.can_analyze());
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn policy_rejections_everywhere_still_yield_free_defaults() {
        let denied = || Some(PortError::PermissionDenied("rls".into()));
        let (engine, _) = engine(FakeStore {
            get_profile_err: denied(),
            list_err: denied(),
            create_err: denied(),
            ..Default::default()
        });
        let state = engine.load_entitlement(&alice()).await;
        assert_eq!(state, EntitlementState::anonymous(3));
    }

    #[tokio::test]
    async fn create_conflict_refetches_the_trigger_created_profile() {
        let (engine, store) = engine(FakeStore {
            create_err: Some(PortError::Conflict("profiles_pkey".into())),
            trigger_profile: Some(Profile {
                id: alice().id,
                email: None,
                is_premium: true,
            }),
            ..Default::default()
        });
        let state = engine.load_entitlement(&alice()).await;

        assert!(state.is_premium);
        assert_eq!(state.credits_remaining(), Credits::Unlimited);
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_denied_without_refetch_falls_back_to_free_with_history() {
        let (engine, _) = engine(FakeStore {
            analyses: Mutex::new(vec![record("a", 0)]),
            create_err: Some(PortError::PermissionDenied("profiles".into())),
            ..Default::default()
        });
        let state = engine.load_entitlement(&alice()).await;

        assert!(!state.is_premium);
        assert_eq!(state.credits_remaining(), Credits::Remaining(2));
    }

    proptest! {
        #[test]
        fn free_credits_follow_history_length(len in 0usize..12, quota in 0u32..8) {
            let analyses: Vec<_> = (0..len).map(|i| record(&i.to_string(), i as i64)).collect();
            let state = EntitlementState { is_premium: false, analyses, free_quota: quota };
            let expected = quota.saturating_sub(len as u32);

            prop_assert_eq!(state.credits_remaining(), Credits::Remaining(expected));
            prop_assert_eq!(state.can_analyze(), expected > 0);
        }

        #[test]
        fn premium_can_always_analyze(len in 0usize..12, quota in 0u32..8) {
            let analyses: Vec<_> = (0..len).map(|i| record(&i.to_string(), i as i64)).collect();
            let state = EntitlementState { is_premium: true, analyses, free_quota: quota };
            prop_assert!(state.can_analyze());
        }
    }
}
