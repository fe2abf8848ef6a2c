//! crates/plantai_core/src/analysis.rs
//!
//! The analysis workflow: permission check, image normalization, inference,
//! then recording the result against the session.

use crate::domain::{AnalysisRecord, EntitlementState, PREMIUM_PRICE};
use crate::entitlement::{EntitlementEngine, PersistenceWarning};
use crate::ports::{ImageNormalizer, InferenceService, PortError};
use crate::session::{Session, SessionError};
use tracing::{error, info};

const IMAGE_REJECTED: &str = "Erro na imagem enviada. Tente tirar uma nova foto em formato JPG ou PNG.";
const EMPTY_DIAGNOSIS: &str =
    "A IA não retornou uma resposta textual. Tente novamente com uma foto mais clara.";
const RATE_LIMITED: &str = "Limite de uso da IA atingido. Aguarde alguns instantes e tente novamente.";
const GENERIC_FAILURE: &str =
    "Não foi possível analisar a planta. Verifique sua conexão e tente novamente.";
const SESSION_LOADING: &str = "Sua sessão ainda está carregando. Tente novamente.";

#[derive(Debug, Clone)]
pub enum AnalyzeOutcome {
    /// No credits left; show the upgrade prompt. Nothing was sent for inference.
    UpgradeRequired { price: &'static str },
    Completed {
        record: AnalysisRecord,
        entitlement: EntitlementState,
        warning: Option<PersistenceWarning>,
    },
}

/// Failures surfaced to the user as a retryable message. Local state is left
/// untouched by all of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Image could not be prepared: {0}")]
    Normalize(PortError),
    #[error("Inference failed: {0}")]
    Inference(PortError),
}

impl AnalysisError {
    /// True when a different photo, rather than a retry, is the fix.
    pub fn is_image_problem(&self) -> bool {
        matches!(
            self,
            AnalysisError::Normalize(_) | AnalysisError::Inference(PortError::InvalidInput(_))
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::Session(_) => SESSION_LOADING.to_string(),
            AnalysisError::Normalize(_) => IMAGE_REJECTED.to_string(),
            AnalysisError::Inference(err) => match err {
                PortError::InvalidInput(_) => IMAGE_REJECTED.to_string(),
                PortError::EmptyResponse => EMPTY_DIAGNOSIS.to_string(),
                PortError::RateLimited(_) => RATE_LIMITED.to_string(),
                PortError::Rejected(message) if !message.is_empty() => message.clone(),
                _ => GENERIC_FAILURE.to_string(),
            },
        }
    }
}

/// Runs one analysis for the session.
///
/// The credit check happens before inference and is not repeated when the
/// result is recorded, so two requests racing on the last credit can both
/// complete.
pub async fn analyze(
    session: &Session,
    engine: &EntitlementEngine,
    normalizer: &dyn ImageNormalizer,
    inference: &dyn InferenceService,
    raw_image: &[u8],
) -> Result<AnalyzeOutcome, AnalysisError> {
    // 1. Permission
    let entitlement = session.entitlement().ok_or(SessionError::NotReady)?;
    if !EntitlementEngine::can_analyze(&entitlement) {
        info!("User {} has no credits left, prompting upgrade", session.user().id);
        return Ok(AnalyzeOutcome::UpgradeRequired { price: PREMIUM_PRICE });
    }

    // 2. Canonical image encoding
    let image = normalizer.normalize(raw_image).await.map_err(AnalysisError::Normalize)?;

    // 3. Inference
    let raw_text = inference.diagnose(&image).await.map_err(|e| {
        error!("Error analyzing plant for {}: {}", session.user().id, e);
        AnalysisError::Inference(e)
    })?;

    // 4. Record, best-effort persistence
    let outcome = session.record(engine, raw_text, image.data_url()).await;
    Ok(AnalyzeOutcome::Completed {
        record: outcome.record,
        entitlement: outcome.state,
        warning: outcome.warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credits, NormalizedImage};
    use crate::entitlement::tests::{alice, record, FakeStore};
    use crate::entitlement::SaveFailure;
    use crate::ports::PortResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct PassThrough;

    #[async_trait]
    impl ImageNormalizer for PassThrough {
        async fn normalize(&self, raw: &[u8]) -> PortResult<NormalizedImage> {
            if raw.is_empty() {
                return Err(PortError::InvalidInput("empty image".into()));
            }
            Ok(NormalizedImage::jpeg(raw.to_vec()))
        }
    }

    struct CountingInference {
        calls: AtomicUsize,
        reply: PortResult<String>,
    }

    impl CountingInference {
        fn replying(reply: PortResult<String>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply,
            }
        }
    }

    #[async_trait]
    impl InferenceService for CountingInference {
        async fn diagnose(&self, _image: &NormalizedImage) -> PortResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    async fn ready_session(store: FakeStore) -> (Session, EntitlementEngine) {
        let engine = EntitlementEngine::new(Arc::new(store), 3);
        let session = Session::new(alice());
        session.bootstrap(&engine).await;
        (session, engine)
    }

    #[tokio::test]
    async fn successful_analysis_is_recorded_with_a_data_url() {
        let (session, engine) = ready_session(FakeStore::default()).await;
        let inference = CountingInference::replying(Ok("Planta identificada:".into()));

        let outcome = analyze(&session, &engine, &PassThrough, &inference, &[0xff, 0xd8, 0xff])
            .await
            .unwrap();

        match outcome {
            AnalyzeOutcome::Completed { record, entitlement, warning } => {
                assert_eq!(record.image_url, "data:image/jpeg;base64,/9j/");
                assert_eq!(entitlement.credits_remaining(), Credits::Remaining(2));
                assert!(warning.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_user_is_prompted_without_calling_inference() {
        let store = FakeStore {
            analyses: Mutex::new(vec![record("a", 0), record("b", 1), record("c", 2)]),
            ..Default::default()
        };
        let (session, engine) = ready_session(store).await;
        let inference = CountingInference::replying(Ok("never".into()));

        let outcome = analyze(&session, &engine, &PassThrough, &inference, b"img").await.unwrap();

        assert!(matches!(outcome, AnalyzeOutcome::UpgradeRequired { price } if price == PREMIUM_PRICE));
        assert_eq!(inference.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inference_failure_leaves_state_unchanged() {
        let (session, engine) = ready_session(FakeStore::default()).await;
        let before = session.entitlement();
        let inference = CountingInference::replying(Err(PortError::EmptyResponse));

        let err = analyze(&session, &engine, &PassThrough, &inference, b"img").await.unwrap_err();

        assert_eq!(err.user_message(), EMPTY_DIAGNOSIS);
        assert!(!err.is_image_problem());
        assert_eq!(session.entitlement(), before);
    }

    #[tokio::test]
    async fn rejected_image_maps_to_the_retake_message() {
        let (session, engine) = ready_session(FakeStore::default()).await;
        let inference = CountingInference::replying(Err(PortError::InvalidInput("400".into())));

        let err = analyze(&session, &engine, &PassThrough, &inference, b"img").await.unwrap_err();
        assert!(err.is_image_problem());
        assert_eq!(err.user_message(), IMAGE_REJECTED);

        let err = analyze(&session, &engine, &PassThrough, &inference, b"").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Normalize(_)));
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_save_still_completes_with_a_warning() {
        let store = FakeStore {
            save_err: Some(PortError::MissingRelation("analyses".into())),
            ..Default::default()
        };
        let (session, engine) = ready_session(store).await;
        let inference = CountingInference::replying(Ok("texto".into()));

        let outcome = analyze(&session, &engine, &PassThrough, &inference, b"img").await.unwrap();
        let AnalyzeOutcome::Completed { entitlement, warning, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(entitlement.analyses.len(), 1);
        assert_eq!(warning.unwrap().reason, SaveFailure::HistoryTableMissing);
    }

    /// Ends the session while the diagnosis is in flight.
    struct LogoutDuringInference {
        session: Arc<Session>,
    }

    #[async_trait]
    impl InferenceService for LogoutDuringInference {
        async fn diagnose(&self, _image: &NormalizedImage) -> PortResult<String> {
            self.session.end();
            Ok("Planta identificada:".into())
        }
    }

    #[tokio::test]
    async fn diagnosis_finished_after_logout_is_still_saved_and_returned() {
        let store = Arc::new(FakeStore::default());
        let engine = EntitlementEngine::new(store.clone(), 3);
        let session = Arc::new(Session::new(alice()));
        session.bootstrap(&engine).await;
        let inference = LogoutDuringInference {
            session: session.clone(),
        };

        let outcome = analyze(&session, &engine, &PassThrough, &inference, b"img").await.unwrap();

        let AnalyzeOutcome::Completed { record, warning, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(record.raw_text, "Planta identificada:");
        assert!(warning.is_none());
        assert_eq!(store.analyses.lock().unwrap().len(), 1);
        assert!(session.entitlement().is_none());
    }

    #[tokio::test]
    async fn analysis_before_bootstrap_is_refused() {
        let engine = EntitlementEngine::new(Arc::new(FakeStore::default()), 3);
        let session = Session::new(alice());
        let inference = CountingInference::replying(Ok("texto".into()));

        let err = analyze(&session, &engine, &PassThrough, &inference, b"img").await.unwrap_err();
        assert_eq!(err, AnalysisError::Session(SessionError::NotReady));
    }
}
