pub mod account;
pub mod analysis;
pub mod domain;
pub mod entitlement;
pub mod ports;
pub mod report;
pub mod session;

pub use analysis::{analyze, AnalysisError, AnalyzeOutcome};
pub use domain::{
    AnalysisRecord, AuthSession, AuthUser, Credits, EntitlementState, NormalizedImage, Profile,
    UserId, MAX_FREE_CREDITS, PREMIUM_PRICE,
};
pub use entitlement::{EntitlementEngine, PersistenceWarning, RecordOutcome, SaveFailure};
pub use ports::{
    AuthService, ImageNormalizer, InferenceService, PortError, PortResult, ProfileStore,
};
pub use session::{Session, SessionError, SessionPhase};
