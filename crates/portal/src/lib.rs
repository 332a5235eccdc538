//! # Portal - Marketing Intelligence Engine
//!
//! Turns a free-text goal into a campaign pack: trend signals are collected and
//! ranked, clustered into forward-looking themes, a draft is written and then
//! pressure-tested by a Believer/Skeptic debate before the pack is assembled.
//! Every provider call goes through the [`gateway::ProviderGateway`] and every
//! expensive result is memoized by the [`store::PersistenceStore`].

pub mod audience;
pub mod brief;
pub mod compliance;
pub mod config;
pub mod creative;
pub mod futurist;
pub mod gateway;
pub mod signals;
pub mod store;
pub mod text;
pub mod wizard;

#[cfg(test)]
pub(crate) mod test_support;

pub use audience::{
    DebateEngine, DebateRole, DebateState, DebateTranscript, DebateTurn, Recommendation,
    Termination, Verdict,
};
pub use brief::{CopyType, GoalBrief, LookbackWindow};
pub use compliance::{claim_risk_flags, RiskFlag};
pub use config::PortalConfig;
pub use creative::{CreativeAsset, CreativeGenerator, QaReport, QaStatus};
pub use futurist::{FuturistScanner, Theme, TrendDirection};
pub use gateway::{
    CallOutcome, CallRecord, CandidateFailure, GatewayResponse, InvokeOptions, ProviderGateway,
};
pub use signals::{Opportunity, Signal, SignalAggregator};
pub use store::{CacheStats, PersistenceStore};
pub use wizard::{
    CampaignPack, CampaignRun, CampaignWizard, PackLookup, PipelineStage, RunEvent, RunStatus,
    StageStatus,
};

/// Error taxonomy shared by every portal component.
///
/// Errors are `Clone` so that a single failed computation can be handed to every
/// caller waiting on the same cache fingerprint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortalError {
    #[error("Transient provider error: {0}")]
    ProviderTransient(String),

    #[error("Permanent provider error: {0}")]
    ProviderPermanent(String),

    #[error("All providers exhausted for role '{role}' ({} candidate(s) failed)", .failures.len())]
    ProviderExhausted {
        role: String,
        failures: Vec<CandidateFailure>,
    },

    #[error("Signal source unavailable: {0}")]
    SignalSourceUnavailable(String),

    #[error("Debate aborted: {reason}")]
    DebateAborted {
        reason: String,
        transcript: Box<DebateTranscript>,
    },

    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("Run {0} has already settled")]
    RunSettled(uuid::Uuid),

    #[error("Invalid stage transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl PortalError {
    /// Whether the failure came out of the provider layer.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            PortalError::ProviderTransient(_)
                | PortalError::ProviderPermanent(_)
                | PortalError::ProviderExhausted { .. }
        )
    }
}

impl From<sqlx::Error> for PortalError {
    fn from(err: sqlx::Error) -> Self {
        PortalError::DatabaseError(err.to_string())
    }
}

impl From<db::models::cache_entry::CacheEntryError> for PortalError {
    fn from(err: db::models::cache_entry::CacheEntryError) -> Self {
        PortalError::DatabaseError(err.to_string())
    }
}

impl From<db::models::run_ledger::RunLedgerError> for PortalError {
    fn from(err: db::models::run_ledger::RunLedgerError) -> Self {
        PortalError::DatabaseError(err.to_string())
    }
}

impl From<db::models::signal_sample::SignalSampleError> for PortalError {
    fn from(err: db::models::signal_sample::SignalSampleError) -> Self {
        PortalError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::SerializationError(err.to_string())
    }
}

impl From<::config::ConfigError> for PortalError {
    fn from(err: ::config::ConfigError) -> Self {
        PortalError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PortalError>;
