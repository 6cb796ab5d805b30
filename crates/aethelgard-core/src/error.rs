use thiserror::Error;

/// Error taxonomy for the whole control plane (spec §7). Components return
/// these rather than throwing freely so the orchestrator can pattern-match
/// on `kind` instead of parsing strings.
#[derive(Error, Debug)]
pub enum AethelgardError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("policy rejection ({reason}), trace_id={trace_id}")]
    PolicyRejection { reason: String, trace_id: String },

    #[error("asset not normalized: no asset profile for symbol {0}")]
    AssetNotNormalized(String),

    #[error("connector error: {0}")]
    Connector(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("circuit breaker active: {reason}, retry_after={retry_after_secs}s")]
    CircuitBreakerActive { reason: String, retry_after_secs: u64 },

    #[error("illegal state transition: {from} -> {to}")]
    IllegalStateTransition { from: String, to: String },
}

impl AethelgardError {
    pub fn policy_rejection(reason: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::PolicyRejection {
            reason: reason.into(),
            trace_id: trace_id.into(),
        }
    }
}
