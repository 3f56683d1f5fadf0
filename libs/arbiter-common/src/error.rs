use thiserror::Error;

/// Invalid batch-size configuration. Fatal to a run, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PlanningError(pub String);

/// Failure of a single generation call against the provider.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("provider rate limited the request")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl GenerateError {
    /// Whether the orchestrator should retry the batch with backoff.
    ///
    /// Rate limits, network blips, and provider-side 5xx responses are
    /// transient. Other HTTP statuses and schema-violating bodies will not
    /// improve on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerateError::RateLimited | GenerateError::Network(_) => true,
            GenerateError::BadStatus { status, .. } => *status >= 500,
            GenerateError::MalformedResponse(_) => false,
        }
    }
}

/// Fatal orchestration failures. Per-batch failures are contained in the
/// `RunResult` payload instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("no responses generated - all batches failed: {}", .errors.join("; "))]
    NoResponses { errors: Vec<String> },

    #[error("batch {number} failed: {message}")]
    BatchFailed { number: u32, message: String },
}
