//! Error taxonomy for scalesim.

use thiserror::Error;

use crate::types::SimTime;

/// Result type alias for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors that abort a simulation run.
///
/// Contract violations indicate the control loop or placement logic is
/// inconsistent; no partial results are valid once one is raised.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("scaling decision starts {start} and stops {stop} in the same tick")]
    ConflictingDecision { start: u32, stop: u32 },

    #[error("invalid scaling count: {0}")]
    InvalidScalingCount(String),

    #[error("customer {id} served out of order (previous served id {previous})")]
    FcfsViolation { id: u64, previous: u64 },

    #[error("customer {id} was reactivated but no server is available")]
    NoServerAfterReactivation { id: u64 },

    #[error("customer {id} waited {wait:.3}s, limit is {limit:.3}s")]
    WaitExceeded { id: u64, wait: SimTime, limit: SimTime },

    #[error("customer {id} spent {elapsed}s acquiring a seat, expected 0")]
    RequestTookTime { id: u64, elapsed: SimTime },

    #[error("negative {what} sampled: {value}")]
    NegativeSample { what: &'static str, value: f64 },

    #[error("resample budget of {attempts} exhausted while drawing {what}")]
    ResampleBudgetExceeded { what: &'static str, attempts: u32 },

    #[error("search for {what} did not converge below {bound} servers")]
    SearchDiverged { what: &'static str, bound: u32 },

    #[error("provisioning plan exhausted at tick {tick}")]
    ProvisioningExhausted { tick: usize },

    #[error("invalid delay: {0}")]
    InvalidDelay(f64),

    #[error("unknown process: {0}")]
    UnknownProcess(u64),

    #[error("unknown resource: {0}")]
    UnknownResource(u64),

    #[error("invalid reactivation of process {pid}: {reason}")]
    InvalidReactivation { pid: u64, reason: &'static str },

    #[error("resource {resource}: {reason}")]
    ResourceMisuse { resource: u64, reason: String },

    #[error("trace {source_name}:{line}: {message}")]
    Trace {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Whether this error is an invariant breach rather than bad input or I/O.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SimError::ConflictingDecision { .. }
                | SimError::InvalidScalingCount(_)
                | SimError::FcfsViolation { .. }
                | SimError::NoServerAfterReactivation { .. }
                | SimError::WaitExceeded { .. }
                | SimError::RequestTookTime { .. }
                | SimError::NegativeSample { .. }
                | SimError::InvalidReactivation { .. }
                | SimError::ResourceMisuse { .. }
        )
    }
}
