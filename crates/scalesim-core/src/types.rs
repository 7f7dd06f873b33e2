//! Shared types used across scalesim crates.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Simulated time in seconds. Non-negative and monotonically non-decreasing
/// over a run.
pub type SimTime = f64;

/// Check that a delay is finite and non-negative.
pub fn check_delay(delay: SimTime) -> SimResult<SimTime> {
    if delay.is_finite() && delay >= 0.0 {
        Ok(delay)
    } else {
        Err(SimError::InvalidDelay(delay))
    }
}

/// A per-tick scaling decision: how many VMs to start and how many to stop.
///
/// At most one of the two counts may be non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub start: u32,
    pub stop: u32,
}

impl ScalingDecision {
    /// No change.
    pub const fn none() -> Self {
        Self { start: 0, stop: 0 }
    }

    pub const fn start(count: u32) -> Self {
        Self { start: count, stop: 0 }
    }

    pub const fn stop(count: u32) -> Self {
        Self { start: 0, stop: count }
    }

    /// Build a decision from a signed VM delta (positive starts, negative stops).
    pub fn from_delta(delta: i64) -> SimResult<Self> {
        let magnitude = u32::try_from(delta.unsigned_abs())
            .map_err(|_| SimError::InvalidScalingCount(format!("delta {delta} out of range")))?;
        Ok(if delta >= 0 {
            Self::start(magnitude)
        } else {
            Self::stop(magnitude)
        })
    }

    /// Build a decision from real-valued counts, rejecting negative,
    /// non-finite or non-integral values and simultaneous start+stop.
    pub fn from_counts(start: f64, stop: f64) -> SimResult<Self> {
        let decision = Self {
            start: to_count("start", start)?,
            stop: to_count("stop", stop)?,
        };
        decision.validate()?;
        Ok(decision)
    }

    /// Reject decisions that both start and stop VMs.
    pub fn validate(&self) -> SimResult<()> {
        if self.start > 0 && self.stop > 0 {
            return Err(SimError::ConflictingDecision {
                start: self.start,
                stop: self.stop,
            });
        }
        Ok(())
    }

    pub fn is_none(&self) -> bool {
        self.start == 0 && self.stop == 0
    }
}

fn to_count(label: &str, value: f64) -> SimResult<u32> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return Err(SimError::InvalidScalingCount(format!("{label} = {value}")));
    }
    Ok(value as u32)
}

/// System state handed to scaling policies each tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemState {
    /// Current simulated time.
    pub now: SimTime,
    /// Customers currently parked on the FIFO wait queue.
    pub waiting: usize,
    /// Arrivals observed since the previous tick; `None` on the first tick.
    pub arrivals_since_last_tick: Option<u64>,
    /// Time each in-service customer has spent in service so far.
    pub in_service_ages: Vec<SimTime>,
}

/// What happens to a customer that finds no free seat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueDiscipline {
    /// Blocked customers leave immediately (Erlang loss system).
    Loss,
    /// Blocked customers join a single FIFO wait queue.
    #[default]
    AlwaysQueue,
}
