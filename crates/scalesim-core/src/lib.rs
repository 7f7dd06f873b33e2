//! scalesim-core — shared types for the scalesim workspace.
//!
//! Holds the simulated clock type, the scaling decision contract, the
//! error taxonomy, TOML run configuration, plain-text trace readers, and
//! the startup-delay sources.

pub mod config;
pub mod delay;
pub mod error;
pub mod trace;
pub mod types;

pub use config::SimConfig;
pub use delay::{DelaySampler, RngStream, stream_rng};
pub use error::{SimError, SimResult};
pub use types::{QueueDiscipline, ScalingDecision, SimTime, SystemState, check_delay};
