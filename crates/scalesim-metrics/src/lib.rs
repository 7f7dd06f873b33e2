//! scalesim-metrics — observations and run summaries.
//!
//! Collects `(metric, value, at)` observations from the simulation,
//! reduces them to headline estimates, and renders those in the
//! Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! ObservationSink
//!   └── Recorder → per-metric time-ordered series
//!         └── finalize(horizon) → truncate service durations
//!
//! stats
//!   ├── batch_means() → 30-batch mean with 95% half-width
//!   ├── percentile() / bucket_means() → timescale summaries
//!
//! report
//!   ├── RunSummary::from_recorder() ← Recorder + RunFacts
//!   └── render_text() → scalesim_* samples labelled by run
//! ```

pub mod collector;
pub mod report;
pub mod stats;

pub use collector::{Metric, Observation, ObservationSink, Recorder};
pub use report::{RunFacts, RunSummary, render_text};
pub use stats::{BatchMean, TimescaleSummary};
