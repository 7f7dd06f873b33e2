//! scalesim-model — the simulated application on top of the engine.
//!
//! # Architecture
//!
//! ```text
//! SimulationRun
//!   ├── SimContext (world): Cluster, Recorder, wait queue, counters
//!   ├── ScaleProcess      tick → retire/observe → drain queue → hold sleep()
//!   ├── ArrivalGenerator  hold gap → observe Arrival → spawn Customer
//!   └── Customer          find_server → Request → Hold service → Release
//!                         (no seat: blocked under loss, queued otherwise)
//! ```
//!
//! At the horizon the driver truncates service times that run past it and
//! closes out every VM still provisioned.

pub mod arrival;
pub mod context;
pub mod customer;
pub mod run;
pub mod scale;

pub use arrival::{ArrivalGenerator, ArrivalSource, PoissonArrivals};
pub use context::{CustomerSettings, SimContext};
pub use customer::Customer;
pub use run::{RunResult, SimulationRun, run};
pub use scale::ScaleProcess;
