//! scalesim-engine — single-threaded discrete-event simulation.
//!
//! # Architecture
//!
//! ```text
//! Simulation<W>
//!   ├── event heap (due, seq) → resumes the owning Process
//!   ├── Process::resume(world, ctx) → Yield
//!   │     Hold | Request | Release | Passivate | Done
//!   ├── Context → spawn / reactivate / request_stop (applied in issue order)
//!   └── ResourceTable → capacity-bounded resources with FIFO waiters
//! ```
//!
//! Nothing here uses threads or async. Concurrency is the interleaving of
//! processes at simulated-time granularity; only one runs at a time.

pub mod process;
pub mod resource;
pub mod scheduler;

pub use process::{Context, Process, ProcessId, ProcessState, Yield};
pub use resource::{Resource, ResourceId, ResourceTable};
pub use scheduler::{RunOutcome, Simulation, StopReason};
