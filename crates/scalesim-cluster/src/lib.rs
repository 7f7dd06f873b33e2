//! scalesim-cluster — the elastic VM pool.
//!
//! # Architecture
//!
//! ```text
//! Cluster (density seats per VM)
//!   ├── booting       → created, waiting for ready_time
//!   ├── active        → placeable, waterfall order by rank
//!   └── shutting_down → draining, waiting for power_off_time
//!
//! find_server()  → lowest-rank Active VM with a free seat
//! next_rank()    → smallest rank unused across all buckets
//! ```
//!
//! Capacity counts Booting and Active VMs only. Bucket moves are made by
//! the autoscaler; seat counters move only through engine
//! `Request`/`Release` yields.

pub mod cluster;

pub use cluster::{Cluster, ClusterView, RetiredVm, Vm, VmState};
