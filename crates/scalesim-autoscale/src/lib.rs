//! scalesim-autoscale — periodic reconciliation of the VM pool.
//!
//! An [`Autoscaler`] holds one [`ScalingPolicy`] and, every `scale_rate`
//! seconds of simulated time, applies the policy's decision to the
//! cluster.
//!
//! # Scaling Algorithm
//!
//! ```text
//! decision = policy.decide(cluster view, system state)   // start XOR stop
//!
//! start:   reclaim lowest-rank ShuttingDown VM → Active
//!          otherwise create VM → Booting (ready_time = now + startup_delay)
//! promote: Booting with ready_time <= now → Active
//! stop:    idle Active VMs, highest rank first, skipping VMs reclaimed or
//!          promoted this tick → ShuttingDown (power_off = now + shutdown_delay)
//! retire:  ShuttingDown with power_off <= now → removed
//! ```
//!
//! Reserve policies:
//!
//! ```text
//! R    = reserve − expected departures (+ waiting customers)
//! diff = free_seats − R
//! stop  = floor(diff / density)   if diff > 0
//! start = ceil(−diff / density)   if diff < 0
//! ```

pub mod departure;
pub mod erlang;
pub mod policy;
pub mod predictor;
pub mod scaler;

pub use departure::DepartureEstimator;
pub use policy::{ScalingPolicy, from_config as policy_from_config};
pub use predictor::DemandPredictor;
pub use scaler::{Autoscaler, StartupDelayFn, TickReport};
