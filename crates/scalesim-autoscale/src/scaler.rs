//! Autoscaler: periodic reconciliation of the VM pool.
//!
//! Each tick asks the policy for a decision and applies it to the cluster:
//! start (reclaiming warm ShuttingDown VMs before booting new ones),
//! promote, stop, then retire. Draining the wait queue and emitting
//! observations belong to the process that drives the ticks.

use tracing::{debug, info};

use scalesim_cluster::{Cluster, RetiredVm};
use scalesim_core::{ScalingDecision, SimResult, SimTime, SystemState, check_delay};
use scalesim_engine::ResourceTable;

use crate::policy::ScalingPolicy;

/// Zero-argument source of VM boot durations.
pub type StartupDelayFn = Box<dyn FnMut() -> SimResult<SimTime>>;

/// What one tick did to the cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub now: SimTime,
    pub decision: ScalingDecision,
    /// Ranks of newly created Booting VMs.
    pub started: Vec<u32>,
    /// Ranks returned from ShuttingDown to Active.
    pub reclaimed: Vec<u32>,
    pub promoted: Vec<u32>,
    pub stopped: Vec<u32>,
    pub retired: Vec<RetiredVm>,
    /// Demand figure the policy based its decision on.
    pub prediction: Option<f64>,
}

pub struct Autoscaler {
    policy: Box<dyn ScalingPolicy>,
    startup_delay: StartupDelayFn,
    scale_rate: SimTime,
    shutdown_delay: SimTime,
    first_tick_epsilon: SimTime,
    ticks: u64,
}

impl Autoscaler {
    pub fn new(policy: Box<dyn ScalingPolicy>, startup_delay: StartupDelayFn, scale_rate: SimTime) -> Self {
        Self {
            policy,
            startup_delay,
            scale_rate,
            shutdown_delay: 0.0,
            first_tick_epsilon: 0.0,
            ticks: 0,
        }
    }

    pub fn with_shutdown_delay(mut self, delay: SimTime) -> Self {
        self.shutdown_delay = delay;
        self
    }

    /// Shorten the first sleep so every later tick lands just before
    /// arrivals at the same multiple of `scale_rate`.
    pub fn with_first_tick_epsilon(mut self, epsilon: SimTime) -> Self {
        self.first_tick_epsilon = epsilon;
        self
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn scale_rate(&self) -> SimTime {
        self.scale_rate
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Delay until the next tick.
    pub fn sleep(&self) -> SimTime {
        if self.ticks == 1 {
            self.scale_rate - self.first_tick_epsilon
        } else {
            self.scale_rate
        }
    }

    /// Run one reconciliation at `system.now`.
    pub fn tick(
        &mut self,
        cluster: &mut Cluster,
        resources: &mut ResourceTable,
        system: &SystemState,
    ) -> SimResult<TickReport> {
        let now = system.now;
        let view = cluster.view(resources);
        let decision = self.policy.decide(&view, system)?;
        decision.validate()?;

        let mut report = TickReport {
            now,
            decision,
            prediction: self.policy.last_prediction(),
            ..TickReport::default()
        };

        for _ in 0..decision.start {
            if let Some(rank) = cluster.reclaim_for_start() {
                report.reclaimed.push(rank);
                continue;
            }
            let delay = check_delay((self.startup_delay)()?)?;
            let vm = cluster.create_vm(resources, now);
            report.started.push(vm.rank);
            cluster.push_booting(vm, now + delay);
        }

        report.promoted = cluster.promote_ready(now);

        let protected: Vec<u32> = report
            .reclaimed
            .iter()
            .chain(&report.promoted)
            .copied()
            .collect();
        report.stopped =
            cluster.begin_shutdown(decision.stop, now, self.shutdown_delay, &protected, resources);
        self.policy
            .scaling_complete(decision.stop, report.stopped.len() as u32);

        report.retired = cluster.retire_powered_off(now, resources)?;
        self.ticks += 1;

        if !decision.is_none() || !report.retired.is_empty() {
            info!(
                now,
                policy = self.policy.name(),
                start = decision.start,
                stop = decision.stop,
                started = report.started.len(),
                reclaimed = report.reclaimed.len(),
                stopped = report.stopped.len(),
                retired = report.retired.len(),
                "scaling"
            );
        } else {
            debug!(now, policy = self.policy.name(), "no scaling change");
        }
        Ok(report)
    }
}
