//! Erlang-formula sizing policies.

use std::collections::HashMap;

use tracing::{debug, info};

use scalesim_cluster::ClusterView;
use scalesim_core::{ScalingDecision, SimError, SimResult, SimTime, SystemState};

use super::ScalingPolicy;
use crate::erlang::{ErlangCMemo, min_servers_erlang_b};

/// Sizes the cluster once, on the first tick, for a steady Poisson load.
pub struct ErlangBFixedPolicy {
    worst_bp: f64,
    load: f64,
    issued: bool,
}

impl ErlangBFixedPolicy {
    /// `load` is the offered traffic in Erlangs (`lambda / mu`).
    pub fn new(worst_bp: f64, load: f64) -> Self {
        Self {
            worst_bp,
            load,
            issued: false,
        }
    }
}

impl ScalingPolicy for ErlangBFixedPolicy {
    fn name(&self) -> &'static str {
        "erlang_b_fixed"
    }

    fn decide(&mut self, cluster: &ClusterView, _system: &SystemState) -> SimResult<ScalingDecision> {
        if self.issued {
            return Ok(ScalingDecision::none());
        }
        self.issued = true;
        let servers = min_servers_erlang_b(self.load, cluster.density, self.worst_bp)?;
        info!(load = self.load, servers, worst_bp = self.worst_bp, "erlang-b fixed size");
        Ok(ScalingDecision::start(servers))
    }
}

/// Follows a precomputed per-tick VM plan derived from predicted user
/// counts.
pub struct ErlangDataPolicy {
    plan: Vec<u32>,
    next: usize,
    lag: u32,
}

impl ErlangDataPolicy {
    pub fn from_plan(plan: Vec<u32>) -> Self {
        Self { plan, next: 0, lag: 0 }
    }

    /// Plan with Erlang-B: enough VMs to keep blocking below `worst_bp`.
    pub fn erlang_b(
        predictions: &[f64],
        worst_bp: f64,
        mu: f64,
        scale_rate: SimTime,
        density: u32,
    ) -> SimResult<Self> {
        let mut seen: HashMap<u64, u32> = HashMap::new();
        let mut plan = Vec::with_capacity(predictions.len());
        for predicted in predictions {
            let servers = match seen.get(&predicted.to_bits()) {
                Some(servers) => *servers,
                None => {
                    let load = (predicted / scale_rate) / mu;
                    let servers = min_servers_erlang_b(load, density, worst_bp)?;
                    seen.insert(predicted.to_bits(), servers);
                    servers
                }
            };
            plan.push(servers);
        }
        debug!(slots = plan.len(), "erlang-b capacity plan");
        Ok(Self::from_plan(plan))
    }

    /// Plan with Erlang-C: enough seats that `P(wait <= target_wait)` is
    /// at least `service_level`, rounded up to whole VMs.
    pub fn erlang_c(
        predictions: &[f64],
        service_level: f64,
        target_wait: SimTime,
        mu: f64,
        scale_rate: SimTime,
        density: u32,
        memo: &mut ErlangCMemo,
    ) -> SimResult<Self> {
        let avg_service = 1.0 / mu;
        let plan = predictions
            .iter()
            .map(|predicted| {
                let lambda = predicted / scale_rate;
                let seats = memo.min_seats(service_level, target_wait, lambda, avg_service)?;
                Ok(seats.div_ceil(density))
            })
            .collect::<SimResult<Vec<u32>>>()?;
        debug!(slots = plan.len(), memo_entries = memo.len(), "erlang-c capacity plan");
        Ok(Self::from_plan(plan))
    }

    /// Hold the cluster unchanged for the first `lag` ticks.
    pub fn with_lag(mut self, lag: u32) -> Self {
        self.lag = lag;
        self
    }

    pub fn plan(&self) -> &[u32] {
        &self.plan
    }
}

impl ScalingPolicy for ErlangDataPolicy {
    fn name(&self) -> &'static str {
        "erlang_data"
    }

    fn decide(&mut self, cluster: &ClusterView, _system: &SystemState) -> SimResult<ScalingDecision> {
        if self.lag > 0 {
            self.lag -= 1;
            return Ok(ScalingDecision::none());
        }
        let required = *self
            .plan
            .get(self.next)
            .ok_or(SimError::ProvisioningExhausted { tick: self.next })?;
        self.next += 1;
        let current = cluster.serving_vms();
        Ok(if required > current {
            ScalingDecision::start(required - current)
        } else {
            ScalingDecision::stop(current - required)
        })
    }

    fn last_prediction(&self) -> Option<f64> {
        self.next
            .checked_sub(1)
            .and_then(|i| self.plan.get(i))
            .map(|servers| f64::from(*servers))
    }
}
