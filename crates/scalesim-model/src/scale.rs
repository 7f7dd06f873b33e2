//! Scale process: drives the autoscaler on its period.

use tracing::debug;

use scalesim_autoscale::{Autoscaler, TickReport};
use scalesim_core::{SimResult, SimTime};
use scalesim_engine::{Context, Process, Yield};
use scalesim_metrics::Metric;

use crate::context::SimContext;

/// Runs one autoscaler tick per resumption, then drains the wait queue
/// into the seats customers can use right away and records the cluster
/// state.
///
/// Only free seats on Active VMs are drained. Booting seats count toward
/// capacity for the policy, but a customer woken onto one would find no
/// server and abort the run with `NoServerAfterReactivation`. Seats already
/// promised to customers woken by a departure are not handed out twice.
pub struct ScaleProcess {
    autoscaler: Autoscaler,
    drain_delay: SimTime,
    last_report: Option<TickReport>,
}

impl ScaleProcess {
    pub fn new(autoscaler: Autoscaler, drain_delay: SimTime) -> Self {
        Self {
            autoscaler,
            drain_delay,
            last_report: None,
        }
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }
}

impl Process<SimContext> for ScaleProcess {
    fn name(&self) -> &str {
        "scaler"
    }

    fn resume(&mut self, world: &mut SimContext, ctx: &mut Context<'_, SimContext>) -> SimResult<Yield> {
        let now = ctx.now();
        let system = world.system_state(now);
        let report = self
            .autoscaler
            .tick(&mut world.cluster, ctx.resources_mut(), &system)?;

        for vm in &report.retired {
            world.observe(Metric::ServerProvisionLength, vm.provisioned, vm.start_time);
        }
        if let Some(prediction) = report.prediction {
            world.observe(Metric::Prediction, prediction, now);
        }

        let seats = (world.cluster.placeable_seats(ctx.resources()) as usize)
            .saturating_sub(world.woken_pending());
        let mut drained = 0;
        while drained < seats {
            let Some(pid) = world.dequeue() else {
                break;
            };
            ctx.reactivate(pid, self.drain_delay);
            drained += 1;
        }
        if drained > 0 {
            debug!(now, drained, still_waiting = world.waiting_len(), "drained wait queue");
        }

        world.cluster.check_invariants(ctx.resources())?;
        let active = world.cluster.active().len() as f64;
        let booting = world.cluster.booting().len() as f64;
        let shutting_down = world.cluster.shutting_down().len() as f64;
        let occupied = f64::from(world.cluster.occupied(ctx.resources()));
        let queued = world.waiting_len() as f64;
        world.observe(Metric::ClusterActive, active, now);
        world.observe(Metric::ClusterBooting, booting, now);
        world.observe(Metric::ClusterShuttingDown, shutting_down, now);
        world.observe(Metric::ClusterOccupancy, occupied, now);
        world.observe(Metric::QueueDepth, queued, now);

        world.reset_tick(now);
        self.last_report = Some(report);
        Ok(Yield::Hold(self.autoscaler.sleep()))
    }
}
