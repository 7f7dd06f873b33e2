//! Run driver: builds a simulation from a [`SimConfig`], runs it to the
//! horizon, and finalizes the observation streams.

use tracing::info;

use scalesim_autoscale::{Autoscaler, policy_from_config};
use scalesim_cluster::Cluster;
use scalesim_core::{DelaySampler, RngStream, SimConfig, SimError, SimResult, SimTime, stream_rng};
use scalesim_engine::{ProcessId, RunOutcome, Simulation};
use scalesim_metrics::{Metric, Recorder, RunFacts, RunSummary};

use crate::arrival::{ArrivalGenerator, ArrivalSource};
use crate::context::{CustomerSettings, SimContext};
use crate::scale::ScaleProcess;

/// Everything a finished run produced.
pub struct RunResult {
    pub summary: RunSummary,
    pub recorder: Recorder,
    pub outcome: RunOutcome,
}

/// One configured simulation run.
pub struct SimulationRun {
    sim: Simulation<SimContext>,
    world: SimContext,
    facts: RunFacts,
    scaler: ProcessId,
    generator: ProcessId,
}

impl SimulationRun {
    pub fn from_config(config: &SimConfig) -> SimResult<Self> {
        config.validate()?;
        let digest = config
            .digest()
            .map_err(|e| SimError::Config(format!("config digest: {e}")))?;

        let mut sim = Simulation::new();
        let cluster = Cluster::with_initial_vms(
            config.cluster.density,
            config.cluster.initial_vms,
            sim.resources_mut(),
            0.0,
        );
        let world = SimContext::new(cluster, CustomerSettings::from_config(config));

        let startup_delay = DelaySampler::from_config(
            &config.scaler.startup_delay,
            stream_rng(config.run.seed, RngStream::StartupDelay),
        )?;
        let autoscaler = Autoscaler::new(
            policy_from_config(config)?,
            startup_delay.into_fn(),
            config.scaler.scale_rate,
        )
        .with_shutdown_delay(config.scaler.shutdown_delay)
        .with_first_tick_epsilon(config.scaler.first_tick_epsilon);
        let policy = autoscaler.policy_name();

        // The scaler goes first so the t=0 tick precedes any arrival.
        let scaler = sim.spawn(
            Box::new(ScaleProcess::new(autoscaler, config.scaler.drain_delay)),
            0.0,
        )?;
        let generator = sim.spawn(
            Box::new(ArrivalGenerator::new(
                ArrivalSource::from_config(config)?,
                config.scaler.scale_rate,
            )),
            0.0,
        )?;

        info!(
            name = config.run.name.as_deref().unwrap_or("unnamed"),
            policy,
            seed = config.run.seed,
            horizon = config.run.horizon,
            density = config.cluster.density,
            initial_vms = config.cluster.initial_vms,
            "simulation configured"
        );

        Ok(Self {
            sim,
            world,
            facts: RunFacts {
                name: config.run.name.clone(),
                config_digest: digest,
                density: config.cluster.density,
                horizon: config.run.horizon,
                warmup: config.run.warmup,
                ..RunFacts::default()
            },
            scaler,
            generator,
        })
    }

    /// Keep a log of every resumed event for replay comparisons.
    pub fn record_events(&mut self) {
        self.sim.record_events();
    }

    pub fn world(&self) -> &SimContext {
        &self.world
    }

    pub fn simulation(&self) -> &Simulation<SimContext> {
        &self.sim
    }

    pub fn scaler_pid(&self) -> ProcessId {
        self.scaler
    }

    pub fn generator_pid(&self) -> ProcessId {
        self.generator
    }

    /// Advance to `until` without finalizing. Capped at the horizon.
    pub fn advance(&mut self, until: SimTime) -> SimResult<RunOutcome> {
        self.sim
            .run_until(&mut self.world, until.min(self.facts.horizon))
    }

    /// Run to the horizon (or until the input drains) and finalize.
    pub fn finish(mut self) -> SimResult<RunResult> {
        let mut outcome = self.sim.run_until(&mut self.world, self.facts.horizon)?;
        outcome.events_processed = self.sim.events_processed();
        let end = outcome.end_time;

        let truncated = self.world.recorder.finalize(end);
        let vms_provisioned = self.world.cluster.vms_provisioned();
        let vms_deleted = self.world.cluster.vms_deleted();
        for vm in self.world.cluster.force_finalize(end) {
            self.world
                .observe(Metric::ServerProvisionLength, vm.provisioned, vm.start_time);
        }

        let facts = RunFacts {
            end_time: end,
            events_processed: outcome.events_processed,
            vms_provisioned,
            vms_deleted,
            regenerated_services: self.world.regenerated_services(),
            truncated_observations: truncated,
            ..self.facts
        };
        let summary = RunSummary::from_recorder(&self.world.recorder, facts);
        info!(
            end_time = end,
            reason = ?outcome.reason,
            events = outcome.events_processed,
            arrivals = summary.arrivals,
            blocked = summary.blocked,
            vms_provisioned,
            "simulation finished"
        );
        Ok(RunResult {
            summary,
            recorder: self.world.recorder,
            outcome,
        })
    }
}

/// Build, run, and finalize the simulation a configuration describes.
pub fn run(config: &SimConfig) -> SimResult<RunResult> {
    SimulationRun::from_config(config)?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesim_core::config::{ArrivalConfig, PolicyConfig};
    use scalesim_engine::StopReason;

    fn poisson_config(max_customers: Option<u64>) -> SimConfig {
        let mut config = SimConfig::scaffold("unit");
        config.run.horizon = 3_600.0;
        config.arrivals = ArrivalConfig::Poisson {
            lambda: 0.5,
            mu: 0.05,
            max_customers,
            regenerate_service: false,
            resample_budget: 100,
        };
        config
    }

    #[test]
    fn invalid_config_is_rejected_before_running() {
        let mut config = poisson_config(None);
        config.cluster.density = 0;
        assert!(matches!(
            SimulationRun::from_config(&config),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn run_reaches_horizon_and_finalizes_vms() {
        let mut config = poisson_config(None);
        config.customers.discipline = scalesim_core::QueueDiscipline::Loss;
        config.policy = PolicyConfig::FixedSize { vms: 4 };
        let result = run(&config).unwrap();

        assert_eq!(result.outcome.reason, StopReason::Horizon);
        assert_eq!(result.outcome.end_time, 3_600.0);
        assert_eq!(result.summary.vms_provisioned, 4);
        // Four VMs alive for the whole hour.
        assert_eq!(result.summary.total_provisioned_time, 4.0 * 3_600.0);
        assert!(result.summary.arrivals > 0);
        assert_eq!(
            result.summary.served + result.summary.blocked,
            result.recorder.count(Metric::Blocked)
        );
        // No service time reaches past the horizon.
        for obs in result.recorder.series(Metric::AcceptedServiceTime) {
            assert!(obs.at + obs.value <= 3_600.0 + 1e-9);
        }
    }

    #[test]
    fn exhausted_input_stops_early() {
        let mut config = poisson_config(Some(10));
        config.customers.discipline = scalesim_core::QueueDiscipline::Loss;
        let result = run(&config).unwrap();
        assert_eq!(result.outcome.reason, StopReason::Requested);
        assert_eq!(result.summary.arrivals, 10);
        assert!(result.outcome.end_time < 3_600.0);
    }

    #[test]
    fn advance_is_capped_at_horizon() {
        let mut run = SimulationRun::from_config(&poisson_config(None)).unwrap();
        let outcome = run.advance(1e9).unwrap();
        assert_eq!(outcome.end_time, 3_600.0);
        assert!(run.simulation().process_name(run.scaler_pid()) == Some("scaler"));
        assert!(run.world().arrivals() > 0);
    }
}
