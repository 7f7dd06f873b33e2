//! End-to-end scenarios across the engine, cluster, autoscaler and model.

use std::fs;

use scalesim_autoscale::erlang::erlang_b;
use scalesim_autoscale::policy::FixedSizePolicy;
use scalesim_autoscale::{Autoscaler, ScalingPolicy};
use scalesim_cluster::Cluster;
use scalesim_core::config::{ArrivalConfig, DelayConfig, PolicyConfig, ReserveConfig};
use scalesim_core::{QueueDiscipline, SimConfig, SimError, SimTime};
use scalesim_engine::{ResourceTable, Simulation, StopReason};
use scalesim_metrics::{Metric, Recorder};
use scalesim_model::{Customer, CustomerSettings, ScaleProcess, SimContext, SimulationRun, run};

fn scale_process(policy: Box<dyn ScalingPolicy>, scale_rate: SimTime) -> ScaleProcess {
    let autoscaler = Autoscaler::new(policy, Box::new(|| Ok(0.0)), scale_rate);
    ScaleProcess::new(autoscaler, 1e-6)
}

fn poisson(lambda: f64, mu: f64) -> ArrivalConfig {
    ArrivalConfig::Poisson {
        lambda,
        mu,
        max_customers: None,
        regenerate_service: false,
        resample_budget: 1_000,
    }
}

/// Waterfall placement: every Active VM ranked below the chosen one is full.
fn assert_waterfall(cluster: &Cluster, resources: &ResourceTable) {
    let Some(chosen) = cluster.find_server(resources) else {
        return;
    };
    let chosen_rank = chosen.rank;
    let chosen_free = resources.get(chosen.resource).map(|r| r.free()).unwrap();
    assert!(chosen_free > 0);
    for vm in cluster.active().iter().filter(|vm| vm.rank < chosen_rank) {
        assert_eq!(resources.get(vm.resource).unwrap().free(), 0);
    }
}

#[test]
fn single_customer_occupies_one_seat_for_its_service_time() {
    let mut sim = Simulation::new();
    let mut world = SimContext::new(Cluster::new(1), CustomerSettings::loss());
    sim.spawn(Box::new(scale_process(Box::new(FixedSizePolicy::new(1)), 300.0)), 0.0)
        .unwrap();
    let id = world.next_customer_id();
    sim.spawn(Box::new(Customer::new(id, 5.0)), 0.0).unwrap();

    sim.run_until(&mut world, 4.9).unwrap();
    assert_eq!(world.cluster.occupied(sim.resources()), 1);

    sim.run_until(&mut world, 5.1).unwrap();
    assert_eq!(world.cluster.occupied(sim.resources()), 0);
    assert_eq!(world.recorder.values(Metric::Blocked), vec![0.0]);
    assert_eq!(world.recorder.values(Metric::AcceptedServiceTime), vec![5.0]);
}

#[test]
fn queued_customer_is_served_only_after_the_seat_frees() {
    let mut sim = Simulation::new();
    let cluster = Cluster::with_initial_vms(1, 1, sim.resources_mut(), 0.0);
    let mut world = SimContext::new(cluster, CustomerSettings::queueing(100.0));
    sim.spawn(Box::new(scale_process(Box::new(FixedSizePolicy::new(1)), 4.0)), 0.0)
        .unwrap();
    for (delay, service) in [(0.0, 10.0), (2.0, 1.0)] {
        let id = world.next_customer_id();
        sim.spawn(Box::new(Customer::new(id, service)), delay).unwrap();
    }

    sim.run_until(&mut world, 9.9).unwrap();
    assert_eq!(world.waiting_len(), 1);
    assert_eq!(world.recorder.count(Metric::WaitTime), 1);

    sim.run_until(&mut world, 20.0).unwrap();
    assert_eq!(world.waiting_len(), 0);
    let admitted = world.recorder.series(Metric::WaitTime)[1];
    // Not before t=10, and no later than the tick at t=12.
    assert!(admitted.at >= 10.0 && admitted.at <= 12.0 + 1e-6);
    assert_eq!(admitted.value, admitted.at - 2.0);
}

#[test]
fn erlang_b_with_no_load_never_blocks() {
    for servers in 0..64 {
        assert_eq!(erlang_b(0.0, servers), 0.0);
    }
}

#[test]
fn identical_seeds_replay_identically() {
    let mut config = SimConfig::scaffold("replay");
    config.run.horizon = 6.0 * 3_600.0;
    config.cluster.density = 2;
    config.customers.discipline = QueueDiscipline::Loss;
    config.scaler.startup_delay = DelayConfig::Gamma {
        alpha: 2.0,
        beta: 30.0,
    };
    config.arrivals = poisson(0.2, 0.01);

    let replay = |config: &SimConfig| {
        let mut run = SimulationRun::from_config(config).unwrap();
        run.record_events();
        run.advance(config.run.horizon).unwrap();
        let log = run.simulation().event_log().to_vec();
        let recorder: Recorder = run.world().recorder.clone();
        (log, recorder)
    };
    let (log_a, rec_a) = replay(&config);
    let (log_b, rec_b) = replay(&config);
    assert!(!log_a.is_empty());
    assert_eq!(log_a, log_b);
    for metric in Metric::ALL {
        assert_eq!(rec_a.series(metric), rec_b.series(metric), "{metric:?}");
    }

    config.run.seed += 1;
    let (log_c, _) = replay(&config);
    assert_ne!(log_a, log_c);
}

#[test]
fn capacity_rank_and_placement_invariants_hold_throughout() {
    let mut config = SimConfig::scaffold("invariants");
    config.run.horizon = 12.0 * 3_600.0;
    config.cluster.density = 3;
    config.cluster.initial_vms = 2;
    config.customers.discipline = QueueDiscipline::Loss;
    config.scaler.shutdown_delay = 120.0;
    config.scaler.startup_delay = DelayConfig::TruncatedNormal {
        mean: 90.0,
        std_dev: 40.0,
        resample_budget: 1_000,
    };
    config.arrivals = poisson(0.3, 0.01);
    config.policy = PolicyConfig::Reserve {
        reserve: ReserveConfig::Constant { value: 6.0 },
        departure: Default::default(),
    };

    let mut run = SimulationRun::from_config(&config).unwrap();
    let mut t = 0.0;
    while t < config.run.horizon {
        t += 37.0;
        run.advance(t).unwrap();
        let cluster = &run.world().cluster;
        let resources = run.simulation().resources();
        cluster.check_invariants(resources).unwrap();
        let serving = (cluster.booting().len() + cluster.active().len()) as u32;
        assert_eq!(cluster.capacity(), serving * config.cluster.density);
        for vm in cluster.booting().iter().chain(cluster.active()) {
            let seats = resources.get(vm.resource).unwrap();
            assert!(seats.granted() <= seats.capacity());
        }
        // Ranks are dense: the next one is the smallest unused.
        let mut ranks: Vec<u32> = cluster
            .booting()
            .iter()
            .chain(cluster.active())
            .chain(cluster.shutting_down())
            .map(|vm| vm.rank)
            .collect();
        ranks.sort_unstable();
        let next = cluster.next_rank();
        assert!(!ranks.contains(&next));
        assert!((0..next).all(|r| ranks.contains(&r)));
        assert_waterfall(cluster, resources);
    }
}

#[test]
fn queueing_run_admits_customers_in_arrival_order() {
    let mut config = SimConfig::scaffold("fcfs");
    config.run.horizon = 2.0 * 86_400.0;
    config.cluster.density = 2;
    config.arrivals = poisson(0.2, 0.01);
    let result = run(&config).unwrap();

    assert_eq!(result.outcome.reason, StopReason::Horizon);
    assert!(result.summary.served > 0);
    assert_eq!(result.summary.blocked, 0);
    let waits = result.recorder.values(Metric::WaitTime);
    assert!(waits.iter().all(|w| *w < config.max_wait()));
}

#[test]
fn trace_driven_run_stops_when_input_drains() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("users.csv"),
        "# inter_arrival,service\n1.0,20.0\n1.0,20.0\n1.0,20.0\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("run.toml"),
        r#"
[run]
name = "trace"
horizon = 3600.0

[cluster]
density = 2
initial_vms = 1

[scaler]
scale_rate = 300.0
startup_delay = { kind = "fixed", value = 0.0 }

[customers]
discipline = "loss"

[arrivals]
kind = "trace"
path = "users.csv"

[policy]
kind = "fixed_size"
vms = 1
"#,
    )
    .unwrap();

    let config = SimConfig::from_file(&dir.path().join("run.toml")).unwrap();
    let result = run(&config).unwrap();
    assert_eq!(result.outcome.reason, StopReason::Requested);
    assert_eq!(result.summary.arrivals, 3);
    // Two seats, three overlapping customers.
    assert_eq!(result.summary.blocked, 1);
    // The last served customer arrives at t=2 and leaves at t=22.
    assert_eq!(result.outcome.end_time, 22.0);
    assert_eq!(result.summary.name.as_deref(), Some("trace"));
}

#[test]
fn malformed_trace_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.csv");
    fs::write(&path, "1.0,2.0\nnot-a-number,2.0\n").unwrap();

    let mut config = SimConfig::scaffold("broken");
    config.arrivals = ArrivalConfig::Trace { path };
    assert!(matches!(run(&config), Err(SimError::Trace { line: 2, .. })));
}
