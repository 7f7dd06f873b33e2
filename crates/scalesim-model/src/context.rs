//! Shared world every process of a run operates on.

use std::collections::{BTreeMap, VecDeque};

use scalesim_cluster::Cluster;
use scalesim_core::{QueueDiscipline, SimConfig, SimError, SimResult, SimTime, SystemState};
use scalesim_engine::ProcessId;
use scalesim_metrics::{Metric, ObservationSink, Recorder};

/// How customers behave when no seat is free.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomerSettings {
    pub discipline: QueueDiscipline,
    /// Enforce `max_wait` on queued customers.
    pub add_capacity_for_waiting: bool,
    pub max_wait: SimTime,
}

impl CustomerSettings {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            discipline: config.customers.discipline,
            add_capacity_for_waiting: config.customers.add_capacity_for_waiting,
            max_wait: config.max_wait(),
        }
    }

    pub fn loss() -> Self {
        Self {
            discipline: QueueDiscipline::Loss,
            add_capacity_for_waiting: false,
            max_wait: SimTime::INFINITY,
        }
    }

    pub fn queueing(max_wait: SimTime) -> Self {
        Self {
            discipline: QueueDiscipline::AlwaysQueue,
            add_capacity_for_waiting: true,
            max_wait,
        }
    }
}

/// Simulation context: the cluster, the observation recorder, the wait
/// queue, and the counters that would otherwise be process-wide globals.
pub struct SimContext {
    pub cluster: Cluster,
    pub recorder: Recorder,
    pub settings: CustomerSettings,
    waiting: VecDeque<ProcessId>,
    /// Dequeued customers whose reactivation has not run yet.
    woken: usize,
    /// Customer id -> service start.
    in_service: BTreeMap<u64, SimTime>,
    next_customer: u64,
    last_served: Option<u64>,
    arrivals_since_last_tick: Option<u64>,
    last_tick: Option<SimTime>,
    arrivals: u64,
    regenerated_services: u64,
    live_customers: u64,
    input_closed: bool,
}

impl SimContext {
    pub fn new(cluster: Cluster, settings: CustomerSettings) -> Self {
        Self {
            cluster,
            recorder: Recorder::new(),
            settings,
            waiting: VecDeque::new(),
            woken: 0,
            in_service: BTreeMap::new(),
            next_customer: 1,
            last_served: None,
            arrivals_since_last_tick: None,
            last_tick: None,
            arrivals: 0,
            regenerated_services: 0,
            live_customers: 0,
            input_closed: false,
        }
    }

    pub fn observe(&mut self, metric: Metric, value: f64, at: SimTime) {
        self.recorder.observe(metric, value, at);
    }

    /// Issue the next customer id.
    pub fn next_customer_id(&mut self) -> u64 {
        let id = self.next_customer;
        self.next_customer += 1;
        id
    }

    /// Customers must be admitted in the order their ids were issued.
    pub fn check_fcfs(&mut self, id: u64) -> SimResult<()> {
        if let Some(previous) = self.last_served
            && id <= previous
        {
            return Err(SimError::FcfsViolation { id, previous });
        }
        self.last_served = Some(id);
        Ok(())
    }

    pub fn enqueue(&mut self, pid: ProcessId) {
        self.waiting.push_back(pid);
    }

    /// Pop the head of the wait queue. The caller reactivates it; the seat
    /// it will take stays spoken for until [`Self::woken_admitted`].
    pub fn dequeue(&mut self) -> Option<ProcessId> {
        let pid = self.waiting.pop_front()?;
        self.woken += 1;
        Some(pid)
    }

    /// A reactivated customer has resumed and is claiming its seat.
    pub fn woken_admitted(&mut self) {
        self.woken = self.woken.saturating_sub(1);
    }

    /// Customers reactivated from the queue that have not resumed yet.
    pub fn woken_pending(&self) -> usize {
        self.woken
    }

    /// Whether a new arrival must queue behind earlier customers even if a
    /// seat looks free.
    pub fn queue_is_busy(&self) -> bool {
        !self.waiting.is_empty() || self.woken > 0
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn begin_service(&mut self, id: u64, now: SimTime) {
        self.in_service.insert(id, now);
    }

    pub fn end_service(&mut self, id: u64) {
        self.in_service.remove(&id);
    }

    pub fn in_service(&self) -> usize {
        self.in_service.len()
    }

    pub fn record_arrival(&mut self) {
        self.arrivals += 1;
        self.arrivals_since_last_tick = Some(self.arrivals_since_last_tick.unwrap_or(0) + 1);
    }

    pub fn arrivals(&self) -> u64 {
        self.arrivals
    }

    pub fn record_regenerated_service(&mut self) {
        self.regenerated_services += 1;
    }

    pub fn regenerated_services(&self) -> u64 {
        self.regenerated_services
    }

    pub fn customer_entered(&mut self) {
        self.live_customers += 1;
    }

    /// Count a customer leaving. Returns whether the run has nothing left
    /// to do.
    pub fn customer_left(&mut self) -> bool {
        self.live_customers = self.live_customers.saturating_sub(1);
        self.is_drained()
    }

    /// Mark the arrival input as exhausted. Returns whether the run has
    /// nothing left to do.
    pub fn close_input(&mut self) -> bool {
        self.input_closed = true;
        self.is_drained()
    }

    fn is_drained(&self) -> bool {
        self.input_closed && self.live_customers == 0
    }

    /// Start a new counting window at an autoscaler tick.
    pub fn reset_tick(&mut self, now: SimTime) {
        self.arrivals_since_last_tick = Some(0);
        self.last_tick = Some(now);
    }

    /// Time left before the next tick, or `None` before the first one.
    pub fn time_until_next_tick(&self, now: SimTime, scale_rate: SimTime) -> Option<SimTime> {
        self.last_tick
            .map(|last| (scale_rate - (now - last)).max(0.0))
    }

    /// Demand signal handed to the scaling policy.
    pub fn system_state(&self, now: SimTime) -> SystemState {
        SystemState {
            now,
            waiting: self.waiting.len(),
            arrivals_since_last_tick: self.arrivals_since_last_tick,
            in_service_ages: self.in_service.values().map(|start| now - start).collect(),
        }
    }
}
