//! Observation sink and in-memory recorder.
//!
//! Every state transition the simulation cares about is reported as a
//! `(metric, value, at)` triple. The [`Recorder`] keeps one time-ordered
//! series per metric and mirrors each observation as a `trace` event on
//! the `scalesim::observe` target.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use scalesim_core::SimTime;

/// Observation streams produced by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Active VM count, per tick.
    ClusterActive,
    /// Booting VM count, per tick.
    ClusterBooting,
    /// ShuttingDown VM count, per tick.
    ClusterShuttingDown,
    /// Occupied seats, per tick.
    ClusterOccupancy,
    /// Wait-queue depth, per tick.
    QueueDepth,
    /// Per served or blocked customer.
    WaitTime,
    /// 1 when a customer is refused, 0 when served.
    Blocked,
    /// VMs in any bucket, per customer.
    NumServers,
    /// Provisioned lifetime of a VM, observed at its start time.
    ServerProvisionLength,
    Arrival,
    /// Service time of a served customer, observed when service starts.
    AcceptedServiceTime,
    /// Service time of a blocked customer, observed when it is refused.
    LostServiceTime,
    /// Reserve or predicted demand used by a policy, per tick.
    Prediction,
}

impl Metric {
    pub const ALL: [Metric; 13] = [
        Metric::ClusterActive,
        Metric::ClusterBooting,
        Metric::ClusterShuttingDown,
        Metric::ClusterOccupancy,
        Metric::QueueDepth,
        Metric::WaitTime,
        Metric::Blocked,
        Metric::NumServers,
        Metric::ServerProvisionLength,
        Metric::Arrival,
        Metric::AcceptedServiceTime,
        Metric::LostServiceTime,
        Metric::Prediction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::ClusterActive => "cluster_active",
            Metric::ClusterBooting => "cluster_booting",
            Metric::ClusterShuttingDown => "cluster_shutting_down",
            Metric::ClusterOccupancy => "cluster_occupancy",
            Metric::QueueDepth => "queue_depth",
            Metric::WaitTime => "wait_time",
            Metric::Blocked => "blocked",
            Metric::NumServers => "num_servers",
            Metric::ServerProvisionLength => "server_provision_length",
            Metric::Arrival => "arrival",
            Metric::AcceptedServiceTime => "accepted_service_time",
            Metric::LostServiceTime => "lost_service_time",
            Metric::Prediction => "prediction",
        }
    }

    /// Durations that start at `at` and may run past the horizon.
    pub fn is_duration_from_start(&self) -> bool {
        matches!(
            self,
            Metric::AcceptedServiceTime | Metric::LostServiceTime
        )
    }
}

/// A single observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub at: SimTime,
    pub value: f64,
}

/// Receiver of simulation observations.
pub trait ObservationSink {
    fn observe(&mut self, metric: Metric, value: f64, at: SimTime);
}

/// Keeps every observation in memory, grouped by metric.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    series: BTreeMap<Metric, Vec<Observation>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self, metric: Metric) -> &[Observation] {
        self.series.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.series(metric).iter().map(|o| o.value).collect()
    }

    pub fn count(&self, metric: Metric) -> usize {
        self.series(metric).len()
    }

    pub fn sum(&self, metric: Metric) -> f64 {
        self.series(metric).iter().map(|o| o.value).sum()
    }

    pub fn last(&self, metric: Metric) -> Option<Observation> {
        self.series(metric).last().copied()
    }

    /// Observations with `at >= cutoff`, shifted so the cutoff becomes 0.
    pub fn after(&self, metric: Metric, cutoff: SimTime) -> Vec<Observation> {
        self.series(metric)
            .iter()
            .filter(|o| o.at >= cutoff)
            .map(|o| Observation {
                at: o.at - cutoff,
                value: o.value,
            })
            .collect()
    }

    /// Truncate service-time observations that extend past `horizon` so no
    /// duration reaches into unsimulated time.
    pub fn finalize(&mut self, horizon: SimTime) -> usize {
        let mut truncated = 0;
        for metric in Metric::ALL.into_iter().filter(Metric::is_duration_from_start) {
            if let Some(series) = self.series.get_mut(&metric) {
                for obs in series.iter_mut() {
                    if obs.at + obs.value > horizon {
                        obs.value = (horizon - obs.at).max(0.0);
                        truncated += 1;
                    }
                }
            }
        }
        truncated
    }
}

impl ObservationSink for Recorder {
    fn observe(&mut self, metric: Metric, value: f64, at: SimTime) {
        trace!(
            target: "scalesim::observe",
            metric = metric.as_str(),
            value,
            at,
            "observe"
        );
        self.series
            .entry(metric)
            .or_default()
            .push(Observation { at, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observations_are_grouped_by_metric() {
        let mut recorder = Recorder::new();
        recorder.observe(Metric::Blocked, 0.0, 1.0);
        recorder.observe(Metric::Blocked, 1.0, 2.0);
        recorder.observe(Metric::WaitTime, 3.5, 2.0);

        assert_eq!(recorder.values(Metric::Blocked), vec![0.0, 1.0]);
        assert_eq!(recorder.count(Metric::WaitTime), 1);
        assert_eq!(recorder.count(Metric::Arrival), 0);
        assert_eq!(recorder.sum(Metric::Blocked), 1.0);
        assert_eq!(
            recorder.last(Metric::WaitTime),
            Some(Observation { at: 2.0, value: 3.5 })
        );
    }

    #[test]
    fn finalize_truncates_service_past_horizon() {
        let mut recorder = Recorder::new();
        recorder.observe(Metric::AcceptedServiceTime, 50.0, 10.0);
        recorder.observe(Metric::AcceptedServiceTime, 200.0, 20.0);
        recorder.observe(Metric::LostServiceTime, 500.0, 90.0);
        recorder.observe(Metric::WaitTime, 500.0, 90.0);

        assert_eq!(recorder.finalize(100.0), 2);
        assert_eq!(recorder.values(Metric::AcceptedServiceTime), vec![50.0, 80.0]);
        assert_eq!(recorder.values(Metric::LostServiceTime), vec![10.0]);
        assert_eq!(recorder.values(Metric::WaitTime), vec![500.0]);
    }

    #[test]
    fn after_drops_warmup_and_rebases() {
        let mut recorder = Recorder::new();
        recorder.observe(Metric::WaitTime, 1.0, 5.0);
        recorder.observe(Metric::WaitTime, 2.0, 15.0);
        assert_eq!(
            recorder.after(Metric::WaitTime, 10.0),
            vec![Observation { at: 5.0, value: 2.0 }]
        );
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names: Vec<_> = Metric::ALL.iter().map(|m| m.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Metric::ALL.len());
    }
}
