//! Replay of an explicit provisioning schedule.

use std::collections::VecDeque;

use tracing::{debug, warn};

use scalesim_cluster::ClusterView;
use scalesim_core::trace::ProvisionRecord;
use scalesim_core::{ScalingDecision, SimResult, SimTime, SystemState};

use super::ScalingPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Change {
    Start,
    Stop,
}

/// Stops that fell due at `since` and have not been carried out yet.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Deferred {
    count: u32,
    since: SimTime,
}

/// Turns `(provision, deprovision)` pairs into per-tick start and stop
/// counts. Each tick applies every schedule change due at or before `now`.
///
/// Stops the cluster could not honour are retried on later ticks. Each
/// batch keeps its own due time and is dropped once `retry_interval` has
/// passed since then. Starts cancel the newest stops first, then the
/// oldest deferred ones.
pub struct DataFileSchedulePolicy {
    changes: Vec<(SimTime, Change)>,
    cursor: usize,
    retry_interval: SimTime,
    /// Oldest first.
    deferred: VecDeque<Deferred>,
    /// Stops requested by the last decision, oldest first.
    in_flight: Vec<Deferred>,
}

impl DataFileSchedulePolicy {
    pub fn new(records: Vec<ProvisionRecord>, retry_interval: SimTime) -> Self {
        let mut changes: Vec<(SimTime, Change)> = records
            .iter()
            .flat_map(|r| [(r.provision_at, Change::Start), (r.deprovision_at, Change::Stop)])
            .collect();
        changes.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            changes,
            cursor: 0,
            retry_interval,
            deferred: VecDeque::new(),
            in_flight: Vec::new(),
        }
    }

    /// Schedule changes not yet applied.
    pub fn remaining(&self) -> usize {
        self.changes.len() - self.cursor
    }

    /// Stops waiting to be retried.
    pub fn deferred_stops(&self) -> u32 {
        self.deferred.iter().map(|d| d.count).sum()
    }
}

impl ScalingPolicy for DataFileSchedulePolicy {
    fn name(&self) -> &'static str {
        "data_file"
    }

    fn decide(&mut self, _cluster: &ClusterView, system: &SystemState) -> SimResult<ScalingDecision> {
        let now = system.now;

        let mut starts: u32 = 0;
        let mut stops: u32 = 0;
        while let Some((at, change)) = self.changes.get(self.cursor)
            && *at <= now
        {
            match change {
                Change::Start => starts += 1,
                Change::Stop => stops += 1,
            }
            self.cursor += 1;
        }

        let retry_interval = self.retry_interval;
        self.deferred.retain(|d| {
            let keep = now - d.since <= retry_interval;
            if !keep {
                warn!(count = d.count, since = d.since, now, "dropping deferred deprovisions");
            }
            keep
        });

        let netted = starts.min(stops);
        starts -= netted;
        stops -= netted;
        while starts > 0
            && let Some(oldest) = self.deferred.front_mut()
        {
            let cancelled = starts.min(oldest.count);
            debug!(cancelled, since = oldest.since, now, "deferred deprovisions cancelled by new starts");
            starts -= cancelled;
            oldest.count -= cancelled;
            if oldest.count == 0 {
                self.deferred.pop_front();
            }
        }

        self.in_flight = self.deferred.drain(..).collect();
        if stops > 0 {
            self.in_flight.push(Deferred { count: stops, since: now });
        }
        let total_stops: u32 = self.in_flight.iter().map(|d| d.count).sum();

        let decision = if starts > 0 {
            ScalingDecision::start(starts)
        } else {
            ScalingDecision::stop(total_stops)
        };
        debug!(starts, stops = total_stops, ?decision, "data file schedule");
        Ok(decision)
    }

    fn scaling_complete(&mut self, _requested_stop: u32, stopped: u32) {
        // Honoured stops retire the oldest batches first.
        let mut honoured = stopped;
        for mut batch in self.in_flight.drain(..) {
            let taken = honoured.min(batch.count);
            honoured -= taken;
            batch.count -= taken;
            if batch.count > 0 {
                self.deferred.push_back(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(now: SimTime) -> SystemState {
        SystemState {
            now,
            ..SystemState::default()
        }
    }

    fn record(provision_at: SimTime, deprovision_at: SimTime) -> ProvisionRecord {
        ProvisionRecord {
            provision_at,
            deprovision_at,
        }
    }

    #[test]
    fn replays_schedule_per_tick() {
        let mut policy =
            DataFileSchedulePolicy::new(vec![record(0.0, 900.0), record(100.0, 400.0)], 600.0);
        let cluster = ClusterView::default();
        assert_eq!(policy.decide(&cluster, &at(0.0)).unwrap(), ScalingDecision::start(1));
        assert_eq!(policy.decide(&cluster, &at(300.0)).unwrap(), ScalingDecision::start(1));
        assert_eq!(policy.decide(&cluster, &at(600.0)).unwrap(), ScalingDecision::stop(1));
        assert_eq!(policy.decide(&cluster, &at(900.0)).unwrap(), ScalingDecision::stop(1));
        assert_eq!(policy.remaining(), 0);
        assert!(policy.decide(&cluster, &at(1200.0)).unwrap().is_none());
    }

    #[test]
    fn same_tick_changes_are_netted() {
        let mut policy =
            DataFileSchedulePolicy::new(vec![record(0.0, 250.0), record(200.0, 5000.0)], 600.0);
        let cluster = ClusterView::default();
        policy.decide(&cluster, &at(0.0)).unwrap();
        assert!(policy.decide(&cluster, &at(300.0)).unwrap().is_none());
    }

    #[test]
    fn shortfall_is_retried_then_dropped() {
        let mut policy = DataFileSchedulePolicy::new(vec![record(0.0, 300.0)], 600.0);
        let cluster = ClusterView::default();
        policy.decide(&cluster, &at(0.0)).unwrap();

        assert_eq!(policy.decide(&cluster, &at(300.0)).unwrap(), ScalingDecision::stop(1));
        policy.scaling_complete(1, 0);
        assert_eq!(policy.deferred_stops(), 1);

        // Still inside the retry interval.
        assert_eq!(policy.decide(&cluster, &at(600.0)).unwrap(), ScalingDecision::stop(1));
        policy.scaling_complete(1, 0);
        assert_eq!(policy.decide(&cluster, &at(900.0)).unwrap(), ScalingDecision::stop(1));
        policy.scaling_complete(1, 0);

        // 1200 - 300 exceeds the 600s interval.
        assert!(policy.decide(&cluster, &at(1200.0)).unwrap().is_none());
        assert_eq!(policy.deferred_stops(), 0);
    }

    #[test]
    fn each_deferred_batch_expires_on_its_own_due_time() {
        let mut policy = DataFileSchedulePolicy::new(vec![record(0.0, 300.0), record(0.0, 600.0)], 600.0);
        let cluster = ClusterView::default();
        assert_eq!(policy.decide(&cluster, &at(0.0)).unwrap(), ScalingDecision::start(2));

        for (now, expected) in [(300.0, 1), (600.0, 2), (900.0, 2)] {
            assert_eq!(policy.decide(&cluster, &at(now)).unwrap(), ScalingDecision::stop(expected));
            policy.scaling_complete(expected, 0);
        }
        assert_eq!(policy.deferred_stops(), 2);

        // The 300 batch is past its interval, the 600 batch is exactly at it.
        assert_eq!(policy.decide(&cluster, &at(1200.0)).unwrap(), ScalingDecision::stop(1));
        policy.scaling_complete(1, 0);
        assert_eq!(policy.deferred_stops(), 1);
        assert!(policy.decide(&cluster, &at(1500.0)).unwrap().is_none());
        assert_eq!(policy.deferred_stops(), 0);
    }

    #[test]
    fn partial_stop_retires_oldest_batch_first() {
        let mut policy = DataFileSchedulePolicy::new(vec![record(0.0, 300.0), record(0.0, 600.0)], 600.0);
        let cluster = ClusterView::default();
        policy.decide(&cluster, &at(0.0)).unwrap();
        policy.decide(&cluster, &at(300.0)).unwrap();
        policy.scaling_complete(1, 0);
        assert_eq!(policy.decide(&cluster, &at(600.0)).unwrap(), ScalingDecision::stop(2));
        policy.scaling_complete(2, 1);
        assert_eq!(policy.deferred_stops(), 1);

        // What is left is the 600 batch, still alive at 1200.
        assert_eq!(policy.decide(&cluster, &at(1200.0)).unwrap(), ScalingDecision::stop(1));
    }

    #[test]
    fn new_starts_cancel_deferred_stops() {
        let mut policy = DataFileSchedulePolicy::new(
            vec![record(0.0, 300.0), record(0.0, 300.0), record(500.0, 5000.0)],
            600.0,
        );
        let cluster = ClusterView::default();
        policy.decide(&cluster, &at(0.0)).unwrap();
        assert_eq!(policy.decide(&cluster, &at(300.0)).unwrap(), ScalingDecision::stop(2));
        policy.scaling_complete(2, 0);

        // One start at 500 absorbs one of the two carried stops.
        assert_eq!(policy.decide(&cluster, &at(600.0)).unwrap(), ScalingDecision::stop(1));
        policy.scaling_complete(1, 1);
        assert_eq!(policy.deferred_stops(), 0);
    }

    #[test]
    fn honoured_stops_clear_the_deferral() {
        let mut policy = DataFileSchedulePolicy::new(vec![record(0.0, 300.0)], 600.0);
        let cluster = ClusterView::default();
        policy.decide(&cluster, &at(0.0)).unwrap();
        policy.decide(&cluster, &at(300.0)).unwrap();
        policy.scaling_complete(1, 0);
        policy.decide(&cluster, &at(600.0)).unwrap();
        policy.scaling_complete(1, 1);
        assert_eq!(policy.deferred_stops(), 0);
        assert!(policy.decide(&cluster, &at(900.0)).unwrap().is_none());
    }
}
