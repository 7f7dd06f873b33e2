//! Reserve-capacity policy.
//!
//! Keeps `R` spare seats after each tick. `R` comes from a constant, a
//! per-tick series, a demand predictor, or a percentile of recently
//! observed arrival counts. It is lowered by the expected departures and
//! raised by the number of waiting customers before being compared with
//! the free seats.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use tracing::trace;

use scalesim_cluster::ClusterView;
use scalesim_core::config::ReserveConfig;
use scalesim_core::trace::ValueTrace;
use scalesim_core::{ScalingDecision, SimConfig, SimError, SimResult, SystemState};
use scalesim_metrics::stats::percentile;

use super::ScalingPolicy;
use crate::departure::DepartureEstimator;
use crate::predictor::{self, DemandPredictor};

type ValueStream = Box<dyn Iterator<Item = SimResult<f64>>>;

/// Where the per-tick reserve `R` comes from.
pub enum ReserveSource {
    Constant(f64),
    /// One value per tick. Running out is fatal.
    Series(ValueStream),
    Predictor {
        predictor: Box<dyn DemandPredictor>,
        steps: usize,
    },
    /// Percentile (as a fraction) of the last `window` observed counts, or
    /// of every count so far when `window` is `None`.
    Percentile {
        counts: ValueStream,
        percentile: f64,
        window: Option<usize>,
        history: VecDeque<f64>,
    },
}

impl ReserveSource {
    pub fn from_config(config: &ReserveConfig, sim: &SimConfig, rng: StdRng) -> SimResult<Self> {
        Ok(match config {
            ReserveConfig::Constant { value } => ReserveSource::Constant(*value),
            ReserveConfig::Series { path } => {
                ReserveSource::Series(Box::new(ValueTrace::open(&sim.resolve(path))?))
            }
            ReserveConfig::Predictor { predictor, steps } => ReserveSource::Predictor {
                predictor: predictor::from_config(predictor, rng)?,
                steps: *steps,
            },
            ReserveConfig::Percentile {
                counts,
                percentile,
                window,
            } => ReserveSource::Percentile {
                counts: Box::new(ValueTrace::open(&sim.resolve(counts))?),
                percentile: *percentile,
                window: *window,
                history: VecDeque::new(),
            },
        })
    }

    fn next(&mut self, system: &SystemState, tick: usize) -> SimResult<f64> {
        match self {
            ReserveSource::Constant(value) => Ok(*value),
            ReserveSource::Series(values) => next_value(values, tick),
            ReserveSource::Predictor { predictor, steps } => Ok(predictor.predict_n_steps(
                system.arrivals_since_last_tick.map(|c| c as f64),
                *steps,
            )),
            ReserveSource::Percentile {
                counts,
                percentile: fraction,
                window,
                history,
            } => {
                history.push_back(next_value(counts, tick)?);
                if let Some(window) = window {
                    while history.len() > *window {
                        history.pop_front();
                    }
                }
                let observed: Vec<f64> = history.iter().copied().collect();
                percentile(&observed, *fraction * 100.0).ok_or_else(|| {
                    SimError::Config(format!("reserve percentile {fraction} out of range"))
                })
            }
        }
    }
}

fn next_value(values: &mut ValueStream, tick: usize) -> SimResult<f64> {
    values
        .next()
        .unwrap_or(Err(SimError::ProvisioningExhausted { tick }))
}

pub struct ReservePolicy {
    source: ReserveSource,
    departure: DepartureEstimator,
    add_capacity_for_waiting: bool,
    tick: usize,
    last_reserve: Option<f64>,
}

impl ReservePolicy {
    pub fn new(source: ReserveSource, departure: DepartureEstimator) -> Self {
        Self {
            source,
            departure,
            add_capacity_for_waiting: true,
            tick: 0,
            last_reserve: None,
        }
    }

    pub fn constant(reserve: f64) -> Self {
        Self::new(ReserveSource::Constant(reserve), DepartureEstimator::None)
    }

    /// Whether waiting customers raise the reserve.
    pub fn with_waiting_correction(mut self, enabled: bool) -> Self {
        self.add_capacity_for_waiting = enabled;
        self
    }
}

impl ScalingPolicy for ReservePolicy {
    fn name(&self) -> &'static str {
        "reserve"
    }

    fn decide(&mut self, cluster: &ClusterView, system: &SystemState) -> SimResult<ScalingDecision> {
        let raw = self.source.next(system, self.tick)?;
        self.tick += 1;
        self.last_reserve = Some(raw);

        let mut reserve = raw - self.departure.estimate(&system.in_service_ages);
        if self.add_capacity_for_waiting {
            reserve += system.waiting as f64;
        }

        let density = f64::from(cluster.density);
        let diff = f64::from(cluster.free_seats) - reserve;
        trace!(reserve, free_seats = cluster.free_seats, diff, "reserve policy");
        if diff > 0.0 {
            ScalingDecision::from_counts(0.0, (diff / density).floor())
        } else if diff < 0.0 {
            ScalingDecision::from_counts((-diff / density).ceil(), 0.0)
        } else {
            Ok(ScalingDecision::none())
        }
    }

    fn last_prediction(&self) -> Option<f64> {
        self.last_reserve
    }
}
