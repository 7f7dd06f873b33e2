//! Expected departures among customers currently in service.

use scalesim_core::config::DepartureConfig;
use scalesim_core::trace::read_values;
use scalesim_core::{SimConfig, SimResult, SimTime};

/// Estimates how many in-service customers leave during the next slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DepartureEstimator {
    #[default]
    None,
    /// `probabilities[i]` is the chance that a customer who has been in
    /// service for `[i * slot_width, (i + 1) * slot_width)` departs in the
    /// next slot.
    Slotted {
        probabilities: Vec<f64>,
        slot_width: SimTime,
    },
}

impl DepartureEstimator {
    pub fn from_config(config: &DepartureConfig, sim: &SimConfig) -> SimResult<Self> {
        Ok(match config {
            DepartureConfig::None => DepartureEstimator::None,
            DepartureConfig::Slotted {
                probabilities,
                slot_width,
            } => DepartureEstimator::Slotted {
                probabilities: probabilities.clone(),
                slot_width: *slot_width,
            },
            DepartureConfig::SlottedFile { path, slot_width } => DepartureEstimator::Slotted {
                probabilities: read_values(&sim.resolve(path))?,
                slot_width: *slot_width,
            },
        })
    }

    /// Sum of per-customer departure probabilities. Ages beyond the table
    /// contribute nothing.
    pub fn estimate(&self, in_service_ages: &[SimTime]) -> f64 {
        match self {
            DepartureEstimator::None => 0.0,
            DepartureEstimator::Slotted {
                probabilities,
                slot_width,
            } => in_service_ages
                .iter()
                .filter_map(|age| {
                    let slot = (age.max(0.0).floor() / slot_width).floor() as usize;
                    probabilities.get(slot)
                })
                .sum(),
        }
    }
}
