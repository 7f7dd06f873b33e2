//! Summary statistics over observation series.

use serde::Serialize;

use scalesim_core::SimTime;

use crate::collector::Observation;

pub const SECONDS_IN_AN_HOUR: SimTime = 3_600.0;
pub const SECONDS_IN_A_DAY: SimTime = 86_400.0;

/// Number of batches for the batch-means estimator. The first is
/// discarded as warm-up.
const BATCHES: usize = 31;
/// Two-sided 95% normal quantile.
const Z_95: f64 = 1.96;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile `p` (0-100) with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Batch-means point estimate with the half-width of its 95% interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchMean {
    pub average: f64,
    pub delta: f64,
}

/// Split `values` into 31 equal batches, drop the first, and estimate the
/// mean and 95% half-width from the remaining 30 batch averages.
///
/// Returns `None` when there are fewer than 31 values.
pub fn batch_means(values: &[f64]) -> Option<BatchMean> {
    let size = values.len() / BATCHES;
    if size == 0 {
        return None;
    }
    let estimates: Vec<f64> = values
        .chunks_exact(size)
        .take(BATCHES)
        .skip(1)
        .map(|batch| batch.iter().sum::<f64>() / size as f64)
        .collect();
    let kept = estimates.len() as f64;
    let average = estimates.iter().sum::<f64>() / kept;
    let s_squared = estimates
        .iter()
        .map(|x| (x - average) * (x - average))
        .sum::<f64>()
        / kept;
    Some(BatchMean {
        average,
        delta: s_squared.sqrt() / kept.sqrt() * Z_95,
    })
}

/// Mean value per `interval`-wide bucket over `[0, horizon)`. Buckets
/// without observations count as 0.
pub fn bucket_means(observations: &[Observation], interval: SimTime, horizon: SimTime) -> Vec<f64> {
    if interval <= 0.0 || horizon <= 0.0 {
        return Vec::new();
    }
    let buckets = (horizon / interval).ceil() as usize;
    let mut sums = vec![0.0; buckets];
    let mut counts = vec![0usize; buckets];
    for obs in observations {
        let index = ((obs.at / interval).floor() as usize).min(buckets - 1);
        sums[index] += obs.value;
        counts[index] += 1;
    }
    sums.iter()
        .zip(&counts)
        .map(|(sum, count)| if *count == 0 { 0.0 } else { sum / *count as f64 })
        .collect()
}

/// Distribution of per-bucket means over one timescale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimescaleSummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub mean: f64,
}

impl TimescaleSummary {
    pub fn from_buckets(buckets: &[f64]) -> Option<Self> {
        Some(Self {
            p50: percentile(buckets, 50.0)?,
            p95: percentile(buckets, 95.0)?,
            p99: percentile(buckets, 99.0)?,
            mean: mean(buckets)?,
        })
    }
}
