//! N-step demand predictors.
//!
//! A predictor is fed the arrival count observed since the previous tick
//! (`None` on the first tick) and returns the total demand forecast over
//! the next `n` slots. Multi-step forecasts extend the history with the
//! predictor's own one-step forecasts. Predictors carry state across calls
//! and are restarted only by constructing a new one.

use std::collections::VecDeque;

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;

use scalesim_core::config::PredictorConfig;
use scalesim_core::{SimError, SimResult};

pub trait DemandPredictor {
    fn name(&self) -> &'static str;

    fn predict_n_steps(&mut self, latest: Option<f64>, n: usize) -> f64;
}

/// Build a predictor from its configuration. `rng` drives the ARHMM
/// state walk and is unused by the other kinds.
pub fn from_config(config: &PredictorConfig, rng: StdRng) -> SimResult<Box<dyn DemandPredictor>> {
    Ok(match config {
        PredictorConfig::MovingAverage { k } => Box::new(MovingAverage::new(*k)),
        PredictorConfig::ExponentialMovingAverage { alpha } => {
            Box::new(ExponentialMovingAverage::new(*alpha))
        }
        PredictorConfig::Autoregressive { coefficients } => {
            Box::new(Autoregressive::new(coefficients.clone()))
        }
        PredictorConfig::Constant { value } => Box::new(ConstantReserve::new(*value)),
        PredictorConfig::Arhmm => Box::new(Arhmm::new(rng)?),
    })
}

/// Push `latest` and keep at most `keep` values.
fn remember(history: &mut VecDeque<f64>, latest: Option<f64>, keep: usize) {
    if let Some(value) = latest {
        history.push_back(value);
    }
    while history.len() > keep {
        history.pop_front();
    }
}

fn sum_last(values: &[f64], n: usize) -> f64 {
    values[values.len().saturating_sub(n)..].iter().sum()
}

/// Mean of the last `k` observations. Forecasts 0 until `k` values exist.
pub struct MovingAverage {
    k: usize,
    history: VecDeque<f64>,
}

impl MovingAverage {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            history: VecDeque::new(),
        }
    }
}

impl DemandPredictor for MovingAverage {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn predict_n_steps(&mut self, latest: Option<f64>, n: usize) -> f64 {
        remember(&mut self.history, latest, self.k);
        if self.history.len() < self.k {
            return 0.0;
        }
        let mut extended: Vec<f64> = self.history.iter().copied().collect();
        for _ in 0..n {
            let window = &extended[extended.len() - self.k..];
            let next = window.iter().sum::<f64>() / self.k as f64;
            extended.push(next);
        }
        sum_last(&extended, n)
    }
}

/// Single-state exponential smoothing. The first observation is its own
/// first forecast.
pub struct ExponentialMovingAverage {
    alpha: f64,
    level: Option<f64>,
}

impl ExponentialMovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, level: None }
    }
}

impl DemandPredictor for ExponentialMovingAverage {
    fn name(&self) -> &'static str {
        "exponential_moving_average"
    }

    fn predict_n_steps(&mut self, latest: Option<f64>, n: usize) -> f64 {
        if let Some(x) = latest {
            self.level = Some(match self.level {
                None => x,
                Some(level) => self.alpha * x + (1.0 - self.alpha) * level,
            });
        }
        // A flat forecast: every future slot gets the current level.
        self.level.map_or(0.0, |level| level * n as f64)
    }
}

/// Linear combination of the most recent values. `coefficients[0]`
/// weighs the latest observation.
pub struct Autoregressive {
    coefficients: Vec<f64>,
    history: VecDeque<f64>,
}

impl Autoregressive {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self {
            coefficients,
            history: VecDeque::new(),
        }
    }

    fn step(&self, values: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(values.iter().rev())
            .map(|(c, x)| c * x)
            .sum()
    }
}

impl DemandPredictor for Autoregressive {
    fn name(&self) -> &'static str {
        "autoregressive"
    }

    fn predict_n_steps(&mut self, latest: Option<f64>, n: usize) -> f64 {
        let order = self.coefficients.len();
        remember(&mut self.history, latest, order);
        if order == 0 || self.history.len() < order {
            return 0.0;
        }
        let mut extended: Vec<f64> = self.history.iter().copied().collect();
        for _ in 0..n {
            let next = self.step(&extended);
            extended.push(next);
        }
        sum_last(&extended, n)
    }
}

/// A fixed reserve that ignores history and horizon.
pub struct ConstantReserve {
    value: f64,
}

impl ConstantReserve {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl DemandPredictor for ConstantReserve {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn predict_n_steps(&mut self, _latest: Option<f64>, _n: usize) -> f64 {
        self.value
    }
}

const ARHMM_ORDER: usize = 5;

const ARHMM_TRANSITIONS: [[f64; 3]; 3] = [
    [0.9583615, 0.0001809, 0.0414576],
    [0.0117296, 0.7786373, 0.2096332],
    [0.0421590, 0.2244591, 0.7333819],
];

/// Per-state AR weights, oldest lag first.
const ARHMM_COEFFICIENTS: [[f64; ARHMM_ORDER]; 3] = [
    [0.1217175, 0.1197142, 0.1388058, 0.1273634, 0.1863004],
    [0.0, 0.0, 0.0, 0.0, 0.4107128],
    [0.0702153, 0.0574256, 0.0518409, 0.0491597, -0.3574271],
];

const ARHMM_RESIDUAL_MEANS: [f64; 3] = [1.2427012, 0.0, 0.9607062];

/// Three-state autoregressive hidden Markov model fitted to five-minute
/// arrival counts. The hidden state takes one random step after every
/// one-step forecast.
pub struct Arhmm {
    state: usize,
    history: VecDeque<f64>,
    transitions: Vec<WeightedIndex<f64>>,
    rng: StdRng,
}

impl Arhmm {
    pub fn new(rng: StdRng) -> SimResult<Self> {
        let transitions = ARHMM_TRANSITIONS
            .iter()
            .map(|row| {
                WeightedIndex::new(row.iter().copied())
                    .map_err(|e| SimError::Config(format!("arhmm transition row: {e}")))
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self {
            state: 0,
            history: VecDeque::new(),
            transitions,
            rng,
        })
    }

    pub fn state(&self) -> usize {
        self.state
    }

    fn step(&mut self, values: &[f64]) -> f64 {
        let coefficients = &ARHMM_COEFFICIENTS[self.state];
        // Pair the newest value with the last coefficient so that short
        // histories still use the most recent lags.
        let ar: f64 = coefficients
            .iter()
            .rev()
            .zip(values.iter().rev())
            .map(|(c, x)| c * x)
            .sum();
        let prediction = ar + ARHMM_RESIDUAL_MEANS[self.state];
        self.state = self.transitions[self.state].sample(&mut self.rng);
        prediction
    }
}

impl DemandPredictor for Arhmm {
    fn name(&self) -> &'static str {
        "arhmm"
    }

    fn predict_n_steps(&mut self, latest: Option<f64>, n: usize) -> f64 {
        remember(&mut self.history, latest, ARHMM_ORDER);
        let mut extended: Vec<f64> = self.history.iter().copied().collect();
        for _ in 0..n {
            let next = self.step(&extended);
            extended.push(next);
        }
        sum_last(&extended, n)
    }
}
