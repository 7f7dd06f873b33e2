//! Startup-delay sources and seeded random streams.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Normal};

use crate::config::DelayConfig;
use crate::error::{SimError, SimResult};
use crate::types::SimTime;

/// Independent random streams derived from the single run seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStream {
    Arrivals,
    StartupDelay,
    Predictor,
}

impl RngStream {
    fn salt(self) -> u64 {
        match self {
            RngStream::Arrivals => 1,
            RngStream::StartupDelay => 2,
            RngStream::Predictor => 3,
        }
    }
}

/// Seed a `StdRng` for one stream of a run.
pub fn stream_rng(seed: u64, stream: RngStream) -> StdRng {
    let mixed = seed ^ stream.salt().wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(mixed)
}

enum DelayKind {
    Fixed(SimTime),
    Gamma(Gamma<f64>),
    TruncatedNormal { normal: Normal<f64>, budget: u32 },
}

/// Zero-argument source of VM boot durations.
pub struct DelaySampler {
    kind: DelayKind,
    rng: StdRng,
}

impl DelaySampler {
    pub fn from_config(config: &DelayConfig, rng: StdRng) -> SimResult<Self> {
        let kind = match config {
            DelayConfig::Fixed { value } => DelayKind::Fixed(*value),
            DelayConfig::Gamma { alpha, beta } => DelayKind::Gamma(
                Gamma::new(*alpha, *beta)
                    .map_err(|e| SimError::Config(format!("gamma startup delay: {e}")))?,
            ),
            DelayConfig::TruncatedNormal {
                mean,
                std_dev,
                resample_budget,
            } => DelayKind::TruncatedNormal {
                normal: Normal::new(*mean, *std_dev)
                    .map_err(|e| SimError::Config(format!("normal startup delay: {e}")))?,
                budget: (*resample_budget).max(1),
            },
        };
        Ok(Self { kind, rng })
    }

    pub fn fixed(value: SimTime) -> Self {
        Self {
            kind: DelayKind::Fixed(value),
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Draw one delay. Negative draws are fatal.
    pub fn sample(&mut self) -> SimResult<SimTime> {
        let value = match &self.kind {
            DelayKind::Fixed(v) => *v,
            DelayKind::Gamma(g) => g.sample(&mut self.rng),
            DelayKind::TruncatedNormal { normal, budget } => {
                let mut attempts = 0;
                loop {
                    if attempts == *budget {
                        return Err(SimError::ResampleBudgetExceeded {
                            what: "startup delay",
                            attempts,
                        });
                    }
                    attempts += 1;
                    let draw = normal.sample(&mut self.rng);
                    if draw > 0.0 {
                        break draw;
                    }
                }
            }
        };
        if value < 0.0 || value.is_nan() {
            return Err(SimError::NegativeSample {
                what: "startup delay",
                value,
            });
        }
        Ok(value)
    }

    /// Box the sampler as the zero-argument generator the autoscaler takes.
    pub fn into_fn(mut self) -> Box<dyn FnMut() -> SimResult<SimTime>> {
        Box::new(move || self.sample())
    }
}
