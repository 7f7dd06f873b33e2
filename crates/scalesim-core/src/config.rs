//! Simulation configuration parser.
//!
//! A run is described by a single TOML file. Every pluggable component
//! (arrival source, startup delay, scaling policy, reserve source,
//! predictor, departure estimator) is an internally tagged enum selected
//! with a `kind` key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SimError, SimResult};
use crate::types::{QueueDiscipline, SimTime};

/// One year of simulated seconds.
pub const SECONDS_IN_A_YEAR: SimTime = 31_536_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub run: RunConfig,
    pub cluster: ClusterConfig,
    pub scaler: ScalerConfig,
    #[serde(default)]
    pub customers: CustomerConfig,
    pub arrivals: ArrivalConfig,
    pub policy: PolicyConfig,
    /// Directory relative trace paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_horizon")]
    pub horizon: SimTime,
    /// Observations before this instant are left out of the summary.
    #[serde(default)]
    pub warmup: SimTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Seats per VM.
    pub density: u32,
    /// VMs already Active at t=0.
    #[serde(default)]
    pub initial_vms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// Seconds between autoscaler ticks.
    pub scale_rate: SimTime,
    #[serde(default)]
    pub shutdown_delay: SimTime,
    pub startup_delay: DelayConfig,
    /// How much earlier than `scale_rate` the first tick fires.
    #[serde(default = "default_first_tick_epsilon")]
    pub first_tick_epsilon: SimTime,
    /// Delay used when the drain step reactivates a waiting customer.
    #[serde(default = "default_drain_delay")]
    pub drain_delay: SimTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerConfig {
    #[serde(default)]
    pub discipline: QueueDiscipline,
    /// Count waiting customers as extra reserve demand.
    #[serde(default = "default_true")]
    pub add_capacity_for_waiting: bool,
    /// Longest tolerated wait; defaults to `scaler.scale_rate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<SimTime>,
}

impl Default for CustomerConfig {
    fn default() -> Self {
        Self {
            discipline: QueueDiscipline::default(),
            add_capacity_for_waiting: true,
            max_wait: None,
        }
    }
}

/// Startup-delay source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayConfig {
    Fixed {
        value: SimTime,
    },
    /// Gamma with shape `alpha` and scale `beta`.
    Gamma {
        alpha: f64,
        beta: f64,
    },
    /// Normal distribution redrawn until the sample is positive.
    TruncatedNormal {
        mean: f64,
        std_dev: f64,
        #[serde(default = "default_resample_budget")]
        resample_budget: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArrivalConfig {
    /// Exponential inter-arrival (rate `lambda`) and service (rate `mu`) times.
    Poisson {
        lambda: f64,
        mu: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_customers: Option<u64>,
        /// Redraw service times shorter than the time until the next tick.
        #[serde(default)]
        regenerate_service: bool,
        #[serde(default = "default_resample_budget")]
        resample_budget: u32,
    },
    /// Two-column `inter_arrival,service` file.
    Trace { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    FixedSize {
        vms: u32,
    },
    Reserve {
        reserve: ReserveConfig,
        #[serde(default)]
        departure: DepartureConfig,
    },
    ErlangBFixed {
        worst_bp: f64,
        lambda: f64,
        mu: f64,
    },
    ErlangData {
        model: ErlangModel,
        /// One predicted user count per tick.
        predictions: PathBuf,
        mu: f64,
        #[serde(default)]
        lag: u32,
        #[serde(default = "default_worst_bp")]
        worst_bp: f64,
        #[serde(default = "default_service_level")]
        service_level: f64,
        #[serde(default = "default_target_wait")]
        target_wait: SimTime,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memo: Option<PathBuf>,
    },
    DataFile {
        path: PathBuf,
        #[serde(default = "default_retry_interval")]
        retry_interval: SimTime,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErlangModel {
    ErlangB,
    ErlangC,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReserveConfig {
    Constant {
        value: f64,
    },
    /// One reserve value per tick, read from a file.
    Series {
        path: PathBuf,
    },
    Predictor {
        predictor: PredictorConfig,
        #[serde(default = "default_steps")]
        steps: usize,
    },
    /// Percentile of the last `window` observed five-minute counts.
    Percentile {
        counts: PathBuf,
        percentile: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorConfig {
    MovingAverage { k: usize },
    ExponentialMovingAverage { alpha: f64 },
    Autoregressive { coefficients: Vec<f64> },
    Constant { value: f64 },
    Arhmm,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DepartureConfig {
    #[default]
    None,
    /// Per-slot departure probabilities given inline.
    Slotted {
        probabilities: Vec<f64>,
        #[serde(default = "default_slot_width")]
        slot_width: SimTime,
    },
    /// Per-slot departure probabilities read from a one-column file.
    SlottedFile {
        path: PathBuf,
        #[serde(default = "default_slot_width")]
        slot_width: SimTime,
    },
}

fn default_seed() -> u64 {
    333_555_777
}

fn default_horizon() -> SimTime {
    SECONDS_IN_A_YEAR
}

fn default_first_tick_epsilon() -> SimTime {
    1e-3
}

fn default_drain_delay() -> SimTime {
    1e-6
}

fn default_true() -> bool {
    true
}

fn default_resample_budget() -> u32 {
    1_000
}

fn default_worst_bp() -> f64 {
    0.01
}

fn default_service_level() -> f64 {
    0.99
}

fn default_target_wait() -> SimTime {
    15.0
}

fn default_retry_interval() -> SimTime {
    600.0
}

fn default_steps() -> usize {
    1
}

fn default_slot_width() -> SimTime {
    300.0
}

impl SimConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: SimConfig = toml::from_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// SHA-256 of the canonical TOML rendering, hex encoded.
    pub fn digest(&self) -> anyhow::Result<String> {
        let canonical = self.to_toml_string()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Resolve a trace path against the config file's directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Wait limit enforced under the always-queue discipline.
    pub fn max_wait(&self) -> SimTime {
        self.customers.max_wait.unwrap_or(self.scaler.scale_rate)
    }

    /// Scaffold a reserve-policy run over Poisson arrivals.
    pub fn scaffold(name: &str) -> Self {
        SimConfig {
            run: RunConfig {
                name: Some(name.to_string()),
                seed: default_seed(),
                horizon: 86_400.0,
                warmup: 0.0,
            },
            cluster: ClusterConfig {
                density: 1,
                initial_vms: 0,
            },
            scaler: ScalerConfig {
                scale_rate: 300.0,
                shutdown_delay: 0.0,
                startup_delay: DelayConfig::Fixed { value: 0.0 },
                first_tick_epsilon: default_first_tick_epsilon(),
                drain_delay: default_drain_delay(),
            },
            customers: CustomerConfig::default(),
            arrivals: ArrivalConfig::Poisson {
                lambda: 0.1,
                mu: 0.01,
                max_customers: None,
                regenerate_service: false,
                resample_budget: default_resample_budget(),
            },
            policy: PolicyConfig::Reserve {
                reserve: ReserveConfig::Constant { value: 5.0 },
                departure: DepartureConfig::None,
            },
            base_dir: None,
        }
    }

    /// Reject configurations that cannot describe a valid run.
    pub fn validate(&self) -> SimResult<()> {
        if self.cluster.density == 0 {
            return Err(SimError::Config("cluster.density must be at least 1".into()));
        }
        positive("run.horizon", self.run.horizon)?;
        non_negative("run.warmup", self.run.warmup)?;
        if self.run.warmup >= self.run.horizon {
            return Err(SimError::Config("run.warmup must be smaller than horizon".into()));
        }
        positive("scaler.scale_rate", self.scaler.scale_rate)?;
        non_negative("scaler.shutdown_delay", self.scaler.shutdown_delay)?;
        non_negative("scaler.first_tick_epsilon", self.scaler.first_tick_epsilon)?;
        positive("scaler.drain_delay", self.scaler.drain_delay)?;
        if self.scaler.first_tick_epsilon >= self.scaler.scale_rate {
            return Err(SimError::Config(
                "scaler.first_tick_epsilon must be smaller than scale_rate".into(),
            ));
        }
        if let Some(max_wait) = self.customers.max_wait {
            positive("customers.max_wait", max_wait)?;
        }

        match &self.scaler.startup_delay {
            DelayConfig::Fixed { value } => non_negative("startup_delay.value", *value)?,
            DelayConfig::Gamma { alpha, beta } => {
                positive("startup_delay.alpha", *alpha)?;
                positive("startup_delay.beta", *beta)?;
            }
            DelayConfig::TruncatedNormal { std_dev, mean, .. } => {
                finite("startup_delay.mean", *mean)?;
                non_negative("startup_delay.std_dev", *std_dev)?;
            }
        }

        if let ArrivalConfig::Poisson { lambda, mu, .. } = &self.arrivals {
            positive("arrivals.lambda", *lambda)?;
            positive("arrivals.mu", *mu)?;
        }

        match &self.policy {
            PolicyConfig::FixedSize { .. } => {}
            PolicyConfig::Reserve { reserve, departure } => {
                match reserve {
                    ReserveConfig::Constant { value } => finite("reserve.value", *value)?,
                    ReserveConfig::Predictor { predictor, steps } => {
                        if *steps == 0 {
                            return Err(SimError::Config("reserve.steps must be at least 1".into()));
                        }
                        validate_predictor(predictor)?;
                    }
                    ReserveConfig::Percentile { percentile, window, .. } => {
                        if !(0.0..=1.0).contains(percentile) {
                            return Err(SimError::Config(
                                "reserve.percentile must lie in [0, 1]".into(),
                            ));
                        }
                        if *window == Some(0) {
                            return Err(SimError::Config("reserve.window must be at least 1".into()));
                        }
                    }
                    ReserveConfig::Series { .. } => {}
                }
                match departure {
                    DepartureConfig::None => {}
                    DepartureConfig::Slotted { slot_width, .. }
                    | DepartureConfig::SlottedFile { slot_width, .. } => {
                        positive("departure.slot_width", *slot_width)?;
                    }
                }
            }
            PolicyConfig::ErlangBFixed { worst_bp, lambda, mu } => {
                probability("policy.worst_bp", *worst_bp)?;
                non_negative("policy.lambda", *lambda)?;
                positive("policy.mu", *mu)?;
            }
            PolicyConfig::ErlangData {
                mu,
                worst_bp,
                service_level,
                target_wait,
                ..
            } => {
                positive("policy.mu", *mu)?;
                probability("policy.worst_bp", *worst_bp)?;
                probability("policy.service_level", *service_level)?;
                non_negative("policy.target_wait", *target_wait)?;
            }
            PolicyConfig::DataFile { retry_interval, .. } => {
                non_negative("policy.retry_interval", *retry_interval)?;
            }
        }
        Ok(())
    }
}

fn validate_predictor(predictor: &PredictorConfig) -> SimResult<()> {
    match predictor {
        PredictorConfig::MovingAverage { k } if *k == 0 => {
            Err(SimError::Config("moving_average.k must be at least 1".into()))
        }
        PredictorConfig::ExponentialMovingAverage { alpha } if !(0.0..=1.0).contains(alpha) => {
            Err(SimError::Config("exponential_moving_average.alpha must lie in [0, 1]".into()))
        }
        PredictorConfig::Autoregressive { coefficients } if coefficients.is_empty() => {
            Err(SimError::Config("autoregressive.coefficients is empty".into()))
        }
        _ => Ok(()),
    }
}

fn finite(field: &str, value: f64) -> SimResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimError::Config(format!("{field} must be finite, got {value}")))
    }
}

fn non_negative(field: &str, value: f64) -> SimResult<()> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(SimError::Config(format!("{field} must not be negative, got {value}")));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> SimResult<()> {
    finite(field, value)?;
    if value <= 0.0 {
        return Err(SimError::Config(format!("{field} must be positive, got {value}")));
    }
    Ok(())
}

fn probability(field: &str, value: f64) -> SimResult<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(SimError::Config(format!("{field} must lie in (0, 1), got {value}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_round_trips() {
        let config = SimConfig::scaffold("baseline");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("baseline"));
        assert!(toml_str.contains("kind = \"reserve\""));

        let parsed: SimConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.policy, config.policy);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[run]
seed = 7

[cluster]
density = 2

[scaler]
scale_rate = 300.0
startup_delay = { kind = "gamma", alpha = 2.0, beta = 60.0 }

[arrivals]
kind = "trace"
path = "users.csv"

[policy]
kind = "fixed_size"
vms = 3
"#;
        let config: SimConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.seed, 7);
        assert_eq!(config.run.horizon, SECONDS_IN_A_YEAR);
        assert_eq!(config.cluster.density, 2);
        assert_eq!(config.policy, PolicyConfig::FixedSize { vms: 3 });
        assert_eq!(config.customers.discipline, QueueDiscipline::AlwaysQueue);
        assert_eq!(config.max_wait(), 300.0);
        assert_eq!(config.scaler.drain_delay, 1e-6);
    }

    #[test]
    fn test_parse_nested_reserve_predictor() {
        let toml_str = r#"
[run]
[cluster]
density = 1
[scaler]
scale_rate = 300.0
startup_delay = { kind = "fixed", value = 0.0 }
[arrivals]
kind = "poisson"
lambda = 0.5
mu = 0.01
[policy]
kind = "reserve"
[policy.reserve]
kind = "predictor"
steps = 2
predictor = { kind = "moving_average", k = 3 }
[policy.departure]
kind = "slotted"
probabilities = [0.5, 0.25]
"#;
        let config: SimConfig = toml::from_str(toml_str).unwrap();
        match &config.policy {
            PolicyConfig::Reserve { reserve, departure } => {
                assert_eq!(
                    reserve,
                    &ReserveConfig::Predictor {
                        predictor: PredictorConfig::MovingAverage { k: 3 },
                        steps: 2,
                    }
                );
                assert_eq!(
                    departure,
                    &DepartureConfig::Slotted {
                        probabilities: vec![0.5, 0.25],
                        slot_width: 300.0,
                    }
                );
            }
            other => panic!("unexpected policy {other:?}"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_density() {
        let mut config = SimConfig::scaffold("x");
        config.cluster.density = 0;
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let mut config = SimConfig::scaffold("x");
        config.scaler.startup_delay = DelayConfig::Fixed { value: -1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let a = SimConfig::scaffold("x");
        let mut b = SimConfig::scaffold("x");
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert_eq!(a.digest().unwrap().len(), 64);
        b.run.seed += 1;
        assert_ne!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[test]
    fn test_resolve_relative_paths() {
        let mut config = SimConfig::scaffold("x");
        config.base_dir = Some(PathBuf::from("/data/runs"));
        assert_eq!(
            config.resolve(Path::new("users.csv")),
            PathBuf::from("/data/runs/users.csv")
        );
        assert_eq!(
            config.resolve(Path::new("/abs/users.csv")),
            PathBuf::from("/abs/users.csv")
        );
    }
}
