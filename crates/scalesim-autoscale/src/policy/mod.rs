//! Scaling policies.
//!
//! A policy turns a cluster snapshot and the current demand signal into a
//! [`ScalingDecision`]. The autoscaler owns one policy and applies its
//! decisions; policies never touch the cluster directly.

pub mod datafile;
pub mod erlang;
pub mod fixed;
pub mod reserve;

pub use datafile::DataFileSchedulePolicy;
pub use erlang::{ErlangBFixedPolicy, ErlangDataPolicy};
pub use fixed::FixedSizePolicy;
pub use reserve::{ReservePolicy, ReserveSource};

use scalesim_cluster::ClusterView;
use scalesim_core::config::{ErlangModel, PolicyConfig};
use scalesim_core::trace::{ProvisionTrace, read_values};
use scalesim_core::{RngStream, ScalingDecision, SimConfig, SimResult, SystemState, stream_rng};

use crate::departure::DepartureEstimator;
use crate::erlang::ErlangCMemo;

pub trait ScalingPolicy {
    fn name(&self) -> &'static str;

    fn decide(&mut self, cluster: &ClusterView, system: &SystemState) -> SimResult<ScalingDecision>;

    /// Called after the stop phase with how many stops were requested and
    /// how many idle VMs were actually moved to ShuttingDown.
    fn scaling_complete(&mut self, _requested_stop: u32, _stopped: u32) {}

    /// Demand figure behind the latest decision, if the policy has one.
    fn last_prediction(&self) -> Option<f64> {
        None
    }
}

/// Build the policy a run configuration names. Trace paths are resolved
/// against the config file's directory.
pub fn from_config(config: &SimConfig) -> SimResult<Box<dyn ScalingPolicy>> {
    let density = config.cluster.density;
    let scale_rate = config.scaler.scale_rate;
    Ok(match &config.policy {
        PolicyConfig::FixedSize { vms } => Box::new(FixedSizePolicy::new(*vms)),
        PolicyConfig::Reserve { reserve, departure } => {
            let source = ReserveSource::from_config(
                reserve,
                config,
                stream_rng(config.run.seed, RngStream::Predictor),
            )?;
            Box::new(
                ReservePolicy::new(source, DepartureEstimator::from_config(departure, config)?)
                    .with_waiting_correction(config.customers.add_capacity_for_waiting),
            )
        }
        PolicyConfig::ErlangBFixed { worst_bp, lambda, mu } => {
            Box::new(ErlangBFixedPolicy::new(*worst_bp, lambda / mu))
        }
        PolicyConfig::ErlangData {
            model,
            predictions,
            mu,
            lag,
            worst_bp,
            service_level,
            target_wait,
            memo,
        } => {
            let predictions = read_values(&config.resolve(predictions))?;
            let policy = match model {
                ErlangModel::ErlangB => ErlangDataPolicy::erlang_b(
                    &predictions,
                    *worst_bp,
                    *mu,
                    scale_rate,
                    density,
                )?,
                ErlangModel::ErlangC => {
                    let memo_path = memo.as_ref().map(|p| config.resolve(p));
                    let mut cache = match &memo_path {
                        Some(path) => ErlangCMemo::load(path)?,
                        None => ErlangCMemo::new(),
                    };
                    let policy = ErlangDataPolicy::erlang_c(
                        &predictions,
                        *service_level,
                        *target_wait,
                        *mu,
                        scale_rate,
                        density,
                        &mut cache,
                    )?;
                    if let Some(path) = &memo_path {
                        cache.save(path)?;
                    }
                    policy
                }
            };
            Box::new(policy.with_lag(*lag))
        }
        PolicyConfig::DataFile {
            path,
            retry_interval,
        } => {
            let records = ProvisionTrace::open(&config.resolve(path))?.collect::<SimResult<Vec<_>>>()?;
            Box::new(DataFileSchedulePolicy::new(records, *retry_interval))
        }
    })
}
