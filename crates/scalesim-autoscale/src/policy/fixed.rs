use scalesim_cluster::ClusterView;
use scalesim_core::{ScalingDecision, SimResult, SystemState};

use super::ScalingPolicy;

/// Tops the cluster up to a fixed number of VMs on the first tick and
/// never changes it again.
pub struct FixedSizePolicy {
    vms: u32,
    issued: bool,
}

impl FixedSizePolicy {
    pub fn new(vms: u32) -> Self {
        Self { vms, issued: false }
    }
}

impl ScalingPolicy for FixedSizePolicy {
    fn name(&self) -> &'static str {
        "fixed_size"
    }

    fn decide(&mut self, cluster: &ClusterView, _system: &SystemState) -> SimResult<ScalingDecision> {
        if self.issued {
            return Ok(ScalingDecision::none());
        }
        self.issued = true;
        Ok(ScalingDecision::start(self.vms.saturating_sub(cluster.serving_vms())))
    }
}
