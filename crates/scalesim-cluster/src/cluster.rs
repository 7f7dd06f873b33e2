//! Cluster: VM-backed seat pools partitioned by lifecycle state.
//!
//! Each VM is one engine [`Resource`](scalesim_engine::Resource) of
//! `density` seats, tagged with a rank. Ranks are unique across all three
//! buckets and always allocated as the smallest unused value, so they stay
//! densely packed. Every bucket is kept sorted by ascending rank.

use serde::Serialize;
use tracing::debug;

use scalesim_core::{SimError, SimResult, SimTime};
use scalesim_engine::{ResourceId, ResourceTable};

/// Lifecycle state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Booting,
    Active,
    ShuttingDown,
}

/// One virtual machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Vm {
    /// Placement priority; lower ranks fill first.
    pub rank: u32,
    pub resource: ResourceId,
    pub state: VmState,
    pub start_time: SimTime,
    /// When the VM leaves Booting.
    pub ready_time: Option<SimTime>,
    /// When the VM leaves ShuttingDown.
    pub power_off_time: Option<SimTime>,
}

/// A VM removed from the cluster, with its provisioned duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetiredVm {
    pub rank: u32,
    pub start_time: SimTime,
    pub provisioned: SimTime,
}

/// Read-only snapshot handed to scaling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClusterView {
    pub density: u32,
    pub booting: u32,
    pub active: u32,
    pub shutting_down: u32,
    /// `(booting + active) * density`.
    pub capacity: u32,
    /// Unused seats over Booting and Active VMs.
    pub free_seats: u32,
    pub occupied: u32,
}

impl ClusterView {
    /// VMs that count toward capacity.
    pub fn serving_vms(&self) -> u32 {
        self.booting + self.active
    }
}

/// The VM pool. Only the autoscaler moves VMs between buckets.
#[derive(Debug)]
pub struct Cluster {
    density: u32,
    booting: Vec<Vm>,
    active: Vec<Vm>,
    shutting_down: Vec<Vm>,
    vms_provisioned: u64,
    vms_deleted: u64,
}

impl Cluster {
    pub fn new(density: u32) -> Self {
        Self {
            density,
            booting: Vec::new(),
            active: Vec::new(),
            shutting_down: Vec::new(),
            vms_provisioned: 0,
            vms_deleted: 0,
        }
    }

    /// A cluster with `count` VMs already Active at `now`.
    pub fn with_initial_vms(
        density: u32,
        count: u32,
        resources: &mut ResourceTable,
        now: SimTime,
    ) -> Self {
        let mut cluster = Self::new(density);
        for _ in 0..count {
            let mut vm = cluster.create_vm(resources, now);
            vm.state = VmState::Active;
            vm.ready_time = Some(now);
            insert_sorted(&mut cluster.active, vm);
        }
        cluster
    }

    pub fn density(&self) -> u32 {
        self.density
    }

    pub fn booting(&self) -> &[Vm] {
        &self.booting
    }

    pub fn active(&self) -> &[Vm] {
        &self.active
    }

    pub fn shutting_down(&self) -> &[Vm] {
        &self.shutting_down
    }

    /// VMs in any bucket.
    pub fn total_vms(&self) -> usize {
        self.booting.len() + self.active.len() + self.shutting_down.len()
    }

    pub fn vms_provisioned(&self) -> u64 {
        self.vms_provisioned
    }

    pub fn vms_deleted(&self) -> u64 {
        self.vms_deleted
    }

    fn all_vms(&self) -> impl Iterator<Item = &Vm> {
        self.booting
            .iter()
            .chain(self.active.iter())
            .chain(self.shutting_down.iter())
    }

    /// Smallest rank not held by any VM in any bucket.
    pub fn next_rank(&self) -> u32 {
        let mut ranks: Vec<u32> = self.all_vms().map(|vm| vm.rank).collect();
        ranks.sort_unstable();
        for (i, rank) in ranks.iter().enumerate() {
            if *rank != i as u32 {
                return i as u32;
            }
        }
        ranks.len() as u32
    }

    /// Allocate a VM with the next free rank. The VM is not in any bucket;
    /// the caller must insert it before creating another.
    pub fn create_vm(&mut self, resources: &mut ResourceTable, now: SimTime) -> Vm {
        let rank = self.next_rank();
        let resource = resources.create(format!("vm-{rank}"), self.density);
        self.vms_provisioned += 1;
        Vm {
            rank,
            resource,
            state: VmState::Booting,
            start_time: now,
            ready_time: None,
            power_off_time: None,
        }
    }

    /// Waterfall placement: the lowest-rank Active VM with a free seat.
    pub fn find_server(&self, resources: &ResourceTable) -> Option<&Vm> {
        self.active
            .iter()
            .find(|vm| resources.get(vm.resource).is_some_and(|r| r.free() > 0))
    }

    /// Seat capacity of Booting and Active VMs.
    pub fn capacity(&self) -> u32 {
        (self.booting.len() + self.active.len()) as u32 * self.density
    }

    /// Unused seats over Booting and Active VMs.
    pub fn free_seats(&self, resources: &ResourceTable) -> u32 {
        self.booting
            .iter()
            .chain(self.active.iter())
            .map(|vm| free_of(resources, vm))
            .sum()
    }

    /// Unused seats a customer can be placed into right now (Active only).
    pub fn placeable_seats(&self, resources: &ResourceTable) -> u32 {
        self.active.iter().map(|vm| free_of(resources, vm)).sum()
    }

    /// Seats currently granted on Booting and Active VMs.
    pub fn occupied(&self, resources: &ResourceTable) -> u32 {
        self.capacity() - self.free_seats(resources)
    }

    pub fn view(&self, resources: &ResourceTable) -> ClusterView {
        let free_seats = self.free_seats(resources);
        ClusterView {
            density: self.density,
            booting: self.booting.len() as u32,
            active: self.active.len() as u32,
            shutting_down: self.shutting_down.len() as u32,
            capacity: self.capacity(),
            free_seats,
            occupied: self.capacity() - free_seats,
        }
    }

    /// Insert a freshly created VM into Booting.
    pub fn push_booting(&mut self, mut vm: Vm, ready_time: SimTime) {
        vm.state = VmState::Booting;
        vm.ready_time = Some(ready_time);
        debug!(rank = vm.rank, ready_time, "vm booting");
        insert_sorted(&mut self.booting, vm);
    }

    /// Move every Booting VM with `ready_time <= now` to Active.
    ///
    /// Returns the promoted ranks.
    pub fn promote_ready(&mut self, now: SimTime) -> Vec<u32> {
        let (ready, still_booting): (Vec<Vm>, Vec<Vm>) = std::mem::take(&mut self.booting)
            .into_iter()
            .partition(|vm| vm.ready_time.is_some_and(|t| t <= now));
        self.booting = still_booting;

        let mut promoted = Vec::with_capacity(ready.len());
        for mut vm in ready {
            vm.state = VmState::Active;
            debug!(rank = vm.rank, now, "vm active");
            promoted.push(vm.rank);
            insert_sorted(&mut self.active, vm);
        }
        promoted
    }

    /// Return the lowest-rank ShuttingDown VM to Active. It keeps its rank
    /// and first start time.
    pub fn reclaim_for_start(&mut self) -> Option<u32> {
        if self.shutting_down.is_empty() {
            return None;
        }
        let mut vm = self.shutting_down.remove(0);
        vm.state = VmState::Active;
        vm.power_off_time = None;
        debug!(rank = vm.rank, "vm reclaimed from shutting down");
        let rank = vm.rank;
        insert_sorted(&mut self.active, vm);
        Some(rank)
    }

    /// Move up to `count` idle Active VMs to ShuttingDown, highest rank
    /// first, skipping ranks in `protected`.
    ///
    /// Returns the ranks moved.
    pub fn begin_shutdown(
        &mut self,
        count: u32,
        now: SimTime,
        shutdown_delay: SimTime,
        protected: &[u32],
        resources: &ResourceTable,
    ) -> Vec<u32> {
        let mut chosen: Vec<u32> = Vec::new();
        for vm in self.active.iter().rev() {
            if chosen.len() as u32 >= count {
                break;
            }
            let idle = resources.get(vm.resource).is_some_and(|r| r.is_idle());
            if idle && !protected.contains(&vm.rank) {
                chosen.push(vm.rank);
            }
        }

        for rank in &chosen {
            if let Some(pos) = self.active.iter().position(|vm| vm.rank == *rank) {
                let mut vm = self.active.remove(pos);
                vm.state = VmState::ShuttingDown;
                vm.power_off_time = Some(now + shutdown_delay);
                debug!(rank = vm.rank, power_off_time = now + shutdown_delay, "vm shutting down");
                insert_sorted(&mut self.shutting_down, vm);
            }
        }
        chosen
    }

    /// Remove every ShuttingDown VM with `power_off_time <= now` and free
    /// its resource.
    pub fn retire_powered_off(
        &mut self,
        now: SimTime,
        resources: &mut ResourceTable,
    ) -> SimResult<Vec<RetiredVm>> {
        let (due, remaining): (Vec<Vm>, Vec<Vm>) = std::mem::take(&mut self.shutting_down)
            .into_iter()
            .partition(|vm| vm.power_off_time.is_some_and(|t| t <= now));
        self.shutting_down = remaining;

        let mut retired = Vec::with_capacity(due.len());
        for vm in due {
            resources.remove(vm.resource)?;
            self.vms_deleted += 1;
            debug!(rank = vm.rank, provisioned = now - vm.start_time, "vm deleted");
            retired.push(RetiredVm {
                rank: vm.rank,
                start_time: vm.start_time,
                provisioned: now - vm.start_time,
            });
        }
        Ok(retired)
    }

    /// Empty every bucket at the end of a run, as if each VM stopped at
    /// `now`.
    pub fn force_finalize(&mut self, now: SimTime) -> Vec<RetiredVm> {
        let mut all: Vec<Vm> = Vec::with_capacity(self.total_vms());
        all.append(&mut self.active);
        all.append(&mut self.booting);
        all.append(&mut self.shutting_down);
        all.into_iter()
            .map(|vm| RetiredVm {
                rank: vm.rank,
                start_time: vm.start_time,
                provisioned: (now - vm.start_time).max(0.0),
            })
            .collect()
    }

    /// Check rank uniqueness and the per-VM seat bound.
    pub fn check_invariants(&self, resources: &ResourceTable) -> SimResult<()> {
        let mut ranks: Vec<u32> = self.all_vms().map(|vm| vm.rank).collect();
        ranks.sort_unstable();
        if ranks.windows(2).any(|w| w[0] == w[1]) {
            return Err(SimError::ResourceMisuse {
                resource: 0,
                reason: format!("duplicate VM ranks {ranks:?}"),
            });
        }
        for vm in self.all_vms() {
            let resource = resources
                .get(vm.resource)
                .ok_or(SimError::UnknownResource(vm.resource.as_u64()))?;
            if resource.capacity() != self.density || resource.granted() > resource.capacity() {
                return Err(SimError::ResourceMisuse {
                    resource: vm.resource.as_u64(),
                    reason: format!(
                        "vm rank {} holds {}/{} seats",
                        vm.rank,
                        resource.granted(),
                        resource.capacity()
                    ),
                });
            }
        }
        Ok(())
    }
}

fn free_of(resources: &ResourceTable, vm: &Vm) -> u32 {
    resources.get(vm.resource).map_or(0, |r| r.free())
}

fn insert_sorted(bucket: &mut Vec<Vm>, vm: Vm) {
    let pos = bucket.partition_point(|existing| existing.rank < vm.rank);
    bucket.insert(pos, vm);
}
