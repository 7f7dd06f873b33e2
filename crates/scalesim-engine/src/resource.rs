//! Capacity-bounded resources with FIFO waiting lists.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use scalesim_core::{SimError, SimResult};

use crate::process::ProcessId;

/// Opaque handle to a resource in a [`ResourceTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A pool of `capacity` units. `granted <= capacity` always holds.
#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    capacity: u32,
    granted: u32,
    waiting: VecDeque<(ProcessId, u32)>,
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn granted(&self) -> u32 {
        self.granted
    }

    pub fn free(&self) -> u32 {
        self.capacity - self.granted
    }

    pub fn is_idle(&self) -> bool {
        self.granted == 0
    }

    /// Processes blocked on this resource, oldest first.
    pub fn waiting(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.waiting.iter().map(|(pid, _)| *pid)
    }
}

/// Every resource of a simulation, keyed by id.
#[derive(Debug, Default)]
pub struct ResourceTable {
    resources: BTreeMap<ResourceId, Resource>,
    next_id: u64,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: impl Into<String>, capacity: u32) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.resources.insert(
            id,
            Resource {
                name: name.into(),
                capacity,
                granted: 0,
                waiting: VecDeque::new(),
            },
        );
        id
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Drop a resource. Fails if it still has holders or waiters.
    pub fn remove(&mut self, id: ResourceId) -> SimResult<Resource> {
        let resource = self.lookup(id)?;
        if resource.granted > 0 || !resource.waiting.is_empty() {
            return Err(SimError::ResourceMisuse {
                resource: id.0,
                reason: format!(
                    "removed while {} unit(s) granted and {} waiter(s)",
                    resource.granted,
                    resource.waiting.len()
                ),
            });
        }
        self.resources
            .remove(&id)
            .ok_or(SimError::UnknownResource(id.0))
    }

    /// Grant `quantity` units to `pid` if they fit and nobody is queued
    /// ahead, otherwise append `pid` to the waiting list.
    ///
    /// Returns whether the request was granted immediately.
    pub fn request(&mut self, id: ResourceId, pid: ProcessId, quantity: u32) -> SimResult<bool> {
        let resource = self.lookup_mut(id)?;
        if quantity == 0 || quantity > resource.capacity {
            return Err(SimError::ResourceMisuse {
                resource: id.0,
                reason: format!(
                    "request for {quantity} unit(s) against capacity {}",
                    resource.capacity
                ),
            });
        }
        if resource.waiting.is_empty() && resource.granted + quantity <= resource.capacity {
            resource.granted += quantity;
            Ok(true)
        } else {
            resource.waiting.push_back((pid, quantity));
            Ok(false)
        }
    }

    /// Return `quantity` units and grant queued requests in FIFO order
    /// while they fit.
    ///
    /// Returns the processes whose requests were granted.
    pub fn release(&mut self, id: ResourceId, quantity: u32) -> SimResult<Vec<ProcessId>> {
        let resource = self.lookup_mut(id)?;
        if quantity > resource.granted {
            return Err(SimError::ResourceMisuse {
                resource: id.0,
                reason: format!(
                    "release of {quantity} unit(s) with only {} granted",
                    resource.granted
                ),
            });
        }
        resource.granted -= quantity;

        let mut woken = Vec::new();
        while let Some(&(pid, wanted)) = resource.waiting.front() {
            if resource.granted + wanted > resource.capacity {
                break;
            }
            resource.waiting.pop_front();
            resource.granted += wanted;
            woken.push(pid);
        }
        Ok(woken)
    }

    fn lookup(&self, id: ResourceId) -> SimResult<&Resource> {
        self.resources
            .get(&id)
            .ok_or(SimError::UnknownResource(id.0))
    }

    fn lookup_mut(&mut self, id: ResourceId) -> SimResult<&mut Resource> {
        self.resources
            .get_mut(&id)
            .ok_or(SimError::UnknownResource(id.0))
    }
}
