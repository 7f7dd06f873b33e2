//! Customer process.
//!
//! A customer arrives, looks for a seat with waterfall placement, and is
//! either served, refused (loss), or parked on the wait queue until a
//! departing customer or the scale process wakes it.

use tracing::trace;

use scalesim_core::{QueueDiscipline, SimError, SimResult, SimTime};
use scalesim_engine::{Context, Process, ResourceId, Yield};
use scalesim_metrics::Metric;

use crate::context::SimContext;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Arriving,
    Waiting,
    Acquiring { vm: ResourceId, requested_at: SimTime },
    Serving { vm: ResourceId },
    Releasing,
    Finished,
}

pub struct Customer {
    id: u64,
    name: String,
    service: SimTime,
    arrival: SimTime,
    phase: Phase,
}

impl Customer {
    pub fn new(id: u64, service: SimTime) -> Self {
        Self {
            id,
            name: format!("customer-{id}"),
            service,
            arrival: 0.0,
            phase: Phase::Arriving,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Admit the customer onto `vm`, or refuse it when there is none.
    fn admit(&mut self, vm: Option<ResourceId>, world: &mut SimContext, now: SimTime) -> SimResult<Yield> {
        world.check_fcfs(self.id)?;

        let wait = now - self.arrival;
        let settings = world.settings;
        if settings.discipline == QueueDiscipline::AlwaysQueue
            && settings.add_capacity_for_waiting
            && wait >= settings.max_wait
        {
            return Err(SimError::WaitExceeded {
                id: self.id,
                wait,
                limit: settings.max_wait,
            });
        }

        let servers = world.cluster.total_vms() as f64;
        world.observe(Metric::WaitTime, wait, now);
        world.observe(Metric::NumServers, servers, now);

        match vm {
            None => {
                trace!(id = self.id, now, "customer blocked");
                world.observe(Metric::Blocked, 1.0, now);
                world.observe(Metric::LostServiceTime, self.service, now);
                self.phase = Phase::Finished;
                Ok(Yield::Done)
            }
            Some(vm) => {
                world.observe(Metric::Blocked, 0.0, now);
                world.observe(Metric::AcceptedServiceTime, self.service, now);
                self.phase = Phase::Acquiring {
                    vm,
                    requested_at: now,
                };
                Ok(Yield::Request {
                    resource: vm,
                    quantity: 1,
                })
            }
        }
    }

    fn step(&mut self, world: &mut SimContext, ctx: &mut Context<'_, SimContext>) -> SimResult<Yield> {
        let now = ctx.now();
        match self.phase {
            Phase::Arriving => {
                self.arrival = now;
                let queueing = world.settings.discipline == QueueDiscipline::AlwaysQueue;
                // Earlier customers, queued or already woken, go first.
                let vm = if queueing && world.queue_is_busy() {
                    None
                } else {
                    world.cluster.find_server(ctx.resources()).map(|vm| vm.resource)
                };
                if vm.is_none() && queueing {
                    trace!(id = self.id, now, waiting = world.waiting_len(), "customer queued");
                    world.enqueue(ctx.pid());
                    self.phase = Phase::Waiting;
                    return Ok(Yield::Passivate);
                }
                self.admit(vm, world, now)
            }
            Phase::Waiting => {
                world.woken_admitted();
                let vm = world
                    .cluster
                    .find_server(ctx.resources())
                    .map(|vm| vm.resource)
                    .ok_or(SimError::NoServerAfterReactivation { id: self.id })?;
                self.admit(Some(vm), world, now)
            }
            Phase::Acquiring { vm, requested_at } => {
                if now != requested_at {
                    return Err(SimError::RequestTookTime {
                        id: self.id,
                        elapsed: now - requested_at,
                    });
                }
                world.begin_service(self.id, now);
                self.phase = Phase::Serving { vm };
                Ok(Yield::Hold(self.service))
            }
            Phase::Serving { vm } => {
                world.end_service(self.id);
                // Wake the head before the seat frees so it is sequenced
                // ahead of anything arriving at this instant.
                if world.settings.discipline == QueueDiscipline::AlwaysQueue
                    && let Some(next) = world.dequeue()
                {
                    ctx.reactivate(next, 0.0);
                }
                self.phase = Phase::Releasing;
                Ok(Yield::Release {
                    resource: vm,
                    quantity: 1,
                })
            }
            Phase::Releasing => {
                self.phase = Phase::Finished;
                Ok(Yield::Done)
            }
            Phase::Finished => Ok(Yield::Done),
        }
    }
}

impl Process<SimContext> for Customer {
    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, world: &mut SimContext, ctx: &mut Context<'_, SimContext>) -> SimResult<Yield> {
        let yielded = self.step(world, ctx)?;
        if yielded == Yield::Done && world.customer_left() {
            ctx.request_stop();
        }
        Ok(yielded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CustomerSettings;
    use scalesim_cluster::Cluster;
    use scalesim_engine::Simulation;

    fn world(sim: &mut Simulation<SimContext>, vms: u32, settings: CustomerSettings) -> SimContext {
        let cluster = Cluster::with_initial_vms(1, vms, sim.resources_mut(), 0.0);
        SimContext::new(cluster, settings)
    }

    #[test]
    fn loss_customer_without_seat_is_blocked() {
        let mut sim = Simulation::new();
        let mut world = world(&mut sim, 0, CustomerSettings::loss());
        let id = world.next_customer_id();
        sim.spawn(Box::new(Customer::new(id, 4.0)), 1.0).unwrap();
        sim.run_until(&mut world, 10.0).unwrap();

        assert_eq!(world.recorder.values(Metric::Blocked), vec![1.0]);
        assert_eq!(world.recorder.values(Metric::LostServiceTime), vec![4.0]);
        assert_eq!(world.recorder.count(Metric::AcceptedServiceTime), 0);
        assert_eq!(world.recorder.values(Metric::WaitTime), vec![0.0]);
    }

    #[test]
    fn served_customer_holds_seat_for_service_time() {
        let mut sim = Simulation::new();
        let mut world = world(&mut sim, 1, CustomerSettings::loss());
        let id = world.next_customer_id();
        sim.spawn(Box::new(Customer::new(id, 3.0)), 0.0).unwrap();

        sim.run_until(&mut world, 2.0).unwrap();
        assert_eq!(world.cluster.occupied(sim.resources()), 1);
        assert_eq!(world.in_service(), 1);

        sim.run_until(&mut world, 4.0).unwrap();
        assert_eq!(world.cluster.occupied(sim.resources()), 0);
        assert_eq!(world.in_service(), 0);
        assert_eq!(world.recorder.values(Metric::Blocked), vec![0.0]);
        assert_eq!(world.recorder.values(Metric::NumServers), vec![1.0]);
    }

    #[test]
    fn departure_wakes_the_head_of_the_queue() {
        let mut sim = Simulation::new();
        let mut world = world(&mut sim, 1, CustomerSettings::queueing(100.0));
        for (delay, service) in [(0.0, 6.0), (1.0, 1.0), (2.0, 1.0)] {
            let id = world.next_customer_id();
            sim.spawn(Box::new(Customer::new(id, service)), delay).unwrap();
        }
        sim.run_until(&mut world, 3.0).unwrap();
        assert_eq!(world.waiting_len(), 2);

        sim.run_until(&mut world, 20.0).unwrap();
        assert_eq!(world.waiting_len(), 0);
        // Second waits 6 - 1, third waits 7 - 2.
        assert_eq!(world.recorder.values(Metric::WaitTime), vec![0.0, 5.0, 5.0]);
        assert_eq!(world.recorder.sum(Metric::Blocked), 0.0);
    }

    #[test]
    fn arrival_at_departure_instant_queues_behind_woken_customer() {
        let mut sim = Simulation::new();
        let mut world = world(&mut sim, 1, CustomerSettings::queueing(100.0));
        for (delay, service) in [(0.0, 5.0), (1.0, 1.0)] {
            let id = world.next_customer_id();
            sim.spawn(Box::new(Customer::new(id, service)), delay).unwrap();
        }
        sim.run_until(&mut world, 0.5).unwrap();
        // Sequenced after the first departure but before the woken head.
        let id = world.next_customer_id();
        sim.spawn(Box::new(Customer::new(id, 1.0)), 4.5).unwrap();

        sim.run_until(&mut world, 20.0).unwrap();
        assert_eq!(world.waiting_len(), 0);
        assert_eq!(world.woken_pending(), 0);
        // Second waits 5 - 1, third waits for the second to leave at 6.
        assert_eq!(world.recorder.values(Metric::WaitTime), vec![0.0, 4.0, 1.0]);
        assert_eq!(world.recorder.sum(Metric::Blocked), 0.0);
    }

    #[test]
    fn queued_customer_over_wait_limit_is_fatal() {
        let mut sim = Simulation::new();
        let mut world = world(&mut sim, 1, CustomerSettings::queueing(2.0));
        for (delay, service) in [(0.0, 5.0), (1.0, 1.0)] {
            let id = world.next_customer_id();
            sim.spawn(Box::new(Customer::new(id, service)), delay).unwrap();
        }
        let err = sim.run_until(&mut world, 10.0).unwrap_err();
        assert!(matches!(err, SimError::WaitExceeded { id: 2, .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn reactivated_customer_without_seat_is_fatal() {
        let mut sim = Simulation::new();
        let mut world = world(&mut sim, 0, CustomerSettings::queueing(100.0));
        let id = world.next_customer_id();
        let pid = sim.spawn(Box::new(Customer::new(id, 1.0)), 0.0).unwrap();
        sim.run_until(&mut world, 1.0).unwrap();
        assert_eq!(world.dequeue(), Some(pid));

        sim.reactivate(pid, 0.0).unwrap();
        assert!(matches!(
            sim.run_until(&mut world, 2.0),
            Err(SimError::NoServerAfterReactivation { id: 1 })
        ));
    }
}
