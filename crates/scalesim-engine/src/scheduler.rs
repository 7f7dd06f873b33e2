//! Virtual-clock event scheduler.
//!
//! Pending resumptions live in a min-heap ordered by `(due, seq)`. The
//! sequence number is assigned when an event is created, so events due at
//! the same instant run in the order they were issued and every run with
//! the same inputs replays the same event order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use tracing::{debug, trace};

use scalesim_core::{SimError, SimResult, SimTime, check_delay};

use crate::process::{Command, Context, Process, ProcessId, ProcessState, Yield};
use crate::resource::ResourceTable;

/// A pending resumption.
///
/// `token` is the owner's generation counter when the event was created;
/// rescheduling a process bumps its token and turns older events stale.
#[derive(Debug, Clone, Copy)]
struct Event {
    due: SimTime,
    seq: u64,
    pid: ProcessId,
    token: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed so `BinaryHeap` pops the earliest event.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Slot<W> {
    name: String,
    process: Option<Box<dyn Process<W>>>,
    state: ProcessState,
    token: u64,
}

/// Why [`Simulation::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The next event lies past the horizon.
    Horizon,
    /// No events remain.
    Drained,
    /// A process called [`Context::request_stop`].
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOutcome {
    pub end_time: SimTime,
    pub events_processed: u64,
    pub reason: StopReason,
}

/// Single-threaded discrete-event simulation over a shared world `W`.
pub struct Simulation<W> {
    now: SimTime,
    next_seq: u64,
    next_pid: u64,
    queue: BinaryHeap<Event>,
    processes: BTreeMap<ProcessId, Slot<W>>,
    resources: ResourceTable,
    events_processed: u64,
    stop_requested: bool,
    event_log: Option<Vec<(SimTime, ProcessId)>>,
}

impl<W> Default for Simulation<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Simulation<W> {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            next_seq: 0,
            next_pid: 0,
            queue: BinaryHeap::new(),
            processes: BTreeMap::new(),
            resources: ResourceTable::new(),
            events_processed: 0,
            stop_requested: false,
            event_log: None,
        }
    }

    /// Record `(time, pid)` for every resumed event.
    pub fn record_events(&mut self) {
        self.event_log.get_or_insert_with(Vec::new);
    }

    pub fn event_log(&self) -> &[(SimTime, ProcessId)] {
        self.event_log.as_deref().unwrap_or(&[])
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    pub fn state(&self, pid: ProcessId) -> Option<ProcessState> {
        self.processes.get(&pid).map(|slot| slot.state)
    }

    pub fn process_name(&self, pid: ProcessId) -> Option<&str> {
        self.processes.get(&pid).map(|slot| slot.name.as_str())
    }

    /// Register a process without scheduling it.
    pub fn add(&mut self, process: Box<dyn Process<W>>) -> ProcessId {
        let pid = ProcessId::from_raw(self.next_pid);
        self.next_pid += 1;
        self.insert(pid, process);
        pid
    }

    /// Register a process and schedule its first resumption after `delay`.
    pub fn spawn(&mut self, process: Box<dyn Process<W>>, delay: SimTime) -> SimResult<ProcessId> {
        let pid = self.add(process);
        self.schedule(pid, delay)?;
        Ok(pid)
    }

    /// Schedule a created, passive or already scheduled process to resume
    /// after `delay`. Any pending event for it is superseded.
    pub fn reactivate(&mut self, pid: ProcessId, delay: SimTime) -> SimResult<()> {
        let slot = self
            .processes
            .get(&pid)
            .ok_or(SimError::UnknownProcess(pid.as_u64()))?;
        let reason = match slot.state {
            ProcessState::Terminated => Some("process has terminated"),
            ProcessState::WaitingResource(_) => Some("process is waiting on a resource"),
            ProcessState::Running => Some("process is running"),
            _ => None,
        };
        if let Some(reason) = reason {
            return Err(SimError::InvalidReactivation {
                pid: pid.as_u64(),
                reason,
            });
        }
        trace!(%pid, delay, "reactivate");
        self.schedule(pid, delay)
    }

    /// Run events until the horizon, until none remain, or until a process
    /// requests a stop.
    ///
    /// When the horizon cuts the run, the clock is left at exactly
    /// `horizon`. A later call continues from where this one stopped.
    pub fn run_until(&mut self, world: &mut W, horizon: SimTime) -> SimResult<RunOutcome> {
        let start_events = self.events_processed;
        let reason = loop {
            if self.stop_requested {
                self.stop_requested = false;
                break StopReason::Requested;
            }
            let Some(next) = self.queue.peek() else {
                break StopReason::Drained;
            };
            if next.due > horizon {
                self.now = self.now.max(horizon);
                break StopReason::Horizon;
            }
            let Some(event) = self.queue.pop() else {
                break StopReason::Drained;
            };
            if !self.is_current(&event) {
                continue;
            }
            self.now = event.due;
            self.events_processed += 1;
            if let Some(log) = self.event_log.as_mut() {
                log.push((event.due, event.pid));
            }
            self.step(world, event.pid)?;
        };

        let outcome = RunOutcome {
            end_time: self.now,
            events_processed: self.events_processed - start_events,
            reason,
        };
        debug!(
            end_time = outcome.end_time,
            events = outcome.events_processed,
            reason = ?outcome.reason,
            "run stopped"
        );
        Ok(outcome)
    }

    fn is_current(&self, event: &Event) -> bool {
        self.processes
            .get(&event.pid)
            .is_some_and(|slot| slot.token == event.token && slot.state == ProcessState::Scheduled)
    }

    fn insert(&mut self, pid: ProcessId, process: Box<dyn Process<W>>) {
        let name = process.name().to_string();
        trace!(%pid, name = %name, "spawn");
        self.processes.insert(
            pid,
            Slot {
                name,
                process: Some(process),
                state: ProcessState::Created,
                token: 0,
            },
        );
    }

    fn schedule(&mut self, pid: ProcessId, delay: SimTime) -> SimResult<()> {
        let delay = check_delay(delay)?;
        let slot = self
            .processes
            .get_mut(&pid)
            .ok_or(SimError::UnknownProcess(pid.as_u64()))?;
        slot.token += 1;
        slot.state = ProcessState::Scheduled;
        self.queue.push(Event {
            due: self.now + delay,
            seq: self.next_seq,
            pid,
            token: slot.token,
        });
        self.next_seq += 1;
        Ok(())
    }

    fn step(&mut self, world: &mut W, pid: ProcessId) -> SimResult<()> {
        let slot = self
            .processes
            .get_mut(&pid)
            .ok_or(SimError::UnknownProcess(pid.as_u64()))?;
        let Some(mut process) = slot.process.take() else {
            return Err(SimError::UnknownProcess(pid.as_u64()));
        };
        slot.state = ProcessState::Running;

        let mut ctx = Context::new(self.now, pid, &mut self.resources, &mut self.next_pid);
        let result = process.resume(world, &mut ctx);
        let (commands, stop) = ctx.into_parts();

        if let Some(slot) = self.processes.get_mut(&pid) {
            slot.process = Some(process);
        }
        let yielded = result?;

        if stop {
            debug!(%pid, now = self.now, "stop requested");
            self.stop_requested = true;
        }
        for command in commands {
            match command {
                Command::Spawn {
                    pid: child,
                    process,
                    delay,
                } => {
                    self.insert(child, process);
                    self.schedule(child, delay)?;
                }
                Command::Reactivate { pid: target, delay } => {
                    self.reactivate(target, delay)?;
                }
            }
        }

        self.handle_yield(pid, yielded)
    }

    fn handle_yield(&mut self, pid: ProcessId, yielded: Yield) -> SimResult<()> {
        match yielded {
            Yield::Hold(duration) => self.schedule(pid, duration),
            Yield::Request { resource, quantity } => {
                if self.resources.request(resource, pid, quantity)? {
                    self.schedule(pid, 0.0)
                } else {
                    trace!(%pid, %resource, "blocked on resource");
                    self.set_state(pid, ProcessState::WaitingResource(resource));
                    Ok(())
                }
            }
            Yield::Release { resource, quantity } => {
                for woken in self.resources.release(resource, quantity)? {
                    self.schedule(woken, 0.0)?;
                }
                self.schedule(pid, 0.0)
            }
            Yield::Passivate => {
                trace!(%pid, "passivate");
                self.set_state(pid, ProcessState::Passive);
                Ok(())
            }
            Yield::Done => {
                trace!(%pid, "terminate");
                if let Some(slot) = self.processes.get_mut(&pid) {
                    slot.state = ProcessState::Terminated;
                    slot.process = None;
                }
                Ok(())
            }
        }
    }

    fn set_state(&mut self, pid: ProcessId, state: ProcessState) {
        if let Some(slot) = self.processes.get_mut(&pid) {
            slot.state = state;
        }
    }
}
