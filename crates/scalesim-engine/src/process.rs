//! Cooperative process protocol.
//!
//! A process is an explicit state machine. The scheduler calls
//! [`Process::resume`] each time one of its events comes due; the process
//! does its work against the shared world `W` and returns a [`Yield`]
//! telling the scheduler when to resume it next.

use std::fmt;

use scalesim_core::{SimResult, SimTime};

use crate::resource::{ResourceId, ResourceTable};

/// Stable identity of a process within one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Suspension point returned by [`Process::resume`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Yield {
    /// Resume after `duration` of simulated time.
    Hold(SimTime),
    /// Acquire units of a resource; resume once granted.
    Request { resource: ResourceId, quantity: u32 },
    /// Return units of a resource; resume at the same instant.
    Release { resource: ResourceId, quantity: u32 },
    /// Sleep until another process reactivates this one.
    Passivate,
    /// Terminate.
    Done,
}

/// Lifecycle of a process as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Registered but never scheduled.
    Created,
    /// Has a pending event.
    Scheduled,
    Running,
    /// Suspended until reactivated.
    Passive,
    /// Blocked on a resource waiting list.
    WaitingResource(ResourceId),
    Terminated,
}

/// A suspendable unit of simulated activity.
pub trait Process<W> {
    fn name(&self) -> &str;

    fn resume(&mut self, world: &mut W, ctx: &mut Context<'_, W>) -> SimResult<Yield>;
}

pub(crate) enum Command<W> {
    Spawn {
        pid: ProcessId,
        process: Box<dyn Process<W>>,
        delay: SimTime,
    },
    Reactivate {
        pid: ProcessId,
        delay: SimTime,
    },
}

/// Scheduler handle passed to a running process.
///
/// Spawns and reactivations are buffered and applied, in the order they
/// were issued, after `resume` returns and before its yield is handled.
pub struct Context<'a, W> {
    now: SimTime,
    pid: ProcessId,
    resources: &'a mut ResourceTable,
    next_pid: &'a mut u64,
    commands: Vec<Command<W>>,
    stop_requested: bool,
}

impl<'a, W> Context<'a, W> {
    pub(crate) fn new(
        now: SimTime,
        pid: ProcessId,
        resources: &'a mut ResourceTable,
        next_pid: &'a mut u64,
    ) -> Self {
        Self {
            now,
            pid,
            resources,
            next_pid,
            commands: Vec::new(),
            stop_requested: false,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Id of the running process.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn resources(&self) -> &ResourceTable {
        &*self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut *self.resources
    }

    /// Start a new process after `delay`.
    pub fn spawn(&mut self, process: Box<dyn Process<W>>, delay: SimTime) -> ProcessId {
        let pid = ProcessId(*self.next_pid);
        *self.next_pid += 1;
        self.commands.push(Command::Spawn {
            pid,
            process,
            delay,
        });
        pid
    }

    /// Wake a passive or scheduled process after `delay`.
    pub fn reactivate(&mut self, pid: ProcessId, delay: SimTime) {
        self.commands.push(Command::Reactivate { pid, delay });
    }

    /// Stop the run once the current step completes.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub(crate) fn into_parts(self) -> (Vec<Command<W>>, bool) {
        (self.commands, self.stop_requested)
    }
}
