use std::collections::BTreeSet;
use std::process::Child;

use nix::sys::wait::WaitStatus;
use nix::unistd::gettid;
use tracing::{debug, trace};

use crate::cmd::Launch;
use crate::error::{Error, Op, Result};
use crate::ptracer::{Options, Pid, Registers, Restart, Signal, Tracer};

/// A single tracing request, executed on the session thread.
pub(crate) enum Request {
    Spawn(Launch),
    Attach(Pid),
    Detach(Pid, Option<Signal>),
    Restart(Pid, Restart, Option<Signal>),
    SetOptions(Pid, Options),
    GetRegisters(Pid),
    SetRegisters(Pid, Box<Registers>),
    Peek { pid: Pid, addr: u64, len: usize },
    Poke { pid: Pid, addr: u64, data: Vec<u8> },
    EventMessage(Pid),
    Wait(Pid),
    Tracees,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Spawn(..) => "spawn",
            Request::Attach(..) => "attach",
            Request::Detach(..) => "detach",
            Request::Restart(_, Restart::Step, _) => "step",
            Request::Restart(_, Restart::Continue, _) => "continue",
            Request::Restart(_, Restart::Syscall, _) => "syscall",
            Request::SetOptions(..) => "set-options",
            Request::GetRegisters(..) => "get-registers",
            Request::SetRegisters(..) => "set-registers",
            Request::Peek { .. } => "peek",
            Request::Poke { .. } => "poke",
            Request::EventMessage(..) => "event-message",
            Request::Wait(..) => "wait",
            Request::Tracees => "tracees",
        }
    }
}

/// Successful outcome of a [`Request`].
pub(crate) enum Reply {
    Unit,
    Child(Child),
    Registers(Box<Registers>),
    Bytes(Vec<u8>),
    Message(u64),
    Wait(Pid, WaitStatus),
    Tracees(Vec<Pid>),
}

/// Executes requests against a [`Tracer`], and tracks which pids the session traces.
///
/// Lives on the session thread for its whole life.
pub(crate) struct Worker<T> {
    tracer: T,
    tracees: BTreeSet<Pid>,
    tid: Pid,
}

impl<T: Tracer> Worker<T> {
    pub fn new(tracer: T) -> Self {
        let tracees = BTreeSet::new();
        let tid = gettid();

        Self { tracer, tracees, tid }
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }

    pub fn execute(&mut self, request: Request) -> Result<Reply> {
        debug_assert_eq!(gettid(), self.tid, "tracing request issued off the session thread");

        trace!(request = request.name(), "executing request");

        let reply = match request {
            Request::Spawn(launch) => {
                let traced = launch.is_traced();
                let child = self.tracer.spawn(launch)?;

                if traced {
                    self.add_tracee(Pid::from_raw(child.id() as i32));
                }

                Reply::Child(child)
            },
            Request::Attach(pid) => {
                self.tracer.attach(pid)?;
                self.add_tracee(pid);
                Reply::Unit
            },
            Request::Detach(pid, signal) => {
                self.tracer.detach(pid, signal)?;
                self.remove_tracee(pid);
                Reply::Unit
            },
            Request::Restart(pid, restart, signal) => {
                self.tracer.restart(pid, restart, signal)?;
                Reply::Unit
            },
            Request::SetOptions(pid, options) => {
                self.tracer.set_options(pid, options)?;
                Reply::Unit
            },
            Request::GetRegisters(pid) => {
                let regs = self.tracer.registers(pid)?;
                Reply::Registers(Box::new(regs))
            },
            Request::SetRegisters(pid, regs) => {
                self.tracer.set_registers(pid, *regs)?;
                Reply::Unit
            },
            Request::Peek { pid, addr, len } => {
                let mut data = Vec::new();
                data.try_reserve_exact(len)
                    .map_err(|source| Error::Allocation { pid, requested: len, source })?;
                data.resize(len, 0);

                if len > 0 {
                    let transferred = self.tracer.read_memory(pid, addr, &mut data)?;
                    check_transfer(Op::Peek, pid, addr, len, transferred)?;
                }

                Reply::Bytes(data)
            },
            Request::Poke { pid, addr, data } => {
                if !data.is_empty() {
                    let transferred = self.tracer.write_memory(pid, addr, &data)?;
                    check_transfer(Op::Poke, pid, addr, data.len(), transferred)?;
                }

                Reply::Unit
            },
            Request::EventMessage(pid) => {
                let msg = self.tracer.event_message(pid)?;
                Reply::Message(msg)
            },
            Request::Wait(pid) => {
                let status = self.tracer.wait(pid)?;

                let changed = match status.pid() {
                    Some(changed) => changed,
                    None => internal_error!("wait status without pid"),
                };

                if let WaitStatus::Exited(..) | WaitStatus::Signaled(..) = status {
                    self.remove_tracee(changed);
                }

                Reply::Wait(changed, status)
            },
            Request::Tracees => {
                Reply::Tracees(self.tracees.iter().copied().collect())
            },
        };

        Ok(reply)
    }

    fn add_tracee(&mut self, pid: Pid) {
        if self.tracees.insert(pid) {
            debug!(pid = pid.as_raw(), "tracing new tracee");
        }
    }

    fn remove_tracee(&mut self, pid: Pid) {
        if self.tracees.remove(&pid) {
            debug!(pid = pid.as_raw(), "removing tracee");
        }
    }
}

// A memory request that moved fewer bytes than asked for is an error, never a short result.
fn check_transfer(op: Op, pid: Pid, addr: u64, requested: usize, transferred: usize) -> Result<()> {
    if transferred != requested {
        return Err(Error::PartialTransfer { op, pid, addr, requested, transferred });
    }

    Ok(())
}
