//! Session handle: the blocking, thread-safe face of one tracing thread.

use std::fmt;
use std::process::Child;
use std::thread::{self, JoinHandle};

use nix::sys::wait::WaitStatus;
use tracing::{debug, info};

use crate::cmd::Launch;
use crate::error::{Error, Result};
use crate::executor::{self, Client};
use crate::ptracer::{Options, Pid, Ptrace, Registers, Restart, Signal, Tracer};
use crate::request::{Reply, Request, Worker};

const DEFAULT_THREAD_NAME: &str = "tether-ptrace";

/// Configuration for a new [`Session`].
#[derive(Clone, Debug)]
pub struct Builder {
    name: String,
    stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        let name = DEFAULT_THREAD_NAME.to_owned();
        let stack_size = None;

        Self { name, stack_size }
    }

    /// Name of the session thread, as seen in `/proc/<pid>/task/<tid>/comm`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stack size of the session thread. Defaults to the `std::thread` default.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Start a session issuing requests with `ptrace(2)`.
    pub fn spawn(self) -> Result<Session> {
        self.spawn_with(Ptrace::new())
    }

    /// Start a session driving `tracer` on its own thread.
    pub fn spawn_with<T: Tracer>(self, tracer: T) -> Result<Session> {
        let (client, executor) = executor::rendezvous::<Request, Result<Reply>>();

        let mut thread = thread::Builder::new().name(self.name.clone());

        if let Some(size) = self.stack_size {
            thread = thread.stack_size(size);
        }

        let name = self.name;
        let worker = thread.spawn(move || {
            let mut worker = Worker::new(tracer);

            info!(tid = worker.tid().as_raw(), %name, "tracing session started");

            executor.run(|request| worker.execute(request));

            info!(tid = worker.tid().as_raw(), %name, "tracing session finished");
        })?;

        Ok(Session { client: Some(client), worker: Some(worker) })
    }
}

/// One tracing session.
///
/// Every request is executed on a single dedicated OS thread, which is the tracer of
/// every tracee the session spawns or attaches to. Methods take `&self` and may be
/// called from any number of threads; each call blocks until its own request has run.
///
/// Dropping the session closes its channels and joins the thread.
pub struct Session {
    client: Option<Client<Request, Result<Reply>>>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session with the default configuration.
    pub fn new() -> Result<Self> {
        Builder::new().spawn()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Spawn a child process from the session thread.
    ///
    /// If `launch` requests `trace_me` (the default), the child stops with `SIGTRAP` once
    /// it has exec'd, and must be observed with [`Session::wait()`] before it can be
    /// inspected.
    pub fn spawn(&self, launch: Launch) -> Result<Child> {
        match self.call(Request::Spawn(launch))? {
            Reply::Child(child) => Ok(child),
            _ => internal_error!("unexpected reply to spawn"),
        }
    }

    /// Attach to a running process. This will deliver a `SIGSTOP`.
    pub fn attach(&self, pid: Pid) -> Result<()> {
        self.call_unit(Request::Attach(pid))
    }

    pub fn detach(&self, pid: Pid, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.call_unit(Request::Detach(pid, signal.into()))
    }

    /// Resume the stopped tracee, delivering `signal` if given.
    pub fn cont(&self, pid: Pid, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.restart(pid, Restart::Continue, signal.into())
    }

    /// Resume the stopped tracee for one instruction.
    pub fn step(&self, pid: Pid) -> Result<()> {
        self.restart(pid, Restart::Step, None)
    }

    /// Resume the stopped tracee until the next syscall entry or exit.
    pub fn syscall(&self, pid: Pid, signal: impl Into<Option<Signal>>) -> Result<()> {
        self.restart(pid, Restart::Syscall, signal.into())
    }

    pub fn restart(&self, pid: Pid, restart: Restart, signal: Option<Signal>) -> Result<()> {
        self.call_unit(Request::Restart(pid, restart, signal))
    }

    pub fn set_options(&self, pid: Pid, options: Options) -> Result<()> {
        self.call_unit(Request::SetOptions(pid, options))
    }

    pub fn registers(&self, pid: Pid) -> Result<Registers> {
        match self.call(Request::GetRegisters(pid))? {
            Reply::Registers(regs) => Ok(*regs),
            _ => internal_error!("unexpected reply to get-registers"),
        }
    }

    pub fn set_registers(&self, pid: Pid, regs: Registers) -> Result<()> {
        self.call_unit(Request::SetRegisters(pid, Box::new(regs)))
    }

    /// Read exactly `len` bytes of tracee memory at `addr`.
    ///
    /// Fails with [`Error::PartialTransfer`] if only a prefix could be read.
    pub fn peek(&self, pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
        match self.call(Request::Peek { pid, addr, len })? {
            Reply::Bytes(data) => Ok(data),
            _ => internal_error!("unexpected reply to peek"),
        }
    }

    /// Read tracee memory at `addr` into all of `data`.
    pub fn peek_into(&self, pid: Pid, addr: u64, data: &mut [u8]) -> Result<()> {
        let read = self.peek(pid, addr, data.len())?;
        data.copy_from_slice(&read);
        Ok(())
    }

    /// Write all of `data` to tracee memory at `addr`.
    ///
    /// Fails with [`Error::PartialTransfer`] if only a prefix could be written.
    pub fn poke(&self, pid: Pid, addr: u64, data: &[u8]) -> Result<()> {
        let data = data.to_vec();
        self.call_unit(Request::Poke { pid, addr, data })
    }

    /// Return the `PTRACE_GETEVENTMSG` value for the last ptrace-event-stop of `pid`.
    pub fn event_message(&self, pid: Pid) -> Result<u64> {
        match self.call(Request::EventMessage(pid))? {
            Reply::Message(msg) => Ok(msg),
            _ => internal_error!("unexpected reply to event-message"),
        }
    }

    /// Block until `pid`, or any thread in its thread group, changes state.
    ///
    /// Returns the pid that changed, with its status. Other requests queue behind a
    /// pending wait.
    pub fn wait(&self, pid: Pid) -> Result<(Pid, WaitStatus)> {
        match self.call(Request::Wait(pid))? {
            Reply::Wait(changed, status) => Ok((changed, status)),
            _ => internal_error!("unexpected reply to wait"),
        }
    }

    /// Return the pids this session currently traces.
    pub fn tracees(&self) -> Result<Vec<Pid>> {
        match self.call(Request::Tracees)? {
            Reply::Tracees(pids) => Ok(pids),
            _ => internal_error!("unexpected reply to tracees"),
        }
    }

    /// End the session, joining its thread.
    ///
    /// Fails with [`Error::Terminated`] if the thread panicked.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn call(&self, request: Request) -> Result<Reply> {
        match &self.client {
            Some(client) => client.call(request)?,
            None => Err(Error::Terminated),
        }
    }

    fn call_unit(&self, request: Request) -> Result<()> {
        match self.call(request)? {
            Reply::Unit => Ok(()),
            _ => internal_error!("unexpected reply"),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        // Hanging up ends the executor loop.
        self.client.take();

        if let Some(worker) = self.worker.take() {
            debug!("joining tracing session thread");

            if worker.join().is_err() {
                return Err(Error::Terminated);
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.client.is_some())
            .field("worker", &self.worker.as_ref().map(|w| w.thread().id()))
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(%err, "tracing session ended abnormally");
        }
    }
}
