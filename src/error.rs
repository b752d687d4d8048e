use std::collections::TryReserveError;
use std::fmt;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;

use crate::ptracer::Pid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not spawn tracee `{}`", .path.display())]
    Spawn {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Request `{op}` failed for tracee = {pid}")]
    Ptrace {
        op: Op,
        pid: Pid,
        source: nix::Error,
    },

    #[error("Partial {op} of tracee = {pid} at {addr:#x}: requested {requested} bytes, transferred {transferred}")]
    PartialTransfer {
        op: Op,
        pid: Pid,
        addr: u64,
        requested: usize,
        transferred: usize,
    },

    #[error("Could not allocate {requested} bytes to peek tracee = {pid}")]
    Allocation {
        pid: Pid,
        requested: usize,
        source: TryReserveError,
    },

    #[error("Tracing session terminated")]
    Terminated,

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Return the `errno` reported by the failed primitive, if any.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Ptrace { source, .. } => Some(*source),
            Error::Spawn { source, .. } | Error::IO(source) => {
                source.raw_os_error().map(Errno::from_i32)
            },
            _ => None,
        }
    }

    /// Return `true` if the error means the tracee is gone, or no longer in a ptrace-stop.
    pub fn tracee_died(&self) -> bool {
        self.errno() == Some(Errno::ESRCH)
    }
}

/// Tracing request kind, used to give OS errors their context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
    Attach,
    Detach,
    Continue,
    Step,
    Syscall,
    SetOptions,
    GetRegisters,
    SetRegisters,
    Peek,
    Poke,
    EventMessage,
    Wait,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Attach => "attach",
            Op::Detach => "detach",
            Op::Continue => "continue",
            Op::Step => "step",
            Op::Syscall => "syscall",
            Op::SetOptions => "set-options",
            Op::GetRegisters => "get-registers",
            Op::SetRegisters => "set-registers",
            Op::Peek => "peek",
            Op::Poke => "poke",
            Op::EventMessage => "event-message",
            Op::Wait => "wait",
        };

        f.write_str(name)
    }
}

pub(crate) trait ResultExt<T> {
    /// Attach the request kind and target tracee to a raw OS error.
    fn during(self, op: Op, pid: Pid) -> Result<T>;
}

impl<T> ResultExt<T> for nix::Result<T> {
    fn during(self, op: Op, pid: Pid) -> Result<T> {
        self.map_err(|source| Error::Ptrace { op, pid, source })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}
