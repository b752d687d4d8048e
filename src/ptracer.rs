//! Raw tracing primitives, one method per ptrace request.
//!
//! Nothing here knows about threads. Every method must be called from the thread that
//! is (or will become) the tracer, which the [`Session`](crate::Session) guarantees by
//! only calling them from its worker.

use std::mem;
use std::process::Child;

use nix::{
    errno::Errno,
    sys::{
        ptrace::{self, AddressType},
        wait::{self, WaitPidFlag, WaitStatus},
    },
};
use tracing::debug;

use crate::cmd::Launch;
use crate::error::{Error, Op, Result, ResultExt};

#[cfg(target_arch = "aarch64")]
use crate::aarch64;

pub use nix::unistd::Pid;
pub use nix::sys::ptrace::Options;

/// POSIX signal.
pub use nix::sys::signal::Signal;

/// Register state of a tracee.
#[cfg(target_arch = "aarch64")]
pub use crate::aarch64::Registers;

/// Register state of a tracee.
#[cfg(target_arch = "x86_64")]
pub use crate::x86::Registers;

/// Size of the unit moved by one `PTRACE_PEEKDATA` or `PTRACE_POKEDATA`.
const WORD: usize = mem::size_of::<libc::c_long>();

/// Restart requests, which resume stopped tracees.
///
/// The restart mode determines the possible subsequent stops of the restarted tracee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Restart {
    Step,
    Continue,
    Syscall,
}

impl Restart {
    pub(crate) fn op(self) -> Op {
        match self {
            Restart::Step => Op::Step,
            Restart::Continue => Op::Continue,
            Restart::Syscall => Op::Syscall,
        }
    }
}

/// The primitives a session worker drives.
///
/// Memory methods may move fewer bytes than requested and report the short count as
/// success; the caller decides what a short transfer means.
pub trait Tracer: Send + 'static {
    fn spawn(&mut self, launch: Launch) -> Result<Child>;

    fn attach(&mut self, pid: Pid) -> Result<()>;

    fn detach(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()>;

    fn restart(&mut self, pid: Pid, restart: Restart, signal: Option<Signal>) -> Result<()>;

    fn set_options(&mut self, pid: Pid, options: Options) -> Result<()>;

    fn registers(&mut self, pid: Pid) -> Result<Registers>;

    fn set_registers(&mut self, pid: Pid, regs: Registers) -> Result<()>;

    /// Read into `data` from `addr`, returning the number of bytes read.
    fn read_memory(&mut self, pid: Pid, addr: u64, data: &mut [u8]) -> Result<usize>;

    /// Write `data` to `addr`, returning the number of bytes written.
    fn write_memory(&mut self, pid: Pid, addr: u64, data: &[u8]) -> Result<usize>;

    fn event_message(&mut self, pid: Pid) -> Result<u64>;

    /// Block until `pid`, or any thread in its thread group, changes state.
    fn wait(&mut self, pid: Pid) -> Result<WaitStatus>;
}

/// Linux `ptrace(2)` tracer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ptrace;

impl Ptrace {
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for Ptrace {
    fn spawn(&mut self, launch: Launch) -> Result<Child> {
        let path = launch.path().to_owned();
        let traced = launch.is_traced();

        let child = launch
            .into_command()
            .spawn()
            .map_err(|source| Error::Spawn { path, source })?;

        debug!(pid = child.id(), traced, "spawned child");

        Ok(child)
    }

    fn attach(&mut self, pid: Pid) -> Result<()> {
        ptrace::attach(pid).during(Op::Attach, pid)
    }

    fn detach(&mut self, pid: Pid, signal: Option<Signal>) -> Result<()> {
        ptrace::detach(pid, signal).during(Op::Detach, pid)
    }

    fn restart(&mut self, pid: Pid, restart: Restart, signal: Option<Signal>) -> Result<()> {
        let res = match restart {
            Restart::Step =>
                ptrace::step(pid, signal),
            Restart::Continue =>
                ptrace::cont(pid, signal),
            Restart::Syscall =>
                ptrace::syscall(pid, signal),
        };

        res.during(restart.op(), pid)
    }

    fn set_options(&mut self, pid: Pid, options: Options) -> Result<()> {
        ptrace::setoptions(pid, options).during(Op::SetOptions, pid)
    }

    #[cfg(target_arch = "x86_64")]
    fn registers(&mut self, pid: Pid) -> Result<Registers> {
        ptrace::getregs(pid).during(Op::GetRegisters, pid)
    }

    #[cfg(target_arch = "aarch64")]
    fn registers(&mut self, pid: Pid) -> Result<Registers> {
        let mut data = mem::MaybeUninit::<Registers>::uninit();
        let mut rv = libc::iovec {
            iov_base: data.as_mut_ptr() as *mut libc::c_void,
            iov_len: mem::size_of::<Registers>(),
        };

        let res = unsafe {
            libc::ptrace(
                aarch64::PTRACE_GETREGSET,
                pid.as_raw(),
                aarch64::NT_PRSTATUS,
                &mut rv as *mut _ as *mut libc::c_void,
            )
        };

        Errno::result(res).during(Op::GetRegisters, pid)?;

        Ok(unsafe { data.assume_init() })
    }

    #[cfg(target_arch = "x86_64")]
    fn set_registers(&mut self, pid: Pid, regs: Registers) -> Result<()> {
        ptrace::setregs(pid, regs).during(Op::SetRegisters, pid)
    }

    #[cfg(target_arch = "aarch64")]
    fn set_registers(&mut self, pid: Pid, mut regs: Registers) -> Result<()> {
        let mut rv = libc::iovec {
            iov_base: &mut regs as *mut _ as *mut libc::c_void,
            iov_len: mem::size_of::<Registers>(),
        };

        let res = unsafe {
            libc::ptrace(
                aarch64::PTRACE_SETREGSET,
                pid.as_raw(),
                aarch64::NT_PRSTATUS,
                &mut rv as *mut _ as *mut libc::c_void,
            )
        };

        Errno::result(res).during(Op::SetRegisters, pid)?;

        Ok(())
    }

    fn read_memory(&mut self, pid: Pid, addr: u64, data: &mut [u8]) -> Result<usize> {
        let mut done = 0;

        while done < data.len() {
            let at = match addr.checked_add(done as u64) {
                Some(at) => at,
                None => break,
            };
            let (base, skip) = align(at);

            let word = match peek_word(pid, base) {
                Ok(word) => word,
                Err(err) if done > 0 && is_fault(err) => break,
                Err(source) => return Err(Error::Ptrace { op: Op::Peek, pid, source }),
            };

            let len = (WORD - skip).min(data.len() - done);
            data[done..done + len].copy_from_slice(&word[skip..skip + len]);
            done += len;
        }

        Ok(done)
    }

    fn write_memory(&mut self, pid: Pid, addr: u64, data: &[u8]) -> Result<usize> {
        let mut done = 0;

        while done < data.len() {
            let at = match addr.checked_add(done as u64) {
                Some(at) => at,
                None => break,
            };
            let (base, skip) = align(at);
            let len = (WORD - skip).min(data.len() - done);

            // Partial words keep the tracee's bytes on either side of the write.
            let mut word = if len == WORD {
                [0; WORD]
            } else {
                match peek_word(pid, base) {
                    Ok(word) => word,
                    Err(err) if done > 0 && is_fault(err) => break,
                    Err(source) => return Err(Error::Ptrace { op: Op::Poke, pid, source }),
                }
            };
            word[skip..skip + len].copy_from_slice(&data[done..done + len]);

            match poke_word(pid, base, word) {
                Ok(()) => {},
                Err(err) if done > 0 && is_fault(err) => break,
                Err(source) => return Err(Error::Ptrace { op: Op::Poke, pid, source }),
            }

            done += len;
        }

        Ok(done)
    }

    fn event_message(&mut self, pid: Pid) -> Result<u64> {
        let msg = ptrace::getevent(pid).during(Op::EventMessage, pid)?;
        Ok(msg as u64)
    }

    fn wait(&mut self, pid: Pid) -> Result<WaitStatus> {
        wait::waitpid(pid, Some(WaitPidFlag::__WALL)).during(Op::Wait, pid)
    }
}

// Split `addr` into its word-aligned base and the offset of `addr` within that word.
fn align(addr: u64) -> (u64, usize) {
    let base = addr & !(WORD as u64 - 1);
    (base, (addr - base) as usize)
}

fn peek_word(pid: Pid, addr: u64) -> nix::Result<[u8; WORD]> {
    let word = ptrace::read(pid, addr as AddressType)?;
    Ok(word.to_ne_bytes())
}

fn poke_word(pid: Pid, addr: u64, word: [u8; WORD]) -> nix::Result<()> {
    let word = libc::c_long::from_ne_bytes(word);

    // SAFETY: `PTRACE_POKEDATA` passes `data` by value; it is never dereferenced.
    unsafe { ptrace::write(pid, addr as AddressType, word as *mut libc::c_void) }
}

// Unmapped or inaccessible tracee memory. Other errors mean the request itself failed.
fn is_fault(err: Errno) -> bool {
    matches!(err, Errno::EIO | Errno::EFAULT)
}
