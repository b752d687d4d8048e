//! Issue every `ptrace(2)` request of a tracing session from one dedicated thread.
//!
//! Linux binds tracer identity to a kernel thread: only the thread that attached to (or
//! spawned) a tracee may issue requests against it. A [`Session`] owns such a thread and
//! lets any number of other threads make blocking tracing calls through it.

#[macro_use]
pub mod error;

pub mod cmd;
pub mod executor;
pub mod ptracer;
mod request;
pub mod session;

#[cfg(target_arch = "aarch64")]
mod aarch64;

#[cfg(target_arch = "x86_64")]
mod x86;

#[cfg(target_arch = "aarch64")]
pub use aarch64::{program_counter, set_program_counter, stack_pointer};

#[cfg(target_arch = "x86_64")]
pub use x86::{program_counter, set_program_counter, stack_pointer};

pub use cmd::Launch;
pub use error::{Error, Op, Result};
pub use ptracer::{Options, Pid, Ptrace, Registers, Restart, Signal, Tracer};
pub use session::{Builder, Session};

pub use nix::sys::wait::WaitStatus;
