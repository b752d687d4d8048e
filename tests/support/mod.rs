#![allow(unused)]

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tether::{
    Error, Launch, Options, Pid, Registers, Restart, Session, Signal, Tracer, WaitStatus,
};

macro_rules! pid {
    ($raw: expr) => {
        tether::Pid::from_raw($raw)
    };
}

/// Machine encoding of a no-op, and so the exact distance a single-step over it moves
/// the program counter.
#[cfg(target_arch = "x86_64")]
pub const NOP: &[u8] = &[0x90];

#[cfg(target_arch = "aarch64")]
pub const NOP: &[u8] = &[0x1f, 0x20, 0x03, 0xd5];

/// Spawn `path` traced, and wait for its post-exec `SIGTRAP` stop.
pub fn spawn_stopped(session: &Session, launch: Launch) -> anyhow::Result<(Child, Pid)> {
    let launch = launch
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = session.spawn(launch)?;
    let pid = Pid::from_raw(child.id() as i32);

    let (changed, status) = session.wait(pid)?;
    assert_eq!(changed, pid);
    assert_eq!(status, WaitStatus::Stopped(pid, Signal::SIGTRAP));

    Ok((child, pid))
}

/// Return the end address of the `[stack]` mapping of `pid`.
pub fn stack_end(pid: Pid) -> anyhow::Result<u64> {
    let maps = fs::read_to_string(format!("/proc/{}/maps", pid))?;

    for line in maps.lines() {
        if !line.ends_with("[stack]") {
            continue;
        }

        let range = line.split_whitespace().next().unwrap_or_default();
        if let Some((_, end)) = range.split_once('-') {
            return Ok(u64::from_str_radix(end, 16)?);
        }
    }

    anyhow::bail!("no stack mapping for tracee = {}", pid)
}

/// Execution interval of one synthetic restart.
#[derive(Clone, Copy, Debug)]
pub struct Span {
    pub pid: Pid,
    pub start: Instant,
    pub end: Instant,
}

/// Synthetic tracer, for exercising the session machinery without a tracee.
///
/// Unwritten memory reads back as the bytes of its own address, so a peek result
/// identifies the request that produced it.
#[derive(Clone, Default)]
pub struct FakeTracer {
    /// Cap on the bytes moved by each memory transfer.
    pub transfer_limit: Option<usize>,

    /// Time each restart takes.
    pub delay: Duration,

    /// Panic when asked to single-step.
    pub panic_on_step: bool,

    pub spans: Arc<Mutex<Vec<Span>>>,
    pub memory: Arc<Mutex<BTreeMap<u64, u8>>>,
    pub registers: Arc<Mutex<HashMap<Pid, Registers>>>,
    pub threads: Arc<Mutex<Vec<thread::ThreadId>>>,
}

impl FakeTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn note_thread(&self) {
        self.threads.lock().unwrap().push(thread::current().id());
    }

    fn limit(&self, len: usize) -> usize {
        self.transfer_limit.map_or(len, |limit| limit.min(len))
    }
}

pub fn marker_byte(addr: u64) -> u8 {
    addr.to_le_bytes()[(addr % 8) as usize]
}

impl Tracer for FakeTracer {
    fn spawn(&mut self, launch: Launch) -> tether::Result<Child> {
        self.note_thread();
        let path = launch.path().to_owned();
        let source = io::Error::new(io::ErrorKind::Unsupported, "synthetic tracer");
        Err(Error::Spawn { path, source })
    }

    fn attach(&mut self, _pid: Pid) -> tether::Result<()> {
        self.note_thread();
        Ok(())
    }

    fn detach(&mut self, _pid: Pid, _signal: Option<Signal>) -> tether::Result<()> {
        self.note_thread();
        Ok(())
    }

    fn restart(&mut self, pid: Pid, restart: Restart, _signal: Option<Signal>) -> tether::Result<()> {
        self.note_thread();

        if self.panic_on_step && restart == Restart::Step {
            panic!("synthetic step failure");
        }

        let start = Instant::now();
        thread::sleep(self.delay);
        let end = Instant::now();

        self.spans.lock().unwrap().push(Span { pid, start, end });

        Ok(())
    }

    fn set_options(&mut self, _pid: Pid, _options: Options) -> tether::Result<()> {
        self.note_thread();
        Ok(())
    }

    fn registers(&mut self, pid: Pid) -> tether::Result<Registers> {
        self.note_thread();
        let regs = self.registers.lock().unwrap().get(&pid).copied();
        Ok(regs.unwrap_or_else(|| unsafe { std::mem::zeroed() }))
    }

    fn set_registers(&mut self, pid: Pid, regs: Registers) -> tether::Result<()> {
        self.note_thread();
        self.registers.lock().unwrap().insert(pid, regs);
        Ok(())
    }

    fn read_memory(&mut self, _pid: Pid, addr: u64, data: &mut [u8]) -> tether::Result<usize> {
        self.note_thread();
        let len = self.limit(data.len());
        let memory = self.memory.lock().unwrap();

        for (i, byte) in data[..len].iter_mut().enumerate() {
            let at = addr + i as u64;
            *byte = memory.get(&at).copied().unwrap_or_else(|| marker_byte(at));
        }

        Ok(len)
    }

    fn write_memory(&mut self, _pid: Pid, addr: u64, data: &[u8]) -> tether::Result<usize> {
        self.note_thread();
        let len = self.limit(data.len());
        let mut memory = self.memory.lock().unwrap();

        for (i, byte) in data[..len].iter().enumerate() {
            memory.insert(addr + i as u64, *byte);
        }

        Ok(len)
    }

    fn event_message(&mut self, pid: Pid) -> tether::Result<u64> {
        self.note_thread();
        Ok(pid.as_raw() as u64)
    }

    fn wait(&mut self, pid: Pid) -> tether::Result<WaitStatus> {
        self.note_thread();
        Ok(WaitStatus::Exited(pid, 0))
    }
}
