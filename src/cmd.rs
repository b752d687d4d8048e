use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::sys::ptrace;


/// Process to spawn as a child of the session thread.
///
/// The thread that forks a tracee which requests `PTRACE_TRACEME` becomes its tracer, so
/// a `Launch` is only turned into a real process on the session thread.
#[derive(Debug)]
pub struct Launch {
    /// Path to the executable.
    path: PathBuf,

    /// Arguments after `argv[0]`.
    args: Vec<OsString>,

    /// Override for `argv[0]`. Defaults to `path`.
    arg0: Option<OsString>,

    /// Environment overrides, applied in order. `None` removes the variable.
    env: Vec<(OsString, Option<OsString>)>,

    /// Start from an empty environment.
    env_clear: bool,

    current_dir: Option<PathBuf>,

    stdin: Option<Stdio>,
    stdout: Option<Stdio>,
    stderr: Option<Stdio>,

    /// Request `PTRACE_TRACEME` after forking, pre-exec.
    ///
    /// Defaults to `true`.
    trace_me: bool,
}

impl Launch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: vec![],
            arg0: None,
            env: vec![],
            env_clear: false,
            current_dir: None,
            stdin: None,
            stdout: None,
            stderr: None,
            trace_me: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Set `argv[0]` independently of the executable path.
    pub fn arg0(mut self, arg0: impl AsRef<OsStr>) -> Self {
        self.arg0 = Some(arg0.as_ref().to_owned());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, val: impl AsRef<OsStr>) -> Self {
        self.env.push((key.as_ref().to_owned(), Some(val.as_ref().to_owned())));
        self
    }

    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Self {
        self.env.push((key.as_ref().to_owned(), None));
        self
    }

    pub fn env_clear(mut self) -> Self {
        self.env.clear();
        self.env_clear = true;
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, cfg: impl Into<Stdio>) -> Self {
        self.stdin = Some(cfg.into());
        self
    }

    pub fn stdout(mut self, cfg: impl Into<Stdio>) -> Self {
        self.stdout = Some(cfg.into());
        self
    }

    pub fn stderr(mut self, cfg: impl Into<Stdio>) -> Self {
        self.stderr = Some(cfg.into());
        self
    }

    /// Set the value of the `trace_me` flag.
    pub fn trace_me(mut self, trace_me: bool) -> Self {
        self.trace_me = trace_me;
        self
    }

    pub fn is_traced(&self) -> bool {
        self.trace_me
    }

    /// Build the `std` command to fork and exec.
    ///
    /// If `self.trace_me`, the child requests `PTRACE_TRACEME` before `execve()`, and so
    /// reports a `SIGTRAP` stop once the new image is loaded.
    pub(crate) fn into_command(self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args);

        if let Some(arg0) = &self.arg0 {
            cmd.arg0(arg0);
        }

        if self.env_clear {
            cmd.env_clear();
        }

        for (key, val) in &self.env {
            match val {
                Some(val) => cmd.env(key, val),
                None => cmd.env_remove(key),
            };
        }

        if let Some(dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        if let Some(stdin) = self.stdin {
            cmd.stdin(stdin);
        }

        if let Some(stdout) = self.stdout {
            cmd.stdout(stdout);
        }

        if let Some(stderr) = self.stderr {
            cmd.stderr(stderr);
        }

        if self.trace_me {
            // The hook runs post-fork, so it must not allocate: only map the errno.
            unsafe {
                cmd.pre_exec(|| {
                    ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32))
                });
            }
        }

        cmd
    }
}
