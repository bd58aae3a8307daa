//! Spawning processes.
//!
//! Nothing executes: starting a [`Cmd`] creates a process record that
//! shares its parent's root and working directory, holds the executable
//! open on a hidden descriptor, and waits to be reaped.

use std::fmt;

use indexmap::IndexMap;
use memos_types::{Errno, OpenFlags};
use tracing::debug;

use crate::error::{ErrnoContext, VfsResult};
use crate::file::OpenFile;
use crate::process::{CWD_FD, EXE_FD, MemOs, Pid, Process, ROOT_FD, Stdio};

/// A command to start.
#[derive(Clone)]
pub struct Cmd {
    path: String,
    args: Vec<String>,
    env: Option<IndexMap<String, String>>,
    dir: Option<String>,
    stdin: Option<Stdio>,
    stdout: Option<Stdio>,
    stderr: Option<Stdio>,
    process: Option<Pid>,
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("dir", &self.dir)
            .field("process", &self.process)
            .finish()
    }
}

impl Cmd {
    /// `name` is looked up on `PATH` unless it contains a slash.
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: None,
            dir: None,
            stdin: None,
            stdout: None,
            stderr: None,
            process: None,
        }
    }

    /// Use `env` instead of inheriting the parent's environment.
    pub fn env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Start in `dir` instead of the parent's working directory.
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, stdio: Stdio) -> Self {
        self.stdin = Some(stdio);
        self
    }

    pub fn stdout(mut self, stdio: Stdio) -> Self {
        self.stdout = Some(stdio);
        self
    }

    pub fn stderr(mut self, stdio: Stdio) -> Self {
        self.stderr = Some(stdio);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pid of the started process, until it is waited for.
    pub fn pid(&self) -> Option<Pid> {
        self.process
    }

    /// Create the child process of `os`.
    #[tracing::instrument(skip(self, os), fields(name = %self.path), name = "cmd.start")]
    pub fn start(&mut self, os: &mut MemOs<'_>) -> VfsResult<Pid> {
        if self.process.is_some() {
            return Err(Errno::EINVAL).at_path("exec", &self.path);
        }
        let exe = os.look_path(&self.path)?;
        let ppid = os.getpid();
        let (creds, umask, env) = {
            let parent = os.proc().at_call("exec")?;
            (parent.creds.clone(), parent.umask, parent.env.clone())
        };

        let pid = os.ns.alloc_pid();
        let mut child = Process::new(pid, ppid, creds, umask, self.env.clone().unwrap_or(env));
        child.args = std::iter::once(self.path.clone())
            .chain(self.args.iter().cloned())
            .collect();
        child.stdin = self.stdin.clone().unwrap_or_default();
        child.stdout = self.stdout.clone().unwrap_or_default();
        child.stderr = self.stderr.clone().unwrap_or_default();
        os.ns.processes.insert(pid, child);

        if let Err(e) = self.setup_child(os, ppid, pid, &exe) {
            if let Err(reap) = os.ns.reap(pid) {
                debug!(pid, error = %reap, "failed to reap half-started process");
            }
            return Err(e);
        }
        debug!(pid, ppid, exe = %exe, "process spawned");
        self.process = Some(pid);
        Ok(pid)
    }

    fn setup_child(&self, os: &mut MemOs<'_>, ppid: Pid, pid: Pid, exe: &str) -> VfsResult<()> {
        for fd in [ROOT_FD, CWD_FD] {
            let id = os.ns.file_id(ppid, fd).at_call("exec")?;
            os.ns.share_file(id, pid, fd).at_call("exec")?;
        }
        let mut child = MemOs::new(&mut *os.ns, pid);
        let loc = child
            .resolve(exe, true)
            .and_then(|r| r.node())
            .at_path("exec", exe)?;
        let mut file = OpenFile::new(loc, pid, OpenFlags::empty(), child.abs_path(exe));
        file.readable = true;
        file.executable = true;
        child.ns.install_file(pid, EXE_FD, file).at_path("exec", exe)?;
        if let Some(dir) = &self.dir {
            child.chdir(dir)?;
        }
        Ok(())
    }

    /// Reap the started process and return its exit code (0 if it never
    /// called `exit`).
    pub fn wait(&mut self, os: &mut MemOs<'_>) -> VfsResult<i32> {
        let Some(pid) = self.process.take() else {
            return Err(Errno::ECHILD).at_call("wait");
        };
        let code = os.ns.reap(pid).at_call("wait")?;
        Ok(if code == -1 { 0 } else { code })
    }

    /// Start, then wait.
    pub fn run(&mut self, os: &mut MemOs<'_>) -> VfsResult<i32> {
        self.start(os)?;
        self.wait(os)
    }
}

impl MemOs<'_> {
    /// A command to be started by this process.
    pub fn command<I, S>(&self, name: &str, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(name, args)
    }
}
