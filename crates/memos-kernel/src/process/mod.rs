//! Processes and the per-process operation surface.
//!
//! A [`Process`] is a record only: identity, descriptor table, environment
//! and standard streams. Nothing runs. [`MemOs`] binds a namespace to one
//! pid and exposes the POSIX-like calls that process would make.
//!
//! | Module     | Calls                                                   |
//! |------------|---------------------------------------------------------|
//! | `resolve`  | path resolution, `getwd`                                |
//! | `fileops`  | `open`, `read`, `write`, `seek`, `close`, `dup`, ...    |
//! | `dirops`   | `mkdir`, `link`, `remove`, `rename`, `stat`, `chmod`, ..|
//! | `mountops` | `mount`, `unmount`, mount listing                       |
//! | `env`      | environment, `expand`, `look_path`                      |

mod dirops;
mod env;
mod fileops;
mod mountops;
mod resolve;

pub use dirops::DirEntry;
pub use env::{expand, expand_env_with};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use memos_types::Errno;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ErrnoContext, VfsResult};
use crate::file::{FileId, Fd};
use crate::namespace::Namespace;
use crate::perm::Credentials;

/// Process id.
pub type Pid = u32;

/// Owner of descriptors held by the kernel itself (mount handles).
pub const KERNEL_PID: Pid = 0;
pub const INIT_PID: Pid = 1;

/// Hidden descriptor holding the process root directory.
pub const ROOT_FD: Fd = -1;
/// Hidden descriptor holding the working directory.
pub const CWD_FD: Fd = -2;
/// Hidden descriptor holding the executable of a spawned process.
pub const EXE_FD: Fd = -3;
/// First descriptor handed to kernel-held handles; they count down.
pub(crate) const KERNEL_FD_BASE: Fd = -1000;
/// Lowest descriptor `open` returns (0-2 are the standard streams).
pub const FIRST_USER_FD: Fd = 3;

/// Passing this as a uid or gid leaves it unchanged (`(uid_t)-1`).
pub const UNCHANGED: u32 = u32::MAX;

/// In-memory byte stream shared between whoever holds a clone.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(bytes.into())))
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn append(&self, data: &[u8]) {
        self.0.lock().extend_from_slice(data);
    }

    /// Remove and return up to `n` bytes from the front.
    pub fn take_front(&self, n: usize) -> Vec<u8> {
        let mut buf = self.0.lock();
        let n = n.min(buf.len());
        buf.drain(..n).collect()
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.0.lock().len())
            .finish()
    }
}

/// Where a standard stream goes.
#[derive(Debug, Clone, Default)]
pub enum Stdio {
    /// Reads see end of file; writes vanish.
    #[default]
    Null,
    Buffer(SharedBuffer),
}

impl Stdio {
    fn read(&self, buf: &mut [u8]) -> usize {
        match self {
            Stdio::Null => 0,
            Stdio::Buffer(b) => {
                let bytes = b.take_front(buf.len());
                buf[..bytes.len()].copy_from_slice(&bytes);
                bytes.len()
            }
        }
    }

    fn write(&self, data: &[u8]) -> usize {
        if let Stdio::Buffer(b) = self {
            b.append(data);
        }
        data.len()
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub ppid: Pid,
    pub creds: Credentials,
    pub umask: u32,
    pub(crate) fds: BTreeMap<Fd, FileId>,
    pub env: IndexMap<String, String>,
    pub args: Vec<String>,
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
    /// -1 while running.
    pub exit_code: i32,
}

impl Process {
    pub fn new(
        pid: Pid,
        ppid: Pid,
        creds: Credentials,
        umask: u32,
        env: IndexMap<String, String>,
    ) -> Self {
        Self {
            pid,
            ppid,
            creds,
            umask: umask & 0o777,
            fds: BTreeMap::new(),
            env,
            args: Vec::new(),
            stdin: Stdio::Null,
            stdout: Stdio::Null,
            stderr: Stdio::Null,
            exit_code: -1,
        }
    }

    /// Visible descriptors in ascending order.
    pub fn fds(&self) -> impl Iterator<Item = Fd> + '_ {
        self.fds.keys().copied().filter(|fd| *fd >= 0)
    }

    pub fn is_running(&self) -> bool {
        self.exit_code == -1
    }
}

/// A namespace seen from one process.
pub struct MemOs<'ns> {
    pub(crate) ns: &'ns mut Namespace,
    pid: Pid,
}

impl fmt::Debug for MemOs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemOs").field("pid", &self.pid).finish()
    }
}

impl<'ns> MemOs<'ns> {
    pub(crate) fn new(ns: &'ns mut Namespace, pid: Pid) -> Self {
        Self { ns, pid }
    }

    /// The namespace behind this handle.
    pub fn namespace(&mut self) -> &mut Namespace {
        &mut *self.ns
    }

    /// Handle for another process of the same namespace.
    pub fn os(&mut self, pid: Pid) -> VfsResult<MemOs<'_>> {
        self.ns.os(pid)
    }

    pub(crate) fn proc(&self) -> Result<&Process, Errno> {
        self.ns.processes.get(&self.pid).ok_or(Errno::ESRCH)
    }

    pub(crate) fn proc_mut(&mut self) -> Result<&mut Process, Errno> {
        self.ns.processes.get_mut(&self.pid).ok_or(Errno::ESRCH)
    }

    pub(crate) fn creds(&self) -> Result<Credentials, Errno> {
        Ok(self.proc()?.creds.clone())
    }

    pub fn getpid(&self) -> Pid {
        self.pid
    }

    pub fn getppid(&self) -> VfsResult<Pid> {
        Ok(self.proc().at_call("getppid")?.ppid)
    }

    pub fn geteuid(&self) -> VfsResult<u32> {
        Ok(self.proc().at_call("geteuid")?.creds.uid)
    }

    pub fn getegid(&self) -> VfsResult<u32> {
        Ok(self.proc().at_call("getegid")?.creds.gid)
    }

    pub fn getgroups(&self) -> VfsResult<Vec<u32>> {
        Ok(self.proc().at_call("getgroups")?.creds.groups.clone())
    }

    /// Replace the effective identity. Only a privileged process may.
    pub fn set_credentials(&mut self, creds: Credentials) -> VfsResult<()> {
        let process = self.proc_mut().at_call("setresuid")?;
        if !process.creds.is_privileged() && process.creds != creds {
            return Err(Errno::EPERM).at_call("setresuid");
        }
        debug!(pid = process.pid, uid = creds.uid, gid = creds.gid, "credentials changed");
        process.creds = creds;
        Ok(())
    }

    /// Set the umask, returning the previous one.
    pub fn umask(&mut self, mask: u32) -> VfsResult<u32> {
        let process = self.proc_mut().at_call("umask")?;
        let old = process.umask;
        process.umask = mask & 0o777;
        Ok(old)
    }

    /// Record an exit code. The record stays until a `wait` reaps it.
    pub fn exit(&mut self, code: i32) -> VfsResult<()> {
        let process = self.proc_mut().at_call("exit")?;
        process.exit_code = code;
        debug!(pid = process.pid, code, "process exited");
        Ok(())
    }

    pub fn args(&self) -> VfsResult<Vec<String>> {
        Ok(self.proc().at_call("args")?.args.clone())
    }

    pub fn read_stdin(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.proc().at_call("read")?.stdin.read(buf))
    }

    pub fn write_stdout(&mut self, data: &[u8]) -> VfsResult<usize> {
        Ok(self.proc().at_call("write")?.stdout.write(data))
    }

    pub fn write_stderr(&mut self, data: &[u8]) -> VfsResult<usize> {
        Ok(self.proc().at_call("write")?.stderr.write(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_of_init() {
        let mut ns = Namespace::default();
        let os = ns.init();
        assert_eq!(os.getpid(), INIT_PID);
        assert_eq!(os.getppid().unwrap(), 0);
        assert_eq!(os.geteuid().unwrap(), 0);
    }

    #[test]
    fn test_umask_returns_previous() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        assert_eq!(os.umask(0o077).unwrap(), 0o022);
        assert_eq!(os.umask(0o1777).unwrap(), 0o077);
        assert_eq!(os.umask(0).unwrap(), 0o777);
    }

    #[test]
    fn test_unprivileged_cannot_change_identity() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.set_credentials(Credentials::new(1000, 1000)).unwrap();
        let err = os.set_credentials(Credentials::root()).unwrap_err();
        assert!(err.is(Errno::EPERM));
        // setting the same identity is a no-op
        os.set_credentials(Credentials::new(1000, 1000)).unwrap();
    }

    #[test]
    fn test_stdio_buffers() {
        let mut ns = Namespace::default();
        let out = SharedBuffer::new();
        ns.processes.get_mut(&INIT_PID).unwrap().stdout = Stdio::Buffer(out.clone());
        ns.processes.get_mut(&INIT_PID).unwrap().stdin =
            Stdio::Buffer(SharedBuffer::from_bytes("hello"));
        let mut os = ns.init();
        os.write_stdout(b"hi").unwrap();
        assert_eq!(out.to_string_lossy(), "hi");
        let mut buf = [0u8; 3];
        assert_eq!(os.read_stdin(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(os.write_stderr(b"dropped").unwrap(), 7);
    }
}
