//! Declarative namespace setup.
//!
//! A script is an ordered list of [`Action`]s applied to a namespace one
//! after another. Scripts are plain serde data, so they can be written in
//! JSON or TOML:
//!
//! ```toml
//! [[actions]]
//! action = "dir"
//! path = "/etc"
//!
//! [[actions]]
//! action = "file"
//! path = "/etc/hostname"
//! content = "memos\n"
//! mode = "0644"
//! ```
//!
//! Execution stops at the first failing action; the error names its index.

use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use memos_types::{Errno, MountFlags, OpenFlags};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cmd::Cmd;
use crate::error::{VfsError, VfsResult};
use crate::file::Fd;
use crate::namespace::Namespace;
use crate::process::{INIT_PID, MemOs, Pid, UNCHANGED};

/// A process named by pid or by the symbol a `start` action gave it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessRef {
    Pid(Pid),
    Symbol(String),
}

/// One setup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Create (or replace) a regular file.
    File {
        path: String,
        #[serde(default)]
        content: String,
        #[serde(default = "file_mode", deserialize_with = "octal")]
        mode: u32,
        #[serde(default)]
        uid: Option<u32>,
        #[serde(default)]
        gid: Option<u32>,
    },
    /// Create a directory and any missing parents.
    Dir {
        path: String,
        #[serde(default = "dir_mode", deserialize_with = "octal")]
        mode: u32,
        #[serde(default)]
        uid: Option<u32>,
        #[serde(default)]
        gid: Option<u32>,
    },
    Hardlink {
        target: String,
        path: String,
    },
    Symlink {
        target: String,
        path: String,
    },
    Fifo {
        path: String,
        #[serde(default = "file_mode", deserialize_with = "octal")]
        mode: u32,
    },
    /// Set access and modification times, in seconds since the epoch.
    Times {
        path: String,
        atime: u64,
        mtime: u64,
    },
    Env {
        key: String,
        value: String,
    },
    /// Default owner for files and directories created afterwards.
    Owner {
        uid: u32,
        gid: u32,
    },
    /// Start a command and wait for it.
    Run {
        name: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        dir: Option<String>,
    },
    /// Start a command and remember it as `symbol`.
    Start {
        symbol: String,
        name: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        dir: Option<String>,
    },
    /// Make another process the one later actions run as.
    Switch {
        process: ProcessRef,
    },
    /// Record an exit code for the active process.
    Exit {
        #[serde(default)]
        code: i32,
    },
    /// Reap the command started as `symbol`.
    Wait {
        symbol: String,
    },
    Mount {
        source: String,
        target: String,
        fstype: String,
        #[serde(default)]
        flags: MountFlags,
        #[serde(default)]
        data: String,
    },
    /// Register a storage filesystem.
    Device {
        #[serde(default)]
        major: Option<u32>,
        #[serde(default)]
        minor: Option<u32>,
        #[serde(default = "storage_fstype")]
        fstype: String,
        source: String,
    },
    /// Open a file in the active process and remember the descriptor.
    Open {
        symbol: String,
        path: String,
        #[serde(default)]
        flags: OpenFlags,
        #[serde(default = "file_mode", deserialize_with = "octal")]
        mode: u32,
    },
    Close {
        symbol: String,
    },
    Chdir {
        path: String,
    },
    Chown {
        path: String,
        #[serde(default = "unchanged")]
        uid: u32,
        #[serde(default = "unchanged")]
        gid: u32,
    },
    Chmod {
        path: String,
        #[serde(deserialize_with = "octal")]
        mode: u32,
    },
}

fn file_mode() -> u32 {
    0o644
}

fn dir_mode() -> u32 {
    0o755
}

fn unchanged() -> u32 {
    UNCHANGED
}

fn storage_fstype() -> String {
    "ext4".to_string()
}

/// Modes are numbers or octal strings (`"0755"`, `"0o755"`).
fn octal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => {
            let digits = s.trim_start_matches("0o");
            u32::from_str_radix(digits, 8)
                .map_err(|e| de::Error::custom(format!("mode {s:?}: {e}")))
        }
    }
}

impl Action {
    /// What the action does, for error reports.
    pub fn describe(&self) -> String {
        match self {
            Action::File { path, .. } => format!("create file {path}"),
            Action::Dir { path, .. } => format!("create directory {path}"),
            Action::Hardlink { target, path } => format!("hard link {path} to {target}"),
            Action::Symlink { target, path } => format!("symlink {path} -> {target}"),
            Action::Fifo { path, .. } => format!("create fifo {path}"),
            Action::Times { path, .. } => format!("set times of {path}"),
            Action::Env { key, .. } => format!("set {key}"),
            Action::Owner { uid, gid } => format!("default owner {uid}:{gid}"),
            Action::Run { name, .. } => format!("run {name}"),
            Action::Start { symbol, name, .. } => format!("start {name} as {symbol}"),
            Action::Switch { process } => match process {
                ProcessRef::Pid(pid) => format!("switch to pid {pid}"),
                ProcessRef::Symbol(s) => format!("switch to {s}"),
            },
            Action::Exit { code } => format!("exit {code}"),
            Action::Wait { symbol } => format!("wait for {symbol}"),
            Action::Mount {
                source,
                target,
                fstype,
                ..
            } => format!("mount {source} on {target} type {fstype}"),
            Action::Device { fstype, source, .. } => format!("register {fstype} device {source}"),
            Action::Open { symbol, path, .. } => format!("open {path} as {symbol}"),
            Action::Close { symbol } => format!("close {symbol}"),
            Action::Chdir { path } => format!("chdir {path}"),
            Action::Chown { path, .. } => format!("chown {path}"),
            Action::Chmod { path, mode } => format!("chmod {mode:o} {path}"),
        }
    }
}

/// State carried from one action to the next.
#[derive(Debug)]
pub struct PopulatorData {
    /// Process the next action runs as.
    pub active: Pid,
    /// Default owner of created files and directories.
    pub uid: u32,
    pub gid: u32,
    pub cmds: IndexMap<String, Cmd>,
    pub files: IndexMap<String, (Pid, Fd)>,
}

impl Default for PopulatorData {
    fn default() -> Self {
        Self {
            active: INIT_PID,
            uid: 0,
            gid: 0,
            cmds: IndexMap::new(),
            files: IndexMap::new(),
        }
    }
}

impl PopulatorData {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse a JSON array of actions.
pub fn parse_json(text: &str) -> VfsResult<Vec<Action>> {
    serde_json::from_str(text).map_err(|e| VfsError::Config(format!("populate script: {e}")))
}

#[derive(Deserialize)]
struct Script {
    #[serde(default)]
    actions: Vec<Action>,
}

/// Parse a TOML document of `[[actions]]` tables.
pub fn parse_toml(text: &str) -> VfsResult<Vec<Action>> {
    let script: Script =
        toml::from_str(text).map_err(|e| VfsError::Config(format!("populate script: {e}")))?;
    Ok(script.actions)
}

/// Apply `actions` in order, stopping at the first failure.
#[tracing::instrument(skip_all, fields(actions = actions.len()), name = "populate")]
pub fn populate(ns: &mut Namespace, data: &mut PopulatorData, actions: &[Action]) -> VfsResult<()> {
    for (index, action) in actions.iter().enumerate() {
        debug!(index, action = %action.describe(), pid = data.active, "populate step");
        if let Err(source) = apply(ns, data, action) {
            return Err(VfsError::Populate {
                index,
                action: action.describe(),
                source: Box::new(source),
            });
        }
    }
    Ok(())
}

fn apply(ns: &mut Namespace, data: &mut PopulatorData, action: &Action) -> VfsResult<()> {
    match action {
        Action::Device {
            major,
            minor,
            fstype,
            source,
        } => {
            ns.make_filesystem(*major, *minor, fstype, source)?;
        }
        Action::Switch { process } => {
            let pid = match process {
                ProcessRef::Pid(pid) => *pid,
                ProcessRef::Symbol(symbol) => data
                    .cmds
                    .get(symbol)
                    .and_then(Cmd::pid)
                    .ok_or_else(|| VfsError::syscall("switch", Errno::ESRCH))?,
            };
            ns.os(pid)?;
            data.active = pid;
        }
        Action::Wait { symbol } => {
            let cmd = data
                .cmds
                .get_mut(symbol)
                .ok_or_else(|| VfsError::syscall("wait", Errno::ECHILD))?;
            let child = cmd.pid();
            let parent = child.and_then(|pid| ns.process(pid)).map(|p| p.ppid);
            let mut os = ns.os(data.active)?;
            cmd.wait(&mut os)?;
            if child == Some(data.active) {
                data.active = parent.unwrap_or(INIT_PID);
            }
        }
        Action::Close { symbol } => {
            let (pid, fd) = data
                .files
                .shift_remove(symbol)
                .ok_or_else(|| VfsError::syscall("close", Errno::EBADF))?;
            ns.os(pid)?.close(fd)?;
        }
        Action::Owner { uid, gid } => {
            data.uid = *uid;
            data.gid = *gid;
        }
        other => {
            let mut os = ns.os(data.active)?;
            apply_as(&mut os, data, other)?;
        }
    }
    Ok(())
}

/// Actions that run as the active process.
fn apply_as(os: &mut MemOs<'_>, data: &mut PopulatorData, action: &Action) -> VfsResult<()> {
    match action {
        Action::File {
            path,
            content,
            mode,
            uid,
            gid,
        } => {
            os.write_file(path, content.as_bytes(), *mode)?;
            os.chmod(path, *mode)?;
            set_owner(os, data, path, *uid, *gid)?;
        }
        Action::Dir {
            path,
            mode,
            uid,
            gid,
        } => {
            os.mkdir_all(path, *mode)?;
            set_owner(os, data, path, *uid, *gid)?;
        }
        Action::Hardlink { target, path } => os.link(target, path)?,
        Action::Symlink { target, path } => os.symlink(target, path)?,
        Action::Fifo { path, mode } => os.mkfifo(path, *mode)?,
        Action::Times { path, atime, mtime } => {
            let at = SystemTime::UNIX_EPOCH + Duration::from_secs(*atime);
            let mt = SystemTime::UNIX_EPOCH + Duration::from_secs(*mtime);
            os.chtimes(path, at, mt)?;
        }
        Action::Env { key, value } => os.setenv(key, value)?,
        Action::Run { name, args, dir } => {
            let mut cmd = os.command(name, args.iter().cloned());
            if let Some(dir) = dir {
                cmd = cmd.current_dir(dir.clone());
            }
            cmd.run(os)?;
        }
        Action::Start {
            symbol,
            name,
            args,
            dir,
        } => {
            let mut cmd = os.command(name, args.iter().cloned());
            if let Some(dir) = dir {
                cmd = cmd.current_dir(dir.clone());
            }
            cmd.start(os)?;
            data.cmds.insert(symbol.clone(), cmd);
        }
        Action::Exit { code } => os.exit(*code)?,
        Action::Mount {
            source,
            target,
            fstype,
            flags,
            data: options,
        } => os.mount(source, target, fstype, *flags, options)?,
        Action::Open {
            symbol,
            path,
            flags,
            mode,
        } => {
            let fd = os.open_file(path, *flags, *mode)?;
            data.files.insert(symbol.clone(), (os.getpid(), fd));
        }
        Action::Chdir { path } => os.chdir(path)?,
        Action::Chown { path, uid, gid } => os.chown(path, *uid, *gid)?,
        Action::Chmod { path, mode } => os.chmod(path, *mode)?,
        Action::Device { .. }
        | Action::Switch { .. }
        | Action::Wait { .. }
        | Action::Close { .. }
        | Action::Owner { .. } => {}
    }
    Ok(())
}

/// Give `path` its explicit owner, or the script default when that differs
/// from the creator.
fn set_owner(
    os: &mut MemOs<'_>,
    data: &PopulatorData,
    path: &str,
    uid: Option<u32>,
    gid: Option<u32>,
) -> VfsResult<()> {
    let uid = uid.unwrap_or(data.uid);
    let gid = gid.unwrap_or(data.gid);
    if uid != os.geteuid()? || gid != os.getegid()? {
        os.lchown(path, uid, gid)?;
    }
    Ok(())
}
