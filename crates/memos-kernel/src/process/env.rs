//! Environment variables, `$VAR` expansion and executable lookup.

use indexmap::IndexMap;
use memos_types::{Errno, MountFlags, path};

use super::MemOs;
use crate::error::{ErrnoContext, VfsResult};
use crate::inode::InodeBody;
use crate::perm;

/// Replace `$VAR` and `${VAR}` in `s` using `mapping`.
pub fn expand(s: &str, mut mapping: impl FnMut(&str) -> String) -> String {
    shellexpand::env_with_context_no_errors(s, |key: &str| Some(mapping(key))).into_owned()
}

/// [`expand`] against an environment map; unset variables expand to
/// nothing.
pub fn expand_env_with(s: &str, env: &IndexMap<String, String>) -> String {
    expand(s, |key| env.get(key).cloned().unwrap_or_default())
}

impl MemOs<'_> {
    /// `KEY=value` strings in insertion order.
    pub fn environ(&self) -> Vec<String> {
        match self.proc() {
            Ok(p) => p.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn setenv(&mut self, key: &str, value: &str) -> VfsResult<()> {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return Err(Errno::EINVAL).at_call("setenv");
        }
        self.proc_mut()
            .at_call("setenv")?
            .env
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn lookup_env(&self, key: &str) -> Option<String> {
        self.proc().ok()?.env.get(key).cloned()
    }

    /// Value of `key`, empty when unset.
    pub fn getenv(&self, key: &str) -> String {
        self.lookup_env(key).unwrap_or_default()
    }

    pub fn unsetenv(&mut self, key: &str) -> VfsResult<()> {
        self.proc_mut().at_call("unsetenv")?.env.shift_remove(key);
        Ok(())
    }

    pub fn clearenv(&mut self) -> VfsResult<()> {
        self.proc_mut().at_call("clearenv")?.env.clear();
        Ok(())
    }

    /// Expand `$VAR` references against this process's environment.
    pub fn expand_env(&self, s: &str) -> String {
        expand(s, |key| self.getenv(key))
    }

    /// Find an executable. A name containing `/` is checked as given;
    /// otherwise each `PATH` directory is tried in order (the configured
    /// default when `PATH` is unset).
    pub fn look_path(&mut self, name: &str) -> VfsResult<String> {
        if name.contains('/') {
            self.check_executable(name).at_path("exec", name)?;
            return Ok(name.to_string());
        }
        let search = self
            .lookup_env("PATH")
            .unwrap_or_else(|| self.ns.config.path.clone());
        for dir in search.split(':') {
            let dir = if dir.is_empty() { "." } else { dir };
            let candidate = path::join(dir, name);
            if self.check_executable(&candidate).is_ok() {
                return Ok(candidate);
            }
        }
        Err(Errno::ENOENT).at_path("exec", name)
    }

    /// A regular file with an execute bit for the caller, on a mount that
    /// allows execution.
    pub(crate) fn check_executable(&mut self, name: &str) -> Result<(), Errno> {
        let loc = self.resolve(name, true)?.node()?;
        let creds = self.creds()?;
        let inode = self.ns.effective_inode(self.ns.loc_ref(loc))?;
        if !matches!(inode.body, InodeBody::File { .. }) || !perm::may_exec(inode, &creds) {
            return Err(Errno::EACCES);
        }
        if self.ns.mount(loc.mount).flags.contains(MountFlags::NOEXEC) {
            return Err(Errno::EACCES);
        }
        Ok(())
    }
}
