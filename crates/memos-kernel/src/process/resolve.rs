//! Path resolution.
//!
//! Resolution walks segment by segment from the process root (absolute
//! paths) or working directory. `..` steps out of mount roots into the
//! parent mount and never above the process root. Landing on a mountpoint
//! continues at the root of the mount attached there. Symlinks are spliced
//! into the remaining segments, up to the configured hop limit.

use std::collections::VecDeque;

use memos_types::Errno;
use memos_types::path::{check_lengths, segments};
use tracing::trace;

use super::{CWD_FD, MemOs, ROOT_FD};
use crate::error::{ErrnoContext, VfsResult};
use crate::file::Fd;
use crate::mount::Loc;
use crate::namespace::Namespace;
use crate::perm::{self, Credentials};
use crate::process::Pid;

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    /// Directory holding the final name; `None` for the process root.
    pub parent: Option<Loc>,
    /// The object itself, if it exists.
    pub node: Option<Loc>,
    /// Final segment.
    pub name: String,
}

impl Resolved {
    pub fn node(&self) -> Result<Loc, Errno> {
        self.node.ok_or(Errno::ENOENT)
    }

    pub fn parent(&self) -> Result<Loc, Errno> {
        self.parent.ok_or(Errno::EBUSY)
    }
}

enum Walk {
    /// Nothing above: the process root or the namespace root.
    Top(Loc),
    /// A non-root directory whose parent is in the same mount.
    Step(Loc),
}

impl Namespace {
    pub(crate) fn fd_loc(&self, pid: Pid, fd: Fd) -> Result<Loc, Errno> {
        let id = self.file_id(pid, fd)?;
        Ok(self.open_file(id)?.loc)
    }

    fn walk_out(&self, mut cur: Loc, root: Loc) -> Walk {
        loop {
            if cur == root {
                return Walk::Top(cur);
            }
            let mount = self.mount(cur.mount);
            if cur.ino != mount.root {
                return Walk::Step(cur);
            }
            match mount.parent {
                Some(at) => cur = at,
                None => return Walk::Top(cur),
            }
        }
    }

    /// Where `..` from `cur` leads.
    pub(crate) fn climb(&self, cur: Loc, root: Loc) -> Result<Loc, Errno> {
        match self.walk_out(cur, root) {
            Walk::Top(top) => Ok(top),
            Walk::Step(dir) => {
                let parent = self
                    .inode(self.loc_ref(dir))?
                    .parent()
                    .ok_or(Errno::ENOTDIR)?;
                Ok(Loc::new(dir.mount, parent))
            }
        }
    }

    /// Containing directory and entry name of `loc`, `None` at the top.
    pub(crate) fn name_in_parent(
        &self,
        loc: Loc,
        root: Loc,
    ) -> Result<Option<(Loc, String)>, Errno> {
        let Walk::Step(dir) = self.walk_out(loc, root) else {
            return Ok(None);
        };
        let own = self.loc_ref(dir);
        let parent = self.inode(own)?.parent().ok_or(Errno::ENOTDIR)?;
        let name = self
            .table(own.dev)?
            .name_of(parent, dir.ino)
            .ok_or(Errno::ENOENT)?;
        Ok(Some((Loc::new(dir.mount, parent), name)))
    }

    /// Absolute path of directory `loc` as seen from `root`.
    pub(crate) fn path_of(&self, loc: Loc, root: Loc) -> Result<String, Errno> {
        let mut names = Vec::new();
        let mut cur = loc;
        while let Some((parent, name)) = self.name_in_parent(cur, root)? {
            names.push(name);
            cur = parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// ENOTDIR unless `loc` is a directory, EACCES unless searchable.
    fn require_search(&self, loc: Loc, creds: &Credentials) -> Result<(), Errno> {
        let inode = self.effective_inode(self.loc_ref(loc))?;
        if !inode.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        if !perm::may_exec(inode, creds) {
            return Err(Errno::EACCES);
        }
        Ok(())
    }

    fn is_symlink(&self, loc: Loc) -> Result<bool, Errno> {
        Ok(self.effective_inode(self.loc_ref(loc))?.is_symlink())
    }
}

impl MemOs<'_> {
    pub(crate) fn root_loc(&self) -> Result<Loc, Errno> {
        self.ns.fd_loc(self.getpid(), ROOT_FD)
    }

    pub(crate) fn cwd_loc(&self) -> Result<Loc, Errno> {
        self.ns.fd_loc(self.getpid(), CWD_FD)
    }

    /// Resolve relative to the working directory. `follow` decides whether
    /// a symlink in the final position is followed.
    pub(crate) fn resolve(&mut self, path: &str, follow: bool) -> Result<Resolved, Errno> {
        let start = self.cwd_loc()?;
        self.resolve_at(start, path, follow)
    }

    pub(crate) fn resolve_at(
        &mut self,
        start: Loc,
        path: &str,
        follow: bool,
    ) -> Result<Resolved, Errno> {
        check_lengths(path)?;
        let creds = self.creds()?;
        let root = self.root_loc()?;
        let max_hops = self.ns.config.max_symlinks;

        let mut cur = if path.starts_with('/') { root } else { start };
        let mut pending: VecDeque<String> = segments(path).into_iter().map(String::from).collect();
        let mut parent: Option<Loc> = None;
        let mut hops = 0;

        while let Some(seg) = pending.pop_front() {
            self.ns.require_search(cur, &creds)?;
            if seg == ".." {
                cur = self.ns.climb(cur, root)?;
                parent = None;
                continue;
            }
            let last = pending.is_empty();
            let dir = self.ns.loc_ref(cur);
            let Some(ino) = self.ns.lookup_child(dir, &seg)? else {
                if last {
                    trace!(path, name = %seg, "resolved to missing final entry");
                    return Ok(Resolved {
                        parent: Some(cur),
                        node: None,
                        name: seg,
                    });
                }
                return Err(Errno::ENOENT);
            };
            let next = self.ns.cross_mounts(Loc::new(cur.mount, ino));

            if (!last || follow) && self.ns.is_symlink(next)? {
                hops += 1;
                if hops > max_hops {
                    return Err(Errno::ELOOP);
                }
                let target = self
                    .ns
                    .effective_inode(self.ns.loc_ref(next))?
                    .link_target()?
                    .to_string();
                trace!(path, link = %seg, %target, hops, "following symlink");
                if target.starts_with('/') {
                    cur = root;
                }
                for s in segments(&target).into_iter().rev() {
                    pending.push_front(s.to_string());
                }
                parent = None;
                continue;
            }
            parent = Some(cur);
            cur = next;
            if last {
                return Ok(Resolved {
                    parent,
                    node: Some(cur),
                    name: seg,
                });
            }
        }

        // the walk ended on a directory reached by `..`, `/` or a symlink
        let (parent, name) = match parent {
            Some(p) => (Some(p), String::new()),
            None => match self.ns.name_in_parent(cur, root)? {
                Some((p, name)) => (Some(p), name),
                None => (None, String::new()),
            },
        };
        Ok(Resolved {
            parent,
            node: Some(cur),
            name,
        })
    }

    /// Current working directory.
    pub fn getwd(&self) -> VfsResult<String> {
        let cwd = self.cwd_loc().at_call("getwd")?;
        let root = self.root_loc().at_call("getwd")?;
        self.ns.path_of(cwd, root).at_call("getwd")
    }

    /// `name` as an absolute, lexically clean path.
    pub(crate) fn abs_path(&self, name: &str) -> String {
        if name.starts_with('/') {
            return memos_types::path::clean(name);
        }
        let base = self.getwd().unwrap_or_else(|_| "/".to_string());
        memos_types::path::clean(&memos_types::path::join(&base, name))
    }
}
