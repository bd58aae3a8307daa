//! Mounts.
//!
//! A mount attaches a filesystem (or, for bind mounts, a subtree of one) at
//! an inode of its parent mount. Each mount tracks the descriptors open on
//! it and the mounts attached beneath it; either one keeps it busy.

use std::collections::BTreeMap;
use std::fmt;

use memos_types::{DevId, Errno, Ino, MountFlags, MountOptions};
use serde::Serialize;
use tracing::debug;

use crate::file::{FileId, Fd};
use crate::namespace::{Namespace, corrupted};
use crate::process::{KERNEL_PID, Pid};

/// Index of a mount in its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MountId(pub u64);

impl MountId {
    pub const ROOT: MountId = MountId(0);
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A place in the mount tree: an inode as seen through one mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc {
    pub mount: MountId,
    pub ino: Ino,
}

impl Loc {
    pub fn new(mount: MountId, ino: Ino) -> Self {
        Self { mount, ino }
    }
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub id: MountId,
    pub dev: DevId,
    /// Inode of `dev` that appears at the mountpoint.
    pub root: Ino,
    /// Mountpoint in the parent mount; `None` only for the root mount.
    pub parent: Option<Loc>,
    pub flags: MountFlags,
    pub source: String,
    pub fstype: String,
    pub options: MountOptions,
    /// Mountpoint path as given when mounting.
    pub target: String,
    pub(crate) open_files: BTreeMap<(Pid, Fd), FileId>,
    pub(crate) children: BTreeMap<Ino, MountId>,
    /// Kernel descriptors held for the mount's lifetime (bind source,
    /// overlay layers).
    pub(crate) held: Vec<Fd>,
}

impl Mount {
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(MountFlags::RDONLY)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_busy(&self) -> bool {
        !self.open_files.is_empty() || !self.children.is_empty()
    }

    /// A `/proc/mounts` line.
    pub fn proc_line(&self) -> String {
        let mut options: Vec<String> = self
            .flags
            .option_words()
            .into_iter()
            .map(str::to_string)
            .collect();
        if !self.options.is_empty() {
            options.push(self.options.to_string());
        }
        format!(
            "{} {} {} {} 0 0",
            self.source,
            self.target,
            self.fstype,
            options.join(",")
        )
    }
}

/// What a new mount is made of.
#[derive(Debug, Clone)]
pub(crate) struct MountSpec {
    pub dev: DevId,
    pub root: Ino,
    pub flags: MountFlags,
    pub source: String,
    pub fstype: String,
    pub options: MountOptions,
    pub target: String,
}

impl Namespace {
    pub(crate) fn mount(&self, id: MountId) -> &Mount {
        match self.mounts.get(&id) {
            Some(m) => m,
            None => corrupted(format_args!("mount {id} referenced but not registered")),
        }
    }

    pub(crate) fn mount_mut(&mut self, id: MountId) -> &mut Mount {
        match self.mounts.get_mut(&id) {
            Some(m) => m,
            None => corrupted(format_args!("mount {id} referenced but not registered")),
        }
    }

    /// Follow mountpoints down to the topmost mount at `loc`.
    pub(crate) fn cross_mounts(&self, mut loc: Loc) -> Loc {
        while let Some(child) = self.mount(loc.mount).children.get(&loc.ino) {
            loc = Loc::new(*child, self.mount(*child).root);
        }
        loc
    }

    /// The mount `loc` is the root of, if any.
    pub(crate) fn mount_rooted_at(&self, loc: Loc) -> Option<MountId> {
        (self.mount(loc.mount).root == loc.ino).then_some(loc.mount)
    }

    /// Attach a mount at `at`. Stacking on an existing mountpoint is EBUSY.
    pub(crate) fn attach_mount(&mut self, spec: MountSpec, at: Loc) -> Result<MountId, Errno> {
        if !self.devices.contains_key(&spec.dev) {
            return Err(Errno::ENODEV);
        }
        if self.mount(at.mount).children.contains_key(&at.ino) {
            return Err(Errno::EBUSY);
        }
        let id = MountId(self.next_mount);
        self.next_mount += 1;
        let mount = Mount {
            id,
            dev: spec.dev,
            root: spec.root,
            parent: Some(at),
            flags: spec.flags,
            source: spec.source,
            fstype: spec.fstype,
            options: spec.options,
            target: spec.target,
            open_files: BTreeMap::new(),
            children: BTreeMap::new(),
            held: Vec::new(),
        };
        debug!(
            mount = %id,
            dev = %memos_types::format_dev(mount.dev),
            root = mount.root,
            target = %mount.target,
            "mount attached"
        );
        self.mounts.insert(id, mount);
        self.mount_mut(at.mount).children.insert(at.ino, id);
        Ok(id)
    }

    /// Detach a mount and release what it held open.
    #[tracing::instrument(skip(self), name = "ns.umount")]
    pub(crate) fn detach_mount(&mut self, id: MountId) -> Result<(), Errno> {
        let mount = self.mount(id);
        let Some(at) = mount.parent else {
            return Err(Errno::EINVAL);
        };
        if mount.is_busy() {
            debug!(
                mount = %id,
                open = mount.open_file_count(),
                children = mount.child_count(),
                "unmount refused"
            );
            return Err(Errno::EBUSY);
        }
        let dev = mount.dev;
        let held = mount.held.clone();

        let parent = self.mount_mut(at.mount);
        if parent.children.remove(&at.ino) != Some(id) {
            corrupted(format_args!("mount {id} missing from its parent's child table"));
        }
        self.mounts.remove(&id);
        for fd in held {
            if let Err(e) = self.close_fd(KERNEL_PID, fd) {
                corrupted(format_args!("held descriptor {fd} of mount {id}: {e}"));
            }
        }
        self.drop_transient(dev);
        debug!(mount = %id, "mount detached");
        Ok(())
    }

    /// Forget a filesystem created by `mount` once nothing mounts it.
    pub(crate) fn drop_transient(&mut self, dev: DevId) {
        if !self.transient.contains(&dev) || self.mounts.values().any(|m| m.dev == dev) {
            return;
        }
        self.transient.remove(&dev);
        self.devices.remove(&dev);
        debug!(dev = %memos_types::format_dev(dev), "filesystem released");
    }
}
