//! The namespace: every filesystem, mount, open file and process of one
//! virtual machine.
//!
//! All state lives in id-keyed arenas owned by [`Namespace`]; mounts, open
//! files and processes refer to each other by id. Process-level operations
//! go through a [`MemOs`] handle obtained from [`Namespace::os`].

mod nodes;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use memos_types::{DevId, Errno, MountFlags, MountOptions, OpenFlags, format_dev, makedev};
use tracing::debug;

use crate::config::NamespaceConfig;
use crate::error::{ErrnoContext, VfsResult};
use crate::file::{FileId, Fd, OpenFile};
use crate::fs::{Backend, BackendKind, DevTmpFs, DeviceNumber, OverlayFs, OverlayLayers, StorageFs};
use crate::inode::ROOT_INO;
use crate::mount::{Loc, Mount, MountId};
use crate::perm::Credentials;
use crate::process::{CWD_FD, INIT_PID, KERNEL_FD_BASE, MemOs, Pid, Process, ROOT_FD};

/// Device id of the root filesystem.
pub const ROOTFS_DEV: DevId = makedev(0, 1);

/// Device id of the devtmpfs instance.
pub const DEVTMPFS_DEV: DevId = makedev(0, 5);

/// Abort on an internal inconsistency.
#[track_caller]
pub(crate) fn corrupted(what: impl fmt::Display) -> ! {
    panic!("corrupted bookkeeping: {what}")
}

pub struct Namespace {
    pub(crate) config: NamespaceConfig,
    pub(crate) devices: BTreeMap<DevId, Backend>,
    /// Filesystems created by `mount` itself, dropped with their last mount.
    pub(crate) transient: BTreeSet<DevId>,
    pub(crate) mounts: BTreeMap<MountId, Mount>,
    pub(crate) next_mount: u64,
    pub(crate) processes: BTreeMap<Pid, Process>,
    pub(crate) next_pid: Pid,
    pub(crate) files: BTreeMap<FileId, OpenFile>,
    pub(crate) next_file: u64,
    pub(crate) kernel_fds: BTreeMap<Fd, FileId>,
    pub(crate) next_kernel_fd: Fd,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("devices", &self.devices.keys().map(|d| format_dev(*d)).collect::<Vec<_>>())
            .field("mounts", &self.mounts.len())
            .field("processes", &self.processes.keys().collect::<Vec<_>>())
            .field("open_files", &self.files.len())
            .finish()
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(NamespaceConfig::default())
    }
}

impl Namespace {
    /// A namespace with a rootfs mounted at `/` and an init process (pid 1,
    /// uid 0) whose root and working directory are `/`.
    pub fn new(config: NamespaceConfig) -> Self {
        let rootfs = StorageFs::new(ROOTFS_DEV, "rootfs", "rootfs", config.root_mode);
        let root_mount = Mount {
            id: MountId::ROOT,
            dev: ROOTFS_DEV,
            root: ROOT_INO,
            parent: None,
            flags: MountFlags::empty(),
            source: "rootfs".into(),
            fstype: "rootfs".into(),
            options: MountOptions::default(),
            target: "/".into(),
            open_files: BTreeMap::new(),
            children: BTreeMap::new(),
            held: Vec::new(),
        };
        let init = Process::new(
            INIT_PID,
            0,
            Credentials::root(),
            config.umask,
            config.env.clone(),
        );

        let mut ns = Self {
            config,
            devices: BTreeMap::from([(ROOTFS_DEV, Backend::Storage(rootfs))]),
            transient: BTreeSet::new(),
            mounts: BTreeMap::from([(MountId::ROOT, root_mount)]),
            next_mount: 1,
            processes: BTreeMap::from([(INIT_PID, init)]),
            next_pid: INIT_PID + 1,
            files: BTreeMap::new(),
            next_file: 0,
            kernel_fds: BTreeMap::new(),
            next_kernel_fd: KERNEL_FD_BASE,
        };
        let root = Loc::new(MountId::ROOT, ROOT_INO);
        for fd in [ROOT_FD, CWD_FD] {
            let mut file = OpenFile::new(root, INIT_PID, OpenFlags::DIRECTORY, "/");
            file.readable = true;
            file.executable = true;
            if let Err(e) = ns.install_file(INIT_PID, fd, file) {
                corrupted(format_args!("bootstrapping init: {e}"));
            }
        }
        debug!("namespace created");
        ns
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    /// Operation handle for `pid`.
    pub fn os(&mut self, pid: Pid) -> VfsResult<MemOs<'_>> {
        if !self.processes.contains_key(&pid) {
            return Err(Errno::ESRCH).at_call("os");
        }
        Ok(MemOs::new(self, pid))
    }

    /// Operation handle for the init process.
    pub fn init(&mut self) -> MemOs<'_> {
        MemOs::new(self, INIT_PID)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.keys().copied()
    }

    pub fn device(&self, dev: DevId) -> Option<&Backend> {
        self.devices.get(&dev)
    }

    pub fn devices(&self) -> impl Iterator<Item = (DevId, &Backend)> {
        self.devices.iter().map(|(dev, b)| (*dev, b))
    }

    /// Mounts in creation order; the first is the root mount.
    pub fn mounts(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.values()
    }

    pub fn mount_by_id(&self, id: MountId) -> Option<&Mount> {
        self.mounts.get(&id)
    }

    pub fn overlay(&self, dev: DevId) -> Option<&OverlayFs> {
        self.devices.get(&dev).and_then(Backend::as_overlay)
    }

    /// Register a new filesystem and return its device id.
    ///
    /// The id comes from `major`/`minor` when both are given, else from a
    /// recognizable `/dev/NAME` source (`/dev/sda1` is 8:1), else from the
    /// fstype: rootfs is 0:1, devtmpfs 0:5, anything else takes the next
    /// free minor on major 0. Unknown fstypes get plain storage.
    pub fn make_filesystem(
        &mut self,
        major: Option<u32>,
        minor: Option<u32>,
        fstype: &str,
        source: &str,
    ) -> VfsResult<DevId> {
        self.make_filesystem_with(major, minor, fstype, source, None)
            .at_link("mkfs", fstype, source)
    }

    #[tracing::instrument(skip(self, layers), name = "ns.make_filesystem")]
    pub(crate) fn make_filesystem_with(
        &mut self,
        major: Option<u32>,
        minor: Option<u32>,
        fstype: &str,
        source: &str,
        layers: Option<(OverlayLayers, MountOptions)>,
    ) -> Result<DevId, Errno> {
        let kind = BackendKind::for_fstype(fstype);
        let dev = self.pick_dev(major, minor, kind, fstype, source)?;
        if self.devices.contains_key(&dev) {
            return Err(Errno::EEXIST);
        }
        let backend = match kind {
            BackendKind::Storage => Backend::Storage(StorageFs::new(dev, fstype, source, 0o755)),
            BackendKind::Devtmpfs => {
                Backend::Devtmpfs(DevTmpFs::new(dev, source, &self.config.dev_prefix))
            }
            BackendKind::Overlay => {
                let (layers, options) = layers.ok_or(Errno::EINVAL)?;
                let root = self
                    .effective_inode(layers.upper.unwrap_or(layers.lower))?
                    .clone();
                Backend::Overlay(OverlayFs::new(dev, source, layers, options, &root))
            }
        };
        debug!(
            dev = %format_dev(dev),
            fstype = backend.fs().fstype(),
            source,
            "filesystem registered"
        );
        self.devices.insert(dev, backend);
        Ok(dev)
    }

    fn pick_dev(
        &self,
        major: Option<u32>,
        minor: Option<u32>,
        kind: BackendKind,
        fstype: &str,
        source: &str,
    ) -> Result<DevId, Errno> {
        match (major, minor) {
            (Some(major), Some(minor)) => return Ok(makedev(major, minor)),
            (None, None) => {}
            _ => return Err(Errno::EINVAL),
        }
        if let Some(number) = DeviceNumber::parse(source, &self.config.dev_prefix) {
            return Ok(match number {
                DeviceNumber::Fixed(dev) => dev,
                DeviceNumber::NextOn(major) => self.next_free_minor(major, 0),
            });
        }
        Ok(match (fstype, kind) {
            ("rootfs", _) => ROOTFS_DEV,
            (_, BackendKind::Devtmpfs) => DEVTMPFS_DEV,
            _ => self.next_free_minor(0, 2),
        })
    }

    /// Lowest unused minor on `major` from `from` up, skipping the fixed
    /// rootfs and devtmpfs ids.
    fn next_free_minor(&self, major: u32, from: u32) -> DevId {
        let mut minor = from;
        loop {
            let dev = makedev(major, minor);
            if dev != ROOTFS_DEV && dev != DEVTMPFS_DEV && !self.devices.contains_key(&dev) {
                return dev;
            }
            minor += 1;
        }
    }

    /// Registered storage device whose source string is `source`.
    pub(crate) fn device_by_source(&self, source: &str) -> Option<DevId> {
        self.devices
            .iter()
            .find(|(_, b)| b.kind() == BackendKind::Storage && b.fs().source() == source)
            .map(|(dev, _)| *dev)
    }

    pub(crate) fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Close every descriptor of `pid` and drop it. Returns its exit code.
    #[tracing::instrument(skip(self), name = "ns.reap")]
    pub(crate) fn reap(&mut self, pid: Pid) -> Result<i32, Errno> {
        let fds: Vec<Fd> = self
            .processes
            .get(&pid)
            .ok_or(Errno::ECHILD)?
            .fds
            .keys()
            .copied()
            .collect();
        for fd in fds {
            self.close_fd(pid, fd)?;
        }
        let process = self.processes.remove(&pid).ok_or(Errno::ECHILD)?;
        debug!(pid, code = process.exit_code, "process reaped");
        Ok(process.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_state() {
        let ns = Namespace::default();
        assert_eq!(ns.mounts().count(), 1);
        let root = ns.mount_by_id(MountId::ROOT).unwrap();
        assert!(root.parent.is_none());
        assert_eq!(root.dev, ROOTFS_DEV);
        // init's root and cwd
        assert_eq!(root.open_file_count(), 2);
        assert_eq!(ns.pids().collect::<Vec<_>>(), vec![INIT_PID]);
    }

    #[test]
    fn test_device_ids() {
        let mut ns = Namespace::default();
        assert_eq!(ns.make_filesystem(Some(8), Some(1), "ext4", "disk").unwrap(), makedev(8, 1));
        assert_eq!(ns.make_filesystem(None, None, "ext4", "/dev/sdb").unwrap(), makedev(8, 16));
        assert_eq!(ns.make_filesystem(None, None, "tmpfs", "tmpfs").unwrap(), makedev(0, 2));
        assert_eq!(ns.make_filesystem(None, None, "proc", "proc").unwrap(), makedev(0, 3));
        assert_eq!(ns.make_filesystem(None, None, "sysfs", "sysfs").unwrap(), makedev(0, 4));
        // 0:5 belongs to devtmpfs
        assert_eq!(ns.make_filesystem(None, None, "tmpfs", "shm").unwrap(), makedev(0, 6));
        assert_eq!(ns.make_filesystem(None, None, "devtmpfs", "udev").unwrap(), DEVTMPFS_DEV);
    }

    #[test]
    fn test_taken_device_id() {
        let mut ns = Namespace::default();
        ns.make_filesystem(Some(8), Some(1), "ext4", "/dev/sda1").unwrap();
        let err = ns.make_filesystem(None, None, "ext4", "/dev/sda1").unwrap_err();
        assert!(err.is(Errno::EEXIST));
        let err = ns.make_filesystem(None, None, "rootfs", "rootfs").unwrap_err();
        assert!(err.is(Errno::EEXIST));
    }

    #[test]
    fn test_half_device_number_rejected() {
        let mut ns = Namespace::default();
        let err = ns.make_filesystem(Some(8), None, "ext4", "x").unwrap_err();
        assert!(err.is(Errno::EINVAL));
    }

    #[test]
    fn test_overlay_needs_layers() {
        let mut ns = Namespace::default();
        let err = ns.make_filesystem(None, None, "overlay", "overlay").unwrap_err();
        assert!(err.is(Errno::EINVAL));
    }

    #[test]
    fn test_os_unknown_pid() {
        let mut ns = Namespace::default();
        assert!(ns.os(42).unwrap_err().is(Errno::ESRCH));
        assert_eq!(ns.os(INIT_PID).unwrap().getpid(), INIT_PID);
    }
}
