//! `mount`, `unmount` and the mount listing.

use memos_types::{DevId, Errno, MountFlags, MountOptions, UnmountFlags};
use tracing::{debug, warn};

use super::MemOs;
use crate::error::{ErrnoContext, VfsResult};
use crate::fs::{BackendKind, DeviceNumber, OverlayLayers};
use crate::inode::{InodeBody, InodeRef, ROOT_INO};
use crate::mount::{Loc, Mount, MountSpec};

/// Options the overlay backend understands; anything else is logged and
/// ignored.
const OVERLAY_OPTIONS: &[&str] = &["lowerdir", "upperdir", "workdir"];

impl MemOs<'_> {
    /// Attach a filesystem at `target`.
    ///
    /// With `MountFlags::BIND` the directory (or file) at `source` appears
    /// again at `target`. With `MountFlags::REMOUNT` the flags of the mount
    /// rooted at `target` are replaced. Otherwise `fstype` picks the
    /// backend: `overlay` merges the `lowerdir`/`upperdir`/`workdir` named
    /// in `data`, `devtmpfs` attaches the device filesystem, and anything
    /// else mounts the storage device `source` names (a block device node, a
    /// registered source string, or a fresh empty filesystem).
    #[tracing::instrument(skip(self), name = "ns.mount")]
    pub fn mount(
        &mut self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: MountFlags,
        data: &str,
    ) -> VfsResult<()> {
        self.mount_inner(source, target, fstype, flags, data)
            .at_link("mount", source, target)
    }

    fn mount_inner(
        &mut self,
        source: &str,
        target: &str,
        fstype: &str,
        flags: MountFlags,
        data: &str,
    ) -> Result<(), Errno> {
        if !self.creds()?.is_privileged() {
            return Err(Errno::EPERM);
        }
        let at = self.resolve(target, true)?.node()?;
        let options = MountOptions::parse(data);

        if flags.contains(MountFlags::REMOUNT) {
            let id = self.ns.mount_rooted_at(at).ok_or(Errno::EINVAL)?;
            let mount = self.ns.mount_mut(id);
            mount.flags = flags.per_mount();
            if !options.is_empty() {
                mount.options = options;
            }
            debug!(mount = %id, flags = ?mount.flags, "remounted");
            return Ok(());
        }
        if self.ns.mount_rooted_at(at).is_some() {
            return Err(Errno::EBUSY);
        }
        let target_dir = self.ns.effective_inode(self.ns.loc_ref(at))?.is_dir();
        let target_path = self.abs_path(target);

        if flags.contains(MountFlags::BIND) {
            return self.bind_mount(source, at, target_dir, flags, target_path);
        }
        if !target_dir {
            return Err(Errno::ENOTDIR);
        }

        let mut held = Vec::new();
        let mut per_mount = flags.per_mount();
        let (dev, transient) = match BackendKind::for_fstype(fstype) {
            BackendKind::Overlay => {
                let (layers, locs) = self.overlay_layers(&options)?;
                if layers.upper.is_none() {
                    per_mount |= MountFlags::RDONLY;
                }
                let dev = self.ns.make_filesystem_with(
                    None,
                    None,
                    fstype,
                    source,
                    Some((layers, options.clone())),
                )?;
                held = locs;
                (dev, true)
            }
            BackendKind::Devtmpfs => (self.ns.devtmpfs_dev()?, false),
            BackendKind::Storage => self.storage_device(source, fstype)?,
        };
        if transient {
            self.ns.transient.insert(dev);
        }

        let spec = MountSpec {
            dev,
            root: ROOT_INO,
            flags: per_mount,
            source: source.to_string(),
            fstype: fstype.to_string(),
            options,
            target: target_path,
        };
        let id = match self.ns.attach_mount(spec, at) {
            Ok(id) => id,
            Err(e) => {
                self.ns.drop_transient(dev);
                return Err(e);
            }
        };
        for (loc, path) in held {
            let fd = self.ns.hold_open(loc, &path)?;
            self.ns.mount_mut(id).held.push(fd);
        }
        Ok(())
    }

    fn bind_mount(
        &mut self,
        source: &str,
        at: Loc,
        target_dir: bool,
        flags: MountFlags,
        target_path: String,
    ) -> Result<(), Errno> {
        let src = self.resolve(source, true)?.node()?;
        let src_dir = self.ns.effective_inode(self.ns.loc_ref(src))?.is_dir();
        if src_dir != target_dir {
            return Err(Errno::ENOTDIR);
        }
        let (dev, from_source, fstype, options) = {
            let from = self.ns.mount(src.mount);
            (from.dev, from.source.clone(), from.fstype.clone(), from.options.clone())
        };
        let spec = MountSpec {
            dev,
            root: src.ino,
            flags: flags.per_mount(),
            source: from_source,
            fstype,
            options,
            target: target_path,
        };
        let id = self.ns.attach_mount(spec, at)?;
        let source_path = self.abs_path(source);
        let fd = self.ns.hold_open(src, &source_path)?;
        self.ns.mount_mut(id).held.push(fd);
        Ok(())
    }

    /// Resolve the overlay layer directories named in `options`. Returns the
    /// layers and the locations the mount keeps open.
    fn overlay_layers(
        &mut self,
        options: &MountOptions,
    ) -> Result<(OverlayLayers, Vec<(Loc, String)>), Errno> {
        for key in options.keys() {
            if !OVERLAY_OPTIONS.contains(&key) {
                warn!(option = key, "ignoring unsupported overlay option");
            }
        }
        let lowerdir = options
            .get("lowerdir")
            .filter(|s| !s.is_empty())
            .ok_or(Errno::EINVAL)?;
        // one lower layer only
        if lowerdir.contains(':') {
            return Err(Errno::EINVAL);
        }
        let (upperdir, workdir) = match (options.get("upperdir"), options.get("workdir")) {
            (Some(u), Some(w)) => (Some(u), Some(w)),
            (None, None) => (None, None),
            _ => return Err(Errno::EINVAL),
        };

        let mut held = Vec::new();
        let lower = self.layer_dir(lowerdir)?;
        held.push((lower, self.abs_path(lowerdir)));
        let mut layers = OverlayLayers {
            upper: None,
            lower: self.ns.loc_ref(lower),
            work: None,
        };
        if let (Some(upperdir), Some(workdir)) = (upperdir, workdir) {
            let upper = self.layer_dir(upperdir)?;
            let upper_ref = self.ns.loc_ref(upper);
            if self.ns.backend(upper_ref.dev)?.kind() == BackendKind::Overlay {
                return Err(Errno::EINVAL);
            }
            let work = self.layer_dir(workdir)?;
            let work_ref = self.ns.loc_ref(work);
            if work_ref.dev != upper_ref.dev {
                return Err(Errno::EINVAL);
            }
            layers.upper = Some(upper_ref);
            layers.work = Some(work_ref);
            held.push((upper, self.abs_path(upperdir)));
            held.push((work, self.abs_path(workdir)));
        }
        Ok((layers, held))
    }

    fn layer_dir(&mut self, name: &str) -> Result<Loc, Errno> {
        let loc = self.resolve(name, true)?.node()?;
        if !self.ns.effective_inode(self.ns.loc_ref(loc))?.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        Ok(loc)
    }

    /// The device a storage mount of `source` attaches, and whether it was
    /// created for this mount.
    fn storage_device(&mut self, source: &str, fstype: &str) -> Result<(DevId, bool), Errno> {
        let node = if source.starts_with('/') {
            self.resolve(source, true).ok().and_then(|r| r.node)
        } else {
            None
        };
        if let Some(loc) = node {
            let rdev = match self.ns.effective_inode(self.ns.loc_ref(loc))?.body {
                InodeBody::BlockDev { rdev } => rdev,
                _ => return Err(Errno::ENOTBLK),
            };
            if self.ns.device(rdev).is_none() {
                return Err(Errno::ENXIO);
            }
            return Ok((rdev, false));
        }
        if let Some(dev) = self.ns.device_by_source(source) {
            return Ok((dev, false));
        }
        // a device name nobody registered
        if DeviceNumber::parse(source, &self.ns.config.dev_prefix).is_some() {
            return Err(Errno::ENOENT);
        }
        let dev = self
            .ns
            .make_filesystem_with(None, None, fstype, source, None)?;
        Ok((dev, true))
    }

    /// Detach the mount rooted at `target`. Fails EBUSY while anything is
    /// open on it or mounted beneath it. `UnmountFlags::DETACH` is accepted
    /// but does not make a busy mount go away.
    pub fn unmount(&mut self, target: &str, flags: UnmountFlags) -> VfsResult<()> {
        self.unmount_inner(target, flags).at_path("umount", target)
    }

    fn unmount_inner(&mut self, target: &str, flags: UnmountFlags) -> Result<(), Errno> {
        if !self.creds()?.is_privileged() {
            return Err(Errno::EPERM);
        }
        if flags.contains(UnmountFlags::EXPIRE)
            && flags.intersects(UnmountFlags::FORCE | UnmountFlags::DETACH)
        {
            return Err(Errno::EINVAL);
        }
        let follow = !flags.contains(UnmountFlags::NOFOLLOW);
        let at = self.resolve(target, follow)?.node()?;
        let id = self.ns.mount_rooted_at(at).ok_or(Errno::EINVAL)?;
        self.ns.detach_mount(id)
    }

    /// The mount table as `/proc/mounts` lines, oldest first.
    pub fn mounts(&self) -> Vec<String> {
        self.ns.mounts().map(Mount::proc_line).collect()
    }

    /// Device id and inode of the mount root `target` resolves into.
    pub fn mount_root_of(&mut self, target: &str) -> VfsResult<InodeRef> {
        let at = self
            .resolve(target, true)
            .and_then(|r| r.node())
            .at_path("stat", target)?;
        let mount = self.ns.mount(at.mount);
        Ok(InodeRef::new(mount.dev, mount.root))
    }
}
