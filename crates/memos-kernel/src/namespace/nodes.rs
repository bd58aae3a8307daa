//! Inode access and directory mutation, dispatched on the backend that
//! owns the directory.

use memos_types::{DevId, Errno, Ino, Stat};

use super::Namespace;
use crate::fs::{Backend, BackendKind, InodeTable};
use crate::inode::{Inode, InodeBody, InodeRef};
use crate::mount::Loc;

impl Namespace {
    pub(crate) fn backend(&self, dev: DevId) -> Result<&Backend, Errno> {
        self.devices.get(&dev).ok_or(Errno::ENODEV)
    }

    pub(crate) fn backend_mut(&mut self, dev: DevId) -> Result<&mut Backend, Errno> {
        self.devices.get_mut(&dev).ok_or(Errno::ENODEV)
    }

    pub(crate) fn table(&self, dev: DevId) -> Result<&InodeTable, Errno> {
        Ok(self.backend(dev)?.fs().table())
    }

    pub(crate) fn table_mut(&mut self, dev: DevId) -> Result<&mut InodeTable, Errno> {
        Ok(self.backend_mut(dev)?.fs_mut().table_mut())
    }

    pub(crate) fn inode(&self, r: InodeRef) -> Result<&Inode, Errno> {
        self.table(r.dev)?.get(r.ino)
    }

    pub(crate) fn inode_mut(&mut self, r: InodeRef) -> Result<&mut Inode, Errno> {
        self.table_mut(r.dev)?.get_mut(r.ino)
    }

    /// Address of the inode `loc` names.
    pub(crate) fn loc_ref(&self, loc: Loc) -> InodeRef {
        InodeRef::new(self.mount(loc.mount).dev, loc.ino)
    }

    /// Follow overlay nodes to the object that carries content and
    /// metadata.
    pub(crate) fn effective(&self, mut r: InodeRef) -> Result<InodeRef, Errno> {
        while let Some(link) = &self.inode(r)?.overlay {
            r = link.active;
        }
        Ok(r)
    }

    pub(crate) fn effective_inode(&self, r: InodeRef) -> Result<&Inode, Errno> {
        self.inode(self.effective(r)?)
    }

    /// Stat of `loc`: its own device and inode number, the rest from the
    /// effective object.
    pub(crate) fn stat_of(&self, loc: Loc) -> Result<Stat, Errno> {
        let own = self.loc_ref(loc);
        Ok(self.effective_inode(own)?.stat_as(own))
    }

    /// The object metadata changes must go to: the node itself, or for an
    /// overlay node its upper side (copied up on demand).
    pub(crate) fn writable_ref(&mut self, r: InodeRef) -> Result<InodeRef, Errno> {
        if self.inode(r)?.overlay.is_none() {
            return Ok(r);
        }
        let upper = self.copy_up(r.dev, r.ino)?;
        self.effective(upper)
    }

    pub(crate) fn lookup_child(&mut self, dir: InodeRef, name: &str) -> Result<Option<Ino>, Errno> {
        match self.backend(dir.dev)?.kind() {
            BackendKind::Overlay => self.overlay_lookup(dir.dev, dir.ino, name),
            BackendKind::Devtmpfs => self.devtmpfs_lookup(dir.dev, dir.ino, name),
            BackendKind::Storage => self.table(dir.dev)?.lookup(dir.ino, name),
        }
    }

    /// Sorted entry names of a directory.
    pub(crate) fn list_names(&mut self, dir: InodeRef) -> Result<Vec<String>, Errno> {
        match self.backend(dir.dev)?.kind() {
            BackendKind::Overlay => self.overlay_names(dir.dev, dir.ino),
            BackendKind::Devtmpfs => self.devtmpfs_names(dir.dev, dir.ino),
            BackendKind::Storage => self.table(dir.dev)?.names(dir.ino),
        }
    }

    pub(crate) fn create_child(
        &mut self,
        dir: InodeRef,
        name: &str,
        body: InodeBody,
        perm: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Ino, Errno> {
        if self.backend(dir.dev)?.kind() == BackendKind::Overlay {
            return self.overlay_create(dir.dev, dir.ino, name, body, perm, uid, gid);
        }
        if self.lookup_child(dir, name)?.is_some() {
            return Err(Errno::EEXIST);
        }
        self.table_mut(dir.dev)?
            .create(dir.ino, name, body, perm, uid, gid)
    }

    pub(crate) fn remove_child(&mut self, dir: InodeRef, name: &str) -> Result<(), Errno> {
        if self.backend(dir.dev)?.kind() == BackendKind::Overlay {
            return self.overlay_remove(dir.dev, dir.ino, name);
        }
        let child = self.table_mut(dir.dev)?.unlink(dir.ino, name)?;
        self.release_if_orphan(InodeRef::new(dir.dev, child));
        Ok(())
    }

    pub(crate) fn link_child(
        &mut self,
        dir: InodeRef,
        name: &str,
        target: Ino,
    ) -> Result<(), Errno> {
        if self.backend(dir.dev)?.kind() == BackendKind::Overlay {
            return self.overlay_hardlink(dir.dev, dir.ino, name, target);
        }
        if self.lookup_child(dir, name)?.is_some() {
            return Err(Errno::EEXIST);
        }
        self.table_mut(dir.dev)?.link(dir.ino, name, target)
    }

    /// Fail the way [`rename_child`](Self::rename_child) would, without
    /// changing anything. Lets a caller replace the destination only once
    /// the move itself is known to go through.
    pub(crate) fn check_rename(
        &mut self,
        old_dir: InodeRef,
        old_name: &str,
        new_dir: InodeRef,
    ) -> Result<(), Errno> {
        if old_dir.dev != new_dir.dev {
            return Err(Errno::EXDEV);
        }
        if self.backend(old_dir.dev)?.kind() == BackendKind::Overlay {
            self.overlay_rename_source(old_dir.dev, old_dir.ino, old_name)?;
        }
        Ok(())
    }

    /// Move an entry within one device. The destination name must be free.
    pub(crate) fn rename_child(
        &mut self,
        old_dir: InodeRef,
        old_name: &str,
        new_dir: InodeRef,
        new_name: &str,
    ) -> Result<(), Errno> {
        if old_dir.dev != new_dir.dev {
            return Err(Errno::EXDEV);
        }
        if self.backend(old_dir.dev)?.kind() == BackendKind::Overlay {
            return self.overlay_rename(old_dir.dev, old_dir.ino, old_name, new_dir.ino, new_name);
        }
        self.table_mut(old_dir.dev)?
            .rename(old_dir.ino, old_name, new_dir.ino, new_name)?;
        Ok(())
    }
}
