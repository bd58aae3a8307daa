//! Overlay filesystem.
//!
//! An overlay keeps its own inode table of merged nodes. Each node records
//! the upper and lower objects it stands for and which of the two is
//! active. Nodes are synthesized on lookup; content and metadata are always
//! read through the active side.
//!
//! Writes only ever reach the upper layer. The first write-intent open or
//! metadata change of a lower-only node copies it up (ancestors first), and
//! removing a name that exists in the lower layer leaves a whiteout behind:
//! a character device with rdev 0 in the upper directory.

use std::collections::BTreeSet;

use memos_types::{DevId, Errno, Ino, MountOptions};
use tracing::{debug, trace};

use super::{FileSystem, InodeTable};
use crate::inode::{Inode, InodeBody, InodeRef, OverlayLink, ROOT_INO};
use crate::namespace::Namespace;

/// The directories an overlay merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayLayers {
    /// Writable layer; `None` makes the overlay read-only.
    pub upper: Option<InodeRef>,
    pub lower: InodeRef,
    pub work: Option<InodeRef>,
}

#[derive(Debug)]
pub struct OverlayFs {
    source: String,
    table: InodeTable,
    layers: OverlayLayers,
    options: MountOptions,
    copy_ups: u64,
    whiteouts: u64,
}

impl OverlayFs {
    /// `root` is the active side of the root directory; the merged root
    /// starts with its ownership and permissions.
    pub fn new(
        dev: DevId,
        source: &str,
        layers: OverlayLayers,
        options: MountOptions,
        root: &Inode,
    ) -> Self {
        let mut table = InodeTable::new(dev, root.perm, root.uid, root.gid);
        let node = table.root_mut();
        node.overlay = Some(OverlayLink {
            upper: layers.upper,
            lower: Some(layers.lower),
            active: layers.upper.unwrap_or(layers.lower),
            parent: ROOT_INO,
            name: String::new(),
        });
        Self {
            source: source.to_string(),
            table,
            layers,
            options,
            copy_ups: 0,
            whiteouts: 0,
        }
    }

    pub fn layers(&self) -> OverlayLayers {
        self.layers
    }

    /// Copy-ups performed since creation.
    pub fn copy_ups(&self) -> u64 {
        self.copy_ups
    }

    /// Whiteouts inserted since creation.
    pub fn whiteouts(&self) -> u64 {
        self.whiteouts
    }
}

impl FileSystem for OverlayFs {
    fn fstype(&self) -> &str {
        "overlay"
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn table(&self) -> &InodeTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut InodeTable {
        &mut self.table
    }

    fn options(&self) -> MountOptions {
        self.options.clone()
    }
}

// ============================================================================
// Merged view
// ============================================================================

impl Namespace {
    fn overlay_fs(&self, dev: DevId) -> Result<&OverlayFs, Errno> {
        self.backend(dev)?.as_overlay().ok_or(Errno::ENODEV)
    }

    fn overlay_fs_mut(&mut self, dev: DevId) -> Result<&mut OverlayFs, Errno> {
        self.backend_mut(dev)?
            .as_overlay_mut()
            .ok_or(Errno::ENODEV)
    }

    /// The overlay bookkeeping of a merged node.
    fn overlay_node(&self, dev: DevId, ino: Ino) -> Result<OverlayLink, Errno> {
        let inode = self.overlay_fs(dev)?.table.get(ino)?;
        match &inode.overlay {
            Some(link) => Ok(link.clone()),
            None => crate::namespace::corrupted(format_args!(
                "overlay inode {} has no layer link",
                inode.addr()
            )),
        }
    }

    /// Child `name` of one layer directory, if that side is a directory.
    fn layer_child(
        &mut self,
        side: Option<InodeRef>,
        name: &str,
    ) -> Result<Option<InodeRef>, Errno> {
        let Some(dir) = side else {
            return Ok(None);
        };
        if !self.effective_inode(dir)?.is_dir() {
            return Ok(None);
        }
        Ok(self
            .lookup_child(dir, name)?
            .map(|ino| InodeRef::new(dir.dev, ino)))
    }

    /// Whether the lower side of merged directory `dir` has a visible `name`.
    fn lower_has(&mut self, dev: DevId, dir: Ino, name: &str) -> Result<bool, Errno> {
        let link = self.overlay_node(dev, dir)?;
        match self.layer_child(link.lower, name)? {
            Some(r) => Ok(!self.inode(r)?.is_whiteout()),
            None => Ok(false),
        }
    }

    pub(crate) fn overlay_lookup(
        &mut self,
        dev: DevId,
        dir: Ino,
        name: &str,
    ) -> Result<Option<Ino>, Errno> {
        if let Some(ino) = self.overlay_fs(dev)?.table.lookup(dir, name)? {
            return Ok(Some(ino));
        }
        let link = self.overlay_node(dev, dir)?;

        let upper = self.layer_child(link.upper, name)?;
        if let Some(u) = upper {
            if self.inode(u)?.is_whiteout() {
                trace!(name, "hidden by whiteout");
                return Ok(None);
            }
        }
        let mut lower = self.layer_child(link.lower, name)?;
        if let Some(l) = lower {
            if self.inode(l)?.is_whiteout() {
                lower = None;
            }
        }
        // only two directories merge; anything else in upper hides lower
        if let (Some(u), Some(l)) = (upper, lower) {
            if !(self.effective_inode(u)?.is_dir() && self.effective_inode(l)?.is_dir()) {
                lower = None;
            }
        }
        let Some(active) = upper.or(lower) else {
            return Ok(None);
        };

        let src = self.effective_inode(active)?;
        let (shell, perm, uid, gid) = (src.body.shell(), src.perm, src.uid, src.gid);
        let table = &mut self.overlay_fs_mut(dev)?.table;
        let ino = table.alloc(shell, perm, uid, gid);
        let node = table.get_mut(ino)?;
        node.overlay = Some(OverlayLink {
            upper,
            lower,
            active,
            parent: dir,
            name: name.to_string(),
        });
        node.shadow = lower;
        table.link(dir, name, ino)?;
        trace!(name, ino, %active, "overlay node synthesized");
        Ok(Some(ino))
    }

    /// Own entries, plus upper, plus lower; whiteouts hide lower names.
    pub(crate) fn overlay_names(&mut self, dev: DevId, dir: Ino) -> Result<Vec<String>, Errno> {
        let link = self.overlay_node(dev, dir)?;
        let mut names: BTreeSet<String> = self
            .overlay_fs(dev)?
            .table
            .names(dir)?
            .into_iter()
            .collect();
        let mut hidden = BTreeSet::new();

        for (side, is_upper) in [(link.upper, true), (link.lower, false)] {
            let Some(side) = side else { continue };
            if !self.effective_inode(side)?.is_dir() {
                continue;
            }
            for name in self.list_names(side)? {
                if hidden.contains(&name) {
                    continue;
                }
                let child = self.lookup_child(side, &name)?;
                let whiteout = match child {
                    Some(ino) => self.inode(InodeRef::new(side.dev, ino))?.is_whiteout(),
                    None => false,
                };
                if whiteout {
                    if is_upper {
                        hidden.insert(name);
                    }
                } else {
                    names.insert(name);
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

// ============================================================================
// Mutation
// ============================================================================

impl Namespace {
    /// Make sure merged node `ino` has an upper side and return it.
    #[tracing::instrument(skip(self), name = "overlay.copy_up")]
    pub(crate) fn copy_up(&mut self, dev: DevId, ino: Ino) -> Result<InodeRef, Errno> {
        let link = self.overlay_node(dev, ino)?;
        if let Some(upper) = link.upper {
            return Ok(upper);
        }
        if self.overlay_fs(dev)?.layers.upper.is_none() || ino == ROOT_INO {
            return Err(Errno::EROFS);
        }

        let parent_upper = self.copy_up(dev, link.parent)?;
        let lower = link.active;
        let src = self.effective_inode(lower)?.clone();

        let reuse = match self.lookup_child(parent_upper, &link.name)? {
            Some(existing) => {
                let r = InodeRef::new(parent_upper.dev, existing);
                let (is_whiteout, is_dir) = {
                    let inode = self.inode(r)?;
                    (inode.is_whiteout(), inode.is_dir())
                };
                if is_whiteout {
                    self.table_mut(r.dev)?.unlink(parent_upper.ino, &link.name)?;
                    self.release_if_orphan(r);
                    None
                } else if is_dir && src.is_dir() {
                    Some(existing)
                } else {
                    return Err(Errno::EEXIST);
                }
            }
            None => None,
        };
        let upper = match reuse {
            Some(existing) => InodeRef::new(parent_upper.dev, existing),
            None => {
                let new = self.table_mut(parent_upper.dev)?.create(
                    parent_upper.ino,
                    &link.name,
                    src.body.copy_up(),
                    src.perm,
                    src.uid,
                    src.gid,
                )?;
                let upper = InodeRef::new(parent_upper.dev, new);
                let node = self.inode_mut(upper)?;
                node.copy_meta_from(&src);
                node.shadow = Some(lower);
                upper
            }
        };

        let fs = self.overlay_fs_mut(dev)?;
        fs.copy_ups += 1;
        if let Some(l) = fs.table.get_mut(ino)?.overlay.as_mut() {
            l.upper = Some(upper);
            l.active = upper;
        }
        debug!(name = %link.name, %lower, %upper, "copied up");
        Ok(upper)
    }

    /// Drop a whiteout at `name` in upper directory `dir`, if there is one.
    fn clear_whiteout(&mut self, dir: InodeRef, name: &str) -> Result<(), Errno> {
        if let Some(ino) = self.lookup_child(dir, name)? {
            let r = InodeRef::new(dir.dev, ino);
            if self.inode(r)?.is_whiteout() {
                self.table_mut(dir.dev)?.unlink(dir.ino, name)?;
                self.release_if_orphan(r);
            }
        }
        Ok(())
    }

    fn insert_whiteout(&mut self, dev: DevId, dir: InodeRef, name: &str) -> Result<(), Errno> {
        self.table_mut(dir.dev)?
            .create(dir.ino, name, InodeBody::whiteout(), 0, 0, 0)?;
        self.overlay_fs_mut(dev)?.whiteouts += 1;
        debug!(name, %dir, "whiteout inserted");
        Ok(())
    }

    /// Remove the whiteouts an upper directory holds before it is deleted.
    fn purge_whiteouts(&mut self, dir: InodeRef) -> Result<(), Errno> {
        for name in self.list_names(dir)? {
            self.clear_whiteout(dir, &name)?;
        }
        Ok(())
    }

    /// Create `name` in merged directory `dir`. The object goes to the upper
    /// layer; the merged node has no lower side, so a directory created over
    /// a whiteout does not show the lower contents.
    pub(crate) fn overlay_create(
        &mut self,
        dev: DevId,
        dir: Ino,
        name: &str,
        body: InodeBody,
        perm: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Ino, Errno> {
        if self.overlay_lookup(dev, dir, name)?.is_some() {
            return Err(Errno::EEXIST);
        }
        let parent_upper = self.copy_up(dev, dir)?;
        self.clear_whiteout(parent_upper, name)?;
        let shell = body.shell();
        let up = self
            .table_mut(parent_upper.dev)?
            .create(parent_upper.ino, name, body, perm, uid, gid)?;
        let upper = InodeRef::new(parent_upper.dev, up);

        let table = &mut self.overlay_fs_mut(dev)?.table;
        let ino = table.alloc(shell, perm, uid, gid);
        table.get_mut(ino)?.overlay = Some(OverlayLink {
            upper: Some(upper),
            lower: None,
            active: upper,
            parent: dir,
            name: name.to_string(),
        });
        table.link(dir, name, ino)?;
        Ok(ino)
    }

    /// Unlink `name` from merged directory `dir`. Emptiness of directories
    /// is checked by the caller against the merged listing.
    pub(crate) fn overlay_remove(&mut self, dev: DevId, dir: Ino, name: &str) -> Result<(), Errno> {
        let ino = self
            .overlay_lookup(dev, dir, name)?
            .ok_or(Errno::ENOENT)?;
        let link = self.overlay_node(dev, ino)?;
        let needs_whiteout = self.lower_has(dev, dir, name)?;
        let parent_upper = self.copy_up(dev, dir)?;

        if let Some(upper) = link.upper {
            if self.inode(upper)?.is_dir() {
                self.purge_whiteouts(upper)?;
            }
            if self.lookup_child(parent_upper, name)?.is_some() {
                self.table_mut(parent_upper.dev)?
                    .unlink(parent_upper.ino, name)?;
                self.release_if_orphan(upper);
            }
        }
        if needs_whiteout {
            self.insert_whiteout(dev, parent_upper, name)?;
        }
        self.overlay_fs_mut(dev)?.table.unlink(dir, name)?;
        self.release_if_orphan(InodeRef::new(dev, ino));
        Ok(())
    }

    /// Hard link merged node `target` as `name` in `dir`. Both sides end up
    /// sharing one upper inode.
    pub(crate) fn overlay_hardlink(
        &mut self,
        dev: DevId,
        dir: Ino,
        name: &str,
        target: Ino,
    ) -> Result<(), Errno> {
        if self.overlay_lookup(dev, dir, name)?.is_some() {
            return Err(Errno::EEXIST);
        }
        let upper = self.copy_up(dev, target)?;
        let parent_upper = self.copy_up(dev, dir)?;
        if parent_upper.dev != upper.dev {
            return Err(Errno::EXDEV);
        }
        self.clear_whiteout(parent_upper, name)?;
        self.table_mut(upper.dev)?
            .link(parent_upper.ino, name, upper.ino)?;
        self.overlay_fs_mut(dev)?.table.link(dir, name, target)?;
        Ok(())
    }

    /// The merged node `old_name` names, if it may be moved.
    pub(crate) fn overlay_rename_source(
        &mut self,
        dev: DevId,
        old_dir: Ino,
        old_name: &str,
    ) -> Result<Ino, Errno> {
        if self.overlay_fs(dev)?.layers.upper.is_none() {
            return Err(Errno::EROFS);
        }
        let ino = self
            .overlay_lookup(dev, old_dir, old_name)?
            .ok_or(Errno::ENOENT)?;
        let link = self.overlay_node(dev, ino)?;
        if self.effective_inode(link.active)?.is_dir() && link.lower.is_some() {
            return Err(Errno::EXDEV);
        }
        Ok(ino)
    }

    /// Move a merged entry. A directory that still has a lower side cannot
    /// move (EXDEV); anything else is copied up, moved in the upper layer,
    /// and a whiteout covers the old name if the lower layer has it. The
    /// destination must not exist.
    pub(crate) fn overlay_rename(
        &mut self,
        dev: DevId,
        old_dir: Ino,
        old_name: &str,
        new_dir: Ino,
        new_name: &str,
    ) -> Result<(), Errno> {
        let ino = self.overlay_rename_source(dev, old_dir, old_name)?;
        let needs_whiteout = self.lower_has(dev, old_dir, old_name)?;
        let upper = self.copy_up(dev, ino)?;
        let old_parent = self.copy_up(dev, old_dir)?;
        let new_parent = self.copy_up(dev, new_dir)?;
        self.clear_whiteout(new_parent, new_name)?;

        self.table_mut(upper.dev)?
            .rename(old_parent.ino, old_name, new_parent.ino, new_name)?;
        if needs_whiteout {
            self.insert_whiteout(dev, old_parent, old_name)?;
        }

        let table = &mut self.overlay_fs_mut(dev)?.table;
        table.unlink(old_dir, old_name)?;
        table.link(new_dir, new_name, ino)?;
        if let Some(l) = table.get_mut(ino)?.overlay.as_mut() {
            l.lower = None;
            l.active = upper;
            l.parent = new_dir;
            l.name = new_name.to_string();
        }
        Ok(())
    }
}
