//! Device filesystem.
//!
//! Holds a fixed `null` character device and lazily grows block device
//! nodes for every registered storage device whose source lies under the
//! device prefix. `/dev/mapper/vg-root` shows up as `mapper/vg-root`, with
//! `mapper` created as a directory on first lookup.

use memos_types::path::is_under;
use memos_types::{DevId, Errno, Ino, makedev};
use tracing::debug;

use super::{Backend, FileSystem, InodeTable};
use crate::inode::{InodeBody, ROOT_INO};
use crate::namespace::{Namespace, corrupted};

/// Group that owns block device nodes.
pub const DISK_GID: u32 = 6;

#[derive(Debug)]
pub struct DevTmpFs {
    source: String,
    prefix: String,
    table: InodeTable,
}

impl DevTmpFs {
    pub const NULL: DevId = makedev(1, 3);
    pub const ZERO: DevId = makedev(1, 5);

    pub fn new(dev: DevId, source: &str, prefix: &str) -> Self {
        let mut table = InodeTable::new(dev, 0o755, 0, 0);
        let null = table.alloc(InodeBody::CharDev { rdev: Self::NULL }, 0o666, 0, 0);
        if let Err(e) = table.link(ROOT_INO, "null", null) {
            corrupted(format_args!("devtmpfs {source}: linking null: {e}"));
        }
        Self {
            source: source.to_string(),
            prefix: prefix.to_string(),
            table,
        }
    }

    /// Whether I/O against `rdev` is a no-op (`null`, `zero`).
    pub fn is_sink(rdev: DevId) -> bool {
        rdev == Self::NULL || rdev == Self::ZERO
    }

    /// Path prefix the synthesized nodes answer for.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of `dir` relative to the root; empty for the root itself.
    fn rel_path(&self, dir: Ino) -> Result<String, Errno> {
        let mut parts = Vec::new();
        let mut cur = dir;
        while cur != ROOT_INO {
            let parent = self.table.get(cur)?.parent().ok_or(Errno::ENOTDIR)?;
            parts.push(self.table.name_of(parent, cur).ok_or(Errno::ENOENT)?);
            cur = parent;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }
}

impl FileSystem for DevTmpFs {
    fn fstype(&self) -> &str {
        "devtmpfs"
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
}

fn join_rel(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

impl Namespace {
    fn devtmpfs(&self, dev: DevId) -> Result<&DevTmpFs, Errno> {
        self.backend(dev)?.as_devtmpfs().ok_or(Errno::ENODEV)
    }

    /// Storage devices visible under `prefix`, as (relative path, rdev).
    fn device_nodes(&self, prefix: &str) -> Vec<(String, DevId)> {
        self.devices
            .iter()
            .filter_map(|(dev, backend)| {
                let Backend::Storage(fs) = backend else {
                    return None;
                };
                let source = fs.source();
                if !is_under(source, prefix) || source.len() <= prefix.len() {
                    return None;
                }
                let rel = source[prefix.len()..].trim_start_matches('/');
                Some((rel.to_string(), *dev))
            })
            .collect()
    }

    pub(crate) fn devtmpfs_lookup(
        &mut self,
        dev: DevId,
        dir: Ino,
        name: &str,
    ) -> Result<Option<Ino>, Errno> {
        let fs = self.devtmpfs(dev)?;
        if let Some(ino) = fs.table.lookup(dir, name)? {
            return Ok(Some(ino));
        }
        let want = join_rel(&fs.rel_path(dir)?, name);
        let nested = format!("{want}/");
        let prefix = fs.prefix.clone();

        for (rel, rdev) in self.device_nodes(&prefix) {
            let body = if rel == want {
                InodeBody::BlockDev { rdev }
            } else if rel.starts_with(&nested) {
                InodeBody::dir()
            } else {
                continue;
            };
            let (perm, gid) = match body {
                InodeBody::BlockDev { .. } => (0o660, DISK_GID),
                _ => (0o755, 0),
            };
            let ino = self
                .table_mut(dev)?
                .create(dir, name, body, perm, 0, gid)?;
            debug!(
                node = %want,
                rdev = %memos_types::format_dev(rdev),
                "devtmpfs node synthesized"
            );
            return Ok(Some(ino));
        }
        Ok(None)
    }

    /// Materialize every synthesizable child of `dir`, then list it.
    pub(crate) fn devtmpfs_names(&mut self, dev: DevId, dir: Ino) -> Result<Vec<String>, Errno> {
        let fs = self.devtmpfs(dev)?;
        let base = fs.rel_path(dir)?;
        let prefix = fs.prefix.clone();
        let mut pending = Vec::new();
        for (rel, _) in self.device_nodes(&prefix) {
            let rest = if base.is_empty() {
                Some(rel.as_str())
            } else {
                rel.strip_prefix(&base).and_then(|r| r.strip_prefix('/'))
            };
            if let Some(first) = rest.and_then(|r| r.split('/').next()) {
                if !first.is_empty() {
                    pending.push(first.to_string());
                }
            }
        }
        for name in pending {
            self.devtmpfs_lookup(dev, dir, &name)?;
        }
        self.table(dev)?.names(dir)
    }

    /// The single devtmpfs instance, created on first use.
    pub(crate) fn devtmpfs_dev(&mut self) -> Result<DevId, Errno> {
        let existing = self
            .devices
            .iter()
            .find(|(_, b)| matches!(b, Backend::Devtmpfs(_)))
            .map(|(dev, _)| *dev);
        match existing {
            Some(dev) => Ok(dev),
            None => self.make_filesystem_with(None, None, "devtmpfs", "devtmpfs", None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeRef;

    #[test]
    fn test_null_precreated_at_two() {
        let fs = DevTmpFs::new(makedev(0, 5), "devtmpfs", "/dev");
        let null = fs.table().lookup(ROOT_INO, "null").unwrap();
        assert_eq!(null, Some(2));
        assert_eq!(fs.table().get(2).unwrap().rdev(), DevTmpFs::NULL);
    }

    #[test]
    fn test_synthesizes_registered_devices() {
        let mut ns = Namespace::default();
        let sda1 = ns.make_filesystem(None, None, "ext4", "/dev/sda1").unwrap();
        let vg = ns.make_filesystem(None, None, "xfs", "/dev/mapper/vg-root").unwrap();
        ns.make_filesystem(None, None, "tmpfs", "tmpfs").unwrap();
        let dev = ns.devtmpfs_dev().unwrap();

        let names = ns.devtmpfs_names(dev, ROOT_INO).unwrap();
        assert_eq!(names, vec!["mapper", "null", "sda1"]);

        let ino = ns.devtmpfs_lookup(dev, ROOT_INO, "sda1").unwrap().unwrap();
        let node = ns.inode(InodeRef::new(dev, ino)).unwrap();
        assert_eq!(node.rdev(), sda1);
        assert_eq!(node.gid, DISK_GID);

        let mapper = ns.devtmpfs_lookup(dev, ROOT_INO, "mapper").unwrap().unwrap();
        assert!(ns.inode(InodeRef::new(dev, mapper)).unwrap().is_dir());
        let root = ns.devtmpfs_lookup(dev, mapper, "vg-root").unwrap().unwrap();
        assert_eq!(ns.inode(InodeRef::new(dev, root)).unwrap().rdev(), vg);
        assert_eq!(ns.devtmpfs_lookup(dev, ROOT_INO, "sdb").unwrap(), None);
    }

    #[test]
    fn test_single_instance() {
        let mut ns = Namespace::default();
        let a = ns.devtmpfs_dev().unwrap();
        let b = ns.devtmpfs_dev().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, makedev(0, 5));
    }
}
