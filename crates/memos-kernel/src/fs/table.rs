//! Append-only inode arena.
//!
//! Slot 0 is never used and the root directory lives at [`ROOT_INO`]. Inode
//! numbers are handed out in order and never reused, so a freed slot stays
//! empty for the life of the filesystem.

use memos_types::{DevId, Errno, Ino};
use tracing::trace;

use crate::inode::{Inode, InodeBody, ROOT_INO};

#[derive(Debug, Clone)]
pub struct InodeTable {
    dev: DevId,
    slots: Vec<Option<Inode>>,
}

impl InodeTable {
    /// A table holding only the root directory.
    pub fn new(dev: DevId, root_perm: u32, uid: u32, gid: u32) -> Self {
        let mut root = Inode::new(dev, ROOT_INO, InodeBody::dir(), root_perm, uid, gid);
        root.nlink = 2;
        Self {
            dev,
            slots: vec![None, Some(root)],
        }
    }

    pub fn dev(&self) -> DevId {
        self.dev
    }

    /// Number of live inodes.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The number the next allocation will receive.
    pub fn next_ino(&self) -> Ino {
        self.slots.len() as Ino
    }

    pub fn get(&self, ino: Ino) -> Result<&Inode, Errno> {
        self.slots
            .get(ino as usize)
            .and_then(Option::as_ref)
            .ok_or(Errno::ENOENT)
    }

    pub fn get_mut(&mut self, ino: Ino) -> Result<&mut Inode, Errno> {
        self.slots
            .get_mut(ino as usize)
            .and_then(Option::as_mut)
            .ok_or(Errno::ENOENT)
    }

    /// The root directory, which is never freed.
    pub fn root_mut(&mut self) -> &mut Inode {
        match self.slots.get_mut(ROOT_INO as usize).and_then(Option::as_mut) {
            Some(root) => root,
            None => crate::namespace::corrupted(format_args!(
                "inode table {} lost its root",
                memos_types::format_dev(self.dev)
            )),
        }
    }

    /// Allocate an unlinked inode (link count 0).
    pub fn alloc(&mut self, body: InodeBody, perm: u32, uid: u32, gid: u32) -> Ino {
        let ino = self.next_ino();
        self.slots
            .push(Some(Inode::new(self.dev, ino, body, perm, uid, gid)));
        ino
    }

    pub fn lookup(&self, dir: Ino, name: &str) -> Result<Option<Ino>, Errno> {
        Ok(self.get(dir)?.entries()?.get(name).copied())
    }

    pub fn names(&self, dir: Ino) -> Result<Vec<String>, Errno> {
        Ok(self.get(dir)?.entries()?.keys().cloned().collect())
    }

    /// Name under which `dir` lists `child`, if any.
    pub fn name_of(&self, dir: Ino, child: Ino) -> Option<String> {
        self.get(dir)
            .ok()?
            .entries()
            .ok()?
            .iter()
            .find(|(_, ino)| **ino == child)
            .map(|(name, _)| name.clone())
    }

    /// Enter `child` into `dir` under `name` and bump its link count.
    ///
    /// A directory child also takes `dir` as its parent, and `dir` gains a
    /// link for the child's `..`.
    pub fn link(&mut self, dir: Ino, name: &str, child: Ino) -> Result<(), Errno> {
        let child_is_dir = self.get(child)?.is_dir();
        let entries = self.get_mut(dir)?.entries_mut()?;
        if entries.contains_key(name) {
            return Err(Errno::EEXIST);
        }
        entries.insert(name.to_string(), child);

        let node = self.get_mut(child)?;
        node.nlink += 1;
        node.ctime = std::time::SystemTime::now();
        if let InodeBody::Dir { parent, .. } = &mut node.body {
            *parent = dir;
            node.nlink += 1;
        }
        let parent = self.get_mut(dir)?;
        if child_is_dir {
            parent.nlink += 1;
        }
        parent.touch();
        trace!(dev = self.dev, dir, name, child, "link");
        Ok(())
    }

    /// Remove `name` from `dir`, returning the inode it named. The inode
    /// stays allocated; the caller frees it once nothing holds it open.
    pub fn unlink(&mut self, dir: Ino, name: &str) -> Result<Ino, Errno> {
        let child = self
            .get_mut(dir)?
            .entries_mut()?
            .remove(name)
            .ok_or(Errno::ENOENT)?;
        let node = self.get_mut(child)?;
        let child_is_dir = node.is_dir();
        node.nlink = node.nlink.saturating_sub(if child_is_dir { 2 } else { 1 });
        node.ctime = std::time::SystemTime::now();
        let parent = self.get_mut(dir)?;
        if child_is_dir {
            parent.nlink = parent.nlink.saturating_sub(1);
        }
        parent.touch();
        trace!(dev = self.dev, dir, name, child, "unlink");
        Ok(child)
    }

    /// Allocate and link in one step.
    pub fn create(
        &mut self,
        dir: Ino,
        name: &str,
        body: InodeBody,
        perm: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Ino, Errno> {
        if self.lookup(dir, name)?.is_some() {
            return Err(Errno::EEXIST);
        }
        let ino = self.alloc(body, perm, uid, gid);
        self.link(dir, name, ino)?;
        Ok(ino)
    }

    /// Move an entry, returning the inode that was replaced at the
    /// destination. Type compatibility is the caller's concern.
    pub fn rename(
        &mut self,
        old_dir: Ino,
        old_name: &str,
        new_dir: Ino,
        new_name: &str,
    ) -> Result<Option<Ino>, Errno> {
        let child = self.lookup(old_dir, old_name)?.ok_or(Errno::ENOENT)?;
        let replaced = match self.lookup(new_dir, new_name)? {
            Some(existing) if existing == child => return Ok(None),
            Some(_) => Some(self.unlink(new_dir, new_name)?),
            None => None,
        };
        self.unlink(old_dir, old_name)?;
        self.link(new_dir, new_name, child)?;
        Ok(replaced)
    }

    /// Drop an inode. Callers check the link count and open files first.
    pub fn free(&mut self, ino: Ino) {
        if ino == ROOT_INO {
            return;
        }
        if let Some(slot) = self.slots.get_mut(ino as usize) {
            *slot = None;
            trace!(dev = self.dev, ino, "free");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InodeTable {
        InodeTable::new(memos_types::makedev(0, 2), 0o755, 0, 0)
    }

    #[test]
    fn test_root_at_one_first_alloc_at_two() {
        let mut t = table();
        assert!(t.get(0).is_err());
        assert!(t.get(ROOT_INO).unwrap().is_dir());
        let ino = t.create(ROOT_INO, "a", InodeBody::file(), 0o644, 0, 0).unwrap();
        assert_eq!(ino, 2);
        assert_eq!(t.get(ino).unwrap().nlink, 1);
    }

    #[test]
    fn test_dir_link_counts_and_parent() {
        let mut t = table();
        let d = t.create(ROOT_INO, "d", InodeBody::dir(), 0o755, 0, 0).unwrap();
        assert_eq!(t.get(d).unwrap().nlink, 2);
        assert_eq!(t.get(d).unwrap().parent(), Some(ROOT_INO));
        assert_eq!(t.get(ROOT_INO).unwrap().nlink, 3);

        t.unlink(ROOT_INO, "d").unwrap();
        assert_eq!(t.get(d).unwrap().nlink, 0);
        assert_eq!(t.get(ROOT_INO).unwrap().nlink, 2);
    }

    #[test]
    fn test_create_existing_name() {
        let mut t = table();
        t.create(ROOT_INO, "a", InodeBody::file(), 0o644, 0, 0).unwrap();
        assert_eq!(
            t.create(ROOT_INO, "a", InodeBody::file(), 0o644, 0, 0),
            Err(Errno::EEXIST)
        );
    }

    #[test]
    fn test_numbers_never_reused() {
        let mut t = table();
        let a = t.create(ROOT_INO, "a", InodeBody::file(), 0o644, 0, 0).unwrap();
        t.unlink(ROOT_INO, "a").unwrap();
        t.free(a);
        let b = t.create(ROOT_INO, "b", InodeBody::file(), 0o644, 0, 0).unwrap();
        assert_eq!(b, a + 1);
        assert_eq!(t.live(), 2);
    }

    #[test]
    fn test_rename_replaces_and_reparents() {
        let mut t = table();
        let d1 = t.create(ROOT_INO, "d1", InodeBody::dir(), 0o755, 0, 0).unwrap();
        let d2 = t.create(ROOT_INO, "d2", InodeBody::dir(), 0o755, 0, 0).unwrap();
        let sub = t.create(d1, "sub", InodeBody::dir(), 0o755, 0, 0).unwrap();
        let old = t.create(d2, "x", InodeBody::file(), 0o644, 0, 0).unwrap();
        let f = t.create(d1, "f", InodeBody::file(), 0o644, 0, 0).unwrap();

        assert_eq!(t.rename(d1, "f", d2, "x").unwrap(), Some(old));
        assert_eq!(t.lookup(d2, "x").unwrap(), Some(f));
        assert_eq!(t.lookup(d1, "f").unwrap(), None);

        t.rename(d1, "sub", d2, "sub").unwrap();
        assert_eq!(t.get(sub).unwrap().parent(), Some(d2));
        assert_eq!(t.name_of(d2, sub).as_deref(), Some("sub"));
    }

    #[test]
    fn test_link_into_non_directory() {
        let mut t = table();
        let f = t.create(ROOT_INO, "f", InodeBody::file(), 0o644, 0, 0).unwrap();
        assert_eq!(
            t.create(f, "x", InodeBody::file(), 0o644, 0, 0),
            Err(Errno::ENOTDIR)
        );
    }
}
