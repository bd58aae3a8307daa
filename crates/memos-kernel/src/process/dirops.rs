//! Namespace-shaping calls: creating, linking, removing and renaming
//! entries, metadata changes, and the working/root directory.

use std::time::SystemTime;

use memos_types::mode::{ACCESS_EXEC, ACCESS_READ, ACCESS_WRITE, PERM_MASK};
use memos_types::{DevId, Errno, FileKind, OpenFlags, Stat, apply_umask, path};
use serde::Serialize;
use tracing::debug;

use super::{CWD_FD, MemOs, ROOT_FD, UNCHANGED};
use crate::error::{ErrnoContext, VfsResult};
use crate::file::{Fd, OpenFile};
use crate::inode::InodeBody;
use crate::mount::Loc;
use crate::perm;

/// One entry of [`MemOs::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub stat: Stat,
}

impl MemOs<'_> {
    /// Create `name` in `parent` with `mode` less the umask (symlinks keep
    /// 0777). Needs write and search permission on a writable mount.
    pub(crate) fn make_node(
        &mut self,
        parent: Loc,
        name: &str,
        body: InodeBody,
        mode: u32,
    ) -> Result<Loc, Errno> {
        if name.is_empty() {
            return Err(Errno::EEXIST);
        }
        self.check_dir_writable(parent)?;
        let creds = self.creds()?;
        let perm = match body {
            InodeBody::Link { .. } => 0o777,
            _ => apply_umask(mode, self.proc()?.umask),
        };
        let dir = self.ns.loc_ref(parent);
        let ino = self
            .ns
            .create_child(dir, name, body, perm, creds.uid, creds.gid)?;
        Ok(Loc::new(parent.mount, ino))
    }

    /// Write and search permission on directory `dir`, on a writable mount.
    fn check_dir_writable(&self, dir: Loc) -> Result<(), Errno> {
        let creds = self.creds()?;
        let inode = self.ns.effective_inode(self.ns.loc_ref(dir))?;
        if !inode.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        perm::check(inode, &creds, ACCESS_WRITE | ACCESS_EXEC)?;
        if self.ns.mount(dir.mount).is_read_only() {
            return Err(Errno::EROFS);
        }
        Ok(())
    }

    fn loc_is_dir(&self, loc: Loc) -> Result<bool, Errno> {
        Ok(self.ns.effective_inode(self.ns.loc_ref(loc))?.is_dir())
    }

    fn create_new(&mut self, name: &str, body: InodeBody, mode: u32) -> Result<Loc, Errno> {
        let res = self.resolve(name, false)?;
        if res.node.is_some() {
            return Err(Errno::EEXIST);
        }
        let parent = res.parent()?;
        self.make_node(parent, &res.name, body, mode)
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub fn mkdir(&mut self, name: &str, mode: u32) -> VfsResult<()> {
        self.create_new(name, InodeBody::dir(), mode)
            .at_path("mkdir", name)?;
        Ok(())
    }

    /// Create `name` and any missing parents. Existing directories are
    /// fine; an existing non-directory on the way is ENOTDIR.
    pub fn mkdir_all(&mut self, name: &str, mode: u32) -> VfsResult<()> {
        let mut prefix = if name.starts_with('/') { "/".to_string() } else { String::new() };
        for seg in path::segments(name) {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(seg);
            match self.resolve(&prefix, true).at_path("mkdir", &prefix)?.node {
                Some(loc) => {
                    if !self.loc_is_dir(loc).at_path("mkdir", &prefix)? {
                        return Err(Errno::ENOTDIR).at_path("mkdir", &prefix);
                    }
                }
                None => self.mkdir(&prefix, mode)?,
            }
        }
        Ok(())
    }

    pub fn mkfifo(&mut self, name: &str, mode: u32) -> VfsResult<()> {
        self.create_new(name, InodeBody::fifo(), mode)
            .at_path("mkfifo", name)?;
        Ok(())
    }

    /// Create a special file. The type comes from the `S_IF*` bits of
    /// `mode`; device nodes need privilege.
    pub fn mknod(&mut self, name: &str, mode: u32, dev: DevId) -> VfsResult<()> {
        self.mknod_inner(name, mode, dev).at_path("mknod", name)
    }

    fn mknod_inner(&mut self, name: &str, mode: u32, dev: DevId) -> Result<(), Errno> {
        let kind = match mode & memos_types::mode::S_IFMT {
            0 => FileKind::File,
            bits => FileKind::from_mode(bits).ok_or(Errno::EINVAL)?,
        };
        let body = match kind {
            FileKind::File => InodeBody::file(),
            FileKind::Fifo => InodeBody::fifo(),
            FileKind::Sock => InodeBody::Sock,
            FileKind::CharDev | FileKind::BlockDev => {
                if !self.creds()?.is_privileged() {
                    return Err(Errno::EPERM);
                }
                if kind == FileKind::CharDev {
                    InodeBody::CharDev { rdev: dev }
                } else {
                    InodeBody::BlockDev { rdev: dev }
                }
            }
            FileKind::Dir => return Err(Errno::EPERM),
            FileKind::Link => return Err(Errno::EINVAL),
        };
        self.create_new(name, body, mode & PERM_MASK)?;
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Hard link `new` to `old`. Directories cannot be linked, and both
    /// names must be on the same mount.
    pub fn link(&mut self, old: &str, new: &str) -> VfsResult<()> {
        self.link_inner(old, new).at_link("link", old, new)
    }

    fn link_inner(&mut self, old: &str, new: &str) -> Result<(), Errno> {
        let src = self.resolve(old, false)?.node()?;
        if self.loc_is_dir(src)? {
            return Err(Errno::EPERM);
        }
        let dst = self.resolve(new, false)?;
        if dst.node.is_some() {
            return Err(Errno::EEXIST);
        }
        let parent = dst.parent()?;
        if parent.mount != src.mount {
            return Err(Errno::EXDEV);
        }
        self.check_dir_writable(parent)?;
        let dir = self.ns.loc_ref(parent);
        self.ns.link_child(dir, &dst.name, src.ino)
    }

    pub fn symlink(&mut self, target: &str, new: &str) -> VfsResult<()> {
        self.create_new(new, InodeBody::link(target), 0o777)
            .at_link("symlink", target, new)?;
        Ok(())
    }

    pub fn read_link(&mut self, name: &str) -> VfsResult<String> {
        let loc = self
            .resolve(name, false)
            .and_then(|r| r.node())
            .at_path("readlink", name)?;
        let inode = self
            .ns
            .effective_inode(self.ns.loc_ref(loc))
            .at_path("readlink", name)?;
        Ok(inode.link_target().at_path("readlink", name)?.to_string())
    }

    // ========================================================================
    // Removal and rename
    // ========================================================================

    /// Remove a file or an empty directory.
    pub fn remove(&mut self, name: &str) -> VfsResult<()> {
        self.remove_inner(name).at_path("remove", name)
    }

    fn remove_inner(&mut self, name: &str) -> Result<(), Errno> {
        let res = self.resolve(name, false)?;
        let loc = res.node()?;
        let parent = res.parent()?;
        if self.ns.mount_rooted_at(loc).is_some() {
            return Err(Errno::EBUSY);
        }
        self.check_dir_writable(parent)?;
        if self.loc_is_dir(loc)? && !self.ns.list_names(self.ns.loc_ref(loc))?.is_empty() {
            return Err(Errno::ENOTEMPTY);
        }
        let dir = self.ns.loc_ref(parent);
        self.ns.remove_child(dir, &res.name)
    }

    /// Remove `name` and everything below it. A missing path is not an
    /// error.
    pub fn remove_all(&mut self, name: &str) -> VfsResult<()> {
        let res = self.resolve(name, false).at_path("remove", name)?;
        let Some(loc) = res.node else {
            return Ok(());
        };
        if self.loc_is_dir(loc).at_path("remove", name)? && self.ns.mount_rooted_at(loc).is_none() {
            let dir = self.ns.loc_ref(loc);
            for child in self.ns.list_names(dir).at_path("remove", name)? {
                self.remove_all(&path::join(name, &child))?;
            }
        }
        self.remove(name)
    }

    /// Move `old` to `new`, replacing a compatible target.
    pub fn rename(&mut self, old: &str, new: &str) -> VfsResult<()> {
        self.rename_inner(old, new).at_link("rename", old, new)
    }

    fn rename_inner(&mut self, old: &str, new: &str) -> Result<(), Errno> {
        let src = self.resolve(old, false)?;
        let src_loc = src.node()?;
        let src_parent = src.parent()?;
        if self.ns.mount_rooted_at(src_loc).is_some() {
            return Err(Errno::EBUSY);
        }
        let dst = self.resolve(new, false)?;
        let dst_parent = dst.parent()?;
        if src_parent.mount != dst_parent.mount {
            return Err(Errno::EXDEV);
        }
        self.check_dir_writable(src_parent)?;
        self.check_dir_writable(dst_parent)?;

        let src_is_dir = self.loc_is_dir(src_loc)?;
        if let Some(dst_loc) = dst.node {
            if dst_loc == src_loc {
                return Ok(());
            }
            if self.ns.mount_rooted_at(dst_loc).is_some() {
                return Err(Errno::EBUSY);
            }
            match (src_is_dir, self.loc_is_dir(dst_loc)?) {
                (true, false) => return Err(Errno::ENOTDIR),
                (false, true) => return Err(Errno::EISDIR),
                (true, true) => {
                    if !self.ns.list_names(self.ns.loc_ref(dst_loc))?.is_empty() {
                        return Err(Errno::ENOTEMPTY);
                    }
                }
                (false, false) => {}
            }
        }
        if src_is_dir {
            // no moving a directory into its own subtree
            let root = self.root_loc()?;
            let mut cur = dst_parent;
            loop {
                if cur == src_loc {
                    return Err(Errno::EINVAL);
                }
                match self.ns.name_in_parent(cur, root)? {
                    Some((up, _)) => cur = up,
                    None => break,
                }
            }
        }

        let from = self.ns.loc_ref(src_parent);
        let to = self.ns.loc_ref(dst_parent);
        self.ns.check_rename(from, &src.name, to)?;
        if dst.node.is_some() {
            self.ns.remove_child(to, &dst.name)?;
        }
        self.ns.rename_child(from, &src.name, to, &dst.name)?;
        debug!(old, new, "renamed");
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Stat `name`, following a final symlink.
    pub fn stat(&mut self, name: &str) -> VfsResult<Stat> {
        self.stat_inner(name, true).at_path("stat", name)
    }

    /// Stat `name` itself, even if it is a symlink.
    pub fn lstat(&mut self, name: &str) -> VfsResult<Stat> {
        self.stat_inner(name, false).at_path("lstat", name)
    }

    fn stat_inner(&mut self, name: &str, follow: bool) -> Result<Stat, Errno> {
        let loc = self.resolve(name, follow)?.node()?;
        self.ns.stat_of(loc)
    }

    /// Entries of a directory with their (non-following) stats, sorted by
    /// name.
    pub fn read_dir(&mut self, name: &str) -> VfsResult<Vec<DirEntry>> {
        self.read_dir_inner(name).at_path("open", name)
    }

    fn read_dir_inner(&mut self, name: &str) -> Result<Vec<DirEntry>, Errno> {
        let loc = self.resolve(name, true)?.node()?;
        let creds = self.creds()?;
        let dir = self.ns.loc_ref(loc);
        {
            let inode = self.ns.effective_inode(dir)?;
            if !inode.is_dir() {
                return Err(Errno::ENOTDIR);
            }
            perm::check(inode, &creds, ACCESS_READ)?;
        }
        let mut out = Vec::new();
        for entry in self.ns.list_names(dir)? {
            let Some(ino) = self.ns.lookup_child(dir, &entry)? else {
                continue;
            };
            let child = self.ns.cross_mounts(Loc::new(loc.mount, ino));
            out.push(DirEntry {
                name: entry,
                stat: self.ns.stat_of(child)?,
            });
        }
        Ok(out)
    }

    /// Change permission bits. Only the owner (or a privileged caller) may.
    pub fn chmod(&mut self, name: &str, mode: u32) -> VfsResult<()> {
        self.chmod_inner(name, mode).at_path("chmod", name)
    }

    fn chmod_inner(&mut self, name: &str, mode: u32) -> Result<(), Errno> {
        let loc = self.resolve(name, true)?.node()?;
        let target = self.owned_target(loc)?;
        let inode = self.ns.inode_mut(target)?;
        inode.perm = mode & PERM_MASK;
        inode.ctime = SystemTime::now();
        Ok(())
    }

    /// Change ownership, following a final symlink. Pass [`UNCHANGED`] to
    /// keep either id.
    pub fn chown(&mut self, name: &str, uid: u32, gid: u32) -> VfsResult<()> {
        self.chown_inner(name, uid, gid, true).at_path("chown", name)
    }

    /// Change ownership of `name` itself.
    pub fn lchown(&mut self, name: &str, uid: u32, gid: u32) -> VfsResult<()> {
        self.chown_inner(name, uid, gid, false).at_path("lchown", name)
    }

    fn chown_inner(&mut self, name: &str, uid: u32, gid: u32, follow: bool) -> Result<(), Errno> {
        let loc = self.resolve(name, follow)?.node()?;
        let creds = self.creds()?;
        if !creds.is_privileged() {
            // an owner may only move the file between its own groups
            let inode = self.ns.effective_inode(self.ns.loc_ref(loc))?;
            let uid_ok = uid == UNCHANGED || uid == inode.uid;
            let gid_ok = gid == UNCHANGED || creds.in_group(gid);
            if !creds.owns(inode) || !uid_ok || !gid_ok {
                return Err(Errno::EPERM);
            }
        }
        let target = self.owned_target(loc)?;
        let inode = self.ns.inode_mut(target)?;
        if uid != UNCHANGED {
            inode.uid = uid;
        }
        if gid != UNCHANGED {
            inode.gid = gid;
        }
        inode.ctime = SystemTime::now();
        Ok(())
    }

    /// Set access and modification times.
    pub fn chtimes(&mut self, name: &str, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.chtimes_inner(name, atime, mtime)
            .at_path("chtimes", name)
    }

    fn chtimes_inner(
        &mut self,
        name: &str,
        atime: SystemTime,
        mtime: SystemTime,
    ) -> Result<(), Errno> {
        let loc = self.resolve(name, true)?.node()?;
        let target = self.owned_target(loc)?;
        let inode = self.ns.inode_mut(target)?;
        inode.atime = atime;
        inode.mtime = mtime;
        inode.ctime = SystemTime::now();
        Ok(())
    }

    /// The inode a metadata change at `loc` lands on, after checking the
    /// caller owns it and the mount is writable. Overlay nodes copy up.
    fn owned_target(&mut self, loc: Loc) -> Result<crate::inode::InodeRef, Errno> {
        let creds = self.creds()?;
        let own = self.ns.loc_ref(loc);
        if !creds.owns(self.ns.effective_inode(own)?) {
            return Err(Errno::EPERM);
        }
        if self.ns.mount(loc.mount).is_read_only() {
            return Err(Errno::EROFS);
        }
        self.ns.writable_ref(own)
    }

    // ========================================================================
    // Working and root directory
    // ========================================================================

    pub fn chdir(&mut self, name: &str) -> VfsResult<()> {
        self.enter_dir(name, CWD_FD).at_path("chdir", name)
    }

    /// Change to the directory open at `fd`.
    pub fn fchdir(&mut self, fd: Fd) -> VfsResult<()> {
        let pid = self.getpid();
        if fd < 0 {
            return Err(Errno::EBADF).at_fd("fchdir", fd);
        }
        let (loc, path) = {
            let id = self.ns.file_id(pid, fd).at_fd("fchdir", fd)?;
            let file = self.ns.open_file(id).at_fd("fchdir", fd)?;
            (file.loc, file.path.clone())
        };
        self.install_dir(loc, CWD_FD, path).at_fd("fchdir", fd)
    }

    /// Change the process root. Needs privilege.
    pub fn chroot(&mut self, name: &str) -> VfsResult<()> {
        if !self.creds().at_path("chroot", name)?.is_privileged() {
            return Err(Errno::EPERM).at_path("chroot", name);
        }
        self.enter_dir(name, ROOT_FD).at_path("chroot", name)
    }

    fn enter_dir(&mut self, name: &str, slot: Fd) -> Result<(), Errno> {
        let loc = self.resolve(name, true)?.node()?;
        let path = self.abs_path(name);
        self.install_dir(loc, slot, path)
    }

    fn install_dir(&mut self, loc: Loc, slot: Fd, path: String) -> Result<(), Errno> {
        let creds = self.creds()?;
        {
            let inode = self.ns.effective_inode(self.ns.loc_ref(loc))?;
            if !inode.is_dir() {
                return Err(Errno::ENOTDIR);
            }
            perm::check(inode, &creds, ACCESS_EXEC)?;
        }
        let pid = self.getpid();
        let mut file = OpenFile::new(loc, pid, OpenFlags::DIRECTORY, path);
        file.readable = true;
        file.executable = true;
        self.ns.install_file(pid, slot, file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use memos_types::O_RDONLY;

    use super::*;
    use crate::namespace::Namespace;
    use crate::perm::Credentials;

    #[test]
    fn test_mkdir_all_idempotent() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir_all("/a/b/c", 0o755).unwrap();
        os.mkdir_all("/a/b/c", 0o755).unwrap();
        assert!(os.stat("/a/b/c").unwrap().is_dir());
        os.write_file("/a/file", b"", 0o644).unwrap();
        let err = os.mkdir_all("/a/file/x", 0o755).unwrap_err();
        assert!(err.is(Errno::ENOTDIR));
    }

    #[test]
    fn test_mkdir_existing() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir("/d", 0o755).unwrap();
        assert!(os.mkdir("/d", 0o755).unwrap_err().is(Errno::EEXIST));
        assert!(os.mkdir("/", 0o755).unwrap_err().is(Errno::EEXIST));
        assert!(os.mkdir("/x/y", 0o755).unwrap_err().is(Errno::ENOENT));
    }

    #[test]
    fn test_nlink_accounting() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        let root_links = os.stat("/").unwrap().nlink;
        os.mkdir("/d", 0o755).unwrap();
        assert_eq!(os.stat("/").unwrap().nlink, root_links + 1);
        assert_eq!(os.stat("/d").unwrap().nlink, 2);

        os.write_file("/f", b"x", 0o644).unwrap();
        os.link("/f", "/d/g").unwrap();
        assert_eq!(os.stat("/f").unwrap().nlink, 2);
        assert!(os.stat("/f").unwrap().same_file(&os.stat("/d/g").unwrap()));
        os.remove("/f").unwrap();
        assert_eq!(os.read_file("/d/g").unwrap(), b"x");
    }

    #[test]
    fn test_link_directory_refused() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir("/d", 0o755).unwrap();
        assert!(os.link("/d", "/e").unwrap_err().is(Errno::EPERM));
    }

    #[test]
    fn test_symlink_and_read_link() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/target", b"data", 0o644).unwrap();
        os.symlink("/target", "/ln").unwrap();
        assert_eq!(os.read_link("/ln").unwrap(), "/target");
        assert!(os.lstat("/ln").unwrap().is_symlink());
        assert_eq!(os.lstat("/ln").unwrap().perm(), 0o777);
        assert_eq!(os.read_file("/ln").unwrap(), b"data");
        assert!(os.read_link("/target").unwrap_err().is(Errno::EINVAL));
    }

    #[test]
    fn test_symlink_loop() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.symlink("/b", "/a").unwrap();
        os.symlink("/a", "/b").unwrap();
        assert!(os.open("/a").unwrap_err().is(Errno::ELOOP));
        os.symlink("self", "/self").unwrap();
        assert!(os.stat("/self").unwrap_err().is(Errno::ELOOP));
        assert!(os.lstat("/self").is_ok());
    }

    #[test]
    fn test_remove_rules() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir_all("/d/e", 0o755).unwrap();
        assert!(os.remove("/d").unwrap_err().is(Errno::ENOTEMPTY));
        assert!(os.remove("/").unwrap_err().is(Errno::EBUSY));
        os.remove_all("/d").unwrap();
        assert!(os.stat("/d").unwrap_err().is(Errno::ENOENT));
        os.remove_all("/d").unwrap();
    }

    #[test]
    fn test_unlinked_file_readable_while_open() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/tmp", b"still here", 0o644).unwrap();
        let fd = os.open_file("/tmp", O_RDONLY, 0).unwrap();
        os.remove("/tmp").unwrap();
        let mut buf = [0u8; 32];
        let n = os.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"still here");
        assert_eq!(os.fstat(fd).unwrap().nlink, 0);
        os.close(fd).unwrap();
    }

    #[test]
    fn test_rename_rules() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir_all("/a/b", 0o755).unwrap();
        os.write_file("/f", b"1", 0o644).unwrap();
        os.write_file("/g", b"2", 0o644).unwrap();

        assert!(os.rename("/a", "/a/b/c").unwrap_err().is(Errno::EINVAL));
        assert!(os.rename("/f", "/a").unwrap_err().is(Errno::EISDIR));
        assert!(os.rename("/a", "/f").unwrap_err().is(Errno::ENOTDIR));

        os.rename("/f", "/g").unwrap();
        assert_eq!(os.read_file("/g").unwrap(), b"1");
        assert!(os.stat("/f").unwrap_err().is(Errno::ENOENT));

        os.rename("/a/b", "/b").unwrap();
        os.chdir("/b").unwrap();
        assert_eq!(os.getwd().unwrap(), "/b");
    }

    #[test]
    fn test_chmod_and_chown_permissions() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/f", b"", 0o644).unwrap();
        os.chown("/f", 1000, 1000).unwrap();
        os.chmod("/f", 0o4755).unwrap();
        assert_eq!(os.stat("/f").unwrap().perm(), 0o4755);

        os.set_credentials(Credentials::new(1000, 1000).with_groups([20])).unwrap();
        os.chmod("/f", 0o600).unwrap();
        os.chown("/f", UNCHANGED, 20).unwrap();
        assert_eq!(os.stat("/f").unwrap().gid, 20);
        assert!(os.chown("/f", 0, UNCHANGED).unwrap_err().is(Errno::EPERM));
        assert!(os.chown("/f", UNCHANGED, 30).unwrap_err().is(Errno::EPERM));
        assert!(os.chmod("/", 0o777).unwrap_err().is(Errno::EPERM));
    }

    #[test]
    fn test_lchown_leaves_target() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/t", b"", 0o644).unwrap();
        os.symlink("/t", "/l").unwrap();
        os.lchown("/l", 7, 7).unwrap();
        assert_eq!(os.lstat("/l").unwrap().uid, 7);
        assert_eq!(os.stat("/l").unwrap().uid, 0);
    }

    #[test]
    fn test_chtimes() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/f", b"", 0o644).unwrap();
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
        os.chtimes("/f", t, t).unwrap();
        let st = os.stat("/f").unwrap();
        assert_eq!(st.atime, t);
        assert_eq!(st.mtime, t);
    }

    #[test]
    fn test_search_permission_required() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir("/locked", 0o700).unwrap();
        os.write_file("/locked/f", b"", 0o644).unwrap();
        os.set_credentials(Credentials::new(1000, 1000)).unwrap();
        assert!(os.stat("/locked/f").unwrap_err().is(Errno::EACCES));
        assert!(os.chdir("/locked").unwrap_err().is(Errno::EACCES));
    }

    #[test]
    fn test_mknod_devices_need_privilege() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        let chr = memos_types::mode::S_IFCHR | 0o666;
        os.mknod("/null", chr, memos_types::makedev(1, 3)).unwrap();
        assert_eq!(os.stat("/null").unwrap().rdev, memos_types::makedev(1, 3));
        os.mkdir("/tmp", 0o777).unwrap();
        os.chmod("/tmp", 0o777).unwrap();
        os.set_credentials(Credentials::new(1000, 1000)).unwrap();
        assert!(os.mknod("/tmp/n", chr, 0).unwrap_err().is(Errno::EPERM));
        os.mknod("/tmp/f", 0o644, 0).unwrap();
    }

    #[test]
    fn test_read_dir_lists_stats() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir("/d", 0o755).unwrap();
        os.write_file("/d/b", b"xy", 0o644).unwrap();
        os.mkdir("/d/a", 0o755).unwrap();
        let entries = os.read_dir("/d").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(entries[0].stat.is_dir());
        assert_eq!(entries[1].stat.size, 2);
    }

    #[test]
    fn test_chroot_and_fchdir() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir_all("/srv/root/home", 0o755).unwrap();
        let fd = os.open("/srv/root/home").unwrap();
        os.chroot("/srv/root").unwrap();
        os.chdir("/home").unwrap();
        assert_eq!(os.getwd().unwrap(), "/home");
        os.chdir("/").unwrap();
        os.fchdir(fd).unwrap();
        assert_eq!(os.getwd().unwrap(), "/home");
    }
}
