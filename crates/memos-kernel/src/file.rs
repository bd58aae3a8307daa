//! Open file descriptions.
//!
//! A description is registered twice: in the owning process's descriptor
//! table and in the `(pid, fd)` table of the mount it was opened through.
//! Descriptions can be shared between processes (a spawned child starts
//! with its parent's root and working directory); the last close releases
//! it and, if the inode has no links left, the inode too.

use std::collections::BTreeMap;
use std::time::SystemTime;

use memos_types::{Errno, OpenFlags, Whence};
use tracing::trace;

use crate::fs::DevTmpFs;
use crate::inode::{InodeBody, InodeRef};
use crate::mount::{Loc, MountId};
use crate::namespace::{Namespace, corrupted};
use crate::process::{KERNEL_PID, Pid};

/// File descriptor number. Negative numbers are hidden descriptors.
pub type Fd = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

#[derive(Debug, Clone)]
pub struct OpenFile {
    pub loc: Loc,
    /// Process that opened it.
    pub pid: Pid,
    pub flags: OpenFlags,
    pub offset: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// Absolute path it was opened by.
    pub path: String,
    pub(crate) refs: u32,
}

impl OpenFile {
    pub fn new(loc: Loc, pid: Pid, flags: OpenFlags, path: impl Into<String>) -> Self {
        Self {
            loc,
            pid,
            flags,
            offset: 0,
            readable: false,
            writable: false,
            executable: false,
            path: path.into(),
            refs: 1,
        }
    }
}

impl Namespace {
    pub(crate) fn fd_table(&self, pid: Pid) -> Option<&BTreeMap<Fd, FileId>> {
        if pid == KERNEL_PID {
            return Some(&self.kernel_fds);
        }
        self.processes.get(&pid).map(|p| &p.fds)
    }

    pub(crate) fn fd_table_mut(&mut self, pid: Pid) -> Option<&mut BTreeMap<Fd, FileId>> {
        if pid == KERNEL_PID {
            return Some(&mut self.kernel_fds);
        }
        self.processes.get_mut(&pid).map(|p| &mut p.fds)
    }

    pub(crate) fn file_id(&self, pid: Pid, fd: Fd) -> Result<FileId, Errno> {
        self.fd_table(pid)
            .ok_or(Errno::ESRCH)?
            .get(&fd)
            .copied()
            .ok_or(Errno::EBADF)
    }

    pub(crate) fn open_file(&self, id: FileId) -> Result<&OpenFile, Errno> {
        self.files.get(&id).ok_or(Errno::EBADF)
    }

    pub(crate) fn open_file_mut(&mut self, id: FileId) -> Result<&mut OpenFile, Errno> {
        self.files.get_mut(&id).ok_or(Errno::EBADF)
    }

    /// Register a new description at `fd`, closing whatever was there.
    pub(crate) fn install_file(
        &mut self,
        pid: Pid,
        fd: Fd,
        file: OpenFile,
    ) -> Result<FileId, Errno> {
        if self.fd_table(pid).ok_or(Errno::ESRCH)?.contains_key(&fd) {
            self.close_fd(pid, fd)?;
        }
        let id = FileId(self.next_file);
        self.next_file += 1;
        let mount = file.loc.mount;
        trace!(pid, fd, path = %file.path, "open");
        self.files.insert(id, file);
        self.attach_fd(pid, fd, id, mount)?;
        Ok(id)
    }

    /// Install an existing description at `fd` of `pid`.
    pub(crate) fn share_file(&mut self, id: FileId, pid: Pid, fd: Fd) -> Result<(), Errno> {
        if self.fd_table(pid).ok_or(Errno::ESRCH)?.contains_key(&fd) {
            self.close_fd(pid, fd)?;
        }
        let file = self.open_file_mut(id)?;
        file.refs += 1;
        let mount = file.loc.mount;
        self.attach_fd(pid, fd, id, mount)
    }

    fn attach_fd(&mut self, pid: Pid, fd: Fd, id: FileId, mount: MountId) -> Result<(), Errno> {
        self.fd_table_mut(pid).ok_or(Errno::ESRCH)?.insert(fd, id);
        self.mount_mut(mount).open_files.insert((pid, fd), id);
        Ok(())
    }

    /// Open `loc` on a fresh kernel descriptor, for handles a mount holds.
    pub(crate) fn hold_open(&mut self, loc: Loc, path: &str) -> Result<Fd, Errno> {
        let fd = self.next_kernel_fd;
        self.next_kernel_fd -= 1;
        let mut file = OpenFile::new(loc, KERNEL_PID, OpenFlags::DIRECTORY, path);
        file.readable = true;
        self.install_file(KERNEL_PID, fd, file)?;
        Ok(fd)
    }

    pub(crate) fn close_fd(&mut self, pid: Pid, fd: Fd) -> Result<(), Errno> {
        let id = self
            .fd_table_mut(pid)
            .ok_or(Errno::ESRCH)?
            .remove(&fd)
            .ok_or(Errno::EBADF)?;
        let Some(file) = self.files.get_mut(&id) else {
            corrupted(format_args!("fd {fd} of pid {pid} names a closed description"));
        };
        file.refs -= 1;
        let (loc, last) = (file.loc, file.refs == 0);

        if self.mount_mut(loc.mount).open_files.remove(&(pid, fd)).is_none() {
            corrupted(format_args!(
                "fd {fd} of pid {pid} is missing from the table of mount {}",
                loc.mount
            ));
        }
        trace!(pid, fd, last, "close");
        if last {
            self.files.remove(&id);
            let r = self.loc_ref(loc);
            self.release_if_orphan(r);
        }
        Ok(())
    }

    /// Free an inode nothing links or holds open any more.
    pub(crate) fn release_if_orphan(&mut self, r: InodeRef) {
        let Ok(inode) = self.inode(r) else {
            return;
        };
        if inode.nlink > 0 {
            return;
        }
        let upper = inode.overlay.as_ref().and_then(|link| link.upper);
        // an open overlay node holds the object it reads through
        if self.files.values().any(|f| {
            let own = self.loc_ref(f.loc);
            own == r || self.effective(own).is_ok_and(|e| e == r)
        }) {
            return;
        }
        if self.mounts.values().any(|m| m.dev == r.dev && m.root == r.ino) {
            return;
        }
        if let Ok(table) = self.table_mut(r.dev) {
            table.free(r.ino);
        }
        if let Some(upper) = upper {
            self.release_if_orphan(upper);
        }
    }

    // ========================================================================
    // I/O
    // ========================================================================

    pub(crate) fn file_read(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, Errno> {
        let file = self.open_file(id)?;
        if !file.readable {
            return Err(Errno::EBADF);
        }
        let (offset, noatime) = (
            file.offset,
            self.mount(file.loc.mount)
                .flags
                .contains(memos_types::MountFlags::NOATIME),
        );
        let target = self.effective(self.loc_ref(file.loc))?;
        let inode = self.inode_mut(target)?;
        let (n, advance) = match &mut inode.body {
            InodeBody::File { data } => {
                let start = (offset as usize).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                (n, true)
            }
            InodeBody::Fifo { queue } => {
                let n = buf.len().min(queue.len());
                for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
                    *slot = byte;
                }
                (n, false)
            }
            InodeBody::CharDev { rdev } if *rdev == DevTmpFs::NULL => (0, false),
            InodeBody::CharDev { rdev } if *rdev == DevTmpFs::ZERO => {
                buf.fill(0);
                (buf.len(), false)
            }
            InodeBody::Dir { .. } => return Err(Errno::EISDIR),
            InodeBody::Link { .. } => return Err(Errno::EINVAL),
            _ => return Err(Errno::ENXIO),
        };
        if !noatime {
            inode.atime = SystemTime::now();
        }
        if advance {
            self.open_file_mut(id)?.offset += n as u64;
        }
        Ok(n)
    }

    pub(crate) fn file_write(&mut self, id: FileId, buf: &[u8]) -> Result<usize, Errno> {
        let file = self.open_file(id)?;
        if !file.writable {
            return Err(Errno::EBADF);
        }
        let (offset, append) = (file.offset, file.flags.contains(OpenFlags::APPEND));
        let limit = self.config.max_file_size;
        let target = self.effective(self.loc_ref(file.loc))?;
        let inode = self.inode_mut(target)?;
        let end = match &mut inode.body {
            InodeBody::File { data } => {
                let start = if append { data.len() as u64 } else { offset };
                let end = start
                    .checked_add(buf.len() as u64)
                    .filter(|end| *end <= limit)
                    .ok_or(Errno::EFBIG)?;
                let (start, end) = (start as usize, end as usize);
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                Some(end as u64)
            }
            InodeBody::Fifo { queue } => {
                queue.extend(buf);
                None
            }
            InodeBody::CharDev { rdev } if DevTmpFs::is_sink(*rdev) => return Ok(buf.len()),
            InodeBody::Dir { .. } => return Err(Errno::EISDIR),
            InodeBody::Link { .. } => return Err(Errno::EINVAL),
            _ => return Err(Errno::ENXIO),
        };
        inode.touch();
        if let Some(end) = end {
            self.open_file_mut(id)?.offset = end;
        }
        Ok(buf.len())
    }

    pub(crate) fn file_seek(
        &mut self,
        id: FileId,
        offset: i64,
        whence: Whence,
    ) -> Result<u64, Errno> {
        let file = self.open_file(id)?;
        let (current, own) = (file.offset, self.loc_ref(file.loc));
        let target = self.effective(own)?;
        let size = {
            let inode = self.inode(target)?;
            match inode.body {
                InodeBody::Fifo { .. } | InodeBody::Sock => return Err(Errno::ESPIPE),
                InodeBody::CharDev { .. } => return Ok(0),
                InodeBody::Dir { .. } => None,
                _ => Some(inode.size()),
            }
        };
        // a directory's offset counts entries
        let end = match size {
            Some(size) => size,
            None => self.list_names(own)?.len() as u64,
        };
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => current as i64,
            Whence::End => end as i64,
        };
        let new = base.checked_add(offset).ok_or(Errno::EINVAL)?;
        if new < 0 {
            return Err(Errno::EINVAL);
        }
        self.open_file_mut(id)?.offset = new as u64;
        Ok(new as u64)
    }

    /// Next `n` names of an open directory (all remaining when `n` is 0).
    pub(crate) fn file_readdir(&mut self, id: FileId, n: usize) -> Result<Vec<String>, Errno> {
        let file = self.open_file(id)?;
        if !file.readable {
            return Err(Errno::EBADF);
        }
        let (offset, own) = (file.offset as usize, self.loc_ref(file.loc));
        if !self.effective_inode(own)?.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let names = self.list_names(own)?;
        let start = offset.min(names.len());
        let end = if n == 0 {
            names.len()
        } else {
            (start + n).min(names.len())
        };
        self.open_file_mut(id)?.offset = end as u64;
        Ok(names[start..end].to_vec())
    }
}
