//! Descriptor calls: `open`, `read`, `write`, `seek`, `close` and friends.

use memos_types::mode::{ACCESS_EXEC, ACCESS_READ, ACCESS_WRITE};
use memos_types::{Errno, O_CREATE, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, OpenFlags, Stat, Whence};
use tracing::trace;

use super::{FIRST_USER_FD, MemOs};
use crate::error::{ErrnoContext, VfsResult};
use crate::file::{Fd, FileId, OpenFile};
use crate::inode::{InodeBody, InodeRef};
use crate::perm;

impl MemOs<'_> {
    /// Open for reading.
    pub fn open(&mut self, name: &str) -> VfsResult<Fd> {
        self.open_file(name, O_RDONLY, 0)
    }

    /// Open for reading and writing, creating or truncating (mode 0666
    /// before the umask).
    pub fn create(&mut self, name: &str) -> VfsResult<Fd> {
        self.open_file(name, O_RDWR | O_CREATE | O_TRUNC, 0o666)
    }

    pub fn open_file(&mut self, name: &str, flags: OpenFlags, mode: u32) -> VfsResult<Fd> {
        self.open_into(name, flags, mode, None).at_path("open", name)
    }

    /// Open `name` at descriptor `slot`, or at the lowest free one.
    pub(crate) fn open_into(
        &mut self,
        name: &str,
        flags: OpenFlags,
        mode: u32,
        slot: Option<Fd>,
    ) -> Result<Fd, Errno> {
        let access = flags.access()?;
        let res = self.resolve(name, !flags.contains(OpenFlags::NOFOLLOW))?;
        let creds = self.creds()?;

        let (loc, created) = match res.node {
            Some(_) if flags.contains(OpenFlags::CREAT | OpenFlags::EXCL) => {
                return Err(Errno::EEXIST);
            }
            Some(loc) => (loc, false),
            None if flags.contains(OpenFlags::CREAT) => {
                let parent = res.parent()?;
                (self.make_node(parent, &res.name, InodeBody::file(), mode)?, true)
            }
            None => return Err(Errno::ENOENT),
        };

        let own = self.ns.loc_ref(loc);
        let (is_dir, is_link, is_file, grant) = {
            let inode = self.ns.effective_inode(own)?;
            (
                inode.is_dir(),
                inode.is_symlink(),
                matches!(inode.body, InodeBody::File { .. }),
                perm::granted(inode, &creds),
            )
        };
        if is_link {
            return Err(Errno::ELOOP);
        }
        if flags.contains(OpenFlags::DIRECTORY) && !is_dir {
            return Err(Errno::ENOTDIR);
        }
        if access.writes() && is_dir {
            return Err(Errno::EISDIR);
        }
        let mut want = 0;
        if access.reads() {
            want |= ACCESS_READ;
        }
        if access.writes() {
            want |= ACCESS_WRITE;
        }
        if !created && grant & want != want {
            return Err(Errno::EACCES);
        }
        if access.writes() {
            if self.ns.mount(loc.mount).is_read_only() {
                return Err(Errno::EROFS);
            }
            let target = self.ns.writable_ref(own)?;
            if flags.contains(OpenFlags::TRUNC) && is_file {
                let inode = self.ns.inode_mut(target)?;
                if let InodeBody::File { data } = &mut inode.body {
                    data.clear();
                }
                inode.touch();
            }
        }

        let pid = self.getpid();
        let fd = match slot {
            Some(fd) => fd,
            None => self.lowest_free_fd()?,
        };
        let mut file = OpenFile::new(loc, pid, flags, self.abs_path(name));
        file.readable = access.reads();
        file.writable = access.writes();
        file.executable = grant & ACCESS_EXEC != 0;
        self.ns.install_file(pid, fd, file)?;
        trace!(pid, fd, name, created, "opened");
        Ok(fd)
    }

    fn lowest_free_fd(&self) -> Result<Fd, Errno> {
        let fds = &self.proc()?.fds;
        let mut fd = FIRST_USER_FD;
        while fds.contains_key(&fd) {
            fd += 1;
        }
        Ok(fd)
    }

    /// Description behind a visible descriptor.
    fn user_file(&self, fd: Fd) -> Result<FileId, Errno> {
        if fd < 0 {
            return Err(Errno::EBADF);
        }
        self.ns.file_id(self.getpid(), fd)
    }

    fn has_fd(&self, fd: Fd) -> bool {
        self.user_file(fd).is_ok()
    }

    /// Read from `fd`. Descriptor 0 reads standard input unless something
    /// was opened there.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        if fd == 0 && !self.has_fd(0) {
            return self.read_stdin(buf);
        }
        let id = self.user_file(fd).at_fd("read", fd)?;
        self.ns.file_read(id, buf).at_fd("read", fd)
    }

    /// Write to `fd`. Descriptors 1 and 2 write the standard streams unless
    /// something was opened there.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> VfsResult<usize> {
        if fd == 1 && !self.has_fd(1) {
            return self.write_stdout(data);
        }
        if fd == 2 && !self.has_fd(2) {
            return self.write_stderr(data);
        }
        let id = self.user_file(fd).at_fd("write", fd)?;
        self.ns.file_write(id, data).at_fd("write", fd)
    }

    pub fn seek(&mut self, fd: Fd, offset: i64, whence: Whence) -> VfsResult<u64> {
        let id = self.user_file(fd).at_fd("seek", fd)?;
        self.ns.file_seek(id, offset, whence).at_fd("seek", fd)
    }

    pub fn close(&mut self, fd: Fd) -> VfsResult<()> {
        self.user_file(fd).at_fd("close", fd)?;
        let pid = self.getpid();
        self.ns.close_fd(pid, fd).at_fd("close", fd)
    }

    /// Duplicate `fd` onto the lowest free descriptor. Both share one
    /// offset.
    pub fn dup(&mut self, fd: Fd) -> VfsResult<Fd> {
        let id = self.user_file(fd).at_fd("dup", fd)?;
        let new = self.lowest_free_fd().at_fd("dup", fd)?;
        let pid = self.getpid();
        self.ns.share_file(id, pid, new).at_fd("dup", fd)?;
        Ok(new)
    }

    pub fn fstat(&self, fd: Fd) -> VfsResult<Stat> {
        let id = self.user_file(fd).at_fd("fstat", fd)?;
        let loc = self.ns.open_file(id).at_fd("fstat", fd)?.loc;
        self.ns.stat_of(loc).at_fd("fstat", fd)
    }

    /// Next `n` entry names of an open directory, sorted; all remaining
    /// when `n` is 0. An empty result means the end was reached.
    pub fn readdirnames(&mut self, fd: Fd, n: usize) -> VfsResult<Vec<String>> {
        let id = self.user_file(fd).at_fd("readdirent", fd)?;
        self.ns.file_readdir(id, n).at_fd("readdirent", fd)
    }

    /// Path an open descriptor was opened by.
    pub fn fd_path(&self, fd: Fd) -> VfsResult<String> {
        let id = self.user_file(fd).at_fd("readlink", fd)?;
        Ok(self.ns.open_file(id).at_fd("readlink", fd)?.path.clone())
    }

    /// Whole contents of a file.
    pub fn read_file(&mut self, name: &str) -> VfsResult<Vec<u8>> {
        let fd = self.open(name)?;
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        let result = loop {
            match self.read(fd, &mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) => break Err(e),
            }
        };
        self.close(fd)?;
        result.map(|()| out)
    }

    /// Replace the contents of a file, creating it with `mode` if needed.
    pub fn write_file(&mut self, name: &str, data: &[u8], mode: u32) -> VfsResult<()> {
        let fd = self.open_file(name, O_WRONLY | O_CREATE | O_TRUNC, mode)?;
        let result = self.write(fd, data);
        self.close(fd)?;
        result.map(|_| ())
    }

    /// Set the size of a regular file, zero-filling when it grows.
    pub fn truncate(&mut self, name: &str, size: u64) -> VfsResult<()> {
        self.truncate_inner(name, size).at_path("truncate", name)
    }

    fn truncate_inner(&mut self, name: &str, size: u64) -> Result<(), Errno> {
        let loc = self.resolve(name, true)?.node()?;
        let creds = self.creds()?;
        let own = self.ns.loc_ref(loc);
        {
            let inode = self.ns.effective_inode(own)?;
            if inode.is_dir() {
                return Err(Errno::EISDIR);
            }
            if !matches!(inode.body, InodeBody::File { .. }) {
                return Err(Errno::EINVAL);
            }
            perm::check(inode, &creds, ACCESS_WRITE)?;
        }
        if self.ns.mount(loc.mount).is_read_only() {
            return Err(Errno::EROFS);
        }
        if size > self.ns.config.max_file_size {
            return Err(Errno::EFBIG);
        }
        let target: InodeRef = self.ns.writable_ref(own)?;
        let inode = self.ns.inode_mut(target)?;
        if let InodeBody::File { data } = &mut inode.body {
            data.resize(size as usize, 0);
        }
        inode.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use memos_types::{O_APPEND, O_EXCL};

    use super::*;
    use crate::namespace::Namespace;
    use crate::perm::Credentials;

    #[test]
    fn test_write_close_open_read() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        let fd = os.create("/hello").unwrap();
        assert_eq!(fd, FIRST_USER_FD);
        assert_eq!(os.write(fd, b"hello world").unwrap(), 11);
        os.close(fd).unwrap();

        let fd = os.open("/hello").unwrap();
        let mut buf = [0u8; 64];
        let n = os.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(os.read(fd, &mut buf).unwrap(), 0);
        os.close(fd).unwrap();
    }

    #[test]
    fn test_create_flags() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        let err = os.open("/missing").unwrap_err();
        assert!(err.is(Errno::ENOENT));
        assert_eq!(err.to_string(), "open /missing: no such file or directory");

        let fd = os.open_file("/f", O_WRONLY | O_CREATE | O_EXCL, 0o600).unwrap();
        os.close(fd).unwrap();
        let err = os.open_file("/f", O_WRONLY | O_CREATE | O_EXCL, 0o600).unwrap_err();
        assert!(err.is(Errno::EEXIST));
    }

    #[test]
    fn test_umask_applied_on_create() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/f", b"", 0o666).unwrap();
        assert_eq!(os.stat("/f").unwrap().perm(), 0o644);
    }

    #[test]
    fn test_directory_refuses_write_and_read() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir("/d", 0o755).unwrap();
        assert!(os.open_file("/d", O_RDWR, 0).unwrap_err().is(Errno::EISDIR));
        let fd = os.open("/d").unwrap();
        let mut buf = [0u8; 4];
        assert!(os.read(fd, &mut buf).unwrap_err().is(Errno::EISDIR));
    }

    #[test]
    fn test_access_denied_for_other_user() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/secret", b"x", 0o600).unwrap();
        os.set_credentials(Credentials::new(1000, 1000)).unwrap();
        assert!(os.open("/secret").unwrap_err().is(Errno::EACCES));
    }

    #[test]
    fn test_trunc_and_append() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/log", b"one", 0o644).unwrap();
        let fd = os.open_file("/log", O_WRONLY | O_APPEND, 0).unwrap();
        os.write(fd, b"two").unwrap();
        os.close(fd).unwrap();
        assert_eq!(os.read_file("/log").unwrap(), b"onetwo");

        let fd = os.open_file("/log", O_WRONLY | O_TRUNC, 0).unwrap();
        os.close(fd).unwrap();
        assert_eq!(os.stat("/log").unwrap().size, 0);
    }

    #[test]
    fn test_seek_and_dup_share_offset() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/f", b"abcdef", 0o644).unwrap();
        let fd = os.open("/f").unwrap();
        let other = os.dup(fd).unwrap();
        assert_eq!(other, fd + 1);
        assert_eq!(os.seek(fd, -2, Whence::End).unwrap(), 4);
        let mut buf = [0u8; 8];
        let n = os.read(other, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert!(os.seek(fd, -10, Whence::Cur).unwrap_err().is(Errno::EINVAL));
    }

    #[test]
    fn test_fifo_is_a_queue() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkfifo("/pipe", 0o644).unwrap();
        let w = os.open_file("/pipe", O_WRONLY, 0).unwrap();
        let r = os.open("/pipe").unwrap();
        os.write(w, b"ping").unwrap();
        assert!(os.seek(r, 0, Whence::Set).unwrap_err().is(Errno::ESPIPE));
        let mut buf = [0u8; 2];
        assert_eq!(os.read(r, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"pi");
        assert_eq!(os.read(r, &mut buf).unwrap(), 2);
        assert_eq!(os.read(r, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_readdirnames_pages_sorted() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        for name in ["c", "a", "b"] {
            os.mkdir(&format!("/{name}"), 0o755).unwrap();
        }
        let fd = os.open("/").unwrap();
        assert_eq!(os.readdirnames(fd, 2).unwrap(), vec!["a", "b"]);
        assert_eq!(os.readdirnames(fd, 2).unwrap(), vec!["c"]);
        assert!(os.readdirnames(fd, 2).unwrap().is_empty());
        os.seek(fd, 0, Whence::Set).unwrap();
        assert_eq!(os.readdirnames(fd, 0).unwrap().len(), 3);
    }

    #[test]
    fn test_hidden_descriptors_not_closable() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        assert!(os.close(crate::process::CWD_FD).unwrap_err().is(Errno::EBADF));
        assert!(os.close(42).unwrap_err().is(Errno::EBADF));
    }

    #[test]
    fn test_truncate_grows_with_zeros() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.write_file("/f", b"ab", 0o644).unwrap();
        os.truncate("/f", 4).unwrap();
        assert_eq!(os.read_file("/f").unwrap(), b"ab\0\0");
        os.truncate("/f", 1).unwrap();
        assert_eq!(os.read_file("/f").unwrap(), b"a");
    }

    #[test]
    fn test_size_limit_is_efbig() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        let fd = os.create("/big").unwrap();
        os.seek(fd, i64::MAX - 1, Whence::Set).unwrap();
        let err = os.write(fd, b"x").unwrap_err();
        assert!(err.is(Errno::EFBIG));
        assert_eq!(err.to_string(), "write fd 3: file too large");
        assert_eq!(os.fstat(fd).unwrap().size, 0);

        assert!(os.truncate("/big", u64::MAX).unwrap_err().is(Errno::EFBIG));
        os.truncate("/big", 16).unwrap();
        assert_eq!(os.stat("/big").unwrap().size, 16);
    }

    #[test]
    fn test_fd_records_absolute_path() {
        let mut ns = Namespace::default();
        let mut os = ns.init();
        os.mkdir_all("/a/b", 0o755).unwrap();
        os.chdir("/a").unwrap();
        let fd = os.create("b/../f").unwrap();
        assert_eq!(os.fd_path(fd).unwrap(), "/a/f");
    }
}
