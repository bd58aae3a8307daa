//! Open, mount and unmount flag sets.
//!
//! Bit values are the host's, so numeric flags copied from C or from
//! `libc` mean the same thing here.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::errno::Errno;

bitflags! {
    /// `open(2)` flags. The access mode lives in the low two bits and is read
    /// with [`OpenFlags::access`]; `O_RDONLY` is the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OpenFlags: i32 {
        const WRONLY = libc::O_WRONLY;
        const RDWR = libc::O_RDWR;
        const CREAT = libc::O_CREAT;
        const EXCL = libc::O_EXCL;
        const TRUNC = libc::O_TRUNC;
        const APPEND = libc::O_APPEND;
        const NOFOLLOW = libc::O_NOFOLLOW;
        const DIRECTORY = libc::O_DIRECTORY;
        const CLOEXEC = libc::O_CLOEXEC;
        const NONBLOCK = libc::O_NONBLOCK;
    }
}

pub const O_RDONLY: OpenFlags = OpenFlags::empty();
pub const O_WRONLY: OpenFlags = OpenFlags::WRONLY;
pub const O_RDWR: OpenFlags = OpenFlags::RDWR;
pub const O_CREATE: OpenFlags = OpenFlags::CREAT;
pub const O_EXCL: OpenFlags = OpenFlags::EXCL;
pub const O_TRUNC: OpenFlags = OpenFlags::TRUNC;
pub const O_APPEND: OpenFlags = OpenFlags::APPEND;

/// The access mode encoded in an [`OpenFlags`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn reads(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

impl OpenFlags {
    /// Decode the access mode. Both access bits set is `EINVAL`, as on Linux.
    pub fn access(self) -> Result<Access, Errno> {
        match self.bits() & libc::O_ACCMODE {
            m if m == libc::O_RDONLY => Ok(Access::Read),
            m if m == libc::O_WRONLY => Ok(Access::Write),
            m if m == libc::O_RDWR => Ok(Access::ReadWrite),
            _ => Err(Errno::EINVAL),
        }
    }

    /// Build from raw bits, keeping bits this type has no name for.
    pub fn from_raw(bits: i32) -> Self {
        Self::from_bits_retain(bits)
    }
}

#[cfg(target_os = "linux")]
mod host {
    pub const MS_RDONLY: u64 = libc::MS_RDONLY as u64;
    pub const MS_NOSUID: u64 = libc::MS_NOSUID as u64;
    pub const MS_NODEV: u64 = libc::MS_NODEV as u64;
    pub const MS_NOEXEC: u64 = libc::MS_NOEXEC as u64;
    pub const MS_REMOUNT: u64 = libc::MS_REMOUNT as u64;
    pub const MS_NOATIME: u64 = libc::MS_NOATIME as u64;
    pub const MS_BIND: u64 = libc::MS_BIND as u64;
    pub const MS_MOVE: u64 = libc::MS_MOVE as u64;
    pub const MS_REC: u64 = libc::MS_REC as u64;
    pub const MS_SILENT: u64 = libc::MS_SILENT as u64;
    pub const MS_PRIVATE: u64 = libc::MS_PRIVATE as u64;
    pub const MS_SLAVE: u64 = libc::MS_SLAVE as u64;
    pub const MS_SHARED: u64 = libc::MS_SHARED as u64;
    pub const MS_RELATIME: u64 = libc::MS_RELATIME as u64;

    pub const MNT_FORCE: i32 = libc::MNT_FORCE;
    pub const MNT_DETACH: i32 = libc::MNT_DETACH;
    pub const MNT_EXPIRE: i32 = libc::MNT_EXPIRE;
    pub const UMOUNT_NOFOLLOW: i32 = libc::UMOUNT_NOFOLLOW;
}

// Other hosts have no mount(2) with these semantics; use the Linux numbering.
#[cfg(not(target_os = "linux"))]
mod host {
    pub const MS_RDONLY: u64 = 1;
    pub const MS_NOSUID: u64 = 2;
    pub const MS_NODEV: u64 = 4;
    pub const MS_NOEXEC: u64 = 8;
    pub const MS_REMOUNT: u64 = 32;
    pub const MS_NOATIME: u64 = 1024;
    pub const MS_BIND: u64 = 4096;
    pub const MS_MOVE: u64 = 8192;
    pub const MS_REC: u64 = 16384;
    pub const MS_SILENT: u64 = 32768;
    pub const MS_PRIVATE: u64 = 1 << 18;
    pub const MS_SLAVE: u64 = 1 << 19;
    pub const MS_SHARED: u64 = 1 << 20;
    pub const MS_RELATIME: u64 = 1 << 21;

    pub const MNT_FORCE: i32 = 1;
    pub const MNT_DETACH: i32 = 2;
    pub const MNT_EXPIRE: i32 = 4;
    pub const UMOUNT_NOFOLLOW: i32 = 8;
}

bitflags! {
    /// `mount(2)` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MountFlags: u64 {
        const RDONLY = host::MS_RDONLY;
        const NOSUID = host::MS_NOSUID;
        const NODEV = host::MS_NODEV;
        const NOEXEC = host::MS_NOEXEC;
        const REMOUNT = host::MS_REMOUNT;
        const NOATIME = host::MS_NOATIME;
        const BIND = host::MS_BIND;
        const MOVE = host::MS_MOVE;
        const REC = host::MS_REC;
        const SILENT = host::MS_SILENT;
        const PRIVATE = host::MS_PRIVATE;
        const SLAVE = host::MS_SLAVE;
        const SHARED = host::MS_SHARED;
        const RELATIME = host::MS_RELATIME;
    }
}

impl MountFlags {
    /// Flags that describe the mount itself, as opposed to the operation.
    pub fn per_mount(self) -> MountFlags {
        self & (MountFlags::RDONLY
            | MountFlags::NOSUID
            | MountFlags::NODEV
            | MountFlags::NOEXEC
            | MountFlags::NOATIME
            | MountFlags::RELATIME)
    }

    /// The option words `/proc/mounts` prints for these flags.
    pub fn option_words(self) -> Vec<&'static str> {
        let mut words = vec![if self.contains(MountFlags::RDONLY) { "ro" } else { "rw" }];
        for (flag, word) in [
            (MountFlags::NOSUID, "nosuid"),
            (MountFlags::NODEV, "nodev"),
            (MountFlags::NOEXEC, "noexec"),
            (MountFlags::NOATIME, "noatime"),
            (MountFlags::RELATIME, "relatime"),
        ] {
            if self.contains(flag) {
                words.push(word);
            }
        }
        words
    }
}

bitflags! {
    /// `umount2(2)` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct UnmountFlags: i32 {
        const FORCE = host::MNT_FORCE;
        const DETACH = host::MNT_DETACH;
        const EXPIRE = host::MNT_EXPIRE;
        const NOFOLLOW = host::UMOUNT_NOFOLLOW;
    }
}

/// `lseek(2)` origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl Whence {
    pub fn from_raw(raw: i32) -> Result<Self, Errno> {
        match raw {
            libc::SEEK_SET => Ok(Whence::Set),
            libc::SEEK_CUR => Ok(Whence::Cur),
            libc::SEEK_END => Ok(Whence::End),
            _ => Err(Errno::EINVAL),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Whence::Set => libc::SEEK_SET,
            Whence::Cur => libc::SEEK_CUR,
            Whence::End => libc::SEEK_END,
        }
    }
}
