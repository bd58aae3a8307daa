//! `stat(2)` results.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::dev::{DevId, Ino};
use crate::mode::{FileKind, PERM_MASK, S_IFMT};

/// Inode metadata as reported by `stat`/`lstat`/`fstat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Device the inode lives on.
    pub dev: DevId,
    /// Inode number within `dev`.
    pub ino: Ino,
    /// Type bits plus permission bits.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// Device number for character and block devices, 0 otherwise.
    pub rdev: DevId,
    /// Size in bytes. For symlinks, the length of the target.
    pub size: u64,
    pub blksize: u32,
    /// 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Stat {
    pub const BLOCK_SIZE: u32 = 4096;

    /// The kind decoded from the type bits.
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == FileKind::Dir.type_bits()
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == FileKind::File.type_bits()
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == FileKind::Link.type_bits()
    }

    /// Permission bits only (including setuid/setgid/sticky).
    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// Whether two stats describe the same inode.
    pub fn same_file(&self, other: &Stat) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

/// Number of 512-byte blocks a file of `size` bytes occupies.
pub fn blocks_for(size: u64) -> u64 {
    size.div_ceil(Stat::BLOCK_SIZE as u64) * (Stat::BLOCK_SIZE as u64 / 512)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::S_IFDIR;

    fn sample(mode: u32) -> Stat {
        Stat {
            dev: 1,
            ino: 2,
            mode,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            blksize: Stat::BLOCK_SIZE,
            blocks: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_kind_predicates() {
        let st = sample(S_IFDIR | 0o755);
        assert!(st.is_dir());
        assert!(!st.is_file());
        assert_eq!(st.perm(), 0o755);
        assert_eq!(st.kind(), Some(FileKind::Dir));
    }

    #[test]
    fn test_same_file() {
        let a = sample(S_IFDIR | 0o755);
        let mut b = a.clone();
        assert!(a.same_file(&b));
        b.ino = 3;
        assert!(!a.same_file(&b));
    }

    #[test]
    fn test_blocks_for() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 8);
        assert_eq!(blocks_for(4097), 16);
    }
}
