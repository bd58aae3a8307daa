//! File mode bits.
//!
//! Type bits and permission bits use the host's `<sys/stat.h>` layout so that
//! expectations written as `S_IFDIR | 0o755` hold for virtual inodes too.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub const S_IFLNK: u32 = libc::S_IFLNK as u32;
pub const S_IFIFO: u32 = libc::S_IFIFO as u32;
pub const S_IFSOCK: u32 = libc::S_IFSOCK as u32;
pub const S_IFCHR: u32 = libc::S_IFCHR as u32;
pub const S_IFBLK: u32 = libc::S_IFBLK as u32;

pub const S_ISUID: u32 = libc::S_ISUID as u32;
pub const S_ISGID: u32 = libc::S_ISGID as u32;
pub const S_ISVTX: u32 = libc::S_ISVTX as u32;

/// Permission bits plus setuid/setgid/sticky.
pub const PERM_MASK: u32 = 0o7777;

/// Read/write/execute bits for one class (owner, group, other).
pub const ACCESS_READ: u32 = 0o4;
pub const ACCESS_WRITE: u32 = 0o2;
pub const ACCESS_EXEC: u32 = 0o1;

/// The kind of object an inode is, derived from the type bits of its mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileKind {
    #[strum(to_string = "file", serialize = "regular")]
    File,
    #[strum(to_string = "dir", serialize = "directory")]
    Dir,
    #[strum(to_string = "link", serialize = "symlink")]
    Link,
    Fifo,
    #[strum(to_string = "sock", serialize = "socket")]
    Sock,
    #[strum(serialize = "chardev")]
    CharDev,
    #[strum(serialize = "blockdev")]
    BlockDev,
}

impl FileKind {
    /// The `S_IF*` type bits for this kind.
    pub fn type_bits(self) -> u32 {
        match self {
            FileKind::File => S_IFREG,
            FileKind::Dir => S_IFDIR,
            FileKind::Link => S_IFLNK,
            FileKind::Fifo => S_IFIFO,
            FileKind::Sock => S_IFSOCK,
            FileKind::CharDev => S_IFCHR,
            FileKind::BlockDev => S_IFBLK,
        }
    }

    /// Decode the type bits of a full mode. Returns `None` for an unknown type.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            m if m == S_IFREG => Some(FileKind::File),
            m if m == S_IFDIR => Some(FileKind::Dir),
            m if m == S_IFLNK => Some(FileKind::Link),
            m if m == S_IFIFO => Some(FileKind::Fifo),
            m if m == S_IFSOCK => Some(FileKind::Sock),
            m if m == S_IFCHR => Some(FileKind::CharDev),
            m if m == S_IFBLK => Some(FileKind::BlockDev),
            _ => None,
        }
    }

    /// The one-letter type prefix `ls -l` prints.
    pub fn ls_char(self) -> char {
        match self {
            FileKind::File => '-',
            FileKind::Dir => 'd',
            FileKind::Link => 'l',
            FileKind::Fifo => 'p',
            FileKind::Sock => 's',
            FileKind::CharDev => 'c',
            FileKind::BlockDev => 'b',
        }
    }
}

/// Clear the umask bits from a requested creation mode.
///
/// Only permission bits are affected; type bits pass through untouched.
pub fn apply_umask(mode: u32, umask: u32) -> u32 {
    mode & !(umask & 0o777)
}

/// Render a mode the way `ls -l` does, e.g. `drwxr-xr-x`.
pub fn format_mode(mode: u32) -> String {
    let mut out = String::with_capacity(10);
    out.push(FileKind::from_mode(mode).map(FileKind::ls_char).unwrap_or('?'));
    let triplets = [(6, S_ISUID, 's'), (3, S_ISGID, 's'), (0, S_ISVTX, 't')];
    for (shift, special, special_char) in triplets {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & ACCESS_READ != 0 { 'r' } else { '-' });
        out.push(if bits & ACCESS_WRITE != 0 { 'w' } else { '-' });
        let exec = bits & ACCESS_EXEC != 0;
        out.push(match (mode & special != 0, exec) {
            (true, true) => special_char,
            (true, false) => special_char.to_ascii_uppercase(),
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    out
}
