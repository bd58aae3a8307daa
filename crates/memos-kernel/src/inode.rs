//! The inode model.
//!
//! An [`Inode`] is shared metadata plus an [`InodeBody`] holding the
//! per-type payload. The file type is never stored as mode bits: it is
//! derived from the body, so the two cannot disagree.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::SystemTime;

use memos_types::mode::PERM_MASK;
use memos_types::stat::blocks_for;
use memos_types::{DevId, Errno, FileKind, Ino, Stat};

/// Inode number of every filesystem's root directory.
pub const ROOT_INO: Ino = 1;

/// Namespace-wide address of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeRef {
    pub dev: DevId,
    pub ino: Ino,
}

impl InodeRef {
    pub fn new(dev: DevId, ino: Ino) -> Self {
        Self { dev, ino }
    }
}

impl fmt::Display for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}",
            memos_types::major(self.dev),
            memos_types::minor(self.dev),
            self.ino
        )
    }
}

/// Per-type payload.
#[derive(Debug, Clone)]
pub enum InodeBody {
    File { data: Vec<u8> },
    /// `parent` is the inode number of the containing directory; the root
    /// directory is its own parent.
    Dir {
        entries: BTreeMap<String, Ino>,
        parent: Ino,
    },
    Link { target: String },
    Fifo { queue: VecDeque<u8> },
    Sock,
    CharDev { rdev: DevId },
    BlockDev { rdev: DevId },
}

impl InodeBody {
    pub fn file() -> Self {
        InodeBody::File { data: Vec::new() }
    }

    pub fn dir() -> Self {
        InodeBody::Dir {
            entries: BTreeMap::new(),
            parent: ROOT_INO,
        }
    }

    pub fn link(target: impl Into<String>) -> Self {
        InodeBody::Link {
            target: target.into(),
        }
    }

    pub fn fifo() -> Self {
        InodeBody::Fifo {
            queue: VecDeque::new(),
        }
    }

    /// The overlay whiteout marker: a character device with rdev 0.
    pub fn whiteout() -> Self {
        InodeBody::CharDev { rdev: 0 }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            InodeBody::File { .. } => FileKind::File,
            InodeBody::Dir { .. } => FileKind::Dir,
            InodeBody::Link { .. } => FileKind::Link,
            InodeBody::Fifo { .. } => FileKind::Fifo,
            InodeBody::Sock => FileKind::Sock,
            InodeBody::CharDev { .. } => FileKind::CharDev,
            InodeBody::BlockDev { .. } => FileKind::BlockDev,
        }
    }

    /// An empty body of the same kind. Device numbers and link targets are
    /// kept; file bytes, fifo contents and directory entries are not.
    pub fn shell(&self) -> Self {
        match self {
            InodeBody::File { .. } => InodeBody::file(),
            InodeBody::Dir { .. } => InodeBody::dir(),
            InodeBody::Link { target } => InodeBody::link(target.clone()),
            InodeBody::Fifo { .. } => InodeBody::fifo(),
            InodeBody::Sock => InodeBody::Sock,
            InodeBody::CharDev { rdev } => InodeBody::CharDev { rdev: *rdev },
            InodeBody::BlockDev { rdev } => InodeBody::BlockDev { rdev: *rdev },
        }
    }

    /// The body a copy-up writes to the upper layer: a shell, plus the bytes
    /// of a regular file.
    pub fn copy_up(&self) -> Self {
        match self {
            InodeBody::File { data } => InodeBody::File { data: data.clone() },
            other => other.shell(),
        }
    }
}

/// Overlay bookkeeping carried by inodes of an overlay filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLink {
    pub upper: Option<InodeRef>,
    pub lower: Option<InodeRef>,
    /// The side metadata and content are read from. Once an upper side
    /// exists this is always `upper`.
    pub active: InodeRef,
    /// Overlay inode of the directory this node was first found in.
    pub parent: Ino,
    pub name: String,
}

/// A filesystem object.
#[derive(Debug, Clone)]
pub struct Inode {
    pub dev: DevId,
    pub ino: Ino,
    /// Permission bits only; see [`Inode::mode`].
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// Read-only object this inode was copied up from.
    pub shadow: Option<InodeRef>,
    pub overlay: Option<OverlayLink>,
    pub body: InodeBody,
}

impl Inode {
    pub fn new(dev: DevId, ino: Ino, body: InodeBody, perm: u32, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Self {
            dev,
            ino,
            perm: perm & PERM_MASK,
            uid,
            gid,
            nlink: 0,
            atime: now,
            mtime: now,
            ctime: now,
            shadow: None,
            overlay: None,
            body,
        }
    }

    pub fn addr(&self) -> InodeRef {
        InodeRef::new(self.dev, self.ino)
    }

    pub fn kind(&self) -> FileKind {
        self.body.kind()
    }

    /// Type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        self.kind().type_bits() | self.perm
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.body, InodeBody::Dir { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.body, InodeBody::Link { .. })
    }

    pub fn is_whiteout(&self) -> bool {
        matches!(self.body, InodeBody::CharDev { rdev: 0 })
    }

    pub fn rdev(&self) -> DevId {
        match self.body {
            InodeBody::CharDev { rdev } | InodeBody::BlockDev { rdev } => rdev,
            _ => 0,
        }
    }

    pub fn size(&self) -> u64 {
        match &self.body {
            InodeBody::File { data } => data.len() as u64,
            InodeBody::Link { target } => target.len() as u64,
            InodeBody::Fifo { queue } => queue.len() as u64,
            InodeBody::Dir { .. } => Stat::BLOCK_SIZE as u64,
            _ => 0,
        }
    }

    pub fn entries(&self) -> Result<&BTreeMap<String, Ino>, Errno> {
        match &self.body {
            InodeBody::Dir { entries, .. } => Ok(entries),
            _ => Err(Errno::ENOTDIR),
        }
    }

    pub fn entries_mut(&mut self) -> Result<&mut BTreeMap<String, Ino>, Errno> {
        match &mut self.body {
            InodeBody::Dir { entries, .. } => Ok(entries),
            _ => Err(Errno::ENOTDIR),
        }
    }

    /// Parent directory inode number (directories only).
    pub fn parent(&self) -> Option<Ino> {
        match self.body {
            InodeBody::Dir { parent, .. } => Some(parent),
            _ => None,
        }
    }

    pub fn link_target(&self) -> Result<&str, Errno> {
        match &self.body {
            InodeBody::Link { target } => Ok(target),
            _ => Err(Errno::EINVAL),
        }
    }

    /// Stamp mtime and ctime.
    pub fn touch(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }

    /// Copy ownership, permissions and timestamps from another inode.
    pub fn copy_meta_from(&mut self, other: &Inode) {
        self.perm = other.perm;
        self.uid = other.uid;
        self.gid = other.gid;
        self.atime = other.atime;
        self.mtime = other.mtime;
        self.ctime = other.ctime;
    }

    /// Stat of this inode as its own identity.
    pub fn stat(&self) -> Stat {
        self.stat_as(self.addr())
    }

    /// Stat carrying another identity (an overlay node reporting the
    /// metadata of its active side).
    pub fn stat_as(&self, id: InodeRef) -> Stat {
        let size = self.size();
        Stat {
            dev: id.dev,
            ino: id.ino,
            mode: self.mode(),
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev(),
            size,
            blksize: Stat::BLOCK_SIZE,
            blocks: blocks_for(size),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}
