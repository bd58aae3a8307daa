//! Errno vocabulary.
//!
//! Every failure in the virtual OS is classified by one of these kinds,
//! independent of the call site that produced it. The display text matches
//! the host's `strerror` wording so messages read like real syscall failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kind, one per errno value the virtual OS can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum Errno {
    #[error("operation not permitted")]
    EPERM,
    #[error("no such file or directory")]
    ENOENT,
    #[error("no such process")]
    ESRCH,
    #[error("no such device or address")]
    ENXIO,
    #[error("bad file descriptor")]
    EBADF,
    #[error("no child processes")]
    ECHILD,
    #[error("permission denied")]
    EACCES,
    #[error("block device required")]
    ENOTBLK,
    #[error("device or resource busy")]
    EBUSY,
    #[error("file exists")]
    EEXIST,
    #[error("invalid cross-device link")]
    EXDEV,
    #[error("no such device")]
    ENODEV,
    #[error("not a directory")]
    ENOTDIR,
    #[error("is a directory")]
    EISDIR,
    #[error("invalid argument")]
    EINVAL,
    #[error("file too large")]
    EFBIG,
    #[error("illegal seek")]
    ESPIPE,
    #[error("read-only file system")]
    EROFS,
    #[error("file name too long")]
    ENAMETOOLONG,
    #[error("directory not empty")]
    ENOTEMPTY,
    #[error("too many levels of symbolic links")]
    ELOOP,
    #[error("operation not supported")]
    ENOTSUP,
}

impl Errno {
    /// The host errno number for this kind.
    pub fn raw(self) -> i32 {
        match self {
            Errno::EPERM => libc::EPERM,
            Errno::ENOENT => libc::ENOENT,
            Errno::ESRCH => libc::ESRCH,
            Errno::ENXIO => libc::ENXIO,
            Errno::EBADF => libc::EBADF,
            Errno::ECHILD => libc::ECHILD,
            Errno::EACCES => libc::EACCES,
            Errno::ENOTBLK => libc::ENOTBLK,
            Errno::EBUSY => libc::EBUSY,
            Errno::EEXIST => libc::EEXIST,
            Errno::EXDEV => libc::EXDEV,
            Errno::ENODEV => libc::ENODEV,
            Errno::ENOTDIR => libc::ENOTDIR,
            Errno::EISDIR => libc::EISDIR,
            Errno::EINVAL => libc::EINVAL,
            Errno::EFBIG => libc::EFBIG,
            Errno::ESPIPE => libc::ESPIPE,
            Errno::EROFS => libc::EROFS,
            Errno::ENAMETOOLONG => libc::ENAMETOOLONG,
            Errno::ENOTEMPTY => libc::ENOTEMPTY,
            Errno::ELOOP => libc::ELOOP,
            Errno::ENOTSUP => libc::ENOTSUP,
        }
    }

    /// Map a host errno number back to a kind, if it is one we model.
    pub fn from_raw(raw: i32) -> Option<Self> {
        ALL.iter().copied().find(|e| e.raw() == raw)
    }

    /// The symbolic name, e.g. `"ENOENT"`.
    pub fn name(self) -> &'static str {
        match self {
            Errno::EPERM => "EPERM",
            Errno::ENOENT => "ENOENT",
            Errno::ESRCH => "ESRCH",
            Errno::ENXIO => "ENXIO",
            Errno::EBADF => "EBADF",
            Errno::ECHILD => "ECHILD",
            Errno::EACCES => "EACCES",
            Errno::ENOTBLK => "ENOTBLK",
            Errno::EBUSY => "EBUSY",
            Errno::EEXIST => "EEXIST",
            Errno::EXDEV => "EXDEV",
            Errno::ENODEV => "ENODEV",
            Errno::ENOTDIR => "ENOTDIR",
            Errno::EISDIR => "EISDIR",
            Errno::EINVAL => "EINVAL",
            Errno::EFBIG => "EFBIG",
            Errno::ESPIPE => "ESPIPE",
            Errno::EROFS => "EROFS",
            Errno::ENAMETOOLONG => "ENAMETOOLONG",
            Errno::ENOTEMPTY => "ENOTEMPTY",
            Errno::ELOOP => "ELOOP",
            Errno::ENOTSUP => "ENOTSUP",
        }
    }
}

const ALL: &[Errno] = &[
    Errno::EPERM,
    Errno::ENOENT,
    Errno::ESRCH,
    Errno::ENXIO,
    Errno::EBADF,
    Errno::ECHILD,
    Errno::EACCES,
    Errno::ENOTBLK,
    Errno::EBUSY,
    Errno::EEXIST,
    Errno::EXDEV,
    Errno::ENODEV,
    Errno::ENOTDIR,
    Errno::EISDIR,
    Errno::EINVAL,
    Errno::EFBIG,
    Errno::ESPIPE,
    Errno::EROFS,
    Errno::ENAMETOOLONG,
    Errno::ENOTEMPTY,
    Errno::ELOOP,
    Errno::ENOTSUP,
];

/// Convert to `std::io::Error` so callers can mix virtual and host I/O.
impl From<Errno> for std::io::Error {
    fn from(e: Errno) -> Self {
        std::io::Error::from_raw_os_error(e.raw())
    }
}
