//! Kernel error types.
//!
//! Internal helpers speak bare [`Errno`]; the public operations wrap the kind
//! with the operation name and the path(s) or descriptor involved, the way a
//! libc wrapper would report it.

use std::io;
use thiserror::Error;

use memos_types::Errno;

/// Kernel error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A path operation failed (`open /etc/passwd: no such file or directory`).
    #[error("{op} {path}: {errno}")]
    Path {
        op: &'static str,
        path: String,
        errno: Errno,
    },

    /// A two-path operation failed (link, symlink, rename, mount).
    #[error("{op} {old} {new}: {errno}")]
    Link {
        op: &'static str,
        old: String,
        new: String,
        errno: Errno,
    },

    /// A descriptor operation failed.
    #[error("{op} fd {fd}: {errno}")]
    Fd {
        op: &'static str,
        fd: i32,
        errno: Errno,
    },

    /// An operation with no path context failed.
    #[error("{op}: {errno}")]
    Syscall { op: &'static str, errno: Errno },

    /// A populator action failed.
    #[error("populate action {index} ({action}): {source}")]
    Populate {
        index: usize,
        action: String,
        #[source]
        source: Box<VfsError>,
    },

    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),

    /// Host I/O error (config file loading).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    /// Create a Path error.
    pub fn path(op: &'static str, path: impl Into<String>, errno: Errno) -> Self {
        Self::Path {
            op,
            path: path.into(),
            errno,
        }
    }

    /// Create a Link error.
    pub fn link(
        op: &'static str,
        old: impl Into<String>,
        new: impl Into<String>,
        errno: Errno,
    ) -> Self {
        Self::Link {
            op,
            old: old.into(),
            new: new.into(),
            errno,
        }
    }

    /// Create an Fd error.
    pub fn fd(op: &'static str, fd: i32, errno: Errno) -> Self {
        Self::Fd { op, fd, errno }
    }

    /// Create a Syscall error.
    pub fn syscall(op: &'static str, errno: Errno) -> Self {
        Self::Syscall { op, errno }
    }

    /// The errno kind behind this error, if it has one.
    ///
    /// Populate errors report their underlying cause.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            VfsError::Path { errno, .. }
            | VfsError::Link { errno, .. }
            | VfsError::Fd { errno, .. }
            | VfsError::Syscall { errno, .. } => Some(*errno),
            VfsError::Populate { source, .. } => source.errno(),
            VfsError::Config(_) => Some(Errno::EINVAL),
            VfsError::Io(e) => e.raw_os_error().and_then(Errno::from_raw),
        }
    }

    /// Whether this error carries the given kind.
    pub fn is(&self, errno: Errno) -> bool {
        self.errno() == Some(errno)
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(e) => e,
            other => match other.errno() {
                Some(errno) => io::Error::new(io::Error::from(errno).kind(), other.to_string()),
                None => io::Error::other(other.to_string()),
            },
        }
    }
}

/// Kernel result type.
pub type VfsResult<T> = Result<T, VfsError>;

/// Attach path context to a bare errno result.
pub(crate) trait ErrnoContext<T> {
    fn at_path(self, op: &'static str, path: &str) -> VfsResult<T>;
    fn at_link(self, op: &'static str, old: &str, new: &str) -> VfsResult<T>;
    fn at_fd(self, op: &'static str, fd: i32) -> VfsResult<T>;
    fn at_call(self, op: &'static str) -> VfsResult<T>;
}

impl<T> ErrnoContext<T> for Result<T, Errno> {
    fn at_path(self, op: &'static str, path: &str) -> VfsResult<T> {
        self.map_err(|e| VfsError::path(op, path, e))
    }

    fn at_link(self, op: &'static str, old: &str, new: &str) -> VfsResult<T> {
        self.map_err(|e| VfsError::link(op, old, new, e))
    }

    fn at_fd(self, op: &'static str, fd: i32) -> VfsResult<T> {
        self.map_err(|e| VfsError::fd(op, fd, e))
    }

    fn at_call(self, op: &'static str) -> VfsResult<T> {
        self.map_err(|e| VfsError::syscall(op, e))
    }
}
