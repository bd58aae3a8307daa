//! Shared value types for the memos virtual OS.
//!
//! This is the leaf crate: no filesystem state lives here, only the
//! vocabulary every layer speaks.
//!
//! | Module      | Contents                                          |
//! |-------------|---------------------------------------------------|
//! | [`errno`]   | [`Errno`] kinds with host numbering               |
//! | [`mode`]    | `S_IF*` type bits, permission bits, [`FileKind`]  |
//! | [`flags`]   | [`OpenFlags`], [`MountFlags`], [`UnmountFlags`]   |
//! | [`dev`]     | `makedev`/`major`/`minor`                         |
//! | [`stat`]    | [`Stat`]                                          |
//! | [`options`] | [`MountOptions`] (`key=value,...`)                |
//! | [`path`]    | lexical path helpers                              |

pub mod dev;
pub mod errno;
pub mod flags;
pub mod mode;
pub mod options;
pub mod path;
pub mod stat;

pub use dev::{DevId, Ino, format_dev, major, makedev, minor};
pub use errno::Errno;
pub use flags::{
    Access, MountFlags, O_APPEND, O_CREATE, O_EXCL, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY, OpenFlags,
    UnmountFlags, Whence,
};
pub use mode::{FileKind, apply_umask, format_mode};
pub use options::MountOptions;
pub use stat::Stat;
