//! # memos-kernel
//!
//! An in-memory Unix-like operating system surface: filesystems, mounts,
//! open files and processes, with no host I/O.
//!
//! A [`Namespace`] owns everything. Process-level calls (`open`, `mkdir`,
//! `mount`, `chdir`, ...) are made through a [`MemOs`] handle bound to one
//! pid; errors come back as [`VfsError`] carrying the operation, the paths
//! involved and an [`Errno`](memos_types::Errno).
//!
//! | Module        | Contents                                               |
//! |---------------|--------------------------------------------------------|
//! | [`namespace`] | device registry, mount table, descriptor arenas        |
//! | [`fs`]        | storage, devtmpfs and overlay backends                 |
//! | [`inode`]     | inode bodies and metadata                              |
//! | [`mount`]     | mounts and mount-qualified locations                   |
//! | [`file`]      | open file descriptions                                 |
//! | [`perm`]      | credentials and permission checks                      |
//! | [`process`]   | processes and the [`MemOs`] call surface               |
//! | [`cmd`]       | starting and reaping child processes                   |
//! | [`populate`]  | declarative setup scripts                              |
//! | [`config`]    | [`NamespaceConfig`]                                    |
//! | [`error`]     | [`VfsError`]                                           |

pub mod cmd;
pub mod config;
pub mod error;
pub mod file;
pub mod fs;
pub mod inode;
pub mod mount;
pub mod namespace;
pub mod perm;
pub mod populate;
pub mod process;

pub use cmd::Cmd;
pub use config::NamespaceConfig;
pub use error::{VfsError, VfsResult};
pub use file::{Fd, FileId, OpenFile};
pub use fs::{Backend, BackendKind, DevTmpFs, FileSystem, OverlayFs, StorageFs};
pub use inode::{Inode, InodeBody, InodeRef, ROOT_INO};
pub use mount::{Loc, Mount, MountId};
pub use namespace::{DEVTMPFS_DEV, Namespace, ROOTFS_DEV};
pub use perm::Credentials;
pub use populate::{Action, PopulatorData, ProcessRef, parse_json, parse_toml, populate};
pub use process::{
    CWD_FD, DirEntry, EXE_FD, FIRST_USER_FD, INIT_PID, KERNEL_PID, MemOs, Pid, Process, ROOT_FD,
    SharedBuffer, Stdio, UNCHANGED,
};
