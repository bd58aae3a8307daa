//! Filesystem backends.
//!
//! Every backend is an [`InodeTable`] plus identity (fstype, source, device
//! id). Plain storage needs nothing more; devtmpfs and overlay add lookup
//! behaviour that reaches across devices, so that logic lives on
//! [`Namespace`](crate::Namespace) and dispatches on [`Backend`].

mod devnames;
mod devtmpfs;
mod overlay;
mod storage;
mod table;

pub use devtmpfs::DevTmpFs;
pub use overlay::{OverlayFs, OverlayLayers};
pub use storage::StorageFs;
pub use table::InodeTable;

pub(crate) use devnames::DeviceNumber;

use std::fmt;

use memos_types::{DevId, Ino, MountOptions};
use strum::{Display, EnumString};

use crate::inode::ROOT_INO;

/// Capability shared by every backend.
pub trait FileSystem: fmt::Debug {
    /// Filesystem type name as given to `mount` (`ext4`, `devtmpfs`, ...).
    fn fstype(&self) -> &str;

    /// Source string (`/dev/sda1`, `tmpfs`, `overlay`).
    fn source(&self) -> &str;

    fn table(&self) -> &InodeTable;

    fn table_mut(&mut self) -> &mut InodeTable;

    fn dev(&self) -> DevId {
        self.table().dev()
    }

    fn root(&self) -> Ino {
        ROOT_INO
    }

    /// Filesystem-specific options for mount listings.
    fn options(&self) -> MountOptions {
        MountOptions::default()
    }
}

/// Which backend an fstype string selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    Storage,
    Devtmpfs,
    #[strum(to_string = "overlay", serialize = "overlayfs")]
    Overlay,
}

impl BackendKind {
    /// Unknown fstypes are plain storage.
    pub fn for_fstype(fstype: &str) -> Self {
        fstype.parse().unwrap_or(BackendKind::Storage)
    }
}

/// A registered filesystem instance.
#[derive(Debug)]
pub enum Backend {
    Storage(StorageFs),
    Devtmpfs(DevTmpFs),
    Overlay(OverlayFs),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Storage(_) => BackendKind::Storage,
            Backend::Devtmpfs(_) => BackendKind::Devtmpfs,
            Backend::Overlay(_) => BackendKind::Overlay,
        }
    }

    pub fn fs(&self) -> &dyn FileSystem {
        match self {
            Backend::Storage(fs) => fs,
            Backend::Devtmpfs(fs) => fs,
            Backend::Overlay(fs) => fs,
        }
    }

    pub fn fs_mut(&mut self) -> &mut dyn FileSystem {
        match self {
            Backend::Storage(fs) => fs,
            Backend::Devtmpfs(fs) => fs,
            Backend::Overlay(fs) => fs,
        }
    }

    pub fn as_overlay(&self) -> Option<&OverlayFs> {
        match self {
            Backend::Overlay(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_overlay_mut(&mut self) -> Option<&mut OverlayFs> {
        match self {
            Backend::Overlay(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_devtmpfs(&self) -> Option<&DevTmpFs> {
        match self {
            Backend::Devtmpfs(fs) => Some(fs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_for_fstype() {
        assert_eq!(BackendKind::for_fstype("overlay"), BackendKind::Overlay);
        assert_eq!(BackendKind::for_fstype("OverlayFS"), BackendKind::Overlay);
        assert_eq!(BackendKind::for_fstype("devtmpfs"), BackendKind::Devtmpfs);
        assert_eq!(BackendKind::for_fstype("ext4"), BackendKind::Storage);
        assert_eq!(BackendKind::for_fstype("tmpfs"), BackendKind::Storage);
        assert_eq!(BackendKind::Overlay.to_string(), "overlay");
    }
}
