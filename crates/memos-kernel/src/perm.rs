//! Permission checks.
//!
//! Classic owner/group/other evaluation with one twist: the classes are
//! unioned rather than picked. A caller that owns a file also gets the group
//! and other bits, and uid 0 matches both the owner and group classes
//! (but still needs some bit set; mode 0 denies root too).

use memos_types::Errno;
use memos_types::mode::{ACCESS_EXEC, ACCESS_READ, ACCESS_WRITE};
use serde::{Deserialize, Serialize};

use crate::inode::Inode;

/// Effective identity of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups.
    #[serde(default)]
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn root() -> Self {
        Self::new(0, 0)
    }

    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = u32>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.uid == 0
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    /// Owner of `inode`, or privileged.
    pub fn owns(&self, inode: &Inode) -> bool {
        self.is_privileged() || self.uid == inode.uid
    }
}

/// The `rwx` bits (0..=7) `creds` holds on `inode`.
pub fn granted(inode: &Inode, creds: &Credentials) -> u32 {
    let perm = inode.perm;
    let mut bits = perm & 0o7;
    if creds.owns(inode) {
        bits |= (perm >> 6) & 0o7;
    }
    if creds.is_privileged() || creds.in_group(inode.gid) {
        bits |= (perm >> 3) & 0o7;
    }
    bits
}

/// EACCES unless every bit of `want` is granted.
pub fn check(inode: &Inode, creds: &Credentials, want: u32) -> Result<(), Errno> {
    if granted(inode, creds) & want == want {
        Ok(())
    } else {
        Err(Errno::EACCES)
    }
}

pub fn may_read(inode: &Inode, creds: &Credentials) -> bool {
    granted(inode, creds) & ACCESS_READ != 0
}

pub fn may_write(inode: &Inode, creds: &Credentials) -> bool {
    granted(inode, creds) & ACCESS_WRITE != 0
}

pub fn may_exec(inode: &Inode, creds: &Credentials) -> bool {
    granted(inode, creds) & ACCESS_EXEC != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeBody;

    fn file(perm: u32, uid: u32, gid: u32) -> Inode {
        Inode::new(1, 2, InodeBody::file(), perm, uid, gid)
    }

    #[test]
    fn test_owner_group_other() {
        let f = file(0o640, 1000, 100);
        assert_eq!(granted(&f, &Credentials::new(1000, 1000)), 0o6);
        assert_eq!(granted(&f, &Credentials::new(2000, 100)), 0o4);
        assert_eq!(granted(&f, &Credentials::new(2000, 2000)), 0);
        let member = Credentials::new(2000, 2000).with_groups([100]);
        assert!(may_read(&f, &member));
        assert!(!may_write(&f, &member));
    }

    #[test]
    fn test_classes_union() {
        // owner with no user bits still gets "other"
        let f = file(0o004, 1000, 100);
        assert!(may_read(&f, &Credentials::new(1000, 1000)));
    }

    #[test]
    fn test_root_matches_owner_and_group_but_not_blindly() {
        let f = file(0o070, 1000, 100);
        assert_eq!(granted(&f, &Credentials::root()), 0o7);
        let none = file(0o000, 1000, 100);
        assert_eq!(check(&none, &Credentials::root(), ACCESS_READ), Err(Errno::EACCES));
    }
}
