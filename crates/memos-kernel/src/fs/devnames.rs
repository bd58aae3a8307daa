//! Device numbers from `/dev/NAME` source strings.
//!
//! Follows the Linux static allocation for the common block majors; device
//! mapper names get the next free minor on major 253.

use memos_types::{DevId, makedev};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceNumber {
    Fixed(DevId),
    /// Any free minor on this major.
    NextOn(u32),
}

const DM_MAJOR: u32 = 253;

/// Disk families: name prefix, major, minors per disk.
const DISKS: &[(&str, u32, u32)] = &[
    ("xvd", 202, 16),
    ("vd", 254, 16),
    ("sd", 8, 16),
    ("hd", 3, 64),
];

/// Numbered families: name prefix, major.
const NUMBERED: &[(&str, u32)] = &[("loop", 7), ("nbd", 43), ("sr", 11), ("ram", 1), ("md", 9)];

impl DeviceNumber {
    /// Parse `source` if it names a device beneath `prefix`.
    pub fn parse(source: &str, prefix: &str) -> Option<Self> {
        let name = source
            .strip_prefix(prefix)?
            .strip_prefix('/')?;
        if name.strip_prefix("mapper/").is_some_and(|n| !n.is_empty()) {
            return Some(DeviceNumber::NextOn(DM_MAJOR));
        }
        if let Some(n) = name.strip_prefix("dm-") {
            return Some(DeviceNumber::Fixed(makedev(DM_MAJOR, n.parse().ok()?)));
        }
        for (family, major) in NUMBERED {
            if let Some(n) = name.strip_prefix(family) {
                if let Ok(minor) = n.parse() {
                    return Some(DeviceNumber::Fixed(makedev(*major, minor)));
                }
            }
        }
        for (family, major, per_disk) in DISKS {
            let Some(rest) = name.strip_prefix(family) else {
                continue;
            };
            let mut chars = rest.chars();
            let disk = chars.next().filter(char::is_ascii_lowercase)?;
            let index = disk as u32 - 'a' as u32;
            let part = chars.as_str();
            let part: u32 = if part.is_empty() { 0 } else { part.parse().ok()? };
            if part >= *per_disk {
                return None;
            }
            return Some(DeviceNumber::Fixed(makedev(*major, index * per_disk + part)));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scsi_disks() {
        assert_eq!(
            DeviceNumber::parse("/dev/sda", "/dev"),
            Some(DeviceNumber::Fixed(makedev(8, 0)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/sda1", "/dev"),
            Some(DeviceNumber::Fixed(makedev(8, 1)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/sdb2", "/dev"),
            Some(DeviceNumber::Fixed(makedev(8, 18)))
        );
    }

    #[test]
    fn test_other_families() {
        assert_eq!(
            DeviceNumber::parse("/dev/hdb1", "/dev"),
            Some(DeviceNumber::Fixed(makedev(3, 65)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/vda3", "/dev"),
            Some(DeviceNumber::Fixed(makedev(254, 3)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/xvda1", "/dev"),
            Some(DeviceNumber::Fixed(makedev(202, 1)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/loop4", "/dev"),
            Some(DeviceNumber::Fixed(makedev(7, 4)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/dm-2", "/dev"),
            Some(DeviceNumber::Fixed(makedev(253, 2)))
        );
        assert_eq!(
            DeviceNumber::parse("/dev/mapper/vg-root", "/dev"),
            Some(DeviceNumber::NextOn(253))
        );
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(DeviceNumber::parse("tmpfs", "/dev"), None);
        assert_eq!(DeviceNumber::parse("/dev/sdA1", "/dev"), None);
        assert_eq!(DeviceNumber::parse("/dev/sda99", "/dev"), None);
        assert_eq!(DeviceNumber::parse("/devices/sda1", "/dev"), None);
        assert_eq!(DeviceNumber::parse("/dev/mapper/", "/dev"), None);
    }
}
