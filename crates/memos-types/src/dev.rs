//! Device numbers.
//!
//! Encoded with the glibc `makedev` layout, so a `(major, minor)` pair yields
//! the same `st_dev`/`st_rdev` value a real Linux stat would report.

/// Encoded device number (`dev_t`).
pub type DevId = u64;

/// Inode number within one device.
pub type Ino = u64;

pub const fn makedev(major: u32, minor: u32) -> DevId {
    let major = major as u64;
    let minor = minor as u64;
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

pub const fn major(dev: DevId) -> u32 {
    (((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)) as u32
}

pub const fn minor(dev: DevId) -> u32 {
    (((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)) as u32
}

/// Format as `major:minor`, the way `/proc/self/mountinfo` does.
pub fn format_dev(dev: DevId) -> String {
    format!("{}:{}", major(dev), minor(dev))
}
