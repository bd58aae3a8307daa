//! Overlay mounts seen from a process: merged lookup, copy-up and
//! whiteouts.

use memos_kernel::{MemOs, Namespace};
use memos_types::{Errno, FileKind, MountFlags, O_APPEND, O_RDONLY, O_WRONLY};

// ============================================================================
// Shared setup
// ============================================================================

fn tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `/lower` with some content, empty `/upper` and `/work`, overlay at
/// `/merged`.
fn layered() -> Namespace {
    tracing();
    let mut ns = Namespace::default();
    let mut os = ns.init();
    for dir in ["/lower/etc", "/upper", "/work", "/merged"] {
        os.mkdir_all(dir, 0o755).unwrap();
    }
    os.write_file("/lower/etc/hosts", b"127.0.0.1 localhost\n", 0o644)
        .unwrap();
    os.write_file("/lower/readme", b"lower", 0o644).unwrap();
    os.mount(
        "overlay",
        "/merged",
        "overlay",
        MountFlags::empty(),
        "lowerdir=/lower,upperdir=/upper,workdir=/work",
    )
    .unwrap();
    ns
}

fn overlay_dev(os: &mut MemOs<'_>) -> memos_types::DevId {
    os.mount_root_of("/merged").unwrap().dev
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_lower_content_visible() {
    let mut ns = layered();
    let mut os = ns.init();
    assert_eq!(os.read_file("/merged/readme").unwrap(), b"lower");
    let names: Vec<_> = os
        .read_dir("/merged")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["etc", "readme"]);
    // reading copies nothing
    let dev = overlay_dev(&mut os);
    assert_eq!(ns.overlay(dev).unwrap().copy_ups(), 0);
}

#[test]
fn test_write_copies_up_once() {
    let mut ns = layered();
    let mut os = ns.init();
    for _ in 0..2 {
        let fd = os.open_file("/merged/etc/hosts", O_WRONLY | O_APPEND, 0).unwrap();
        os.write(fd, b"10.0.0.1 box\n").unwrap();
        os.close(fd).unwrap();
    }
    let dev = overlay_dev(&mut os);

    assert_eq!(
        os.read_file("/upper/etc/hosts").unwrap(),
        b"127.0.0.1 localhost\n10.0.0.1 box\n10.0.0.1 box\n"
    );
    assert_eq!(os.read_file("/lower/etc/hosts").unwrap(), b"127.0.0.1 localhost\n");
    // the file and its parent directory
    assert_eq!(ns.overlay(dev).unwrap().copy_ups(), 2);
}

#[test]
fn test_read_only_open_does_not_copy_up() {
    let mut ns = layered();
    let mut os = ns.init();
    let fd = os.open_file("/merged/readme", O_RDONLY, 0).unwrap();
    os.close(fd).unwrap();
    assert!(os.stat("/upper/readme").unwrap_err().is(Errno::ENOENT));
}

#[test]
fn test_chmod_copies_up_metadata() {
    let mut ns = layered();
    let mut os = ns.init();
    os.chmod("/merged/readme", 0o600).unwrap();
    assert_eq!(os.stat("/merged/readme").unwrap().perm(), 0o600);
    assert_eq!(os.stat("/upper/readme").unwrap().perm(), 0o600);
    assert_eq!(os.stat("/lower/readme").unwrap().perm(), 0o644);
    assert_eq!(os.read_file("/upper/readme").unwrap(), b"lower");
}

#[test]
fn test_remove_leaves_whiteout() {
    let mut ns = layered();
    let mut os = ns.init();
    os.remove("/merged/readme").unwrap();

    assert!(os.stat("/merged/readme").unwrap_err().is(Errno::ENOENT));
    let names: Vec<_> = os
        .read_dir("/merged")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["etc"]);
    let whiteout = os.lstat("/upper/readme").unwrap();
    assert_eq!(whiteout.kind(), Some(FileKind::CharDev));
    assert_eq!(whiteout.rdev, 0);
    assert_eq!(os.read_file("/lower/readme").unwrap(), b"lower");

    let dev = overlay_dev(&mut os);
    assert_eq!(ns.overlay(dev).unwrap().whiteouts(), 1);
}

#[test]
fn test_recreate_over_whiteout() {
    let mut ns = layered();
    let mut os = ns.init();
    os.remove("/merged/readme").unwrap();
    os.write_file("/merged/readme", b"upper", 0o644).unwrap();
    assert_eq!(os.read_file("/merged/readme").unwrap(), b"upper");
    assert!(os.lstat("/upper/readme").unwrap().is_file());
}

#[test]
fn test_rename_of_lower_file() {
    let mut ns = layered();
    let mut os = ns.init();
    os.rename("/merged/readme", "/merged/etc/readme").unwrap();
    assert_eq!(os.read_file("/merged/etc/readme").unwrap(), b"lower");
    assert!(os.stat("/merged/readme").unwrap_err().is(Errno::ENOENT));
    // merged directories with a lower side stay put
    assert!(os.rename("/merged/etc", "/merged/etc2").unwrap_err().is(Errno::EXDEV));
}

#[test]
fn test_empty_layers_number_inodes_from_two() {
    tracing();
    let mut ns = Namespace::default();
    let mut os = ns.init();
    for dir in ["/lower", "/rw", "/merged"] {
        os.mkdir(dir, 0o755).unwrap();
    }
    os.mount("lowerfs", "/lower", "tmpfs", MountFlags::empty(), "").unwrap();
    os.mount("rwfs", "/rw", "tmpfs", MountFlags::empty(), "").unwrap();
    os.mkdir("/rw/upper", 0o755).unwrap();
    os.mkdir("/rw/work", 0o755).unwrap();
    os.mount(
        "overlay",
        "/merged",
        "overlay",
        MountFlags::empty(),
        "lowerdir=/lower,upperdir=/rw/upper,workdir=/rw/work",
    )
    .unwrap();

    let err = os.open("/merged/new").unwrap_err();
    assert!(err.is(Errno::ENOENT));

    let fd = os.create("/merged/new").unwrap();
    os.close(fd).unwrap();
    let merged = os.stat("/merged/new").unwrap();
    let upper = os.stat("/rw/upper/new").unwrap();
    let rw_dev = os.mount_root_of("/rw").unwrap().dev;
    assert_eq!(merged.dev, overlay_dev(&mut os));
    assert_eq!(merged.ino, 2);
    assert_eq!(upper.dev, rw_dev);
    // /rw/upper is 2 and /rw/work is 3 on that device
    assert_eq!(upper.ino, 4);
    assert!(os.stat("/lower/new").is_err());
}

#[test]
fn test_unmount_releases_overlay() {
    let mut ns = layered();
    let mut os = ns.init();
    let dev = overlay_dev(&mut os);
    let err = os.unmount("/merged/etc", Default::default()).unwrap_err();
    assert!(err.is(Errno::EINVAL));

    let fd = os.open("/merged/readme").unwrap();
    assert!(os.unmount("/merged", Default::default()).unwrap_err().is(Errno::EBUSY));
    os.close(fd).unwrap();
    os.unmount("/merged", Default::default()).unwrap();

    assert!(os.stat("/merged/readme").unwrap_err().is(Errno::ENOENT));
    assert!(ns.overlay(dev).is_none());
}

#[test]
fn test_open_file_outlives_remove() {
    let mut ns = layered();
    let mut os = ns.init();
    os.write_file("/merged/f", b"data", 0o644).unwrap();
    let fd = os.open("/merged/f").unwrap();
    os.remove("/merged/f").unwrap();
    assert!(os.stat("/upper/f").unwrap_err().is(Errno::ENOENT));

    let mut buf = [0u8; 16];
    assert_eq!(os.read(fd, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"data");
    assert_eq!(os.fstat(fd).unwrap().size, 4);
    os.close(fd).unwrap();
    assert!(os.stat("/merged/f").unwrap_err().is(Errno::ENOENT));
}

#[test]
fn test_failed_rename_keeps_target() {
    let mut ns = layered();
    let mut os = ns.init();
    os.mkdir("/lower/a", 0o755).unwrap();
    os.mkdir("/lower/b", 0o755).unwrap();

    let err = os.rename("/merged/a", "/merged/b").unwrap_err();
    assert!(err.is(Errno::EXDEV));
    assert!(os.stat("/merged/a").unwrap().is_dir());
    assert!(os.stat("/merged/b").unwrap().is_dir());
    assert!(os.lstat("/upper/b").unwrap_err().is(Errno::ENOENT));
    let dev = overlay_dev(&mut os);
    assert_eq!(ns.overlay(dev).unwrap().whiteouts(), 0);
}

#[test]
fn test_remove_merged_directory() {
    let mut ns = layered();
    let mut os = ns.init();
    os.mkdir("/lower/d", 0o755).unwrap();
    os.write_file("/lower/d/x", b"x", 0o644).unwrap();

    os.remove("/merged/d/x").unwrap();
    assert!(os.lstat("/upper/d").unwrap().is_dir());
    assert_eq!(os.lstat("/upper/d/x").unwrap().kind(), Some(FileKind::CharDev));

    // the upper side holds only a whiteout, so the merged directory is empty
    os.remove("/merged/d").unwrap();
    assert!(os.stat("/merged/d").unwrap_err().is(Errno::ENOENT));
    let whiteout = os.lstat("/upper/d").unwrap();
    assert_eq!(whiteout.kind(), Some(FileKind::CharDev));
    assert_eq!(whiteout.rdev, 0);
    assert_eq!(os.read_file("/lower/d/x").unwrap(), b"x");
}
