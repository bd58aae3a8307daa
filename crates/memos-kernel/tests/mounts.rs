//! Mount table behaviour: storage devices, bind aliasing and busy checks.

use memos_kernel::{DEVTMPFS_DEV, Namespace, ROOTFS_DEV};
use memos_types::{Errno, MountFlags, UnmountFlags, makedev};

#[test]
fn test_explicit_device_number_in_stat() {
    let mut ns = Namespace::default();
    let dev = ns
        .make_filesystem(Some(8), Some(16), "ext4", "/dev/sdb")
        .unwrap();
    assert_eq!(dev, makedev(8, 16));

    let mut os = ns.init();
    os.mkdir("/data", 0o755).unwrap();
    os.mount("/dev/sdb", "/data", "ext4", MountFlags::empty(), "")
        .unwrap();
    os.mkdir_all("/data/var/log", 0o755).unwrap();
    let fd = os.create("/data/var/log/messages").unwrap();
    os.write(fd, b"boot\n").unwrap();
    os.close(fd).unwrap();

    let st = os.stat("/data/var/log/messages").unwrap();
    assert_eq!(st.dev, makedev(8, 16));
    assert_ne!(st.dev, ROOTFS_DEV);
    assert_eq!(st.size, 5);
    assert_eq!(os.stat("/data").unwrap().dev, makedev(8, 16));
    assert_eq!(os.stat("/").unwrap().dev, ROOTFS_DEV);
}

#[test]
fn test_registered_device_survives_unmount() {
    let mut ns = Namespace::default();
    ns.make_filesystem(Some(8), Some(1), "ext4", "/dev/sda1").unwrap();
    let mut os = ns.init();
    os.mkdir("/data", 0o755).unwrap();
    os.mount("/dev/sda1", "/data", "ext4", MountFlags::empty(), "").unwrap();
    os.write_file("/data/keep", b"x", 0o644).unwrap();
    os.unmount("/data", UnmountFlags::empty()).unwrap();
    assert!(os.stat("/data/keep").unwrap_err().is(Errno::ENOENT));

    os.mount("/dev/sda1", "/data", "ext4", MountFlags::RDONLY, "").unwrap();
    assert_eq!(os.read_file("/data/keep").unwrap(), b"x");
    assert!(os.write_file("/data/new", b"", 0o644).unwrap_err().is(Errno::EROFS));
}

#[test]
fn test_bind_mount_aliases_directory() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    os.mkdir("/a", 0o755).unwrap();
    os.mkdir("/b", 0o755).unwrap();
    os.mount("/a", "/b", "", MountFlags::BIND, "").unwrap();

    os.write_file("/b/shared", b"hello", 0o644).unwrap();
    assert_eq!(os.read_file("/a/shared").unwrap(), b"hello");

    let fa = os.open("/a/shared").unwrap();
    let fb = os.open("/b/shared").unwrap();
    let (sa, sb) = (os.fstat(fa).unwrap(), os.fstat(fb).unwrap());
    assert!(sa.same_file(&sb));
    assert_eq!(sa.dev, ROOTFS_DEV);
    os.close(fa).unwrap();
    os.close(fb).unwrap();
}

#[test]
fn test_bind_mount_of_file() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    os.write_file("/src", b"contents", 0o644).unwrap();
    os.write_file("/dst", b"", 0o644).unwrap();
    os.mkdir("/dir", 0o755).unwrap();
    os.mount("/src", "/dst", "", MountFlags::BIND, "").unwrap();
    assert_eq!(os.read_file("/dst").unwrap(), b"contents");
    assert!(
        os.mount("/src", "/dir", "", MountFlags::BIND, "")
            .unwrap_err()
            .is(Errno::ENOTDIR)
    );
}

#[test]
fn test_bind_holds_source_mount() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    for dir in ["/src", "/dst"] {
        os.mkdir(dir, 0o755).unwrap();
    }
    os.mount("srcfs", "/src", "tmpfs", MountFlags::empty(), "").unwrap();
    os.mkdir("/src/sub", 0o755).unwrap();
    os.mount("/src/sub", "/dst", "", MountFlags::BIND, "").unwrap();

    assert!(os.unmount("/src", UnmountFlags::empty()).unwrap_err().is(Errno::EBUSY));
    os.unmount("/dst", UnmountFlags::empty()).unwrap();
    os.unmount("/src", UnmountFlags::empty()).unwrap();
}

#[test]
fn test_busy_with_open_file_or_child_mount() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    os.mkdir("/mnt", 0o755).unwrap();
    os.mount("outer", "/mnt", "tmpfs", MountFlags::empty(), "").unwrap();

    let fd = os.create("/mnt/file").unwrap();
    let err = os.unmount("/mnt", UnmountFlags::empty()).unwrap_err();
    assert!(err.is(Errno::EBUSY));
    assert_eq!(err.to_string(), "umount /mnt: device or resource busy");
    os.close(fd).unwrap();

    os.mkdir("/mnt/inner", 0o755).unwrap();
    os.mount("inner", "/mnt/inner", "tmpfs", MountFlags::empty(), "").unwrap();
    assert!(os.unmount("/mnt", UnmountFlags::DETACH).unwrap_err().is(Errno::EBUSY));
    os.unmount("/mnt/inner", UnmountFlags::empty()).unwrap();
    os.unmount("/mnt", UnmountFlags::empty()).unwrap();
}

#[test]
fn test_working_directory_keeps_mount_busy() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    os.mkdir("/mnt", 0o755).unwrap();
    os.mount("scratch", "/mnt", "tmpfs", MountFlags::empty(), "").unwrap();
    os.chdir("/mnt").unwrap();
    assert!(os.unmount("/mnt", UnmountFlags::empty()).unwrap_err().is(Errno::EBUSY));
    os.chdir("/").unwrap();
    os.unmount("/mnt", UnmountFlags::empty()).unwrap();
}

#[test]
fn test_dotdot_leaves_mount() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    os.mkdir_all("/srv/mnt", 0o755).unwrap();
    os.write_file("/srv/marker", b"", 0o644).unwrap();
    os.mount("scratch", "/srv/mnt", "tmpfs", MountFlags::empty(), "").unwrap();
    os.chdir("/srv/mnt").unwrap();
    assert!(os.stat("../marker").is_ok());
    assert_eq!(os.getwd().unwrap(), "/srv/mnt");
    os.chdir("/").unwrap();
}

#[test]
fn test_devtmpfs_nested_names() {
    let mut ns = Namespace::default();
    ns.make_filesystem(None, None, "ext4", "/dev/mapper/vg-var")
        .unwrap();
    let mut os = ns.init();
    os.mkdir("/dev", 0o755).unwrap();
    os.mount("devtmpfs", "/dev", "devtmpfs", MountFlags::empty(), "").unwrap();

    assert!(os.stat("/dev/mapper").unwrap().is_dir());
    let node = os.stat("/dev/mapper/vg-var").unwrap();
    assert_eq!(node.dev, DEVTMPFS_DEV);
    assert_eq!(node.kind(), Some(memos_types::FileKind::BlockDev));

    let fd = os.open_file("/dev/null", memos_types::O_RDWR, 0).unwrap();
    assert_eq!(os.write(fd, b"gone").unwrap(), 4);
    let mut buf = [0u8; 8];
    assert_eq!(os.read(fd, &mut buf).unwrap(), 0);
    os.close(fd).unwrap();
}

#[test]
fn test_noexec_mount_blocks_lookup() {
    let mut ns = Namespace::default();
    let mut os = ns.init();
    os.mkdir("/opt", 0o755).unwrap();
    os.mount("optfs", "/opt", "tmpfs", MountFlags::NOEXEC, "").unwrap();
    os.write_file("/opt/tool", b"", 0o755).unwrap();
    assert!(os.look_path("/opt/tool").unwrap_err().is(Errno::EACCES));
}
