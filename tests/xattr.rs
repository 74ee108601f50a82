mod common;

use common::{make_volume, setup, shutdown_and_check};
use ext2_vfs_core::fs::mkfs::FormatOptions;
use ext2_vfs_core::{ErrorKind, MountFlags, OpenFlags, UnmountFlags, WatchFlags, WatchEvent, WatchMask, XattrFlags};

fn names(list: &[u8]) -> Vec<&[u8]> {
    list.split(|b| *b == 0).filter(|n| !n.is_empty()).collect()
}

#[test]
fn test_user_attribute_roundtrip() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/f", b"data");
    let before = a.statfs(b"/").unwrap().free_blocks_count;

    a.setxattr(b"/f", b"user.color", b"blue", XattrFlags::empty()).unwrap();
    a.setxattr(b"/f", b"user.size", b"large", XattrFlags::empty()).unwrap();
    assert_eq!(a.statfs(b"/").unwrap().free_blocks_count, before - 1);

    // 空缓冲区只询问长度
    assert_eq!(a.getxattr(b"/f", b"user.color", &mut []).unwrap(), 4);
    let mut buf = [0u8; 16];
    let n = a.getxattr(b"/f", b"user.color", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"blue");
    let mut small = [0u8; 2];
    assert_eq!(a.getxattr(b"/f", b"user.color", &mut small).unwrap_err().kind(), ErrorKind::OutOfRange);

    let len = a.listxattr(b"/f", &mut []).unwrap();
    let mut list = vec![0u8; len];
    assert_eq!(a.listxattr(b"/f", &mut list).unwrap(), len);
    let mut got = names(&list);
    got.sort();
    assert_eq!(got, [&b"user.color"[..], b"user.size"]);

    a.removexattr(b"/f", b"user.color").unwrap();
    assert_eq!(a.getxattr(b"/f", b"user.color", &mut buf).unwrap_err().kind(), ErrorKind::NoData);
    assert_eq!(a.removexattr(b"/f", b"user.color").unwrap_err().kind(), ErrorKind::NoData);

    // 最后一个属性删除后属性块归还
    a.removexattr(b"/f", b"user.size").unwrap();
    assert_eq!(a.statfs(b"/").unwrap().free_blocks_count, before);
    assert_eq!(a.listxattr(b"/f", &mut []).unwrap(), 0);
    assert_eq!(common::read_file(a, b"/f"), b"data");
    shutdown_and_check(core);
}

#[test]
fn test_create_and_replace_flags() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/f", b"");
    assert_eq!(
        a.setxattr(b"/f", b"user.k", b"v", XattrFlags::REPLACE).unwrap_err().kind(),
        ErrorKind::NoData
    );
    a.setxattr(b"/f", b"user.k", b"v", XattrFlags::CREATE).unwrap();
    assert_eq!(
        a.setxattr(b"/f", b"user.k", b"w", XattrFlags::CREATE).unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );
    a.setxattr(b"/f", b"user.k", b"replaced", XattrFlags::REPLACE).unwrap();
    let mut buf = [0u8; 16];
    let n = a.getxattr(b"/f", b"user.k", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"replaced");
    assert_eq!(
        a.setxattr(b"/f", b"bogus.k", b"v", XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::Unsupported
    );
    shutdown_and_check(core);
}

#[test]
fn test_trusted_namespace_is_privileged() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/f", b"");
    a.chmod(b"/f", 0o666).unwrap();
    a.setxattr(b"/f", b"trusted.secret", b"s", XattrFlags::empty()).unwrap();
    a.setxattr(b"/f", b"user.open", b"o", XattrFlags::empty()).unwrap();

    core.hal.become_user(1000, 1000);
    let mut buf = [0u8; 64];
    assert_eq!(
        a.getxattr(b"/f", b"trusted.secret", &mut buf).unwrap_err().kind(),
        ErrorKind::NotPermitted
    );
    assert_eq!(
        a.setxattr(b"/f", b"trusted.mine", b"m", XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::NotPermitted
    );
    let n = a.listxattr(b"/f", &mut buf).unwrap();
    assert_eq!(names(&buf[..n]), [&b"user.open"[..]]);

    core.hal.become_root();
    let n = a.listxattr(b"/f", &mut buf).unwrap();
    assert_eq!(names(&buf[..n]).len(), 2);
    shutdown_and_check(core);
}

#[test]
fn test_user_namespace_follows_permissions() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/f", b"");
    a.chmod(b"/f", 0o644).unwrap();
    a.setxattr(b"/f", b"user.k", b"v", XattrFlags::empty()).unwrap();

    core.hal.become_user(1000, 1000);
    let mut buf = [0u8; 8];
    assert_eq!(a.getxattr(b"/f", b"user.k", &mut buf).unwrap(), 1);
    assert_eq!(
        a.setxattr(b"/f", b"user.k", b"w", XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );
    core.hal.become_root();
    shutdown_and_check(core);
}

#[test]
fn test_link_and_descriptor_variants() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/target", b"");
    a.symlink(b"/target", b"/link").unwrap();

    // 跟随链接的变体作用在目标上
    a.setxattr(b"/link", b"user.via", b"link", XattrFlags::empty()).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(a.getxattr(b"/target", b"user.via", &mut buf).unwrap(), 4);
    assert_eq!(a.llistxattr(b"/link", &mut []).unwrap(), 0);
    assert_eq!(
        a.lsetxattr(b"/link", b"user.k", b"v", XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::NotPermitted
    );
    assert_eq!(a.lgetxattr(b"/link", b"user.via", &mut buf).unwrap_err().kind(), ErrorKind::NotPermitted);

    let fd = a.open(b"/target", OpenFlags::RDWR.bits(), 0).unwrap();
    a.fsetxattr(fd, b"user.fd", b"1", XattrFlags::empty()).unwrap();
    assert_eq!(a.fgetxattr(fd, b"user.fd", &mut buf).unwrap(), 1);
    // "user.via\0user.fd\0" 共 17 字节
    assert_eq!(a.flistxattr(fd, &mut []).unwrap(), 17);
    let mut small = [0u8; 16];
    assert_eq!(a.flistxattr(fd, &mut small).unwrap_err().kind(), ErrorKind::OutOfRange);
    let n = a.flistxattr(fd, &mut buf).unwrap();
    assert_eq!(n, 17);
    assert_eq!(names(&buf[..n]).len(), 2);
    a.fremovexattr(fd, b"user.fd").unwrap();
    a.lremovexattr(b"/target", b"user.via").unwrap();
    a.close(fd).unwrap();

    let pfd = a.open(b"/target", OpenFlags::PATH.bits(), 0).unwrap();
    assert_eq!(a.fgetxattr(pfd, b"user.k", &mut buf).unwrap_err().kind(), ErrorKind::BadDescriptor);
    assert_eq!(
        a.fsetxattr(pfd, b"user.k", b"v", XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::BadDescriptor
    );
    a.close(pfd).unwrap();
    shutdown_and_check(core);
}

#[test]
fn test_attribute_block_overflow() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/f", b"");
    let big = vec![7u8; 900];
    a.setxattr(b"/f", b"user.big", &big, XattrFlags::empty()).unwrap();
    assert_eq!(
        a.setxattr(b"/f", b"user.more", &[1u8; 200], XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::NoSpace
    );

    // 失败的修改不影响原有内容
    let mut buf = vec![0u8; 1024];
    let n = a.getxattr(b"/f", b"user.big", &mut buf).unwrap();
    assert_eq!(&buf[..n], &big[..]);
    assert_eq!(a.getxattr(b"/f", b"user.more", &mut buf).unwrap_err().kind(), ErrorKind::NoData);
    shutdown_and_check(core);
}

#[test]
fn test_attribute_changes_emit_attrib() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/f", b"");
    let wfd = a.watch_init(WatchFlags::NONBLOCK).unwrap();
    let wd = a.watch_add(wfd, b"/f", WatchMask::ATTRIB).unwrap();

    a.setxattr(b"/f", b"user.a", b"1", XattrFlags::empty()).unwrap();
    let mut buf = [0u8; 256];
    let n = a.read(wfd, &mut buf).unwrap();
    let events = WatchEvent::decode_all(&buf[..n]);
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].wd, events[0].mask), (wd, WatchMask::ATTRIB));

    // 失败的修改不产生事件
    assert!(a.removexattr(b"/f", b"user.none").is_err());
    assert_eq!(a.read(wfd, &mut buf).unwrap_err().kind(), ErrorKind::WouldBlock);
    a.close(wfd).unwrap();
    shutdown_and_check(core);
}

#[test]
fn test_read_only_mount_rejects_changes() {
    let core = setup();
    let a = &core.actor;
    let (bdev, _mem) = make_volume(2, 2 << 20, &FormatOptions::default());
    core.vfs.register_device("ram1", bdev).unwrap();
    a.mkdir(b"/mnt", 0o755).unwrap();

    a.mount("ram1", b"/mnt", "ext2", MountFlags::empty(), "").unwrap();
    common::write_file(a, b"/mnt/f", b"");
    a.setxattr(b"/mnt/f", b"user.k", b"v", XattrFlags::empty()).unwrap();
    a.unmount(b"/mnt", UnmountFlags::empty()).unwrap();

    a.mount("ram1", b"/mnt", "ext2", MountFlags::RDONLY, "").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(a.getxattr(b"/mnt/f", b"user.k", &mut buf).unwrap(), 1);
    assert_eq!(
        a.setxattr(b"/mnt/f", b"user.k", b"w", XattrFlags::empty()).unwrap_err().kind(),
        ErrorKind::ReadOnly
    );
    assert_eq!(a.removexattr(b"/mnt/f", b"user.k").unwrap_err().kind(), ErrorKind::ReadOnly);
    a.unmount(b"/mnt", UnmountFlags::empty()).unwrap();
    shutdown_and_check(core);
}
