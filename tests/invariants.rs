mod common;

use common::{check_volume, make_volume, remount_offline, setup_with, shutdown_and_check};
use ext2_vfs_core::fs::mkfs::FormatOptions;
use ext2_vfs_core::{OpenFlags, RenameFlags, XattrFlags};

#[test]
fn test_fresh_volumes_are_consistent() {
    for block_size in [1024, 2048, 4096] {
        let fmt = FormatOptions { block_size, ..FormatOptions::default() };
        let (_bdev, mem) = make_volume(1, 8 << 20, &fmt);
        let fs = remount_offline(&mem);
        assert_eq!(fs.block_size(), block_size);
        check_volume(&fs);
    }
}

#[test]
fn test_mixed_workload_keeps_volume_consistent() {
    let core = setup_with(8 << 20, FormatOptions::default(), "");
    let a = &core.actor;

    for d in 0..4 {
        let dir = format!("/dir{}", d);
        a.mkdir(dir.as_bytes(), 0o755).unwrap();
        a.mkdir(format!("{}/nested", dir).as_bytes(), 0o700).unwrap();
        for f in 0..20 {
            let data = vec![(d * 20 + f) as u8; 700 * (f + 1)];
            common::write_file(a, format!("{}/file{}", dir, f).as_bytes(), &data);
        }
    }

    // 硬链接、符号链接（快慢两种）
    a.link(b"/dir0/file3", b"/dir1/hard").unwrap();
    a.symlink(b"/dir0/file1", b"/short").unwrap();
    a.symlink(&[b'x'; 200], b"/long").unwrap();

    // 跨目录改名与覆盖
    a.rename(b"/dir2/file5", b"/dir3/moved", RenameFlags::empty()).unwrap();
    a.rename(b"/dir2/file6", b"/dir3/file7", RenameFlags::empty()).unwrap();
    a.rename(b"/dir1/nested", b"/dir0/adopted", RenameFlags::empty()).unwrap();
    a.rename(b"/dir2", b"/dir3", RenameFlags::EXCHANGE).unwrap();

    // 删除与收缩
    for f in (0..20).step_by(3) {
        a.unlink(format!("/dir0/file{}", f).as_bytes()).unwrap();
    }
    let fd = a.open(b"/dir1/file19", OpenFlags::RDWR.bits(), 0).unwrap();
    a.ftruncate(fd, 100).unwrap();
    a.close(fd).unwrap();

    // 稀疏文件跨越一级与二级间接
    let fd = a.creat(b"/sparse", 0o644).unwrap();
    a.pwrite(fd, 20 * 1024, b"single").unwrap();
    a.pwrite(fd, 400 * 1024, b"double").unwrap();
    a.close(fd).unwrap();

    // 属性块
    a.setxattr(b"/dir1/hard", b"user.tag", b"shared", XattrFlags::empty()).unwrap();
    a.setxattr(b"/sparse", b"user.tag", b"sparse", XattrFlags::empty()).unwrap();
    a.removexattr(b"/sparse", b"user.tag").unwrap();

    // 打开着的已删除文件与匿名文件
    // 交换后原 /dir3 的内容位于 /dir2
    let held = a.open(b"/dir2/moved", 0, 0).unwrap();
    a.unlink(b"/dir2/moved").unwrap();
    let tmp = a.open(b"/", (OpenFlags::TMPFILE | OpenFlags::RDWR).bits(), 0o600).unwrap();
    a.write(tmp, &[9u8; 3000]).unwrap();
    a.close(held).unwrap();
    a.close(tmp).unwrap();

    assert_eq!(common::read_file(a, b"/dir1/hard"), vec![3u8; 700 * 4]);
    assert_eq!(a.readlink(b"/long").unwrap(), vec![b'x'; 200]);
    assert_eq!(a.stat(b"/dir0/adopted").unwrap().perm() & 0o777, 0o700);
    shutdown_and_check(core);
}

#[test]
fn test_large_block_workload() {
    let fmt = FormatOptions { block_size: 4096, ..FormatOptions::default() };
    let core = setup_with(16 << 20, fmt, "");
    let a = &core.actor;
    a.mkdir(b"/d", 0o755).unwrap();
    for i in 0..200 {
        common::write_file(a, format!("/d/n{:03}", i).as_bytes(), &[i as u8; 5000]);
    }
    for i in (0..200).filter(|i| i % 2 == 0) {
        a.unlink(format!("/d/n{:03}", i).as_bytes()).unwrap();
    }
    let fd = a.creat(b"/big", 0o644).unwrap();
    a.pwrite(fd, 5 << 20, b"tail").unwrap();
    a.ftruncate(fd, 4096 * 13).unwrap();
    a.close(fd).unwrap();
    assert_eq!(a.stat(b"/big").unwrap().size, 4096 * 13);
    shutdown_and_check(core);
}
