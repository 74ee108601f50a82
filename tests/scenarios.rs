//! 端到端场景

mod common;

use common::{remount_offline, setup, setup_with, shutdown_and_check, StdHal};
use ext2_vfs_core::dir::{lookup, parse_block};
use ext2_vfs_core::fs::mkfs::FormatOptions;
use ext2_vfs_core::inode::read_inode;
use ext2_vfs_core::{Actor, ErrorKind, OpenFlags, RenameFlags, WatchEvent, WatchFlags, WatchMask};

fn rw_create() -> u32 {
    (OpenFlags::RDWR | OpenFlags::CREAT).bits()
}

#[test]
fn test_sparse_write_past_direct_blocks() {
    let core = setup();
    let a = &core.actor;
    let fd = a.open(b"/a", rw_create(), 0o644).unwrap();
    assert_eq!(a.pwrite(fd, 13_312, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap(), 4);

    let mut four = [0u8; 4];
    assert_eq!(a.pread(fd, 13_312, &mut four).unwrap(), 4);
    assert_eq!(four, [0xDE, 0xAD, 0xBE, 0xEF]);
    let mut one = [0xFFu8; 1];
    assert_eq!(a.pread(fd, 4, &mut one).unwrap(), 1);
    assert_eq!(one[0], 0);

    let st = a.stat(b"/a").unwrap();
    assert_eq!(st.size, 13_316);
    // 一个数据块加一张一级间接表
    assert_eq!(st.blocks * 512, 2 * 1024);
    a.close(fd).unwrap();
    shutdown_and_check(core);
}

#[test]
fn test_rename_replaces_target() {
    let core = setup();
    let a = &core.actor;
    common::write_file(a, b"/a", b"hello");
    common::write_file(a, b"/b", b"");
    let ino_a = a.stat(b"/a").unwrap().ino;
    let free_before = a.statfs(b"/").unwrap().free_inodes_count;

    a.rename(b"/a", b"/b", RenameFlags::empty()).unwrap();
    assert_eq!(a.stat(b"/a").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(a.stat(b"/b").unwrap().ino, ino_a);
    assert_eq!(common::read_file(a, b"/b"), b"hello");
    assert_eq!(a.statfs(b"/").unwrap().free_inodes_count, free_before + 1);
    shutdown_and_check(core);
}

#[test]
fn test_directory_hole_merges_into_predecessor() {
    let core = setup();
    let a = &core.actor;
    a.mkdir(b"/d", 0o755).unwrap();
    let names: Vec<Vec<u8>> = (0..128).map(|i| format!("entry{:03}", i).into_bytes()).collect();
    for name in &names {
        let mut path = b"/d/".to_vec();
        path.extend_from_slice(name);
        common::write_file(a, &path, b"");
    }
    let size_before = a.stat(b"/d").unwrap().size;

    a.unlink(b"/d/entry063").unwrap();
    assert_eq!(a.stat(b"/d/entry063").unwrap_err().kind(), ErrorKind::NotFound);
    assert!(a.stat(b"/d/entry062").is_ok());
    assert!(a.stat(b"/d/entry064").is_ok());
    assert_eq!(a.stat(b"/d").unwrap().size, size_before);
    let dir_ino = a.stat(b"/d").unwrap().ino as u32;

    let common::Core { vfs, mem, actor, .. } = core;
    drop(actor);
    vfs.shutdown().unwrap();
    let fs = remount_offline(&mem);
    let dir = read_inode(fs.groups(), dir_ino).unwrap();
    assert_eq!(lookup(&fs, &dir, b"entry063").unwrap(), None);
    assert!(lookup(&fs, &dir, b"entry062").unwrap().is_some());

    // 被删记录之前的记录覆盖了空洞
    let bs = fs.block_size() as usize;
    let mut found = false;
    for lblock in 0..dir.size() / bs as u64 {
        let phys = fs.mapper().map(fs.groups(), &dir, lblock).unwrap().unwrap();
        let block = fs.cache().get(fs.dev(), phys as u64, bs).unwrap();
        let data = block.with_data(|d| d.to_vec());
        for rec in parse_block(&data).unwrap() {
            if rec.inode != 0 && rec.name(&data) == b"entry062" {
                assert_eq!(rec.rec_len, 32);
                found = true;
            }
        }
    }
    assert!(found);
    common::check_volume(&fs);
}

#[test]
fn test_watch_directory_create_and_move() {
    let core = setup();
    let a = &core.actor;
    a.mkdir(b"/d", 0o755).unwrap();
    let wfd = a.watch_init(WatchFlags::empty()).unwrap();
    let wd = a
        .watch_add(wfd, b"/d", WatchMask::CREATE | WatchMask::DELETE | WatchMask::MOVED_TO)
        .unwrap();

    let worker: Actor = a.fork();
    std::thread::spawn(move || {
        common::write_file(&worker, b"/d/x", b"");
        worker.rename(b"/d/x", b"/d/y", RenameFlags::empty()).unwrap();
    })
    .join()
    .unwrap();

    let mut buf = [0u8; 1024];
    let n = a.read(wfd, &mut buf).unwrap();
    let events = WatchEvent::decode_all(&buf[..n]);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.wd == wd));
    assert_eq!(events[0].mask, WatchMask::CREATE);
    assert_eq!(events[0].name, b"x");
    assert_eq!(events[1].mask, WatchMask::MOVED_FROM);
    assert_eq!(events[1].name, b"x");
    assert_eq!(events[2].mask, WatchMask::MOVED_TO);
    assert_eq!(events[2].name, b"y");
    assert_ne!(events[1].cookie, 0);
    assert_eq!(events[1].cookie, events[2].cookie);
    a.close(wfd).unwrap();
    shutdown_and_check(core);
}

#[test]
fn test_truncate_shrink_frees_indirect_tables() {
    let fmt = FormatOptions { block_size: 4096, ..Default::default() };
    let core = setup_with(16 << 20, fmt, "");
    let a = &core.actor;
    let free_before = a.statfs(b"/").unwrap().free_blocks_count;

    let fd = a.open(b"/f", rw_create(), 0o644).unwrap();
    let chunk = vec![0x3Cu8; 64 * 1024];
    for _ in 0..48 {
        assert_eq!(a.write(fd, &chunk).unwrap(), chunk.len());
    }
    assert_eq!(a.fstat(fd).unwrap().size, 3 << 20);
    assert!(a.statfs(b"/").unwrap().free_blocks_count < free_before - 768);

    a.truncate(b"/f", 2000).unwrap();
    let st = a.stat(b"/f").unwrap();
    assert_eq!(st.size, 2000);
    assert_eq!(st.blocks * 512, 4096);
    let mut buf = [0u8; 16];
    assert_eq!(a.pread(fd, 3000, &mut buf).unwrap(), 0);
    assert_eq!(a.statfs(b"/").unwrap().free_blocks_count, free_before - 1);
    a.close(fd).unwrap();
    shutdown_and_check(core);
}

#[test]
fn test_write_failure_commits_prefix() {
    let core = setup_with(4 << 20, FormatOptions::default(), "sync");
    let a = &core.actor;
    let fd = a.open(b"/f", rw_create(), 0o644).unwrap();
    a.fsync(fd).unwrap();

    core.mem.faults().fail_write_after(1);
    let data: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    let n = a.write(fd, &data).unwrap();
    assert!(n > 0 && n <= 4096, "committed {}", n);
    core.mem.faults().clear();

    let mut back = vec![0u8; 8192];
    assert_eq!(a.pread(fd, 0, &mut back).unwrap(), n);
    assert_eq!(&back[..n], &data[..n]);
    assert_eq!(a.fstat(fd).unwrap().size, n as u64);
    a.close(fd).unwrap();
    shutdown_and_check(core);
}

#[test]
fn test_interrupted_rename_wait() {
    let core = setup();
    let hal: &StdHal = &core.hal;
    common::write_file(&core.actor, b"/a", b"1");
    hal.raise_signal(true);
    // 无竞争时不会进入等待
    core.actor.rename(b"/a", b"/b", RenameFlags::empty()).unwrap();
    hal.raise_signal(false);
    assert!(core.actor.stat(b"/b").is_ok());
    shutdown_and_check(core);
}
