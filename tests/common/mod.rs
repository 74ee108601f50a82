//! 集成测试公共设施：标准库时钟的系统抽象层、格式化并挂载新核心、卷检查

#![allow(dead_code)]

use ext2_vfs_core::bitmap::test_bit;
use ext2_vfs_core::block_group::group_overhead;
use ext2_vfs_core::dir::read_dir;
use ext2_vfs_core::fs::mkfs::{format, FormatOptions};
use ext2_vfs_core::inode::read_inode;
use ext2_vfs_core::{
    Actor, BlockCache, BlockDev, Credentials, Ext2Fs, FsConfig, MemBlockDevice, MountFlags, MountOptions,
    SystemHal, Timespec, Vfs,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// 墙钟时间、可切换身份、可设置挂起信号
pub struct StdHal {
    cred: Mutex<Credentials>,
    signal: AtomicBool,
}

impl StdHal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { cred: Mutex::new(Credentials::root()), signal: AtomicBool::new(false) })
    }

    pub fn set_credentials(&self, cred: Credentials) {
        *self.cred.lock().unwrap() = cred;
    }

    pub fn become_user(&self, uid: u32, gid: u32) {
        self.set_credentials(Credentials::user(uid, gid));
    }

    pub fn become_root(&self) {
        self.set_credentials(Credentials::root());
    }

    pub fn raise_signal(&self, pending: bool) {
        self.signal.store(pending, Ordering::SeqCst);
    }
}

impl SystemHal for StdHal {
    fn now(&self) -> Timespec {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timespec::new(d.as_secs() as i64, d.subsec_nanos())
    }

    fn credentials(&self) -> Credentials {
        self.cred.lock().unwrap().clone()
    }

    fn signal_pending(&self) -> bool {
        self.signal.load(Ordering::SeqCst)
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

/// 一个格式化并挂载好的核心
pub struct Core {
    pub vfs: Arc<Vfs>,
    pub hal: Arc<StdHal>,
    pub mem: MemBlockDevice,
    pub actor: Actor,
}

/// 在内存盘上创建卷
pub fn make_volume(id: u32, bytes: usize, fmt: &FormatOptions) -> (Arc<BlockDev>, MemBlockDevice) {
    let mem = MemBlockDevice::new(bytes);
    let bdev = Arc::new(BlockDev::new(id, Box::new(mem.clone())).unwrap());
    format(&bdev, fmt).unwrap();
    (bdev, mem)
}

/// 格式化、注册为 `ram0` 并挂载为根
pub fn setup_with(bytes: usize, fmt: FormatOptions, opts: &str) -> Core {
    setup_config(bytes, fmt, opts, FsConfig::default())
}

/// 同 `setup_with`，使用给定的核心配置
pub fn setup_config(bytes: usize, fmt: FormatOptions, opts: &str, config: FsConfig) -> Core {
    let hal = StdHal::new();
    let vfs = Vfs::new(config, hal.clone());
    let (bdev, mem) = make_volume(1, bytes, &fmt);
    vfs.register_device("ram0", bdev).unwrap();
    vfs.mount_root("ram0", "ext2", MountFlags::empty(), opts).unwrap();
    let actor = Actor::new(vfs.clone()).unwrap();
    Core { vfs, hal, mem, actor }
}

/// 4 MiB、1 KiB 块的默认卷
pub fn setup() -> Core {
    setup_with(4 << 20, FormatOptions::default(), "")
}

/// 写入整个文件
pub fn write_file(actor: &Actor, path: &[u8], data: &[u8]) {
    let fd = actor.creat(path, 0o644).unwrap();
    assert_eq!(actor.write(fd, data).unwrap(), data.len());
    actor.close(fd).unwrap();
}

/// 读出整个文件
pub fn read_file(actor: &Actor, path: &[u8]) -> Vec<u8> {
    let fd = actor.open(path, 0, 0).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = actor.read(fd, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    actor.close(fd).unwrap();
    out
}

/// 以只读方式重新挂载磁盘内容，供离线检查
pub fn remount_offline(mem: &MemBlockDevice) -> Arc<Ext2Fs> {
    let hal: Arc<dyn SystemHal> = StdHal::new();
    let bdev = Arc::new(BlockDev::new(99, Box::new(mem.clone())).unwrap());
    let cache = Arc::new(BlockCache::new(256, hal.clone()));
    let opts = MountOptions { read_only: true, ..Default::default() };
    Ext2Fs::mount(cache, bdev, hal, opts).unwrap()
}

/// 遍历整个卷，逐条检查全局不变式
///
/// 卷必须处于静止状态（已卸载或已同步）。
pub fn check_volume(fs: &Ext2Fs) {
    let geo = *fs.geo();
    let groups = fs.groups();
    let descs = groups.snapshot();
    let sb = fs.superblock();
    let bs = geo.block_size as usize;

    // 空闲计数之和
    let free_blocks: u64 = descs.iter().map(|d| d.free_blocks_count as u64).sum();
    let free_inodes: u64 = descs.iter().map(|d| d.free_inodes_count as u64).sum();
    assert_eq!(free_blocks, sb.inner().free_blocks_count as u64, "free block totals disagree");
    assert_eq!(free_inodes, sb.inner().free_inodes_count as u64, "free inode totals disagree");

    // 在用 inode
    let mut live = Vec::new();
    for group in 0..geo.group_count {
        let bitmap = read_block(fs, descs[group as usize].inode_bitmap);
        for index in 0..geo.inodes_per_group {
            let ino = group * geo.inodes_per_group + index + 1;
            if ino > geo.inodes_count {
                break;
            }
            if test_bit(&bitmap, index) && (ino == 2 || ino >= geo.first_ino) {
                live.push(ino);
            }
        }
    }

    // 块引用与目录结构
    let mut referenced = BTreeSet::new();
    let mut names: BTreeMap<u32, u32> = BTreeMap::new();
    let mut subdirs: BTreeMap<u32, u32> = BTreeMap::new();
    for group in 0..geo.group_count {
        let d = &descs[group as usize];
        let first = geo.group_first_block(group);
        for b in first..first + group_overhead(&geo, group) {
            referenced.insert(b);
        }
        referenced.insert(d.block_bitmap);
        referenced.insert(d.inode_bitmap);
        for b in d.inode_table..d.inode_table + geo.inode_table_blocks {
            referenced.insert(b);
        }
    }
    for &ino in &live {
        let raw = read_inode(groups, ino).unwrap();
        let mut owned = 0u64;
        if !(raw.is_symlink() && fs.is_fast_symlink(&raw)) {
            for b in fs.mapper().collect_blocks(groups, &raw).unwrap() {
                assert!(referenced.insert(b), "block {} referenced twice (inode {})", b, ino);
                owned += 1;
            }
        }
        if raw.file_acl != 0 {
            referenced.insert(raw.file_acl);
            owned += 1;
        }
        assert_eq!(raw.blocks as u64 * 512, owned * bs as u64, "block count of inode {}", ino);

        if raw.is_dir() {
            let entries = read_dir(fs, &raw).unwrap();
            let mut seen = BTreeSet::new();
            assert_eq!(entries[0].name, b".");
            assert_eq!(entries[0].inode, ino, "'.' of {}", ino);
            assert_eq!(entries[1].name, b"..");
            if ino == 2 {
                assert_eq!(entries[1].inode, 2);
            }
            for e in &entries {
                assert!(seen.insert(e.name.clone()), "duplicate name in directory {}", ino);
                if e.name == b"." || e.name == b".." {
                    continue;
                }
                *names.entry(e.inode).or_default() += 1;
                let child = read_inode(groups, e.inode).unwrap();
                if child.is_dir() {
                    *subdirs.entry(ino).or_default() += 1;
                    let child_entries = read_dir(fs, &child).unwrap();
                    assert_eq!(child_entries[1].inode, ino, "'..' of {}", e.inode);
                }
            }
        }
    }

    // 链接数
    for &ino in &live {
        let raw = read_inode(groups, ino).unwrap();
        if raw.is_dir() {
            let subs = subdirs.get(&ino).copied().unwrap_or(0);
            assert_eq!(raw.links_count as u32, 2 + subs, "link count of directory {}", ino);
        } else {
            let refs = names.get(&ino).copied().unwrap_or(0);
            assert_eq!(raw.links_count as u32, refs, "link count of inode {}", ino);
        }
    }

    // 位图与引用集合一致
    for group in 0..geo.group_count {
        let bitmap = read_block(fs, descs[group as usize].block_bitmap);
        let first = geo.group_first_block(group);
        for index in 0..geo.blocks_in_group(group) {
            let block = first + index;
            assert_eq!(
                test_bit(&bitmap, index),
                referenced.contains(&block),
                "bitmap bit for block {} disagrees with references",
                block
            );
        }
    }
}

fn read_block(fs: &Ext2Fs, block: u32) -> Vec<u8> {
    let bs = fs.block_size() as usize;
    let buf = fs.cache().get(fs.dev(), block as u64, bs).unwrap();
    buf.with_data(|d| d.to_vec())
}

/// 卸载根卷并离线检查
pub fn shutdown_and_check(core: Core) {
    let Core { vfs, mem, actor, .. } = core;
    drop(actor);
    vfs.shutdown().unwrap();
    let fs = remount_offline(&mem);
    check_volume(&fs);
}
