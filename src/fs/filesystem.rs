//! ext2 文件系统核心结构
//!
//! [`Ext2Fs`] 代表一个已挂载的卷：superblock、块组描述符表、inode 缓存，
//! 以及完整性错误的升级策略。具体的文件、目录操作分别在 `file.rs` 与 `namei.rs` 中实现。

use crate::{
    block::{BlockDev, DeviceId},
    block_group::GroupTable,
    cache::BlockCache,
    config::{ErrorsPolicy, MountOptions},
    consts::*,
    error::{Error, ErrorClass, ErrorKind, Result},
    hal::{SystemHal, Timespec},
    ialloc,
    indirect::IndirectBlockMapper,
    inode::{read_inode, validate_inode, write_inode, Inode, InodeState},
    superblock::{Geometry, Superblock},
    sync::Mutex,
    types::ext2_inode,
    xattr,
};
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::types::StatFs;

/// 已挂载的 ext2 卷
///
/// # 示例
///
/// ```rust,ignore
/// let cache = Arc::new(BlockCache::new(DEFAULT_CACHE_SIZE, hal.clone()));
/// let fs = Ext2Fs::mount(cache, dev, hal, MountOptions::default())?;
///
/// let root = fs.root()?;
/// println!("root links: {}", root.links());
///
/// fs.unmount()?;
/// ```
pub struct Ext2Fs {
    dev: DeviceId,
    cache: Arc<BlockCache>,
    hal: Arc<dyn SystemHal>,
    sb: Mutex<Superblock>,
    groups: GroupTable,
    geo: Geometry,
    mapper: IndirectBlockMapper,
    icache: Mutex<BTreeMap<u32, Weak<Inode>>>,
    opts: MountOptions,
    policy: ErrorsPolicy,
    read_only: AtomicBool,
    shutdown: AtomicBool,
    next_generation: AtomicU32,
    self_ref: Weak<Ext2Fs>,
}

impl Ext2Fs {
    /// 挂载文件系统
    ///
    /// # 参数
    ///
    /// * `cache` - 全局块缓存（设备在这里注册）
    /// * `bdev` - 块设备
    /// * `hal` - 时钟与身份
    /// * `opts` - 挂载选项
    ///
    /// # 错误
    ///
    /// - `ErrorKind::Corrupted` - superblock、描述符或根目录无效
    /// - `ErrorKind::Unsupported` - 卷使用了不认识的不兼容特性
    /// - `ErrorKind::Io` - 设备读取失败
    ///
    /// 失败时设备的全部缓冲区被丢弃，缓存恢复到挂载前的状态。
    pub fn mount(
        cache: Arc<BlockCache>,
        bdev: Arc<BlockDev>,
        hal: Arc<dyn SystemHal>,
        opts: MountOptions,
    ) -> Result<Arc<Self>> {
        let dev = bdev.id();
        cache.register_device(bdev.clone());
        let fs = match Self::build(cache.clone(), &bdev, hal, opts) {
            Ok(fs) => fs,
            Err(e) => {
                log::error!("[MOUNT] dev={} mount failed: {}", dev, e);
                if let Err(e) = cache.invalidate_device(dev) {
                    log::warn!("[MOUNT] dev={} could not drop buffers: {}", dev, e);
                }
                let _ = cache.unregister_device(dev);
                return Err(e);
            }
        };
        Ok(fs)
    }

    fn build(
        cache: Arc<BlockCache>,
        bdev: &BlockDev,
        hal: Arc<dyn SystemHal>,
        opts: MountOptions,
    ) -> Result<Arc<Self>> {
        let dev = bdev.id();
        let mut sb = Superblock::load(bdev)?;
        let geo = sb.geometry();
        let groups = GroupTable::load(cache.clone(), dev, geo)?;

        let read_only = opts.read_only || sb.forced_read_only() || bdev.is_read_only();
        let policy = opts.errors.unwrap_or_else(|| ErrorsPolicy::from_raw(sb.errors()));

        if !sb.was_clean() {
            log::warn!("[MOUNT] dev={} was not cleanly unmounted or has errors", dev);
        }

        let (free_blocks, free_inodes) = groups.free_totals();
        sb.set_free_counts(free_blocks, free_inodes);

        let fs = Arc::new_cyclic(|self_ref| Self {
            dev,
            cache,
            mapper: IndirectBlockMapper::new(geo.block_size),
            hal,
            sb: Mutex::new(sb),
            groups,
            geo,
            icache: Mutex::new(BTreeMap::new()),
            opts,
            policy,
            read_only: AtomicBool::new(read_only),
            shutdown: AtomicBool::new(false),
            next_generation: AtomicU32::new(0),
            self_ref: self_ref.clone(),
        });

        let root = fs.get_inode(EXT2_ROOT_INO)?;
        if !root.is_dir() || root.links() < 2 {
            log::error!("[MOUNT] dev={} root inode is not a directory", dev);
            return Err(Error::new(ErrorKind::Corrupted, "root inode is not a directory"));
        }
        drop(root);

        if !read_only {
            let now = fs.hal.now();
            let mut sb = fs.sb.lock();
            fs.next_generation.store(now.sec as u32, Ordering::Relaxed);
            sb.record_mount(now);
            sb.write_primary(&fs.cache, dev)?;
        }

        log::info!(
            "[MOUNT] dev={} ext2 mounted: {} blocks of {} bytes, {} groups, {}",
            dev,
            geo.blocks_count,
            geo.block_size,
            geo.group_count,
            if read_only { "ro" } else { "rw" }
        );
        Ok(fs)
    }

    /// 设备标识
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    /// 块缓存
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// 时钟与身份
    pub fn hal(&self) -> &dyn SystemHal {
        &*self.hal
    }

    /// 当前时间
    pub fn now(&self) -> Timespec {
        self.hal.now()
    }

    /// 几何参数
    pub fn geo(&self) -> &Geometry {
        &self.geo
    }

    /// 块大小
    pub fn block_size(&self) -> u32 {
        self.geo.block_size
    }

    /// 块组描述符表
    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    /// 间接块映射器
    pub fn mapper(&self) -> &IndirectBlockMapper {
        &self.mapper
    }

    /// 挂载选项
    pub fn options(&self) -> &MountOptions {
        &self.opts
    }

    /// 完整性错误策略
    pub fn errors_policy(&self) -> ErrorsPolicy {
        self.policy
    }

    /// superblock 快照
    pub fn superblock(&self) -> Superblock {
        self.sb.lock().clone()
    }

    /// 卷是否只读
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// 卷是否已停止服务
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// 检查卷是否仍在服务
    pub fn check_alive(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::new(ErrorKind::Io, "filesystem has been shut down"));
        }
        Ok(())
    }

    /// 检查卷是否允许修改
    pub fn check_writable(&self) -> Result<()> {
        self.check_alive()?;
        if self.is_read_only() {
            return Err(Error::new(ErrorKind::ReadOnly, "read-only filesystem"));
        }
        Ok(())
    }

    /// 按卷的 errors 策略处理一个错误
    ///
    /// 非完整性错误原样返回。
    pub fn fs_error(&self, err: Error) -> Error {
        if err.kind().class() != ErrorClass::Integrity {
            return err;
        }
        self.sb.lock().mark_error();
        match self.policy {
            ErrorsPolicy::Continue => {
                log::error!("[EXT2] dev={} {} (continuing)", self.dev, err);
            }
            ErrorsPolicy::RemountReadOnly => {
                if !self.read_only.swap(true, Ordering::AcqRel) {
                    log::error!("[EXT2] dev={} {}; remounting read-only", self.dev, err);
                }
            }
            ErrorsPolicy::Panic => {
                if !self.shutdown.swap(true, Ordering::AcqRel) {
                    log::error!("[EXT2] dev={} {}; shutting filesystem down", self.dev, err);
                }
            }
        }
        err
    }

    /// 对结果应用 errors 策略
    pub fn escalate<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|e| self.fs_error(e))
    }

    /// 根目录
    pub fn root(&self) -> Result<Arc<Inode>> {
        self.get_inode(EXT2_ROOT_INO)
    }

    /// 获取内存中的 inode（必要时从磁盘读入）
    ///
    /// 同一个 inode 在内存中只有一个实例。
    pub fn get_inode(&self, ino: u32) -> Result<Arc<Inode>> {
        self.check_alive()?;
        let mut icache = self.icache.lock();
        if let Some(inode) = icache.get(&ino).and_then(Weak::upgrade) {
            return Ok(inode);
        }

        let raw = read_inode(&self.groups, ino)?;
        if raw.mode == 0 || (raw.links_count == 0 && raw.dtime != 0) {
            log::error!("[INODE] reference to free inode {}", ino);
            return Err(Error::new(ErrorKind::Corrupted, "reference to free inode"));
        }
        validate_inode(ino, &raw)?;

        let inode = Arc::new(Inode::new(ino, self.self_ref.clone(), raw, InodeState::empty()));
        icache.insert(ino, Arc::downgrade(&inode));
        log::trace!("[INODE] loaded inode {}", ino);
        Ok(inode)
    }

    /// 分配一个新 inode 并初始化其磁盘记录
    ///
    /// 返回的 inode 链接数为 0、带 `NEW` 状态；调用者负责链接进目录。
    pub(crate) fn new_inode(&self, parent: &Inode, mode: u32, uid: u32, gid: u32) -> Result<Arc<Inode>> {
        self.check_writable()?;
        let is_dir = mode & S_IFMT == S_IFDIR;
        let (parent_group, _) = self.geo.ino_to_group(parent.ino());
        let ino = ialloc::alloc_inode(&self.groups, parent_group, is_dir)?;

        let now = self.now();
        let mut raw = ext2_inode {
            mode: mode as u16,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            ..Default::default()
        };
        raw.set_uid(uid);
        raw.set_gid(gid);
        raw.set_atime(now);
        raw.set_mtime(now);
        raw.set_ctime(now);
        raw.crtime = now.sec as u32;
        if self.geo.inode_size >= EXT2_INODE_SIZE_WITH_NSEC {
            raw.extra_isize = EXT2_EXTRA_ISIZE;
        }
        // 目录继承父目录的同步与不更新访问时间标志
        raw.flags = parent.read().flags & (EXT2_SYNC_FL | EXT2_NOATIME_FL);

        if let Err(e) = write_inode(&self.groups, ino, &raw) {
            if let Err(undo) = ialloc::free_inode(&self.groups, ino, is_dir) {
                log::error!("[IALLOC] rollback of inode {} failed: {}", ino, undo);
            }
            return Err(e);
        }

        let inode = Arc::new(Inode::new(ino, self.self_ref.clone(), raw, InodeState::NEW));
        self.icache.lock().insert(ino, Arc::downgrade(&inode));
        log::debug!("[INODE] allocated inode {} mode {:#o}", ino, mode);
        Ok(inode)
    }

    /// 是否为快速符号链接（目标内联在块指针数组里）
    pub fn is_fast_symlink(&self, raw: &ext2_inode) -> bool {
        let xattr_sectors = if raw.file_acl != 0 { self.geo.block_size / EXT2_IBLOCK_UNIT as u32 } else { 0 };
        raw.is_symlink() && raw.blocks == xattr_sectors
    }

    /// 回收一个已无链接、也无内存引用的 inode
    ///
    /// 释放数据块、间接表和扩展属性块，清除 inode 位图中的位。
    pub(crate) fn evict_inode(&self, ino: u32, mut raw: ext2_inode) -> Result<()> {
        {
            let mut icache = self.icache.lock();
            if icache.get(&ino).map_or(false, |w| w.strong_count() == 0) {
                icache.remove(&ino);
            }
        }
        if self.is_shutdown() || self.is_read_only() {
            log::warn!("[INODE] skipping reclamation of inode {} on read-only volume", ino);
            return Ok(());
        }

        let is_dir = raw.is_dir();
        let result = (|| {
            if raw.file_acl != 0 {
                xattr::release_block(self, raw.file_acl)?;
                raw.file_acl = 0;
            }
            if !self.is_fast_symlink(&raw) {
                self.mapper.free_range(&self.groups, &mut raw, 0, None)?;
            }
            raw.block = [0; EXT2_N_BLOCKS];
            raw.blocks = 0;
            raw.set_size(0);
            raw.dtime = self.now().sec as u32;
            write_inode(&self.groups, ino, &raw)?;
            ialloc::free_inode(&self.groups, ino, is_dir)
        })();

        match result {
            Ok(()) => {
                log::debug!("[INODE] reclaimed inode {}", ino);
                Ok(())
            }
            Err(e) => Err(self.fs_error(e)),
        }
    }

    /// 把聚合计数写回 superblock 并同步设备
    pub fn sync_fs(&self) -> Result<()> {
        self.check_alive()?;
        if !self.is_read_only() {
            let (free_blocks, free_inodes) = self.groups.free_totals();
            let mut sb = self.sb.lock();
            sb.set_free_counts(free_blocks, free_inodes);
            sb.update_write_time(self.now());
            sb.write_primary(&self.cache, self.dev)?;
        }
        self.cache.sync(self.dev)
    }

    /// 卸载
    ///
    /// 写回全部脏块、刷新 superblock 与描述符备份、标记干净状态，
    /// 然后从缓存注销设备。之后任何操作都返回 I/O 错误。
    pub fn unmount(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            log::warn!("[MOUNT] dev={} unmounting a shut-down volume", self.dev);
            return self.release_device();
        }

        if !self.is_read_only() {
            let (free_blocks, free_inodes) = self.groups.free_totals();
            {
                let mut sb = self.sb.lock();
                sb.set_free_counts(free_blocks, free_inodes);
                sb.update_write_time(self.now());
                sb.mark_clean();
                sb.write_primary(&self.cache, self.dev)?;
                sb.write_backups(&self.cache, self.dev)?;
            }
            self.groups.write_backups()?;
        }
        self.cache.sync(self.dev)?;
        log::info!("[MOUNT] dev={} unmounted", self.dev);
        self.release_device()
    }

    fn release_device(&self) -> Result<()> {
        if let Err(e) = self.cache.invalidate_device(self.dev) {
            log::warn!("[MOUNT] dev={} buffers still pinned at unmount: {}", self.dev, e);
            return Ok(());
        }
        self.cache.unregister_device(self.dev)
    }

    /// 卷统计信息
    pub fn statfs(&self) -> Result<StatFs> {
        self.check_alive()?;
        let (free_blocks, free_inodes) = self.groups.free_totals();
        let reserved = self.sb.lock().inner().r_blocks_count as u64;
        let uuid = *self.sb.lock().uuid();
        let mut fsid = [0u8; 8];
        fsid.copy_from_slice(&uuid[..8]);
        Ok(StatFs {
            block_size: self.geo.block_size,
            blocks_count: self.geo.blocks_count as u64,
            free_blocks_count: free_blocks as u64,
            available_blocks: (free_blocks as u64).saturating_sub(reserved),
            inodes_count: self.geo.inodes_count,
            free_inodes_count: free_inodes,
            fsid: u64::from_le_bytes(fsid),
            name_max: EXT2_NAME_MAX as u32,
        })
    }

    /// 仍在内存中的 inode 数
    pub fn cached_inodes(&self) -> usize {
        self.icache.lock().values().filter(|w| w.strong_count() > 0).count()
    }
}

impl core::fmt::Debug for Ext2Fs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ext2Fs")
            .field("dev", &self.dev)
            .field("block_size", &self.geo.block_size)
            .field("read_only", &self.is_read_only())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::fs::mkfs::{format, FormatOptions};
    use crate::hal::NullHal;
    use alloc::boxed::Box;

    /// 格式化并挂载一个内存卷
    pub fn mount_test_fs(bytes: usize, fmt: FormatOptions, opts: MountOptions) -> (Arc<Ext2Fs>, MemBlockDevice) {
        let mem = MemBlockDevice::new(bytes);
        let dev = Arc::new(BlockDev::new(7, Box::new(mem.clone())).unwrap());
        format(&dev, &fmt).unwrap();
        let hal: Arc<dyn SystemHal> = Arc::new(NullHal);
        let cache = Arc::new(BlockCache::new(128, hal.clone()));
        (Ext2Fs::mount(cache, dev, hal, opts).unwrap(), mem)
    }

    #[test]
    fn test_mount_and_unmount_marks_clean() {
        let (fs, mem) = mount_test_fs(2 * 1024 * 1024, FormatOptions::default(), MountOptions::default());
        assert!(!fs.is_read_only());
        assert!(!fs.superblock().was_clean());
        let root = fs.root().unwrap();
        assert!(root.is_dir());
        assert_eq!(root.links(), 3);
        drop(root);
        fs.unmount().unwrap();
        assert_eq!(fs.root().unwrap_err().kind(), ErrorKind::Io);

        let dev = BlockDev::new(8, Box::new(mem)).unwrap();
        let sb = Superblock::load(&dev).unwrap();
        assert!(sb.was_clean());
        assert_eq!(sb.inner().mnt_count, 1);
    }

    #[test]
    fn test_mount_rejects_bad_magic() {
        let mem = MemBlockDevice::new(1024 * 1024);
        let dev = Arc::new(BlockDev::new(9, Box::new(mem)).unwrap());
        let hal: Arc<dyn SystemHal> = Arc::new(NullHal);
        let cache = Arc::new(BlockCache::new(16, hal.clone()));
        let err = Ext2Fs::mount(cache.clone(), dev, hal, MountOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
        assert!(cache.device(9).is_err());
    }

    #[test]
    fn test_errors_policy_escalation() {
        let opts = MountOptions { errors: Some(ErrorsPolicy::RemountReadOnly), ..Default::default() };
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), opts);
        let user_err = fs.fs_error(Error::new(ErrorKind::NotFound, "x"));
        assert_eq!(user_err.kind(), ErrorKind::NotFound);
        assert!(!fs.is_read_only());
        fs.fs_error(Error::new(ErrorKind::Corrupted, "bad bitmap"));
        assert!(fs.is_read_only());
        assert_eq!(fs.check_writable().unwrap_err().kind(), ErrorKind::ReadOnly);

        let opts = MountOptions { errors: Some(ErrorsPolicy::Panic), ..Default::default() };
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), opts);
        fs.fs_error(Error::new(ErrorKind::Io, "device"));
        assert_eq!(fs.statfs().unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_inode_cache_shares_instances() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let a = fs.get_inode(EXT2_ROOT_INO).unwrap();
        let b = fs.get_inode(EXT2_ROOT_INO).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fs.get_inode(12).unwrap_err().kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_statfs_matches_format() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let st = fs.statfs().unwrap();
        assert_eq!(st.block_size, 1024);
        assert_eq!(st.blocks_count, 1024);
        assert_eq!(st.free_inodes_count, st.inodes_count - 11);
        assert_eq!(st.name_max, 255);
    }
}
