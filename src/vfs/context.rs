//! VFS 核心实例
//!
//! [`Vfs`] 持有进程级的共享状态：块缓存、驱动表、设备表、挂载树、事件登记表
//! 以及全局重命名锁。测试为每个用例创建一个新的实例。

use super::dentry::Dentry;
use super::mount::{Mount, MountTable, PathRef};
use super::ops::{FileSystemOps, FsDriver};
use super::watch::WatchRegistry;
use crate::block::BlockDev;
use crate::cache::BlockCache;
use crate::config::{FsConfig, MountFlags, MountOptions, UnmountFlags};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::Ext2Driver;
use crate::hal::{Capabilities, Credentials, SystemHal};
use crate::sync::{Mutex, RwLock};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// VFS 核心
pub struct Vfs {
    config: FsConfig,
    hal: Arc<dyn SystemHal>,
    cache: Arc<BlockCache>,
    drivers: RwLock<Vec<Arc<dyn FsDriver>>>,
    devices: RwLock<BTreeMap<String, Arc<BlockDev>>>,
    mounts: MountTable,
    watches: Arc<WatchRegistry>,
    rename_lock: Mutex<()>,
}

impl Vfs {
    /// 创建核心实例，并注册 ext2 驱动
    pub fn new(config: FsConfig, hal: Arc<dyn SystemHal>) -> Arc<Self> {
        let cache = Arc::new(BlockCache::new(config.bcache_size, hal.clone()));
        log::info!("[VFS] core initialised: {} cache buffers, {} descriptors per table", config.bcache_size, config.max_fds);
        Arc::new(Self {
            config,
            hal,
            cache,
            drivers: RwLock::new(vec![Arc::new(Ext2Driver) as Arc<dyn FsDriver>]),
            devices: RwLock::new(BTreeMap::new()),
            mounts: MountTable::new(),
            watches: Arc::new(WatchRegistry::new()),
            rename_lock: Mutex::new(()),
        })
    }

    /// 配置
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// 系统抽象层
    pub fn hal(&self) -> &Arc<dyn SystemHal> {
        &self.hal
    }

    /// 块缓存
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// 挂载树
    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// 事件登记表
    pub fn watches(&self) -> &Arc<WatchRegistry> {
        &self.watches
    }

    pub(crate) fn rename_lock(&self) -> &Mutex<()> {
        &self.rename_lock
    }

    /// 注册文件系统驱动
    ///
    /// # 错误
    ///
    /// - `AlreadyExists` - 同名驱动已注册
    pub fn register_driver(&self, driver: Arc<dyn FsDriver>) -> Result<()> {
        let mut drivers = self.drivers.write();
        if drivers.iter().any(|d| d.name() == driver.name()) {
            return Err(Error::new(ErrorKind::AlreadyExists, "driver already registered"));
        }
        log::info!("[VFS] driver '{}' registered", driver.name());
        drivers.push(driver);
        Ok(())
    }

    /// 以名字注册块设备（`mount` 的 `source`）
    ///
    /// # 错误
    ///
    /// - `AlreadyExists` - 名字已被占用
    pub fn register_device(&self, name: &str, dev: Arc<BlockDev>) -> Result<()> {
        let mut devices = self.devices.write();
        if devices.contains_key(name) {
            return Err(Error::new(ErrorKind::AlreadyExists, "device name already registered"));
        }
        log::debug!("[VFS] device '{}' registered as dev {}", name, dev.id());
        devices.insert(String::from(name), dev);
        Ok(())
    }

    /// 注销块设备
    ///
    /// # 错误
    ///
    /// - `NotFound` - 没有这个设备
    /// - `Busy` - 设备仍被挂载
    pub fn unregister_device(&self, name: &str) -> Result<Arc<BlockDev>> {
        let mut devices = self.devices.write();
        let dev = devices
            .get(name)
            .cloned()
            .ok_or(Error::new(ErrorKind::NotFound, "no such device"))?;
        if self.mounts.by_device(dev.id() as u64).is_some() {
            return Err(Error::new(ErrorKind::Busy, "device is mounted"));
        }
        devices.remove(name);
        Ok(dev)
    }

    fn mount_volume(
        &self,
        source: &str,
        fs_name: &str,
        flags: MountFlags,
        opts: &str,
    ) -> Result<(Arc<dyn FileSystemOps>, Arc<Dentry>)> {
        let mut options = MountOptions::parse(opts)?;
        if flags.contains(MountFlags::RDONLY) {
            options.read_only = true;
        }
        let bdev = self
            .devices
            .read()
            .get(source)
            .cloned()
            .ok_or(Error::new(ErrorKind::NotFound, "no such device"))?;
        let driver = self
            .drivers
            .read()
            .iter()
            .find(|d| d.name() == fs_name)
            .cloned()
            .ok_or(Error::new(ErrorKind::Unsupported, "unknown file system type"))?;
        if self.mounts.by_device(bdev.id() as u64).is_some() {
            return Err(Error::new(ErrorKind::Busy, "device already mounted"));
        }

        let fs = driver.mount(self.cache.clone(), bdev, self.hal.clone(), options)?;
        let root = match fs.root() {
            Ok(root) => root,
            Err(e) => {
                let _ = fs.unmount();
                return Err(e);
            }
        };
        Ok((fs, Dentry::new_root(root)))
    }

    /// 挂载根卷
    ///
    /// # 错误
    ///
    /// - `Busy` - 根卷已经挂载
    /// - 以及 [`Vfs::mount_volume`] 的错误
    pub fn mount_root(&self, source: &str, fs_name: &str, flags: MountFlags, opts: &str) -> Result<Arc<Mount>> {
        if self.mounts.root().is_some() {
            return Err(Error::new(ErrorKind::Busy, "root already mounted"));
        }
        let (fs, root) = self.mount_volume(source, fs_name, flags, opts)?;
        let mount = self.mounts.add(fs, root, None, flags, source);
        log::info!("[MOUNT] '{}' mounted as root ({})", source, fs_name);
        Ok(mount)
    }

    /// 把卷挂到 `target` 上
    pub(crate) fn mount_at(
        &self,
        cred: &Credentials,
        source: &str,
        target: &PathRef,
        fs_name: &str,
        flags: MountFlags,
        opts: &str,
    ) -> Result<Arc<Mount>> {
        if !cred.has_cap(Capabilities::SYS_ADMIN) {
            return Err(Error::new(ErrorKind::NotPermitted, "mount requires system administration"));
        }
        if !target.dentry.is_dir() {
            return Err(Error::new(ErrorKind::NotDirectory, "mount point is not a directory"));
        }
        if target.dentry.is_stale() {
            return Err(Error::new(ErrorKind::NotFound, "mount point was removed"));
        }
        target.mount.check_alive()?;
        let (fs, root) = self.mount_volume(source, fs_name, flags, opts)?;
        let mount = self.mounts.add(
            fs,
            root,
            Some((target.mount.clone(), target.dentry.clone())),
            flags,
            source,
        );
        log::info!("[MOUNT] '{}' mounted ({}), mount id {}", source, fs_name, mount.id());
        Ok(mount)
    }

    /// 卸载
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - 缺少系统管理能力
    /// - `Busy` - 根挂载、还有子挂载、或有打开的描述符且未指定 `FORCE`
    pub(crate) fn unmount_mount(&self, cred: &Credentials, mount: &Arc<Mount>, flags: UnmountFlags) -> Result<()> {
        if !cred.has_cap(Capabilities::SYS_ADMIN) {
            return Err(Error::new(ErrorKind::NotPermitted, "unmount requires system administration"));
        }
        if mount.parent().is_none() {
            return Err(Error::new(ErrorKind::Busy, "cannot unmount the root volume"));
        }
        if !self.mounts.children_of(mount).is_empty() {
            return Err(Error::new(ErrorKind::Busy, "volume has child mounts"));
        }
        let open = mount.open_files();
        if open > 0 {
            if !flags.contains(UnmountFlags::FORCE) {
                log::debug!("[MOUNT] '{}' busy: {} open descriptors", mount.source(), open);
                return Err(Error::new(ErrorKind::Busy, "volume has open descriptors"));
            }
            log::warn!("[MOUNT] forcing '{}' off with {} open descriptors", mount.source(), open);
        }
        self.detach(mount)
    }

    fn detach(&self, mount: &Arc<Mount>) -> Result<()> {
        mount.mark_stale();
        self.watches.device_gone(mount.fs().device_id());
        self.mounts.remove(mount);
        let pruned = mount.root().prune();
        log::info!("[MOUNT] '{}' unmounted ({} dentries pruned)", mount.source(), pruned);
        mount.fs().unmount()
    }

    /// 根位置
    pub fn root(&self) -> Result<PathRef> {
        let mount = self
            .mounts
            .root()
            .ok_or(Error::new(ErrorKind::NotFound, "no root volume mounted"))?;
        let root = mount.root().clone();
        Ok(PathRef::new(mount, root))
    }

    /// 把全部卷写回设备
    pub fn sync_all(&self) -> Result<()> {
        let mut first = None;
        for mount in self.mounts.all() {
            if let Err(e) = mount.fs().sync() {
                log::error!("[VFS] sync of '{}' failed: {}", mount.source(), e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// 回收全部挂载中没有外部引用的目录项
    pub fn prune_dentries(&self) -> usize {
        self.mounts.all().iter().map(|m| m.root().prune()).sum()
    }

    /// 关闭核心：按挂载顺序的逆序卸载全部卷
    ///
    /// 之后仍存活的描述符只能关闭。
    pub fn shutdown(&self) -> Result<()> {
        let mut first = None;
        for mount in self.mounts.all().iter().rev() {
            if let Err(e) = self.detach(mount) {
                log::error!("[VFS] unmount of '{}' failed during shutdown: {}", mount.source(), e);
                first.get_or_insert(e);
            }
        }
        log::info!("[VFS] core shut down");
        first.map_or(Ok(()), Err)
    }
}

impl core::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vfs")
            .field("mounts", &self.mounts.len())
            .field("devices", &self.devices.read().len())
            .field("watched_inodes", &self.watches.watched_inodes())
            .finish()
    }
}
