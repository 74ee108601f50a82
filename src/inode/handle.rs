//! 内存中的 inode
//!
//! 每个被使用的 inode 在内存中只有一个 [`Inode`]，由文件系统的 inode 缓存以弱引用索引。
//! 两把锁各司其职：
//!
//! - `op_lock`：操作锁。读文件持共享锁；写文件、截断、修改目录持独占锁。
//! - `data`：磁盘记录的内存副本，只在读写字段时短暂持有。
//!
//! 锁序：op_lock → data → 块组描述符 → 块缓存。

use crate::{
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
    hal::SystemHal,
    sync::{self, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
    types::ext2_inode,
};
use alloc::sync::Weak;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU8, Ordering};

bitflags! {
    /// Inode 状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeState: u8 {
        /// 刚分配，尚未链接进任何目录
        const NEW = 0x01;
        /// 上次 fsync 之后被修改过
        const DIRTY = 0x02;
        /// 读取或回收失败，不再回收
        const BAD = 0x04;
    }
}

/// 内存中的 inode
pub struct Inode {
    ino: u32,
    fs: Weak<Ext2Fs>,
    op_lock: RwLock<()>,
    data: RwLock<ext2_inode>,
    state: AtomicU8,
    xattr_lock: Mutex<()>,
}

impl Inode {
    pub(crate) fn new(ino: u32, fs: Weak<Ext2Fs>, raw: ext2_inode, state: InodeState) -> Self {
        Self {
            ino,
            fs,
            op_lock: RwLock::new(()),
            data: RwLock::new(raw),
            state: AtomicU8::new(state.bits()),
            xattr_lock: Mutex::new(()),
        }
    }

    /// inode 编号
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// 所属文件系统
    pub(crate) fn fs(&self) -> Result<alloc::sync::Arc<Ext2Fs>> {
        self.fs
            .upgrade()
            .ok_or(Error::new(ErrorKind::Io, "filesystem is gone"))
    }

    /// 可中断地获取共享操作锁
    pub fn lock_shared(&self, hal: &dyn SystemHal) -> Result<RwLockReadGuard<'_, ()>> {
        sync::read_interruptible(&self.op_lock, hal)
    }

    /// 可中断地获取独占操作锁
    pub fn lock_exclusive(&self, hal: &dyn SystemHal) -> Result<RwLockWriteGuard<'_, ()>> {
        sync::write_interruptible(&self.op_lock, hal)
    }

    /// 扩展属性锁
    pub(crate) fn xattr_lock(&self) -> MutexGuard<'_, ()> {
        self.xattr_lock.lock()
    }

    /// 读取磁盘记录
    pub fn read(&self) -> RwLockReadGuard<'_, ext2_inode> {
        self.data.read()
    }

    /// 磁盘记录的副本
    pub fn snapshot(&self) -> ext2_inode {
        *self.data.read()
    }

    /// 修改磁盘记录并写入缓存
    ///
    /// 闭包内只能修改内存副本，不得再访问这个 inode。
    pub fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ext2_inode) -> R,
    {
        let fs = self.fs()?;
        let mut data = self.data.write();
        let result = f(&mut data);
        crate::inode::write_inode(fs.groups(), self.ino, &data)?;
        self.set_state(InodeState::DIRTY);
        Ok(result)
    }

    /// 在持有数据写锁的情况下执行一段可能失败的修改，随后写入缓存
    ///
    /// 闭包返回错误时，已经做出的修改同样会写入缓存。
    pub fn update_with<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ext2_inode) -> Result<R>,
    {
        let fs = self.fs()?;
        let mut data = self.data.write();
        let result = f(&mut data);
        crate::inode::write_inode(fs.groups(), self.ino, &data)?;
        self.set_state(InodeState::DIRTY);
        result
    }

    /// 当前状态
    pub fn state(&self) -> InodeState {
        InodeState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, flags: InodeState) {
        self.state.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_state(&self, flags: InodeState) {
        self.state.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.data.read().is_dir()
    }

    /// 文件大小
    pub fn size(&self) -> u64 {
        self.data.read().size()
    }

    /// 硬链接数
    pub fn links(&self) -> u16 {
        self.data.read().links_count
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        let raw = *self.data.get_mut();
        if raw.links_count != 0 || self.state().contains(InodeState::BAD) {
            return;
        }
        // 最后一个引用消失且已无链接：回收数据块与 inode
        if let Some(fs) = self.fs.upgrade() {
            if let Err(e) = fs.evict_inode(self.ino, raw) {
                log::error!("[INODE] failed to reclaim inode {}: {}", self.ino, e);
            }
        }
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("state", &self.state())
            .finish()
    }
}
