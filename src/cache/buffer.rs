//! 缓存块结构

use crate::block::DeviceId;
use crate::error::{Error, ErrorKind, Result};
use crate::sync::WaitQueue;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use spin::Mutex;

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// 数据有效
        const VALID    = 0x01;
        /// 数据已修改（脏）
        const DIRTY    = 0x02;
        /// 设备读取进行中
        const UNDER_IO = 0x04;
        /// 数据正被某个持有者修改
        const LOCKED   = 0x08;
        /// 设备读取失败，直到被显式驱逐前一直有效
        const ERROR    = 0x10;
    }
}

/// 缓存键：(设备, 块号)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufKey {
    /// 设备标识
    pub dev: DeviceId,
    /// 文件系统块号
    pub lba: u64,
}

impl BufKey {
    /// 创建缓存键
    pub const fn new(dev: DeviceId, lba: u64) -> Self {
        Self { dev, lba }
    }
}

/// 缓存块
///
/// # 字段说明
///
/// - `key`: (设备, 块号)
/// - `data`: 块数据，互斥锁即缓冲区锁（锁序中的叶子）
/// - `pins`: 引用计数，大于 0 时块不能被驱逐
/// - `flags`: 块状态标志
/// - `io_done`: 等待设备读取完成的队列
pub struct CacheBuffer {
    key: BufKey,
    pub(crate) data: Mutex<Vec<u8>>,
    pins: AtomicU32,
    flags: AtomicU8,
    pub(crate) io_done: WaitQueue,
}

impl core::fmt::Debug for CacheBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheBuffer")
            .field("key", &self.key)
            .field("pins", &self.pin_count())
            .field("flags", &self.flags())
            .finish()
    }
}

impl CacheBuffer {
    /// 创建新的缓存块
    ///
    /// # 参数
    ///
    /// * `key` - 缓存键
    /// * `block_size` - 块大小（字节）
    /// * `flags` - 初始标志
    ///
    /// # 错误
    ///
    /// 内存不足时返回 `NoMemory`
    pub fn new(key: BufKey, block_size: usize, flags: CacheFlags) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(block_size)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate cache buffer"))?;
        data.resize(block_size, 0);

        Ok(Self {
            key,
            data: Mutex::new(data),
            pins: AtomicU32::new(0),
            flags: AtomicU8::new(flags.bits()),
            io_done: WaitQueue::new(),
        })
    }

    /// 缓存键
    pub fn key(&self) -> BufKey {
        self.key
    }

    /// 块大小
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// 增加引用计数
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    /// 减少引用计数
    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced buffer unpin");
    }

    /// 当前引用计数
    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }

    /// 当前标志
    pub fn flags(&self) -> CacheFlags {
        CacheFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, flags: CacheFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_flags(&self, flags: CacheFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// 是否有效
    pub fn is_valid(&self) -> bool {
        self.flags().contains(CacheFlags::VALID)
    }

    /// 是否为脏
    pub fn is_dirty(&self) -> bool {
        self.flags().contains(CacheFlags::DIRTY)
    }

    /// 是否正在等待设备读取
    pub fn is_under_io(&self) -> bool {
        self.flags().contains(CacheFlags::UNDER_IO)
    }

    /// 是否处于读取失败状态
    pub fn has_error(&self) -> bool {
        self.flags().contains(CacheFlags::ERROR)
    }

    /// 是否可以被驱逐（未被引用、干净、无进行中的 I/O）
    pub fn is_evictable(&self) -> bool {
        self.pin_count() == 0
            && !self
                .flags()
                .intersects(CacheFlags::DIRTY | CacheFlags::UNDER_IO | CacheFlags::LOCKED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags() {
        let buf = CacheBuffer::new(BufKey::new(1, 7), 1024, CacheFlags::UNDER_IO).unwrap();
        assert_eq!(buf.len(), 1024);
        assert!(buf.is_under_io());
        assert!(!buf.is_evictable());

        buf.clear_flags(CacheFlags::UNDER_IO);
        buf.set_flags(CacheFlags::VALID);
        assert!(buf.is_valid());
        assert!(buf.is_evictable());

        buf.pin();
        assert!(!buf.is_evictable());
        buf.unpin();
        buf.set_flags(CacheFlags::DIRTY);
        assert!(buf.is_dirty());
        assert!(!buf.is_evictable());
    }
}
