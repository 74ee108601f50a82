//! 块缓存管理器
//!
//! 以 (设备, 块号) 为键的全局缓冲区缓存。索引由 `lru::LruCache` 维护访问顺序，
//! 脏块另外记录在 `BTreeSet` 中，以便按设备顺序写回。
//!
//! # 设计原理
//!
//! ```text
//! BlockCache {
//!     index: Mutex<CacheIndex {
//!         lru: LruCache<BufKey, Arc<CacheBuffer>>,  // O(1)，自动LRU
//!         dirty: BTreeSet<BufKey>,                   // 追踪脏块
//!     }>,
//!     devices: RwLock<BTreeMap<DeviceId, Arc<BlockDev>>>,
//! }
//! ```
//!
//! 锁序：索引锁 → 缓冲区数据锁 → 设备锁。持有缓冲区数据锁时绝不获取索引锁。

use super::buffer::{BufKey, CacheBuffer, CacheFlags};
use crate::block::{Block, BlockDev, DeviceId};
use crate::error::{Error, ErrorKind, Result};
use crate::hal::SystemHal;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use lru::LruCache;
use spin::{Mutex, RwLock};

pub use crate::config::DEFAULT_CACHE_SIZE;

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 驱逐次数
    pub evictions: u64,
    /// 写回次数
    pub writebacks: u64,
    /// 设备读取失败次数
    pub read_errors: u64,
    /// 因全部缓冲区被引用而超出容量的次数
    pub overcommits: u64,
    /// 当前缓冲区数量
    pub used: usize,
    /// 容量
    pub capacity: usize,
    /// 脏块数量
    pub dirty_blocks: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
    read_errors: AtomicU64,
    overcommits: AtomicU64,
}

struct CacheIndex {
    lru: LruCache<BufKey, Arc<CacheBuffer>>,
    dirty: BTreeSet<BufKey>,
}

/// 块缓存
pub struct BlockCache {
    index: Mutex<CacheIndex>,
    devices: RwLock<BTreeMap<DeviceId, Arc<BlockDev>>>,
    hal: Arc<dyn SystemHal>,
    capacity: usize,
    counters: Counters,
}

impl BlockCache {
    /// 创建块缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 干净缓冲区的目标上限（块数）
    /// * `hal` - 用于等待 I/O 完成时的中断检查与让出
    pub fn new(capacity: usize, hal: Arc<dyn SystemHal>) -> Self {
        Self {
            index: Mutex::new(CacheIndex {
                lru: LruCache::unbounded(),
                dirty: BTreeSet::new(),
            }),
            devices: RwLock::new(BTreeMap::new()),
            hal,
            capacity: capacity.max(1),
            counters: Counters::default(),
        }
    }

    /// 注册设备
    pub fn register_device(&self, dev: Arc<BlockDev>) {
        log::debug!("[CACHE] register device {}", dev.id());
        self.devices.write().insert(dev.id(), dev);
    }

    /// 注销设备：写回其全部脏块并丢弃缓冲区
    pub fn unregister_device(&self, dev: DeviceId) -> Result<()> {
        self.sync(dev)?;
        self.invalidate_device(dev)?;
        self.devices.write().remove(&dev);
        Ok(())
    }

    /// 查找已注册的设备
    pub fn device(&self, dev: DeviceId) -> Result<Arc<BlockDev>> {
        self.devices
            .read()
            .get(&dev)
            .cloned()
            .ok_or(Error::new(ErrorKind::NotFound, "device not registered with cache"))
    }

    /// 获取块（必要时从设备读取），返回被引用的有效缓冲区
    ///
    /// 同一个键上的并发 `get` 合并为一次设备读取；其余调用者等待读取完成。
    ///
    /// # 错误
    ///
    /// - `Io` - 设备读取失败，或该键处于失败状态（直到 [`evict`](Self::evict)）
    /// - `Interrupted` - 等待 I/O 时被信号中断
    pub fn get(&self, dev: DeviceId, lba: u64, block_size: usize) -> Result<Block<'_>> {
        let device = self.device(dev)?;
        let (buf, fresh) = self.lookup_or_insert(BufKey::new(dev, lba), block_size)?;
        let block = Block::new(self, buf);

        if fresh {
            self.fill(&device, block.buffer())?;
        } else {
            let buf = block.buffer();
            buf.io_done.wait_until(&*self.hal, || !buf.is_under_io())?;
            if buf.has_error() {
                return Err(Error::new(ErrorKind::Io, "buffer is in read-error state"));
            }
        }
        Ok(block)
    }

    /// 获取块但不读取设备：缓冲区被清零并标记为有效
    pub fn get_zero(&self, dev: DeviceId, lba: u64, block_size: usize) -> Result<Block<'_>> {
        self.device(dev)?;
        let (buf, fresh) = self.lookup_or_insert(BufKey::new(dev, lba), block_size)?;
        let block = Block::new(self, buf);
        let buf = block.buffer();

        if !fresh {
            buf.io_done.wait_until(&*self.hal, || !buf.is_under_io())?;
        }
        buf.data.lock().fill(0);
        buf.set_flags(CacheFlags::VALID);
        buf.clear_flags(CacheFlags::UNDER_IO | CacheFlags::ERROR);
        buf.io_done.wake_all();
        Ok(block)
    }

    fn lookup_or_insert(&self, key: BufKey, block_size: usize) -> Result<(Arc<CacheBuffer>, bool)> {
        let mut idx = self.index.lock();
        if let Some(buf) = idx.lru.get(&key).cloned() {
            if buf.len() != block_size {
                return Err(Error::new(ErrorKind::InvalidInput, "cached block size mismatch"));
            }
            buf.pin();
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((buf, false));
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.make_room(&mut idx);

        let buf = Arc::new(CacheBuffer::new(key, block_size, CacheFlags::UNDER_IO)?);
        buf.pin();
        idx.lru.put(key, buf.clone());
        log::trace!("[CACHE] insert dev={} lba={}", key.dev, key.lba);
        Ok((buf, true))
    }

    /// 驱逐最久未使用的干净缓冲区；没有干净缓冲区时先写回一个未被引用的脏块
    fn make_room(&self, idx: &mut CacheIndex) {
        while idx.lru.len() >= self.capacity {
            let victim = idx
                .lru
                .iter()
                .rev()
                .find(|(_, b)| b.is_evictable())
                .map(|(k, _)| *k);
            if let Some(key) = victim {
                idx.lru.pop(&key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let dirty_victim = idx
                .lru
                .iter()
                .rev()
                .find(|(_, b)| b.pin_count() == 0 && b.is_dirty() && !b.is_under_io())
                .map(|(_, b)| b.clone());
            match dirty_victim {
                Some(buf) => match self.write_back(&buf) {
                    Ok(()) => {
                        let key = buf.key();
                        idx.dirty.remove(&key);
                        idx.lru.pop(&key);
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        log::warn!("[CACHE] write-back before eviction failed: {}", e);
                        break;
                    }
                },
                None => {
                    self.counters.overcommits.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "[CACHE] all {} buffers pinned, growing past capacity",
                        idx.lru.len()
                    );
                    break;
                }
            }
        }
    }

    fn fill(&self, device: &BlockDev, buf: &CacheBuffer) -> Result<()> {
        let result = {
            let mut data = buf.data.lock();
            device.read_block(buf.key().lba, &mut data)
        };
        match &result {
            Ok(()) => {
                buf.set_flags(CacheFlags::VALID);
                buf.clear_flags(CacheFlags::UNDER_IO | CacheFlags::ERROR);
            }
            Err(e) => {
                log::error!(
                    "[CACHE] read dev={} lba={} failed: {}",
                    buf.key().dev,
                    buf.key().lba,
                    e
                );
                self.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                buf.set_flags(CacheFlags::ERROR);
                buf.clear_flags(CacheFlags::UNDER_IO | CacheFlags::VALID);
            }
        }
        buf.io_done.wake_all();
        result
    }

    /// 把一个脏缓冲区写到设备，成功后清除脏标志
    fn write_back(&self, buf: &CacheBuffer) -> Result<()> {
        let device = self.device(buf.key().dev)?;
        let data = buf.data.lock();
        if !buf.is_dirty() {
            return Ok(());
        }
        buf.clear_flags(CacheFlags::DIRTY);
        if let Err(e) = device.write_block(buf.key().lba, &data) {
            buf.set_flags(CacheFlags::DIRTY);
            log::error!(
                "[CACHE] write dev={} lba={} failed: {}",
                buf.key().dev,
                buf.key().lba,
                e
            );
            return Err(e);
        }
        self.counters.writebacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 记录一个待写回的修改
    pub fn mark_dirty(&self, buf: &CacheBuffer) {
        buf.set_flags(CacheFlags::DIRTY);
        self.index.lock().dirty.insert(buf.key());
    }

    /// 释放一次引用
    pub fn put(&self, buf: &CacheBuffer) {
        buf.unpin();
    }

    /// 立即写回单个缓冲区（写穿）
    pub fn flush_buffer(&self, buf: &CacheBuffer) -> Result<()> {
        self.write_back(buf)?;
        self.settle_clean(buf);
        Ok(())
    }

    /// 写回成功后把缓冲区移出脏集合
    ///
    /// 脏标志在索引锁内检查；写回之后被 `mark_dirty` 重新置脏的缓冲区留在脏集合中。
    fn settle_clean(&self, buf: &CacheBuffer) {
        let mut idx = self.index.lock();
        if !buf.is_dirty() {
            idx.dirty.remove(&buf.key());
        }
    }

    /// 写回设备的全部脏块，并在设备确认后返回
    pub fn sync(&self, dev: DeviceId) -> Result<()> {
        let device = self.device(dev)?;
        let pending: Vec<Arc<CacheBuffer>> = {
            let idx = self.index.lock();
            idx.dirty
                .range(BufKey::new(dev, 0)..=BufKey::new(dev, u64::MAX))
                .filter_map(|k| idx.lru.peek(k).cloned())
                .collect()
        };

        let mut first_err = None;
        for buf in pending.iter() {
            buf.pin();
            let result = self.write_back(buf);
            buf.unpin();
            match result {
                Ok(()) => self.settle_clean(buf),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        device.flush()?;
        log::debug!("[CACHE] sync dev={} wrote {} buffers", dev, pending.len());
        Ok(())
    }

    /// 写回所有设备的脏块
    pub fn sync_all(&self) -> Result<()> {
        let ids: Vec<DeviceId> = self.devices.read().keys().copied().collect();
        for id in ids {
            self.sync(id)?;
        }
        Ok(())
    }

    /// 显式驱逐一个缓冲区（清除读失败状态的唯一途径）
    ///
    /// 脏块先写回；被引用的缓冲区返回 `Busy`。
    pub fn evict(&self, dev: DeviceId, lba: u64) -> Result<()> {
        let key = BufKey::new(dev, lba);
        let mut idx = self.index.lock();
        let buf = match idx.lru.peek(&key) {
            Some(buf) => buf.clone(),
            None => return Ok(()),
        };
        if buf.pin_count() > 0 {
            return Err(Error::new(ErrorKind::Busy, "buffer is pinned"));
        }
        if buf.is_dirty() && !buf.has_error() {
            self.write_back(&buf)?;
        }
        idx.dirty.remove(&key);
        idx.lru.pop(&key);
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 丢弃一个已释放块的缓冲区（不写回）
    pub fn forget(&self, dev: DeviceId, lba: u64) {
        let key = BufKey::new(dev, lba);
        let mut idx = self.index.lock();
        let removable = idx.lru.peek(&key).map(|b| b.pin_count() == 0).unwrap_or(false);
        if removable {
            idx.lru.pop(&key);
            idx.dirty.remove(&key);
        }
    }

    /// 丢弃设备的全部缓冲区（不写回）
    pub fn invalidate_device(&self, dev: DeviceId) -> Result<()> {
        let mut idx = self.index.lock();
        let keys: Vec<BufKey> = idx
            .lru
            .iter()
            .filter(|(k, _)| k.dev == dev)
            .map(|(k, _)| *k)
            .collect();
        if keys
            .iter()
            .any(|k| idx.lru.peek(k).map(|b| b.pin_count() > 0).unwrap_or(false))
        {
            return Err(Error::new(ErrorKind::Busy, "device buffers still pinned"));
        }
        for key in keys {
            idx.lru.pop(&key);
            idx.dirty.remove(&key);
        }
        Ok(())
    }

    /// 缓存中是否存在某个键
    pub fn contains(&self, dev: DeviceId, lba: u64) -> bool {
        self.index.lock().lru.contains(&BufKey::new(dev, lba))
    }

    /// 获取缓存统计信息
    pub fn stats(&self) -> CacheStats {
        let idx = self.index.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            writebacks: self.counters.writebacks.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
            overcommits: self.counters.overcommits.load(Ordering::Relaxed),
            used: idx.lru.len(),
            capacity: self.capacity,
            dirty_blocks: idx.dirty.len(),
        }
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::hal::NullHal;
    use alloc::boxed::Box;

    fn setup(capacity: usize) -> (BlockCache, MemBlockDevice) {
        let ram = MemBlockDevice::new(64 * 1024);
        let cache = BlockCache::new(capacity, Arc::new(NullHal));
        let dev = BlockDev::new(1, Box::new(ram.clone())).unwrap();
        cache.register_device(Arc::new(dev));
        (cache, ram)
    }

    #[test]
    fn test_get_reads_through() {
        let (cache, ram) = setup(8);
        {
            let mut b = cache.get_zero(1, 3, 1024).unwrap();
            b.with_data_mut(|d| d[10] = 0x5A);
        }
        // 尚未写回
        let mut raw = [0u8; 1];
        ram.read_raw(3 * 1024 + 10, &mut raw);
        assert_eq!(raw[0], 0);

        cache.sync(1).unwrap();
        ram.read_raw(3 * 1024 + 10, &mut raw);
        assert_eq!(raw[0], 0x5A);
        assert_eq!(cache.stats().dirty_blocks, 0);

        let b = cache.get(1, 3, 1024).unwrap();
        assert_eq!(b.with_data(|d| d[10]), 0x5A);
        assert!(cache.stats().hits >= 1);
    }

    #[test]
    fn test_eviction_keeps_pinned_and_writes_dirty() {
        let (cache, ram) = setup(2);
        let pinned = cache.get(1, 0, 1024).unwrap();
        {
            let mut b = cache.get_zero(1, 1, 1024).unwrap();
            b.with_data_mut(|d| d[0] = 7);
        }
        // 缓存已满：块 1 为脏、块 0 被引用，获取块 2 需要先写回块 1
        let _b2 = cache.get(1, 2, 1024).unwrap();
        assert!(cache.contains(1, 0));
        assert!(!cache.contains(1, 1));
        let mut raw = [0u8; 1];
        ram.read_raw(1024, &mut raw);
        assert_eq!(raw[0], 7);
        drop(pinned);
    }

    #[test]
    fn test_read_error_is_sticky_until_evicted() {
        let (cache, ram) = setup(8);
        ram.faults().fail_read_after(0);
        assert!(matches!(cache.get(1, 5, 1024), Err(e) if e.kind() == ErrorKind::Io));
        // 设备已恢复，但缓冲区仍处于失败状态
        assert!(matches!(cache.get(1, 5, 1024), Err(e) if e.kind() == ErrorKind::Io));
        cache.evict(1, 5).unwrap();
        assert!(cache.get(1, 5, 1024).is_ok());
    }

    #[test]
    fn test_write_failure_keeps_buffer_dirty() {
        let (cache, ram) = setup(8);
        {
            let mut b = cache.get_zero(1, 4, 1024).unwrap();
            b.with_data_mut(|d| d[0] = 1);
        }
        ram.faults().fail_write_after(0);
        assert_eq!(cache.sync(1).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(cache.stats().dirty_blocks, 1);
        cache.sync(1).unwrap();
        assert_eq!(cache.stats().dirty_blocks, 0);
    }

    #[test]
    fn test_redirty_during_sync_stays_tracked() {
        let (cache, ram) = setup(8);
        let mut b = cache.get_zero(1, 6, 1024).unwrap();
        b.with_data_mut(|d| d[0] = 1);
        let buf = b.buffer();

        // sync 写回之后、整理脏集合之前，另一个持有者再次修改
        cache.write_back(buf).unwrap();
        buf.data.lock()[0] = 2;
        cache.mark_dirty(buf);
        cache.settle_clean(buf);
        assert!(buf.is_dirty());
        assert_eq!(cache.stats().dirty_blocks, 1);
        drop(b);

        cache.sync(1).unwrap();
        let mut raw = [0u8; 1];
        ram.read_raw(6 * 1024, &mut raw);
        assert_eq!(raw[0], 2);
        assert_eq!(cache.stats().dirty_blocks, 0);
    }

    #[test]
    fn test_flush_buffer_clears_tracking() {
        let (cache, ram) = setup(8);
        let mut b = cache.get_zero(1, 7, 1024).unwrap();
        b.with_data_mut(|d| d[1] = 9);
        b.sync().unwrap();
        assert_eq!(cache.stats().dirty_blocks, 0);
        let mut raw = [0u8; 1];
        ram.read_raw(7 * 1024 + 1, &mut raw);
        assert_eq!(raw[0], 9);
    }
}
