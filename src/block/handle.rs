//! 块句柄 - RAII 风格的块访问

use crate::cache::{BlockCache, CacheBuffer, CacheFlags};
use crate::error::Result;
use alloc::sync::Arc;

/// 块句柄
///
/// 提供 RAII 风格的块访问：
/// - 获取时由缓存保证数据有效（必要时从磁盘读取）
/// - 在持有期间缓冲区被引用，不会被驱逐
/// - 通过闭包修改时自动标记为脏
/// - 丢弃时释放引用
///
/// # 示例
///
/// ```rust,ignore
/// // 读取块
/// let block = cache.get(dev, 0, block_size)?;
/// let first = block.with_data(|data| data[0]);
///
/// // 修改块
/// let mut block = cache.get(dev, 1, block_size)?;
/// block.with_data_mut(|data| {
///     data[0] = 0x42;
/// });
/// ```
///
/// 闭包内不得再访问块缓存：数据锁是锁序中的叶子。
pub struct Block<'a> {
    cache: &'a BlockCache,
    buf: Arc<CacheBuffer>,
}

impl<'a> Block<'a> {
    /// 由缓存创建（缓冲区已被引用）
    pub(crate) fn new(cache: &'a BlockCache, buf: Arc<CacheBuffer>) -> Self {
        Self { cache, buf }
    }

    pub(crate) fn buffer(&self) -> &CacheBuffer {
        &self.buf
    }

    /// 获取块号
    pub fn lba(&self) -> u64 {
        self.buf.key().lba
    }

    /// 块大小
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// 访问块数据（只读）
    pub fn with_data<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        let data = self.buf.data.lock();
        f(&data)
    }

    /// 访问块数据（可写），自动标记为脏
    pub fn with_data_mut<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let result = {
            let mut data = self.buf.data.lock();
            self.buf.set_flags(CacheFlags::LOCKED);
            let r = f(&mut data);
            self.buf.clear_flags(CacheFlags::LOCKED);
            r
        };
        self.cache.mark_dirty(&self.buf);
        result
    }

    /// 标记为脏
    pub fn mark_dirty(&self) {
        self.cache.mark_dirty(&self.buf);
    }

    /// 立即写回这个块（写穿）
    pub fn sync(&self) -> Result<()> {
        self.cache.flush_buffer(&self.buf)
    }
}

/// 实现 Drop trait，自动释放引用
impl Drop for Block<'_> {
    fn drop(&mut self) {
        self.cache.put(&self.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDev, MemBlockDevice};
    use crate::hal::NullHal;
    use alloc::boxed::Box;

    #[test]
    fn test_block_pin_released_on_drop() {
        let cache = BlockCache::new(4, Arc::new(NullHal));
        let dev = BlockDev::new(9, Box::new(MemBlockDevice::new(8192))).unwrap();
        cache.register_device(Arc::new(dev));

        let mut block = cache.get(9, 2, 1024).unwrap();
        assert_eq!(block.lba(), 2);
        assert_eq!(block.buffer().pin_count(), 1);
        block.with_data_mut(|d| d.fill(0xFF));
        assert!(block.buffer().is_dirty());
        let buf = block.buf.clone();
        drop(block);
        assert_eq!(buf.pin_count(), 0);
    }
}
