//! Superblock 写入和更新

use crate::{
    block::DeviceId,
    cache::BlockCache,
    consts::*,
    error::Result,
    hal::Timespec,
};

/// Superblock 更新操作
impl super::Superblock {
    /// 获取可变的内部 superblock 结构
    pub fn inner_mut(&mut self) -> &mut crate::types::ext2_sblock {
        &mut self.inner
    }

    /// 设置空闲计数（由块组描述符汇总得到）
    pub fn set_free_counts(&mut self, free_blocks: u32, free_inodes: u32) {
        self.inner.free_blocks_count = free_blocks;
        self.inner.free_inodes_count = free_inodes;
    }

    /// 记录一次挂载：更新挂载时间与次数，并把状态置为"未干净卸载"
    pub fn record_mount(&mut self, now: Timespec) {
        self.inner.mtime = now.sec as u32;
        self.inner.mnt_count = self.inner.mnt_count.saturating_add(1);
        self.inner.state &= !EXT2_VALID_FS;
    }

    /// 更新最后写入时间
    pub fn update_write_time(&mut self, now: Timespec) {
        self.inner.wtime = now.sec as u32;
    }

    /// 标记文件系统为干净
    pub fn mark_clean(&mut self) {
        self.inner.state |= EXT2_VALID_FS;
    }

    /// 标记文件系统有错误
    pub fn mark_error(&mut self) {
        self.inner.state |= EXT2_ERROR_FS;
    }

    /// 通过块缓存写主 superblock（偏移 1024 字节）
    ///
    /// 对 1K 块它独占块 1；对更大的块它位于块 0 的 1024 偏移处。
    pub fn write_primary(&self, cache: &BlockCache, dev: DeviceId) -> Result<()> {
        let bs = self.block_size() as u64;
        let lba = EXT2_SUPERBLOCK_OFFSET / bs;
        let off = (EXT2_SUPERBLOCK_OFFSET % bs) as usize;

        let mut block = cache.get(dev, lba, bs as usize)?;
        block.with_data_mut(|data| {
            self.inner.encode(&mut data[off..off + EXT2_SUPERBLOCK_SIZE]);
        });
        Ok(())
    }

    /// 写所有备份 superblock
    ///
    /// 备份位于每个带超级块的块组（组 0 除外）的第一个块起始处，
    /// `block_group_nr` 字段记录所在组号。
    pub fn write_backups(&self, cache: &BlockCache, dev: DeviceId) -> Result<()> {
        let geo = self.geometry();
        let bs = geo.block_size as usize;
        let mut backups = 0;

        for group in 1..geo.group_count {
            if !geo.group_has_super(group) {
                continue;
            }
            let mut copy = self.inner;
            copy.block_group_nr = group as u16;

            let mut block = cache.get(dev, geo.group_first_block(group) as u64, bs)?;
            block.with_data_mut(|data| copy.encode(&mut data[..EXT2_SUPERBLOCK_SIZE]));
            backups += 1;
        }

        log::debug!("[SB] wrote {} backup superblocks", backups);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{BlockDev, MemBlockDevice};
    use crate::cache::BlockCache;
    use crate::consts::*;
    use crate::hal::{NullHal, Timespec};
    use crate::superblock::Superblock;
    use crate::types::ext2_sblock;
    use alloc::boxed::Box;
    use alloc::sync::Arc;

    fn sample() -> ext2_sblock {
        ext2_sblock {
            inodes_count: 16 * 8,
            blocks_count: 8 * 1024,
            first_data_block: 0,
            log_block_size: 2,
            blocks_per_group: 1024,
            frags_per_group: 1024,
            inodes_per_group: 16,
            magic: EXT2_SUPERBLOCK_MAGIC,
            state: EXT2_VALID_FS,
            rev_level: EXT2_DYNAMIC_REV,
            first_ino: 11,
            inode_size: 256,
            feature_ro_compat: EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_primary_and_backups() {
        let mem = MemBlockDevice::new(8 * 1024 * 4096);
        let dev = Arc::new(BlockDev::new(1, Box::new(mem.clone())).unwrap());
        let cache = BlockCache::new(16, Arc::new(NullHal));
        cache.register_device(dev.clone());

        let mut sb = Superblock::from_raw(sample()).unwrap();
        sb.record_mount(Timespec::new(77, 0));
        assert_eq!(sb.inner().state & EXT2_VALID_FS, 0);
        sb.mark_clean();
        sb.write_primary(&cache, 1).unwrap();
        sb.write_backups(&cache, 1).unwrap();
        cache.sync(1).unwrap();

        let reloaded = Superblock::load(&dev).unwrap();
        assert_eq!(reloaded.inner().mtime, 77);
        assert_eq!(reloaded.inner().mnt_count, 1);
        assert!(reloaded.was_clean());

        // 组 1、3、5、7 带备份，组 2 没有
        let mut magic = [0u8; 2];
        mem.read_raw(1024 * 4096 + 56, &mut magic);
        assert_eq!(u16::from_le_bytes(magic), EXT2_SUPERBLOCK_MAGIC);
        mem.read_raw(3 * 1024 * 4096 + 56, &mut magic);
        assert_eq!(u16::from_le_bytes(magic), EXT2_SUPERBLOCK_MAGIC);
        mem.read_raw(2 * 1024 * 4096 + 56, &mut magic);
        assert_eq!(u16::from_le_bytes(magic), 0);
    }
}
