//! 间接块映射器实现
//!
//! 将文件的逻辑块号映射到物理块号，支持直接块和多级间接块。
//! 新块的发布顺序：先分配并初始化所有缺失的间接表，最后才写入上层槽位，
//! 所以任何时刻从 inode 出发可见的指针都指向已初始化的块。

use crate::balloc;
use crate::block_group::GroupTable;
use crate::consts::{EXT2_IBLOCK_UNIT, EXT2_NDIR_BLOCKS};
use crate::error::{Error, ErrorKind, Result};
use crate::types::ext2_inode;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

/// 间接块映射器
///
/// 用于计算文件系统中的间接块限制和执行块映射。
#[derive(Debug, Clone, Copy)]
pub struct IndirectBlockMapper {
    /// 块大小
    block_size: u32,

    /// 每个间接块可以容纳的指针数量 (block_size / 4)
    blocks_per_indirect: u32,

    /// 每个间接层级的块数限制
    ///
    /// - limits[0] = 12 (直接块)
    /// - limits[1] = 12 + blocks_per_indirect (一级间接)
    /// - limits[2] = limits[1] + blocks_per_indirect^2 (二级间接)
    /// - limits[3] = limits[2] + blocks_per_indirect^3 (三级间接)
    block_limits: [u64; 4],

    /// 每个层级可以寻址的块数
    ///
    /// - blocks_per_level[0] = 1
    /// - blocks_per_level[1] = blocks_per_indirect
    /// - blocks_per_level[2] = blocks_per_indirect^2
    /// - blocks_per_level[3] = blocks_per_indirect^3
    blocks_per_level: [u64; 4],
}

/// 逻辑块在映射树中的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockPath {
    /// 0 = 直接块，1..=3 = 间接层级
    depth: usize,
    /// offsets[0] 是 i_block 下标，其余是各级表内下标
    offsets: [u32; 4],
}

/// 指针所在的位置
#[derive(Clone, Copy)]
enum Slot {
    Inode(usize),
    Table(u32, u32),
}

impl IndirectBlockMapper {
    /// 创建新的间接块映射器
    ///
    /// # 参数
    ///
    /// - `block_size`: 文件系统块大小（字节）
    pub fn new(block_size: u32) -> Self {
        let blocks_per_indirect = block_size / 4;

        let mut block_limits = [0u64; 4];
        let mut blocks_per_level = [0u64; 4];

        block_limits[0] = EXT2_NDIR_BLOCKS as u64;
        blocks_per_level[0] = 1;

        for i in 1..4 {
            blocks_per_level[i] = blocks_per_level[i - 1] * blocks_per_indirect as u64;
            block_limits[i] = block_limits[i - 1] + blocks_per_level[i];
        }

        Self {
            block_size,
            blocks_per_indirect,
            block_limits,
            blocks_per_level,
        }
    }

    /// 可寻址的逻辑块总数
    pub fn max_blocks(&self) -> u64 {
        self.block_limits[3]
    }

    fn sectors_per_block(&self) -> u32 {
        self.block_size / EXT2_IBLOCK_UNIT as u32
    }

    fn path(&self, logical_block: u64) -> Result<BlockPath> {
        let mut offsets = [0u32; 4];
        if logical_block < self.block_limits[0] {
            offsets[0] = logical_block as u32;
            return Ok(BlockPath { depth: 0, offsets });
        }

        let depth = (1..4)
            .find(|&d| logical_block < self.block_limits[d])
            .ok_or(Error::new(ErrorKind::InvalidInput, "logical block beyond addressable range"))?;

        offsets[0] = (EXT2_NDIR_BLOCKS + depth - 1) as u32;
        let mut rel = logical_block - self.block_limits[depth - 1];
        for level in 1..=depth {
            let span = self.blocks_per_level[depth - level];
            offsets[level] = (rel / span) as u32;
            rel %= span;
        }
        Ok(BlockPath { depth, offsets })
    }

    fn read_ptr(&self, table: &GroupTable, block: u32, index: u32) -> Result<u32> {
        table.geo().check_block(block)?;
        let buf = table.cache().get(table.dev(), block as u64, self.block_size as usize)?;
        Ok(buf.with_data(|data| LittleEndian::read_u32(&data[index as usize * 4..])))
    }

    fn write_ptr(&self, table: &GroupTable, block: u32, index: u32, value: u32) -> Result<()> {
        let mut buf = table.cache().get(table.dev(), block as u64, self.block_size as usize)?;
        buf.with_data_mut(|data| LittleEndian::write_u32(&mut data[index as usize * 4..], value));
        Ok(())
    }

    fn read_table(&self, table: &GroupTable, block: u32) -> Result<Vec<u32>> {
        table.geo().check_block(block)?;
        let buf = table.cache().get(table.dev(), block as u64, self.block_size as usize)?;
        let mut ptrs = Vec::new();
        ptrs.try_reserve(self.blocks_per_indirect as usize)
            .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot buffer indirect table"))?;
        buf.with_data(|data| {
            ptrs.extend(data.chunks_exact(4).map(LittleEndian::read_u32));
        });
        Ok(ptrs)
    }

    fn write_table(&self, table: &GroupTable, block: u32, ptrs: &[u32]) -> Result<()> {
        let mut buf = table.cache().get(table.dev(), block as u64, self.block_size as usize)?;
        buf.with_data_mut(|data| {
            for (chunk, ptr) in data.chunks_exact_mut(4).zip(ptrs) {
                LittleEndian::write_u32(chunk, *ptr);
            }
        });
        Ok(())
    }

    /// 将逻辑块号映射到物理块号
    ///
    /// # 返回
    ///
    /// - `Ok(Some(physical_block))`: 找到了对应的物理块
    /// - `Ok(None)`: 逻辑块号对应的是文件空洞
    /// - `Err(Corrupted)`: 路径上的某个指针超出卷范围
    pub fn map(&self, table: &GroupTable, inode: &ext2_inode, logical_block: u64) -> Result<Option<u32>> {
        let path = self.path(logical_block)?;
        let mut ptr = inode.block[path.offsets[0] as usize];
        for level in 1..=path.depth {
            if ptr == 0 {
                return Ok(None);
            }
            ptr = self.read_ptr(table, ptr, path.offsets[level])?;
        }
        if ptr == 0 {
            return Ok(None);
        }
        table.geo().check_block(ptr)?;
        Ok(Some(ptr))
    }

    /// 映射逻辑块，必要时分配数据块及缺失的间接表
    ///
    /// # 参数
    ///
    /// - `goal`: 分配提示（通常是前一个逻辑块的物理块 + 1）
    ///
    /// # 返回
    ///
    /// (物理块号, 数据块是否为新分配)。新分配的数据块内容未定义，由调用者初始化。
    pub fn map_or_alloc(
        &self,
        table: &GroupTable,
        inode: &mut ext2_inode,
        logical_block: u64,
        goal: u32,
    ) -> Result<(u32, bool)> {
        let path = self.path(logical_block)?;

        // 找到第一个缺失的层级
        let mut slot = Slot::Inode(path.offsets[0] as usize);
        let mut ptr = inode.block[path.offsets[0] as usize];
        let mut missing_from = None;
        for level in 0..=path.depth {
            if ptr == 0 {
                missing_from = Some(level);
                break;
            }
            if level == path.depth {
                break;
            }
            table.geo().check_block(ptr)?;
            slot = Slot::Table(ptr, path.offsets[level + 1]);
            ptr = self.read_ptr(table, ptr, path.offsets[level + 1])?;
        }

        let first_missing = match missing_from {
            None => {
                table.geo().check_block(ptr)?;
                return Ok((ptr, false));
            }
            Some(level) => level,
        };

        // 分配 first_missing..=depth 层所需的全部块，失败时全部退还
        let needed = path.depth - first_missing + 1;
        let mut fresh: Vec<u32> = Vec::with_capacity(needed);
        let mut next_goal = goal;
        for _ in 0..needed {
            match balloc::alloc_block(table, next_goal) {
                Ok(b) => {
                    next_goal = b + 1;
                    fresh.push(b);
                }
                Err(e) => {
                    for b in fresh.iter() {
                        if let Err(undo) = balloc::free_block(table, *b) {
                            log::error!("[INDIRECT] rollback of block {} failed: {}", b, undo);
                        }
                    }
                    return Err(e);
                }
            }
        }

        // 初始化新的间接表：清零，并链接到下一层的新块
        for (i, &blk) in fresh.iter().enumerate().take(needed - 1) {
            let level = first_missing + i;
            let mut buf = table.cache().get_zero(table.dev(), blk as u64, self.block_size as usize)?;
            let child_index = path.offsets[level + 1] as usize;
            let child = fresh[i + 1];
            buf.with_data_mut(|data| LittleEndian::write_u32(&mut data[child_index * 4..], child));
        }

        // 最后发布：把最上层的新块写进已有的槽位
        match slot_for(first_missing, slot, &path) {
            Slot::Inode(idx) => inode.block[idx] = fresh[0],
            Slot::Table(blk, idx) => self.write_ptr(table, blk, idx, fresh[0])?,
        }
        inode.blocks += needed as u32 * self.sectors_per_block();

        let data_block = fresh[needed - 1];
        log::trace!(
            "[INDIRECT] lblock {} -> {} ({} new blocks)",
            logical_block,
            data_block,
            needed
        );
        Ok((data_block, true))
    }

    /// 释放逻辑块区间 `[from, to)` 对应的数据块（`to` 为 `None` 表示到文件末尾）
    ///
    /// 区间内的数据块先释放；因此变空的间接表随后释放。
    pub fn free_range(&self, table: &GroupTable, inode: &mut ext2_inode, from: u64, to: Option<u64>) -> Result<()> {
        let to = to.unwrap_or(self.max_blocks()).min(self.max_blocks());
        if from >= to {
            return Ok(());
        }

        let spb = self.sectors_per_block();
        for i in from..to.min(self.block_limits[0]) {
            let ptr = inode.block[i as usize];
            if ptr != 0 {
                balloc::free_block(table, ptr)?;
                inode.block[i as usize] = 0;
                inode.blocks = inode.blocks.saturating_sub(spb);
            }
        }

        for depth in 1..4 {
            let base = self.block_limits[depth - 1];
            let end = self.block_limits[depth];
            if to <= base || from >= end {
                continue;
            }
            let idx = EXT2_NDIR_BLOCKS + depth - 1;
            let root = inode.block[idx];
            if root == 0 {
                continue;
            }
            let mut freed = 0u32;
            if self.free_tree(table, root, depth, base, from, to, &mut freed)? {
                inode.block[idx] = 0;
            }
            inode.blocks = inode.blocks.saturating_sub(freed * spb);
        }
        Ok(())
    }

    /// 递归释放一棵子树中落在区间内的块，返回该表是否已被释放
    #[allow(clippy::too_many_arguments)]
    fn free_tree(
        &self,
        table: &GroupTable,
        block: u32,
        level: usize,
        base: u64,
        from: u64,
        to: u64,
        freed: &mut u32,
    ) -> Result<bool> {
        let mut ptrs = self.read_table(table, block)?;
        let span = self.blocks_per_level[level - 1];
        let mut changed = false;

        for (i, ptr) in ptrs.iter_mut().enumerate() {
            let start = base + i as u64 * span;
            let end = start + span;
            if *ptr == 0 || end <= from || start >= to {
                continue;
            }
            if level == 1 {
                balloc::free_block(table, *ptr)?;
                *freed += 1;
                *ptr = 0;
                changed = true;
            } else if self.free_tree(table, *ptr, level - 1, start, from, to, freed)? {
                *ptr = 0;
                changed = true;
            }
        }

        if ptrs.iter().all(|&p| p == 0) {
            balloc::free_block(table, block)?;
            *freed += 1;
            return Ok(true);
        }
        if changed {
            self.write_table(table, block, &ptrs)?;
        }
        Ok(false)
    }

    /// 收集 inode 引用的全部块（数据块与间接表）
    pub fn collect_blocks(&self, table: &GroupTable, inode: &ext2_inode) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        for &ptr in inode.block[..EXT2_NDIR_BLOCKS].iter().filter(|&&p| p != 0) {
            out.push(ptr);
        }
        for depth in 1..4 {
            let root = inode.block[EXT2_NDIR_BLOCKS + depth - 1];
            if root != 0 {
                self.collect_tree(table, root, depth, &mut out)?;
            }
        }
        Ok(out)
    }

    fn collect_tree(&self, table: &GroupTable, block: u32, level: usize, out: &mut Vec<u32>) -> Result<()> {
        out.push(block);
        for ptr in self.read_table(table, block)?.into_iter().filter(|&p| p != 0) {
            if level == 1 {
                out.push(ptr);
            } else {
                self.collect_tree(table, ptr, level - 1, out)?;
            }
        }
        Ok(())
    }
}

/// 第一个缺失层级对应的槽位
///
/// 向下走时记录的是最后一个已存在的槽位；缺失层级为 0 时就是 inode 中的槽位。
fn slot_for(first_missing: usize, walked: Slot, path: &BlockPath) -> Slot {
    if first_missing == 0 {
        Slot::Inode(path.offsets[0] as usize)
    } else {
        walked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mkfs::tests_support::test_groups;

    #[test]
    fn test_path_levels_1k() {
        let m = IndirectBlockMapper::new(1024);
        assert_eq!(m.path(11).unwrap(), BlockPath { depth: 0, offsets: [11, 0, 0, 0] });
        assert_eq!(m.path(12).unwrap(), BlockPath { depth: 1, offsets: [12, 0, 0, 0] });
        assert_eq!(m.path(12 + 255).unwrap().offsets, [12, 255, 0, 0]);
        assert_eq!(m.path(12 + 256).unwrap(), BlockPath { depth: 2, offsets: [13, 0, 0, 0] });
        assert_eq!(m.path(12 + 256 + 257).unwrap().offsets, [13, 1, 1, 0]);
        let triple = 12 + 256 + 256 * 256;
        assert_eq!(m.path(triple).unwrap(), BlockPath { depth: 3, offsets: [14, 0, 0, 0] });
        assert_eq!(m.path(m.max_blocks()).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_alloc_map_and_free_double_indirect() {
        let (table, _mem) = test_groups(4096, 4096);
        let m = IndirectBlockMapper::new(1024);
        let mut inode = ext2_inode::default();
        let (free_before, _) = table.free_totals();

        let lblock = 12 + 256 + 3;
        let (phys, fresh) = m.map_or_alloc(&table, &mut inode, lblock, 0).unwrap();
        assert!(fresh);
        // 二级表、一级表、数据块
        assert_eq!(table.free_totals().0, free_before - 3);
        assert_eq!(inode.blocks, 3 * 2);
        assert_eq!(m.map(&table, &inode, lblock).unwrap(), Some(phys));
        assert_eq!(m.map(&table, &inode, lblock + 1).unwrap(), None);

        let (again, fresh) = m.map_or_alloc(&table, &mut inode, lblock, 0).unwrap();
        assert_eq!((again, fresh), (phys, false));

        // 同一个一级表里的下一个块只需要一个新块
        m.map_or_alloc(&table, &mut inode, lblock + 1, phys + 1).unwrap();
        assert_eq!(table.free_totals().0, free_before - 4);

        m.free_range(&table, &mut inode, 0, None).unwrap();
        assert_eq!(table.free_totals().0, free_before);
        assert_eq!(inode.blocks, 0);
        assert_eq!(inode.block[13], 0);
    }

    #[test]
    fn test_partial_free_keeps_shared_tables() {
        let (table, _mem) = test_groups(4096, 4096);
        let m = IndirectBlockMapper::new(1024);
        let mut inode = ext2_inode::default();
        for lb in 10..20 {
            m.map_or_alloc(&table, &mut inode, lb, 0).unwrap();
        }
        let collected = m.collect_blocks(&table, &inode).unwrap();
        assert_eq!(collected.len(), 11);

        m.free_range(&table, &mut inode, 15, None).unwrap();
        assert!(inode.block[12] != 0);
        assert_eq!(m.map(&table, &inode, 14).unwrap().is_some(), true);
        assert_eq!(m.map(&table, &inode, 15).unwrap(), None);
        assert_eq!(inode.blocks, 6 * 2);

        m.free_range(&table, &mut inode, 12, Some(15)).unwrap();
        assert_eq!(inode.block[12], 0);
        assert_eq!(inode.blocks, 2 * 2);
    }
}
