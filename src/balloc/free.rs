//! 块释放功能

use crate::{
    bitmap,
    block_group::GroupTable,
    error::{Error, ErrorKind, Result},
};

/// 释放一个块
///
/// 释放一个本来就空闲的块视为损坏：位图和引用它的元数据已经不一致。
/// 成功后丢弃该块在缓存中的缓冲区，避免过期内容被写回。
pub fn free_block(table: &GroupTable, block: u32) -> Result<()> {
    let geo = table.geo();
    geo.check_block(block)?;
    let (group, idx) = geo.block_to_group(block);

    let mut desc = table.lock(group);
    let mut bitmap_block = table
        .cache()
        .get(table.dev(), desc.block_bitmap as u64, geo.block_size as usize)?;

    if !bitmap_block.with_data(|data| bitmap::test_bit(data, idx)) {
        log::error!("[BALLOC] double free of block {} (group {})", block, group);
        return Err(Error::new(ErrorKind::Corrupted, "freeing a block that is not allocated"));
    }
    bitmap_block.with_data_mut(|data| bitmap::clear_bit(data, idx))?;
    drop(bitmap_block);

    if desc.free_blocks_count as u32 >= geo.blocks_in_group(group) {
        return Err(Error::new(ErrorKind::Corrupted, "group free block count overflow"));
    }
    desc.free_blocks_count += 1;
    table.store(group, &desc)?;
    drop(desc);

    table.cache().forget(table.dev(), block as u64);
    log::trace!("[BALLOC] freed block {}", block);
    Ok(())
}

/// 读取某个块在位图中的分配状态
pub fn is_block_allocated(table: &GroupTable, block: u32) -> Result<bool> {
    let geo = table.geo();
    geo.check_block(block)?;
    let (group, idx) = geo.block_to_group(block);
    let bitmap_lba = table.lock(group).block_bitmap as u64;
    let bitmap_block = table.cache().get(table.dev(), bitmap_lba, geo.block_size as usize)?;
    Ok(bitmap_block.with_data(|data| bitmap::test_bit(data, idx)))
}
