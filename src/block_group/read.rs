//! 块组描述符读取和验证

use crate::{
    block::DeviceId,
    cache::BlockCache,
    consts::EXT2_GROUP_DESC_SIZE,
    error::{Error, ErrorKind, Result},
    superblock::Geometry,
    types::ext2_group_desc,
};
use alloc::vec::Vec;

/// 计算块组描述符的存储位置
///
/// 描述符表紧跟在主 superblock 之后，从 `first_data_block + 1` 开始连续存放。
///
/// # 返回
///
/// (块地址, 块内偏移) 元组
pub fn desc_location(geo: &Geometry, group: u32) -> (u64, usize) {
    let per_block = geo.descs_per_block();
    let block = geo.first_data_block as u64 + 1 + (group / per_block) as u64;
    let offset = (group % per_block) as usize * EXT2_GROUP_DESC_SIZE;
    (block, offset)
}

/// 块组起始处被 superblock 与描述符表（或其备份）占用的块数
pub fn group_overhead(geo: &Geometry, group: u32) -> u32 {
    if geo.group_has_super(group) {
        1 + geo.gdt_blocks
    } else {
        0
    }
}

/// 读取全部块组描述符并逐一验证
///
/// 位图和 inode 表必须位于本组范围内，空闲计数不能超过组容量。
pub fn load_descriptors(cache: &BlockCache, dev: DeviceId, geo: &Geometry) -> Result<Vec<ext2_group_desc>> {
    let bs = geo.block_size as usize;
    let mut descs = Vec::new();
    descs
        .try_reserve(geo.group_count as usize)
        .map_err(|_| Error::new(ErrorKind::NoMemory, "cannot allocate descriptor table"))?;

    for group in 0..geo.group_count {
        let (lba, offset) = desc_location(geo, group);
        let block = cache.get(dev, lba, bs)?;
        let desc = block.with_data(|data| {
            ext2_group_desc::decode(&data[offset..offset + EXT2_GROUP_DESC_SIZE])
        });
        drop(block);
        validate_descriptor(geo, group, &desc)?;
        descs.push(desc);
    }

    log::debug!("[BG] loaded {} group descriptors", descs.len());
    Ok(descs)
}

/// 验证单个描述符
pub fn validate_descriptor(geo: &Geometry, group: u32, desc: &ext2_group_desc) -> Result<()> {
    let first = geo.group_first_block(group);
    let last = first + geo.blocks_in_group(group);
    let in_group = |b: u32| b >= first && b < last;

    if !in_group(desc.block_bitmap) {
        log::error!("[BG] group {} block bitmap {} outside group", group, desc.block_bitmap);
        return Err(Error::new(ErrorKind::Corrupted, "block bitmap outside its group"));
    }
    if !in_group(desc.inode_bitmap) {
        log::error!("[BG] group {} inode bitmap {} outside group", group, desc.inode_bitmap);
        return Err(Error::new(ErrorKind::Corrupted, "inode bitmap outside its group"));
    }
    if !in_group(desc.inode_table) || desc.inode_table + geo.inode_table_blocks > last {
        log::error!("[BG] group {} inode table {} outside group", group, desc.inode_table);
        return Err(Error::new(ErrorKind::Corrupted, "inode table outside its group"));
    }
    if desc.free_blocks_count as u32 > geo.blocks_in_group(group)
        || desc.free_inodes_count as u32 > geo.inodes_per_group
    {
        return Err(Error::new(ErrorKind::Corrupted, "group free counts exceed capacity"));
    }
    Ok(())
}
