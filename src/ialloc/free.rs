//! Inode 释放功能

use crate::{
    bitmap,
    block_group::GroupTable,
    error::{Error, ErrorKind, Result},
};

/// 释放一个 inode
///
/// # 参数
///
/// * `table` - 块组描述符表
/// * `ino` - 要释放的 inode 编号
/// * `is_dir` - 是否是目录（需要减少组内目录计数）
pub fn free_inode(table: &GroupTable, ino: u32, is_dir: bool) -> Result<()> {
    let geo = table.geo();
    geo.check_ino(ino)?;
    if ino < geo.first_ino {
        return Err(Error::new(ErrorKind::Corrupted, "freeing a reserved inode"));
    }
    let (group, idx) = geo.ino_to_group(ino);

    let mut desc = table.lock(group);
    let mut bitmap_block = table
        .cache()
        .get(table.dev(), desc.inode_bitmap as u64, geo.block_size as usize)?;

    if !bitmap_block.with_data(|data| bitmap::test_bit(data, idx)) {
        log::error!("[IALLOC] double free of inode {}", ino);
        return Err(Error::new(ErrorKind::Corrupted, "freeing an inode that is not allocated"));
    }
    bitmap_block.with_data_mut(|data| bitmap::clear_bit(data, idx))?;
    drop(bitmap_block);

    desc.free_inodes_count += 1;
    if is_dir {
        desc.used_dirs_count = desc.used_dirs_count.saturating_sub(1);
    }
    table.store(group, &desc)?;
    log::trace!("[IALLOC] freed inode {}", ino);
    Ok(())
}
