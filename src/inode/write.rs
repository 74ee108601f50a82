//! Inode 写入

use super::inode_location;
use crate::{block_group::GroupTable, error::Result, types::ext2_inode};

/// 把 inode 记录编码进缓存中的 inode 表块
///
/// 只改写这一条记录所占的字节，同块内的其他 inode 不受影响。
pub fn write_inode(table: &GroupTable, ino: u32, inode: &ext2_inode) -> Result<()> {
    let geo = table.geo();
    let (lba, offset) = inode_location(table, ino)?;
    let mut block = table.cache().get(table.dev(), lba, geo.block_size as usize)?;
    block.with_data_mut(|data| {
        inode.encode(&mut data[offset..offset + geo.inode_size as usize], geo.inode_size)
    });
    Ok(())
}

/// 立即把 inode 所在的块写到设备
pub fn sync_inode(table: &GroupTable, ino: u32) -> Result<()> {
    let geo = table.geo();
    let (lba, _) = inode_location(table, ino)?;
    let block = table.cache().get(table.dev(), lba, geo.block_size as usize)?;
    block.sync()
}
