//! Inode 定位与读取

use crate::{
    block_group::GroupTable,
    consts::*,
    error::{Error, ErrorKind, Result},
    types::ext2_inode,
};

/// 计算 inode 在 inode 表中的位置
///
/// # 返回
///
/// (块地址, 块内偏移) 元组
pub fn inode_location(table: &GroupTable, ino: u32) -> Result<(u64, usize)> {
    let geo = table.geo();
    geo.check_ino(ino)?;
    let (group, index) = geo.ino_to_group(ino);
    let inode_table = table.lock(group).inode_table as u64;

    let byte = index as u64 * geo.inode_size as u64;
    let block = inode_table + byte / geo.block_size as u64;
    let offset = (byte % geo.block_size as u64) as usize;
    Ok((block, offset))
}

/// 从缓存读取 inode 记录
///
/// inode 编号从 1 开始，0 表示无效 inode
pub fn read_inode(table: &GroupTable, ino: u32) -> Result<ext2_inode> {
    let geo = table.geo();
    let (lba, offset) = inode_location(table, ino)?;
    let block = table.cache().get(table.dev(), lba, geo.block_size as usize)?;
    let inode = block.with_data(|data| {
        ext2_inode::decode(&data[offset..offset + geo.inode_size as usize], geo.inode_size)
    });
    Ok(inode)
}

/// 检查一个正在使用的 inode 是否能被这个实现解释
///
/// 保留标志位非零、带 extent 标志或文件类型未知都视为损坏。
pub fn validate_inode(ino: u32, inode: &ext2_inode) -> Result<()> {
    if inode.flags & EXT2_RESERVED_FL != 0 {
        log::error!("[INODE] inode {} has reserved flags {:#x}", ino, inode.flags);
        return Err(Error::new(ErrorKind::Corrupted, "inode has reserved flag bits set"));
    }
    if inode.flags & EXT2_EXTENTS_FL != 0 {
        log::error!("[INODE] inode {} uses extents", ino);
        return Err(Error::new(ErrorKind::Corrupted, "extent-mapped inode on ext2 volume"));
    }
    match inode.file_type() {
        S_IFREG | S_IFDIR | S_IFLNK | S_IFCHR | S_IFBLK | S_IFIFO | S_IFSOCK => Ok(()),
        _ => {
            log::error!("[INODE] inode {} has unknown mode {:#o}", ino, inode.mode);
            Err(Error::new(ErrorKind::Corrupted, "inode has unknown file type"))
        }
    }
}
