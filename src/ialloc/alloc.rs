//! Inode 分配功能

use crate::{
    balloc::search_order,
    bitmap,
    block_group::GroupTable,
    error::{Error, ErrorKind, Result},
};

/// 分配一个 inode
///
/// 普通文件优先放在父目录所在的块组，再向两侧扩展；
/// 目录放在目录数不高于平均值的组中空闲 inode 最多的那个，以分散目录树。
///
/// # 参数
///
/// * `table` - 块组描述符表
/// * `parent_group` - 父目录所在块组
/// * `is_dir` - 是否是目录
///
/// # 返回
///
/// 成功返回分配的 inode 编号；没有空闲 inode 时返回 `NoInode`
pub fn alloc_inode(table: &GroupTable, parent_group: u32, is_dir: bool) -> Result<u32> {
    let start = if is_dir {
        pick_dir_group(table)
    } else {
        parent_group.min(table.count() - 1)
    };

    for group in search_order(start, table.count()) {
        if let Some(ino) = try_alloc_in_group(table, group, is_dir)? {
            log::trace!("[IALLOC] allocated inode {} in group {} (dir={})", ino, group, is_dir);
            return Ok(ino);
        }
    }

    log::warn!("[IALLOC] no free inodes");
    Err(Error::new(ErrorKind::NoInode, "no free inodes available"))
}

fn pick_dir_group(table: &GroupTable) -> u32 {
    let descs = table.snapshot();
    let count = descs.len() as u32;
    let total_dirs: u32 = descs.iter().map(|d| d.used_dirs_count as u32).sum();
    let avg_dirs = total_dirs / count;

    let best = |filter: &dyn Fn(u32) -> bool| {
        (0..count)
            .filter(|&g| descs[g as usize].free_inodes_count > 0 && filter(g))
            .max_by_key(|&g| (descs[g as usize].free_inodes_count, core::cmp::Reverse(g)))
    };

    best(&|g| descs[g as usize].used_dirs_count as u32 <= avg_dirs)
        .or_else(|| best(&|_| true))
        .unwrap_or(0)
}

fn try_alloc_in_group(table: &GroupTable, group: u32, is_dir: bool) -> Result<Option<u32>> {
    let geo = table.geo();
    let mut desc = table.lock(group);
    if desc.free_inodes_count == 0 {
        return Ok(None);
    }

    // 组 0 中 first_ino 之前的 inode 是保留的
    let start = if group == 0 { geo.first_ino - 1 } else { 0 };
    let mut bitmap_block = table
        .cache()
        .get(table.dev(), desc.inode_bitmap as u64, geo.block_size as usize)?;

    let idx = match bitmap_block
        .with_data(|data| bitmap::find_first_zero(data, start, geo.inodes_per_group))
    {
        Some(idx) => idx,
        None => {
            log::error!(
                "[IALLOC] group {} claims {} free inodes but bitmap is full",
                group,
                desc.free_inodes_count
            );
            return Err(Error::new(ErrorKind::Corrupted, "inode bitmap disagrees with free count"));
        }
    };
    bitmap_block.with_data_mut(|data| bitmap::set_bit(data, idx))?;
    drop(bitmap_block);

    desc.free_inodes_count -= 1;
    if is_dir {
        desc.used_dirs_count += 1;
    }
    table.store(group, &desc)?;

    Ok(Some(group * geo.inodes_per_group + idx + 1))
}
