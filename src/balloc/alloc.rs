//! 块分配功能
//!
//! 搜索顺序：目标块组，然后以目标组为中心向两侧交替扩展（回绕）。
//! 组内顺序：目标位 → 目标位到下一个 64 位边界 → 完全空闲的字节 → 任意空闲位。

use crate::{
    bitmap,
    block_group::GroupTable,
    error::{Error, ErrorKind, Result},
};
use alloc::vec;

/// 分配一个块
///
/// # 参数
///
/// * `table` - 块组描述符表
/// * `goal` - 目标块地址（提示，通常是同一文件前一个块 + 1）
///
/// # 返回
///
/// 成功返回分配的块号；所有块组都没有空闲块时返回 `NoSpace`
pub fn alloc_block(table: &GroupTable, goal: u32) -> Result<u32> {
    let geo = table.geo();
    let goal = if goal < geo.first_data_block || goal >= geo.blocks_count {
        geo.first_data_block
    } else {
        goal
    };
    let (goal_group, goal_idx) = geo.block_to_group(goal);

    for (n, group) in search_order(goal_group, table.count()).enumerate() {
        let hint = if n == 0 { Some(goal_idx) } else { None };
        if let Some(block) = try_alloc_in_group(table, group, hint)? {
            log::trace!("[BALLOC] goal={} -> block {} (group {})", goal, block, group);
            return Ok(block);
        }
    }

    log::warn!("[BALLOC] no free blocks (goal={})", goal);
    Err(Error::new(ErrorKind::NoSpace, "no free blocks available"))
}

/// 以 `start` 为中心的块组访问顺序：start, start+1, start-1, start+2, ...（回绕，不重复）
pub(crate) fn search_order(start: u32, count: u32) -> impl Iterator<Item = u32> {
    let mut seen = vec![false; count as usize];
    let mut dist = 0u32;
    let mut side = 0u8;
    core::iter::from_fn(move || {
        while dist <= count {
            let candidate = if dist == 0 {
                dist = 1;
                start
            } else if side == 0 {
                side = 1;
                (start + dist) % count
            } else {
                side = 0;
                let c = (start + count - dist % count) % count;
                dist += 1;
                c
            };
            if !seen[candidate as usize] {
                seen[candidate as usize] = true;
                return Some(candidate);
            }
        }
        None
    })
}

/// 在指定块组中尝试分配块
fn try_alloc_in_group(table: &GroupTable, group: u32, hint: Option<u32>) -> Result<Option<u32>> {
    let geo = table.geo();
    let mut desc = table.lock(group);
    if desc.free_blocks_count == 0 {
        return Ok(None);
    }

    let bs = geo.block_size as usize;
    let nbits = geo.blocks_in_group(group);
    let mut bitmap_block = table.cache().get(table.dev(), desc.block_bitmap as u64, bs)?;

    let found = bitmap_block.with_data(|data| {
        if let Some(goal) = hint {
            if let Some(idx) = bitmap::find_zero_near(data, goal, nbits) {
                return Some(idx);
            }
            if let Some(idx) = bitmap::find_free_byte(data, goal, nbits) {
                return Some(idx);
            }
        }
        bitmap::find_free_byte(data, 0, nbits).or_else(|| bitmap::find_first_zero(data, 0, nbits))
    });

    let idx = match found {
        Some(idx) => idx,
        None => {
            log::error!(
                "[BALLOC] group {} claims {} free blocks but bitmap is full",
                group,
                desc.free_blocks_count
            );
            return Err(Error::new(ErrorKind::Corrupted, "block bitmap disagrees with free count"));
        }
    };

    let block = geo.group_first_block(group) + idx;
    geo.check_block(block)?;

    bitmap_block.with_data_mut(|data| bitmap::set_bit(data, idx))?;
    drop(bitmap_block);

    desc.free_blocks_count -= 1;
    table.store(group, &desc)?;
    Ok(Some(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_search_order_alternates_and_wraps() {
        let order: Vec<u32> = search_order(2, 5).collect();
        assert_eq!(order, [2, 3, 1, 4, 0]);
        let order: Vec<u32> = search_order(0, 4).collect();
        assert_eq!(order, [0, 1, 3, 2]);
        let order: Vec<u32> = search_order(0, 1).collect();
        assert_eq!(order, [0]);
    }
}
