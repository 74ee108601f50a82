//! 位图操作实现
//!
//! 块位图与 inode 位图共用的位操作。位 `i` 位于字节 `i / 8` 的第 `i % 8` 位（小端位序）。

use crate::error::{Error, ErrorKind, Result};

/// 测试位图中某一位是否被设置
///
/// # 参数
///
/// * `bitmap` - 位图数据
/// * `index` - 位索引（从 0 开始）
///
/// # 返回
///
/// 如果位被设置返回 true；索引越界时返回 false
pub fn test_bit(bitmap: &[u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    let bit_offset = (index % 8) as u8;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_offset)) != 0
}

/// 设置位图中的某一位
///
/// # 参数
///
/// * `bitmap` - 位图数据
/// * `index` - 位索引（从 0 开始）
pub fn set_bit(bitmap: &mut [u8], index: u32) -> Result<()> {
    let byte_index = (index / 8) as usize;
    if byte_index >= bitmap.len() {
        return Err(Error::new(ErrorKind::InvalidInput, "bitmap index out of range"));
    }
    bitmap[byte_index] |= 1 << (index % 8);
    Ok(())
}

/// 清除位图中的某一位
pub fn clear_bit(bitmap: &mut [u8], index: u32) -> Result<()> {
    let byte_index = (index / 8) as usize;
    if byte_index >= bitmap.len() {
        return Err(Error::new(ErrorKind::InvalidInput, "bitmap index out of range"));
    }
    bitmap[byte_index] &= !(1 << (index % 8));
    Ok(())
}

/// 在 `[start, end)` 中查找第一个空闲位（值为 0 的位）
///
/// # 返回
///
/// 成功返回第一个空闲位的索引，如果没有找到返回 None
pub fn find_first_zero(bitmap: &[u8], start: u32, end: u32) -> Option<u32> {
    let max_bits = (bitmap.len() * 8) as u32;
    let end = end.min(max_bits);

    let mut i = start;
    while i < end {
        // 整字节已满时跳过
        if i % 8 == 0 && i + 8 <= end && bitmap[(i / 8) as usize] == 0xFF {
            i += 8;
            continue;
        }
        if !test_bit(bitmap, i) {
            return Some(i);
        }
        i += 1;
    }

    None
}

/// 在目标位附近查找空闲位
///
/// 先检查 `goal` 本身，再向后扫描到下一个 64 位边界为止。
/// 用于让新分配的块紧跟在同一文件的前一个块之后。
pub fn find_zero_near(bitmap: &[u8], goal: u32, end: u32) -> Option<u32> {
    if goal >= end {
        return None;
    }
    if !test_bit(bitmap, goal) {
        return Some(goal);
    }
    let boundary = ((goal + 64) & !63).min(end);
    find_first_zero(bitmap, goal + 1, boundary)
}

/// 从 `start` 起查找一个完全空闲的字节，返回该字节的第一个位
///
/// 找到整字节空闲意味着其后有至少 8 个连续空闲位。
pub fn find_free_byte(bitmap: &[u8], start: u32, end: u32) -> Option<u32> {
    let max_bits = (bitmap.len() * 8) as u32;
    let end = end.min(max_bits);
    let first = start.div_ceil(8);
    let last = end / 8;
    (first..last)
        .find(|&b| bitmap[b as usize] == 0)
        .map(|b| b * 8)
}

/// 统计位图中从 start 到 end 范围内被设置的位数
pub fn count_ones(bitmap: &[u8], start: u32, end: u32) -> u32 {
    let max_bits = (bitmap.len() * 8) as u32;
    let end = end.min(max_bits);
    (start..end).filter(|&i| test_bit(bitmap, i)).count() as u32
}

/// 统计位图中从 start 到 end 范围内空闲的位数
pub fn count_zeros(bitmap: &[u8], start: u32, end: u32) -> u32 {
    let max_bits = (bitmap.len() * 8) as u32;
    let end = end.min(max_bits);
    if start >= end {
        return 0;
    }
    (end - start) - count_ones(bitmap, start, end)
}

/// 批量设置位图中的连续位
pub fn set_bits(bitmap: &mut [u8], start: u32, count: u32) -> Result<()> {
    for i in 0..count {
        set_bit(bitmap, start + i)?;
    }
    Ok(())
}
