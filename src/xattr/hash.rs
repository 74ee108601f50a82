//! xattr 哈希计算
//!
//! 条目哈希覆盖名字和值，块哈希由所有条目哈希滚动而成。

use byteorder::{ByteOrder, LittleEndian};

const NAME_HASH_SHIFT: u32 = 5;
const VALUE_HASH_SHIFT: u32 = 16;
const BLOCK_HASH_SHIFT: u32 = 16;

/// 计算单个条目的哈希值
///
/// 先对名字逐字节滚动，再对值按 4 字节小端字逐个滚动（不足 4 字节的尾部补零）。
///
/// # 参数
///
/// * `name` - 去掉前缀后的短名字
/// * `value` - 属性值
pub fn entry_hash(name: &[u8], value: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &byte in name {
        hash = (hash << NAME_HASH_SHIFT) ^ (hash >> (32 - NAME_HASH_SHIFT)) ^ byte as u32;
    }

    for chunk in value.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        let val = LittleEndian::read_u32(&word);
        hash = (hash << VALUE_HASH_SHIFT) ^ (hash >> (32 - VALUE_HASH_SHIFT)) ^ val;
    }
    hash
}

/// 由条目哈希计算块哈希
///
/// 任一条目哈希为 0 时块哈希为 0（该块不参与共享）。
pub fn block_hash<I: IntoIterator<Item = u32>>(entry_hashes: I) -> u32 {
    let mut hash: u32 = 0;
    for e in entry_hashes {
        if e == 0 {
            return 0;
        }
        hash = (hash << BLOCK_HASH_SHIFT) ^ (hash >> (32 - BLOCK_HASH_SHIFT)) ^ e;
    }
    hash
}
