//! 目录项解析与块内编辑
//!
//! 目录块是一串变长记录：`inode(4) rec_len(2) name_len(1) file_type(1) name`，
//! 记录首尾相接正好覆盖整个块。`inode == 0` 的记录是墓碑，只贡献空间。
//! 这里的函数只操作单个块的字节，不接触缓存或 inode。

use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    types::ext2_dir_entry,
};
use alloc::vec::Vec;

/// 目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode 编号
    pub inode: u32,
    /// 文件名（原始字节）
    pub name: Vec<u8>,
    /// 文件类型提示（EXT2_FT_*）
    pub file_type: u8,
}

impl DirEntry {
    /// 检查是否是目录
    pub fn is_dir(&self) -> bool {
        self.file_type == EXT2_FT_DIR
    }

    /// 是否为 "." 或 ".."
    pub fn is_dot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

/// 块内一条记录的位置信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    /// 块内偏移
    pub offset: usize,
    /// inode 号（0 表示墓碑）
    pub inode: u32,
    /// 记录长度
    pub rec_len: usize,
    /// 名字长度
    pub name_len: usize,
    /// 文件类型
    pub file_type: u8,
}

impl RawRecord {
    /// 记录实际需要的长度
    pub fn used_len(&self) -> usize {
        if self.inode == 0 {
            0
        } else {
            ext2_dir_entry::record_len(self.name_len)
        }
    }

    /// 记录尾部可供拆分的空间
    pub fn slack(&self) -> usize {
        self.rec_len - self.used_len()
    }

    /// 名字字节
    pub fn name<'a>(&self, block: &'a [u8]) -> &'a [u8] {
        let start = self.offset + EXT2_DIR_ENTRY_HEADER_LEN;
        &block[start..start + self.name_len]
    }
}

/// 容纳给定长度名字所需的记录长度
pub const fn rec_len_for(name_len: usize) -> usize {
    ext2_dir_entry::record_len(name_len)
}

/// 由 inode 模式得到目录项的文件类型
pub fn file_type_from_mode(mode: u32) -> u8 {
    match mode & S_IFMT {
        S_IFREG => EXT2_FT_REG_FILE,
        S_IFDIR => EXT2_FT_DIR,
        S_IFCHR => EXT2_FT_CHRDEV,
        S_IFBLK => EXT2_FT_BLKDEV,
        S_IFIFO => EXT2_FT_FIFO,
        S_IFSOCK => EXT2_FT_SOCK,
        S_IFLNK => EXT2_FT_SYMLINK,
        _ => EXT2_FT_UNKNOWN,
    }
}

/// 解析并验证一条记录
///
/// rec_len 必须 4 字节对齐、能容纳头部和名字，且不能越过块尾。
pub fn parse_record(block: &[u8], offset: usize) -> Result<RawRecord> {
    if offset + EXT2_DIR_ENTRY_HEADER_LEN > block.len() {
        return Err(Error::new(ErrorKind::Corrupted, "directory record header past block end"));
    }
    let hdr = ext2_dir_entry::decode(&block[offset..]);
    let rec = RawRecord {
        offset,
        inode: hdr.inode,
        rec_len: hdr.rec_len as usize,
        name_len: hdr.name_len as usize,
        file_type: hdr.file_type,
    };

    if rec.rec_len < rec_len_for(0)
        || rec.rec_len % EXT2_DIR_ENTRY_ALIGN != 0
        || offset + rec.rec_len > block.len()
        || EXT2_DIR_ENTRY_HEADER_LEN + rec.name_len > rec.rec_len
    {
        log::error!(
            "[DIR] bad record at offset {}: rec_len={} name_len={}",
            offset,
            rec.rec_len,
            rec.name_len
        );
        return Err(Error::new(ErrorKind::Corrupted, "malformed directory record"));
    }
    if rec.inode != 0 && rec.name_len == 0 {
        return Err(Error::new(ErrorKind::Corrupted, "live directory record with empty name"));
    }
    Ok(rec)
}

/// 解析整个块中的所有记录
pub fn parse_block(block: &[u8]) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < block.len() {
        let rec = parse_record(block, offset)?;
        offset += rec.rec_len;
        records.push(rec);
    }
    Ok(records)
}

/// 在给定偏移写一条记录
pub fn write_record(block: &mut [u8], offset: usize, inode: u32, rec_len: usize, name: &[u8], file_type: u8) {
    let hdr = ext2_dir_entry {
        inode,
        rec_len: rec_len as u16,
        name_len: name.len() as u8,
        file_type,
    };
    hdr.encode(&mut block[offset..]);
    let start = offset + EXT2_DIR_ENTRY_HEADER_LEN;
    block[start..start + name.len()].copy_from_slice(name);
    // 名字后的填充清零
    let pad_end = (start + name.len()).next_multiple_of(EXT2_DIR_ENTRY_ALIGN).min(offset + rec_len);
    block[start + name.len()..pad_end].fill(0);
}

/// 初始化新目录的第一个块："." 占 12 字节，".." 占满剩余空间
pub fn init_dir_block(block: &mut [u8], self_ino: u32, parent_ino: u32, file_type: u8) {
    block.fill(0);
    let dot_len = rec_len_for(1);
    write_record(block, 0, self_ino, dot_len, b".", file_type);
    write_record(block, dot_len, parent_ino, block.len() - dot_len, b"..", file_type);
}

/// 初始化一个空目录块（整块是一条墓碑记录）
pub fn init_empty_block(block: &mut [u8]) {
    block.fill(0);
    let hdr = ext2_dir_entry {
        inode: 0,
        rec_len: block.len() as u16,
        name_len: 0,
        file_type: 0,
    };
    hdr.encode(block);
}

/// 在块内查找名字
pub fn find_in_block(block: &[u8], name: &[u8]) -> Result<Option<RawRecord>> {
    for rec in parse_block(block)? {
        if rec.inode != 0 && rec.name(block) == name {
            return Ok(Some(rec));
        }
    }
    Ok(None)
}

/// 尝试把一条新记录放进这个块
///
/// 优先复用足够大的墓碑；否则拆分某条记录尾部的空闲空间。
/// 块内放不下时返回 `Ok(false)`。
pub fn insert_in_block(block: &mut [u8], name: &[u8], inode: u32, file_type: u8) -> Result<bool> {
    let need = rec_len_for(name.len());
    let records = parse_block(block)?;

    if let Some(rec) = records.iter().find(|r| r.inode == 0 && r.rec_len >= need) {
        write_record(block, rec.offset, inode, rec.rec_len, name, file_type);
        return Ok(true);
    }

    if let Some(rec) = records.iter().find(|r| r.inode != 0 && r.slack() >= need) {
        let keep = rec.used_len();
        let hdr = ext2_dir_entry {
            inode: rec.inode,
            rec_len: keep as u16,
            name_len: rec.name_len as u8,
            file_type: rec.file_type,
        };
        hdr.encode(&mut block[rec.offset..]);
        write_record(block, rec.offset + keep, inode, rec.rec_len - keep, name, file_type);
        return Ok(true);
    }

    Ok(false)
}

/// 从块内删除一条记录
///
/// 有前驱时把空间并入前驱；是块内第一条时变为墓碑。
/// 返回 `false` 表示名字不在这个块里。
pub fn remove_from_block(block: &mut [u8], name: &[u8]) -> Result<bool> {
    let records = parse_block(block)?;
    let pos = match records.iter().position(|r| r.inode != 0 && r.name(block) == name) {
        Some(pos) => pos,
        None => return Ok(false),
    };
    let rec = records[pos];

    if pos == 0 {
        let hdr = ext2_dir_entry {
            inode: 0,
            rec_len: rec.rec_len as u16,
            name_len: 0,
            file_type: 0,
        };
        hdr.encode(&mut block[rec.offset..]);
    } else {
        let prev = records[pos - 1];
        let merged = prev.rec_len + rec.rec_len;
        let hdr = ext2_dir_entry {
            inode: prev.inode,
            rec_len: merged as u16,
            name_len: prev.name_len as u8,
            file_type: prev.file_type,
        };
        hdr.encode(&mut block[prev.offset..]);
    }
    Ok(true)
}

/// 把块内某个名字指向新的 inode（保留记录位置）
pub fn retarget_in_block(block: &mut [u8], name: &[u8], inode: u32, file_type: u8) -> Result<bool> {
    match find_in_block(block, name)? {
        Some(rec) => {
            let hdr = ext2_dir_entry {
                inode,
                rec_len: rec.rec_len as u16,
                name_len: rec.name_len as u8,
                file_type,
            };
            hdr.encode(&mut block[rec.offset..]);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// 块内的活动记录（不含 "." 与 ".."）
pub fn live_entries(block: &[u8]) -> Result<Vec<DirEntry>> {
    Ok(parse_block(block)?
        .into_iter()
        .filter(|r| r.inode != 0)
        .map(|r| DirEntry {
            inode: r.inode,
            name: r.name(block).to_vec(),
            file_type: r.file_type,
        })
        .filter(|e| !e.is_dot())
        .collect())
}
