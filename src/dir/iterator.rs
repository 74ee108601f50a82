//! 目录迭代器
//!
//! ## 设计说明
//!
//! 1. **不持有引用** - 迭代器只保存状态（位置、大小），不持有 inode 或块句柄
//! 2. **按需访问** - 每次前进时传入文件系统和目录 inode 的记录
//! 3. **位置即字节偏移** - 位置可以直接作为 getdents 的 `d_off` 返回，之后从这里恢复
//!
//! 目录在两次调用之间被修改时，位置可能落在某条记录内部；恢复时从块首重新解析，
//! 取第一条起始偏移不小于该位置的记录。

use super::entry::{parse_block, DirEntry};
use crate::{
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
    types::ext2_inode,
};
use alloc::vec::Vec;

/// 目录迭代器状态
#[derive(Debug, Clone)]
pub struct DirIterator {
    /// 当前位置（字节）
    pos: u64,
    /// 目录的总大小
    size: u64,
    /// 块大小
    block_size: u32,
}

impl DirIterator {
    /// 创建新的目录迭代器
    ///
    /// # 参数
    ///
    /// * `fs` - 文件系统
    /// * `dir` - 目录 inode 的记录
    /// * `pos` - 起始位置（字节偏移）
    pub fn new(fs: &Ext2Fs, dir: &ext2_inode, pos: u64) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::new(ErrorKind::NotDirectory, "inode is not a directory"));
        }
        Ok(Self {
            pos,
            size: dir.size(),
            block_size: fs.block_size(),
        })
    }

    /// 当前位置
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// 是否到达目录末尾
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.size
    }

    /// 获取下一个目录项（跳过墓碑）
    pub fn next(&mut self, fs: &Ext2Fs, dir: &ext2_inode) -> Result<Option<DirEntry>> {
        let bs = self.block_size as u64;
        while self.pos < self.size {
            let lblock = self.pos / bs;
            let offset = (self.pos % bs) as usize;

            let phys = fs
                .mapper()
                .map(fs.groups(), dir, lblock)?
                .ok_or(Error::new(ErrorKind::Corrupted, "hole in directory"))?;
            let block = fs.cache().get(fs.dev(), phys as u64, bs as usize)?;

            let found = block.with_data(|data| -> Result<Option<(u64, Option<DirEntry>)>> {
                let records = parse_block(data)?;
                Ok(records.into_iter().find(|r| r.offset >= offset).map(|r| {
                    let next = lblock * bs + (r.offset + r.rec_len) as u64;
                    let entry = (r.inode != 0).then(|| DirEntry {
                        inode: r.inode,
                        name: r.name(data).to_vec(),
                        file_type: r.file_type,
                    });
                    (next, entry)
                }))
            })?;

            match found {
                Some((next, entry)) => {
                    self.pos = next;
                    if let Some(entry) = entry {
                        return Ok(Some(entry));
                    }
                }
                // 位置越过了块内最后一条记录
                None => self.pos = (lblock + 1) * bs,
            }
        }
        Ok(None)
    }
}

/// 读取整个目录（包括 "." 与 ".."）
pub fn read_dir(fs: &Ext2Fs, dir: &ext2_inode) -> Result<Vec<DirEntry>> {
    let mut iter = DirIterator::new(fs, dir, 0)?;
    let mut entries = Vec::new();
    while let Some(entry) = iter.next(fs, dir)? {
        entries.push(entry);
    }
    Ok(entries)
}
