//! 目录写操作
//!
//! 在目录 inode 上插入、删除、改指目录项。调用者必须持有目录的独占操作锁。
//! 每次成功修改后更新目录的 mtime/ctime。

use super::entry::{
    init_dir_block, init_empty_block, insert_in_block, parse_block, remove_from_block,
    retarget_in_block, DirEntry,
};
use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
    inode::Inode,
    types::ext2_inode,
};

/// 带辅助索引的目录不允许修改
fn check_modifiable(dir: &ext2_inode) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::new(ErrorKind::NotDirectory, "inode is not a directory"));
    }
    if dir.flags & EXT2_INDEX_FL != 0 {
        log::warn!("[DIR] refusing to modify indexed directory");
        return Err(Error::new(ErrorKind::ReadOnly, "indexed directories are read-only"));
    }
    Ok(())
}

fn dir_block(fs: &Ext2Fs, dir: &ext2_inode, lblock: u64) -> Result<u32> {
    fs.mapper()
        .map(fs.groups(), dir, lblock)?
        .ok_or(Error::new(ErrorKind::Corrupted, "hole in directory"))
}

/// 添加目录项
///
/// 先在已有块中寻找墓碑或尾部空闲空间；都放不下时为目录追加一个新块。
///
/// # 参数
///
/// * `dir` - 目录 inode（调用者持有独占锁）
/// * `name` - 名字（1..=255 字节）
/// * `ino` - 目标 inode
/// * `file_type` - 目录项类型提示
pub fn add_entry(fs: &Ext2Fs, dir: &Inode, name: &[u8], ino: u32, file_type: u8) -> Result<()> {
    let raw = dir.snapshot();
    check_modifiable(&raw)?;
    let bs = fs.block_size() as u64;
    let nblocks = raw.size() / bs;
    let mut last_phys = 0;

    for lblock in 0..nblocks {
        let phys = dir_block(fs, &raw, lblock)?;
        last_phys = phys;
        let mut block = fs.cache().get(fs.dev(), phys as u64, bs as usize)?;
        if block.with_data_mut(|data| insert_in_block(data, name, ino, file_type))? {
            log::trace!("[DIR] dir {} add '{}' -> {} in block {}", dir.ino(), EntryName(name), ino, lblock);
            let now = fs.now();
            return dir.update(|r| {
                r.set_mtime(now);
                r.set_ctime(now);
            });
        }
    }

    // 追加新块
    let now = fs.now();
    dir.update_with(|r| {
        let goal = if last_phys != 0 { last_phys + 1 } else { 0 };
        let (phys, _) = fs.mapper().map_or_alloc(fs.groups(), r, nblocks, goal)?;
        let filled = fs.cache().get_zero(fs.dev(), phys as u64, bs as usize).and_then(|mut block| {
            block.with_data_mut(|data| {
                init_empty_block(data);
                insert_in_block(data, name, ino, file_type)
            })
        });
        match filled {
            Ok(true) => {}
            Ok(false) => {
                fs.mapper().free_range(fs.groups(), r, nblocks, Some(nblocks + 1))?;
                return Err(Error::new(ErrorKind::InvalidInput, "entry larger than a block"));
            }
            Err(e) => {
                fs.mapper().free_range(fs.groups(), r, nblocks, Some(nblocks + 1))?;
                return Err(e);
            }
        }
        r.set_size((nblocks + 1) * bs);
        r.set_mtime(now);
        r.set_ctime(now);
        log::debug!("[DIR] dir {} grew to {} blocks for '{}'", dir.ino(), nblocks + 1, EntryName(name));
        Ok(())
    })
}

/// 删除目录项
///
/// # 返回
///
/// 被删除的目录项；名字不存在时返回 `NotFound`
pub fn remove_entry(fs: &Ext2Fs, dir: &Inode, name: &[u8]) -> Result<DirEntry> {
    let raw = dir.snapshot();
    check_modifiable(&raw)?;
    let bs = fs.block_size() as u64;

    for lblock in 0..raw.size() / bs {
        let phys = dir_block(fs, &raw, lblock)?;
        let mut block = fs.cache().get(fs.dev(), phys as u64, bs as usize)?;
        let found = block.with_data(|data| {
            super::entry::find_in_block(data, name).map(|r| {
                r.map(|r| DirEntry {
                    inode: r.inode,
                    name: name.to_vec(),
                    file_type: r.file_type,
                })
            })
        })?;
        if let Some(entry) = found {
            block.with_data_mut(|data| remove_from_block(data, name))?;
            log::trace!("[DIR] dir {} remove '{}'", dir.ino(), EntryName(name));
            let now = fs.now();
            dir.update(|r| {
                r.set_mtime(now);
                r.set_ctime(now);
            })?;
            return Ok(entry);
        }
    }
    Err(Error::new(ErrorKind::NotFound, "no such directory entry"))
}

/// 把已有目录项改指到另一个 inode（记录位置不变）
pub fn retarget_entry(fs: &Ext2Fs, dir: &Inode, name: &[u8], ino: u32, file_type: u8) -> Result<()> {
    let raw = dir.snapshot();
    check_modifiable(&raw)?;
    let bs = fs.block_size() as u64;

    for lblock in 0..raw.size() / bs {
        let phys = dir_block(fs, &raw, lblock)?;
        let mut block = fs.cache().get(fs.dev(), phys as u64, bs as usize)?;
        let present = block.with_data(|data| super::entry::find_in_block(data, name))?.is_some();
        if present {
            block.with_data_mut(|data| retarget_in_block(data, name, ino, file_type))?;
            let now = fs.now();
            return dir.update(|r| {
                r.set_mtime(now);
                r.set_ctime(now);
            });
        }
    }
    Err(Error::new(ErrorKind::NotFound, "no such directory entry"))
}

/// 为新目录分配第一个块并写入 "." 与 ".."
pub fn init_dir(fs: &Ext2Fs, dir: &Inode, parent_ino: u32) -> Result<()> {
    let bs = fs.block_size() as u64;
    let ino = dir.ino();
    dir.update_with(|r| {
        let (group, _) = fs.geo().ino_to_group(ino);
        let goal = fs.geo().group_first_block(group);
        let (phys, _) = fs.mapper().map_or_alloc(fs.groups(), r, 0, goal)?;
        let written = fs.cache().get_zero(fs.dev(), phys as u64, bs as usize).map(|mut block| {
            block.with_data_mut(|data| init_dir_block(data, ino, parent_ino, EXT2_FT_DIR))
        });
        if let Err(e) = written {
            fs.mapper().free_range(fs.groups(), r, 0, None)?;
            return Err(e);
        }
        r.set_size(bs);
        Ok(())
    })
}

/// 目录是否为空（只有 "."、".." 和墓碑）
pub fn is_empty(fs: &Ext2Fs, dir: &ext2_inode) -> Result<bool> {
    let bs = fs.block_size() as u64;
    for lblock in 0..dir.size().div_ceil(bs) {
        let phys = dir_block(fs, dir, lblock)?;
        let block = fs.cache().get(fs.dev(), phys as u64, bs as usize)?;
        let has_live = block.with_data(|data| {
            parse_block(data).map(|records| {
                records
                    .iter()
                    .any(|r| r.inode != 0 && r.name(data) != b"." && r.name(data) != b"..")
            })
        })?;
        if has_live {
            return Ok(false);
        }
    }
    Ok(true)
}

/// 日志里显示目录项名字
struct EntryName<'a>(&'a [u8]);

impl core::fmt::Display for EntryName<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match core::str::from_utf8(self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:x?}", self.0),
        }
    }
}
