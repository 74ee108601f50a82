//! 目录内名字查找

use super::entry::{find_in_block, DirEntry};
use crate::{
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
    types::ext2_inode,
};

/// 在目录中查找名字
///
/// 逐块线性扫描，按字节比较（先比长度）。
///
/// # 返回
///
/// 找到时返回目录项，否则 `None`
pub fn find_entry(fs: &Ext2Fs, dir: &ext2_inode, name: &[u8]) -> Result<Option<DirEntry>> {
    if !dir.is_dir() {
        return Err(Error::new(ErrorKind::NotDirectory, "inode is not a directory"));
    }
    let bs = fs.block_size() as u64;
    let nblocks = dir.size().div_ceil(bs);

    for lblock in 0..nblocks {
        let phys = fs
            .mapper()
            .map(fs.groups(), dir, lblock)?
            .ok_or(Error::new(ErrorKind::Corrupted, "hole in directory"))?;
        let block = fs.cache().get(fs.dev(), phys as u64, bs as usize)?;
        let hit = block.with_data(|data| {
            find_in_block(data, name).map(|rec| {
                rec.map(|r| DirEntry {
                    inode: r.inode,
                    name: name.to_vec(),
                    file_type: r.file_type,
                })
            })
        })?;
        if hit.is_some() {
            return Ok(hit);
        }
    }
    Ok(None)
}

/// 在目录中查找名字对应的 inode 编号
pub fn lookup(fs: &Ext2Fs, dir: &ext2_inode, name: &[u8]) -> Result<Option<u32>> {
    Ok(find_entry(fs, dir, name)?.map(|e| e.inode))
}
