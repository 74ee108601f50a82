//! xattr 公共 API
//!
//! 调用者对 `set`/`remove` 持有 inode 的独占操作锁，对 `get`/`list` 持有共享锁；
//! 这里再取 inode 的 xattr 锁。修改一律写时复制：新内容写进新分配的块，
//! 在 inode 上换指针后再释放旧块。

use super::block::{read_refcount, write_refcount, XattrBlock};
use super::prefix::{full_name, split_name};
use super::XattrFlags;
use crate::{
    balloc,
    consts::*,
    error::{Error, ErrorKind, Result},
    fs::Ext2Fs,
    inode::Inode,
};
use alloc::vec;
use alloc::vec::Vec;

/// 读出 inode 当前的属性块；没有属性块时返回空表
fn load(fs: &Ext2Fs, file_acl: u32) -> Result<XattrBlock> {
    if file_acl == 0 {
        return Ok(XattrBlock::default());
    }
    fs.geo().check_block(file_acl)?;
    let block = fs.cache().get(fs.dev(), file_acl as u64, fs.block_size() as usize)?;
    block.with_data(XattrBlock::decode).map_err(|e| {
        log::error!("[XATTR] dev={} block {} is invalid: {}", fs.dev(), file_acl, e);
        fs.fs_error(e)
    })
}

/// 获取属性值
///
/// # 错误
///
/// 属性不存在时返回 `NoData`
pub fn get(fs: &Ext2Fs, inode: &Inode, name: &[u8]) -> Result<Vec<u8>> {
    let (ns, short) = split_name(name)?;
    let _guard = inode.xattr_lock();
    let table = load(fs, inode.snapshot().file_acl)?;
    table
        .find(ns, short)
        .map(|e| e.value.clone())
        .ok_or(Error::new(ErrorKind::NoData, "no such attribute"))
}

/// 列出全部属性的完整名字（带命名空间前缀）
pub fn list(fs: &Ext2Fs, inode: &Inode) -> Result<Vec<Vec<u8>>> {
    let _guard = inode.xattr_lock();
    let table = load(fs, inode.snapshot().file_acl)?;
    Ok(table.entries.iter().map(|e| full_name(e.ns, &e.name)).collect())
}

/// 设置属性
///
/// # 参数
///
/// * `flags` - `CREATE` 要求属性不存在，`REPLACE` 要求属性已存在
///
/// # 错误
///
/// * `AlreadyExists` / `NoData` - 与 `flags` 的要求不符
/// * `NoSpace` - 属性表放不进一个块，或没有空闲块
pub fn set(fs: &Ext2Fs, inode: &Inode, name: &[u8], value: &[u8], flags: XattrFlags) -> Result<()> {
    let (ns, short) = split_name(name)?;
    if flags.contains(XattrFlags::CREATE | XattrFlags::REPLACE) {
        return Err(Error::new(ErrorKind::InvalidInput, "conflicting xattr flags"));
    }
    fs.check_writable()?;
    let _guard = inode.xattr_lock();
    let old = inode.snapshot().file_acl;
    let mut table = load(fs, old)?;

    let exists = table.find(ns, short).is_some();
    if exists && flags.contains(XattrFlags::CREATE) {
        return Err(Error::new(ErrorKind::AlreadyExists, "attribute exists"));
    }
    if !exists && flags.contains(XattrFlags::REPLACE) {
        return Err(Error::new(ErrorKind::NoData, "no such attribute"));
    }

    table.upsert(ns, short, value);
    store(fs, inode, old, table)?;
    log::debug!("[XATTR] inode {} set {} bytes under index {}", inode.ino(), value.len(), ns.index());
    Ok(())
}

/// 删除属性
///
/// # 错误
///
/// 属性不存在时返回 `NoData`
pub fn remove(fs: &Ext2Fs, inode: &Inode, name: &[u8]) -> Result<()> {
    let (ns, short) = split_name(name)?;
    fs.check_writable()?;
    let _guard = inode.xattr_lock();
    let old = inode.snapshot().file_acl;
    let mut table = load(fs, old)?;
    if !table.remove(ns, short) {
        return Err(Error::new(ErrorKind::NoData, "no such attribute"));
    }
    store(fs, inode, old, table)?;
    log::debug!("[XATTR] inode {} removed attribute under index {}", inode.ino(), ns.index());
    Ok(())
}

/// 写出新的属性表并替换 inode 的属性块指针
fn store(fs: &Ext2Fs, inode: &Inode, old: u32, mut table: XattrBlock) -> Result<()> {
    let bs = fs.block_size() as usize;
    let sectors = fs.block_size() / EXT2_IBLOCK_UNIT as u32;
    let now = fs.now();

    let new = if table.entries.is_empty() {
        0
    } else {
        table.refcount = 1;
        let mut image = vec![0u8; bs];
        table.encode(&mut image)?;

        let (group, _) = fs.geo().ino_to_group(inode.ino());
        let goal = if old != 0 { old } else { fs.geo().group_first_block(group) };
        let phys = balloc::alloc_block(fs.groups(), goal)?;
        let written = fs.cache().get_zero(fs.dev(), phys as u64, bs).and_then(|mut block| {
            block.with_data_mut(|data| data.copy_from_slice(&image));
            if fs.options().sync {
                block.sync()?;
            }
            Ok(())
        });
        if let Err(e) = written {
            fs.cache().forget(fs.dev(), phys as u64);
            balloc::free_block(fs.groups(), phys)?;
            return Err(fs.fs_error(e));
        }
        phys
    };

    inode.update(|r| {
        r.file_acl = new;
        match (old != 0, new != 0) {
            (false, true) => r.blocks += sectors,
            (true, false) => r.blocks = r.blocks.saturating_sub(sectors),
            _ => {}
        }
        r.set_ctime(now);
    })?;

    if old != 0 {
        release_block(fs, old)?;
    }
    Ok(())
}

/// 释放一个属性块的引用
///
/// 引用计数大于 1 时只减计数，否则把块还给分配器。
pub(crate) fn release_block(fs: &Ext2Fs, block_no: u32) -> Result<()> {
    fs.geo().check_block(block_no)?;
    let mut block = fs.cache().get(fs.dev(), block_no as u64, fs.block_size() as usize)?;
    let refcount = block.with_data(read_refcount).map_err(|e| fs.fs_error(e))?;
    if refcount > 1 {
        block.with_data_mut(|data| write_refcount(data, refcount - 1));
        log::trace!("[XATTR] block {} refcount -> {}", block_no, refcount - 1);
        return Ok(());
    }
    drop(block);
    fs.cache().forget(fs.dev(), block_no as u64);
    balloc::free_block(fs.groups(), block_no).map_err(|e| fs.fs_error(e))?;
    log::trace!("[XATTR] freed block {}", block_no);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::fs::filesystem::tests::mount_test_fs;
    use crate::fs::mkfs::FormatOptions;

    #[test]
    fn test_set_get_list_remove() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let root = fs.root().unwrap();
        let (free_before, _) = fs.groups().free_totals();
        let blocks_before = root.snapshot().blocks;

        set(&fs, &root, b"user.color", b"blue", XattrFlags::empty()).unwrap();
        assert_eq!(get(&fs, &root, b"user.color").unwrap(), b"blue");
        assert_eq!(fs.groups().free_totals().0, free_before - 1);
        assert_eq!(root.snapshot().blocks, blocks_before + 2);

        set(&fs, &root, b"security.label", b"x", XattrFlags::empty()).unwrap();
        let mut names = list(&fs, &root).unwrap();
        names.sort();
        assert_eq!(names, vec![b"security.label".to_vec(), b"user.color".to_vec()]);
        // 写时复制：块数不变
        assert_eq!(fs.groups().free_totals().0, free_before - 1);

        remove(&fs, &root, b"user.color").unwrap();
        remove(&fs, &root, b"security.label").unwrap();
        assert_eq!(root.snapshot().file_acl, 0);
        assert_eq!(root.snapshot().blocks, blocks_before);
        assert_eq!(fs.groups().free_totals().0, free_before);
        assert_eq!(get(&fs, &root, b"user.color").unwrap_err().kind(), ErrorKind::NoData);
    }

    #[test]
    fn test_create_and_replace_flags() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let root = fs.root().unwrap();
        assert_eq!(
            set(&fs, &root, b"user.a", b"1", XattrFlags::REPLACE).unwrap_err().kind(),
            ErrorKind::NoData
        );
        set(&fs, &root, b"user.a", b"1", XattrFlags::CREATE).unwrap();
        assert_eq!(
            set(&fs, &root, b"user.a", b"2", XattrFlags::CREATE).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        set(&fs, &root, b"user.a", b"2", XattrFlags::REPLACE).unwrap();
        assert_eq!(get(&fs, &root, b"user.a").unwrap(), b"2");
        assert_eq!(remove(&fs, &root, b"user.b").unwrap_err().kind(), ErrorKind::NoData);
    }

    #[test]
    fn test_oversized_table_leaves_old_block() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let root = fs.root().unwrap();
        set(&fs, &root, b"user.a", &[1u8; 600], XattrFlags::empty()).unwrap();
        let acl = root.snapshot().file_acl;
        assert_eq!(
            set(&fs, &root, b"user.b", &[2u8; 600], XattrFlags::empty()).unwrap_err().kind(),
            ErrorKind::NoSpace
        );
        assert_eq!(root.snapshot().file_acl, acl);
        assert_eq!(get(&fs, &root, b"user.a").unwrap().len(), 600);
    }

    #[test]
    fn test_shared_block_only_loses_a_reference() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let root = fs.root().unwrap();
        set(&fs, &root, b"user.a", b"1", XattrFlags::empty()).unwrap();
        let acl = root.snapshot().file_acl;
        {
            let mut block = fs.cache().get(fs.dev(), acl as u64, 1024).unwrap();
            block.with_data_mut(|d| write_refcount(d, 2));
        }
        remove(&fs, &root, b"user.a").unwrap();
        let block = fs.cache().get(fs.dev(), acl as u64, 1024).unwrap();
        assert_eq!(block.with_data(read_refcount).unwrap(), 1);
        assert!(balloc::is_block_allocated(fs.groups(), acl).unwrap());
    }
}
