//! 文件数据操作
//!
//! 读、写、截断、同步与符号链接内容。调用者持有 inode 的操作锁：
//! 读取持共享锁，写入与截断持独占锁。
//!
//! 写入遵循"先提交、后发布"：数据块和间接表全部进入缓存之后，
//! 才把新的大小和时间戳写回 inode 记录。

use super::filesystem::Ext2Fs;
use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
    inode::{Inode, InodeState},
    types::ext2_inode,
};
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

impl Ext2Fs {
    /// 从文件读取数据
    ///
    /// 读到文件末尾为止；空洞读出零且不访问设备。
    ///
    /// # 返回
    ///
    /// 实际读取的字节数（越过文件末尾时为 0）
    pub fn read_at(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_alive()?;
        let raw = inode.snapshot();
        let size = raw.size();
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }

        let bs = self.block_size() as u64;
        let len = (buf.len() as u64).min(size - offset) as usize;
        let mut done = 0usize;

        while done < len {
            let pos = offset + done as u64;
            let lblock = pos / bs;
            let off = (pos % bs) as usize;
            let chunk = (bs as usize - off).min(len - done);
            let dst = &mut buf[done..done + chunk];

            let step = self.mapper().map(self.groups(), &raw, lblock).and_then(|mapped| match mapped {
                None => {
                    dst.fill(0);
                    Ok(())
                }
                Some(phys) => {
                    let block = self.cache().get(self.dev(), phys as u64, bs as usize)?;
                    block.with_data(|data| dst.copy_from_slice(&data[off..off + chunk]));
                    Ok(())
                }
            });
            if let Err(e) = step {
                if done == 0 {
                    return Err(e);
                }
                log::warn!("[EXT2] short read on inode {} at {}: {}", inode.ino(), pos, e);
                break;
            }
            done += chunk;
        }
        Ok(done)
    }

    /// 更新访问时间
    ///
    /// `noatime` 挂载、NOATIME 标志或只读卷时不更新。
    pub fn touch_atime(&self, inode: &Inode) {
        if self.options().noatime || self.is_read_only() || inode.read().flags & EXT2_NOATIME_FL != 0 {
            return;
        }
        let now = self.now();
        if let Err(e) = inode.update(|r| r.set_atime(now)) {
            log::warn!("[EXT2] atime update on inode {} failed: {}", inode.ino(), e);
        }
    }

    /// 向文件写入数据
    ///
    /// 必要时分配数据块和间接表；越过文件末尾时扩展大小。
    /// 中途失败时返回已经提交的字节数，失败块的分配被撤销。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::NotPermitted` - 不可变文件，或仅追加文件的非末尾写
    /// - `ErrorKind::InvalidInput` - 超过最大文件大小
    /// - `ErrorKind::NoSpace` - 第一个块就分配失败
    pub fn write_at(&self, inode: &Inode, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        let original = inode.snapshot();
        if original.flags & EXT2_IMMUTABLE_FL != 0 {
            return Err(Error::new(ErrorKind::NotPermitted, "inode is immutable"));
        }
        if original.flags & EXT2_APPEND_FL != 0 && offset != original.size() {
            return Err(Error::new(ErrorKind::NotPermitted, "inode is append-only"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(Error::new(ErrorKind::InvalidInput, "write range overflows"))?;
        if end > self.geo().max_file_size() {
            return Err(Error::new(ErrorKind::InvalidInput, "file too large"));
        }

        let bs = self.block_size() as u64;
        let write_through = self.options().sync || original.flags & EXT2_SYNC_FL != 0;
        let mut raw = original;
        let mut done = 0usize;
        let mut failure = None;
        let mut goal = self.block_goal(inode, &raw, offset / bs);

        while done < buf.len() {
            let pos = offset + done as u64;
            let lblock = pos / bs;
            let off = (pos % bs) as usize;
            let chunk = (bs as usize - off).min(buf.len() - done);

            let (phys, fresh) = match self.mapper().map_or_alloc(self.groups(), &mut raw, lblock, goal) {
                Ok(mapped) => mapped,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            let committed = (|| -> Result<()> {
                let mut block = if fresh || chunk == bs as usize {
                    self.cache().get_zero(self.dev(), phys as u64, bs as usize)?
                } else {
                    self.cache().get(self.dev(), phys as u64, bs as usize)?
                };
                block.with_data_mut(|data| data[off..off + chunk].copy_from_slice(&buf[done..done + chunk]));
                if write_through {
                    block.sync()?;
                }
                Ok(())
            })();

            if let Err(e) = committed {
                if fresh {
                    if let Err(undo) = self.mapper().free_range(self.groups(), &mut raw, lblock, Some(lblock + 1)) {
                        log::error!("[EXT2] rollback of block {} on inode {} failed: {}", phys, inode.ino(), undo);
                    }
                }
                failure = Some(e);
                break;
            }
            done += chunk;
            goal = phys + 1;
        }

        if done > 0 {
            let now = self.now();
            if offset + done as u64 > raw.size() {
                raw.set_size(offset + done as u64);
            }
            raw.set_mtime(now);
            raw.set_ctime(now);
        }
        if done > 0 || raw != original {
            inode.update(|r| publish_mapping(r, &raw))?;
        }

        match failure {
            None => Ok(done),
            Some(e) if done > 0 => {
                log::warn!(
                    "[EXT2] short write on inode {}: {} of {} bytes committed: {}",
                    inode.ino(),
                    done,
                    buf.len(),
                    e
                );
                self.fs_error(e);
                Ok(done)
            }
            Some(e) => Err(self.fs_error(e)),
        }
    }

    /// 分配提示：前一个逻辑块的物理块之后，否则是 inode 所在块组的起点
    fn block_goal(&self, inode: &Inode, raw: &ext2_inode, lblock: u64) -> u32 {
        if lblock > 0 {
            if let Ok(Some(prev)) = self.mapper().map(self.groups(), raw, lblock - 1) {
                return prev + 1;
            }
        }
        let (group, _) = self.geo().ino_to_group(inode.ino());
        self.geo().group_first_block(group)
    }

    /// 截断或扩展文件
    ///
    /// 扩展只修改大小（留下空洞）；收缩自底向上释放 `⌈size / block_size⌉` 之后的全部块，
    /// 并把最后一个保留块中 `size` 之后的字节清零。
    pub fn truncate(&self, inode: &Inode, size: u64) -> Result<()> {
        self.check_writable()?;
        let mut raw = inode.snapshot();
        if raw.flags & (EXT2_IMMUTABLE_FL | EXT2_APPEND_FL) != 0 {
            return Err(Error::new(ErrorKind::NotPermitted, "inode is immutable or append-only"));
        }
        if raw.is_dir() {
            return Err(Error::new(ErrorKind::IsDirectory, "cannot truncate a directory"));
        }
        if !raw.is_reg() {
            return Err(Error::new(ErrorKind::InvalidInput, "truncate of non-regular file"));
        }
        if size > self.geo().max_file_size() {
            return Err(Error::new(ErrorKind::InvalidInput, "file too large"));
        }

        let bs = self.block_size() as u64;
        let mut result = Ok(());
        if size < raw.size() {
            result = self.mapper().free_range(self.groups(), &mut raw, size.div_ceil(bs), None);
            let tail = (size % bs) as usize;
            if result.is_ok() && tail != 0 {
                result = self.mapper().map(self.groups(), &raw, size / bs).and_then(|mapped| match mapped {
                    Some(phys) => {
                        let mut block = self.cache().get(self.dev(), phys as u64, bs as usize)?;
                        block.with_data_mut(|data| data[tail..].fill(0));
                        Ok(())
                    }
                    None => Ok(()),
                });
            }
        }

        if result.is_ok() {
            raw.set_size(size);
        }
        let now = self.now();
        raw.set_mtime(now);
        raw.set_ctime(now);
        inode.update(|r| publish_mapping(r, &raw))?;
        log::debug!("[EXT2] truncate inode {} to {}", inode.ino(), size);
        self.escalate(result)
    }

    /// 把 inode 记录、间接表、数据块以及卷元数据写到设备
    ///
    /// 块缓存按设备写回，所以 `datasync` 与完整同步走同一条路径。
    pub fn fsync(&self, inode: &Inode, _datasync: bool) -> Result<()> {
        let result = self.sync_fs();
        if result.is_ok() {
            inode.clear_state(InodeState::DIRTY);
        }
        self.escalate(result)
    }

    /// 读取符号链接目标
    pub fn read_link(&self, inode: &Inode) -> Result<Vec<u8>> {
        let raw = inode.snapshot();
        if !raw.is_symlink() {
            return Err(Error::new(ErrorKind::InvalidInput, "not a symbolic link"));
        }
        let size = raw.size() as usize;
        if size > PATH_MAX {
            return Err(Error::new(ErrorKind::Corrupted, "symlink body too long"));
        }
        if self.is_fast_symlink(&raw) {
            let mut inline = [0u8; EXT2_N_BLOCKS * 4];
            LittleEndian::write_u32_into(&raw.block, &mut inline);
            if size > inline.len() {
                return Err(Error::new(ErrorKind::Corrupted, "fast symlink longer than inline area"));
            }
            return Ok(inline[..size].to_vec());
        }
        let mut target = vec![0u8; size];
        let n = self.read_at(inode, 0, &mut target)?;
        target.truncate(n);
        Ok(target)
    }

    /// 写入符号链接目标
    ///
    /// 短目标内联在块指针数组中，长目标占用一个数据块。
    pub(crate) fn write_link(&self, inode: &Inode, target: &[u8]) -> Result<()> {
        if target.len() <= EXT2_FAST_SYMLINK_MAX {
            let mut inline = [0u8; EXT2_N_BLOCKS * 4];
            inline[..target.len()].copy_from_slice(target);
            let mut ptrs = [0u32; EXT2_N_BLOCKS];
            LittleEndian::read_u32_into(&inline, &mut ptrs);
            return inode.update(|r| {
                r.block = ptrs;
                r.set_size(target.len() as u64);
            });
        }
        let n = self.write_at(inode, 0, target)?;
        if n != target.len() {
            return Err(Error::new(ErrorKind::NoSpace, "symlink body only partially written"));
        }
        Ok(())
    }
}

/// 发布块映射相关字段
///
/// 只覆盖写入路径拥有的字段，链接数、属主等由其他路径在同一把数据锁下修改。
fn publish_mapping(dst: &mut ext2_inode, src: &ext2_inode) {
    dst.block = src.block;
    dst.blocks = src.blocks;
    dst.set_size(src.size());
    dst.set_mtime(src.mtime());
    dst.set_ctime(src.ctime());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::fs::filesystem::tests::mount_test_fs;
    use crate::fs::mkfs::FormatOptions;
    use alloc::sync::Arc;

    fn new_file(fs: &Arc<Ext2Fs>) -> Arc<Inode> {
        let root = fs.root().unwrap();
        let inode = fs.new_inode(&root, S_IFREG | 0o644, 0, 0).unwrap();
        inode.update(|r| r.links_count = 1).unwrap();
        inode
    }

    #[test]
    fn test_sparse_write_allocates_one_block_and_table() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let file = new_file(&fs);
        let (free_before, _) = fs.groups().free_totals();

        assert_eq!(fs.write_at(&file, 13_312, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap(), 4);
        assert_eq!(file.size(), 13_316);
        assert_eq!(fs.groups().free_totals().0, free_before - 2);
        assert_eq!(file.snapshot().blocks, 4);

        let mut word = [0u8; 4];
        assert_eq!(fs.read_at(&file, 13_312, &mut word).unwrap(), 4);
        assert_eq!(word, [0xDE, 0xAD, 0xBE, 0xEF]);
        let mut one = [0xFFu8; 1];
        fs.read_at(&file, 4, &mut one).unwrap();
        assert_eq!(one, [0]);
        assert_eq!(fs.read_at(&file, 13_316, &mut one).unwrap(), 0);
    }

    #[test]
    fn test_write_limit_is_invalid_input() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let file = new_file(&fs);
        let max = fs.geo().max_file_size();
        assert_eq!(fs.write_at(&file, max, b"x").unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_truncate_zeroes_tail_and_frees() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let file = new_file(&fs);
        let (free_before, _) = fs.groups().free_totals();
        let data = vec![0xABu8; 20 * 1024];
        assert_eq!(fs.write_at(&file, 0, &data).unwrap(), data.len());

        fs.truncate(&file, 1500).unwrap();
        assert_eq!(file.size(), 1500);
        assert_eq!(file.snapshot().blocks, 4);
        assert_eq!(fs.groups().free_totals().0, free_before - 2);

        fs.truncate(&file, 4000).unwrap();
        let mut buf = vec![0xFFu8; 4000];
        assert_eq!(fs.read_at(&file, 0, &mut buf).unwrap(), 4000);
        assert!(buf[..1500].iter().all(|&b| b == 0xAB));
        assert!(buf[1500..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_through_failure_is_short_write() {
        let opts = MountOptions { sync: true, ..Default::default() };
        let (fs, mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), opts);
        let file = new_file(&fs);
        let (free_before, _) = fs.groups().free_totals();

        mem.faults().fail_write_after(1);
        let n = fs.write_at(&file, 0, &vec![0x5Au8; 8192]).unwrap();
        assert_eq!(n, 1024);
        assert_eq!(file.size(), 1024);
        assert_eq!(fs.groups().free_totals().0, free_before - 1);
    }

    #[test]
    fn test_fast_and_slow_symlinks() {
        let (fs, _mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let root = fs.root().unwrap();
        let short = fs.new_inode(&root, S_IFLNK | 0o777, 0, 0).unwrap();
        fs.write_link(&short, b"/etc/target").unwrap();
        assert!(fs.is_fast_symlink(&short.snapshot()));
        assert_eq!(fs.read_link(&short).unwrap(), b"/etc/target");

        let long_target = vec![b'x'; 300];
        let long = fs.new_inode(&root, S_IFLNK | 0o777, 0, 0).unwrap();
        fs.write_link(&long, &long_target).unwrap();
        assert!(!fs.is_fast_symlink(&long.snapshot()));
        assert_eq!(fs.read_link(&long).unwrap(), long_target);
    }
}
