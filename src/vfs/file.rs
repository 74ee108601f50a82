//! 打开文件记录
//!
//! 描述符表中的每一项都是一个 [`File`]：普通的 [`OpenFile`] 或者监视实例。
//! `OpenFile` 记录一次 `open` 的结果：路径快照、访问模式、状态标志和读写游标。
//! 复制出来的描述符共享同一个记录，游标锁把它们的读写串行化。

use super::mount::PathRef;
use super::ops::{DirEntryInfo, InodeOps};
use super::watch::{WatchMask, WatchRegistry};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FileAttr, InodeType};
use crate::hal::{Credentials, SystemHal};
use crate::sync::{lock_interruptible, Mutex};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

bitflags::bitflags! {
    /// `open` 标志（数值与 Linux 一致）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        /// 只写
        const WRONLY = 0o1;
        /// 读写
        const RDWR = 0o2;
        /// 不存在时创建
        const CREAT = 0o100;
        /// 与 CREAT 同用：必须不存在
        const EXCL = 0o200;
        /// 打开时截断
        const TRUNC = 0o1000;
        /// 追加写
        const APPEND = 0o2000;
        /// 非阻塞
        const NONBLOCK = 0o4000;
        /// 必须是目录
        const DIRECTORY = 0o200000;
        /// 不跟随最后一个分量的符号链接
        const NOFOLLOW = 0o400000;
        /// exec 时关闭
        const CLOEXEC = 0o2000000;
        /// 只取得位置，不能读写
        const PATH = 0o10000000;
        /// 在目录所在卷上创建无名文件
        const TMPFILE = 0o20000000 | Self::DIRECTORY.bits();
    }
}

impl OpenFlags {
    /// 访问模式位
    pub const ACCMODE: u32 = 0o3;

    /// `fcntl(F_SETFL)` 可修改的标志
    pub const SETTABLE: OpenFlags = OpenFlags::APPEND.union(OpenFlags::NONBLOCK);

    /// 是否可读
    pub fn readable(self) -> bool {
        self.bits() & Self::ACCMODE != OpenFlags::WRONLY.bits()
    }

    /// 是否可写
    pub fn writable(self) -> bool {
        matches!(self.bits() & Self::ACCMODE, 0o1 | 0o2)
    }
}

/// `seek` 的基准
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// 文件开头
    Set,
    /// 当前游标
    Cur,
    /// 文件末尾
    End,
}

fn invalid<T>() -> Result<T> {
    Err(Error::new(ErrorKind::InvalidInput, "operation not valid on this descriptor"))
}

/// 描述符指向的对象
pub trait File: Send + Sync + Any {
    /// 从游标处读取
    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        invalid()
    }

    /// 在游标处写入
    fn write(&self, _buf: &[u8]) -> Result<usize> {
        invalid()
    }

    /// 在给定偏移读取，不移动游标
    fn pread(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
        invalid()
    }

    /// 在给定偏移写入，不移动游标
    fn pwrite(&self, _offset: u64, _buf: &[u8]) -> Result<usize> {
        invalid()
    }

    /// 移动游标
    fn seek(&self, _offset: i64, _whence: SeekWhence) -> Result<u64> {
        invalid()
    }

    /// 属性快照
    fn stat(&self) -> Result<FileAttr> {
        invalid()
    }

    /// 状态标志
    fn status_flags(&self) -> u32 {
        0
    }

    /// 修改状态标志
    fn set_status_flags(&self, _flags: u32) -> Result<()> {
        Ok(())
    }

    /// 向下转型
    fn as_any(&self) -> &dyn Any;
}

impl dyn File {
    /// 尝试获取具体类型的引用
    pub fn downcast_ref<T: File>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// 向位置本身和它所在目录的登记派发事件
pub(crate) fn notify_path(watches: &WatchRegistry, path: &PathRef, mask: WatchMask) {
    let Some(node) = path.dentry.inode() else {
        return;
    };
    if watches.watched_inodes() == 0 {
        return;
    }
    let mask = if node.node_type() == InodeType::Directory { mask | WatchMask::ISDIR } else { mask };
    watches.notify((node.device_id(), node.ino()), mask, 0, b"", false);
    if path.is_mount_root() {
        return;
    }
    let name = path.dentry.name();
    if name.is_empty() {
        return;
    }
    if let Some(dir) = path.dentry.parent().as_ref().and_then(|p| p.inode()) {
        watches.notify((dir.device_id(), dir.ino()), mask, 0, &name, path.dentry.is_stale());
    }
}

/// 一次 `open` 的结果
pub struct OpenFile {
    path: PathRef,
    node: Arc<dyn InodeOps>,
    flags: AtomicU32,
    cursor: Mutex<u64>,
    cred: Credentials,
    watches: Arc<WatchRegistry>,
    hal: Arc<dyn SystemHal>,
    poisoned: AtomicBool,
}

impl OpenFile {
    /// 在一个正目录项上创建记录
    ///
    /// # 错误
    ///
    /// - `NotFound` - 目录项为负项
    pub fn new(
        path: PathRef,
        flags: OpenFlags,
        cred: Credentials,
        watches: Arc<WatchRegistry>,
        hal: Arc<dyn SystemHal>,
    ) -> Result<Self> {
        let node = path
            .dentry
            .inode()
            .cloned()
            .ok_or(Error::new(ErrorKind::NotFound, "negative dentry"))?;
        path.mount.file_opened();
        Ok(Self {
            path,
            node,
            flags: AtomicU32::new((flags - OpenFlags::CLOEXEC).bits()),
            cursor: Mutex::new(0),
            cred,
            watches,
            hal,
            poisoned: AtomicBool::new(false),
        })
    }

    /// 路径快照
    pub fn path(&self) -> &PathRef {
        &self.path
    }

    /// inode 操作表
    pub fn node(&self) -> &Arc<dyn InodeOps> {
        &self.node
    }

    /// 打开标志
    pub fn flags(&self) -> OpenFlags {
        OpenFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// 打开时的凭证
    pub fn cred(&self) -> &Credentials {
        &self.cred
    }

    /// 是否只取得了位置（`O_PATH`）
    pub fn is_path_only(&self) -> bool {
        self.flags().contains(OpenFlags::PATH)
    }

    /// 是否可读
    pub fn is_readable(&self) -> bool {
        !self.is_path_only() && self.flags().readable()
    }

    /// 是否可写
    pub fn is_writable(&self) -> bool {
        !self.is_path_only() && self.flags().writable()
    }

    /// 当前游标
    pub fn position(&self) -> u64 {
        *self.cursor.lock()
    }

    /// 检查描述符仍可使用
    ///
    /// 强制卸载后的描述符、以及某次操作遇到完整性错误的描述符，只能关闭。
    pub fn check_usable(&self) -> Result<()> {
        self.path.mount.check_alive()?;
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::Io, "descriptor saw an I/O error"));
        }
        Ok(())
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_integrity() {
                log::error!("[VFS] descriptor on ino {} failed: {}", self.node.ino(), e);
                self.poisoned.store(true, Ordering::Release);
            }
        }
        result
    }

    fn check_readable(&self) -> Result<()> {
        self.check_usable()?;
        if !self.is_readable() {
            return Err(Error::new(ErrorKind::BadDescriptor, "descriptor not open for reading"));
        }
        if self.node.node_type() == InodeType::Directory {
            return Err(Error::new(ErrorKind::IsDirectory, "is a directory"));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_usable()?;
        if !self.is_writable() {
            return Err(Error::new(ErrorKind::BadDescriptor, "descriptor not open for writing"));
        }
        Ok(())
    }

    /// 派发事件
    pub(crate) fn emit(&self, mask: WatchMask) {
        notify_path(&self.watches, &self.path, mask);
    }

    /// 读取目录项
    ///
    /// 游标保存目录位置；每次最多返回 `max` 项。
    pub fn read_dir(&self, max: usize) -> Result<Vec<DirEntryInfo>> {
        self.check_usable()?;
        if self.is_path_only() {
            return Err(Error::new(ErrorKind::BadDescriptor, "descriptor opened with O_PATH"));
        }
        if self.node.node_type() != InodeType::Directory {
            return Err(Error::new(ErrorKind::NotDirectory, "not a directory"));
        }
        let mut entries = Vec::new();
        {
            let mut cursor = lock_interruptible(&self.cursor, &*self.hal)?;
            while entries.len() < max {
                match self.track(self.node.readdir(*cursor))? {
                    Some((entry, next)) => {
                        entries.push(entry);
                        *cursor = next;
                    }
                    None => break,
                }
            }
        }
        if !entries.is_empty() {
            self.emit(WatchMask::ACCESS);
        }
        Ok(entries)
    }

    /// 截断
    pub fn truncate(&self, size: u64) -> Result<()> {
        self.check_usable()?;
        if !self.is_writable() {
            return Err(Error::new(ErrorKind::InvalidInput, "descriptor not open for writing"));
        }
        match self.node.node_type() {
            InodeType::RegularFile => {}
            InodeType::Directory => return Err(Error::new(ErrorKind::IsDirectory, "is a directory")),
            _ => return Err(Error::new(ErrorKind::InvalidInput, "not a regular file")),
        }
        self.path.mount.check_writable()?;
        self.track(self.node.truncate(size))?;
        self.emit(WatchMask::MODIFY);
        Ok(())
    }

    /// 同步
    pub fn fsync(&self, datasync: bool) -> Result<()> {
        self.check_usable()?;
        if self.is_path_only() {
            return Err(Error::new(ErrorKind::BadDescriptor, "descriptor opened with O_PATH"));
        }
        self.track(self.node.fsync(datasync))
    }
}

impl File for OpenFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        let n = {
            let mut cursor = lock_interruptible(&self.cursor, &*self.hal)?;
            let n = self.track(self.node.read_at(*cursor, buf))?;
            *cursor += n as u64;
            n
        };
        if n > 0 {
            self.emit(WatchMask::ACCESS);
        }
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let append = self.flags().contains(OpenFlags::APPEND);
        let n = {
            let mut cursor = lock_interruptible(&self.cursor, &*self.hal)?;
            let (n, at) = self.track(self.node.write_at(*cursor, buf, append))?;
            *cursor = at + n as u64;
            n
        };
        if n > 0 {
            self.emit(WatchMask::MODIFY);
        }
        Ok(n)
    }

    fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_readable()?;
        let n = self.track(self.node.read_at(offset, buf))?;
        if n > 0 {
            self.emit(WatchMask::ACCESS);
        }
        Ok(n)
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let append = self.flags().contains(OpenFlags::APPEND);
        let (n, _) = self.track(self.node.write_at(offset, buf, append))?;
        if n > 0 {
            self.emit(WatchMask::MODIFY);
        }
        Ok(n)
    }

    fn seek(&self, offset: i64, whence: SeekWhence) -> Result<u64> {
        self.check_usable()?;
        let mut cursor = lock_interruptible(&self.cursor, &*self.hal)?;
        let is_dir = self.node.node_type() == InodeType::Directory;
        let base: i64 = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => *cursor as i64,
            SeekWhence::End if is_dir => return invalid(),
            SeekWhence::End => self.track(self.node.stat())?.size as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|t| *t >= 0)
            .ok_or(Error::new(ErrorKind::InvalidInput, "seek before start of file"))?;
        *cursor = target as u64;
        Ok(target as u64)
    }

    fn stat(&self) -> Result<FileAttr> {
        self.check_usable()?;
        self.track(self.node.stat())
    }

    fn status_flags(&self) -> u32 {
        self.flags().bits()
    }

    fn set_status_flags(&self, flags: u32) -> Result<()> {
        self.check_usable()?;
        let settable = OpenFlags::SETTABLE.bits();
        let _ = self.flags.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            Some((cur & !settable) | (flags & settable))
        });
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if !self.is_path_only() {
            let mask = if self.flags().writable() { WatchMask::CLOSE_WRITE } else { WatchMask::CLOSE_NOWRITE };
            self.emit(mask);
            self.node.release();
        }
        self.path.mount.file_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_modes() {
        assert!(OpenFlags::empty().readable());
        assert!(!OpenFlags::empty().writable());
        assert!(!OpenFlags::WRONLY.readable());
        assert!(OpenFlags::WRONLY.writable());
        assert!(OpenFlags::RDWR.readable() && OpenFlags::RDWR.writable());
    }

    #[test]
    fn test_tmpfile_implies_directory() {
        let flags = OpenFlags::from_bits_retain(0o20200000 | 0o2);
        assert!(flags.contains(OpenFlags::TMPFILE));
        assert!(flags.contains(OpenFlags::DIRECTORY));
        assert!(!OpenFlags::DIRECTORY.contains(OpenFlags::TMPFILE));
        assert_eq!(OpenFlags::SETTABLE.bits(), 0o6000);
    }
}
