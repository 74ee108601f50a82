//! 打开文件表
//!
//! 每个执行体一张表：小整数描述符到 [`File`] 的稠密映射，外加一个 close-on-exec 位图。
//!
//! 约定：
//!
//! - 分配总是返回不小于 `min_fd` 的最小空闲描述符
//! - `dup` 系列共享同一个 `Arc<dyn File>`，因此共享游标
//! - 关闭时记录在表锁之外释放，最后一个引用的释放回调不会在表锁内运行

use super::file::File;
use crate::error::{Error, ErrorKind, Result};
use crate::sync::Mutex;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// 描述符
pub type Fd = usize;

#[derive(Clone)]
enum Slot {
    Free,
    /// 已分配、尚未安装记录
    Reserved,
    Used(Arc<dyn File>),
}

impl Slot {
    fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }
}

struct TableInner {
    slots: Vec<Slot>,
    cloexec: Vec<u64>,
}

impl TableInner {
    fn set_cloexec(&mut self, fd: Fd, on: bool) {
        let (word, bit) = (fd / 64, fd % 64);
        if self.cloexec.len() <= word {
            self.cloexec.resize(word + 1, 0);
        }
        if on {
            self.cloexec[word] |= 1 << bit;
        } else {
            self.cloexec[word] &= !(1 << bit);
        }
    }

    fn cloexec(&self, fd: Fd) -> bool {
        self.cloexec.get(fd / 64).map_or(false, |w| w & (1 << (fd % 64)) != 0)
    }

    fn lowest_free(&mut self, min_fd: Fd, max_fds: usize) -> Result<Fd> {
        if min_fd >= max_fds {
            return Err(Error::new(ErrorKind::InvalidInput, "minimum descriptor out of range"));
        }
        if let Some(fd) = (min_fd..self.slots.len()).find(|&fd| self.slots[fd].is_free()) {
            return Ok(fd);
        }
        let fd = self.slots.len().max(min_fd);
        if fd >= max_fds {
            log::warn!("[FDTABLE] descriptor table full ({} entries)", max_fds);
            return Err(Error::new(ErrorKind::TooManyOpenFiles, "descriptor table full"));
        }
        self.slots.resize(fd + 1, Slot::Free);
        Ok(fd)
    }

    fn file(&self, fd: Fd) -> Result<Arc<dyn File>> {
        match self.slots.get(fd) {
            Some(Slot::Used(file)) => Ok(file.clone()),
            _ => Err(Error::new(ErrorKind::BadDescriptor, "bad file descriptor")),
        }
    }
}

/// 打开文件表
pub struct FdTable {
    inner: Mutex<TableInner>,
    max_fds: usize,
}

impl fmt::Debug for FdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let used = inner.slots.iter().filter(|s| matches!(s, Slot::Used(_))).count();
        f.debug_struct("FdTable")
            .field("max_fds", &self.max_fds)
            .field("slots", &inner.slots.len())
            .field("used", &used)
            .finish()
    }
}

impl FdTable {
    /// 创建空表
    pub fn new(max_fds: usize) -> Self {
        Self {
            inner: Mutex::new(TableInner { slots: Vec::new(), cloexec: Vec::new() }),
            max_fds,
        }
    }

    /// 描述符上限
    pub fn max_fds(&self) -> usize {
        self.max_fds
    }

    /// 预留不小于 `min_fd` 的最小空闲描述符
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - `min_fd` 超出上限
    /// - `TooManyOpenFiles` - 没有空闲描述符
    pub fn allocate(&self, min_fd: Fd, cloexec: bool) -> Result<Fd> {
        let mut inner = self.inner.lock();
        let fd = inner.lowest_free(min_fd, self.max_fds)?;
        inner.slots[fd] = Slot::Reserved;
        inner.set_cloexec(fd, cloexec);
        Ok(fd)
    }

    /// 把记录安装到预留的描述符上
    pub fn install(&self, fd: Fd, file: Arc<dyn File>) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.slots.get_mut(fd) {
            Some(slot) if matches!(slot, Slot::Reserved) => {
                *slot = Slot::Used(file);
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::BadDescriptor, "descriptor was not reserved")),
        }
    }

    /// 放弃一个预留的描述符
    pub fn release_reserved(&self, fd: Fd) {
        let mut inner = self.inner.lock();
        if matches!(inner.slots.get(fd), Some(Slot::Reserved)) {
            inner.slots[fd] = Slot::Free;
            inner.set_cloexec(fd, false);
        }
    }

    /// 分配并安装
    pub fn alloc_install(&self, file: Arc<dyn File>, min_fd: Fd, cloexec: bool) -> Result<Fd> {
        let mut inner = self.inner.lock();
        let fd = inner.lowest_free(min_fd, self.max_fds)?;
        inner.slots[fd] = Slot::Used(file);
        inner.set_cloexec(fd, cloexec);
        log::trace!("[FDTABLE] installed fd {}", fd);
        Ok(fd)
    }

    /// 取出记录
    pub fn get(&self, fd: Fd) -> Result<Arc<dyn File>> {
        self.inner.lock().file(fd)
    }

    /// 复制到不小于 `min_fd` 的最小空闲描述符
    pub fn dup(&self, fd: Fd, min_fd: Fd, cloexec: bool) -> Result<Fd> {
        let mut inner = self.inner.lock();
        let file = inner.file(fd)?;
        let new_fd = inner.lowest_free(min_fd, self.max_fds)?;
        inner.slots[new_fd] = Slot::Used(file);
        inner.set_cloexec(new_fd, cloexec);
        Ok(new_fd)
    }

    /// 复制到指定描述符，原有记录先被关闭
    ///
    /// `old == new` 时只校验 `old` 有效。
    ///
    /// # 错误
    ///
    /// - `BadDescriptor` - `old` 无效或 `new` 超出上限
    /// - `Busy` - `new` 正处于预留状态
    pub fn dup2(&self, old: Fd, new: Fd, cloexec: bool) -> Result<Fd> {
        let displaced = {
            let mut inner = self.inner.lock();
            let file = inner.file(old)?;
            if old == new {
                return Ok(new);
            }
            if new >= self.max_fds {
                return Err(Error::new(ErrorKind::BadDescriptor, "target descriptor out of range"));
            }
            if inner.slots.len() <= new {
                inner.slots.resize(new + 1, Slot::Free);
            }
            if matches!(inner.slots[new], Slot::Reserved) {
                return Err(Error::new(ErrorKind::Busy, "target descriptor is being installed"));
            }
            inner.set_cloexec(new, cloexec);
            core::mem::replace(&mut inner.slots[new], Slot::Used(file))
        };
        drop(displaced);
        Ok(new)
    }

    /// 关闭描述符，返回它引用的记录
    ///
    /// 记录在调用者丢弃返回值时才可能被释放，此时表锁已经放开。
    pub fn close(&self, fd: Fd) -> Result<Arc<dyn File>> {
        let mut inner = self.inner.lock();
        if !matches!(inner.slots.get(fd), Some(Slot::Used(_))) {
            return Err(Error::new(ErrorKind::BadDescriptor, "bad file descriptor"));
        }
        inner.set_cloexec(fd, false);
        match core::mem::replace(&mut inner.slots[fd], Slot::Free) {
            Slot::Used(file) => {
                log::trace!("[FDTABLE] closed fd {}", fd);
                Ok(file)
            }
            _ => Err(Error::new(ErrorKind::BadDescriptor, "bad file descriptor")),
        }
    }

    /// 关闭全部带 close-on-exec 的描述符
    ///
    /// # 返回
    ///
    /// 关闭的描述符数
    pub fn close_all_cloexec(&self) -> usize {
        let closed: Vec<Arc<dyn File>> = {
            let mut inner = self.inner.lock();
            let mut closed = Vec::new();
            for fd in 0..inner.slots.len() {
                if inner.cloexec(fd) && matches!(inner.slots[fd], Slot::Used(_)) {
                    if let Slot::Used(file) = core::mem::replace(&mut inner.slots[fd], Slot::Free) {
                        closed.push(file);
                    }
                    inner.set_cloexec(fd, false);
                }
            }
            closed
        };
        log::debug!("[FDTABLE] exec closed {} descriptors", closed.len());
        closed.len()
    }

    /// close-on-exec 位
    pub fn get_cloexec(&self, fd: Fd) -> Result<bool> {
        let inner = self.inner.lock();
        inner.file(fd)?;
        Ok(inner.cloexec(fd))
    }

    /// 设置 close-on-exec 位
    pub fn set_cloexec(&self, fd: Fd, on: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file(fd)?;
        inner.set_cloexec(fd, on);
        Ok(())
    }

    /// 复制整张表（fork），预留中的描述符不复制
    pub fn fork(&self) -> FdTable {
        let inner = self.inner.lock();
        let slots = inner
            .slots
            .iter()
            .map(|s| match s {
                Slot::Used(file) => Slot::Used(file.clone()),
                _ => Slot::Free,
            })
            .collect();
        FdTable {
            inner: Mutex::new(TableInner { slots, cloexec: inner.cloexec.clone() }),
            max_fds: self.max_fds,
        }
    }

    /// 取走全部记录并清空表
    pub fn take_all(&self) -> Vec<(Fd, Arc<dyn File>)> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        for (fd, slot) in inner.slots.iter_mut().enumerate() {
            if let Slot::Used(file) = core::mem::replace(slot, Slot::Free) {
                out.push((fd, file));
            }
        }
        inner.cloexec.clear();
        out
    }

    /// 已安装的描述符数
    pub fn count(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| matches!(s, Slot::Used(_))).count()
    }
}
