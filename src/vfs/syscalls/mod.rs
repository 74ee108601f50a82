//! 系统调用入口
//!
//! 每个入口都是 [`Actor`] 上的一个方法，按关注点分在几个文件里：
//!
//! - `file` - open、描述符读写、定位、截断、同步、fcntl、目录读取
//! - `namespace` - mkdir、rmdir、unlink、rename、link、symlink、readlink、mount
//! - `attr` - stat、chmod、chown、utimens、statfs、chdir、getcwd
//! - `xattr` - 扩展属性的路径、不跟随路径与描述符三种变体
//! - `watch` - 文件事件实例
//!
//! 路径参数是字节串；`dirfd` 为 `None` 时相对路径从当前目录开始。

mod attr;
mod file;
mod namespace;
mod watch;
mod xattr;

pub use file::{FcntlCmd, FD_CLOEXEC};

use super::actor::{as_open_file, Actor};
use super::fd_table::Fd;
use super::file::{File, OpenFile};
use super::mount::PathRef;
use super::ops::InodeOps;
use super::path::{LastComponent, LookupFlags};
use super::watch::WatchMask;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FileAttr, InodeType};
use crate::hal::Credentials;
use alloc::sync::Arc;

/// 位置上的 inode（负项视为不存在）
pub(crate) fn node_of(path: &PathRef) -> Result<&Arc<dyn InodeOps>> {
    path.dentry
        .inode()
        .ok_or(Error::new(ErrorKind::NotFound, "no such file or directory"))
}

/// 位置上的属性快照
pub(crate) fn attr_at(path: &PathRef) -> Result<FileAttr> {
    node_of(path)?.stat()
}

impl Actor {
    pub(crate) fn lookup_at(
        &self,
        cred: &Credentials,
        dirfd: Option<Fd>,
        path: &[u8],
        flags: LookupFlags,
    ) -> Result<PathRef> {
        let start = self.start_at(dirfd)?;
        let found = self.resolver(cred).resolve_existing(&start, path, flags)?;
        found.mount.check_alive()?;
        Ok(found)
    }

    pub(crate) fn lookup_parent_at(
        &self,
        cred: &Credentials,
        dirfd: Option<Fd>,
        path: &[u8],
    ) -> Result<(PathRef, LastComponent)> {
        let start = self.start_at(dirfd)?;
        let (parent, last) = self.resolver(cred).resolve_parent(&start, path)?;
        parent.mount.check_alive()?;
        Ok((parent, last))
    }

    /// 取出描述符上的记录
    pub(crate) fn file_of(&self, fd: Fd) -> Result<Arc<dyn File>> {
        self.fds().get(fd)
    }

    /// 在普通打开文件上执行
    pub(crate) fn with_open_file<R>(&self, fd: Fd, f: impl FnOnce(&OpenFile) -> Result<R>) -> Result<R> {
        let file = self.fds().get(fd)?;
        let of = as_open_file(&*file)?;
        f(of)
    }

    /// 向目录登记派发一个带名字的事件
    pub(crate) fn dir_event(
        &self,
        dir: &Arc<dyn InodeOps>,
        mask: WatchMask,
        cookie: u32,
        name: &[u8],
        child_type: InodeType,
        unlinked_child: bool,
    ) {
        let watches = self.vfs().watches();
        if watches.watched_inodes() == 0 {
            return;
        }
        let mask = if child_type == InodeType::Directory { mask | WatchMask::ISDIR } else { mask };
        watches.notify((dir.device_id(), dir.ino()), mask, cookie, name, unlinked_child);
    }

    /// 向 inode 自身的登记派发事件
    pub(crate) fn self_event(&self, node: &Arc<dyn InodeOps>, mask: WatchMask) {
        let watches = self.vfs().watches();
        if watches.watched_inodes() == 0 {
            return;
        }
        let mask = if node.node_type() == InodeType::Directory { mask | WatchMask::ISDIR } else { mask };
        watches.notify((node.device_id(), node.ino()), mask, 0, b"", false);
    }
}
