//! 名字空间操作：目录、链接、重命名与挂载

use super::node_of;
use crate::config::{MountFlags, UnmountFlags};
use crate::consts::S_IALLUGO;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{InodeType, RenameFlags};
use crate::hal::Credentials;
use crate::sync::lock_interruptible;
use crate::vfs::actor::Actor;
use crate::vfs::dentry::Dentry;
use crate::vfs::fd_table::Fd;
use crate::vfs::mount::PathRef;
use crate::vfs::ops::InodeOps;
use crate::vfs::path::{lookup_child, LastComponent, LookupFlags};
use crate::vfs::permission::{check_access, check_sticky, Access};
use crate::vfs::watch::WatchMask;
use alloc::sync::Arc;
use alloc::vec::Vec;

impl Actor {
    /// 父目录上的写与搜索权限，以及卷可写
    fn check_dir_writable(&self, cred: &Credentials, parent: &PathRef) -> Result<Arc<dyn InodeOps>> {
        let dir = node_of(parent)?.clone();
        check_access(&dir.stat()?, cred, Access::WRITE | Access::EXEC)?;
        parent.mount.check_writable()?;
        Ok(dir)
    }

    /// 查找一个必须存在的子项
    fn existing_child(parent: &PathRef, name: &[u8]) -> Result<(Arc<Dentry>, Arc<dyn InodeOps>)> {
        let child = lookup_child(&parent.dentry, name)?;
        let node = child
            .inode()
            .cloned()
            .ok_or(Error::new(ErrorKind::NotFound, "no such file or directory"))?;
        Ok((child, node))
    }

    /// 创建目录
    ///
    /// # 错误
    ///
    /// - `AlreadyExists` - 名字已存在（包括 `.` 与 `..`）
    /// - `PermissionDenied` - 父目录不可写
    /// - `LinkLimit` - 父目录的子目录数已达上限
    pub fn mkdir(&self, path: &[u8], mode: u32) -> Result<()> {
        let cred = self.cred();
        let (parent, last) = self.lookup_parent_at(&cred, None, path)?;
        let name = last.into_name(ErrorKind::AlreadyExists)?;
        let dir = self.check_dir_writable(&cred, &parent)?;
        let mode = mode & S_IALLUGO & !self.current_umask();
        let node = dir.mkdir(&name, mode, cred.uid, cred.gid)?;
        parent.dentry.bind_child(&name, node);
        self.dir_event(&dir, WatchMask::CREATE, 0, &name, InodeType::Directory, false);
        Ok(())
    }

    /// 删除空目录
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 最后一个分量是 `.`
    /// - `NotEmpty` - 最后一个分量是 `..`，或目录非空
    /// - `Busy` - 目录是挂载点或挂载根
    /// - `NotPermitted` - 粘滞目录中不属于调用者的项
    pub fn rmdir(&self, path: &[u8]) -> Result<()> {
        let cred = self.cred();
        let (parent, last) = self.lookup_parent_at(&cred, None, path)?;
        let name = match last {
            LastComponent::Name(name) => name,
            LastComponent::Dot if parent.is_mount_root() => {
                return Err(Error::new(ErrorKind::Busy, "cannot remove a mount root"))
            }
            LastComponent::Dot => return Err(Error::new(ErrorKind::InvalidInput, "cannot remove '.'")),
            LastComponent::DotDot => return Err(Error::new(ErrorKind::NotEmpty, "cannot remove '..'")),
        };
        let dir = self.check_dir_writable(&cred, &parent)?;
        let (child, node) = Self::existing_child(&parent, &name)?;
        if node.node_type() != InodeType::Directory {
            return Err(Error::new(ErrorKind::NotDirectory, "not a directory"));
        }
        if child.is_mounted() {
            return Err(Error::new(ErrorKind::Busy, "directory is a mount point"));
        }
        check_sticky(&dir.stat()?, &node.stat()?, &cred)?;

        let removed = dir.rmdir(&name)?;
        parent.dentry.drop_child(&name);
        self.dir_event(&dir, WatchMask::DELETE, 0, &name, InodeType::Directory, false);
        self.vfs().watches().inode_gone((removed.device_id(), removed.ino()));
        log::debug!("[VFS] rmdir ino {}", removed.ino());
        Ok(())
    }

    /// 删除非目录的名字
    ///
    /// 链接数降为 0 的 inode 在最后一个打开者关闭后回收。
    ///
    /// # 错误
    ///
    /// - `IsDirectory` - 名字指向目录
    /// - `NotPermitted` - inode 不可变或只追加，或粘滞目录限制
    pub fn unlink(&self, path: &[u8]) -> Result<()> {
        let cred = self.cred();
        let (parent, last) = self.lookup_parent_at(&cred, None, path)?;
        let name = last.into_name(ErrorKind::IsDirectory)?;
        let dir = self.check_dir_writable(&cred, &parent)?;
        let (_child, node) = Self::existing_child(&parent, &name)?;
        if node.node_type() == InodeType::Directory {
            return Err(Error::new(ErrorKind::IsDirectory, "is a directory"));
        }
        check_sticky(&dir.stat()?, &node.stat()?, &cred)?;

        let removed = dir.unlink(&name)?;
        parent.dentry.drop_child(&name);
        self.dir_event(&dir, WatchMask::DELETE, 0, &name, removed.node_type(), false);
        if removed.stat()?.nlink == 0 {
            self.vfs().watches().inode_gone((removed.device_id(), removed.ino()));
        } else {
            self.self_event(&removed, WatchMask::ATTRIB);
        }
        Ok(())
    }

    /// 重命名
    ///
    /// 多父目录的重命名由全局重命名锁串行化。源与目标是同一个 inode 时什么也不做。
    ///
    /// # 错误
    ///
    /// - `CrossDevice` - 源与目标在不同的挂载上
    /// - `Busy` - 涉及挂载点，或最后一个分量是 `.` / `..`
    /// - `InvalidInput` - 目录移到自己之下
    /// - `AlreadyExists` - `NOREPLACE` 而目标存在
    /// - `NotFound` - `EXCHANGE` 而目标不存在
    pub fn rename(&self, old: &[u8], new: &[u8], flags: RenameFlags) -> Result<()> {
        let cred = self.cred();
        let _serial = lock_interruptible(self.vfs().rename_lock(), &**self.vfs().hal())?;

        let (op, olast) = self.lookup_parent_at(&cred, None, old)?;
        let (np, nlast) = self.lookup_parent_at(&cred, None, new)?;
        let oname = olast.into_name(ErrorKind::Busy)?;
        let nname = nlast.into_name(ErrorKind::Busy)?;
        if !Arc::ptr_eq(&op.mount, &np.mount) {
            return Err(Error::new(ErrorKind::CrossDevice, "rename across mounts"));
        }
        let odir = self.check_dir_writable(&cred, &op)?;
        let ndir = self.check_dir_writable(&cred, &np)?;

        let (src, snode) = Self::existing_child(&op, &oname)?;
        let dst = lookup_child(&np.dentry, &nname)?;
        if src.is_mounted() || dst.is_mounted() {
            return Err(Error::new(ErrorKind::Busy, "rename of a mount point"));
        }
        let dnode = dst.inode().cloned();
        if dnode.as_ref().map(|d| d.ino()) == Some(snode.ino()) {
            return Ok(());
        }
        let sattr = snode.stat()?;
        check_sticky(&odir.stat()?, &sattr, &cred)?;
        if let Some(d) = &dnode {
            check_sticky(&ndir.stat()?, &d.stat()?, &cred)?;
        }
        // 跨目录移动目录要改写它的 ".."
        if sattr.node_type == InodeType::Directory && !Arc::ptr_eq(&op.dentry, &np.dentry) {
            check_access(&sattr, &cred, Access::WRITE)?;
        }

        let exchange = flags.contains(RenameFlags::EXCHANGE);
        let replaced = odir.rename(&oname, ndir.as_ref(), &nname, flags)?;
        Dentry::move_child(&op.dentry, &oname, &np.dentry, &nname, exchange);

        let watches = self.vfs().watches();
        let cookie = watches.next_cookie();
        self.dir_event(&odir, WatchMask::MOVED_FROM, cookie, &oname, sattr.node_type, false);
        self.dir_event(&ndir, WatchMask::MOVED_TO, cookie, &nname, sattr.node_type, false);
        self.self_event(&snode, WatchMask::MOVE_SELF);
        match (&dnode, replaced) {
            (Some(d), _) if exchange => {
                let cookie = watches.next_cookie();
                self.dir_event(&ndir, WatchMask::MOVED_FROM, cookie, &nname, d.node_type(), false);
                self.dir_event(&odir, WatchMask::MOVED_TO, cookie, &oname, d.node_type(), false);
                self.self_event(d, WatchMask::MOVE_SELF);
            }
            (Some(d), Some(r)) if r.unlinked => watches.inode_gone((d.device_id(), r.ino)),
            (Some(d), Some(_)) => self.self_event(d, WatchMask::ATTRIB),
            _ => {}
        }
        log::debug!("[VFS] rename ino {} (replaced {:?})", snode.ino(), replaced);
        Ok(())
    }

    /// 创建硬链接（不跟随 `old` 末尾的符号链接）
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - `old` 是目录
    /// - `CrossDevice` - 跨挂载
    /// - `AlreadyExists` - `new` 已存在
    pub fn link(&self, old: &[u8], new: &[u8]) -> Result<()> {
        let cred = self.cred();
        let src = self.lookup_at(&cred, None, old, LookupFlags::empty())?;
        self.link_to(&cred, &src, new)
    }

    /// 给描述符指向的 inode 一个名字（用于 `O_TMPFILE`）
    pub fn link_fd(&self, fd: Fd, new: &[u8]) -> Result<()> {
        let cred = self.cred();
        let src = self.with_open_file(fd, |f| {
            f.check_usable()?;
            Ok(f.path().clone())
        })?;
        self.link_to(&cred, &src, new)
    }

    fn link_to(&self, cred: &Credentials, src: &PathRef, new: &[u8]) -> Result<()> {
        let snode = node_of(src)?.clone();
        if snode.node_type() == InodeType::Directory {
            return Err(Error::new(ErrorKind::NotPermitted, "hard link to a directory"));
        }
        let (np, nlast) = self.lookup_parent_at(cred, None, new)?;
        let name = nlast.into_name(ErrorKind::AlreadyExists)?;
        if !Arc::ptr_eq(&src.mount, &np.mount) {
            return Err(Error::new(ErrorKind::CrossDevice, "link across mounts"));
        }
        let dir = self.check_dir_writable(cred, &np)?;
        dir.link(&name, snode.as_ref())?;
        np.dentry.bind_child(&name, snode.clone());
        self.dir_event(&dir, WatchMask::CREATE, 0, &name, snode.node_type(), false);
        self.self_event(&snode, WatchMask::ATTRIB);
        Ok(())
    }

    /// 创建符号链接
    ///
    /// # 错误
    ///
    /// - `NotFound` - 目标为空
    /// - `NameTooLong` - 目标达到 4096 字节
    /// - `AlreadyExists` - `linkpath` 已存在
    pub fn symlink(&self, target: &[u8], linkpath: &[u8]) -> Result<()> {
        if target.is_empty() {
            return Err(Error::new(ErrorKind::NotFound, "empty symlink target"));
        }
        let cred = self.cred();
        let (parent, last) = self.lookup_parent_at(&cred, None, linkpath)?;
        let name = last.into_name(ErrorKind::AlreadyExists)?;
        let dir = self.check_dir_writable(&cred, &parent)?;
        let node = dir.symlink(&name, target, cred.uid, cred.gid)?;
        parent.dentry.bind_child(&name, node);
        self.dir_event(&dir, WatchMask::CREATE, 0, &name, InodeType::Symlink, false);
        Ok(())
    }

    /// 读取符号链接内容
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 不是符号链接
    pub fn readlink(&self, path: &[u8]) -> Result<Vec<u8>> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::empty())?;
        let node = node_of(&found)?;
        if node.node_type() != InodeType::Symlink {
            return Err(Error::new(ErrorKind::InvalidInput, "not a symbolic link"));
        }
        node.readlink()
    }

    /// 把设备 `source` 上的卷挂到 `target`
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - 缺少系统管理能力
    /// - `NotDirectory` - 挂载点不是目录
    /// - `NotFound` - 设备未注册
    /// - `Unsupported` - 未知的文件系统类型
    /// - `Busy` - 设备已挂载
    /// - `InvalidInput` - 挂载选项无法识别
    pub fn mount(&self, source: &str, target: &[u8], fs_name: &str, flags: MountFlags, opts: &str) -> Result<()> {
        let cred = self.cred();
        let point = self.lookup_at(&cred, None, target, LookupFlags::FOLLOW)?;
        self.vfs().mount_at(&cred, source, &point, fs_name, flags, opts).map(|_| ())
    }

    /// 卸载挂在 `target` 上的卷
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - `target` 不是挂载根
    /// - `Busy` - 还有打开的描述符（未带 `FORCE`）或子挂载
    pub fn unmount(&self, target: &[u8], flags: UnmountFlags) -> Result<()> {
        let cred = self.cred();
        let start = self.start_at(None)?;
        let found = self
            .resolver(&cred)
            .resolve_existing(&start, target, LookupFlags::FOLLOW)?;
        if !found.is_mount_root() {
            return Err(Error::new(ErrorKind::InvalidInput, "not a mount point"));
        }
        let mount = found.mount.clone();
        drop(found);
        self.vfs().unmount_mount(&cred, &mount, flags)
    }
}
