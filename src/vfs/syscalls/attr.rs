//! 属性与工作目录

use super::{attr_at, node_of};
use crate::consts::{EXT2_APPEND_FL, EXT2_IMMUTABLE_FL, S_IALLUGO, S_ISGID, S_ISUID, S_IXGRP};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FileAttr, InodeType, SetAttr, StatFs, TimeUpdate};
use crate::hal::{Capabilities, Credentials};
use crate::vfs::actor::Actor;
use crate::vfs::fd_table::Fd;
use crate::vfs::file::notify_path;
use crate::vfs::mount::PathRef;
use crate::vfs::path::{path_of, LookupFlags};
use crate::vfs::permission::{check_access, is_owner_or_cap, Access};
use crate::vfs::watch::WatchMask;
use alloc::vec::Vec;

impl Actor {
    /// 路径上的属性（跟随符号链接）
    pub fn stat(&self, path: &[u8]) -> Result<FileAttr> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW)?;
        attr_at(&found)
    }

    /// 路径上的属性（不跟随最后一个符号链接）
    pub fn lstat(&self, path: &[u8]) -> Result<FileAttr> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::empty())?;
        attr_at(&found)
    }

    /// 卷统计
    pub fn statfs(&self, path: &[u8]) -> Result<StatFs> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW)?;
        found.mount.fs().statfs()
    }

    /// 描述符所在卷的统计
    pub fn fstatfs(&self, fd: Fd) -> Result<StatFs> {
        self.with_open_file(fd, |f| {
            f.check_usable()?;
            f.path().mount.fs().statfs()
        })
    }

    fn setattr_at(&self, path: &PathRef, attr: &SetAttr) -> Result<()> {
        path.mount.check_writable()?;
        node_of(path)?.setattr(attr)?;
        notify_path(self.vfs().watches(), path, WatchMask::ATTRIB);
        Ok(())
    }

    fn chmod_at(&self, cred: &Credentials, path: &PathRef, mode: u32) -> Result<()> {
        let attr = attr_at(path)?;
        if !is_owner_or_cap(&attr, cred) {
            return Err(Error::new(ErrorKind::NotPermitted, "chmod requires ownership"));
        }
        let mut mode = mode & S_IALLUGO;
        if !cred.in_group(attr.gid) && !cred.has_cap(Capabilities::FOWNER) {
            mode &= !S_ISGID;
        }
        self.setattr_at(path, &SetAttr { mode: Some(mode), ..SetAttr::default() })
    }

    /// 修改权限位
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - 既非属主也没有 `FOWNER`，或 inode 不可变
    /// - `ReadOnly` - 卷只读
    pub fn chmod(&self, path: &[u8], mode: u32) -> Result<()> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW)?;
        self.chmod_at(&cred, &found, mode)
    }

    /// 修改描述符上的权限位
    pub fn fchmod(&self, fd: Fd, mode: u32) -> Result<()> {
        let cred = self.cred();
        let path = self.open_path_of(fd)?;
        self.chmod_at(&cred, &path, mode)
    }

    fn chown_at(&self, cred: &Credentials, path: &PathRef, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let attr = attr_at(path)?;
        let uid = uid.filter(|u| *u != attr.uid);
        let gid = gid.filter(|g| *g != attr.gid);
        if uid.is_some() && !cred.has_cap(Capabilities::CHOWN) {
            return Err(Error::new(ErrorKind::NotPermitted, "changing the owner requires CHOWN"));
        }
        if let Some(g) = gid {
            let member = cred.uid == attr.uid && cred.in_group(g);
            if !member && !cred.has_cap(Capabilities::CHOWN) {
                return Err(Error::new(ErrorKind::NotPermitted, "changing the group requires membership"));
            }
        }
        let mut set = SetAttr { uid, gid, ..SetAttr::default() };
        if (uid.is_some() || gid.is_some()) && attr.node_type != InodeType::Directory {
            let mut mode = attr.perm() & !S_ISUID;
            if mode & S_IXGRP != 0 {
                mode &= !S_ISGID;
            }
            if mode != attr.perm() {
                set.mode = Some(mode);
            }
        }
        self.setattr_at(path, &set)
    }

    /// 修改属主与属组（`None` 表示不变）
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - 改属主缺少 `CHOWN`；改属组时既非属主兼组成员，也没有 `CHOWN`
    pub fn chown(&self, path: &[u8], uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW)?;
        self.chown_at(&cred, &found, uid, gid)
    }

    /// 同 `chown`，不跟随最后一个符号链接
    pub fn lchown(&self, path: &[u8], uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::empty())?;
        self.chown_at(&cred, &found, uid, gid)
    }

    /// 修改描述符上的属主与属组
    pub fn fchown(&self, fd: Fd, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let cred = self.cred();
        let path = self.open_path_of(fd)?;
        self.chown_at(&cred, &path, uid, gid)
    }

    /// 修改访问与修改时间（`None` 表示不变）
    ///
    /// 两者都设为当前时间只需要写权限；设为任意时间需要是属主或拥有 `FOWNER`。
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - 设置任意时间而不是属主
    /// - `PermissionDenied` - 设置当前时间而没有写权限
    pub fn utimens(&self, path: &[u8], atime: Option<TimeUpdate>, mtime: Option<TimeUpdate>) -> Result<()> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW)?;
        if atime.is_none() && mtime.is_none() {
            return Ok(());
        }
        let attr = attr_at(&found)?;
        if !is_owner_or_cap(&attr, &cred) {
            let to_now = |t: Option<TimeUpdate>| matches!(t, None | Some(TimeUpdate::Now));
            if !(to_now(atime) && to_now(mtime)) {
                return Err(Error::new(ErrorKind::NotPermitted, "setting timestamps requires ownership"));
            }
            check_access(&attr, &cred, Access::WRITE)?;
        }
        self.setattr_at(&found, &SetAttr { atime, mtime, ..SetAttr::default() })
    }

    /// 描述符上的 inode 标志
    pub fn get_inode_flags(&self, fd: Fd) -> Result<u32> {
        let path = self.open_path_of(fd)?;
        Ok(attr_at(&path)?.flags)
    }

    /// 修改描述符上的 inode 标志
    ///
    /// # 错误
    ///
    /// - `NotPermitted` - 既非属主也没有 `FOWNER`，或改变不可变、只追加位而没有 `LINUX_IMMUTABLE`
    /// - `ReadOnly` - 卷只读
    pub fn set_inode_flags(&self, fd: Fd, flags: u32) -> Result<()> {
        let cred = self.cred();
        let path = self.open_path_of(fd)?;
        let attr = attr_at(&path)?;
        if !is_owner_or_cap(&attr, &cred) {
            return Err(Error::new(ErrorKind::NotPermitted, "changing flags requires ownership"));
        }
        let guarded = EXT2_IMMUTABLE_FL | EXT2_APPEND_FL;
        if (attr.flags ^ flags) & guarded != 0 && !cred.has_cap(Capabilities::LINUX_IMMUTABLE) {
            return Err(Error::new(ErrorKind::NotPermitted, "immutable and append-only need LINUX_IMMUTABLE"));
        }
        path.mount.check_writable()?;
        node_of(&path)?.set_flags(flags)?;
        log::debug!("[VFS] ino {} flags {:#x} -> {:#x}", attr.ino, attr.flags, flags);
        notify_path(self.vfs().watches(), &path, WatchMask::ATTRIB);
        Ok(())
    }

    /// 切换当前目录
    ///
    /// # 错误
    ///
    /// - `NotDirectory` - 不是目录
    /// - `PermissionDenied` - 没有搜索权限
    pub fn chdir(&self, path: &[u8]) -> Result<()> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW | LookupFlags::DIRECTORY)?;
        check_access(&attr_at(&found)?, &cred, Access::EXEC)?;
        self.set_cwd(found);
        Ok(())
    }

    /// 切换到描述符指向的目录
    pub fn fchdir(&self, fd: Fd) -> Result<()> {
        let cred = self.cred();
        let dir = self.start_at(Some(fd))?;
        check_access(&attr_at(&dir)?, &cred, Access::EXEC)?;
        self.set_cwd(dir);
        Ok(())
    }

    /// 当前目录的绝对路径
    ///
    /// # 错误
    ///
    /// - `NotFound` - 当前目录已被删除
    pub fn getcwd(&self) -> Result<Vec<u8>> {
        path_of(&self.root_path(), &self.cwd_path())
    }

    fn open_path_of(&self, fd: Fd) -> Result<PathRef> {
        self.with_open_file(fd, |f| {
            f.check_usable()?;
            Ok(f.path().clone())
        })
    }
}
