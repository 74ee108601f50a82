//! 文件事件实例

use super::node_of;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::InodeType;
use crate::vfs::actor::Actor;
use crate::vfs::fd_table::Fd;
use crate::vfs::path::LookupFlags;
use crate::vfs::permission::{check_access, Access};
use crate::vfs::watch::{WatchFlags, WatchInstance, WatchMask};

impl Actor {
    fn watch_instance<R>(&self, fd: Fd, f: impl FnOnce(&WatchInstance) -> Result<R>) -> Result<R> {
        let file = self.file_of(fd)?;
        let inst = file
            .downcast_ref::<WatchInstance>()
            .ok_or(Error::new(ErrorKind::InvalidInput, "descriptor is not a watch instance"))?;
        f(inst)
    }

    /// 创建监视实例，返回它的描述符
    ///
    /// 读取描述符得到事件记录，关闭描述符撤销全部登记。
    pub fn watch_init(&self, flags: WatchFlags) -> Result<Fd> {
        let vfs = self.vfs();
        let inst = WatchInstance::new(vfs.watches().clone(), vfs.hal().clone(), vfs.config(), flags);
        let fd = self.fds().alloc_install(inst, 0, flags.contains(WatchFlags::CLOEXEC))?;
        log::debug!("[WATCH] instance created as fd {}", fd);
        Ok(fd)
    }

    /// 在路径上登记
    ///
    /// 同一个 inode 再次登记返回同一个描述符，掩码被替换或（`MASK_ADD`）合并。
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 描述符不是监视实例，或掩码中没有事件
    /// - `NotDirectory` - `ONLYDIR` 而路径不是目录
    /// - `PermissionDenied` - 没有读权限
    /// - `NoSpace` - 登记数达到上限
    pub fn watch_add(&self, fd: Fd, path: &[u8], mask: WatchMask) -> Result<i32> {
        let cred = self.cred();
        let flags = if mask.contains(WatchMask::DONT_FOLLOW) { LookupFlags::empty() } else { LookupFlags::FOLLOW };
        let found = self.lookup_at(&cred, None, path, flags)?;
        let node = node_of(&found)?;
        let attr = node.stat()?;
        if mask.contains(WatchMask::ONLYDIR) && attr.node_type != InodeType::Directory {
            return Err(Error::new(ErrorKind::NotDirectory, "watch target is not a directory"));
        }
        check_access(&attr, &cred, Access::READ)?;
        let key = (node.device_id(), node.ino());
        self.watch_instance(fd, |inst| inst.add_watch(key, mask))
    }

    /// 撤销登记
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 描述符不是监视实例，或登记不属于它
    pub fn watch_rm(&self, fd: Fd, wd: i32) -> Result<()> {
        self.watch_instance(fd, |inst| inst.remove_watch(wd))
    }
}
