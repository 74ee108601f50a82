//! 执行体
//!
//! 一个 [`Actor`] 对应外部协作者中的一个进程：它有自己的打开文件表、根目录、
//! 当前目录和 umask，身份则在每次调用时从 [`SystemHal::credentials`] 取得。
//! 系统调用入口都实现在 `syscalls` 子模块里。
//!
//! [`SystemHal::credentials`]: crate::hal::SystemHal::credentials

use super::context::Vfs;
use super::fd_table::{Fd, FdTable};
use super::file::{File, OpenFile};
use super::mount::PathRef;
use super::path::Resolver;
use crate::error::{Error, ErrorKind, Result};
use crate::hal::Credentials;
use crate::sync::Mutex;
use alloc::sync::Arc;

/// 默认 umask
pub const DEFAULT_UMASK: u32 = 0o022;

struct FsState {
    root: PathRef,
    cwd: PathRef,
    umask: u32,
}

/// 执行体
pub struct Actor {
    vfs: Arc<Vfs>,
    fds: FdTable,
    fs: Mutex<FsState>,
}

impl Actor {
    /// 以根卷为根和当前目录创建执行体
    ///
    /// # 错误
    ///
    /// - `NotFound` - 还没有挂载根卷
    pub fn new(vfs: Arc<Vfs>) -> Result<Self> {
        let root = vfs.root()?;
        let fds = FdTable::new(vfs.config().max_fds);
        Ok(Self {
            vfs,
            fds,
            fs: Mutex::new(FsState { root: root.clone(), cwd: root, umask: DEFAULT_UMASK }),
        })
    }

    /// 复制执行体：描述符共享打开文件记录，目录状态独立
    pub fn fork(&self) -> Actor {
        let st = self.fs.lock();
        Actor {
            vfs: self.vfs.clone(),
            fds: self.fds.fork(),
            fs: Mutex::new(FsState { root: st.root.clone(), cwd: st.cwd.clone(), umask: st.umask }),
        }
    }

    /// 执行新程序：关闭 close-on-exec 描述符
    pub fn exec(&self) -> usize {
        self.fds.close_all_cloexec()
    }

    /// 设置 umask，返回旧值
    pub fn umask(&self, mask: u32) -> u32 {
        let mut st = self.fs.lock();
        core::mem::replace(&mut st.umask, mask & 0o777)
    }

    /// 所属核心
    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    /// 打开文件表
    pub fn fds(&self) -> &FdTable {
        &self.fds
    }

    /// 当前凭证
    pub fn cred(&self) -> Credentials {
        self.vfs.hal().credentials()
    }

    pub(crate) fn current_umask(&self) -> u32 {
        self.fs.lock().umask
    }

    pub(crate) fn root_path(&self) -> PathRef {
        self.fs.lock().root.clone()
    }

    pub(crate) fn cwd_path(&self) -> PathRef {
        self.fs.lock().cwd.clone()
    }

    pub(crate) fn set_cwd(&self, cwd: PathRef) {
        let old = core::mem::replace(&mut self.fs.lock().cwd, cwd);
        drop(old);
    }

    pub(crate) fn resolver<'a>(&'a self, cred: &'a Credentials) -> Resolver<'a> {
        Resolver::new(self.vfs.mounts(), cred, self.root_path(), self.vfs.config().max_symlink_hops)
    }

    /// 相对路径的起点：当前目录，或者目录描述符指向的目录
    pub(crate) fn start_at(&self, dirfd: Option<Fd>) -> Result<PathRef> {
        match dirfd {
            None => Ok(self.cwd_path()),
            Some(fd) => {
                let file = self.fds.get(fd)?;
                let of = as_open_file(&*file)?;
                of.check_usable()?;
                if !of.path().dentry.is_dir() {
                    return Err(Error::new(ErrorKind::NotDirectory, "descriptor is not a directory"));
                }
                Ok(of.path().clone())
            }
        }
    }
}

impl core::fmt::Debug for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Actor").field("fds", &self.fds).finish()
    }
}

/// 取出普通打开文件
pub(crate) fn as_open_file(file: &dyn File) -> Result<&OpenFile> {
    file.downcast_ref::<OpenFile>()
        .ok_or(Error::new(ErrorKind::InvalidInput, "descriptor does not name a file"))
}
