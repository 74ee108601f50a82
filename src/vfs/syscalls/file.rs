//! 打开与描述符操作

use super::{attr_at, node_of};
use crate::consts::{EXT2_APPEND_FL, EXT2_IMMUTABLE_FL, S_IALLUGO, S_IFREG};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FileAttr, InodeType};
use crate::hal::Credentials;
use crate::vfs::actor::Actor;
use crate::vfs::dentry::Dentry;
use crate::vfs::fd_table::Fd;
use crate::vfs::file::{notify_path, OpenFile, OpenFlags, SeekWhence};
use crate::vfs::mount::PathRef;
use crate::vfs::ops::DirEntryInfo;
use crate::vfs::path::{LookupFlags, Resolved};
use crate::vfs::permission::{check_access, Access};
use crate::vfs::watch::WatchMask;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// `F_GETFD` / `F_SETFD` 使用的 close-on-exec 位
pub const FD_CLOEXEC: usize = 1;

/// fcntl 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcntlCmd {
    /// 复制到不小于给定值的最小空闲描述符
    DupFd(Fd),
    /// 同上，并设置 close-on-exec
    DupFdCloexec(Fd),
    /// 读取描述符标志
    GetFd,
    /// 设置或清除 close-on-exec
    SetFd(bool),
    /// 读取状态标志
    GetFl,
    /// 修改状态标志（只有追加与非阻塞可变）
    SetFl(u32),
}

impl Actor {
    /// 打开路径
    pub fn open(&self, path: &[u8], flags: u32, mode: u32) -> Result<Fd> {
        self.openat(None, path, flags, mode)
    }

    /// 创建并以只写方式打开，已存在时截断
    pub fn creat(&self, path: &[u8], mode: u32) -> Result<Fd> {
        let flags = OpenFlags::WRONLY | OpenFlags::CREAT | OpenFlags::TRUNC;
        self.openat(None, path, flags.bits(), mode)
    }

    /// 相对目录描述符打开路径
    ///
    /// # 参数
    ///
    /// * `dirfd` - 相对路径的起点，`None` 为当前目录
    /// * `flags` - `OpenFlags` 的位
    /// * `mode` - 创建时的权限位，受 umask 过滤
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 访问模式非法，或 `O_TMPFILE` 未请求写
    /// - `AlreadyExists` - `O_CREAT | O_EXCL` 而路径已存在
    /// - `IsDirectory` - 以写方式打开目录，或要创建的路径以 `/` 结尾
    /// - `TooManyLinks` - `O_NOFOLLOW` 而最后一个分量是符号链接
    /// - `NotPermitted` - inode 不可变，或只追加却未带 `O_APPEND`
    /// - `TooManyOpenFiles` - 描述符表已满
    /// - 以及路径解析的错误
    pub fn openat(&self, dirfd: Option<Fd>, path: &[u8], flags: u32, mode: u32) -> Result<Fd> {
        if flags & OpenFlags::ACCMODE == OpenFlags::ACCMODE {
            return Err(Error::new(ErrorKind::InvalidInput, "invalid access mode"));
        }
        let flags = OpenFlags::from_bits_truncate(flags);
        let cred = self.cred();
        let start = self.start_at(dirfd)?;
        let (target, flags) = if flags.contains(OpenFlags::TMPFILE) {
            (self.open_tmpfile(&cred, &start, path, flags, mode)?, flags - OpenFlags::TMPFILE)
        } else {
            (self.open_path(&cred, &start, path, flags, mode)?, flags)
        };

        let cloexec = flags.contains(OpenFlags::CLOEXEC);
        let fd = self.fds().allocate(0, cloexec)?;
        let file = match OpenFile::new(
            target,
            flags,
            cred,
            self.vfs().watches().clone(),
            self.vfs().hal().clone(),
        ) {
            Ok(file) => Arc::new(file),
            Err(e) => {
                self.fds().release_reserved(fd);
                return Err(e);
            }
        };
        if !flags.contains(OpenFlags::PATH) {
            file.emit(WatchMask::OPEN);
        }
        log::trace!("[VFS] open ino {} as fd {} (flags {:#o})", file.node().ino(), fd, flags.bits());
        self.fds().install(fd, file)?;
        Ok(fd)
    }

    fn open_path(
        &self,
        cred: &Credentials,
        start: &PathRef,
        path: &[u8],
        flags: OpenFlags,
        mode: u32,
    ) -> Result<PathRef> {
        let path_only = flags.contains(OpenFlags::PATH);
        let creat = flags.contains(OpenFlags::CREAT) && !path_only;
        let excl = creat && flags.contains(OpenFlags::EXCL);

        let mut lookup = LookupFlags::empty();
        if !flags.contains(OpenFlags::NOFOLLOW) && !excl {
            lookup |= LookupFlags::FOLLOW;
        }
        if flags.contains(OpenFlags::DIRECTORY) {
            lookup |= LookupFlags::DIRECTORY;
        }
        if creat {
            lookup |= LookupFlags::CREATE;
        }
        if excl {
            lookup |= LookupFlags::EXCL;
        }

        let found = match self.resolver(cred).resolve(start, path, lookup)? {
            Resolved::Found(found) => {
                if excl {
                    return Err(Error::new(ErrorKind::AlreadyExists, "file exists"));
                }
                found
            }
            Resolved::Missing { parent, name } => {
                if path.ends_with(b"/") {
                    return Err(Error::new(ErrorKind::IsDirectory, "cannot create a directory with open"));
                }
                match self.create_in(cred, &parent, &name, mode) {
                    Ok(created) => return Ok(created),
                    // 另一个执行体抢先创建了同名文件
                    Err(e) if e.kind() == ErrorKind::AlreadyExists && !excl => {
                        self.resolver(cred).resolve_existing(start, path, lookup)?
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        found.mount.check_alive()?;
        if path_only {
            return Ok(found);
        }

        let node = node_of(&found)?.clone();
        let attr = node.stat()?;
        if attr.node_type == InodeType::Symlink {
            return Err(Error::new(ErrorKind::TooManyLinks, "O_NOFOLLOW on a symbolic link"));
        }
        if attr.node_type == InodeType::Directory && flags.writable() {
            return Err(Error::new(ErrorKind::IsDirectory, "is a directory"));
        }
        let mut want = Access::empty();
        if flags.readable() {
            want |= Access::READ;
        }
        if flags.writable() {
            want |= Access::WRITE;
        }
        check_access(&attr, cred, want)?;

        let truncate = flags.contains(OpenFlags::TRUNC) && attr.node_type == InodeType::RegularFile;
        if flags.writable() {
            found.mount.check_writable()?;
            if attr.flags & EXT2_IMMUTABLE_FL != 0 {
                return Err(Error::new(ErrorKind::NotPermitted, "inode is immutable"));
            }
            if attr.flags & EXT2_APPEND_FL != 0 && (!flags.contains(OpenFlags::APPEND) || truncate) {
                return Err(Error::new(ErrorKind::NotPermitted, "inode is append-only"));
            }
            if truncate && attr.size != 0 {
                node.truncate(0)?;
                notify_path(self.vfs().watches(), &found, WatchMask::MODIFY);
            }
        }
        Ok(found)
    }

    fn create_in(&self, cred: &Credentials, parent: &PathRef, name: &[u8], mode: u32) -> Result<PathRef> {
        parent.mount.check_writable()?;
        let dir = node_of(parent)?.clone();
        check_access(&dir.stat()?, cred, Access::WRITE | Access::EXEC)?;
        let mode = S_IFREG | (mode & S_IALLUGO & !self.current_umask());
        let node = dir.create(name, mode, cred.uid, cred.gid)?;
        let child = parent.dentry.bind_child(name, node);
        self.dir_event(&dir, WatchMask::CREATE, 0, name, InodeType::RegularFile, false);
        Ok(PathRef::new(parent.mount.clone(), child))
    }

    fn open_tmpfile(
        &self,
        cred: &Credentials,
        start: &PathRef,
        path: &[u8],
        flags: OpenFlags,
        mode: u32,
    ) -> Result<PathRef> {
        if !flags.writable() {
            return Err(Error::new(ErrorKind::InvalidInput, "O_TMPFILE requires write access"));
        }
        let dir = self
            .resolver(cred)
            .resolve_existing(start, path, LookupFlags::FOLLOW | LookupFlags::DIRECTORY)?;
        dir.mount.check_alive()?;
        dir.mount.check_writable()?;
        let dnode = node_of(&dir)?.clone();
        check_access(&dnode.stat()?, cred, Access::WRITE | Access::EXEC)?;
        let mode = S_IFREG | (mode & S_IALLUGO & !self.current_umask());
        let node = dnode.tmpfile(mode, cred.uid, cred.gid)?;
        let dentry = Dentry::new_unhashed(&dir.dentry, b"", node);
        Ok(PathRef::new(dir.mount.clone(), dentry))
    }

    /// 关闭描述符
    ///
    /// 记录的最后一个引用释放时派发关闭事件并调用 inode 的释放回调。
    pub fn close(&self, fd: Fd) -> Result<()> {
        let file = self.fds().close(fd)?;
        drop(file);
        Ok(())
    }

    /// 从游标处读取
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        self.file_of(fd)?.read(buf)
    }

    /// 在游标处写入（`O_APPEND` 时在文件末尾）
    pub fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        self.file_of(fd)?.write(buf)
    }

    /// 定位读取，游标不变
    pub fn pread(&self, fd: Fd, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file_of(fd)?.pread(offset, buf)
    }

    /// 定位写入，游标不变
    pub fn pwrite(&self, fd: Fd, offset: u64, buf: &[u8]) -> Result<usize> {
        self.file_of(fd)?.pwrite(offset, buf)
    }

    /// 移动游标
    pub fn seek(&self, fd: Fd, offset: i64, whence: SeekWhence) -> Result<u64> {
        self.file_of(fd)?.seek(offset, whence)
    }

    /// 描述符上的属性
    pub fn fstat(&self, fd: Fd) -> Result<FileAttr> {
        self.file_of(fd)?.stat()
    }

    /// 截断描述符指向的文件
    pub fn ftruncate(&self, fd: Fd, size: u64) -> Result<()> {
        self.with_open_file(fd, |f| f.truncate(size))
    }

    /// 同步文件数据与元数据
    pub fn fsync(&self, fd: Fd) -> Result<()> {
        self.with_open_file(fd, |f| f.fsync(false))
    }

    /// 只同步数据以及读回数据所需的元数据
    pub fn fdatasync(&self, fd: Fd) -> Result<()> {
        self.with_open_file(fd, |f| f.fsync(true))
    }

    /// 读取目录项，最多 `max` 项；读完返回空
    pub fn getdents(&self, fd: Fd, max: usize) -> Result<Vec<DirEntryInfo>> {
        self.with_open_file(fd, |f| f.read_dir(max))
    }

    /// 按路径截断
    ///
    /// # 错误
    ///
    /// - `IsDirectory` - 路径是目录
    /// - `InvalidInput` - 不是普通文件
    /// - `NotPermitted` - inode 不可变或只追加
    pub fn truncate(&self, path: &[u8], size: u64) -> Result<()> {
        let cred = self.cred();
        let found = self.lookup_at(&cred, None, path, LookupFlags::FOLLOW)?;
        let node = node_of(&found)?.clone();
        let attr = attr_at(&found)?;
        match attr.node_type {
            InodeType::RegularFile => {}
            InodeType::Directory => return Err(Error::new(ErrorKind::IsDirectory, "is a directory")),
            _ => return Err(Error::new(ErrorKind::InvalidInput, "not a regular file")),
        }
        check_access(&attr, &cred, Access::WRITE)?;
        found.mount.check_writable()?;
        if attr.flags & (EXT2_IMMUTABLE_FL | EXT2_APPEND_FL) != 0 {
            return Err(Error::new(ErrorKind::NotPermitted, "inode is immutable or append-only"));
        }
        node.truncate(size)?;
        notify_path(self.vfs().watches(), &found, WatchMask::MODIFY);
        Ok(())
    }

    /// 复制描述符到最小的空闲编号
    pub fn dup(&self, fd: Fd) -> Result<Fd> {
        self.fds().dup(fd, 0, false)
    }

    /// 复制到指定编号，原有记录先被关闭
    pub fn dup2(&self, old: Fd, new: Fd) -> Result<Fd> {
        self.fds().dup2(old, new, false)
    }

    /// 同 `dup2`，可带 `O_CLOEXEC`；`old == new` 时失败
    pub fn dup3(&self, old: Fd, new: Fd, flags: u32) -> Result<Fd> {
        if old == new {
            return Err(Error::new(ErrorKind::InvalidInput, "dup3 onto the same descriptor"));
        }
        if flags & !OpenFlags::CLOEXEC.bits() != 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "unsupported dup3 flags"));
        }
        self.fds().dup2(old, new, flags & OpenFlags::CLOEXEC.bits() != 0)
    }

    /// 描述符控制
    ///
    /// # 返回
    ///
    /// - `DupFd` / `DupFdCloexec` - 新描述符
    /// - `GetFd` - `FD_CLOEXEC` 或 0
    /// - `GetFl` - 状态标志
    /// - 其余 - 0
    pub fn fcntl(&self, fd: Fd, cmd: FcntlCmd) -> Result<usize> {
        match cmd {
            FcntlCmd::DupFd(min) => self.fds().dup(fd, min, false),
            FcntlCmd::DupFdCloexec(min) => self.fds().dup(fd, min, true),
            FcntlCmd::GetFd => Ok(if self.fds().get_cloexec(fd)? { FD_CLOEXEC } else { 0 }),
            FcntlCmd::SetFd(on) => self.fds().set_cloexec(fd, on).map(|_| 0),
            FcntlCmd::GetFl => Ok(self.file_of(fd)?.status_flags() as usize),
            FcntlCmd::SetFl(flags) => self.file_of(fd)?.set_status_flags(flags).map(|_| 0),
        }
    }
}
