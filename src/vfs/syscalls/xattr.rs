//! 扩展属性
//!
//! 每个操作都有三种变体：跟随符号链接的路径、不跟随的路径（`l` 前缀）、
//! 描述符（`f` 前缀）。读取类调用遵循"空缓冲区返回所需长度"的约定。

use super::node_of;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FileAttr, InodeType};
use crate::hal::{Capabilities, Credentials};
use crate::vfs::actor::Actor;
use crate::vfs::fd_table::Fd;
use crate::vfs::file::notify_path;
use crate::vfs::mount::PathRef;
use crate::vfs::path::LookupFlags;
use crate::vfs::permission::{check_access, is_owner_or_cap, Access};
use crate::vfs::watch::WatchMask;
use crate::xattr::XattrFlags;
use alloc::vec::Vec;

const TRUSTED_PREFIX: &[u8] = b"trusted.";
const USER_PREFIX: &[u8] = b"user.";

/// 按命名空间检查访问
fn check_xattr_access(attr: &FileAttr, cred: &Credentials, name: &[u8], want: Access) -> Result<()> {
    if name.starts_with(TRUSTED_PREFIX) {
        if !cred.has_cap(Capabilities::SYS_ADMIN) {
            return Err(Error::new(ErrorKind::NotPermitted, "trusted attributes require administration"));
        }
        return Ok(());
    }
    if name.starts_with(USER_PREFIX) {
        if !matches!(attr.node_type, InodeType::RegularFile | InodeType::Directory) {
            return Err(Error::new(ErrorKind::NotPermitted, "user attributes only on files and directories"));
        }
        return check_access(attr, cred, want);
    }
    if want.contains(Access::WRITE) && !is_owner_or_cap(attr, cred) {
        return Err(Error::new(ErrorKind::NotPermitted, "attribute requires ownership"));
    }
    Ok(())
}

/// 把结果复制到调用者缓冲区；空缓冲区只返回长度
fn copy_out(data: &[u8], buf: &mut [u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(data.len());
    }
    if buf.len() < data.len() {
        return Err(Error::new(ErrorKind::OutOfRange, "buffer too small"));
    }
    buf[..data.len()].copy_from_slice(data);
    Ok(data.len())
}

impl Actor {
    fn xattr_target(&self, cred: &Credentials, path: &[u8], follow: bool) -> Result<PathRef> {
        let flags = if follow { LookupFlags::FOLLOW } else { LookupFlags::empty() };
        self.lookup_at(cred, None, path, flags)
    }

    fn xattr_fd_target(&self, fd: Fd) -> Result<PathRef> {
        self.with_open_file(fd, |f| {
            f.check_usable()?;
            if f.is_path_only() {
                return Err(Error::new(ErrorKind::BadDescriptor, "descriptor opened with O_PATH"));
            }
            Ok(f.path().clone())
        })
    }

    fn getxattr_at(&self, cred: &Credentials, path: &PathRef, name: &[u8], buf: &mut [u8]) -> Result<usize> {
        let node = node_of(path)?;
        check_xattr_access(&node.stat()?, cred, name, Access::READ)?;
        let value = node.get_xattr(name)?;
        copy_out(&value, buf)
    }

    fn listxattr_at(&self, cred: &Credentials, path: &PathRef, buf: &mut [u8]) -> Result<usize> {
        let node = node_of(path)?;
        let admin = cred.has_cap(Capabilities::SYS_ADMIN);
        let mut out = Vec::new();
        for name in node.list_xattr()? {
            if !admin && name.starts_with(TRUSTED_PREFIX) {
                continue;
            }
            out.extend_from_slice(&name);
            out.push(0);
        }
        copy_out(&out, buf)
    }

    fn setxattr_at(
        &self,
        cred: &Credentials,
        path: &PathRef,
        name: &[u8],
        value: &[u8],
        flags: XattrFlags,
    ) -> Result<()> {
        let node = node_of(path)?;
        check_xattr_access(&node.stat()?, cred, name, Access::WRITE)?;
        path.mount.check_writable()?;
        node.set_xattr(name, value, flags)?;
        notify_path(self.vfs().watches(), path, WatchMask::ATTRIB);
        Ok(())
    }

    fn removexattr_at(&self, cred: &Credentials, path: &PathRef, name: &[u8]) -> Result<()> {
        let node = node_of(path)?;
        check_xattr_access(&node.stat()?, cred, name, Access::WRITE)?;
        path.mount.check_writable()?;
        node.remove_xattr(name)?;
        notify_path(self.vfs().watches(), path, WatchMask::ATTRIB);
        Ok(())
    }

    /// 读取属性值
    ///
    /// # 错误
    ///
    /// - `NoData` - 属性不存在
    /// - `OutOfRange` - 缓冲区非空但放不下
    /// - `NotPermitted` - `trusted.` 需要系统管理能力
    pub fn getxattr(&self, path: &[u8], name: &[u8], buf: &mut [u8]) -> Result<usize> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, true)?;
        self.getxattr_at(&cred, &target, name, buf)
    }

    /// 同 `getxattr`，不跟随最后一个符号链接
    pub fn lgetxattr(&self, path: &[u8], name: &[u8], buf: &mut [u8]) -> Result<usize> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, false)?;
        self.getxattr_at(&cred, &target, name, buf)
    }

    /// 在描述符上读取属性值
    pub fn fgetxattr(&self, fd: Fd, name: &[u8], buf: &mut [u8]) -> Result<usize> {
        let cred = self.cred();
        let target = self.xattr_fd_target(fd)?;
        self.getxattr_at(&cred, &target, name, buf)
    }

    /// 列出属性名，以 NUL 分隔；没有系统管理能力时隐藏 `trusted.`
    pub fn listxattr(&self, path: &[u8], buf: &mut [u8]) -> Result<usize> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, true)?;
        self.listxattr_at(&cred, &target, buf)
    }

    /// 同 `listxattr`，不跟随最后一个符号链接
    pub fn llistxattr(&self, path: &[u8], buf: &mut [u8]) -> Result<usize> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, false)?;
        self.listxattr_at(&cred, &target, buf)
    }

    /// 在描述符上列出属性名
    pub fn flistxattr(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let cred = self.cred();
        let target = self.xattr_fd_target(fd)?;
        self.listxattr_at(&cred, &target, buf)
    }

    /// 设置属性
    ///
    /// # 错误
    ///
    /// - `AlreadyExists` - `CREATE` 而属性已存在
    /// - `NoData` - `REPLACE` 而属性不存在
    /// - `NoSpace` - 属性块放不下
    /// - `ReadOnly` - 卷只读
    pub fn setxattr(&self, path: &[u8], name: &[u8], value: &[u8], flags: XattrFlags) -> Result<()> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, true)?;
        self.setxattr_at(&cred, &target, name, value, flags)
    }

    /// 同 `setxattr`，不跟随最后一个符号链接
    pub fn lsetxattr(&self, path: &[u8], name: &[u8], value: &[u8], flags: XattrFlags) -> Result<()> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, false)?;
        self.setxattr_at(&cred, &target, name, value, flags)
    }

    /// 在描述符上设置属性
    pub fn fsetxattr(&self, fd: Fd, name: &[u8], value: &[u8], flags: XattrFlags) -> Result<()> {
        let cred = self.cred();
        let target = self.xattr_fd_target(fd)?;
        self.setxattr_at(&cred, &target, name, value, flags)
    }

    /// 删除属性
    pub fn removexattr(&self, path: &[u8], name: &[u8]) -> Result<()> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, true)?;
        self.removexattr_at(&cred, &target, name)
    }

    /// 同 `removexattr`，不跟随最后一个符号链接
    pub fn lremovexattr(&self, path: &[u8], name: &[u8]) -> Result<()> {
        let cred = self.cred();
        let target = self.xattr_target(&cred, path, false)?;
        self.removexattr_at(&cred, &target, name)
    }

    /// 在描述符上删除属性
    pub fn fremovexattr(&self, fd: Fd, name: &[u8]) -> Result<()> {
        let cred = self.cred();
        let target = self.xattr_fd_target(fd)?;
        self.removexattr_at(&cred, &target, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_attr(uid: u32, mode: u32, node_type: InodeType) -> FileAttr {
        FileAttr { uid, gid: uid, mode, node_type, ..FileAttr::default() }
    }

    #[test]
    fn test_copy_out_sizes() {
        let mut empty = [0u8; 0];
        assert_eq!(copy_out(b"abc", &mut empty).unwrap(), 3);
        let mut small = [0u8; 2];
        assert_eq!(copy_out(b"abc", &mut small).unwrap_err().kind(), ErrorKind::OutOfRange);
        let mut big = [0u8; 8];
        assert_eq!(copy_out(b"abc", &mut big).unwrap(), 3);
        assert_eq!(&big[..3], b"abc");
    }

    #[test]
    fn test_namespace_rules() {
        let user = Credentials::user(1000, 1000);
        let file = file_attr(1000, 0o100600, InodeType::RegularFile);
        assert!(check_xattr_access(&file, &user, b"user.a", Access::WRITE).is_ok());
        assert_eq!(
            check_xattr_access(&file, &user, b"trusted.a", Access::READ).unwrap_err().kind(),
            ErrorKind::NotPermitted
        );
        assert!(check_xattr_access(&file, &Credentials::root(), b"trusted.a", Access::WRITE).is_ok());

        let other = Credentials::user(2000, 2000);
        assert_eq!(
            check_xattr_access(&file, &other, b"user.a", Access::READ).unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        let link = file_attr(1000, 0o120777, InodeType::Symlink);
        assert_eq!(
            check_xattr_access(&link, &user, b"user.a", Access::READ).unwrap_err().kind(),
            ErrorKind::NotPermitted
        );
    }
}
