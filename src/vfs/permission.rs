//! 访问权限检查

use crate::consts::{EXT2_APPEND_FL, EXT2_IMMUTABLE_FL, S_ISVTX};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::FileAttr;
use crate::hal::{Capabilities, Credentials};

bitflags::bitflags! {
    /// 请求的访问类型
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        /// 执行或目录搜索
        const EXEC = 1;
        /// 写
        const WRITE = 2;
        /// 读
        const READ = 4;
    }
}

/// 按属主、属组、其他三组权限位检查访问
///
/// 拥有 `DAC_OVERRIDE` 的凭证放行一切访问，只有一个例外：对没有任何执行位的
/// 非目录请求执行权限仍然被拒绝。
pub fn check_access(attr: &FileAttr, cred: &Credentials, want: Access) -> Result<()> {
    if want.is_empty() {
        return Ok(());
    }
    let is_dir = attr.node_type.is_dir();

    if cred.has_cap(Capabilities::DAC_OVERRIDE) {
        if want.contains(Access::EXEC) && !is_dir && attr.mode & 0o111 == 0 {
            return Err(Error::new(ErrorKind::PermissionDenied, "no execute bit set"));
        }
        return Ok(());
    }

    if cred.has_cap(Capabilities::DAC_READ_SEARCH)
        && !want.contains(Access::WRITE)
        && (!want.contains(Access::EXEC) || is_dir)
    {
        return Ok(());
    }

    let triad = if cred.uid == attr.uid {
        (attr.mode >> 6) & 0o7
    } else if cred.in_group(attr.gid) {
        (attr.mode >> 3) & 0o7
    } else {
        attr.mode & 0o7
    };
    if triad & want.bits() == want.bits() {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::PermissionDenied, "permission denied"))
    }
}

/// 调用者是否为属主或拥有 `FOWNER`
pub fn is_owner_or_cap(attr: &FileAttr, cred: &Credentials) -> bool {
    cred.uid == attr.uid || cred.has_cap(Capabilities::FOWNER)
}

/// 粘滞目录：删除或重命名其中的项需要是项或目录的属主
pub fn check_sticky(dir: &FileAttr, child: &FileAttr, cred: &Credentials) -> Result<()> {
    if dir.mode & S_ISVTX == 0 || cred.uid == child.uid || cred.uid == dir.uid {
        return Ok(());
    }
    if cred.has_cap(Capabilities::FOWNER) {
        return Ok(());
    }
    Err(Error::new(ErrorKind::NotPermitted, "sticky directory"))
}

/// 不可变或只追加的 inode 拒绝属性修改
pub fn check_mutable(attr: &FileAttr) -> Result<()> {
    if attr.flags & (EXT2_IMMUTABLE_FL | EXT2_APPEND_FL) != 0 {
        return Err(Error::new(ErrorKind::NotPermitted, "inode is immutable or append-only"));
    }
    Ok(())
}
