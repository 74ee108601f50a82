//! 路径解析
//!
//! 把文本路径逐个分量解析成 [`PathRef`]。分量先在目录项缓存中查找，未命中时
//! 调用目录的 `lookup` 并把结果（正项或负项）放回缓存。经过挂载点时进入被挂载卷的根，
//! 遇到符号链接时把链接内容拼接到剩余分量之前继续解析。

use super::dentry::Dentry;
use super::mount::{MountTable, PathRef};
use super::permission::{check_access, Access};
use crate::consts::{EXT2_NAME_MAX, PATH_MAX};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::InodeType;
use crate::hal::Credentials;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

bitflags::bitflags! {
    /// 查找意图
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LookupFlags: u32 {
        /// 最后一个分量是符号链接时跟随
        const FOLLOW = 1 << 0;
        /// 结果必须是目录
        const DIRECTORY = 1 << 1;
        /// 最后一个分量可以不存在
        const CREATE = 1 << 2;
        /// 最后一个分量必须不存在
        const EXCL = 1 << 3;
    }
}

/// 解析结果
#[derive(Debug, Clone)]
pub enum Resolved {
    /// 找到
    Found(PathRef),
    /// 最后一个分量不存在（仅 `CREATE` 意图）
    Missing {
        /// 父目录
        parent: PathRef,
        /// 名字
        name: Vec<u8>,
    },
}

/// 父目录解析得到的最后一个分量
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastComponent {
    /// 普通名字
    Name(Vec<u8>),
    /// `.`
    Dot,
    /// `..`
    DotDot,
}

impl LastComponent {
    /// 取出普通名字；`.` 与 `..` 以给定错误拒绝
    pub fn into_name(self, kind: ErrorKind) -> Result<Vec<u8>> {
        match self {
            LastComponent::Name(name) => Ok(name),
            _ => Err(Error::new(kind, "path ends in '.' or '..'")),
        }
    }
}

fn has_trailing_slash(path: &[u8]) -> bool {
    path.len() > 1 && path.ends_with(b"/")
}

fn components(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.split(|&b| b == b'/').filter(|c| !c.is_empty() && *c != b".")
}

fn check_path(path: &[u8]) -> Result<()> {
    if path.is_empty() {
        return Err(Error::new(ErrorKind::NotFound, "empty path"));
    }
    if path.len() > PATH_MAX {
        return Err(Error::new(ErrorKind::NameTooLong, "path too long"));
    }
    Ok(())
}

fn check_name(name: &[u8]) -> Result<()> {
    if name.len() > EXT2_NAME_MAX {
        return Err(Error::new(ErrorKind::NameTooLong, "path component too long"));
    }
    Ok(())
}

/// 一次路径解析的上下文
///
/// 符号链接跳数在一次解析内累计。
pub struct Resolver<'a> {
    mounts: &'a MountTable,
    cred: &'a Credentials,
    root: PathRef,
    max_hops: u32,
    hops: u32,
}

impl<'a> Resolver<'a> {
    /// 创建解析器
    ///
    /// # 参数
    ///
    /// * `root` - 执行体的根，`..` 不会越过它，绝对路径从它开始
    /// * `max_hops` - 符号链接跳数上限
    pub fn new(mounts: &'a MountTable, cred: &'a Credentials, root: PathRef, max_hops: u32) -> Self {
        Self { mounts, cred, root, max_hops, hops: 0 }
    }

    /// 已经跟随的符号链接数
    pub fn hops(&self) -> u32 {
        self.hops
    }

    /// 解析路径
    ///
    /// 以 `/` 结尾的路径隐含 `DIRECTORY | FOLLOW`。
    ///
    /// # 错误
    ///
    /// - `NotFound` - 路径为空、某个分量不存在、符号链接内容为空
    /// - `NameTooLong` - 路径超过 4096 字节或分量超过 255 字节
    /// - `NotDirectory` - 中间分量不是目录，或 `DIRECTORY` 意图下结果不是目录
    /// - `PermissionDenied` - 缺少目录搜索权限
    /// - `TooManyLinks` - 符号链接跳数超过上限
    pub fn resolve(&mut self, start: &PathRef, path: &[u8], mut flags: LookupFlags) -> Result<Resolved> {
        check_path(path)?;
        if has_trailing_slash(path) {
            flags |= LookupFlags::DIRECTORY | LookupFlags::FOLLOW;
        }
        let cur = if path.starts_with(b"/") { self.root.clone() } else { start.clone() };
        let comps: VecDeque<Vec<u8>> = components(path).map(|c| c.to_vec()).collect();
        let resolved = self.walk(cur, comps, flags)?;
        if let Resolved::Found(found) = &resolved {
            if flags.contains(LookupFlags::DIRECTORY) && !found.dentry.is_dir() {
                return Err(Error::new(ErrorKind::NotDirectory, "not a directory"));
            }
        }
        Ok(resolved)
    }

    /// 解析一个必须存在的路径
    pub fn resolve_existing(&mut self, start: &PathRef, path: &[u8], flags: LookupFlags) -> Result<PathRef> {
        match self.resolve(start, path, flags - LookupFlags::CREATE)? {
            Resolved::Found(found) => Ok(found),
            Resolved::Missing { .. } => Err(Error::new(ErrorKind::NotFound, "no such file or directory")),
        }
    }

    /// 解析父目录，最后一个分量原样返回
    ///
    /// 父目录路径中的符号链接都被跟随，最后一个分量不做查找。
    pub fn resolve_parent(&mut self, start: &PathRef, path: &[u8]) -> Result<(PathRef, LastComponent)> {
        check_path(path)?;
        let trimmed = {
            let mut end = path.len();
            while end > 1 && path[end - 1] == b'/' {
                end -= 1;
            }
            &path[..end]
        };
        if trimmed == b"/" {
            return Ok((self.root.clone(), LastComponent::Dot));
        }
        let (dir_part, last) = match trimmed.iter().rposition(|&b| b == b'/') {
            Some(pos) => (&trimmed[..pos + 1], &trimmed[pos + 1..]),
            None => (&b""[..], trimmed),
        };
        let parent = if dir_part.is_empty() {
            start.clone()
        } else {
            self.resolve_existing(start, dir_part, LookupFlags::FOLLOW | LookupFlags::DIRECTORY)?
        };
        if !parent.dentry.is_dir() {
            return Err(Error::new(ErrorKind::NotDirectory, "parent is not a directory"));
        }
        let last = match last {
            b"." => LastComponent::Dot,
            b".." => LastComponent::DotDot,
            name => {
                check_name(name)?;
                LastComponent::Name(name.to_vec())
            }
        };
        Ok((parent, last))
    }

    fn walk(&mut self, mut cur: PathRef, mut comps: VecDeque<Vec<u8>>, flags: LookupFlags) -> Result<Resolved> {
        while let Some(comp) = comps.pop_front() {
            let is_last = comps.is_empty();
            let node = match cur.dentry.inode() {
                Some(node) if node.node_type() == InodeType::Directory => node.clone(),
                _ => return Err(Error::new(ErrorKind::NotDirectory, "path component is not a directory")),
            };
            check_access(&node.stat()?, self.cred, Access::EXEC)?;

            if comp.as_slice() == b".." {
                cur = self.step_parent(cur)?;
                continue;
            }
            check_name(&comp)?;

            let child = lookup_child(&cur.dentry, &comp)?;
            if child.is_negative() {
                if is_last && flags.contains(LookupFlags::CREATE) {
                    return Ok(Resolved::Missing { parent: cur, name: comp });
                }
                return Err(Error::new(ErrorKind::NotFound, "no such file or directory"));
            }

            let next = self.follow_mounts(PathRef::new(cur.mount.clone(), child));
            let is_link = next.dentry.inode().map_or(false, |i| i.node_type() == InodeType::Symlink);
            if is_link && (!is_last || flags.contains(LookupFlags::FOLLOW)) {
                self.hops += 1;
                if self.hops > self.max_hops {
                    log::debug!("[VFS] symlink hop limit {} exceeded", self.max_hops);
                    return Err(Error::new(ErrorKind::TooManyLinks, "too many levels of symbolic links"));
                }
                let target = match next.dentry.inode() {
                    Some(link) => link.readlink()?,
                    None => return Err(Error::new(ErrorKind::NotFound, "symlink vanished")),
                };
                if target.is_empty() {
                    return Err(Error::new(ErrorKind::NotFound, "empty symlink"));
                }
                if target.starts_with(b"/") {
                    cur = self.root.clone();
                }
                let mut spliced: VecDeque<Vec<u8>> = components(&target).map(|c| c.to_vec()).collect();
                spliced.extend(comps.drain(..));
                comps = spliced;
                continue;
            }
            cur = next;
        }
        Ok(Resolved::Found(cur))
    }

    /// `..`：不越过执行体的根；在挂载根处先回到挂载点
    fn step_parent(&self, mut cur: PathRef) -> Result<PathRef> {
        loop {
            if cur.same(&self.root) {
                return Ok(cur);
            }
            if !cur.is_mount_root() {
                break;
            }
            match cur.mount.parent() {
                Some((pm, point)) => cur = PathRef::new(pm.clone(), point.clone()),
                None => return Ok(cur),
            }
        }
        match cur.dentry.parent() {
            Some(parent) => Ok(PathRef::new(cur.mount, parent)),
            None => Err(Error::new(ErrorKind::NotFound, "parent directory was removed")),
        }
    }

    /// 目录项被挂载覆盖时进入最上层的被挂载卷
    pub fn follow_mounts(&self, mut cur: PathRef) -> PathRef {
        while cur.dentry.is_mounted() {
            match self.mounts.find_mounted(&cur.mount, &cur.dentry) {
                Some(m) => {
                    let root = m.root().clone();
                    cur = PathRef::new(m, root);
                }
                None => break,
            }
        }
        cur
    }
}

/// 查找子项：先查缓存，未命中再问目录，并把结果放回缓存
pub fn lookup_child(parent: &Arc<Dentry>, name: &[u8]) -> Result<Arc<Dentry>> {
    if let Some(hit) = parent.lookup_cached(name) {
        return Ok(hit);
    }
    let dir = parent
        .inode()
        .ok_or(Error::new(ErrorKind::NotFound, "negative parent"))?;
    let seq = parent.begin_lookup();
    let found = dir.lookup(name)?;
    log::trace!(
        "[VFS] dcache miss {:?} -> {}",
        core::str::from_utf8(name).unwrap_or("?"),
        found.as_ref().map_or(0, |n| n.ino())
    );
    Ok(parent.cache_lookup_result(name, found, seq))
}

/// 由位置反推绝对路径（相对执行体的根）
///
/// # 错误
///
/// - `NotFound` - 位置所在目录已被删除
pub fn path_of(root: &PathRef, at: &PathRef) -> Result<Vec<u8>> {
    let mut parts: Vec<Vec<u8>> = Vec::new();
    let mut cur = at.clone();
    loop {
        if cur.same(root) {
            break;
        }
        if cur.is_mount_root() {
            match cur.mount.parent() {
                Some((pm, point)) => {
                    cur = PathRef::new(pm.clone(), point.clone());
                    continue;
                }
                None => break,
            }
        }
        if cur.dentry.is_stale() {
            return Err(Error::new(ErrorKind::NotFound, "directory was removed"));
        }
        parts.push(cur.dentry.name());
        match cur.dentry.parent() {
            Some(parent) => cur = PathRef::new(cur.mount.clone(), parent),
            None => return Err(Error::new(ErrorKind::NotFound, "directory was removed")),
        }
    }
    let mut out = Vec::new();
    for part in parts.iter().rev() {
        out.push(b'/');
        out.extend_from_slice(part);
    }
    if out.is_empty() {
        out.push(b'/');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_components_skip_dots_and_slashes() {
        let parts: Vec<&[u8]> = components(b"//a/./b//../c/").collect();
        assert_eq!(parts, vec![&b"a"[..], b"b", b"..", b"c"]);
        assert!(has_trailing_slash(b"a/"));
        assert!(!has_trailing_slash(b"/"));
    }

    #[test]
    fn test_path_length_limits() {
        assert_eq!(check_path(b"").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(check_path(&[b'a'; PATH_MAX]).is_ok());
        assert_eq!(check_path(&[b'a'; PATH_MAX + 1]).unwrap_err().kind(), ErrorKind::NameTooLong);
        assert!(check_name(&[b'n'; 255]).is_ok());
        assert_eq!(check_name(&[b'n'; 256]).unwrap_err().kind(), ErrorKind::NameTooLong);
    }

    #[test]
    fn test_last_component() {
        assert_eq!(LastComponent::Name(b"x".to_vec()).into_name(ErrorKind::InvalidInput).unwrap(), b"x");
        assert_eq!(
            LastComponent::Dot.into_name(ErrorKind::AlreadyExists).unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
    }
}
