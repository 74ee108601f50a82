//! 名字空间操作
//!
//! 创建、链接、删除与重命名。每个操作自己获取需要的 inode 操作锁：
//! 父目录在前，子 inode 在后；需要两个父目录时祖先在前，无祖先关系时编号小的在前。
//! 跨目录重命名由调用者持有全局重命名锁。

use super::filesystem::Ext2Fs;
use super::types::{RenameFlags, SetAttr, TimeUpdate};
use crate::{
    consts::*,
    dir::{self, file_type_from_mode, DirEntry, DirIterator},
    error::{Error, ErrorKind, Result},
    inode::{Inode, InodeState},
    sync::RwLockWriteGuard,
};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 被重命名覆盖的目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replaced {
    /// 目标 inode 编号
    pub ino: u32,
    /// 覆盖后目标是否已无链接
    pub unlinked: bool,
}

/// 检查单个名字分量
fn check_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name == b"." || name == b".." {
        return Err(Error::new(ErrorKind::InvalidInput, "invalid entry name"));
    }
    if name.len() > EXT2_NAME_MAX {
        return Err(Error::new(ErrorKind::NameTooLong, "name longer than 255 bytes"));
    }
    if name.iter().any(|&b| b == b'/' || b == 0) {
        return Err(Error::new(ErrorKind::InvalidInput, "name contains '/' or NUL"));
    }
    Ok(())
}

fn check_parent(dir: &Inode) -> Result<()> {
    let raw = dir.read();
    if !raw.is_dir() {
        return Err(Error::new(ErrorKind::NotDirectory, "parent is not a directory"));
    }
    if raw.flags & (EXT2_IMMUTABLE_FL | EXT2_APPEND_FL) != 0 {
        return Err(Error::new(ErrorKind::NotPermitted, "parent is immutable or append-only"));
    }
    Ok(())
}

fn check_mutable(inode: &Inode) -> Result<()> {
    if inode.read().flags & (EXT2_IMMUTABLE_FL | EXT2_APPEND_FL) != 0 {
        return Err(Error::new(ErrorKind::NotPermitted, "inode is immutable or append-only"));
    }
    Ok(())
}

impl Ext2Fs {
    /// 目录项类型提示（未启用 filetype 特性时为 0）
    fn dirent_type(&self, mode: u32) -> u8 {
        if self.geo().filetype {
            file_type_from_mode(mode)
        } else {
            EXT2_FT_UNKNOWN
        }
    }

    fn adjust_links(&self, inode: &Inode, delta: i32) -> Result<()> {
        let now = self.now();
        inode.update(|r| {
            r.links_count = (r.links_count as i32 + delta).clamp(0, u16::MAX as i32) as u16;
            r.set_ctime(now);
        })
    }

    fn touch_ctime(&self, inode: &Inode) -> Result<()> {
        let now = self.now();
        inode.update(|r| r.set_ctime(now))
    }

    /// 新 inode 的属组与模式
    ///
    /// 父目录带 setgid 时继承父目录的属组；新目录同时继承 setgid 位。
    fn inherit_owner(&self, dir: &Inode, mode: u32, gid: u32) -> (u32, u32) {
        let parent = dir.read();
        if parent.mode as u32 & S_ISGID == 0 {
            return (mode, gid);
        }
        let mode = if mode & S_IFMT == S_IFDIR { mode | S_ISGID } else { mode };
        (mode, parent.gid())
    }

    /// 在目录中查找子 inode
    pub fn lookup_child(&self, dir: &Inode, name: &[u8]) -> Result<Option<Arc<Inode>>> {
        let _guard = dir.lock_shared(self.hal())?;
        let raw = dir.snapshot();
        match dir::lookup(self, &raw, name)? {
            Some(ino) => Ok(Some(self.get_inode(ino)?)),
            None => Ok(None),
        }
    }

    /// 从 `pos` 开始读取一个目录项
    ///
    /// # 返回
    ///
    /// 目录项和下一个位置；到达末尾时返回 `None`
    pub fn read_dir_at(&self, dir: &Inode, pos: u64) -> Result<Option<(DirEntry, u64)>> {
        let _guard = dir.lock_shared(self.hal())?;
        let raw = dir.snapshot();
        let mut iter = DirIterator::new(self, &raw, pos)?;
        Ok(iter.next(self, &raw)?.map(|entry| (entry, iter.position())))
    }

    /// 创建普通文件或特殊文件
    ///
    /// # 参数
    ///
    /// * `dir` - 父目录
    /// * `name` - 名字
    /// * `mode` - 类型与权限位（类型为 0 时视为普通文件）
    /// * `uid`, `gid` - 调用者身份
    ///
    /// # 错误
    ///
    /// - `ErrorKind::AlreadyExists` - 名字已存在
    /// - `ErrorKind::NoInode` / `ErrorKind::NoSpace` - 空间不足
    pub fn create(&self, dir: &Inode, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<Arc<Inode>> {
        check_name(name)?;
        let mode = match mode & S_IFMT {
            0 => S_IFREG | (mode & S_IALLUGO),
            S_IFDIR | S_IFLNK => return Err(Error::new(ErrorKind::InvalidInput, "wrong creation call for type")),
            _ => mode,
        };
        let _guard = dir.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_parent(dir)?;
        if dir::lookup(self, &dir.snapshot(), name)?.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "entry exists"));
        }

        let (mode, gid) = self.inherit_owner(dir, mode, gid);
        let inode = self.new_inode(dir, mode, uid, gid)?;
        dir::add_entry(self, dir, name, inode.ino(), self.dirent_type(mode))?;
        inode.update(|r| r.links_count = 1)?;
        inode.clear_state(InodeState::NEW);
        log::debug!("[EXT2] create inode {} in dir {}", inode.ino(), dir.ino());
        Ok(inode)
    }

    /// 创建目录
    pub fn mkdir(&self, dir: &Inode, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<Arc<Inode>> {
        check_name(name)?;
        let _guard = dir.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_parent(dir)?;
        if dir.links() >= EXT2_LINK_MAX {
            return Err(Error::new(ErrorKind::LinkLimit, "too many subdirectories"));
        }
        if dir::lookup(self, &dir.snapshot(), name)?.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "entry exists"));
        }

        let (mode, gid) = self.inherit_owner(dir, S_IFDIR | (mode & S_IALLUGO), gid);
        let child = self.new_inode(dir, mode, uid, gid)?;
        dir::init_dir(self, &child, dir.ino())?;
        dir::add_entry(self, dir, name, child.ino(), self.dirent_type(S_IFDIR))?;
        child.update(|r| r.links_count = 2)?;
        child.clear_state(InodeState::NEW);
        self.adjust_links(dir, 1)?;
        log::debug!("[EXT2] mkdir inode {} in dir {}", child.ino(), dir.ino());
        Ok(child)
    }

    /// 创建符号链接
    pub fn symlink(&self, dir: &Inode, name: &[u8], target: &[u8], uid: u32, gid: u32) -> Result<Arc<Inode>> {
        check_name(name)?;
        if target.is_empty() {
            return Err(Error::new(ErrorKind::NotFound, "empty symlink target"));
        }
        if target.len() >= PATH_MAX {
            return Err(Error::new(ErrorKind::NameTooLong, "symlink target too long"));
        }
        let _guard = dir.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_parent(dir)?;
        if dir::lookup(self, &dir.snapshot(), name)?.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "entry exists"));
        }

        let (mode, gid) = self.inherit_owner(dir, S_IFLNK | 0o777, gid);
        let link = self.new_inode(dir, mode, uid, gid)?;
        self.write_link(&link, target)?;
        dir::add_entry(self, dir, name, link.ino(), self.dirent_type(S_IFLNK))?;
        link.update(|r| r.links_count = 1)?;
        link.clear_state(InodeState::NEW);
        Ok(link)
    }

    /// 创建一个没有名字的普通文件
    ///
    /// 链接数为 0；最后一个持有者释放时被回收，除非之前通过 [`link`](Self::link) 获得了名字。
    pub fn tmpfile(&self, dir: &Inode, mode: u32, uid: u32, gid: u32) -> Result<Arc<Inode>> {
        self.check_writable()?;
        check_parent(dir)?;
        let (mode, gid) = self.inherit_owner(dir, S_IFREG | (mode & S_IALLUGO), gid);
        let inode = self.new_inode(dir, mode, uid, gid)?;
        log::debug!("[EXT2] tmpfile inode {} under dir {}", inode.ino(), dir.ino());
        Ok(inode)
    }

    /// 创建硬链接
    pub fn link(&self, dir: &Inode, name: &[u8], target: &Inode) -> Result<()> {
        check_name(name)?;
        let _guard = dir.lock_exclusive(self.hal())?;
        let _target_guard = target.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_parent(dir)?;
        check_mutable(target)?;
        if target.is_dir() {
            return Err(Error::new(ErrorKind::NotPermitted, "hard link to directory"));
        }
        if target.links() >= EXT2_LINK_MAX {
            return Err(Error::new(ErrorKind::LinkLimit, "too many links"));
        }
        if dir::lookup(self, &dir.snapshot(), name)?.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists, "entry exists"));
        }

        let mode = target.read().mode as u32;
        dir::add_entry(self, dir, name, target.ino(), self.dirent_type(mode))?;
        self.adjust_links(target, 1)?;
        target.clear_state(InodeState::NEW);
        Ok(())
    }

    /// 删除非目录的名字
    ///
    /// # 返回
    ///
    /// 被删除名字指向的 inode（链接数已减一）
    pub fn unlink(&self, dir: &Inode, name: &[u8]) -> Result<Arc<Inode>> {
        check_name(name)?;
        let _guard = dir.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_parent(dir)?;
        let ino = dir::lookup(self, &dir.snapshot(), name)?
            .ok_or(Error::new(ErrorKind::NotFound, "no such entry"))?;
        let child = self.get_inode(ino)?;
        let _child_guard = child.lock_exclusive(self.hal())?;
        if child.is_dir() {
            return Err(Error::new(ErrorKind::IsDirectory, "unlink of a directory"));
        }
        check_mutable(&child)?;

        dir::remove_entry(self, dir, name)?;
        self.adjust_links(&child, -1)?;
        drop(_child_guard);
        log::debug!("[EXT2] unlink inode {} from dir {}, {} links left", ino, dir.ino(), child.links());
        Ok(child)
    }

    /// 删除空目录
    pub fn rmdir(&self, dir: &Inode, name: &[u8]) -> Result<Arc<Inode>> {
        if name == b"." {
            return Err(Error::new(ErrorKind::InvalidInput, "cannot remove '.'"));
        }
        if name == b".." {
            return Err(Error::new(ErrorKind::NotEmpty, "cannot remove '..'"));
        }
        check_name(name)?;
        let _guard = dir.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_parent(dir)?;
        let ino = dir::lookup(self, &dir.snapshot(), name)?
            .ok_or(Error::new(ErrorKind::NotFound, "no such entry"))?;
        let child = self.get_inode(ino)?;
        let _child_guard = child.lock_exclusive(self.hal())?;
        let raw = child.snapshot();
        if !raw.is_dir() {
            return Err(Error::new(ErrorKind::NotDirectory, "rmdir of a non-directory"));
        }
        check_mutable(&child)?;
        if !dir::is_empty(self, &raw)? {
            return Err(Error::new(ErrorKind::NotEmpty, "directory not empty"));
        }

        dir::remove_entry(self, dir, name)?;
        let now = self.now();
        child.update(|r| {
            r.links_count = 0;
            r.set_ctime(now);
        })?;
        self.adjust_links(dir, -1)?;
        drop(_child_guard);
        log::debug!("[EXT2] rmdir inode {} from dir {}", ino, dir.ino());
        Ok(child)
    }

    /// `anc` 是否为 `ino` 本身或它的祖先目录
    ///
    /// 沿 ".." 向上走到根。调用者持有全局重命名锁，树形在走的过程中不变。
    pub fn is_ancestor(&self, anc: u32, ino: u32) -> Result<bool> {
        let mut cur = ino;
        for _ in 0..=self.geo().inodes_count {
            if cur == anc {
                return Ok(true);
            }
            if cur == EXT2_ROOT_INO {
                return Ok(false);
            }
            let inode = self.get_inode(cur)?;
            let raw = inode.snapshot();
            cur = dir::lookup(self, &raw, b"..")?
                .ok_or(Error::new(ErrorKind::Corrupted, "directory without '..'"))?;
        }
        log::error!("[EXT2] '..' chain from inode {} never reaches the root", ino);
        Err(Error::new(ErrorKind::Corrupted, "directory loop"))
    }

    fn set_dotdot(&self, dir_inode: &Inode, parent: u32) -> Result<()> {
        dir::retarget_entry(self, dir_inode, b"..", parent, self.dirent_type(S_IFDIR))
    }

    /// 重命名时两个父目录的加锁顺序
    ///
    /// 一个是另一个的祖先时祖先在前，与路径查找自上而下的加锁方向一致；
    /// 互不包含时 inode 号小的在前。跨目录重命名另由 VFS 的重命名锁串行化，
    /// 祖先关系在两次加锁之间不会改变。
    fn parent_lock_order<'i>(&self, old_dir: &'i Inode, new_dir: &'i Inode) -> Result<(&'i Inode, &'i Inode)> {
        let old_first = old_dir.ino() == new_dir.ino()
            || (!self.is_ancestor(new_dir.ino(), old_dir.ino())?
                && (self.is_ancestor(old_dir.ino(), new_dir.ino())? || old_dir.ino() < new_dir.ino()));
        Ok(if old_first { (old_dir, new_dir) } else { (new_dir, old_dir) })
    }

    /// 重命名
    ///
    /// 目标存在时原地改指目录项，旧目标的链接数减一（目录直接清零）。
    /// `EXCHANGE` 交换两个名字；`NOREPLACE` 在目标存在时失败。
    ///
    /// # 错误
    ///
    /// - `ErrorKind::InvalidInput` - 把目录移动到它自己之下
    /// - `ErrorKind::NotDirectory` / `ErrorKind::IsDirectory` - 类型不兼容
    /// - `ErrorKind::NotEmpty` - 目标目录非空
    pub fn rename(
        &self,
        old_dir: &Inode,
        old_name: &[u8],
        new_dir: &Inode,
        new_name: &[u8],
        flags: RenameFlags,
    ) -> Result<Option<Replaced>> {
        check_name(old_name)?;
        check_name(new_name)?;
        if flags.contains(RenameFlags::NOREPLACE | RenameFlags::EXCHANGE) {
            return Err(Error::new(ErrorKind::InvalidInput, "NOREPLACE with EXCHANGE"));
        }
        let exchange = flags.contains(RenameFlags::EXCHANGE);
        let same_dir = old_dir.ino() == new_dir.ino();

        let (first, second) = self.parent_lock_order(old_dir, new_dir)?;
        let _first_guard = first.lock_exclusive(self.hal())?;
        let _second_guard = if same_dir { None } else { Some(second.lock_exclusive(self.hal())?) };

        self.check_writable()?;
        check_parent(old_dir)?;
        check_parent(new_dir)?;

        let src = dir::find_entry(self, &old_dir.snapshot(), old_name)?
            .ok_or(Error::new(ErrorKind::NotFound, "rename source missing"))?;
        let dst = dir::find_entry(self, &new_dir.snapshot(), new_name)?;
        match &dst {
            Some(_) if flags.contains(RenameFlags::NOREPLACE) => {
                return Err(Error::new(ErrorKind::AlreadyExists, "rename target exists"));
            }
            None if exchange => return Err(Error::new(ErrorKind::NotFound, "exchange target missing")),
            Some(d) if d.inode == src.inode => return Ok(None),
            _ => {}
        }

        let src_inode = self.get_inode(src.inode)?;
        let src_is_dir = src_inode.is_dir();
        if src_is_dir && !same_dir && self.is_ancestor(src.inode, new_dir.ino())? {
            return Err(Error::new(ErrorKind::InvalidInput, "directory moved under itself"));
        }

        let dst_inode = dst.as_ref().map(|d| self.get_inode(d.inode)).transpose()?;
        let dst_is_dir = dst_inode.as_ref().map_or(false, |d| d.is_dir());
        if let Some(d) = &dst_inode {
            if exchange {
                if dst_is_dir && !same_dir && self.is_ancestor(d.ino(), old_dir.ino())? {
                    return Err(Error::new(ErrorKind::InvalidInput, "directory moved under itself"));
                }
            } else {
                if src_is_dir && !dst_is_dir {
                    return Err(Error::new(ErrorKind::NotDirectory, "directory over non-directory"));
                }
                if !src_is_dir && dst_is_dir {
                    return Err(Error::new(ErrorKind::IsDirectory, "non-directory over directory"));
                }
                if dst_is_dir && self.is_ancestor(d.ino(), old_dir.ino())? {
                    return Err(Error::new(ErrorKind::NotEmpty, "target directory not empty"));
                }
            }
        }

        let mut children: Vec<&Inode> = Vec::with_capacity(2);
        children.push(&src_inode);
        if let Some(d) = &dst_inode {
            children.push(d);
        }
        children.sort_by_key(|i| i.ino());
        let mut _child_guards: Vec<RwLockWriteGuard<'_, ()>> = Vec::with_capacity(2);
        for child in &children {
            _child_guards.push(child.lock_exclusive(self.hal())?);
        }

        check_mutable(&src_inode)?;
        if let Some(d) = &dst_inode {
            check_mutable(d)?;
            if !exchange && dst_is_dir && !dir::is_empty(self, &d.snapshot())? {
                return Err(Error::new(ErrorKind::NotEmpty, "target directory not empty"));
            }
        }
        let moves_subdir_in = !same_dir
            && ((src_is_dir && !dst_is_dir) || (exchange && dst_is_dir && !src_is_dir));
        if moves_subdir_in {
            let target_parent = if src_is_dir { new_dir } else { old_dir };
            if target_parent.links() >= EXT2_LINK_MAX {
                return Err(Error::new(ErrorKind::LinkLimit, "too many subdirectories"));
            }
        }

        let src_type = self.dirent_type(src_inode.read().mode as u32);
        if exchange {
            let Some(d) = &dst_inode else {
                return Err(Error::new(ErrorKind::NotFound, "exchange target missing"));
            };
            let dst_type = self.dirent_type(d.read().mode as u32);
            dir::retarget_entry(self, new_dir, new_name, src.inode, src_type)?;
            dir::retarget_entry(self, old_dir, old_name, d.ino(), dst_type)?;
            if !same_dir {
                if src_is_dir {
                    self.set_dotdot(&src_inode, new_dir.ino())?;
                }
                if dst_is_dir {
                    self.set_dotdot(d, old_dir.ino())?;
                }
                if src_is_dir && !dst_is_dir {
                    self.adjust_links(old_dir, -1)?;
                    self.adjust_links(new_dir, 1)?;
                } else if dst_is_dir && !src_is_dir {
                    self.adjust_links(new_dir, -1)?;
                    self.adjust_links(old_dir, 1)?;
                }
            }
            self.touch_ctime(&src_inode)?;
            self.touch_ctime(d)?;
            log::debug!("[EXT2] exchanged inodes {} and {}", src.inode, d.ino());
            return Ok(None);
        }

        let mut replaced = None;
        match &dst_inode {
            Some(d) => {
                dir::retarget_entry(self, new_dir, new_name, src.inode, src_type)?;
                if dst_is_dir {
                    let now = self.now();
                    d.update(|r| {
                        r.links_count = 0;
                        r.set_ctime(now);
                    })?;
                    self.adjust_links(new_dir, -1)?;
                } else {
                    self.adjust_links(d, -1)?;
                }
                replaced = Some(Replaced { ino: d.ino(), unlinked: d.links() == 0 });
            }
            None => dir::add_entry(self, new_dir, new_name, src.inode, src_type)?,
        }
        dir::remove_entry(self, old_dir, old_name)?;
        if src_is_dir && !same_dir {
            self.set_dotdot(&src_inode, new_dir.ino())?;
            self.adjust_links(old_dir, -1)?;
            self.adjust_links(new_dir, 1)?;
        }
        self.touch_ctime(&src_inode)?;
        log::debug!(
            "[EXT2] rename inode {} from dir {} to dir {}{}",
            src.inode,
            old_dir.ino(),
            new_dir.ino(),
            if replaced.is_some() { " (replacing)" } else { "" }
        );
        Ok(replaced)
    }

    /// 修改属性
    ///
    /// 权限位只替换低 12 位，类型位不变；ctime 总是前进。
    pub fn setattr(&self, inode: &Inode, attr: &SetAttr) -> Result<()> {
        let _guard = inode.lock_exclusive(self.hal())?;
        self.check_writable()?;
        check_mutable(inode)?;
        let now = self.now();
        let resolve = |t: TimeUpdate| match t {
            TimeUpdate::Now => now,
            TimeUpdate::Set(t) => t,
        };
        inode.update(|r| {
            if let Some(mode) = attr.mode {
                r.mode = ((r.mode as u32 & S_IFMT) | (mode & S_IALLUGO)) as u16;
            }
            if let Some(uid) = attr.uid {
                r.set_uid(uid);
            }
            if let Some(gid) = attr.gid {
                r.set_gid(gid);
            }
            if let Some(t) = attr.atime {
                r.set_atime(resolve(t));
            }
            if let Some(t) = attr.mtime {
                r.set_mtime(resolve(t));
            }
            r.set_ctime(now);
        })
    }

    /// 修改 inode 标志
    ///
    /// 只有用户可修改的位会改变，其余位保持原值。不可变 inode 也可以通过这里解除标志。
    pub fn set_flags(&self, inode: &Inode, flags: u32) -> Result<()> {
        let _guard = inode.lock_exclusive(self.hal())?;
        self.check_writable()?;
        let now = self.now();
        inode.update(|r| {
            r.flags = (r.flags & !EXT2_FL_USER_MODIFIABLE) | (flags & EXT2_FL_USER_MODIFIABLE);
            r.set_ctime(now);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountOptions;
    use crate::fs::filesystem::tests::mount_test_fs;
    use crate::fs::mkfs::FormatOptions;

    fn setup() -> (Arc<Ext2Fs>, crate::block::MemBlockDevice) {
        mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default())
    }

    #[test]
    fn test_create_unlink_restores_counts() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let before = fs.groups().free_totals();
        let size_before = root.size();

        let file = fs.create(&root, b"a", S_IFREG | 0o644, 0, 0).unwrap();
        assert_eq!(file.links(), 1);
        assert_eq!(fs.create(&root, b"a", 0o644, 0, 0).unwrap_err().kind(), ErrorKind::AlreadyExists);
        drop(file);

        let gone = fs.unlink(&root, b"a").unwrap();
        assert_eq!(gone.links(), 0);
        drop(gone);
        assert_eq!(fs.groups().free_totals(), before);
        assert_eq!(root.size(), size_before);
        assert!(fs.lookup_child(&root, b"a").unwrap().is_none());
    }

    #[test]
    fn test_mkdir_rmdir_links() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let before = fs.groups().free_totals();
        let root_links = root.links();

        let d = fs.mkdir(&root, b"d", 0o755, 0, 0).unwrap();
        assert_eq!(d.links(), 2);
        assert_eq!(root.links(), root_links + 1);
        fs.create(&d, b"f", 0o644, 0, 0).unwrap();
        assert_eq!(fs.rmdir(&root, b"d").unwrap_err().kind(), ErrorKind::NotEmpty);
        assert_eq!(fs.unlink(&root, b"d").unwrap_err().kind(), ErrorKind::IsDirectory);
        fs.unlink(&d, b"f").unwrap();
        drop(d);

        fs.rmdir(&root, b"d").unwrap();
        assert_eq!(root.links(), root_links);
        assert_eq!(fs.groups().free_totals(), before);
    }

    #[test]
    fn test_name_limits() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let max = [b'n'; 255];
        fs.create(&root, &max, 0o644, 0, 0).unwrap();
        let too_long = [b'n'; 256];
        assert_eq!(fs.create(&root, &too_long, 0o644, 0, 0).unwrap_err().kind(), ErrorKind::NameTooLong);
        assert_eq!(fs.create(&root, b"a/b", 0o644, 0, 0).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_rename_over_file_frees_old_target() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let a = fs.create(&root, b"a", 0o644, 0, 0).unwrap();
        let a_ino = a.ino();
        fs.write_at(&a, 0, b"hello").unwrap();
        drop(a);
        drop(fs.create(&root, b"b", 0o644, 0, 0).unwrap());
        let (_, free_inodes) = fs.groups().free_totals();

        let replaced = fs.rename(&root, b"a", &root, b"b", RenameFlags::empty()).unwrap().unwrap();
        assert!(replaced.unlinked);
        assert_eq!(fs.groups().free_totals().1, free_inodes + 1);
        assert!(fs.lookup_child(&root, b"a").unwrap().is_none());
        assert_eq!(fs.lookup_child(&root, b"b").unwrap().unwrap().ino(), a_ino);
    }

    #[test]
    fn test_rename_directory_checks() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let p = fs.mkdir(&root, b"p", 0o755, 0, 0).unwrap();
        let q = fs.mkdir(&p, b"q", 0o755, 0, 0).unwrap();
        fs.create(&root, b"f", 0o644, 0, 0).unwrap();

        let err = fs.rename(&root, b"p", &q, b"p2", RenameFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = fs.rename(&root, b"f", &root, b"p", RenameFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IsDirectory);
        let err = fs.rename(&root, b"f", &root, b"p", RenameFlags::NOREPLACE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // 子目录从 p 移到根目录
        let root_links = root.links();
        fs.rename(&p, b"q", &root, b"q", RenameFlags::empty()).unwrap();
        assert_eq!(p.links(), 2);
        assert_eq!(root.links(), root_links + 1);
        assert_eq!(dir::lookup(&fs, &q.snapshot(), b"..").unwrap(), Some(EXT2_ROOT_INO));
    }

    #[test]
    fn test_rename_locks_ancestor_before_descendant() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let low = fs.mkdir(&root, b"low", 0o755, 0, 0).unwrap();
        let high = fs.mkdir(&root, b"high", 0o755, 0, 0).unwrap();
        assert!(low.ino() < high.ino());
        let other = fs.mkdir(&root, b"other", 0o755, 0, 0).unwrap();

        // 子目录的 inode 号小于父目录
        fs.rename(&root, b"low", &high, b"low", RenameFlags::empty()).unwrap();
        let (first, second) = fs.parent_lock_order(&low, &high).unwrap();
        assert_eq!((first.ino(), second.ino()), (high.ino(), low.ino()));
        let (first, _) = fs.parent_lock_order(&high, &low).unwrap();
        assert_eq!(first.ino(), high.ino());

        // 互不包含时按 inode 号
        let (first, _) = fs.parent_lock_order(&other, &low).unwrap();
        assert_eq!(first.ino(), low.ino());

        fs.create(&low, b"f", S_IFREG | 0o644, 0, 0).unwrap();
        fs.rename(&low, b"f", &high, b"f", RenameFlags::empty()).unwrap();
        fs.rename(&high, b"f", &low, b"g", RenameFlags::empty()).unwrap();
        assert!(fs.lookup_child(&low, b"g").unwrap().is_some());
        assert!(fs.lookup_child(&high, b"f").unwrap().is_none());
    }

    #[test]
    fn test_exchange_swaps_entries() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let a = fs.create(&root, b"a", 0o644, 0, 0).unwrap();
        let d = fs.mkdir(&root, b"d", 0o755, 0, 0).unwrap();
        fs.rename(&root, b"a", &root, b"d", RenameFlags::EXCHANGE).unwrap();
        assert_eq!(fs.lookup_child(&root, b"a").unwrap().unwrap().ino(), d.ino());
        assert_eq!(fs.lookup_child(&root, b"d").unwrap().unwrap().ino(), a.ino());
    }

    #[test]
    fn test_link_and_tmpfile() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let before = fs.groups().free_totals();
        let tmp = fs.tmpfile(&root, 0o600, 0, 0).unwrap();
        assert_eq!(tmp.links(), 0);
        fs.link(&root, b"named", &tmp).unwrap();
        assert_eq!(tmp.links(), 1);
        drop(tmp);
        assert!(fs.lookup_child(&root, b"named").unwrap().is_some());

        let orphan = fs.tmpfile(&root, 0o600, 0, 0).unwrap();
        fs.write_at(&orphan, 0, &[1u8; 3000]).unwrap();
        drop(orphan);
        let (free_blocks, free_inodes) = fs.groups().free_totals();
        assert_eq!(free_inodes, before.1 - 1);
        assert_eq!(free_blocks, before.0);
    }

    #[test]
    fn test_setgid_directory_inheritance() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let shared = fs.mkdir(&root, b"shared", 0o2775, 0, 50).unwrap();
        let f = fs.create(&shared, b"f", 0o644, 1000, 1000).unwrap();
        assert_eq!(f.read().gid(), 50);
        let sub = fs.mkdir(&shared, b"sub", 0o755, 1000, 1000).unwrap();
        assert_ne!(sub.read().mode as u32 & S_ISGID, 0);
    }

    #[test]
    fn test_setattr_and_immutable() {
        let (fs, _mem) = setup();
        let root = fs.root().unwrap();
        let f = fs.create(&root, b"f", 0o644, 0, 0).unwrap();
        fs.setattr(&f, &SetAttr { mode: Some(0o4700), uid: Some(1000), ..Default::default() }).unwrap();
        let raw = f.snapshot();
        assert_eq!(raw.mode as u32, S_IFREG | 0o4700);
        assert_eq!(raw.uid(), 1000);

        f.update(|r| r.flags |= EXT2_IMMUTABLE_FL).unwrap();
        assert_eq!(fs.unlink(&root, b"f").unwrap_err().kind(), ErrorKind::NotPermitted);
        assert_eq!(fs.write_at(&f, 0, b"x").unwrap_err().kind(), ErrorKind::NotPermitted);
        assert_eq!(fs.setattr(&f, &SetAttr::default()).unwrap_err().kind(), ErrorKind::NotPermitted);
    }
}
