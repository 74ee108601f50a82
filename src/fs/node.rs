//! ext2 接入 VFS
//!
//! [`Ext2Node`] 把一个 ext2 inode 包装成 [`InodeOps`]，负责获取操作锁并把
//! 完整性错误交给卷的 errors 策略；[`Ext2Volume`] 与 [`Ext2Driver`]
//! 提供卷操作表和按名字注册的驱动。

use super::filesystem::Ext2Fs;
use super::types::{FileAttr, InodeType, RenameFlags, SetAttr, StatFs};
use crate::{
    block::BlockDev,
    cache::BlockCache,
    config::MountOptions,
    error::{Error, ErrorKind, Result},
    hal::SystemHal,
    inode::Inode,
    types::ext2_inode,
    vfs::{DirEntryInfo, FileSystemOps, FsDriver, InodeOps, ReplacedTarget},
    xattr::{self, XattrFlags},
};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

/// 由磁盘 inode 生成属性快照
pub fn attr_of(fs: &Ext2Fs, ino: u32, raw: &ext2_inode) -> FileAttr {
    FileAttr {
        device: fs.dev() as u64,
        ino: ino as u64,
        nlink: raw.links_count as u32,
        mode: raw.mode as u32,
        node_type: InodeType::from_mode(raw.mode as u32),
        uid: raw.uid(),
        gid: raw.gid(),
        size: raw.size(),
        block_size: fs.block_size(),
        blocks: raw.blocks as u64,
        flags: raw.flags,
        atime: raw.atime(),
        mtime: raw.mtime(),
        ctime: raw.ctime(),
    }
}

/// VFS 眼中的 ext2 inode
pub struct Ext2Node {
    fs: Arc<Ext2Fs>,
    inode: Arc<Inode>,
}

impl Ext2Node {
    /// 包装一个 inode
    pub fn new(fs: Arc<Ext2Fs>, inode: Arc<Inode>) -> Self {
        Self { fs, inode }
    }

    /// 所属卷
    pub fn fs(&self) -> &Arc<Ext2Fs> {
        &self.fs
    }

    /// 底层 inode
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    fn wrap(&self, inode: Arc<Inode>) -> Arc<dyn InodeOps> {
        Arc::new(Ext2Node::new(self.fs.clone(), inode))
    }

    /// 取出同一个卷上的另一个节点
    fn peer<'a>(&self, other: &'a dyn InodeOps) -> Result<&'a Ext2Node> {
        match other.as_any().downcast_ref::<Ext2Node>() {
            Some(node) if Arc::ptr_eq(&node.fs, &self.fs) => Ok(node),
            _ => Err(Error::new(ErrorKind::CrossDevice, "inodes live on different volumes")),
        }
    }
}

impl InodeOps for Ext2Node {
    fn ino(&self) -> u64 {
        self.inode.ino() as u64
    }

    fn device_id(&self) -> u64 {
        self.fs.dev() as u64
    }

    fn node_type(&self) -> InodeType {
        InodeType::from_mode(self.inode.read().mode as u32)
    }

    fn stat(&self) -> Result<FileAttr> {
        self.fs.check_alive()?;
        let _guard = self.inode.lock_shared(self.fs.hal())?;
        Ok(attr_of(&self.fs, self.inode.ino(), &self.inode.snapshot()))
    }

    fn lookup(&self, name: &[u8]) -> Result<Option<Arc<dyn InodeOps>>> {
        let found = self.fs.escalate(self.fs.lookup_child(&self.inode, name))?;
        Ok(found.map(|inode| self.wrap(inode)))
    }

    fn create(&self, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<Arc<dyn InodeOps>> {
        let inode = self.fs.escalate(self.fs.create(&self.inode, name, mode, uid, gid))?;
        Ok(self.wrap(inode))
    }

    fn mkdir(&self, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<Arc<dyn InodeOps>> {
        let inode = self.fs.escalate(self.fs.mkdir(&self.inode, name, mode, uid, gid))?;
        Ok(self.wrap(inode))
    }

    fn symlink(&self, name: &[u8], target: &[u8], uid: u32, gid: u32) -> Result<Arc<dyn InodeOps>> {
        let inode = self.fs.escalate(self.fs.symlink(&self.inode, name, target, uid, gid))?;
        Ok(self.wrap(inode))
    }

    fn tmpfile(&self, mode: u32, uid: u32, gid: u32) -> Result<Arc<dyn InodeOps>> {
        let inode = self.fs.escalate(self.fs.tmpfile(&self.inode, mode, uid, gid))?;
        Ok(self.wrap(inode))
    }

    fn link(&self, name: &[u8], target: &dyn InodeOps) -> Result<()> {
        let target = self.peer(target)?;
        self.fs.escalate(self.fs.link(&self.inode, name, &target.inode))
    }

    fn unlink(&self, name: &[u8]) -> Result<Arc<dyn InodeOps>> {
        let inode = self.fs.escalate(self.fs.unlink(&self.inode, name))?;
        Ok(self.wrap(inode))
    }

    fn rmdir(&self, name: &[u8]) -> Result<Arc<dyn InodeOps>> {
        let inode = self.fs.escalate(self.fs.rmdir(&self.inode, name))?;
        Ok(self.wrap(inode))
    }

    fn rename(
        &self,
        old_name: &[u8],
        new_dir: &dyn InodeOps,
        new_name: &[u8],
        flags: RenameFlags,
    ) -> Result<Option<ReplacedTarget>> {
        let new_dir = self.peer(new_dir)?;
        let replaced = self
            .fs
            .escalate(self.fs.rename(&self.inode, old_name, &new_dir.inode, new_name, flags))?;
        Ok(replaced.map(|r| ReplacedTarget { ino: r.ino as u64, unlinked: r.unlinked }))
    }

    fn readlink(&self) -> Result<Vec<u8>> {
        let target = {
            let _guard = self.inode.lock_shared(self.fs.hal())?;
            self.fs.escalate(self.fs.read_link(&self.inode))?
        };
        self.fs.touch_atime(&self.inode);
        Ok(target)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let n = {
            let _guard = self.inode.lock_shared(self.fs.hal())?;
            self.fs.escalate(self.fs.read_at(&self.inode, offset, buf))?
        };
        self.fs.touch_atime(&self.inode);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8], append: bool) -> Result<(usize, u64)> {
        let _guard = self.inode.lock_exclusive(self.fs.hal())?;
        let offset = if append { self.inode.size() } else { offset };
        let n = self.fs.escalate(self.fs.write_at(&self.inode, offset, buf))?;
        Ok((n, offset))
    }

    fn truncate(&self, size: u64) -> Result<()> {
        let _guard = self.inode.lock_exclusive(self.fs.hal())?;
        self.fs.escalate(self.fs.truncate(&self.inode, size))
    }

    fn fsync(&self, datasync: bool) -> Result<()> {
        self.fs.escalate(self.fs.fsync(&self.inode, datasync))
    }

    fn setattr(&self, attr: &SetAttr) -> Result<()> {
        self.fs.escalate(self.fs.setattr(&self.inode, attr))
    }

    fn set_flags(&self, flags: u32) -> Result<()> {
        self.fs.escalate(self.fs.set_flags(&self.inode, flags))
    }

    fn readdir(&self, pos: u64) -> Result<Option<(DirEntryInfo, u64)>> {
        let next = self.fs.escalate(self.fs.read_dir_at(&self.inode, pos))?;
        Ok(next.map(|(entry, next_pos)| {
            let info = DirEntryInfo {
                ino: entry.inode as u64,
                node_type: InodeType::from_de_type(entry.file_type),
                name: entry.name,
            };
            (info, next_pos)
        }))
    }

    fn get_xattr(&self, name: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.inode.lock_shared(self.fs.hal())?;
        self.fs.escalate(xattr::get(&self.fs, &self.inode, name))
    }

    fn set_xattr(&self, name: &[u8], value: &[u8], flags: XattrFlags) -> Result<()> {
        let _guard = self.inode.lock_exclusive(self.fs.hal())?;
        self.fs.escalate(xattr::set(&self.fs, &self.inode, name, value, flags))
    }

    fn list_xattr(&self) -> Result<Vec<Vec<u8>>> {
        let _guard = self.inode.lock_shared(self.fs.hal())?;
        self.fs.escalate(xattr::list(&self.fs, &self.inode))
    }

    fn remove_xattr(&self, name: &[u8]) -> Result<()> {
        let _guard = self.inode.lock_exclusive(self.fs.hal())?;
        self.fs.escalate(xattr::remove(&self.fs, &self.inode, name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 已挂载的 ext2 卷
pub struct Ext2Volume {
    fs: Arc<Ext2Fs>,
}

impl Ext2Volume {
    /// 包装已挂载的卷
    pub fn new(fs: Arc<Ext2Fs>) -> Self {
        Self { fs }
    }

    /// 底层卷
    pub fn fs(&self) -> &Arc<Ext2Fs> {
        &self.fs
    }
}

impl FileSystemOps for Ext2Volume {
    fn fs_type(&self) -> &'static str {
        "ext2"
    }

    fn device_id(&self) -> u64 {
        self.fs.dev() as u64
    }

    fn root(&self) -> Result<Arc<dyn InodeOps>> {
        let root = self.fs.escalate(self.fs.root())?;
        Ok(Arc::new(Ext2Node::new(self.fs.clone(), root)))
    }

    fn statfs(&self) -> Result<StatFs> {
        self.fs.statfs()
    }

    fn sync(&self) -> Result<()> {
        self.fs.escalate(self.fs.sync_fs())
    }

    fn unmount(&self) -> Result<()> {
        self.fs.unmount()
    }

    fn is_read_only(&self) -> bool {
        self.fs.is_read_only()
    }
}

/// ext2 驱动
#[derive(Debug, Default, Clone, Copy)]
pub struct Ext2Driver;

impl FsDriver for Ext2Driver {
    fn name(&self) -> &'static str {
        "ext2"
    }

    fn mount(
        &self,
        cache: Arc<BlockCache>,
        bdev: Arc<BlockDev>,
        hal: Arc<dyn SystemHal>,
        opts: MountOptions,
    ) -> Result<Arc<dyn FileSystemOps>> {
        let fs = Ext2Fs::mount(cache, bdev, hal, opts)?;
        Ok(Arc::new(Ext2Volume::new(fs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::filesystem::tests::mount_test_fs;
    use crate::fs::mkfs::FormatOptions;

    fn root_node() -> (Arc<dyn InodeOps>, crate::block::MemBlockDevice) {
        let (fs, mem) = mount_test_fs(1024 * 1024, FormatOptions::default(), MountOptions::default());
        let vol = Ext2Volume::new(fs);
        (vol.root().unwrap(), mem)
    }

    #[test]
    fn test_node_create_write_read() {
        let (root, _mem) = root_node();
        let file = root.create(b"f", 0o644, 0, 0).unwrap();
        assert_eq!(file.node_type(), InodeType::RegularFile);
        assert_eq!(file.write_at(0, b"abc", false).unwrap(), (3, 0));
        assert_eq!(file.write_at(0, b"def", true).unwrap(), (3, 3));
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");

        let found = root.lookup(b"f").unwrap().unwrap();
        assert_eq!(found.ino(), file.ino());
        assert!(root.lookup(b"g").unwrap().is_none());
        assert_eq!(file.stat().unwrap().size, 6);
    }

    #[test]
    fn test_readdir_lists_entries() {
        let (root, _mem) = root_node();
        root.mkdir(b"sub", 0o755, 0, 0).unwrap();
        let mut names = Vec::new();
        let mut pos = 0;
        while let Some((entry, next)) = root.readdir(pos).unwrap() {
            names.push(entry.name);
            pos = next;
        }
        assert!(names.contains(&b"sub".to_vec()));
        assert!(names.contains(&b"..".to_vec()));
    }

    #[test]
    fn test_link_across_volumes_is_cross_device() {
        let (a, _m1) = root_node();
        let (b, _m2) = root_node();
        let file = b.create(b"f", 0o644, 0, 0).unwrap();
        assert_eq!(a.link(b"f", file.as_ref()).unwrap_err().kind(), ErrorKind::CrossDevice);
    }
}
