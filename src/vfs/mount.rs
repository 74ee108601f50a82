//! 挂载树
//!
//! 每个 [`Mount`] 把一个卷的根目录项绑定到父挂载中的某个目录项上。
//! 挂载记录持有挂载点目录项和卷根目录项的强引用；挂载点目录项在被任何挂载
//! 记录引用期间带有 `MOUNTED` 标志。

use super::dentry::Dentry;
use super::ops::FileSystemOps;
use crate::config::MountFlags;
use crate::error::{Error, ErrorKind, Result};
use crate::sync::RwLock;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 挂载记录
pub struct Mount {
    id: usize,
    fs: Arc<dyn FileSystemOps>,
    root: Arc<Dentry>,
    parent: Option<(Arc<Mount>, Arc<Dentry>)>,
    flags: MountFlags,
    source: String,
    stale: AtomicBool,
    open_files: AtomicUsize,
}

impl Mount {
    /// 挂载编号
    pub fn id(&self) -> usize {
        self.id
    }

    /// 卷操作表
    pub fn fs(&self) -> &Arc<dyn FileSystemOps> {
        &self.fs
    }

    /// 卷根目录项
    pub fn root(&self) -> &Arc<Dentry> {
        &self.root
    }

    /// 父挂载与挂载点；根挂载返回 `None`
    pub fn parent(&self) -> Option<&(Arc<Mount>, Arc<Dentry>)> {
        self.parent.as_ref()
    }

    /// 挂载标志
    pub fn flags(&self) -> MountFlags {
        self.flags
    }

    /// 设备名
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 是否已被强制卸载
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// 挂载是否允许修改
    pub fn check_writable(&self) -> Result<()> {
        if self.flags.contains(MountFlags::RDONLY) || self.fs.is_read_only() {
            return Err(Error::new(ErrorKind::ReadOnly, "mount is read-only"));
        }
        Ok(())
    }

    /// 检查挂载仍可用
    pub fn check_alive(&self) -> Result<()> {
        if self.is_stale() {
            return Err(Error::new(ErrorKind::Io, "mount was forcibly detached"));
        }
        Ok(())
    }

    /// 引用这个挂载的打开文件数
    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::Acquire)
    }

    pub(crate) fn file_opened(&self) {
        self.open_files.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn file_closed(&self) {
        self.open_files.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("fs", &self.fs.fs_type())
            .field("source", &self.source)
            .field("flags", &self.flags)
            .field("stale", &self.is_stale())
            .finish()
    }
}

/// 路径位置：挂载 + 目录项
#[derive(Clone)]
pub struct PathRef {
    /// 所在挂载
    pub mount: Arc<Mount>,
    /// 目录项
    pub dentry: Arc<Dentry>,
}

impl PathRef {
    /// 构造
    pub fn new(mount: Arc<Mount>, dentry: Arc<Dentry>) -> Self {
        Self { mount, dentry }
    }

    /// 两个位置是否相同
    pub fn same(&self, other: &PathRef) -> bool {
        Arc::ptr_eq(&self.mount, &other.mount) && Arc::ptr_eq(&self.dentry, &other.dentry)
    }

    /// 是否为所在挂载的根
    pub fn is_mount_root(&self) -> bool {
        Arc::ptr_eq(&self.dentry, &self.mount.root)
    }
}

impl fmt::Debug for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRef")
            .field("mount", &self.mount.id)
            .field("dentry", &self.dentry)
            .finish()
    }
}

/// 全局挂载表
pub struct MountTable {
    mounts: RwLock<Vec<Arc<Mount>>>,
    next_id: AtomicUsize,
}

impl MountTable {
    /// 空表
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    /// 加入一条挂载记录
    pub(crate) fn add(
        &self,
        fs: Arc<dyn FileSystemOps>,
        root: Arc<Dentry>,
        parent: Option<(Arc<Mount>, Arc<Dentry>)>,
        flags: MountFlags,
        source: &str,
    ) -> Arc<Mount> {
        if let Some((_, point)) = &parent {
            point.mount_added();
        }
        let mount = Arc::new(Mount {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            fs,
            root,
            parent,
            flags,
            source: String::from(source),
            stale: AtomicBool::new(false),
            open_files: AtomicUsize::new(0),
        });
        self.mounts.write().push(mount.clone());
        mount
    }

    /// 移除挂载记录
    pub(crate) fn remove(&self, mount: &Arc<Mount>) {
        let mut mounts = self.mounts.write();
        let before = mounts.len();
        mounts.retain(|m| !Arc::ptr_eq(m, mount));
        if mounts.len() != before {
            if let Some((_, point)) = &mount.parent {
                point.mount_removed();
            }
        }
    }

    /// 挂在 `(parent, point)` 上的最新一条挂载
    pub fn find_mounted(&self, parent: &Arc<Mount>, point: &Arc<Dentry>) -> Option<Arc<Mount>> {
        self.mounts
            .read()
            .iter()
            .rev()
            .find(|m| match &m.parent {
                Some((pm, pd)) => Arc::ptr_eq(pm, parent) && Arc::ptr_eq(pd, point),
                None => false,
            })
            .cloned()
    }

    /// 直接挂在 `mount` 下的子挂载
    pub fn children_of(&self, mount: &Arc<Mount>) -> Vec<Arc<Mount>> {
        self.mounts
            .read()
            .iter()
            .filter(|m| m.parent.as_ref().map_or(false, |(pm, _)| Arc::ptr_eq(pm, mount)))
            .cloned()
            .collect()
    }

    /// 按设备号查找
    pub fn by_device(&self, device: u64) -> Option<Arc<Mount>> {
        self.mounts.read().iter().find(|m| m.fs.device_id() == device).cloned()
    }

    /// 根挂载
    pub fn root(&self) -> Option<Arc<Mount>> {
        self.mounts.read().iter().find(|m| m.parent.is_none()).cloned()
    }

    /// 全部挂载（按挂载顺序）
    pub fn all(&self) -> Vec<Arc<Mount>> {
        self.mounts.read().clone()
    }

    /// 挂载数
    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.mounts.read().is_empty()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileAttr, InodeType, StatFs};
    use crate::vfs::InodeOps;
    use core::any::Any;

    struct Dir(u64);

    impl InodeOps for Dir {
        fn ino(&self) -> u64 {
            self.0
        }
        fn device_id(&self) -> u64 {
            9
        }
        fn node_type(&self) -> InodeType {
            InodeType::Directory
        }
        fn stat(&self) -> Result<FileAttr> {
            Ok(FileAttr::default())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Vol(u64);

    impl FileSystemOps for Vol {
        fn fs_type(&self) -> &'static str {
            "test"
        }
        fn device_id(&self) -> u64 {
            self.0
        }
        fn root(&self) -> Result<Arc<dyn InodeOps>> {
            Ok(Arc::new(Dir(2)))
        }
        fn statfs(&self) -> Result<StatFs> {
            Ok(StatFs::default())
        }
        fn sync(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_mount_marks_point_and_unmount_clears() {
        let table = MountTable::new();
        let root = table.add(Arc::new(Vol(1)), Dentry::new_root(Arc::new(Dir(2))), None, MountFlags::empty(), "a");
        let point = root.root().bind_child(b"mnt", Arc::new(Dir(3)));
        let child = table.add(
            Arc::new(Vol(2)),
            Dentry::new_root(Arc::new(Dir(2))),
            Some((root.clone(), point.clone())),
            MountFlags::RDONLY,
            "b",
        );
        assert!(point.is_mounted());
        assert!(Arc::ptr_eq(&table.find_mounted(&root, &point).unwrap(), &child));
        assert_eq!(table.children_of(&root).len(), 1);
        assert_eq!(table.by_device(2).unwrap().id(), child.id());
        assert_eq!(child.check_writable().unwrap_err().kind(), ErrorKind::ReadOnly);

        table.remove(&child);
        assert!(!point.is_mounted());
        assert!(table.find_mounted(&root, &point).is_none());
        assert!(Arc::ptr_eq(&table.root().unwrap(), &root));
    }
}
