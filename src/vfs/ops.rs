//! 文件系统操作集
//!
//! 具体文件系统通过三组 trait 接入 VFS：
//!
//! - [`InodeOps`] - 单个 inode 上的操作（目录、数据、属性、扩展属性）
//! - [`FileSystemOps`] - 一个已挂载卷上的操作
//! - [`FsDriver`] - 按名字注册的驱动，负责把块设备挂载成卷
//!
//! `InodeOps` 的方法都带默认实现，返回 `Unsupported`；
//! 文件系统只需实现它支持的部分。

use crate::block::BlockDev;
use crate::cache::BlockCache;
use crate::config::MountOptions;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{FileAttr, InodeType, RenameFlags, SetAttr, StatFs};
use crate::hal::SystemHal;
use crate::xattr::XattrFlags;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

/// 目录读取得到的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// 名字
    pub name: Vec<u8>,
    /// inode 编号
    pub ino: u64,
    /// 类型提示
    pub node_type: InodeType,
}

/// rename 覆盖掉的旧目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplacedTarget {
    /// 旧目标的 inode 编号
    pub ino: u64,
    /// 旧目标的链接数是否已降为 0
    pub unlinked: bool,
}

fn unsupported<T>() -> Result<T> {
    Err(Error::new(ErrorKind::Unsupported, "operation not supported"))
}

/// inode 操作表
pub trait InodeOps: Send + Sync + Any {
    /// inode 编号
    fn ino(&self) -> u64;

    /// 所在卷的设备号
    fn device_id(&self) -> u64;

    /// inode 类型
    fn node_type(&self) -> InodeType;

    /// 属性快照
    fn stat(&self) -> Result<FileAttr>;

    /// 在目录中查找名字；不存在时返回 `Ok(None)`
    fn lookup(&self, _name: &[u8]) -> Result<Option<Arc<dyn InodeOps>>> {
        unsupported()
    }

    /// 创建普通文件
    fn create(&self, _name: &[u8], _mode: u32, _uid: u32, _gid: u32) -> Result<Arc<dyn InodeOps>> {
        unsupported()
    }

    /// 创建子目录
    fn mkdir(&self, _name: &[u8], _mode: u32, _uid: u32, _gid: u32) -> Result<Arc<dyn InodeOps>> {
        unsupported()
    }

    /// 创建符号链接
    fn symlink(&self, _name: &[u8], _target: &[u8], _uid: u32, _gid: u32) -> Result<Arc<dyn InodeOps>> {
        unsupported()
    }

    /// 在目录所在卷上创建无名 inode
    fn tmpfile(&self, _mode: u32, _uid: u32, _gid: u32) -> Result<Arc<dyn InodeOps>> {
        unsupported()
    }

    /// 创建硬链接
    fn link(&self, _name: &[u8], _target: &dyn InodeOps) -> Result<()> {
        unsupported()
    }

    /// 删除非目录项，返回被删除的 inode
    fn unlink(&self, _name: &[u8]) -> Result<Arc<dyn InodeOps>> {
        unsupported()
    }

    /// 删除空目录，返回被删除的 inode
    fn rmdir(&self, _name: &[u8]) -> Result<Arc<dyn InodeOps>> {
        unsupported()
    }

    /// 重命名（`self` 为源目录）
    fn rename(
        &self,
        _old_name: &[u8],
        _new_dir: &dyn InodeOps,
        _new_name: &[u8],
        _flags: RenameFlags,
    ) -> Result<Option<ReplacedTarget>> {
        unsupported()
    }

    /// 读取符号链接内容
    fn readlink(&self) -> Result<Vec<u8>> {
        unsupported()
    }

    /// 从给定偏移读取
    fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
        unsupported()
    }

    /// 向给定偏移写入
    ///
    /// `append` 为真时忽略 `offset`，在持有独占锁的情况下写到当前文件末尾。
    ///
    /// # 返回
    ///
    /// `(写入字节数, 实际写入偏移)`
    fn write_at(&self, _offset: u64, _buf: &[u8], _append: bool) -> Result<(usize, u64)> {
        unsupported()
    }

    /// 截断或扩展
    fn truncate(&self, _size: u64) -> Result<()> {
        unsupported()
    }

    /// 同步到设备
    fn fsync(&self, _datasync: bool) -> Result<()> {
        unsupported()
    }

    /// 修改属性
    fn setattr(&self, _attr: &SetAttr) -> Result<()> {
        unsupported()
    }

    /// 修改 inode 标志
    fn set_flags(&self, _flags: u32) -> Result<()> {
        unsupported()
    }

    /// 从目录位置 `pos` 读取下一项，返回该项与下一个位置
    fn readdir(&self, _pos: u64) -> Result<Option<(DirEntryInfo, u64)>> {
        unsupported()
    }

    /// 读取扩展属性
    fn get_xattr(&self, _name: &[u8]) -> Result<Vec<u8>> {
        unsupported()
    }

    /// 设置扩展属性
    fn set_xattr(&self, _name: &[u8], _value: &[u8], _flags: XattrFlags) -> Result<()> {
        unsupported()
    }

    /// 列出扩展属性名
    fn list_xattr(&self) -> Result<Vec<Vec<u8>>> {
        unsupported()
    }

    /// 删除扩展属性
    fn remove_xattr(&self, _name: &[u8]) -> Result<()> {
        unsupported()
    }

    /// 最后一个打开文件记录关闭时调用
    fn release(&self) {}

    /// 向下转型
    fn as_any(&self) -> &dyn Any;
}

impl dyn InodeOps {
    /// 尝试获取具体类型的引用
    pub fn downcast_ref<T: InodeOps>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// 卷操作表
pub trait FileSystemOps: Send + Sync {
    /// 文件系统类型名
    fn fs_type(&self) -> &'static str;

    /// 设备号
    fn device_id(&self) -> u64;

    /// 根 inode
    fn root(&self) -> Result<Arc<dyn InodeOps>>;

    /// 卷统计信息
    fn statfs(&self) -> Result<StatFs>;

    /// 写回全部脏数据
    fn sync(&self) -> Result<()>;

    /// 卸载
    fn unmount(&self) -> Result<()> {
        self.sync()
    }

    /// 卷当前是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}

/// 文件系统驱动
pub trait FsDriver: Send + Sync {
    /// 驱动名（`mount` 的 `fs_name`）
    fn name(&self) -> &'static str;

    /// 把块设备挂载成卷
    fn mount(
        &self,
        cache: Arc<BlockCache>,
        bdev: Arc<BlockDev>,
        hal: Arc<dyn SystemHal>,
        opts: MountOptions,
    ) -> Result<Arc<dyn FileSystemOps>>;
}
