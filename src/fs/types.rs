//! 文件系统对外的类型定义
//!
//! 这个模块定义了 inode 类型、属性快照以及卷统计信息，VFS 层和具体文件系统共用。

use crate::consts::*;
use crate::hal::Timespec;

/// 卷统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatFs {
    /// 块大小（字节）
    pub block_size: u32,
    /// 总块数
    pub blocks_count: u64,
    /// 空闲块数
    pub free_blocks_count: u64,
    /// 非特权用户可用块数
    pub available_blocks: u64,
    /// 总 inode 数
    pub inodes_count: u32,
    /// 空闲 inode 数
    pub free_inodes_count: u32,
    /// 文件系统 ID
    pub fsid: u64,
    /// 最大文件名长度
    pub name_max: u32,
}

/// 文件属性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttr {
    /// 设备 ID
    pub device: u64,
    /// Inode 编号
    pub ino: u64,
    /// 硬链接数
    pub nlink: u32,
    /// 文件模式（权限 + 类型）
    pub mode: u32,
    /// Inode 类型
    pub node_type: InodeType,
    /// 用户 ID
    pub uid: u32,
    /// 组 ID
    pub gid: u32,
    /// 文件大小（字节）
    pub size: u64,
    /// 块大小
    pub block_size: u32,
    /// 占用的块数（512 字节为单位）
    pub blocks: u64,
    /// inode 标志
    pub flags: u32,
    /// 访问时间
    pub atime: Timespec,
    /// 修改时间
    pub mtime: Timespec,
    /// 状态改变时间
    pub ctime: Timespec,
}

impl FileAttr {
    /// 权限位（含 suid/sgid/sticky）
    pub fn perm(&self) -> u32 {
        self.mode & S_IALLUGO
    }
}

/// 时间戳修改方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    /// 使用当前时间
    Now,
    /// 使用给定时间
    Set(Timespec),
}

/// 属性修改请求
///
/// 为 `None` 的字段保持不变。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// 新权限位
    pub mode: Option<u32>,
    /// 新属主
    pub uid: Option<u32>,
    /// 新属组
    pub gid: Option<u32>,
    /// 新访问时间
    pub atime: Option<TimeUpdate>,
    /// 新修改时间
    pub mtime: Option<TimeUpdate>,
}

bitflags::bitflags! {
    /// 重命名标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RenameFlags: u32 {
        /// 目标存在时失败
        const NOREPLACE = 1 << 0;
        /// 原子交换两个名字
        const EXCHANGE = 1 << 1;
    }
}

/// Inode 类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum InodeType {
    /// 未知类型
    #[default]
    Unknown = 0,
    /// FIFO（命名管道）
    Fifo = 1,
    /// 字符设备
    CharacterDevice = 2,
    /// 目录
    Directory = 3,
    /// 块设备
    BlockDevice = 4,
    /// 普通文件
    RegularFile = 5,
    /// 符号链接
    Symlink = 6,
    /// Socket
    Socket = 7,
}

impl InodeType {
    /// 从 mode 中提取 inode 类型
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFIFO => InodeType::Fifo,
            S_IFCHR => InodeType::CharacterDevice,
            S_IFDIR => InodeType::Directory,
            S_IFBLK => InodeType::BlockDevice,
            S_IFREG => InodeType::RegularFile,
            S_IFLNK => InodeType::Symlink,
            S_IFSOCK => InodeType::Socket,
            _ => InodeType::Unknown,
        }
    }

    /// 转换为 mode 类型位
    pub fn to_mode_bits(self) -> u32 {
        match self {
            InodeType::Fifo => S_IFIFO,
            InodeType::CharacterDevice => S_IFCHR,
            InodeType::Directory => S_IFDIR,
            InodeType::BlockDevice => S_IFBLK,
            InodeType::RegularFile => S_IFREG,
            InodeType::Symlink => S_IFLNK,
            InodeType::Socket => S_IFSOCK,
            InodeType::Unknown => 0,
        }
    }

    /// 从目录项类型转换
    pub fn from_de_type(de_type: u8) -> Self {
        match de_type {
            EXT2_FT_REG_FILE => InodeType::RegularFile,
            EXT2_FT_DIR => InodeType::Directory,
            EXT2_FT_CHRDEV => InodeType::CharacterDevice,
            EXT2_FT_BLKDEV => InodeType::BlockDevice,
            EXT2_FT_FIFO => InodeType::Fifo,
            EXT2_FT_SOCK => InodeType::Socket,
            EXT2_FT_SYMLINK => InodeType::Symlink,
            _ => InodeType::Unknown,
        }
    }

    /// 转换为目录项类型
    pub fn to_de_type(self) -> u8 {
        match self {
            InodeType::RegularFile => EXT2_FT_REG_FILE,
            InodeType::Directory => EXT2_FT_DIR,
            InodeType::CharacterDevice => EXT2_FT_CHRDEV,
            InodeType::BlockDevice => EXT2_FT_BLKDEV,
            InodeType::Fifo => EXT2_FT_FIFO,
            InodeType::Socket => EXT2_FT_SOCK,
            InodeType::Symlink => EXT2_FT_SYMLINK,
            InodeType::Unknown => EXT2_FT_UNKNOWN,
        }
    }

    /// 检查是否为目录
    pub fn is_dir(self) -> bool {
        self == InodeType::Directory
    }

    /// 检查是否为普通文件
    pub fn is_file(self) -> bool {
        self == InodeType::RegularFile
    }

    /// 检查是否为符号链接
    pub fn is_symlink(self) -> bool {
        self == InodeType::Symlink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_type_from_mode() {
        assert_eq!(InodeType::from_mode(S_IFREG | 0o644), InodeType::RegularFile);
        assert_eq!(InodeType::from_mode(S_IFDIR | 0o755), InodeType::Directory);
        assert_eq!(InodeType::from_mode(S_IFLNK | 0o777), InodeType::Symlink);
        assert_eq!(InodeType::from_mode(0o644), InodeType::Unknown);
    }

    #[test]
    fn test_inode_type_de_conversion() {
        for t in [
            InodeType::RegularFile,
            InodeType::Directory,
            InodeType::Symlink,
            InodeType::Fifo,
            InodeType::Socket,
        ] {
            assert_eq!(InodeType::from_de_type(t.to_de_type()), t);
            assert_eq!(InodeType::from_mode(t.to_mode_bits()), t);
        }
        assert_eq!(InodeType::Directory.to_de_type(), 2);
        assert_eq!(InodeType::Symlink.to_de_type(), 7);
    }

    #[test]
    fn test_perm_masks_type_bits() {
        let attr = FileAttr {
            mode: S_IFDIR | S_ISVTX | 0o777,
            ..Default::default()
        };
        assert_eq!(attr.perm(), 0o1777);
    }
}
