//! ext2 文件系统常量定义
//!
//! 这个模块包含了 ext2 磁盘格式与 VFS 层共用的常量定义，包括：
//! - 磁盘布局相关常量
//! - 文件类型和权限位
//! - 特性标志
//! - 路径与名称限制

//=============================================================================
// 基础常量
//=============================================================================

/// 默认物理块大小（扇区大小，512 字节）
pub const EXT2_DEFAULT_SECTOR_SIZE: u32 = 512;

/// 最小块大小（1024 字节）
pub const EXT2_MIN_BLOCK_SIZE: u32 = 1024;

/// 最大块大小（4096 字节）
pub const EXT2_MAX_BLOCK_SIZE: u32 = 4096;

/// s_log_block_size 允许的最大值（1024 << 2 = 4096）
pub const EXT2_MAX_LOG_BLOCK_SIZE: u32 = 2;

/// i_blocks 的计数单位（字节）
pub const EXT2_IBLOCK_UNIT: u64 = 512;

//=============================================================================
// Superblock 相关
//=============================================================================

/// Superblock 在设备上的字节偏移
pub const EXT2_SUPERBLOCK_OFFSET: u64 = 1024;

/// Superblock 大小（字节）
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;

/// ext2 魔数 (0xEF53)
pub const EXT2_SUPERBLOCK_MAGIC: u16 = 0xEF53;

/// 修订版本 0（固定 inode 大小）
pub const EXT2_GOOD_OLD_REV: u32 = 0;

/// 修订版本 1（动态 inode 大小）
pub const EXT2_DYNAMIC_REV: u32 = 1;

/// Superblock 状态：干净卸载
pub const EXT2_VALID_FS: u16 = 0x0001;

/// Superblock 状态：检测到错误
pub const EXT2_ERROR_FS: u16 = 0x0002;

/// s_errors：继续
pub const EXT2_ERRORS_CONTINUE: u16 = 1;

/// s_errors：重新挂载为只读
pub const EXT2_ERRORS_RO: u16 = 2;

/// s_errors：panic
pub const EXT2_ERRORS_PANIC: u16 = 3;

/// Linux 操作系统
pub const EXT2_OS_LINUX: u32 = 0;

/// 块组描述符大小
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

//=============================================================================
// Inode 相关
//=============================================================================

/// 保留的坏块 inode
pub const EXT2_BAD_INO: u32 = 1;

/// Root inode 编号
pub const EXT2_ROOT_INO: u32 = 2;

/// 修订版本 0 的第一个非保留 inode
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;

/// 旧的 inode 大小（不含扩展字段）
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;

/// 带纳秒时间戳的扩展区所需的最小 inode 大小
pub const EXT2_INODE_SIZE_WITH_NSEC: u16 = 160;

/// 扩展区大小（i_extra_isize）
pub const EXT2_EXTRA_ISIZE: u16 = 32;

/// Inode 中的块指针总数（15个）
/// - 12个直接块
/// - 1个一级间接块
/// - 1个二级间接块
/// - 1个三级间接块
pub const EXT2_N_BLOCKS: usize = 15;

/// 直接块指针数量
pub const EXT2_NDIR_BLOCKS: usize = 12;

/// 一级间接块索引
pub const EXT2_IND_BLOCK: usize = 12;

/// 二级间接块索引
pub const EXT2_DIND_BLOCK: usize = 13;

/// 三级间接块索引
pub const EXT2_TIND_BLOCK: usize = 14;

/// 快速符号链接可内联的最大长度（i_block 共 60 字节）
pub const EXT2_FAST_SYMLINK_MAX: usize = 59;

/// 单个 inode 的最大硬链接数
pub const EXT2_LINK_MAX: u16 = 32000;

//=============================================================================
// Inode 模式位（文件类型和权限）
//=============================================================================

/// 文件类型掩码
pub const S_IFMT: u32 = 0o170000;

/// Socket
pub const S_IFSOCK: u32 = 0o140000;

/// 符号链接
pub const S_IFLNK: u32 = 0o120000;

/// 普通文件
pub const S_IFREG: u32 = 0o100000;

/// 块设备
pub const S_IFBLK: u32 = 0o060000;

/// 目录
pub const S_IFDIR: u32 = 0o040000;

/// 字符设备
pub const S_IFCHR: u32 = 0o020000;

/// FIFO
pub const S_IFIFO: u32 = 0o010000;

/// set-user-id
pub const S_ISUID: u32 = 0o4000;

/// set-group-id
pub const S_ISGID: u32 = 0o2000;

/// 粘滞位
pub const S_ISVTX: u32 = 0o1000;

/// 权限位掩码（含 suid/sgid/sticky）
pub const S_IALLUGO: u32 = 0o7777;

/// 任意执行位
pub const S_IXUGO: u32 = 0o111;

/// 属组执行位
pub const S_IXGRP: u32 = 0o010;

//=============================================================================
// Inode 标志
//=============================================================================

/// 同步更新
pub const EXT2_SYNC_FL: u32 = 0x0000_0008;

/// 不可变文件
pub const EXT2_IMMUTABLE_FL: u32 = 0x0000_0010;

/// 仅追加
pub const EXT2_APPEND_FL: u32 = 0x0000_0020;

/// 不更新访问时间
pub const EXT2_NOATIME_FL: u32 = 0x0000_0080;

/// 目录使用辅助索引（EXT2_BTREE_FL 与 EXT2_INDEX_FL 同值）
pub const EXT2_INDEX_FL: u32 = 0x0000_1000;

/// extent 映射（ext2 不支持）
pub const EXT2_EXTENTS_FL: u32 = 0x0008_0000;

/// 保留位，必须为 0
pub const EXT2_RESERVED_FL: u32 = 0x8000_0000;

/// 用户可以修改的标志位
pub const EXT2_FL_USER_MODIFIABLE: u32 = 0x0003_80FF;

//=============================================================================
// 目录项类型
//=============================================================================

/// 未知类型
pub const EXT2_FT_UNKNOWN: u8 = 0;

/// 普通文件
pub const EXT2_FT_REG_FILE: u8 = 1;

/// 目录
pub const EXT2_FT_DIR: u8 = 2;

/// 字符设备
pub const EXT2_FT_CHRDEV: u8 = 3;

/// 块设备
pub const EXT2_FT_BLKDEV: u8 = 4;

/// FIFO
pub const EXT2_FT_FIFO: u8 = 5;

/// Socket
pub const EXT2_FT_SOCK: u8 = 6;

/// 符号链接
pub const EXT2_FT_SYMLINK: u8 = 7;

/// 目录项头部长度（inode + rec_len + name_len + file_type）
pub const EXT2_DIR_ENTRY_HEADER_LEN: usize = 8;

/// 目录项对齐边界
pub const EXT2_DIR_ENTRY_ALIGN: usize = 4;

/// 最大文件名长度
pub const EXT2_NAME_MAX: usize = 255;

//=============================================================================
// 特性标志
//=============================================================================

/// 兼容特性：目录预分配
pub const EXT2_FEATURE_COMPAT_DIR_PREALLOC: u32 = 0x0001;

/// 兼容特性：扩展属性
pub const EXT2_FEATURE_COMPAT_EXT_ATTR: u32 = 0x0008;

/// 兼容特性：目录索引
pub const EXT2_FEATURE_COMPAT_DIR_INDEX: u32 = 0x0020;

/// 不兼容特性：压缩
pub const EXT2_FEATURE_INCOMPAT_COMPRESSION: u32 = 0x0001;

/// 不兼容特性：目录项包含文件类型
pub const EXT2_FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;

/// 不兼容特性：需要日志恢复
pub const EXT2_FEATURE_INCOMPAT_RECOVER: u32 = 0x0004;

/// 不兼容特性：元数据块组
pub const EXT2_FEATURE_INCOMPAT_META_BG: u32 = 0x0010;

/// 只读兼容特性：稀疏超级块备份
pub const EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;

/// 只读兼容特性：大文件（i_size_high）
pub const EXT2_FEATURE_RO_COMPAT_LARGE_FILE: u32 = 0x0002;

/// 只读兼容特性：B 树目录
pub const EXT2_FEATURE_RO_COMPAT_BTREE_DIR: u32 = 0x0004;

/// 编解码器支持的不兼容特性集合
pub const EXT2_FEATURE_INCOMPAT_SUPP: u32 = EXT2_FEATURE_INCOMPAT_FILETYPE;

/// 编解码器支持的只读兼容特性集合
pub const EXT2_FEATURE_RO_COMPAT_SUPP: u32 =
    EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER | EXT2_FEATURE_RO_COMPAT_LARGE_FILE;

//=============================================================================
// 扩展属性
//=============================================================================

/// 扩展属性块魔数
pub const EXT2_XATTR_MAGIC: u32 = 0xEA02_0000;

/// 扩展属性块头部大小
pub const EXT2_XATTR_HEADER_SIZE: usize = 32;

/// 扩展属性条目固定部分大小
pub const EXT2_XATTR_ENTRY_SIZE: usize = 16;

/// 扩展属性对齐
pub const EXT2_XATTR_PAD: usize = 4;

/// 单个块被共享的最大引用计数
pub const EXT2_XATTR_REFCOUNT_MAX: u32 = 1024;

//=============================================================================
// 路径限制
//=============================================================================

/// 路径最大长度（字节）
pub const PATH_MAX: usize = 4096;

/// 单次解析允许的符号链接跳数
pub const MAX_SYMLINK_HOPS: u32 = 40;
