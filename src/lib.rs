//! ext2_vfs_core: ext2 文件系统与 VFS 核心
//!
//! 一个纯 Rust、`no_std` 的内核文件系统核心，包括：
//! - **ext2 卷**：块与 inode 分配、间接块寻址、线性目录、扩展属性、格式化
//! - **VFS 层**：目录项缓存、挂载树、路径解析、打开文件表、文件事件
//! - **协作者接口**：块设备与系统抽象层都以 trait 注入
//!
//! # 示例
//!
//! ```rust,ignore
//! use ext2_vfs_core::{
//!     block::{BlockDev, MemBlockDevice},
//!     fs::mkfs::{format, FormatOptions},
//!     vfs::{Actor, OpenFlags, Vfs},
//!     FsConfig, MountFlags, NullHal,
//! };
//!
//! let bdev = Arc::new(BlockDev::new(1, Box::new(MemBlockDevice::new(8 << 20)))?);
//! format(&bdev, &FormatOptions::default())?;
//!
//! let vfs = Vfs::new(FsConfig::default(), Arc::new(NullHal));
//! vfs.register_device("ram0", bdev)?;
//! vfs.mount_root("ram0", "ext2", MountFlags::empty(), "")?;
//!
//! let actor = Actor::new(vfs.clone())?;
//! actor.mkdir(b"/etc", 0o755)?;
//! let fd = actor.open(b"/etc/motd", (OpenFlags::CREAT | OpenFlags::WRONLY).bits(), 0o644)?;
//! actor.write(fd, b"hello")?;
//! actor.close(fd)?;
//! vfs.shutdown()?;
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象
//! - [`cache`] - 块缓存
//! - [`superblock`] / [`block_group`] / [`types`] - 磁盘格式
//! - [`bitmap`] / [`balloc`] / [`ialloc`] - 空间分配
//! - [`inode`] / [`indirect`] - inode 与块寻址
//! - [`dir`] - 目录引擎
//! - [`xattr`] - 扩展属性
//! - [`fs`] - ext2 卷
//! - [`vfs`] - VFS 层与系统调用入口

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

// ===== 基础 =====

/// 错误处理
pub mod error;

/// 配置与挂载选项
pub mod config;

/// 系统抽象层
pub mod hal;

/// 阻塞原语
pub mod sync;

/// 常量定义
pub mod consts;

/// 磁盘数据结构
pub mod types;

// ===== 块层 =====

/// 块设备抽象
pub mod block;

/// 块缓存
pub mod cache;

// ===== ext2 =====

/// Superblock 操作
pub mod superblock;

/// 块组描述符
pub mod block_group;

/// 位图操作
pub mod bitmap;

/// 块分配
pub mod balloc;

/// Inode 分配
pub mod ialloc;

/// Inode 操作
pub mod inode;

/// 间接块寻址
pub mod indirect;

/// 目录操作
pub mod dir;

/// 扩展属性
pub mod xattr;

/// ext2 卷
pub mod fs;

// ===== VFS =====

/// 虚拟文件系统层
pub mod vfs;

// ===== 公共导出 =====

pub use error::{Error, ErrorClass, ErrorKind, Result};

pub use config::{ErrorsPolicy, FsConfig, MountFlags, MountOptions, UnmountFlags};

pub use hal::{Capabilities, Credentials, NullHal, SystemHal, Timespec};

pub use block::{BlockDev, BlockDevice, DeviceId, MemBlockDevice};

pub use cache::{BlockCache, CacheStats};

pub use fs::{Ext2Driver, Ext2Fs, FileAttr, InodeType, RenameFlags, SetAttr, StatFs, TimeUpdate};

pub use xattr::XattrFlags;

pub use vfs::{Actor, Fd, OpenFlags, SeekWhence, Vfs, WatchEvent, WatchFlags, WatchMask};
