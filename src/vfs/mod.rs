//! 虚拟文件系统层
//!
//! 位于具体文件系统之上，提供统一的入口：
//!
//! - `ops` - inode、卷与驱动的操作表
//! - `dentry` - 目录项缓存
//! - `mount` - 挂载树
//! - `path` - 路径解析
//! - `permission` - 访问检查
//! - `file` - 打开文件记录
//! - `fd_table` - 每个执行体的打开文件表
//! - `watch` - 文件事件服务
//! - `context` - 核心实例
//! - `actor` - 执行体与系统调用入口
//!
//! # 示例
//!
//! ```rust,ignore
//! use ext2_vfs_core::vfs::{Actor, OpenFlags, Vfs};
//!
//! let vfs = Vfs::new(FsConfig::default(), hal);
//! vfs.register_device("ram0", bdev)?;
//! vfs.mount_root("ram0", "ext2", MountFlags::empty(), "")?;
//!
//! let actor = Actor::new(vfs.clone())?;
//! let fd = actor.open(b"/hello", (OpenFlags::CREAT | OpenFlags::RDWR).bits(), 0o644)?;
//! actor.write(fd, b"hi")?;
//! actor.close(fd)?;
//! ```

mod actor;
mod context;
mod dentry;
mod fd_table;
mod file;
mod mount;
mod ops;
mod path;
mod permission;
mod syscalls;
mod watch;

pub use actor::{Actor, DEFAULT_UMASK};
pub use context::Vfs;
pub use dentry::{Dentry, DentryFlags, DentryName};
pub use fd_table::{Fd, FdTable};
pub use file::{File, OpenFile, OpenFlags, SeekWhence};
pub use mount::{Mount, MountTable, PathRef};
pub use ops::{DirEntryInfo, FileSystemOps, FsDriver, InodeOps, ReplacedTarget};
pub use path::{lookup_child, path_of, LastComponent, LookupFlags, Resolved, Resolver};
pub use permission::{check_access, check_mutable, check_sticky, is_owner_or_cap, Access};
pub use syscalls::{FcntlCmd, FD_CLOEXEC};
pub use watch::{WatchEvent, WatchFlags, WatchInstance, WatchKey, WatchMask, WatchRegistry, EVENT_HEADER_LEN};
