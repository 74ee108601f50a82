//! ext2 文件系统
//!
//! 这个模块把块分配、inode、间接寻址与目录引擎组合成一个可挂载的卷：
//!
//! - `filesystem` - 卷结构、挂载与卸载、inode 缓存、错误升级
//! - `file` - 读、写、截断、同步、符号链接内容
//! - `namei` - 创建、链接、删除、重命名、属性修改
//! - `mkfs` - 格式化
//! - `node` - 接入 VFS 的操作表

pub(crate) mod filesystem;
mod file;
pub mod mkfs;
mod namei;
mod node;
mod types;

pub use filesystem::Ext2Fs;
pub use namei::Replaced;
pub use node::{attr_of, Ext2Driver, Ext2Node, Ext2Volume};
pub use types::{FileAttr, InodeType, RenameFlags, SetAttr, StatFs, TimeUpdate};
