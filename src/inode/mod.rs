//! Inode 操作模块
//!
//! 这个模块提供 ext2 inode 记录的定位、读取、验证和写入，
//! 以及内存中共享的 [`Inode`] 对象。

mod handle;
mod read;
mod write;

pub use handle::{Inode, InodeState};
pub use read::*;
pub use write::*;
