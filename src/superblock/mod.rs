//! Superblock 操作模块
//!
//! 这个模块提供 ext2 superblock 的读取、验证、写入和更新功能，
//! 以及挂载后不变的几何参数 [`Geometry`]。

mod read;
mod write;

pub use read::*;
