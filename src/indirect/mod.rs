//! 间接块寻址
//!
//! ext2 的 inode 有 12 个直接块指针和一、二、三级间接指针各一个。

mod mapper;

pub use mapper::IndirectBlockMapper;
