//! 位图操作模块

mod ops;

pub use ops::*;
