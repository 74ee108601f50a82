//! 块组操作模块
//!
//! 这个模块提供 ext2 块组描述符的定位、读取、验证和写入。
//! 运行期的权威副本是 [`GroupTable`]，每次修改后编码回主描述符表所在的缓存块。

mod read;
mod table;
mod write;

pub use read::*;
pub use table::GroupTable;
pub use write::*;
