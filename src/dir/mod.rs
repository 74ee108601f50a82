//! 目录操作模块
//!
//! 这个模块提供 ext2 线性目录的解析、查找与修改。
//!
//! ## 模块结构
//!
//! - `entry` - 单个目录块内的记录解析与编辑（纯字节操作）
//! - `iterator` - 可恢复的目录迭代器
//! - `lookup` - 名字查找
//! - `write` - 插入、删除、改指目录项，初始化新目录

mod entry;
mod iterator;
mod lookup;
mod write;

pub use entry::{
    file_type_from_mode, find_in_block, init_dir_block, init_empty_block, insert_in_block,
    live_entries, parse_block, parse_record, rec_len_for, remove_from_block, retarget_in_block,
    write_record, DirEntry, RawRecord,
};
pub use iterator::{read_dir, DirIterator};
pub use lookup::{find_entry, lookup};
pub use write::{add_entry, init_dir, is_empty, remove_entry, retarget_entry};
