//! 块缓存模块
//!
//! # 主要组件
//!
//! - [`CacheBuffer`] - 单个缓存块，包含数据、引用计数和状态
//! - [`BlockCache`] - 全局块缓存，以 (设备, 块号) 为键，使用 lru crate 维护访问顺序
//! - [`CacheFlags`] - 缓存块状态标志
//! - [`CacheStats`] - 缓存统计信息
//!
//! # 语义
//!
//! - `get` 返回被引用（pinned）的有效缓冲区，同键并发读取合并为一次设备 I/O
//! - `get_zero` 不读设备，直接得到清零的有效缓冲区
//! - 修改通过 [`Block::with_data_mut`](crate::block::Block::with_data_mut) 进行并自动记脏
//! - `sync(dev)` 写回设备的全部脏块并等待设备确认
//! - 驱逐只针对未被引用的干净缓冲区；脏块先写回再成为候选
//! - 设备读取失败使该键进入失败状态，直到调用者显式 `evict`
//!
//! # 使用示例
//!
//! ```rust,ignore
//! let cache = BlockCache::new(DEFAULT_CACHE_SIZE, hal);
//! cache.register_device(dev);
//!
//! let mut block = cache.get(dev_id, 100, 1024)?;
//! block.with_data_mut(|data| data[0] = 42);
//! drop(block);
//!
//! cache.sync(dev_id)?;
//! ```

mod block_cache;
mod buffer;

pub use block_cache::{BlockCache, CacheStats, DEFAULT_CACHE_SIZE};
pub use buffer::{BufKey, CacheBuffer, CacheFlags};
