//! 块设备抽象
//!
//! 提供块设备接口和块级 I/O 操作。
//! block/device.rs 定义设备 trait 与按文件系统块读写的包装器；
//! block/handle.rs 提供对某个缓存块的 RAII 引用，保证持有期间不被驱逐；
//! block/mem.rs 提供带故障注入的内存磁盘。

mod device;
mod handle;
mod mem;

pub use device::{BlockDev, BlockDevice, DeviceId};
pub use handle::Block;
pub use mem::{FaultPlan, MemBlockDevice};
