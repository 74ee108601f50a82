//! 阻塞原语
//!
//! 互斥锁与读写锁直接使用 `spin`；这里补充可中断的加锁辅助函数、
//! 等待队列以及用于无锁读取的序列计数器。

mod seqcount;
mod wait_queue;

pub use seqcount::SeqCount;
pub use wait_queue::WaitQueue;

pub use spin::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, ErrorKind, Result};
use crate::hal::SystemHal;

/// 可中断地获取共享锁
pub fn read_interruptible<'a, T>(
    lock: &'a RwLock<T>,
    hal: &dyn SystemHal,
) -> Result<RwLockReadGuard<'a, T>> {
    loop {
        if let Some(guard) = lock.try_read() {
            return Ok(guard);
        }
        if hal.signal_pending() {
            return Err(Error::new(ErrorKind::Interrupted, "interrupted waiting for shared lock"));
        }
        hal.relax();
    }
}

/// 可中断地获取独占锁
pub fn write_interruptible<'a, T>(
    lock: &'a RwLock<T>,
    hal: &dyn SystemHal,
) -> Result<RwLockWriteGuard<'a, T>> {
    loop {
        if let Some(guard) = lock.try_write() {
            return Ok(guard);
        }
        if hal.signal_pending() {
            return Err(Error::new(ErrorKind::Interrupted, "interrupted waiting for exclusive lock"));
        }
        hal.relax();
    }
}

/// 可中断地获取互斥锁
pub fn lock_interruptible<'a, T>(lock: &'a Mutex<T>, hal: &dyn SystemHal) -> Result<MutexGuard<'a, T>> {
    loop {
        if let Some(guard) = lock.try_lock() {
            return Ok(guard);
        }
        if hal.signal_pending() {
            return Err(Error::new(ErrorKind::Interrupted, "interrupted waiting for mutex"));
        }
        hal.relax();
    }
}
