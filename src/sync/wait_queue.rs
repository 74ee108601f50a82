//! 等待队列
//!
//! 以代数计数实现的等待队列：唤醒者递增代数，等待者观察到代数变化后重新检查条件。
//! 等待过程轮询 [`SystemHal::signal_pending`]，支持截止时间。

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Error, ErrorKind, Result};
use crate::hal::{SystemHal, Timespec};

/// 等待队列
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: AtomicU64,
    waiters: AtomicUsize,
}

impl WaitQueue {
    /// 创建空的等待队列
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
        }
    }

    /// 等待直到 `cond` 为真（可被信号中断）
    pub fn wait_until<F>(&self, hal: &dyn SystemHal, cond: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        self.wait_deadline(hal, None, cond)
    }

    /// 等待直到 `cond` 为真或到达截止时间
    ///
    /// # 返回
    ///
    /// - `Ok(())` - 条件成立
    /// - `Err(Interrupted)` - 等待期间出现待处理信号
    /// - `Err(TimedOut)` - 到达 `deadline`
    pub fn wait_deadline<F>(
        &self,
        hal: &dyn SystemHal,
        deadline: Option<Timespec>,
        mut cond: F,
    ) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        if cond() {
            return Ok(());
        }

        self.waiters.fetch_add(1, Ordering::AcqRel);
        let result = loop {
            let seen = self.generation.load(Ordering::Acquire);
            if cond() {
                break Ok(());
            }
            match self.park(hal, deadline, seen) {
                Ok(()) => continue,
                Err(e) => break Err(e),
            }
        };
        self.waiters.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn park(&self, hal: &dyn SystemHal, deadline: Option<Timespec>, seen: u64) -> Result<()> {
        while self.generation.load(Ordering::Acquire) == seen {
            if hal.signal_pending() {
                return Err(Error::new(ErrorKind::Interrupted, "wait interrupted by signal"));
            }
            if let Some(deadline) = deadline {
                if hal.now() >= deadline {
                    return Err(Error::new(ErrorKind::TimedOut, "wait timed out"));
                }
            }
            hal.relax();
        }
        Ok(())
    }

    /// 唤醒所有等待者
    pub fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// 当前等待者数量
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Credentials;
    use core::sync::atomic::AtomicBool;

    struct SignalHal {
        pending: AtomicBool,
        clock: AtomicU64,
    }

    impl SystemHal for SignalHal {
        fn now(&self) -> Timespec {
            Timespec::new(self.clock.fetch_add(1, Ordering::AcqRel) as i64, 0)
        }
        fn credentials(&self) -> Credentials {
            Credentials::root()
        }
        fn signal_pending(&self) -> bool {
            self.pending.load(Ordering::Acquire)
        }
    }

    #[test]
    fn test_ready_condition_returns_immediately() {
        let hal = SignalHal { pending: AtomicBool::new(true), clock: AtomicU64::new(0) };
        let wq = WaitQueue::new();
        assert!(wq.wait_until(&hal, || true).is_ok());
    }

    #[test]
    fn test_signal_interrupts_wait() {
        let hal = SignalHal { pending: AtomicBool::new(true), clock: AtomicU64::new(0) };
        let wq = WaitQueue::new();
        let err = wq.wait_until(&hal, || false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(wq.waiters(), 0);
    }

    #[test]
    fn test_deadline_times_out() {
        let hal = SignalHal { pending: AtomicBool::new(false), clock: AtomicU64::new(0) };
        let wq = WaitQueue::new();
        let err = wq
            .wait_deadline(&hal, Some(Timespec::new(5, 0)), || false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
