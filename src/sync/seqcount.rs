//! 序列计数器
//!
//! 写者在修改前后各递增一次（修改期间为奇数）；读者记录开始值，读完后比较，
//! 观察到奇数或前后不一致时重试。写者之间的互斥由外部锁保证。

use core::sync::atomic::{fence, AtomicU32, Ordering};

/// 序列计数器
#[derive(Debug, Default)]
pub struct SeqCount {
    seq: AtomicU32,
}

impl SeqCount {
    /// 创建计数器
    pub const fn new() -> Self {
        Self { seq: AtomicU32::new(0) }
    }

    /// 开始一次读取，返回偶数起始值
    pub fn read_begin(&self) -> u32 {
        loop {
            let s = self.seq.load(Ordering::Acquire);
            if s & 1 == 0 {
                return s;
            }
            core::hint::spin_loop();
        }
    }

    /// 读取是否需要重试
    pub fn read_retry(&self, start: u32) -> bool {
        fence(Ordering::Acquire);
        self.seq.load(Ordering::Relaxed) != start
    }

    /// 开始写入
    pub fn write_begin(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
        fence(Ordering::Release);
    }

    /// 结束写入
    pub fn write_end(&self) {
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// 当前值
    pub fn sequence(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_invalidates_reader() {
        let sc = SeqCount::new();
        let start = sc.read_begin();
        assert!(!sc.read_retry(start));
        sc.write_begin();
        assert_eq!(sc.sequence() & 1, 1);
        sc.write_end();
        assert!(sc.read_retry(start));
        assert_eq!(sc.read_begin(), start + 2);
    }
}
