//! 内存模拟块设备
//!
//! 用于测试和开发。存储区通过 `Arc` 共享，测试可以在设备交给文件系统后
//! 继续检查原始字节或注入故障。

use super::BlockDevice;
use crate::error::{Error, ErrorKind, Result};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, Ordering};
use spin::Mutex;

/// 故障注入计划
///
/// 计数器为 n（n ≥ 0）表示再成功 n 次后下一次操作失败一次；负数表示不注入。
#[derive(Debug)]
pub struct FaultPlan {
    reads_until_failure: AtomicI64,
    writes_until_failure: AtomicI64,
}

impl FaultPlan {
    fn new() -> Self {
        Self {
            reads_until_failure: AtomicI64::new(-1),
            writes_until_failure: AtomicI64::new(-1),
        }
    }

    /// 再成功 `n` 次读取后，让下一次读取失败
    pub fn fail_read_after(&self, n: u32) {
        self.reads_until_failure.store(n as i64, Ordering::SeqCst);
    }

    /// 再成功 `n` 次写入后，让下一次写入失败
    pub fn fail_write_after(&self, n: u32) {
        self.writes_until_failure.store(n as i64, Ordering::SeqCst);
    }

    /// 取消所有故障
    pub fn clear(&self) {
        self.reads_until_failure.store(-1, Ordering::SeqCst);
        self.writes_until_failure.store(-1, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicI64) -> bool {
        let mut cur = counter.load(Ordering::SeqCst);
        loop {
            if cur < 0 {
                return false;
            }
            // 0 时本次失败并解除注入
            let next = if cur == 0 { -1 } else { cur - 1 };
            match counter.compare_exchange(cur, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return cur == 0,
                Err(actual) => cur = actual,
            }
        }
    }
}

/// 内存模拟的块设备
#[derive(Debug, Clone)]
pub struct MemBlockDevice {
    data: Arc<Mutex<Vec<u8>>>,
    sector_size: u32,
    faults: Arc<FaultPlan>,
}

impl MemBlockDevice {
    /// 创建指定大小（字节）的内存磁盘，扇区大小 512
    pub fn new(size: usize) -> Self {
        Self::with_sector_size(size, crate::consts::EXT2_DEFAULT_SECTOR_SIZE)
    }

    /// 创建指定扇区大小的内存磁盘
    pub fn with_sector_size(size: usize, sector_size: u32) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0u8; size])),
            sector_size,
            faults: Arc::new(FaultPlan::new()),
        }
    }

    /// 故障注入控制
    pub fn faults(&self) -> Arc<FaultPlan> {
        self.faults.clone()
    }

    /// 获取原始数据副本（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 读取原始字节
    pub fn read_raw(&self, offset: usize, buf: &mut [u8]) {
        let data = self.data.lock();
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
    }

    fn range(&self, lba: u64, count: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = lba as usize * self.sector_size as usize;
        let bytes = count as usize * self.sector_size as usize;
        if len < bytes {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small"));
        }
        if start + bytes > self.data.lock().len() {
            return Err(Error::new(ErrorKind::Io, "access beyond end of ramdisk"));
        }
        Ok(start..start + bytes)
    }
}

impl BlockDevice for MemBlockDevice {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn total_sectors(&self) -> u64 {
        (self.data.lock().len() / self.sector_size as usize) as u64
    }

    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let range = self.range(lba, count, buf.len())?;
        if FaultPlan::trip(&self.faults.reads_until_failure) {
            return Err(Error::new(ErrorKind::Io, "injected read failure"));
        }
        let n = range.len();
        buf[..n].copy_from_slice(&self.data.lock()[range]);
        Ok(n)
    }

    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        let range = self.range(lba, count, buf.len())?;
        if FaultPlan::trip(&self.faults.writes_until_failure) {
            return Err(Error::new(ErrorKind::Io, "injected write failure"));
        }
        let n = range.len();
        self.data.lock()[range].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_sectors() {
        let mut dev = MemBlockDevice::new(4096);
        let data = [0xABu8; 1024];
        assert_eq!(dev.write_blocks(2, 2, &data).unwrap(), 1024);
        let mut out = [0u8; 512];
        dev.read_blocks(3, 1, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xAB));
        assert!(dev.read_blocks(8, 1, &mut out).is_err());
    }

    #[test]
    fn test_fault_injection_fires_once() {
        let mut dev = MemBlockDevice::new(4096);
        dev.faults().fail_write_after(1);
        let data = [1u8; 512];
        assert!(dev.write_blocks(0, 1, &data).is_ok());
        let err = dev.write_blocks(1, 1, &data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(dev.write_blocks(1, 1, &data).is_ok());
    }
}
