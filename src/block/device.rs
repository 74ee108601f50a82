//! 块设备核心类型

use crate::error::{Error, ErrorKind, Result};
use alloc::boxed::Box;
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// 设备标识（在块缓存中区分不同设备）
pub type DeviceId = u32;

/// 块设备接口
///
/// 实现此 trait 以提供底层块设备访问。设备以固定的扇区为单位寻址，
/// 文件系统块到扇区的换算由 [`BlockDev`] 完成。
///
/// # 示例
///
/// ```rust,ignore
/// use ext2_vfs_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn total_sectors(&self) -> u64 {
///         1 << 20
///     }
///
///     fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
///
///     fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
///         // 实现扇区写入
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice: Send {
    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32 {
        crate::consts::EXT2_DEFAULT_SECTOR_SIZE
    }

    /// 总扇区数
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;

    /// 写入扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要写入的扇区数
    /// * `buf` - 源缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际写入的字节数
    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize>;

    /// 刷新设备写缓存，返回时写入已经落盘
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 是否只读
    fn is_read_only(&self) -> bool {
        false
    }
}

/// 块设备包装器
///
/// 在设备之上提供按文件系统块（任意扇区整数倍）读写的能力，
/// 内部用互斥锁串行化对设备的访问，并统计物理 I/O 次数。
pub struct BlockDev {
    id: DeviceId,
    /// 底层设备
    device: Mutex<Box<dyn BlockDevice>>,
    sector_size: u32,
    total_sectors: u64,
    read_only: bool,
    /// 物理读取次数（实际设备操作）
    physical_read_count: AtomicU64,
    /// 物理写入次数（实际设备操作）
    physical_write_count: AtomicU64,
}

impl BlockDev {
    /// 创建新的块设备包装器
    pub fn new(id: DeviceId, device: Box<dyn BlockDevice>) -> Result<Self> {
        let sector_size = device.sector_size();
        if sector_size == 0 || !sector_size.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "sector size must be a power of two",
            ));
        }
        let total_sectors = device.total_sectors();
        let read_only = device.is_read_only();

        Ok(Self {
            id,
            device: Mutex::new(device),
            sector_size,
            total_sectors,
            read_only,
            physical_read_count: AtomicU64::new(0),
            physical_write_count: AtomicU64::new(0),
        })
    }

    /// 设备标识
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// 获取物理扇区大小
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    /// 设备总字节数
    pub fn total_bytes(&self) -> u64 {
        self.total_sectors * self.sector_size as u64
    }

    /// 设备是否只读
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// 获取物理读取次数（实际设备操作）
    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count.load(Ordering::Relaxed)
    }

    /// 获取物理写入次数（实际设备操作）
    pub fn physical_write_count(&self) -> u64 {
        self.physical_write_count.load(Ordering::Relaxed)
    }

    /// 将文件系统块地址转换为扇区地址与扇区数
    fn block_to_sectors(&self, lba: u64, block_size: usize) -> Result<(u64, u32)> {
        let sector = self.sector_size as usize;
        if block_size == 0 || block_size % sector != 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "block size must be a multiple of sector size",
            ));
        }
        let per_block = (block_size / sector) as u64;
        let start = lba
            .checked_mul(per_block)
            .ok_or(Error::new(ErrorKind::InvalidInput, "block address overflow"))?;
        if start + per_block > self.total_sectors {
            return Err(Error::new(ErrorKind::Io, "block beyond end of device"));
        }
        Ok((start, per_block as u32))
    }

    /// 读取一个文件系统块
    ///
    /// # 参数
    ///
    /// * `lba` - 文件系统块号
    /// * `buf` - 目标缓冲区，长度即块大小
    pub fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let (start, count) = self.block_to_sectors(lba, buf.len())?;
        self.physical_read_count.fetch_add(1, Ordering::Relaxed);
        let n = self.device.lock().read_blocks(start, count, buf)?;
        if n < buf.len() {
            return Err(Error::new(ErrorKind::Io, "short read from device"));
        }
        Ok(())
    }

    /// 写入一个文件系统块
    pub fn write_block(&self, lba: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::new(ErrorKind::ReadOnly, "device is read-only"));
        }
        let (start, count) = self.block_to_sectors(lba, buf.len())?;
        self.physical_write_count.fetch_add(1, Ordering::Relaxed);
        let n = self.device.lock().write_blocks(start, count, buf)?;
        if n < buf.len() {
            return Err(Error::new(ErrorKind::Io, "short write to device"));
        }
        Ok(())
    }

    /// 直接读取字节（绕过缓存）
    ///
    /// 用于块大小尚未确定时读取 superblock。
    pub fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let sector = self.sector_size as u64;
        let start = offset / sector;
        let skip = (offset % sector) as usize;
        let count = (skip + buf.len()).div_ceil(sector as usize);
        if start + count as u64 > self.total_sectors {
            return Err(Error::new(ErrorKind::Io, "read beyond end of device"));
        }

        let mut temp = vec![0u8; count * sector as usize];
        self.physical_read_count.fetch_add(1, Ordering::Relaxed);
        self.device.lock().read_blocks(start, count as u32, &mut temp)?;
        buf.copy_from_slice(&temp[skip..skip + buf.len()]);
        Ok(())
    }

    /// 直接写入字节（绕过缓存，读-改-写）
    pub fn write_bytes(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::new(ErrorKind::ReadOnly, "device is read-only"));
        }
        let sector = self.sector_size as u64;
        let start = offset / sector;
        let skip = (offset % sector) as usize;
        let count = (skip + buf.len()).div_ceil(sector as usize);
        if start + count as u64 > self.total_sectors {
            return Err(Error::new(ErrorKind::Io, "write beyond end of device"));
        }

        let mut temp = vec![0u8; count * sector as usize];
        let mut dev = self.device.lock();
        if skip != 0 || buf.len() % sector as usize != 0 {
            self.physical_read_count.fetch_add(1, Ordering::Relaxed);
            dev.read_blocks(start, count as u32, &mut temp)?;
        }
        temp[skip..skip + buf.len()].copy_from_slice(buf);
        self.physical_write_count.fetch_add(1, Ordering::Relaxed);
        dev.write_blocks(start, count as u32, &temp)?;
        Ok(())
    }

    /// 刷新底层设备
    pub fn flush(&self) -> Result<()> {
        self.device.lock().flush()
    }
}

impl core::fmt::Debug for BlockDev {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockDev")
            .field("id", &self.id)
            .field("sector_size", &self.sector_size)
            .field("total_sectors", &self.total_sectors)
            .finish()
    }
}
