//! Superblock 读取和验证

use crate::{
    block::BlockDev,
    consts::*,
    error::{Error, ErrorKind, Result},
    types::ext2_sblock,
};
use alloc::vec;

/// 从块设备读取并解码 superblock（只检查魔数）
///
/// # 参数
///
/// * `bdev` - 块设备引用
///
/// # 返回
///
/// 成功返回 superblock 结构
pub fn read_superblock(bdev: &BlockDev) -> Result<ext2_sblock> {
    let mut sb_buf = vec![0u8; EXT2_SUPERBLOCK_SIZE];

    // 读取 superblock（从偏移 1024 开始）
    bdev.read_bytes(EXT2_SUPERBLOCK_OFFSET, &mut sb_buf)?;
    let sb = ext2_sblock::decode(&sb_buf)?;

    if sb.magic != EXT2_SUPERBLOCK_MAGIC {
        return Err(Error::new(ErrorKind::Corrupted, "invalid ext2 superblock magic number"));
    }

    Ok(sb)
}

/// 挂载后不变的卷几何参数
///
/// 从 superblock 派生，按值复制到各个子系统，避免在热路径上加锁。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// 块大小（字节）
    pub block_size: u32,
    /// 总块数
    pub blocks_count: u32,
    /// 第一个数据块（1K 块为 1，否则为 0）
    pub first_data_block: u32,
    /// 每组块数
    pub blocks_per_group: u32,
    /// 总 inode 数
    pub inodes_count: u32,
    /// 每组 inode 数
    pub inodes_per_group: u32,
    /// inode 记录大小
    pub inode_size: u16,
    /// 第一个非保留 inode
    pub first_ino: u32,
    /// 块组数
    pub group_count: u32,
    /// 每组 inode 表占用的块数
    pub inode_table_blocks: u32,
    /// 块组描述符表占用的块数
    pub gdt_blocks: u32,
    /// 是否启用稀疏超级块备份
    pub sparse_super: bool,
    /// 是否允许 32 位以上的文件大小
    pub large_file: bool,
    /// 目录项是否带文件类型
    pub filetype: bool,
}

impl Geometry {
    /// 每个间接块中的指针数
    pub fn ptrs_per_block(&self) -> u32 {
        self.block_size / 4
    }

    /// 每个块中的块组描述符数
    pub fn descs_per_block(&self) -> u32 {
        self.block_size / EXT2_GROUP_DESC_SIZE as u32
    }

    /// 某个块组的第一个块
    pub fn group_first_block(&self, group: u32) -> u32 {
        self.first_data_block + group * self.blocks_per_group
    }

    /// 某个块组实际包含的块数（最后一组可能不满）
    pub fn blocks_in_group(&self, group: u32) -> u32 {
        if group + 1 == self.group_count {
            self.blocks_count - self.group_first_block(group)
        } else {
            self.blocks_per_group
        }
    }

    /// 块号所在的块组及组内偏移
    pub fn block_to_group(&self, block: u32) -> (u32, u32) {
        let rel = block - self.first_data_block;
        (rel / self.blocks_per_group, rel % self.blocks_per_group)
    }

    /// inode 号所在的块组及组内索引
    pub fn ino_to_group(&self, ino: u32) -> (u32, u32) {
        ((ino - 1) / self.inodes_per_group, (ino - 1) % self.inodes_per_group)
    }

    /// 块组是否带有超级块（及描述符表）备份
    ///
    /// 未启用 SPARSE_SUPER 时每组都有备份；启用时仅组 0、1 以及 3/5/7 的幂次。
    pub fn group_has_super(&self, group: u32) -> bool {
        if group <= 1 || !self.sparse_super {
            return true;
        }
        if group & 1 == 0 {
            return false;
        }
        is_power_of(group, 3) || is_power_of(group, 5) || is_power_of(group, 7)
    }

    /// 检查块号是否落在数据区
    pub fn check_block(&self, block: u32) -> Result<()> {
        if block < self.first_data_block || block >= self.blocks_count {
            log::error!("[SB] block {} outside [{}, {})", block, self.first_data_block, self.blocks_count);
            return Err(Error::new(ErrorKind::Corrupted, "block number out of range"));
        }
        Ok(())
    }

    /// 检查 inode 号是否合法
    pub fn check_ino(&self, ino: u32) -> Result<()> {
        if ino == 0 || ino > self.inodes_count {
            log::error!("[SB] inode {} outside [1, {}]", ino, self.inodes_count);
            return Err(Error::new(ErrorKind::Corrupted, "inode number out of range"));
        }
        Ok(())
    }

    /// 单个文件可寻址的最大字节数
    ///
    /// (12 + P + P² + P³) × 块大小，P 为每块指针数；未启用 LARGE_FILE 时不超过 2^31 - 1。
    pub fn max_file_size(&self) -> u64 {
        let p = self.ptrs_per_block() as u64;
        let blocks = EXT2_NDIR_BLOCKS as u64 + p + p * p + p * p * p;
        let limit = blocks.saturating_mul(self.block_size as u64);
        if self.large_file {
            limit
        } else {
            limit.min(i32::MAX as u64)
        }
    }
}

fn is_power_of(mut n: u32, base: u32) -> bool {
    while n % base == 0 && n > 1 {
        n /= base;
    }
    n == 1
}

/// Superblock 包装器，提供验证与几何参数
#[derive(Debug, Clone)]
pub struct Superblock {
    pub(super) inner: ext2_sblock,
    geometry: Geometry,
    forced_read_only: bool,
}

impl Superblock {
    /// 从块设备加载并完整验证 superblock
    ///
    /// # 错误
    ///
    /// - `Corrupted` - 魔数错误、几何参数不一致或卷超出设备
    /// - `Unsupported` - 存在未知的不兼容特性
    pub fn load(bdev: &BlockDev) -> Result<Self> {
        let inner = read_superblock(bdev)?;
        let sb = Self::from_raw(inner)?;

        let fs_bytes = sb.geometry.blocks_count as u64 * sb.geometry.block_size as u64;
        if fs_bytes > bdev.total_bytes() {
            log::error!(
                "[SB] filesystem needs {} bytes, device has {}",
                fs_bytes,
                bdev.total_bytes()
            );
            return Err(Error::new(ErrorKind::Corrupted, "filesystem larger than device"));
        }
        Ok(sb)
    }

    /// 验证解码后的 superblock 并派生几何参数
    pub fn from_raw(inner: ext2_sblock) -> Result<Self> {
        if inner.magic != EXT2_SUPERBLOCK_MAGIC {
            return Err(Error::new(ErrorKind::Corrupted, "invalid ext2 superblock magic number"));
        }
        if inner.log_block_size > EXT2_MAX_LOG_BLOCK_SIZE {
            return Err(Error::new(ErrorKind::Corrupted, "unsupported block size"));
        }
        let block_size = inner.block_size();
        let bits_per_block = block_size * 8;

        if inner.blocks_per_group == 0 || inner.blocks_per_group > bits_per_block {
            return Err(Error::new(ErrorKind::Corrupted, "invalid blocks per group"));
        }
        if inner.inodes_per_group == 0 || inner.inodes_per_group > bits_per_block {
            return Err(Error::new(ErrorKind::Corrupted, "invalid inodes per group"));
        }
        if inner.rev_level > EXT2_DYNAMIC_REV {
            return Err(Error::new(ErrorKind::Unsupported, "unknown revision level"));
        }

        let inode_size = inner.inode_size();
        if inner.rev_level != EXT2_GOOD_OLD_REV
            && (!inode_size.is_power_of_two()
                || inode_size < EXT2_GOOD_OLD_INODE_SIZE
                || inode_size as u32 > block_size)
        {
            return Err(Error::new(ErrorKind::Corrupted, "invalid inode size"));
        }

        let expected_first = if block_size == EXT2_MIN_BLOCK_SIZE { 1 } else { 0 };
        if inner.first_data_block != expected_first || inner.blocks_count <= inner.first_data_block {
            return Err(Error::new(ErrorKind::Corrupted, "invalid first data block"));
        }

        let unknown_incompat = inner.feature_incompat & !EXT2_FEATURE_INCOMPAT_SUPP;
        if unknown_incompat != 0 {
            log::error!("[SB] unsupported incompat features {:#x}", unknown_incompat);
            return Err(Error::new(ErrorKind::Unsupported, "unsupported incompatible features"));
        }
        let unknown_ro = inner.feature_ro_compat & !EXT2_FEATURE_RO_COMPAT_SUPP;
        let forced_read_only = unknown_ro != 0;
        if forced_read_only {
            log::warn!(
                "[SB] unknown ro_compat features {:#x}, volume will be read-only",
                unknown_ro
            );
        }

        let group_count = inner.group_count();
        if inner.inodes_count != group_count * inner.inodes_per_group {
            return Err(Error::new(ErrorKind::Corrupted, "inode count does not match groups"));
        }
        let first_ino = inner.first_ino();
        if first_ino <= EXT2_ROOT_INO || first_ino > inner.inodes_count {
            return Err(Error::new(ErrorKind::Corrupted, "invalid first inode"));
        }

        let descs_per_block = block_size / EXT2_GROUP_DESC_SIZE as u32;
        let geometry = Geometry {
            block_size,
            blocks_count: inner.blocks_count,
            first_data_block: inner.first_data_block,
            blocks_per_group: inner.blocks_per_group,
            inodes_count: inner.inodes_count,
            inodes_per_group: inner.inodes_per_group,
            inode_size,
            first_ino,
            group_count,
            inode_table_blocks: (inner.inodes_per_group * inode_size as u32).div_ceil(block_size),
            gdt_blocks: group_count.div_ceil(descs_per_block),
            sparse_super: inner.has_ro_compat(EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER),
            large_file: inner.has_ro_compat(EXT2_FEATURE_RO_COMPAT_LARGE_FILE),
            filetype: inner.has_incompat(EXT2_FEATURE_INCOMPAT_FILETYPE),
        };

        log::debug!(
            "[SB] block_size={} groups={} inodes={} blocks={}",
            block_size,
            group_count,
            geometry.inodes_count,
            geometry.blocks_count
        );

        Ok(Self {
            inner,
            geometry,
            forced_read_only,
        })
    }

    /// 获取内部 superblock 结构的引用
    pub fn inner(&self) -> &ext2_sblock {
        &self.inner
    }

    /// 几何参数
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// 获取块大小
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size
    }

    /// 是否因未知只读兼容特性而必须只读挂载
    pub fn forced_read_only(&self) -> bool {
        self.forced_read_only
    }

    /// 卷上记录的 errors 策略
    pub fn errors(&self) -> u16 {
        self.inner.errors
    }

    /// 上次卸载是否干净
    pub fn was_clean(&self) -> bool {
        self.inner.state & EXT2_VALID_FS != 0 && self.inner.state & EXT2_ERROR_FS == 0
    }

    /// 获取卷名称（UTF-8 字符串）
    pub fn volume_name(&self) -> Option<&str> {
        core::str::from_utf8(self.inner.volume_label()).ok()
    }

    /// 获取 UUID
    pub fn uuid(&self) -> &[u8; 16] {
        &self.inner.uuid
    }
}
