//! ext2 数据结构定义
//!
//! 这个模块包含了直接对应磁盘格式的数据结构及其编解码。
//!
//! ## 设计原则
//!
//! 1. **磁盘格式结构** - 保留 C 风格命名（便于对照 ext2 格式文档）
//! 2. **编解码** - 通过 `byteorder::LittleEndian` 按字段偏移读写，与主机字节序无关
//! 3. **辅助方法** - 提供 Rust 风格的访问器和工具函数

#![allow(non_camel_case_types)] // 允许C风格命名

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::hal::Timespec;
use byteorder::{ByteOrder, LittleEndian};

//=============================================================================
// Superblock
//=============================================================================

/// Superblock 结构
///
/// 对应 ext2 磁盘格式中的 superblock（位于卷起始 1024 字节处，长 1024 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ext2_sblock {
    pub inodes_count: u32,      // 0: 总 inode 数
    pub blocks_count: u32,      // 4: 总块数
    pub r_blocks_count: u32,    // 8: 保留块数
    pub free_blocks_count: u32, // 12: 空闲块数
    pub free_inodes_count: u32, // 16: 空闲 inode 数
    pub first_data_block: u32,  // 20: 第一个数据块
    pub log_block_size: u32,    // 24: 块大小（1024 << log_block_size）
    pub log_frag_size: u32,     // 28: 片段大小
    pub blocks_per_group: u32,  // 32: 每组块数
    pub frags_per_group: u32,   // 36: 每组片段数
    pub inodes_per_group: u32,  // 40: 每组 inode 数
    pub mtime: u32,             // 44: 挂载时间
    pub wtime: u32,             // 48: 写入时间
    pub mnt_count: u16,         // 52: 挂载次数
    pub max_mnt_count: u16,     // 54: 最大挂载次数
    pub magic: u16,             // 56: 魔数 (0xEF53)
    pub state: u16,             // 58: 文件系统状态
    pub errors: u16,            // 60: 错误处理方式
    pub minor_rev_level: u16,   // 62: 次版本号
    pub lastcheck: u32,         // 64: 最后检查时间
    pub checkinterval: u32,     // 68: 检查间隔
    pub creator_os: u32,        // 72: 创建者操作系统
    pub rev_level: u32,         // 76: 版本级别
    pub def_resuid: u16,        // 80: 默认保留 uid
    pub def_resgid: u16,        // 82: 默认保留 gid

    // 动态版本字段
    pub first_ino: u32,         // 84: 第一个非保留 inode
    pub inode_size: u16,        // 88: inode 大小
    pub block_group_nr: u16,    // 90: 本超级块所在的块组号
    pub feature_compat: u32,    // 92: 兼容特性
    pub feature_incompat: u32,  // 96: 不兼容特性
    pub feature_ro_compat: u32, // 100: 只读兼容特性
    pub uuid: [u8; 16],         // 104: 128位UUID
    pub volume_name: [u8; 16],  // 120: 卷名称
    pub last_mounted: [u8; 64], // 136: 最后挂载路径
}

/// 全零的 superblock，字段由调用者逐个填写
impl Default for ext2_sblock {
    fn default() -> Self {
        Self {
            inodes_count: 0,
            blocks_count: 0,
            r_blocks_count: 0,
            free_blocks_count: 0,
            free_inodes_count: 0,
            first_data_block: 0,
            log_block_size: 0,
            log_frag_size: 0,
            blocks_per_group: 0,
            frags_per_group: 0,
            inodes_per_group: 0,
            mtime: 0,
            wtime: 0,
            mnt_count: 0,
            max_mnt_count: 0,
            magic: 0,
            state: 0,
            errors: 0,
            minor_rev_level: 0,
            lastcheck: 0,
            checkinterval: 0,
            creator_os: 0,
            rev_level: 0,
            def_resuid: 0,
            def_resgid: 0,
            first_ino: 0,
            inode_size: 0,
            block_group_nr: 0,
            feature_compat: 0,
            feature_incompat: 0,
            feature_ro_compat: 0,
            uuid: [0; 16],
            volume_name: [0; 16],
            last_mounted: [0; 64],
        }
    }
}

impl ext2_sblock {
    /// 从 1024 字节的原始数据解码
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "superblock buffer too small"));
        }
        let mut sb = Self {
            inodes_count: LittleEndian::read_u32(&buf[0..]),
            blocks_count: LittleEndian::read_u32(&buf[4..]),
            r_blocks_count: LittleEndian::read_u32(&buf[8..]),
            free_blocks_count: LittleEndian::read_u32(&buf[12..]),
            free_inodes_count: LittleEndian::read_u32(&buf[16..]),
            first_data_block: LittleEndian::read_u32(&buf[20..]),
            log_block_size: LittleEndian::read_u32(&buf[24..]),
            log_frag_size: LittleEndian::read_u32(&buf[28..]),
            blocks_per_group: LittleEndian::read_u32(&buf[32..]),
            frags_per_group: LittleEndian::read_u32(&buf[36..]),
            inodes_per_group: LittleEndian::read_u32(&buf[40..]),
            mtime: LittleEndian::read_u32(&buf[44..]),
            wtime: LittleEndian::read_u32(&buf[48..]),
            mnt_count: LittleEndian::read_u16(&buf[52..]),
            max_mnt_count: LittleEndian::read_u16(&buf[54..]),
            magic: LittleEndian::read_u16(&buf[56..]),
            state: LittleEndian::read_u16(&buf[58..]),
            errors: LittleEndian::read_u16(&buf[60..]),
            minor_rev_level: LittleEndian::read_u16(&buf[62..]),
            lastcheck: LittleEndian::read_u32(&buf[64..]),
            checkinterval: LittleEndian::read_u32(&buf[68..]),
            creator_os: LittleEndian::read_u32(&buf[72..]),
            rev_level: LittleEndian::read_u32(&buf[76..]),
            def_resuid: LittleEndian::read_u16(&buf[80..]),
            def_resgid: LittleEndian::read_u16(&buf[82..]),
            first_ino: LittleEndian::read_u32(&buf[84..]),
            inode_size: LittleEndian::read_u16(&buf[88..]),
            block_group_nr: LittleEndian::read_u16(&buf[90..]),
            feature_compat: LittleEndian::read_u32(&buf[92..]),
            feature_incompat: LittleEndian::read_u32(&buf[96..]),
            feature_ro_compat: LittleEndian::read_u32(&buf[100..]),
            ..Default::default()
        };
        sb.uuid.copy_from_slice(&buf[104..120]);
        sb.volume_name.copy_from_slice(&buf[120..136]);
        sb.last_mounted.copy_from_slice(&buf[136..200]);
        Ok(sb)
    }

    /// 编码到 1024 字节缓冲区（只覆盖已知字段，保留其余字节）
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..], self.inodes_count);
        LittleEndian::write_u32(&mut buf[4..], self.blocks_count);
        LittleEndian::write_u32(&mut buf[8..], self.r_blocks_count);
        LittleEndian::write_u32(&mut buf[12..], self.free_blocks_count);
        LittleEndian::write_u32(&mut buf[16..], self.free_inodes_count);
        LittleEndian::write_u32(&mut buf[20..], self.first_data_block);
        LittleEndian::write_u32(&mut buf[24..], self.log_block_size);
        LittleEndian::write_u32(&mut buf[28..], self.log_frag_size);
        LittleEndian::write_u32(&mut buf[32..], self.blocks_per_group);
        LittleEndian::write_u32(&mut buf[36..], self.frags_per_group);
        LittleEndian::write_u32(&mut buf[40..], self.inodes_per_group);
        LittleEndian::write_u32(&mut buf[44..], self.mtime);
        LittleEndian::write_u32(&mut buf[48..], self.wtime);
        LittleEndian::write_u16(&mut buf[52..], self.mnt_count);
        LittleEndian::write_u16(&mut buf[54..], self.max_mnt_count);
        LittleEndian::write_u16(&mut buf[56..], self.magic);
        LittleEndian::write_u16(&mut buf[58..], self.state);
        LittleEndian::write_u16(&mut buf[60..], self.errors);
        LittleEndian::write_u16(&mut buf[62..], self.minor_rev_level);
        LittleEndian::write_u32(&mut buf[64..], self.lastcheck);
        LittleEndian::write_u32(&mut buf[68..], self.checkinterval);
        LittleEndian::write_u32(&mut buf[72..], self.creator_os);
        LittleEndian::write_u32(&mut buf[76..], self.rev_level);
        LittleEndian::write_u16(&mut buf[80..], self.def_resuid);
        LittleEndian::write_u16(&mut buf[82..], self.def_resgid);
        LittleEndian::write_u32(&mut buf[84..], self.first_ino);
        LittleEndian::write_u16(&mut buf[88..], self.inode_size);
        LittleEndian::write_u16(&mut buf[90..], self.block_group_nr);
        LittleEndian::write_u32(&mut buf[92..], self.feature_compat);
        LittleEndian::write_u32(&mut buf[96..], self.feature_incompat);
        LittleEndian::write_u32(&mut buf[100..], self.feature_ro_compat);
        buf[104..120].copy_from_slice(&self.uuid);
        buf[120..136].copy_from_slice(&self.volume_name);
        buf[136..200].copy_from_slice(&self.last_mounted);
    }

    /// 块大小（字节）
    pub fn block_size(&self) -> u32 {
        EXT2_MIN_BLOCK_SIZE << self.log_block_size
    }

    /// inode 记录大小（修订版本 0 固定为 128）
    pub fn inode_size(&self) -> u16 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        }
    }

    /// 第一个非保留 inode
    pub fn first_ino(&self) -> u32 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_FIRST_INO
        } else {
            self.first_ino
        }
    }

    /// 块组数量
    pub fn group_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        (self.blocks_count - self.first_data_block).div_ceil(self.blocks_per_group)
    }

    /// 是否启用某个只读兼容特性
    pub fn has_ro_compat(&self, feature: u32) -> bool {
        self.feature_ro_compat & feature != 0
    }

    /// 是否启用某个不兼容特性
    pub fn has_incompat(&self, feature: u32) -> bool {
        self.feature_incompat & feature != 0
    }

    /// 卷标（去除尾部 NUL）
    pub fn volume_label(&self) -> &[u8] {
        let end = self.volume_name.iter().position(|&b| b == 0).unwrap_or(16);
        &self.volume_name[..end]
    }
}

//=============================================================================
// 块组描述符
//=============================================================================

/// 块组描述符（32 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ext2_group_desc {
    pub block_bitmap: u32,      // 0: 块位图块号
    pub inode_bitmap: u32,      // 4: inode 位图块号
    pub inode_table: u32,       // 8: inode 表起始块号
    pub free_blocks_count: u16, // 12: 空闲块数
    pub free_inodes_count: u16, // 14: 空闲 inode 数
    pub used_dirs_count: u16,   // 16: 目录数
}

impl ext2_group_desc {
    /// 解码
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            block_bitmap: LittleEndian::read_u32(&buf[0..]),
            inode_bitmap: LittleEndian::read_u32(&buf[4..]),
            inode_table: LittleEndian::read_u32(&buf[8..]),
            free_blocks_count: LittleEndian::read_u16(&buf[12..]),
            free_inodes_count: LittleEndian::read_u16(&buf[14..]),
            used_dirs_count: LittleEndian::read_u16(&buf[16..]),
        }
    }

    /// 编码（填充与保留字段写 0）
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..], self.block_bitmap);
        LittleEndian::write_u32(&mut buf[4..], self.inode_bitmap);
        LittleEndian::write_u32(&mut buf[8..], self.inode_table);
        LittleEndian::write_u16(&mut buf[12..], self.free_blocks_count);
        LittleEndian::write_u16(&mut buf[14..], self.free_inodes_count);
        LittleEndian::write_u16(&mut buf[16..], self.used_dirs_count);
        buf[18..EXT2_GROUP_DESC_SIZE].fill(0);
    }
}

//=============================================================================
// Inode
//=============================================================================

/// Inode 磁盘记录
///
/// 128 字节的基础部分，加上 inode 大小 ≥ 160 时的纳秒时间戳扩展区。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ext2_inode {
    pub mode: u16,                    // 0: 文件模式
    pub uid: u16,                     // 2: 所有者 UID 低 16 位
    pub size_lo: u32,                 // 4: 文件大小低 32 位
    pub atime: u32,                   // 8: 访问时间
    pub ctime: u32,                   // 12: 状态改变时间
    pub mtime: u32,                   // 16: 修改时间
    pub dtime: u32,                   // 20: 删除时间
    pub gid: u16,                     // 24: GID 低 16 位
    pub links_count: u16,             // 26: 硬链接数
    pub blocks: u32,                  // 28: 块数（512 字节单位）
    pub flags: u32,                   // 32: 标志
    pub osd1: u32,                    // 36: OS 相关
    pub block: [u32; EXT2_N_BLOCKS],  // 40: 块指针
    pub generation: u32,              // 100: 文件版本
    pub file_acl: u32,                // 104: 扩展属性块
    pub size_high: u32,               // 108: 文件大小高 32 位 / 目录 ACL
    pub faddr: u32,                   // 112: 片段地址
    pub uid_high: u16,                // 120: UID 高 16 位
    pub gid_high: u16,                // 122: GID 高 16 位
    pub extra_isize: u16,             // 128: 扩展区大小
    pub ctime_extra: u32,             // 132: 纳秒 << 2
    pub mtime_extra: u32,             // 136
    pub atime_extra: u32,             // 140
    pub crtime: u32,                  // 144: 创建时间
    pub crtime_extra: u32,            // 148
}

impl ext2_inode {
    /// 从 inode 表切片解码
    ///
    /// # 参数
    ///
    /// * `buf` - 至少 `inode_size` 字节
    /// * `inode_size` - 卷声明的 inode 记录大小
    pub fn decode(buf: &[u8], inode_size: u16) -> Self {
        let mut inode = Self {
            mode: LittleEndian::read_u16(&buf[0..]),
            uid: LittleEndian::read_u16(&buf[2..]),
            size_lo: LittleEndian::read_u32(&buf[4..]),
            atime: LittleEndian::read_u32(&buf[8..]),
            ctime: LittleEndian::read_u32(&buf[12..]),
            mtime: LittleEndian::read_u32(&buf[16..]),
            dtime: LittleEndian::read_u32(&buf[20..]),
            gid: LittleEndian::read_u16(&buf[24..]),
            links_count: LittleEndian::read_u16(&buf[26..]),
            blocks: LittleEndian::read_u32(&buf[28..]),
            flags: LittleEndian::read_u32(&buf[32..]),
            osd1: LittleEndian::read_u32(&buf[36..]),
            generation: LittleEndian::read_u32(&buf[100..]),
            file_acl: LittleEndian::read_u32(&buf[104..]),
            size_high: LittleEndian::read_u32(&buf[108..]),
            faddr: LittleEndian::read_u32(&buf[112..]),
            uid_high: LittleEndian::read_u16(&buf[120..]),
            gid_high: LittleEndian::read_u16(&buf[122..]),
            ..Default::default()
        };
        for (i, ptr) in inode.block.iter_mut().enumerate() {
            *ptr = LittleEndian::read_u32(&buf[40 + i * 4..]);
        }
        if inode_size >= EXT2_INODE_SIZE_WITH_NSEC {
            inode.extra_isize = LittleEndian::read_u16(&buf[128..]);
            if inode.extra_isize >= EXT2_EXTRA_ISIZE {
                inode.ctime_extra = LittleEndian::read_u32(&buf[132..]);
                inode.mtime_extra = LittleEndian::read_u32(&buf[136..]);
                inode.atime_extra = LittleEndian::read_u32(&buf[140..]);
                inode.crtime = LittleEndian::read_u32(&buf[144..]);
                inode.crtime_extra = LittleEndian::read_u32(&buf[148..]);
            }
        }
        inode
    }

    /// 编码到 inode 表切片
    pub fn encode(&self, buf: &mut [u8], inode_size: u16) {
        LittleEndian::write_u16(&mut buf[0..], self.mode);
        LittleEndian::write_u16(&mut buf[2..], self.uid);
        LittleEndian::write_u32(&mut buf[4..], self.size_lo);
        LittleEndian::write_u32(&mut buf[8..], self.atime);
        LittleEndian::write_u32(&mut buf[12..], self.ctime);
        LittleEndian::write_u32(&mut buf[16..], self.mtime);
        LittleEndian::write_u32(&mut buf[20..], self.dtime);
        LittleEndian::write_u16(&mut buf[24..], self.gid);
        LittleEndian::write_u16(&mut buf[26..], self.links_count);
        LittleEndian::write_u32(&mut buf[28..], self.blocks);
        LittleEndian::write_u32(&mut buf[32..], self.flags);
        LittleEndian::write_u32(&mut buf[36..], self.osd1);
        for (i, ptr) in self.block.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[40 + i * 4..], *ptr);
        }
        LittleEndian::write_u32(&mut buf[100..], self.generation);
        LittleEndian::write_u32(&mut buf[104..], self.file_acl);
        LittleEndian::write_u32(&mut buf[108..], self.size_high);
        LittleEndian::write_u32(&mut buf[112..], self.faddr);
        buf[116..120].fill(0);
        LittleEndian::write_u16(&mut buf[120..], self.uid_high);
        LittleEndian::write_u16(&mut buf[122..], self.gid_high);
        buf[124..128].fill(0);
        if inode_size >= EXT2_INODE_SIZE_WITH_NSEC {
            LittleEndian::write_u16(&mut buf[128..], self.extra_isize);
            LittleEndian::write_u16(&mut buf[130..], 0);
            if self.extra_isize >= EXT2_EXTRA_ISIZE {
                LittleEndian::write_u32(&mut buf[132..], self.ctime_extra);
                LittleEndian::write_u32(&mut buf[136..], self.mtime_extra);
                LittleEndian::write_u32(&mut buf[140..], self.atime_extra);
                LittleEndian::write_u32(&mut buf[144..], self.crtime);
                LittleEndian::write_u32(&mut buf[148..], self.crtime_extra);
            }
        }
    }

    /// 文件类型位
    pub fn file_type(&self) -> u32 {
        self.mode as u32 & S_IFMT
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    /// 是否为普通文件
    pub fn is_reg(&self) -> bool {
        self.file_type() == S_IFREG
    }

    /// 是否为符号链接
    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// 文件大小（普通文件使用高 32 位）
    pub fn size(&self) -> u64 {
        if self.is_reg() {
            self.size_lo as u64 | ((self.size_high as u64) << 32)
        } else {
            self.size_lo as u64
        }
    }

    /// 设置文件大小
    pub fn set_size(&mut self, size: u64) {
        self.size_lo = size as u32;
        if self.is_reg() {
            self.size_high = (size >> 32) as u32;
        }
    }

    /// 完整 UID
    pub fn uid(&self) -> u32 {
        self.uid as u32 | ((self.uid_high as u32) << 16)
    }

    /// 设置 UID
    pub fn set_uid(&mut self, uid: u32) {
        self.uid = uid as u16;
        self.uid_high = (uid >> 16) as u16;
    }

    /// 完整 GID
    pub fn gid(&self) -> u32 {
        self.gid as u32 | ((self.gid_high as u32) << 16)
    }

    /// 设置 GID
    pub fn set_gid(&mut self, gid: u32) {
        self.gid = gid as u16;
        self.gid_high = (gid >> 16) as u16;
    }

    fn has_nsec(&self) -> bool {
        self.extra_isize >= EXT2_EXTRA_ISIZE
    }

    /// 访问时间
    pub fn atime(&self) -> Timespec {
        decode_time(self.atime, self.atime_extra, self.has_nsec())
    }

    /// 修改时间
    pub fn mtime(&self) -> Timespec {
        decode_time(self.mtime, self.mtime_extra, self.has_nsec())
    }

    /// 状态改变时间
    pub fn ctime(&self) -> Timespec {
        decode_time(self.ctime, self.ctime_extra, self.has_nsec())
    }

    /// 设置访问时间
    pub fn set_atime(&mut self, t: Timespec) {
        self.atime = t.sec as u32;
        self.atime_extra = encode_nsec(t, self.has_nsec());
    }

    /// 设置修改时间
    pub fn set_mtime(&mut self, t: Timespec) {
        self.mtime = t.sec as u32;
        self.mtime_extra = encode_nsec(t, self.has_nsec());
    }

    /// 设置状态改变时间
    pub fn set_ctime(&mut self, t: Timespec) {
        self.ctime = t.sec as u32;
        self.ctime_extra = encode_nsec(t, self.has_nsec());
    }
}

fn decode_time(sec: u32, extra: u32, nsec: bool) -> Timespec {
    let nsec = if nsec { extra >> 2 } else { 0 };
    Timespec::new(sec as i32 as i64, nsec.min(999_999_999))
}

fn encode_nsec(t: Timespec, nsec: bool) -> u32 {
    if nsec {
        t.nsec << 2
    } else {
        0
    }
}

//=============================================================================
// 目录项
//=============================================================================

/// 目录项头部（8 字节，名字紧随其后）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ext2_dir_entry {
    pub inode: u32,    // 0: inode 号（0 表示墓碑）
    pub rec_len: u16,  // 4: 到下一个记录的跨度
    pub name_len: u8,  // 6: 名字长度
    pub file_type: u8, // 7: 文件类型提示
}

impl ext2_dir_entry {
    /// 解码头部
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            inode: LittleEndian::read_u32(&buf[0..]),
            rec_len: LittleEndian::read_u16(&buf[4..]),
            name_len: buf[6],
            file_type: buf[7],
        }
    }

    /// 编码头部
    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..], self.inode);
        LittleEndian::write_u16(&mut buf[4..], self.rec_len);
        buf[6] = self.name_len;
        buf[7] = self.file_type;
    }

    /// 容纳给定长度名字所需的最小记录长度（4 字节对齐）
    pub const fn record_len(name_len: usize) -> usize {
        (EXT2_DIR_ENTRY_HEADER_LEN + name_len + EXT2_DIR_ENTRY_ALIGN - 1) & !(EXT2_DIR_ENTRY_ALIGN - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_superblock_codec_identity() {
        let mut sb = ext2_sblock {
            inodes_count: 2048,
            blocks_count: 8192,
            free_blocks_count: 7000,
            free_inodes_count: 2037,
            first_data_block: 1,
            blocks_per_group: 8192,
            frags_per_group: 8192,
            inodes_per_group: 2048,
            magic: EXT2_SUPERBLOCK_MAGIC,
            state: EXT2_VALID_FS,
            errors: EXT2_ERRORS_CONTINUE,
            rev_level: EXT2_DYNAMIC_REV,
            first_ino: 11,
            inode_size: 256,
            feature_incompat: EXT2_FEATURE_INCOMPAT_FILETYPE,
            feature_ro_compat: EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER,
            ..Default::default()
        };
        sb.volume_name[..4].copy_from_slice(b"test");
        sb.uuid[0] = 0xAA;

        let mut raw = vec![0u8; EXT2_SUPERBLOCK_SIZE];
        sb.encode(&mut raw);
        assert_eq!(LittleEndian::read_u16(&raw[56..]), 0xEF53);
        let decoded = ext2_sblock::decode(&raw).unwrap();
        assert_eq!(decoded, sb);
        assert_eq!(decoded.block_size(), 1024);
        assert_eq!(decoded.group_count(), 1);
        assert_eq!(decoded.volume_label(), b"test");
    }

    #[test]
    fn test_default_superblock_is_zeroed() {
        let sb = ext2_sblock::default();
        let mut raw = vec![0xFFu8; EXT2_SUPERBLOCK_SIZE];
        sb.encode(&mut raw);
        assert!(raw[..200].iter().all(|&b| b == 0));
        assert_eq!(raw[200], 0xFF);
        assert!(sb.volume_label().is_empty());
        assert_eq!(sb.last_mounted, [0u8; 64]);
    }

    #[test]
    fn test_group_desc_codec_identity() {
        let gd = ext2_group_desc {
            block_bitmap: 3,
            inode_bitmap: 4,
            inode_table: 5,
            free_blocks_count: 100,
            free_inodes_count: 20,
            used_dirs_count: 2,
        };
        let mut raw = [0xFFu8; 32];
        gd.encode(&mut raw);
        assert!(raw[18..].iter().all(|&b| b == 0));
        assert_eq!(ext2_group_desc::decode(&raw), gd);
    }

    #[test]
    fn test_inode_codec_identity_with_nsec() {
        let mut inode = ext2_inode {
            mode: (S_IFREG | 0o644) as u16,
            links_count: 1,
            blocks: 8,
            extra_isize: EXT2_EXTRA_ISIZE,
            ..Default::default()
        };
        inode.set_uid(70_000);
        inode.set_gid(5);
        inode.set_size(5 << 32 | 17);
        inode.set_mtime(Timespec::new(1_700_000_000, 123_456_789));
        inode.block[0] = 42;
        inode.block[14] = 99;

        let mut raw = vec![0u8; 256];
        inode.encode(&mut raw, 256);
        let decoded = ext2_inode::decode(&raw, 256);
        assert_eq!(decoded, inode);
        assert_eq!(decoded.uid(), 70_000);
        assert_eq!(decoded.size(), 5 << 32 | 17);
        assert_eq!(decoded.mtime(), Timespec::new(1_700_000_000, 123_456_789));
    }

    #[test]
    fn test_small_inode_drops_nsec() {
        let mut inode = ext2_inode {
            mode: (S_IFDIR | 0o755) as u16,
            ..Default::default()
        };
        inode.set_ctime(Timespec::new(10, 500));
        let mut raw = vec![0u8; 128];
        inode.encode(&mut raw, 128);
        let decoded = ext2_inode::decode(&raw, 128);
        assert_eq!(decoded.ctime(), Timespec::new(10, 0));
    }

    #[test]
    fn test_dir_entry_record_len() {
        assert_eq!(ext2_dir_entry::record_len(1), 12);
        assert_eq!(ext2_dir_entry::record_len(4), 12);
        assert_eq!(ext2_dir_entry::record_len(8), 16);
        assert_eq!(ext2_dir_entry::record_len(255), 264);
    }
}
