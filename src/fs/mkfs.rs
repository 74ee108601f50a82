//! 格式化
//!
//! 在块设备上创建一个新的 ext2 卷：修订版本 1，启用 sparse_super、large_file 与 filetype，
//! 根目录为 inode 2，可选创建 lost+found。直接写设备而不经过块缓存，
//! 调用者需在之后丢弃该设备的缓存内容。

use crate::{
    block::BlockDev,
    block_group::group_overhead,
    config::ErrorsPolicy,
    consts::*,
    dir::{init_dir_block, insert_in_block},
    error::{Error, ErrorKind, Result},
    hal::Timespec,
    superblock::{Geometry, Superblock},
    types::{ext2_group_desc, ext2_inode, ext2_sblock},
};
use alloc::vec;
use alloc::vec::Vec;

/// 格式化参数
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// 块大小（1024、2048 或 4096）
    pub block_size: u32,
    /// 每组块数（默认 8 × 块大小）
    pub blocks_per_group: Option<u32>,
    /// 每个 inode 对应的字节数
    pub bytes_per_inode: u32,
    /// inode 记录大小
    pub inode_size: u16,
    /// 卷标
    pub label: [u8; 16],
    /// 卷 UUID
    pub uuid: [u8; 16],
    /// 是否创建 lost+found
    pub lost_found: bool,
    /// 完整性错误策略
    pub errors: ErrorsPolicy,
    /// 写入各时间戳的时间
    pub now: Timespec,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_size: 1024,
            blocks_per_group: None,
            bytes_per_inode: 4096,
            inode_size: 256,
            label: [0; 16],
            uuid: [0; 16],
            lost_found: true,
            errors: ErrorsPolicy::Continue,
            now: Timespec::ZERO,
        }
    }
}

const LOST_FOUND_INO: u32 = EXT2_GOOD_OLD_FIRST_INO;

/// 在设备上创建文件系统
///
/// # 错误
///
/// - `InvalidInput` - 块大小或 inode 大小不合法
/// - `NoSpace` - 设备太小，放不下元数据
pub fn format(dev: &BlockDev, opts: &FormatOptions) -> Result<Geometry> {
    let bs = opts.block_size;
    if !(EXT2_MIN_BLOCK_SIZE..=EXT2_MAX_BLOCK_SIZE).contains(&bs) || !bs.is_power_of_two() {
        return Err(Error::new(ErrorKind::InvalidInput, "unsupported block size"));
    }
    if dev.is_read_only() {
        return Err(Error::new(ErrorKind::ReadOnly, "device is read-only"));
    }

    let raw = plan_superblock(dev.total_bytes(), opts)?;
    let sb = Superblock::from_raw(raw)?;
    let geo = sb.geometry();
    log::info!(
        "[MKFS] {} blocks of {} bytes, {} groups, {} inodes",
        geo.blocks_count,
        bs,
        geo.group_count,
        geo.inodes_count
    );

    let bsz = bs as usize;
    let zero = vec![0u8; bsz];
    let mut descs = Vec::with_capacity(geo.group_count as usize);

    // 位图和 inode 表
    for group in 0..geo.group_count {
        let first = geo.group_first_block(group);
        let meta = first + group_overhead(&geo, group);
        let desc = ext2_group_desc {
            block_bitmap: meta,
            inode_bitmap: meta + 1,
            inode_table: meta + 2,
            free_blocks_count: 0,
            free_inodes_count: geo.inodes_per_group as u16,
            used_dirs_count: 0,
        };
        let used = desc.inode_table + geo.inode_table_blocks - first;
        if used >= geo.blocks_in_group(group) {
            return Err(Error::new(ErrorKind::NoSpace, "group too small for its metadata"));
        }

        let mut bbitmap = vec![0u8; bsz];
        for bit in (0..used).chain(geo.blocks_in_group(group)..bs * 8) {
            crate::bitmap::set_bit(&mut bbitmap, bit)?;
        }
        dev.write_block(desc.block_bitmap as u64, &bbitmap)?;

        let mut ibitmap = vec![0u8; bsz];
        crate::bitmap::set_bits(&mut ibitmap, geo.inodes_per_group, bs * 8 - geo.inodes_per_group)?;
        dev.write_block(desc.inode_bitmap as u64, &ibitmap)?;

        for i in 0..geo.inode_table_blocks {
            dev.write_block((desc.inode_table + i) as u64, &zero)?;
        }

        let mut desc = desc;
        desc.free_blocks_count = (geo.blocks_in_group(group) - used) as u16;
        descs.push(desc);
    }

    // 组 0：保留 inode、根目录和 lost+found
    let g0 = descs[0];
    let mut ibitmap = vec![0u8; bsz];
    dev.read_block(g0.inode_bitmap as u64, &mut ibitmap)?;
    crate::bitmap::set_bits(&mut ibitmap, 0, geo.first_ino - 1)?;
    let mut reserved_inodes = geo.first_ino - 1;
    if opts.lost_found {
        crate::bitmap::set_bit(&mut ibitmap, LOST_FOUND_INO - 1)?;
        reserved_inodes += 1;
    }
    dev.write_block(g0.inode_bitmap as u64, &ibitmap)?;

    let mut bbitmap = vec![0u8; bsz];
    dev.read_block(g0.block_bitmap as u64, &mut bbitmap)?;
    let data_start = g0.inode_table + geo.inode_table_blocks;
    let root_block = data_start;
    crate::bitmap::set_bit(&mut bbitmap, root_block - geo.first_data_block)?;
    let mut used_blocks = 1;
    let lf_block = root_block + 1;
    if opts.lost_found {
        crate::bitmap::set_bit(&mut bbitmap, lf_block - geo.first_data_block)?;
        used_blocks += 1;
    }
    dev.write_block(g0.block_bitmap as u64, &bbitmap)?;

    let mut root_data = vec![0u8; bsz];
    init_dir_block(&mut root_data, EXT2_ROOT_INO, EXT2_ROOT_INO, EXT2_FT_DIR);
    let mut root_links = 2;
    if opts.lost_found {
        insert_in_block(&mut root_data, b"lost+found", LOST_FOUND_INO, EXT2_FT_DIR)?;
        root_links += 1;
        let mut lf_data = vec![0u8; bsz];
        init_dir_block(&mut lf_data, LOST_FOUND_INO, EXT2_ROOT_INO, EXT2_FT_DIR);
        dev.write_block(lf_block as u64, &lf_data)?;
        write_dir_inode(dev, &geo, &g0, LOST_FOUND_INO, 0o700, 2, lf_block, opts.now)?;
    }
    dev.write_block(root_block as u64, &root_data)?;
    write_dir_inode(dev, &geo, &g0, EXT2_ROOT_INO, 0o755, root_links, root_block, opts.now)?;

    descs[0].free_inodes_count -= reserved_inodes as u16;
    descs[0].free_blocks_count -= used_blocks;
    descs[0].used_dirs_count = if opts.lost_found { 2 } else { 1 };

    // 描述符表（主表与备份）
    let mut gdt = vec![0u8; geo.gdt_blocks as usize * bsz];
    for (i, desc) in descs.iter().enumerate() {
        desc.encode(&mut gdt[i * EXT2_GROUP_DESC_SIZE..]);
    }

    // superblock（主与备份）
    let mut raw = *sb.inner();
    raw.free_blocks_count = descs.iter().map(|d| d.free_blocks_count as u32).sum();
    raw.free_inodes_count = descs.iter().map(|d| d.free_inodes_count as u32).sum();

    for group in 0..geo.group_count {
        if !geo.group_has_super(group) {
            continue;
        }
        let first = geo.group_first_block(group);
        let mut copy = raw;
        copy.block_group_nr = group as u16;
        let mut sb_bytes = vec![0u8; EXT2_SUPERBLOCK_SIZE];
        copy.encode(&mut sb_bytes);
        if group == 0 {
            dev.write_bytes(EXT2_SUPERBLOCK_OFFSET, &sb_bytes)?;
        } else {
            let mut block = vec![0u8; bsz];
            block[..EXT2_SUPERBLOCK_SIZE].copy_from_slice(&sb_bytes);
            dev.write_block(first as u64, &block)?;
        }
        for (i, chunk) in gdt.chunks(bsz).enumerate() {
            dev.write_block((first + 1 + i as u32) as u64, chunk)?;
        }
    }

    dev.flush()?;
    Ok(geo)
}

/// 由设备大小推出 superblock
fn plan_superblock(total_bytes: u64, opts: &FormatOptions) -> Result<ext2_sblock> {
    let bs = opts.block_size;
    let isz = opts.inode_size;
    if !isz.is_power_of_two() || isz < EXT2_GOOD_OLD_INODE_SIZE || isz as u32 > bs {
        return Err(Error::new(ErrorKind::InvalidInput, "unsupported inode size"));
    }

    let first_data_block = if bs == EXT2_MIN_BLOCK_SIZE { 1 } else { 0 };
    let mut blocks = (total_bytes / bs as u64).min(u32::MAX as u64) as u32;
    let bpg = opts.blocks_per_group.unwrap_or(bs * 8).clamp(256, bs * 8);
    if blocks < first_data_block + 64 {
        return Err(Error::new(ErrorKind::NoSpace, "device too small"));
    }

    let mut groups = (blocks - first_data_block).div_ceil(bpg);
    // 最后一组太小时舍弃
    let last = blocks - first_data_block - (groups - 1) * bpg;
    if groups > 1 && last < 64 {
        groups -= 1;
        blocks = first_data_block + groups * bpg;
    }

    let inodes_per_block = bs / isz as u32;
    let wanted = (blocks as u64 * bs as u64 / opts.bytes_per_inode.max(1024) as u64) as u32;
    let ipg = wanted
        .div_ceil(groups)
        .max(EXT2_GOOD_OLD_FIRST_INO + 5)
        .next_multiple_of(inodes_per_block.max(8))
        .min(bs * 8);

    let raw = ext2_sblock {
        inodes_count: ipg * groups,
        blocks_count: blocks,
        r_blocks_count: 0,
        first_data_block,
        log_block_size: (bs / EXT2_MIN_BLOCK_SIZE).trailing_zeros(),
        log_frag_size: (bs / EXT2_MIN_BLOCK_SIZE).trailing_zeros(),
        blocks_per_group: bpg,
        frags_per_group: bpg,
        inodes_per_group: ipg,
        mtime: 0,
        wtime: opts.now.sec as u32,
        max_mnt_count: u16::MAX,
        magic: EXT2_SUPERBLOCK_MAGIC,
        state: EXT2_VALID_FS,
        errors: opts.errors.to_raw(),
        lastcheck: opts.now.sec as u32,
        creator_os: EXT2_OS_LINUX,
        rev_level: EXT2_DYNAMIC_REV,
        first_ino: EXT2_GOOD_OLD_FIRST_INO,
        inode_size: isz,
        feature_incompat: EXT2_FEATURE_INCOMPAT_FILETYPE,
        feature_ro_compat: EXT2_FEATURE_RO_COMPAT_SPARSE_SUPER | EXT2_FEATURE_RO_COMPAT_LARGE_FILE,
        uuid: opts.uuid,
        volume_name: opts.label,
        ..Default::default()
    };
    Ok(raw)
}

#[allow(clippy::too_many_arguments)]
fn write_dir_inode(
    dev: &BlockDev,
    geo: &Geometry,
    g0: &ext2_group_desc,
    ino: u32,
    perm: u32,
    links: u16,
    block: u32,
    now: Timespec,
) -> Result<()> {
    let mut inode = ext2_inode {
        mode: (S_IFDIR | perm) as u16,
        links_count: links,
        blocks: geo.block_size / EXT2_IBLOCK_UNIT as u32,
        extra_isize: if geo.inode_size >= EXT2_INODE_SIZE_WITH_NSEC { EXT2_EXTRA_ISIZE } else { 0 },
        ..Default::default()
    };
    inode.set_size(geo.block_size as u64);
    inode.set_atime(now);
    inode.set_mtime(now);
    inode.set_ctime(now);
    inode.block[0] = block;

    let (_, idx) = geo.ino_to_group(ino);
    let byte = idx as u64 * geo.inode_size as u64;
    let lba = g0.inode_table as u64 + byte / geo.block_size as u64;
    let off = (byte % geo.block_size as u64) as usize;

    let mut buf = vec![0u8; geo.block_size as usize];
    dev.read_block(lba, &mut buf)?;
    inode.encode(&mut buf[off..off + geo.inode_size as usize], geo.inode_size);
    dev.write_block(lba, &buf)
}
