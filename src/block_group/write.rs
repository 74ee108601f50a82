//! 块组描述符写入

use super::read::desc_location;
use crate::{
    block::DeviceId,
    cache::BlockCache,
    consts::EXT2_GROUP_DESC_SIZE,
    error::Result,
    superblock::Geometry,
    types::ext2_group_desc,
};

/// 把一个块组描述符编码进主描述符表所在的缓存块并标记为脏
pub fn store_descriptor(
    cache: &BlockCache,
    dev: DeviceId,
    geo: &Geometry,
    group: u32,
    desc: &ext2_group_desc,
) -> Result<()> {
    let (lba, offset) = desc_location(geo, group);
    let mut block = cache.get(dev, lba, geo.block_size as usize)?;
    block.with_data_mut(|data| desc.encode(&mut data[offset..offset + EXT2_GROUP_DESC_SIZE]));
    Ok(())
}

/// 把整张描述符表写到各个备份位置
///
/// 备份紧跟在每个带超级块的块组的备份 superblock 之后。
pub fn write_backup_descriptors(
    cache: &BlockCache,
    dev: DeviceId,
    geo: &Geometry,
    descs: &[ext2_group_desc],
) -> Result<()> {
    let bs = geo.block_size as usize;
    let per_block = geo.descs_per_block() as usize;

    for group in 1..geo.group_count {
        if !geo.group_has_super(group) {
            continue;
        }
        let base = geo.group_first_block(group) as u64 + 1;
        for (i, chunk) in descs.chunks(per_block).enumerate() {
            let mut block = cache.get_zero(dev, base + i as u64, bs)?;
            block.with_data_mut(|data| {
                for (j, desc) in chunk.iter().enumerate() {
                    let off = j * EXT2_GROUP_DESC_SIZE;
                    desc.encode(&mut data[off..off + EXT2_GROUP_DESC_SIZE]);
                }
            });
        }
    }
    Ok(())
}
