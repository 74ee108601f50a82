//! 运行期块组描述符表
//!
//! 每个块组描述符由独立的互斥锁保护；分配器持锁修改位图和计数，
//! 再把描述符编码回缓存中的主描述符表。superblock 的空闲计数在同步时由这里汇总。

use super::{load_descriptors, store_descriptor, write_backup_descriptors};
use crate::{
    block::DeviceId,
    cache::BlockCache,
    error::Result,
    superblock::Geometry,
    sync::{Mutex, MutexGuard},
    types::ext2_group_desc,
};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 块组描述符表
pub struct GroupTable {
    cache: Arc<BlockCache>,
    dev: DeviceId,
    geo: Geometry,
    descs: Vec<Mutex<ext2_group_desc>>,
}

impl GroupTable {
    /// 从设备加载描述符表
    pub fn load(cache: Arc<BlockCache>, dev: DeviceId, geo: Geometry) -> Result<Self> {
        let descs = load_descriptors(&cache, dev, &geo)?
            .into_iter()
            .map(Mutex::new)
            .collect();
        Ok(Self { cache, dev, geo, descs })
    }

    /// 块缓存
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// 设备标识
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    /// 几何参数
    pub fn geo(&self) -> &Geometry {
        &self.geo
    }

    /// 块组数
    pub fn count(&self) -> u32 {
        self.descs.len() as u32
    }

    /// 锁定一个块组描述符
    pub fn lock(&self, group: u32) -> MutexGuard<'_, ext2_group_desc> {
        self.descs[group as usize].lock()
    }

    /// 把（已持锁修改过的）描述符写回主描述符表
    pub fn store(&self, group: u32, desc: &ext2_group_desc) -> Result<()> {
        store_descriptor(&self.cache, self.dev, &self.geo, group, desc)
    }

    /// 所有描述符的快照
    pub fn snapshot(&self) -> Vec<ext2_group_desc> {
        self.descs.iter().map(|d| *d.lock()).collect()
    }

    /// 汇总空闲块与空闲 inode 数
    pub fn free_totals(&self) -> (u32, u32) {
        self.descs.iter().fold((0, 0), |(b, i), d| {
            let d = d.lock();
            (b + d.free_blocks_count as u32, i + d.free_inodes_count as u32)
        })
    }

    /// 写所有描述符表备份
    pub fn write_backups(&self) -> Result<()> {
        write_backup_descriptors(&self.cache, self.dev, &self.geo, &self.snapshot())
    }
}
