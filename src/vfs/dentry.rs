//! 目录项缓存
//!
//! 每个 [`Dentry`] 把父目录下的一个名字绑定到一个 inode，或者记录"不存在"（负项）。
//! 父目录持有子项表中的强引用，子项只持有指向父目录的弱引用；
//! 挂载记录持有它的根目录项，打开的文件持有它命名的目录项。
//!
//! 子项表由读写锁保护，另配一个序列计数器：修改子项表的写者在锁内递增计数；
//! 查找未命中后去文件系统查询的读者，只在计数未变化时才把结果放进缓存，
//! 这样与之并发的创建、删除不会被一个过时的结果覆盖。

use super::ops::InodeOps;
use crate::fs::InodeType;
use crate::sync::{RwLock, SeqCount};
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::borrow::Borrow;
use core::cmp::Ordering as CmpOrdering;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// 内联保存的名字长度上限
const INLINE_NAME_LEN: usize = 32;

bitflags::bitflags! {
    /// 目录项状态
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DentryFlags: u32 {
        /// 名字不存在
        const NEGATIVE = 1 << 0;
        /// 上面挂载着别的卷
        const MOUNTED = 1 << 1;
        /// 已从父目录中删除
        const STALE = 1 << 2;
    }
}

/// 目录项名字：短名字内联，长名字放在堆上
#[derive(Clone)]
pub enum DentryName {
    /// 内联
    Inline {
        /// 长度
        len: u8,
        /// 内容
        bytes: [u8; INLINE_NAME_LEN],
    },
    /// 堆分配
    Heap(Vec<u8>),
}

impl DentryName {
    /// 由字节串构造
    pub fn new(name: &[u8]) -> Self {
        if name.len() <= INLINE_NAME_LEN {
            let mut bytes = [0u8; INLINE_NAME_LEN];
            bytes[..name.len()].copy_from_slice(name);
            DentryName::Inline { len: name.len() as u8, bytes }
        } else {
            DentryName::Heap(name.to_vec())
        }
    }

    /// 名字字节
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DentryName::Inline { len, bytes } => &bytes[..*len as usize],
            DentryName::Heap(v) => v,
        }
    }

    /// 是否内联保存
    pub fn is_inline(&self) -> bool {
        matches!(self, DentryName::Inline { .. })
    }
}

impl PartialEq for DentryName {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for DentryName {}

impl PartialOrd for DentryName {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DentryName {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Borrow<[u8]> for DentryName {
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for DentryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "{:x?}", self.as_bytes()),
        }
    }
}

/// 目录项
pub struct Dentry {
    name: RwLock<DentryName>,
    parent: RwLock<Weak<Dentry>>,
    inode: Option<Arc<dyn InodeOps>>,
    flags: AtomicU32,
    mounts: AtomicUsize,
    children: RwLock<BTreeMap<DentryName, Arc<Dentry>>>,
    seq: SeqCount,
}

impl Dentry {
    fn build(name: &[u8], parent: Weak<Dentry>, inode: Option<Arc<dyn InodeOps>>) -> Arc<Self> {
        let flags = if inode.is_none() { DentryFlags::NEGATIVE } else { DentryFlags::empty() };
        Arc::new(Self {
            name: RwLock::new(DentryName::new(name)),
            parent: RwLock::new(parent),
            inode,
            flags: AtomicU32::new(flags.bits()),
            mounts: AtomicUsize::new(0),
            children: RwLock::new(BTreeMap::new()),
            seq: SeqCount::new(),
        })
    }

    /// 卷的根目录项
    pub fn new_root(inode: Arc<dyn InodeOps>) -> Arc<Self> {
        Self::build(b"/", Weak::new(), Some(inode))
    }

    /// 不进入父目录子项表的目录项（无名 inode）
    pub fn new_unhashed(parent: &Arc<Dentry>, name: &[u8], inode: Arc<dyn InodeOps>) -> Arc<Self> {
        Self::build(name, Arc::downgrade(parent), Some(inode))
    }

    /// 名字
    pub fn name(&self) -> Vec<u8> {
        self.name.read().as_bytes().to_vec()
    }

    /// 父目录；卷根返回 `None`
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.parent.read().upgrade()
    }

    /// 绑定的 inode；负项返回 `None`
    pub fn inode(&self) -> Option<&Arc<dyn InodeOps>> {
        self.inode.as_ref()
    }

    /// 状态标志
    pub fn flags(&self) -> DentryFlags {
        DentryFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// 是否为负项
    pub fn is_negative(&self) -> bool {
        self.inode.is_none()
    }

    /// 是否已被删除
    pub fn is_stale(&self) -> bool {
        self.flags().contains(DentryFlags::STALE)
    }

    /// 上面是否挂载着别的卷
    pub fn is_mounted(&self) -> bool {
        self.flags().contains(DentryFlags::MOUNTED)
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        self.inode.as_ref().map_or(false, |i| i.node_type() == InodeType::Directory)
    }

    fn set_flag(&self, flag: DentryFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    fn clear_flag(&self, flag: DentryFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    /// 记录一次挂载
    pub(crate) fn mount_added(&self) {
        self.mounts.fetch_add(1, Ordering::AcqRel);
        self.set_flag(DentryFlags::MOUNTED);
    }

    /// 撤销一次挂载
    pub(crate) fn mount_removed(&self) {
        if self.mounts.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.clear_flag(DentryFlags::MOUNTED);
        }
    }

    /// 子项表的当前序列号（开始一次未命中查询前调用）
    pub fn begin_lookup(&self) -> u32 {
        self.seq.read_begin()
    }

    /// 查询缓存中的子项
    pub fn lookup_cached(&self, name: &[u8]) -> Option<Arc<Dentry>> {
        loop {
            let start = self.seq.read_begin();
            let hit = self.children.read().get(name).cloned();
            if !self.seq.read_retry(start) {
                return hit;
            }
        }
    }

    /// 把一次文件系统查询的结果放进缓存
    ///
    /// 已有缓存项时返回缓存项；`seq` 之后子项表被改过时结果不入缓存，
    /// 返回一个只挂着父指针的目录项。
    pub fn cache_lookup_result(
        self: &Arc<Self>,
        name: &[u8],
        inode: Option<Arc<dyn InodeOps>>,
        seq: u32,
    ) -> Arc<Dentry> {
        let mut children = self.children.write();
        if let Some(existing) = children.get(name) {
            return existing.clone();
        }
        let child = Self::build(name, Arc::downgrade(self), inode);
        if !self.seq.read_retry(seq) {
            self.seq.write_begin();
            children.insert(DentryName::new(name), child.clone());
            self.seq.write_end();
        }
        child
    }

    /// 绑定新建的子项，替换原有的负项
    pub fn bind_child(self: &Arc<Self>, name: &[u8], inode: Arc<dyn InodeOps>) -> Arc<Dentry> {
        let mut children = self.children.write();
        if let Some(existing) = children.get(name) {
            if existing.inode.as_ref().map(|i| i.ino()) == Some(inode.ino()) {
                return existing.clone();
            }
        }
        let child = Self::build(name, Arc::downgrade(self), Some(inode));
        self.seq.write_begin();
        if let Some(old) = children.insert(DentryName::new(name), child.clone()) {
            if !old.is_negative() {
                old.set_flag(DentryFlags::STALE);
            }
        }
        self.seq.write_end();
        child
    }

    /// 删除子项并标记为失效
    pub fn drop_child(&self, name: &[u8]) -> Option<Arc<Dentry>> {
        let mut children = self.children.write();
        self.seq.write_begin();
        let removed = children.remove(name);
        self.seq.write_end();
        if let Some(d) = &removed {
            d.set_flag(DentryFlags::STALE);
        }
        removed
    }

    /// 丢弃一个缓存项但不标记失效（用于 rename 后让名字重新查询）
    pub fn forget_child(&self, name: &[u8]) -> Option<Arc<Dentry>> {
        let mut children = self.children.write();
        self.seq.write_begin();
        let removed = children.remove(name);
        self.seq.write_end();
        removed
    }

    /// 把子项从一个父目录移到另一个父目录
    ///
    /// 调用者持有全局重命名锁。`exchange` 时两个名字互换；否则目标位置原有的
    /// 缓存项被标记为失效。
    pub fn move_child(
        old_parent: &Arc<Dentry>,
        old_name: &[u8],
        new_parent: &Arc<Dentry>,
        new_name: &[u8],
        exchange: bool,
    ) {
        let moving = old_parent.forget_child(old_name);
        let displaced = new_parent.forget_child(new_name);

        if let Some(d) = &moving {
            *d.name.write() = DentryName::new(new_name);
            *d.parent.write() = Arc::downgrade(new_parent);
            if !d.is_negative() {
                new_parent.insert_child(d.clone());
            }
        }
        if let Some(d) = displaced {
            if exchange {
                *d.name.write() = DentryName::new(old_name);
                *d.parent.write() = Arc::downgrade(old_parent);
                old_parent.insert_child(d);
            } else if !d.is_negative() {
                d.set_flag(DentryFlags::STALE);
            }
        }
    }

    fn insert_child(&self, child: Arc<Dentry>) {
        let name = child.name.read().clone();
        let mut children = self.children.write();
        self.seq.write_begin();
        children.insert(name, child);
        self.seq.write_end();
    }

    /// 缓存的子项数
    pub fn cached_children(&self) -> usize {
        self.children.read().len()
    }

    /// 回收没有外部引用的子树
    ///
    /// 负项、以及只被子项表引用、没有子项且没有挂载的正项被移出缓存。
    ///
    /// # 返回
    ///
    /// 回收的目录项数
    pub fn prune(&self) -> usize {
        let candidates: Vec<Arc<Dentry>> = self.children.read().values().cloned().collect();
        let mut pruned = 0;
        for child in &candidates {
            pruned += child.prune();
        }
        drop(candidates);

        let mut children = self.children.write();
        self.seq.write_begin();
        let before = children.len();
        children.retain(|_, child| {
            child.is_mounted() || (!child.is_negative() && (Arc::strong_count(child) > 1 || child.cached_children() > 0))
        });
        pruned += before - children.len();
        self.seq.write_end();
        pruned
    }
}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dentry")
            .field("name", &*self.name.read())
            .field("ino", &self.inode.as_ref().map(|i| i.ino()))
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::fs::FileAttr;
    use core::any::Any;

    struct Node(u64, InodeType);

    impl InodeOps for Node {
        fn ino(&self) -> u64 {
            self.0
        }
        fn device_id(&self) -> u64 {
            1
        }
        fn node_type(&self) -> InodeType {
            self.1
        }
        fn stat(&self) -> Result<FileAttr> {
            Ok(FileAttr::default())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn dir(ino: u64) -> Arc<dyn InodeOps> {
        Arc::new(Node(ino, InodeType::Directory))
    }

    #[test]
    fn test_name_inline_and_heap() {
        assert!(DentryName::new(&[b'a'; 32]).is_inline());
        let long = DentryName::new(&[b'b'; 33]);
        assert!(!long.is_inline());
        assert_eq!(long.as_bytes().len(), 33);
        assert_eq!(DentryName::new(b"x"), DentryName::new(b"x"));
    }

    #[test]
    fn test_stale_lookup_result_not_cached() {
        let root = Dentry::new_root(dir(2));
        let seq = root.begin_lookup();
        root.bind_child(b"a", dir(3));
        let stale = root.cache_lookup_result(b"b", None, seq);
        assert!(stale.is_negative());
        assert!(root.lookup_cached(b"b").is_none());

        let seq = root.begin_lookup();
        root.cache_lookup_result(b"b", None, seq);
        assert!(root.lookup_cached(b"b").unwrap().is_negative());
    }

    #[test]
    fn test_bind_replaces_negative_and_drop_marks_stale() {
        let root = Dentry::new_root(dir(2));
        let seq = root.begin_lookup();
        root.cache_lookup_result(b"a", None, seq);
        let a = root.bind_child(b"a", dir(3));
        assert_eq!(root.lookup_cached(b"a").unwrap().inode().unwrap().ino(), 3);
        assert_eq!(a.parent().unwrap().inode().unwrap().ino(), 2);

        let removed = root.drop_child(b"a").unwrap();
        assert!(removed.is_stale());
        assert!(root.lookup_cached(b"a").is_none());
    }

    #[test]
    fn test_move_and_exchange() {
        let root = Dentry::new_root(dir(2));
        let d1 = root.bind_child(b"d1", dir(3));
        let d2 = root.bind_child(b"d2", dir(4));
        let f = d1.bind_child(b"f", dir(5));

        Dentry::move_child(&d1, b"f", &d2, b"g", false);
        assert!(d1.lookup_cached(b"f").is_none());
        assert_eq!(f.name(), b"g".to_vec());
        assert_eq!(f.parent().unwrap().inode().unwrap().ino(), 4);

        Dentry::move_child(&root, b"d1", &root, b"d2", true);
        assert_eq!(root.lookup_cached(b"d2").unwrap().inode().unwrap().ino(), 3);
        assert_eq!(root.lookup_cached(b"d1").unwrap().inode().unwrap().ino(), 4);
    }

    #[test]
    fn test_prune_keeps_pinned_entries() {
        let root = Dentry::new_root(dir(2));
        let pinned = root.bind_child(b"keep", dir(3));
        root.bind_child(b"drop", dir(4));
        let seq = root.begin_lookup();
        root.cache_lookup_result(b"neg", None, seq);
        assert_eq!(root.prune(), 2);
        assert!(root.lookup_cached(b"keep").is_some());
        drop(pinned);
        assert_eq!(root.prune(), 1);
        assert_eq!(root.cached_children(), 0);
    }
}
