//! 文件系统事件监视
//!
//! 监视实例（[`WatchInstance`]）是一个可以读出事件记录的描述符，它在若干个 inode
//! 上登记感兴趣的事件。登记表（[`WatchRegistry`]）按 `(设备号, inode 号)` 分区，
//! 派发一个事件只需查找这个 inode 自己的登记项。
//!
//! 锁顺序：登记表锁在前，实例锁在后。派发时先在登记表读锁下收集目标，
//! 释放后再逐个把事件放进实例队列。
//!
//! 读出的记录格式（本机字节序）：
//!
//! ```text
//! +--------+--------+--------+--------+----------------------+
//! | wd i32 |mask u32|cookie  | len u32| name + NUL 填充到 16 |
//! +--------+--------+--------+--------+----------------------+
//! ```

use super::file::File;
use crate::config::FsConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::hal::SystemHal;
use crate::sync::{Mutex, RwLock, WaitQueue};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use byteorder::{ByteOrder, NativeEndian};
use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

bitflags::bitflags! {
    /// 事件掩码
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WatchMask: u32 {
        /// 被读取
        const ACCESS = 0x0000_0001;
        /// 被写入
        const MODIFY = 0x0000_0002;
        /// 属性改变
        const ATTRIB = 0x0000_0004;
        /// 可写描述符关闭
        const CLOSE_WRITE = 0x0000_0008;
        /// 只读描述符关闭
        const CLOSE_NOWRITE = 0x0000_0010;
        /// 被打开
        const OPEN = 0x0000_0020;
        /// 从目录中移出
        const MOVED_FROM = 0x0000_0040;
        /// 移入目录
        const MOVED_TO = 0x0000_0080;
        /// 目录中创建了项
        const CREATE = 0x0000_0100;
        /// 目录中删除了项
        const DELETE = 0x0000_0200;
        /// 被监视对象本身被删除
        const DELETE_SELF = 0x0000_0400;
        /// 被监视对象本身被移动
        const MOVE_SELF = 0x0000_0800;
        /// 所在卷被卸载
        const UNMOUNT = 0x0000_2000;
        /// 队列溢出
        const Q_OVERFLOW = 0x0000_4000;
        /// 登记被撤销
        const IGNORED = 0x0000_8000;
        /// 只监视目录
        const ONLYDIR = 0x0100_0000;
        /// 不跟随符号链接
        const DONT_FOLLOW = 0x0200_0000;
        /// 不报告已删除子项的事件
        const EXCL_UNLINK = 0x0400_0000;
        /// 与已有掩码合并
        const MASK_ADD = 0x2000_0000;
        /// 事件对象是目录
        const ISDIR = 0x4000_0000;
        /// 只触发一次
        const ONESHOT = 0x8000_0000;

        /// 全部可登记的事件
        const ALL_EVENTS = 0x0000_0fff;
        /// 两种关闭事件
        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
        /// 两种移动事件
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();
    }
}

bitflags::bitflags! {
    /// 监视实例标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WatchFlags: u32 {
        /// exec 时关闭
        const CLOEXEC = 0o2000000;
        /// 非阻塞读取
        const NONBLOCK = 0o4000;
    }
}

/// 登记键：`(设备号, inode 号)`
pub type WatchKey = (u64, u64);

/// 记录头长度
pub const EVENT_HEADER_LEN: usize = 16;

/// 一条排队的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// 登记描述符；溢出记录为 -1
    pub wd: i32,
    /// 事件掩码
    pub mask: WatchMask,
    /// 移动配对 cookie
    pub cookie: u32,
    /// 目录中子项的名字
    pub name: Vec<u8>,
}

impl WatchEvent {
    fn padded_name_len(&self) -> usize {
        if self.name.is_empty() {
            0
        } else {
            (self.name.len() + 1 + 15) & !15
        }
    }

    /// 编码后的记录长度
    pub fn record_len(&self) -> usize {
        EVENT_HEADER_LEN + self.padded_name_len()
    }

    fn encode(&self, out: &mut [u8]) {
        let len = self.padded_name_len();
        NativeEndian::write_i32(&mut out[0..4], self.wd);
        NativeEndian::write_u32(&mut out[4..8], self.mask.bits());
        NativeEndian::write_u32(&mut out[8..12], self.cookie);
        NativeEndian::write_u32(&mut out[12..16], len as u32);
        let body = &mut out[EVENT_HEADER_LEN..EVENT_HEADER_LEN + len];
        body.fill(0);
        body[..self.name.len()].copy_from_slice(&self.name);
    }

    /// 解析一段读出的记录
    pub fn decode_all(mut buf: &[u8]) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while buf.len() >= EVENT_HEADER_LEN {
            let len = NativeEndian::read_u32(&buf[12..16]) as usize;
            if buf.len() < EVENT_HEADER_LEN + len {
                break;
            }
            let raw = &buf[EVENT_HEADER_LEN..EVENT_HEADER_LEN + len];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            events.push(WatchEvent {
                wd: NativeEndian::read_i32(&buf[0..4]),
                mask: WatchMask::from_bits_retain(NativeEndian::read_u32(&buf[4..8])),
                cookie: NativeEndian::read_u32(&buf[8..12]),
                name: raw[..end].to_vec(),
            });
            buf = &buf[EVENT_HEADER_LEN + len..];
        }
        events
    }
}

struct Watcher {
    instance: Weak<WatchInstance>,
    wd: i32,
    mask: WatchMask,
}

impl Watcher {
    fn wants(&self, event: WatchMask, unlinked_child: bool) -> bool {
        if unlinked_child && self.mask.contains(WatchMask::EXCL_UNLINK) {
            return false;
        }
        let interest = self.mask & WatchMask::ALL_EVENTS;
        if event.intersects(WatchMask::MOVE) && interest.intersects(WatchMask::MOVE) {
            return true;
        }
        interest.intersects(event & WatchMask::ALL_EVENTS)
    }

    fn is(&self, inst: &WatchInstance, wd: i32) -> bool {
        self.wd == wd && core::ptr::eq(self.instance.as_ptr(), inst)
    }
}

/// 事件登记表
pub struct WatchRegistry {
    regs: RwLock<BTreeMap<WatchKey, Vec<Watcher>>>,
    cookie: AtomicU32,
}

impl WatchRegistry {
    /// 空登记表
    pub fn new() -> Self {
        Self {
            regs: RwLock::new(BTreeMap::new()),
            cookie: AtomicU32::new(0),
        }
    }

    /// 为一对移动事件分配 cookie（单调递增，不为 0）
    pub fn next_cookie(&self) -> u32 {
        self.cookie.fetch_add(1, Ordering::Relaxed).wrapping_add(1).max(1)
    }

    /// 登记的 inode 数
    pub fn watched_inodes(&self) -> usize {
        self.regs.read().len()
    }

    /// 向 `key` 上的登记派发事件
    ///
    /// `name` 为目录中子项的名字；`unlinked_child` 表示子项已被删除，
    /// 带 `EXCL_UNLINK` 的登记不会收到。
    pub fn notify(&self, key: WatchKey, mask: WatchMask, cookie: u32, name: &[u8], unlinked_child: bool) {
        let targets: Vec<(Arc<WatchInstance>, i32, WatchMask)> = {
            let regs = self.regs.read();
            let Some(list) = regs.get(&key) else {
                return;
            };
            list.iter()
                .filter(|w| w.wants(mask, unlinked_child))
                .filter_map(|w| w.instance.upgrade().map(|inst| (inst, w.wd, w.mask)))
                .collect()
        };

        for (inst, wd, reg_mask) in targets {
            inst.deliver(WatchEvent { wd, mask, cookie, name: name.to_vec() });
            if reg_mask.contains(WatchMask::ONESHOT) {
                self.drop_registration(key, &inst, wd);
            }
        }
    }

    fn drop_registration(&self, key: WatchKey, inst: &WatchInstance, wd: i32) {
        {
            let mut regs = self.regs.write();
            let mut st = inst.state.lock();
            if st.regs.remove(&wd).is_none() {
                return;
            }
            if let Some(list) = regs.get_mut(&key) {
                list.retain(|w| !w.is(inst, wd));
                if list.is_empty() {
                    regs.remove(&key);
                }
            }
            inst.push_locked(&mut st, WatchEvent { wd, mask: WatchMask::IGNORED, cookie: 0, name: Vec::new() });
        }
        inst.wait.wake_all();
    }

    /// 被监视的 inode 已被删除：送出 `DELETE_SELF`（若登记了）与 `IGNORED`，撤销全部登记
    pub fn inode_gone(&self, key: WatchKey) {
        self.revoke(|k| *k == key, WatchMask::DELETE_SELF, false);
    }

    /// 设备已卸载：对其上全部登记送出 `UNMOUNT` 与 `IGNORED`
    pub fn device_gone(&self, device: u64) {
        self.revoke(|k| k.0 == device, WatchMask::UNMOUNT, true);
    }

    fn revoke<F>(&self, matches: F, first: WatchMask, always: bool)
    where
        F: Fn(&WatchKey) -> bool,
    {
        let mut touched: Vec<Arc<WatchInstance>> = Vec::new();
        {
            let mut regs = self.regs.write();
            let keys: Vec<WatchKey> = regs.keys().filter(|k| matches(k)).copied().collect();
            for key in keys {
                let Some(list) = regs.remove(&key) else {
                    continue;
                };
                for w in list {
                    let Some(inst) = w.instance.upgrade() else {
                        continue;
                    };
                    {
                        let mut st = inst.state.lock();
                        st.regs.remove(&w.wd);
                        if always || w.mask.contains(first) {
                            inst.push_locked(&mut st, WatchEvent { wd: w.wd, mask: first, cookie: 0, name: Vec::new() });
                        }
                        inst.push_locked(
                            &mut st,
                            WatchEvent { wd: w.wd, mask: WatchMask::IGNORED, cookie: 0, name: Vec::new() },
                        );
                    }
                    touched.push(inst);
                }
                log::debug!("[WATCH] registrations on {:?} revoked ({:?})", key, first);
            }
        }
        for inst in &touched {
            inst.wait.wake_all();
        }
    }

    fn purge_dead(&self, keys: &[WatchKey]) {
        let mut regs = self.regs.write();
        for key in keys {
            if let Some(list) = regs.get_mut(key) {
                list.retain(|w| w.instance.strong_count() > 0);
                if list.is_empty() {
                    regs.remove(key);
                }
            }
        }
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct InstanceState {
    queue: VecDeque<WatchEvent>,
    bytes: usize,
    overflow: bool,
    next_wd: i32,
    regs: BTreeMap<i32, WatchKey>,
}

/// 监视实例
pub struct WatchInstance {
    me: Weak<WatchInstance>,
    registry: Arc<WatchRegistry>,
    hal: Arc<dyn SystemHal>,
    state: Mutex<InstanceState>,
    wait: WaitQueue,
    nonblocking: AtomicBool,
    max_events: usize,
    max_bytes: usize,
    max_regs: usize,
}

impl WatchInstance {
    /// 创建实例
    pub fn new(
        registry: Arc<WatchRegistry>,
        hal: Arc<dyn SystemHal>,
        config: &FsConfig,
        flags: WatchFlags,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry,
            hal,
            state: Mutex::new(InstanceState {
                queue: VecDeque::new(),
                bytes: 0,
                overflow: false,
                next_wd: 1,
                regs: BTreeMap::new(),
            }),
            wait: WaitQueue::new(),
            nonblocking: AtomicBool::new(flags.contains(WatchFlags::NONBLOCK)),
            max_events: config.watch_max_events,
            max_bytes: config.watch_max_bytes,
            max_regs: config.watch_max_registrations,
        })
    }

    /// 在 inode 上登记
    ///
    /// 同一 inode 已有登记时返回原描述符，掩码被替换（带 `MASK_ADD` 时合并）。
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 掩码中没有任何事件
    /// - `NoSpace` - 登记数达到上限
    pub fn add_watch(&self, key: WatchKey, mask: WatchMask) -> Result<i32> {
        if (mask & WatchMask::ALL_EVENTS).is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "watch mask has no events"));
        }
        let mut regs = self.registry.regs.write();
        let mut st = self.state.lock();

        if let Some(wd) = st.regs.iter().find(|(_, k)| **k == key).map(|(wd, _)| *wd) {
            if let Some(w) = regs.get_mut(&key).and_then(|list| list.iter_mut().find(|w| w.is(self, wd))) {
                w.mask = if mask.contains(WatchMask::MASK_ADD) { w.mask | mask } else { mask };
                w.mask.remove(WatchMask::MASK_ADD);
            }
            return Ok(wd);
        }

        if st.regs.len() >= self.max_regs {
            log::warn!("[WATCH] registration limit {} reached", self.max_regs);
            return Err(Error::new(ErrorKind::NoSpace, "too many watch registrations"));
        }
        let wd = st.next_wd;
        st.next_wd += 1;
        st.regs.insert(wd, key);
        regs.entry(key).or_default().push(Watcher {
            instance: self.me.clone(),
            wd,
            mask: mask - WatchMask::MASK_ADD,
        });
        log::debug!("[WATCH] wd {} on {:?} mask {:#x}", wd, key, mask.bits());
        Ok(wd)
    }

    /// 撤销登记，送出 `IGNORED`
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 描述符不属于这个实例
    pub fn remove_watch(&self, wd: i32) -> Result<()> {
        {
            let mut regs = self.registry.regs.write();
            let mut st = self.state.lock();
            let key = st
                .regs
                .remove(&wd)
                .ok_or(Error::new(ErrorKind::InvalidInput, "unknown watch descriptor"))?;
            if let Some(list) = regs.get_mut(&key) {
                list.retain(|w| !w.is(self, wd));
                if list.is_empty() {
                    regs.remove(&key);
                }
            }
            self.push_locked(&mut st, WatchEvent { wd, mask: WatchMask::IGNORED, cookie: 0, name: Vec::new() });
        }
        self.wait.wake_all();
        Ok(())
    }

    /// 当前登记数
    pub fn registrations(&self) -> usize {
        self.state.lock().regs.len()
    }

    /// 排队中的事件数
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// 是否设置了溢出标志
    pub fn overflowed(&self) -> bool {
        self.state.lock().overflow
    }

    fn deliver(&self, event: WatchEvent) {
        {
            let mut st = self.state.lock();
            self.push_locked(&mut st, event);
        }
        self.wait.wake_all();
    }

    fn push_locked(&self, st: &mut InstanceState, event: WatchEvent) {
        if st.queue.back() == Some(&event) {
            return;
        }
        let len = event.record_len();
        if st.overflow || st.queue.len() >= self.max_events || st.bytes + len > self.max_bytes {
            if !st.overflow {
                log::warn!("[WATCH] event queue overflow, dropping events");
            }
            st.overflow = true;
            return;
        }
        st.bytes += len;
        st.queue.push_back(event);
    }

    fn drain_into(&self, st: &mut InstanceState, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while let Some(event) = st.queue.front() {
            let len = event.record_len();
            if written + len > buf.len() {
                break;
            }
            event.encode(&mut buf[written..written + len]);
            written += len;
            st.bytes -= len;
            st.queue.pop_front();
        }
        if st.queue.is_empty() && st.overflow {
            let record = WatchEvent { wd: -1, mask: WatchMask::Q_OVERFLOW, cookie: 0, name: Vec::new() };
            let len = record.record_len();
            if written + len <= buf.len() {
                record.encode(&mut buf[written..written + len]);
                written += len;
                st.overflow = false;
            }
        }
        if written == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "buffer too small for next event"));
        }
        Ok(written)
    }

    /// 读出事件记录
    ///
    /// 放不下的记录留在队列中，不会被截断。
    ///
    /// # 错误
    ///
    /// - `InvalidInput` - 缓冲区放不下第一条记录
    /// - `WouldBlock` - 非阻塞实例且队列为空
    /// - `Interrupted` - 阻塞等待被信号打断
    pub fn read_events(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            {
                let mut st = self.state.lock();
                if !st.queue.is_empty() || st.overflow {
                    return self.drain_into(&mut st, buf);
                }
            }
            if self.nonblocking.load(Ordering::Acquire) {
                return Err(Error::new(ErrorKind::WouldBlock, "no events queued"));
            }
            self.wait.wait_until(&*self.hal, || {
                let st = self.state.lock();
                !st.queue.is_empty() || st.overflow
            })?;
        }
    }
}

impl File for WatchInstance {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_events(buf)
    }

    fn status_flags(&self) -> u32 {
        if self.nonblocking.load(Ordering::Acquire) {
            WatchFlags::NONBLOCK.bits()
        } else {
            0
        }
    }

    fn set_status_flags(&self, flags: u32) -> Result<()> {
        self.nonblocking
            .store(flags & WatchFlags::NONBLOCK.bits() != 0, Ordering::Release);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for WatchInstance {
    fn drop(&mut self) {
        let keys: Vec<WatchKey> = self.state.get_mut().regs.values().copied().collect();
        if !keys.is_empty() {
            self.registry.purge_dead(&keys);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::NullHal;
    use alloc::vec;

    fn instance(reg: &Arc<WatchRegistry>, config: &FsConfig) -> Arc<WatchInstance> {
        WatchInstance::new(reg.clone(), Arc::new(NullHal), config, WatchFlags::NONBLOCK)
    }

    fn read_all(inst: &WatchInstance) -> Vec<WatchEvent> {
        let mut buf = [0u8; 1024];
        match inst.read_events(&mut buf) {
            Ok(n) => WatchEvent::decode_all(&buf[..n]),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_record_encoding() {
        let ev = WatchEvent { wd: 3, mask: WatchMask::CREATE, cookie: 0, name: b"x".to_vec() };
        assert_eq!(ev.record_len(), 32);
        let ev = WatchEvent { wd: 3, mask: WatchMask::CREATE, cookie: 0, name: [b'a'; 15].to_vec() };
        assert_eq!(ev.record_len(), 32);
        let ev = WatchEvent { wd: 3, mask: WatchMask::CREATE, cookie: 0, name: [b'a'; 16].to_vec() };
        assert_eq!(ev.record_len(), 48);
        let mut buf = [0u8; 48];
        ev.encode(&mut buf);
        assert_eq!(WatchEvent::decode_all(&buf), vec![ev]);
    }

    #[test]
    fn test_filter_coalesce_and_move_pairing() {
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &FsConfig::default());
        let wd = inst.add_watch((1, 2), WatchMask::CREATE | WatchMask::MOVED_TO).unwrap();

        reg.notify((1, 2), WatchMask::CREATE, 0, b"x", false);
        reg.notify((1, 2), WatchMask::CREATE, 0, b"x", false);
        reg.notify((1, 2), WatchMask::DELETE, 0, b"x", false);
        let cookie = reg.next_cookie();
        reg.notify((1, 2), WatchMask::MOVED_FROM, cookie, b"x", false);
        reg.notify((1, 2), WatchMask::MOVED_TO, cookie, b"y", false);
        reg.notify((1, 3), WatchMask::CREATE, 0, b"z", false);

        let events = read_all(&inst);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].mask, WatchMask::CREATE);
        assert_eq!(events[1].mask, WatchMask::MOVED_FROM);
        assert_eq!(events[2].mask, WatchMask::MOVED_TO);
        assert_eq!(events[1].cookie, events[2].cookie);
        assert!(events.iter().all(|e| e.wd == wd));
        assert_eq!(inst.read_events(&mut [0u8; 64]).unwrap_err().kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_same_inode_reuses_wd() {
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &FsConfig::default());
        let wd = inst.add_watch((1, 2), WatchMask::CREATE).unwrap();
        assert_eq!(inst.add_watch((1, 2), WatchMask::DELETE).unwrap(), wd);
        reg.notify((1, 2), WatchMask::CREATE, 0, b"a", false);
        assert!(read_all(&inst).is_empty());
        inst.add_watch((1, 2), WatchMask::CREATE | WatchMask::MASK_ADD).unwrap();
        reg.notify((1, 2), WatchMask::CREATE, 0, b"a", false);
        reg.notify((1, 2), WatchMask::DELETE, 0, b"a", false);
        assert_eq!(read_all(&inst).len(), 2);
        assert_eq!(inst.registrations(), 1);
    }

    #[test]
    fn test_oneshot_and_remove_queue_ignored() {
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &FsConfig::default());
        let wd = inst.add_watch((1, 2), WatchMask::CREATE | WatchMask::ONESHOT).unwrap();
        reg.notify((1, 2), WatchMask::CREATE, 0, b"a", false);
        reg.notify((1, 2), WatchMask::CREATE, 0, b"b", false);
        let events = read_all(&inst);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].mask, WatchMask::IGNORED);
        assert_eq!(reg.watched_inodes(), 0);

        let wd2 = inst.add_watch((1, 5), WatchMask::ACCESS).unwrap();
        assert!(wd2 > wd);
        inst.remove_watch(wd2).unwrap();
        assert_eq!(read_all(&inst)[0].mask, WatchMask::IGNORED);
        assert_eq!(inst.remove_watch(wd2).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_overflow_is_sticky_until_read() {
        let config = FsConfig { watch_max_events: 2, ..FsConfig::default() };
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &config);
        inst.add_watch((1, 2), WatchMask::CREATE).unwrap();
        for name in [&b"a"[..], b"b", b"c", b"d"] {
            reg.notify((1, 2), WatchMask::CREATE, 0, name, false);
        }
        assert!(inst.overflowed());
        let events = read_all(&inst);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].mask, WatchMask::Q_OVERFLOW);
        assert_eq!(events[2].wd, -1);
        assert!(!inst.overflowed());
    }

    #[test]
    fn test_first_record_must_fit() {
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &FsConfig::default());
        inst.add_watch((1, 2), WatchMask::CREATE).unwrap();
        reg.notify((1, 2), WatchMask::CREATE, 0, b"abc", false);
        reg.notify((1, 2), WatchMask::CREATE, 0, b"def", false);
        let mut small = [0u8; 20];
        assert_eq!(inst.read_events(&mut small).unwrap_err().kind(), ErrorKind::InvalidInput);
        let mut one = [0u8; 40];
        assert_eq!(inst.read_events(&mut one).unwrap(), 32);
        assert_eq!(inst.pending(), 1);
    }

    #[test]
    fn test_unmount_and_delete_self_revoke() {
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &FsConfig::default());
        inst.add_watch((1, 2), WatchMask::CREATE).unwrap();
        inst.add_watch((1, 3), WatchMask::DELETE_SELF).unwrap();
        inst.add_watch((4, 3), WatchMask::CREATE).unwrap();

        reg.inode_gone((1, 3));
        let events = read_all(&inst);
        assert_eq!(events.iter().map(|e| e.mask).collect::<Vec<_>>(), vec![WatchMask::DELETE_SELF, WatchMask::IGNORED]);

        reg.device_gone(1);
        let events = read_all(&inst);
        assert_eq!(events.iter().map(|e| e.mask).collect::<Vec<_>>(), vec![WatchMask::UNMOUNT, WatchMask::IGNORED]);
        assert_eq!(inst.registrations(), 1);
    }

    #[test]
    fn test_dropping_instance_clears_registrations() {
        let reg = Arc::new(WatchRegistry::new());
        let inst = instance(&reg, &FsConfig::default());
        inst.add_watch((1, 2), WatchMask::CREATE).unwrap();
        assert_eq!(reg.watched_inodes(), 1);
        drop(inst);
        assert_eq!(reg.watched_inodes(), 0);
    }
}
