//! 系统硬件抽象层
//!
//! 文件系统核心只依赖外部环境提供的少数能力：单调时钟、当前执行体的身份与能力、
//! 待处理信号查询，以及阻塞等待时的让出原语。这些能力统一通过 [`SystemHal`] 注入。

use alloc::vec::Vec;
use bitflags::bitflags;
use core::time::Duration;

/// 秒 + 纳秒时间戳
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    /// 秒
    pub sec: i64,
    /// 纳秒（0..1_000_000_000）
    pub nsec: u32,
}

impl Timespec {
    /// 纪元零点
    pub const ZERO: Timespec = Timespec { sec: 0, nsec: 0 };

    /// 创建时间戳
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// 加上一段时长（饱和）
    pub fn saturating_add(self, d: Duration) -> Self {
        let mut sec = self.sec.saturating_add(d.as_secs() as i64);
        let mut nsec = self.nsec + d.subsec_nanos();
        if nsec >= 1_000_000_000 {
            nsec -= 1_000_000_000;
            sec = sec.saturating_add(1);
        }
        Self { sec, nsec }
    }
}

bitflags! {
    /// 凭证能力集合
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// 修改文件属主
        const CHOWN = 1 << 0;
        /// 绕过读写执行权限检查
        const DAC_OVERRIDE = 1 << 1;
        /// 绕过读与目录搜索权限检查
        const DAC_READ_SEARCH = 1 << 2;
        /// 绕过属主检查
        const FOWNER = 1 << 3;
        /// 修改不可变与只追加标志
        const LINUX_IMMUTABLE = 1 << 9;
        /// 系统管理（trusted. 扩展属性、挂载）
        const SYS_ADMIN = 1 << 21;
    }
}

/// 当前执行体的身份快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// 有效用户 ID
    pub uid: u32,
    /// 有效组 ID
    pub gid: u32,
    /// 附加组
    pub groups: Vec<u32>,
    /// 能力集合
    pub caps: Capabilities,
}

impl Credentials {
    /// 超级用户凭证
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            groups: Vec::new(),
            caps: Capabilities::all(),
        }
    }

    /// 普通用户凭证（无任何能力）
    pub fn user(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: Vec::new(),
            caps: Capabilities::empty(),
        }
    }

    /// 是否拥有某项能力（uid 0 视为拥有全部能力）
    pub fn has_cap(&self, cap: Capabilities) -> bool {
        self.uid == 0 || self.caps.contains(cap)
    }

    /// 是否属于某个组
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

/// 系统硬件抽象层 trait
///
/// 提供文件系统所需的系统级功能：时间戳、身份、信号与阻塞让出。
pub trait SystemHal: Send + Sync {
    /// 获取当前墙钟时间
    fn now(&self) -> Timespec;

    /// 当前执行体的凭证
    fn credentials(&self) -> Credentials;

    /// 当前执行体是否有待处理的信号
    ///
    /// 所有可中断等待都会轮询这个函数，返回 `true` 时以
    /// [`ErrorKind::Interrupted`](crate::ErrorKind::Interrupted) 结束等待。
    fn signal_pending(&self) -> bool {
        false
    }

    /// 等待期间的让出原语
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// 最小实现：零时钟、超级用户、永远没有信号
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHal;

impl SystemHal for NullHal {
    fn now(&self) -> Timespec {
        Timespec::ZERO
    }

    fn credentials(&self) -> Credentials {
        Credentials::root()
    }
}
