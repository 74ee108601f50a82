//! 核心配置与挂载选项

use crate::consts::{EXT2_ERRORS_CONTINUE, EXT2_ERRORS_PANIC, EXT2_ERRORS_RO, MAX_SYMLINK_HOPS};
use crate::error::{Error, ErrorKind, Result};
use bitflags::bitflags;

/// 默认块缓存容量（缓冲区个数）
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// 文件系统核心配置
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// 块缓存大小（块数）
    pub bcache_size: usize,
    /// 每个监视实例队列的最大事件数
    pub watch_max_events: usize,
    /// 每个监视实例队列的最大字节数
    pub watch_max_bytes: usize,
    /// 每个监视实例的最大注册数
    pub watch_max_registrations: usize,
    /// 每个执行体打开文件表的最大描述符数
    pub max_fds: usize,
    /// 单次路径解析允许的符号链接跳数
    pub max_symlink_hops: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            bcache_size: DEFAULT_CACHE_SIZE,
            watch_max_events: 16_384,
            watch_max_bytes: 16_384,
            watch_max_registrations: 8_192,
            max_fds: 1_024,
            max_symlink_hops: MAX_SYMLINK_HOPS,
        }
    }
}

/// 完整性错误的升级策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorsPolicy {
    /// 只记录日志
    Continue,
    /// 卷降级为只读
    RemountReadOnly,
    /// 卷停止服务，后续操作全部返回 I/O 错误
    Panic,
}

impl ErrorsPolicy {
    /// 从 superblock 的 s_errors 字段转换
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            EXT2_ERRORS_RO => ErrorsPolicy::RemountReadOnly,
            EXT2_ERRORS_PANIC => ErrorsPolicy::Panic,
            _ => ErrorsPolicy::Continue,
        }
    }

    /// 转换为 s_errors 字段
    pub fn to_raw(self) -> u16 {
        match self {
            ErrorsPolicy::Continue => EXT2_ERRORS_CONTINUE,
            ErrorsPolicy::RemountReadOnly => EXT2_ERRORS_RO,
            ErrorsPolicy::Panic => EXT2_ERRORS_PANIC,
        }
    }
}

bitflags! {
    /// 挂载标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MountFlags: u32 {
        /// 只读
        const RDONLY = 1 << 0;
        /// 禁止 setuid
        const NOSUID = 1 << 1;
        /// 禁止设备文件
        const NODEV = 1 << 2;
        /// 禁止执行
        const NOEXEC = 1 << 3;
    }
}

bitflags! {
    /// 卸载标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UnmountFlags: u32 {
        /// 强制卸载：打开的描述符转为失效状态
        const FORCE = 1 << 0;
    }
}

/// 从 opts 字符串解析出的挂载选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MountOptions {
    /// 只读挂载
    pub read_only: bool,
    /// 数据写穿（每个数据块提交时立即落盘）
    pub sync: bool,
    /// 不更新访问时间
    pub noatime: bool,
    /// 覆盖卷自带的 errors 策略
    pub errors: Option<ErrorsPolicy>,
}

impl MountOptions {
    /// 解析逗号分隔的选项串，例如 `"ro,errors=remount-ro"`
    pub fn parse(opts: &str) -> Result<Self> {
        let mut parsed = MountOptions::default();
        for opt in opts.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match opt {
                "ro" => parsed.read_only = true,
                "rw" => parsed.read_only = false,
                "sync" => parsed.sync = true,
                "async" => parsed.sync = false,
                "noatime" => parsed.noatime = true,
                "atime" => parsed.noatime = false,
                "errors=continue" => parsed.errors = Some(ErrorsPolicy::Continue),
                "errors=remount-ro" => parsed.errors = Some(ErrorsPolicy::RemountReadOnly),
                "errors=panic" => parsed.errors = Some(ErrorsPolicy::Panic),
                _ => {
                    log::warn!("[MOUNT] unknown mount option '{}'", opt);
                    return Err(Error::new(ErrorKind::InvalidInput, "unknown mount option"));
                }
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount_options() {
        let opts = MountOptions::parse("ro, noatime,errors=panic").unwrap();
        assert!(opts.read_only);
        assert!(opts.noatime);
        assert_eq!(opts.errors, Some(ErrorsPolicy::Panic));
        assert_eq!(MountOptions::parse("").unwrap(), MountOptions::default());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = MountOptions::parse("rw,bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_errors_policy_raw() {
        for p in [ErrorsPolicy::Continue, ErrorsPolicy::RemountReadOnly, ErrorsPolicy::Panic] {
            assert_eq!(ErrorsPolicy::from_raw(p.to_raw()), p);
        }
        assert_eq!(ErrorsPolicy::from_raw(0), ErrorsPolicy::Continue);
    }
}
