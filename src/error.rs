//! 错误类型定义
//!
//! 提供文件系统核心所有操作共用的错误类型。每个 [`ErrorKind`] 对应一个稳定的
//! errno 数值（见 [`ErrorKind::errno`]），并归入五个错误类别之一（见 [`ErrorClass`]）。

use core::fmt;

/// 文件系统核心操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 文件或目录不存在
    NotFound,
    /// 权限不足（访问位检查失败）
    PermissionDenied,
    /// 操作不被允许（不可变 inode、粘滞目录等）
    NotPermitted,
    /// 无效的文件描述符
    BadDescriptor,
    /// 资源忙
    Busy,
    /// 已存在
    AlreadyExists,
    /// 不是目录
    NotDirectory,
    /// 是目录
    IsDirectory,
    /// 目录非空
    NotEmpty,
    /// 无效参数
    InvalidInput,
    /// 内存不足
    NoMemory,
    /// 块空间不足
    NoSpace,
    /// inode 耗尽
    NoInode,
    /// 只读文件系统
    ReadOnly,
    /// 等待被信号中断
    Interrupted,
    /// 非阻塞操作无数据可用
    WouldBlock,
    /// 名称过长（分量 > 255 字节或路径 > 4096 字节）
    NameTooLong,
    /// 符号链接跳数过多
    TooManyLinks,
    /// 硬链接数达到上限
    LinkLimit,
    /// 操作不支持
    Unsupported,
    /// 等待超时
    TimedOut,
    /// 跨设备链接
    CrossDevice,
    /// I/O 错误
    Io,
    /// 文件系统损坏
    Corrupted,
    /// 结果超出调用者缓冲区
    OutOfRange,
    /// 扩展属性不存在
    NoData,
    /// 打开的文件过多
    TooManyOpenFiles,
}

/// 错误分类
///
/// 决定调用方如何处理错误：用户错误原样返回，瞬时错误允许重试，
/// 资源错误中止当前操作，完整性错误按卷的 errors 策略升级。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 用户错误
    User,
    /// 瞬时错误
    Transient,
    /// 资源错误
    Resource,
    /// 完整性错误
    Integrity,
    /// 操作表缺少该项
    NotSupported,
}

impl ErrorKind {
    /// 对应的 Linux errno 数值
    pub const fn errno(self) -> i32 {
        match self {
            ErrorKind::NotPermitted => 1,
            ErrorKind::NotFound => 2,
            ErrorKind::Interrupted => 4,
            ErrorKind::Io => 5,
            ErrorKind::BadDescriptor => 9,
            ErrorKind::WouldBlock => 11,
            ErrorKind::NoMemory => 12,
            ErrorKind::PermissionDenied => 13,
            ErrorKind::Busy => 16,
            ErrorKind::AlreadyExists => 17,
            ErrorKind::CrossDevice => 18,
            ErrorKind::NotDirectory => 20,
            ErrorKind::IsDirectory => 21,
            ErrorKind::InvalidInput => 22,
            ErrorKind::TooManyOpenFiles => 24,
            ErrorKind::NoSpace | ErrorKind::NoInode => 28,
            ErrorKind::ReadOnly => 30,
            ErrorKind::LinkLimit => 31,
            ErrorKind::OutOfRange => 34,
            ErrorKind::NameTooLong => 36,
            ErrorKind::NotEmpty => 39,
            ErrorKind::TooManyLinks => 40,
            ErrorKind::NoData => 61,
            ErrorKind::Unsupported => 95,
            ErrorKind::TimedOut => 110,
            ErrorKind::Corrupted => 117,
        }
    }

    /// 错误分类
    pub const fn class(self) -> ErrorClass {
        match self {
            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut => {
                ErrorClass::Transient
            }
            ErrorKind::NoMemory
            | ErrorKind::NoSpace
            | ErrorKind::NoInode
            | ErrorKind::TooManyOpenFiles => ErrorClass::Resource,
            ErrorKind::Io | ErrorKind::Corrupted => ErrorClass::Integrity,
            ErrorKind::Unsupported => ErrorClass::NotSupported,
            _ => ErrorClass::User,
        }
    }
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }

    /// 对应的 errno
    pub const fn errno(&self) -> i32 {
        self.kind.errno()
    }

    /// 是否为完整性错误（I/O 或损坏）
    pub const fn is_integrity(&self) -> bool {
        matches!(self.kind.class(), ErrorClass::Integrity)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, "")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_surface() {
        assert_eq!(ErrorKind::NotFound.errno(), 2);
        assert_eq!(ErrorKind::NameTooLong.errno(), 36);
        assert_eq!(ErrorKind::TooManyLinks.errno(), 40);
        assert_eq!(ErrorKind::Corrupted.errno(), 117);
        assert_eq!(ErrorKind::NoInode.errno(), ErrorKind::NoSpace.errno());
    }

    #[test]
    fn test_classification() {
        assert_eq!(ErrorKind::WouldBlock.class(), ErrorClass::Transient);
        assert_eq!(ErrorKind::NoInode.class(), ErrorClass::Resource);
        assert_eq!(ErrorKind::PermissionDenied.class(), ErrorClass::User);
        assert!(Error::new(ErrorKind::Io, "read failed").is_integrity());
        assert!(!Error::new(ErrorKind::NoSpace, "full").is_integrity());
    }
}
