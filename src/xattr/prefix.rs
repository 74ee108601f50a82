//! xattr 命名空间前缀处理
//!
//! 磁盘上每个条目只保存命名空间索引和去掉前缀的名字。

use crate::error::{Error, ErrorKind, Result};
use alloc::vec::Vec;

/// 扩展属性命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Namespace {
    /// `user.`
    User = 1,
    /// `system.posix_acl_access`
    PosixAclAccess = 2,
    /// `system.posix_acl_default`
    PosixAclDefault = 3,
    /// `trusted.`
    Trusted = 4,
    /// `security.`
    Security = 6,
    /// `system.`
    System = 7,
}

struct XattrPrefix {
    prefix: &'static [u8],
    ns: Namespace,
    /// 前缀本身就是完整名字（ACL）
    exact: bool,
}

/// 前缀表，较长的 `system.` 变体排在通用 `system.` 之前
static PREFIX_TABLE: &[XattrPrefix] = &[
    XattrPrefix { prefix: b"user.", ns: Namespace::User, exact: false },
    XattrPrefix { prefix: b"system.posix_acl_access", ns: Namespace::PosixAclAccess, exact: true },
    XattrPrefix { prefix: b"system.posix_acl_default", ns: Namespace::PosixAclDefault, exact: true },
    XattrPrefix { prefix: b"trusted.", ns: Namespace::Trusted, exact: false },
    XattrPrefix { prefix: b"security.", ns: Namespace::Security, exact: false },
    XattrPrefix { prefix: b"system.", ns: Namespace::System, exact: false },
];

impl Namespace {
    /// 磁盘上的命名空间索引
    pub fn index(self) -> u8 {
        self as u8
    }

    /// 由磁盘索引还原命名空间
    pub fn from_index(index: u8) -> Option<Self> {
        PREFIX_TABLE.iter().map(|p| p.ns).find(|ns| ns.index() == index)
    }

    /// 命名空间对应的名字前缀
    pub fn prefix(self) -> &'static [u8] {
        PREFIX_TABLE
            .iter()
            .find(|p| p.ns == self)
            .map(|p| p.prefix)
            .unwrap_or(b"")
    }
}

/// 从完整属性名中拆出命名空间和短名字
///
/// # 错误
///
/// * 前缀不被识别 - `Unsupported`
/// * 短名字为空 - `InvalidInput`
/// * 短名字超过 255 字节 - `OutOfRange`
pub fn split_name(full: &[u8]) -> Result<(Namespace, &[u8])> {
    let entry = PREFIX_TABLE
        .iter()
        .find(|p| if p.exact { full == p.prefix } else { full.starts_with(p.prefix) })
        .ok_or(Error::new(ErrorKind::Unsupported, "unknown xattr namespace"))?;

    let name = if entry.exact { &full[..0] } else { &full[entry.prefix.len()..] };
    if name.is_empty() && !entry.exact {
        return Err(Error::new(ErrorKind::InvalidInput, "empty xattr name"));
    }
    if name.len() > u8::MAX as usize {
        return Err(Error::new(ErrorKind::OutOfRange, "xattr name too long"));
    }
    Ok((entry.ns, name))
}

/// 拼出带前缀的完整属性名
pub fn full_name(ns: Namespace, name: &[u8]) -> Vec<u8> {
    let prefix = ns.prefix();
    let mut out = Vec::with_capacity(prefix.len() + name.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(name);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_known_prefixes() {
        assert_eq!(split_name(b"user.comment").unwrap(), (Namespace::User, &b"comment"[..]));
        assert_eq!(split_name(b"trusted.x").unwrap(), (Namespace::Trusted, &b"x"[..]));
        assert_eq!(split_name(b"system.foo").unwrap(), (Namespace::System, &b"foo"[..]));
        assert_eq!(
            split_name(b"system.posix_acl_access").unwrap(),
            (Namespace::PosixAclAccess, &b""[..])
        );
    }

    #[test]
    fn test_split_rejects_bad_names() {
        assert_eq!(split_name(b"bogus.x").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(split_name(b"user.").unwrap_err().kind(), ErrorKind::InvalidInput);
        let mut long = b"user.".to_vec();
        long.resize(5 + 256, b'a');
        assert_eq!(split_name(&long).unwrap_err().kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn test_full_name_round_trips_index() {
        assert_eq!(full_name(Namespace::Security, b"selinux"), b"security.selinux".to_vec());
        assert_eq!(Namespace::from_index(6), Some(Namespace::Security));
        assert_eq!(Namespace::from_index(5), None);
    }
}
