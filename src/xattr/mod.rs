//! ext2 扩展属性 (Extended Attributes)
//!
//! 扩展属性以 name-value 对的形式存放在 inode 的 `file_acl` 指向的单个块里，
//! 名字带命名空间前缀：
//! - **user.** - 用户自定义属性
//! - **trusted.** - 可信属性（需要系统管理能力，检查在 VFS 层完成）
//! - **security.** - 安全标签
//! - **system.** - 系统属性（如 ACL）
//!
//! 属性块可以被多个 inode 共享（头部引用计数）；任何修改都写到新块，
//! 换好 inode 指针后再释放旧块的引用。
//!
//! # 使用示例
//!
//! ```rust,ignore
//! xattr::set(&fs, &inode, b"user.author", b"Alice", XattrFlags::CREATE)?;
//! let value = xattr::get(&fs, &inode, b"user.author")?;
//! for name in xattr::list(&fs, &inode)? { /* ... */ }
//! xattr::remove(&fs, &inode, b"user.author")?;
//! ```

mod api;
mod block;
mod hash;
mod prefix;

pub use api::{get, list, remove, set};
pub(crate) use api::release_block;
pub use block::{XattrBlock, XattrEntry};
pub use prefix::{full_name, split_name, Namespace};

bitflags::bitflags! {
    /// `set` 的行为标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct XattrFlags: u32 {
        /// 属性必须不存在
        const CREATE = 1 << 0;
        /// 属性必须已存在
        const REPLACE = 1 << 1;
    }
}
