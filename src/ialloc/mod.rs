//! Inode 分配模块

mod alloc;
mod free;

pub use self::alloc::alloc_inode;
pub use free::free_inode;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fs::mkfs::tests_support::test_groups;

    #[test]
    fn test_file_inode_lands_in_parent_group_after_reserved() {
        let (table, _mem) = test_groups(4096, 1024);
        let ino = alloc_inode(&table, 0, false).unwrap();
        assert!(ino >= table.geo().first_ino);
        assert_eq!(table.geo().ino_to_group(ino).0, 0);
    }

    #[test]
    fn test_directories_spread_across_groups() {
        // 1K 块、每组 1024 块 → 4 个组
        let (table, _mem) = test_groups(4096, 1024);
        let d1 = alloc_inode(&table, 0, true).unwrap();
        let d2 = alloc_inode(&table, 0, true).unwrap();
        let g1 = table.geo().ino_to_group(d1).0;
        let g2 = table.geo().ino_to_group(d2).0;
        assert_ne!(g1, g2);
        assert!(table.snapshot()[g1 as usize].used_dirs_count >= 1);
    }

    #[test]
    fn test_free_inode_and_double_free() {
        let (table, _mem) = test_groups(4096, 1024);
        let (_, before) = table.free_totals();
        let ino = alloc_inode(&table, 1, false).unwrap();
        assert_eq!(table.free_totals().1, before - 1);
        free_inode(&table, ino, false).unwrap();
        assert_eq!(table.free_totals().1, before);
        assert_eq!(free_inode(&table, ino, false).unwrap_err().kind(), ErrorKind::Corrupted);
        assert_eq!(free_inode(&table, 2, false).unwrap_err().kind(), ErrorKind::Corrupted);
    }
}
