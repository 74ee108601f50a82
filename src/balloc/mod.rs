//! 物理块分配模块
//!
//! 所有修改都在对应块组描述符的锁内完成：位图位、组内空闲计数和描述符写回
//! 对其他分配者表现为一步。superblock 的总计数在同步时由描述符汇总。

mod alloc;
mod free;

pub use self::alloc::alloc_block;
pub(crate) use self::alloc::search_order;
pub use free::{free_block, is_block_allocated};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fs::mkfs::tests_support::test_groups;

    #[test]
    fn test_alloc_prefers_goal_and_neighbours() {
        let (table, _mem) = test_groups(2048, 1024);
        let first = alloc_block(&table, 600).unwrap();
        assert_eq!(first, 600);
        let second = alloc_block(&table, first + 1).unwrap();
        assert_eq!(second, 601);
        assert!(is_block_allocated(&table, 600).unwrap());
    }

    #[test]
    fn test_free_then_double_free() {
        let (table, _mem) = test_groups(2048, 1024);
        let (before, _) = table.free_totals();
        let b = alloc_block(&table, 0).unwrap();
        assert_eq!(table.free_totals().0, before - 1);
        free_block(&table, b).unwrap();
        assert_eq!(table.free_totals().0, before);
        assert_eq!(free_block(&table, b).unwrap_err().kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_exhaustion_reports_no_space() {
        let (table, _mem) = test_groups(256, 1024);
        let (free, _) = table.free_totals();
        for _ in 0..free {
            alloc_block(&table, 0).unwrap();
        }
        assert_eq!(alloc_block(&table, 0).unwrap_err().kind(), ErrorKind::NoSpace);
    }
}
