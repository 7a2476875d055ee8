use crate::core::Row;
use crate::index::filter::FilteringIter;
use crate::index::snapshot::{Snapshot, SnapshotGuard};
use crate::index::{IndexExt, RowCursor};

/// 一次打开的索引扫描：持有快照句柄 + 过滤后的行序列。
///
/// 提前停止拉取是调用方的事；句柄在 `finish` 或析构时释放。
pub struct Scan<'a, I: IndexExt + ?Sized> {
    rows: FilteringIter<RowCursor<'a>>,
    guard: Option<SnapshotGuard<'a, I>>,
}

impl<'a, I: IndexExt + ?Sized> Scan<'a, I> {
    pub(crate) fn new(guard: Option<SnapshotGuard<'a, I>>, rows: FilteringIter<RowCursor<'a>>) -> Self {
        Self { rows, guard }
    }

    /// 扫描所读的快照；索引不支持快照时为 `None`
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.guard.as_ref().map(|g| g.snapshot())
    }

    /// 本次扫描固定的过期截止时间
    pub fn now(&self) -> u64 {
        self.rows.now()
    }

    pub fn finish(self) {
        if let Some(g) = self.guard {
            g.release();
        }
    }
}

impl<I: IndexExt + ?Sized> Iterator for Scan<'_, I> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }
}
