use std::sync::Arc;

use crate::core::Row;
use crate::error::{IndexError, IndexResult};
use crate::index::{IndexBase, IndexExt};

/// 引擎侧通用索引接口（比本层支持的变更面更大）
pub trait EngineIndex: Send + Sync {
    fn add(&self, row: &Row) -> IndexResult<()>;
    fn remove_row(&self, row: &Row) -> IndexResult<()>;
    fn remove_index(&self) -> IndexResult<()>;
    fn truncate(&self) -> IndexResult<()>;
    fn check_rename(&self) -> IndexResult<()>;
    fn close(&self);
    fn need_rebuild(&self) -> bool;
    fn disk_space_used(&self) -> u64;
}

/// 把引擎通用调用映射到本层能力。
///
/// 单行增删、截断、改名在通用路径上表达不了快照 / 预留语义，一律拒绝；
/// 变更必须走 `put` / `remove`，结构变化走 `destroy` / `rebuild`。
pub struct EngineAdapter<I: ?Sized> {
    index: Arc<I>,
}

impl<I: IndexBase + ?Sized> EngineAdapter<I> {
    pub fn new(index: Arc<I>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    fn unsupported(&self, op: &'static str) -> IndexResult<()> {
        tracing::debug!("Rejected generic '{}' on index {}", op, self.index.id());
        Err(IndexError::Unsupported(op))
    }
}

impl<I: IndexBase + ?Sized> EngineIndex for EngineAdapter<I> {
    fn add(&self, _row: &Row) -> IndexResult<()> {
        self.unsupported("add")
    }

    fn remove_row(&self, _row: &Row) -> IndexResult<()> {
        self.unsupported("remove row")
    }

    fn remove_index(&self) -> IndexResult<()> {
        self.unsupported("remove index")
    }

    fn truncate(&self) -> IndexResult<()> {
        self.unsupported("truncate")
    }

    fn check_rename(&self) -> IndexResult<()> {
        self.unsupported("rename")
    }

    fn close(&self) {
        IndexExt::close(self.index.as_ref());
    }

    fn need_rebuild(&self) -> bool {
        self.index.need_rebuild()
    }

    fn disk_space_used(&self) -> u64 {
        self.index.disk_space_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RebuildConfig;
    use crate::core::Table;
    use crate::index::MemIndex;

    fn adapter() -> EngineAdapter<MemIndex> {
        let t = Arc::new(Table::partitioned("person", "people"));
        EngineAdapter::new(Arc::new(MemIndex::new("pk", t, RebuildConfig::default())))
    }

    #[test]
    fn generic_mutations_are_rejected_with_op_name() {
        let a = adapter();
        let row = Row::new(1, "a");
        let cases: Vec<(IndexResult<()>, &str)> = vec![
            (a.add(&row), "add"),
            (a.remove_row(&row), "remove row"),
            (a.remove_index(), "remove index"),
            (a.truncate(), "truncate"),
            (a.check_rename(), "rename"),
        ];
        for (res, op) in cases {
            match res {
                Err(IndexError::Unsupported(got)) => assert_eq!(got, op),
                other => panic!("expected Unsupported({}), got {:?}", op, other),
            }
        }
    }

    #[test]
    fn close_keeps_index_alive() {
        let a = adapter();
        a.index().put(Row::new(1, "a")).unwrap();
        a.close();
        assert!(!a.index().core().is_destroyed());
        assert!(a.index().put(Row::new(2, "b")).unwrap().is_none());
        assert_eq!(a.disk_space_used(), 0);
        assert!(!a.need_rebuild());
    }
}
