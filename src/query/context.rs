use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::index::filter::QueryFilter;
use crate::index::{IndexId, Snapshot};

/// 查询所处阶段；分布式 join 的代价计算只发生在 `Prepare`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryPhase {
    /// 本地执行
    Local,
    /// 规划 / 准备
    Prepare,
    /// 复制表上执行
    Replicated,
    /// 分布式 map 片段
    Map,
    /// 分布式 reduce 片段
    Reduce,
}

/// 请求级上下文：一个线程上一次逻辑查询一份。
///
/// 显式传参，不做线程级全局查找。快照缓存让同一查询里指向同一逻辑索引的多个
/// 索引对象复用同一份快照。不跨线程共享。
pub struct QueryContext {
    phase: QueryPhase,
    distributed_joins: bool,
    preparing_expression: bool,
    snapshots: HashMap<IndexId, Snapshot>,
    filter: Option<Arc<dyn QueryFilter>>,
}

impl QueryContext {
    pub fn new(phase: QueryPhase) -> Self {
        Self {
            phase,
            distributed_joins: false,
            preparing_expression: false,
            snapshots: HashMap::new(),
            filter: None,
        }
    }

    pub fn with_distributed_joins(mut self, on: bool) -> Self {
        self.distributed_joins = on;
        self
    }

    pub fn with_preparing_expression(mut self, on: bool) -> Self {
        self.preparing_expression = on;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn QueryFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    pub fn distributed_joins(&self) -> bool {
        self.distributed_joins
    }

    /// 是否在准备子查询表达式
    pub fn preparing_expression(&self) -> bool {
        self.preparing_expression
    }

    pub fn set_preparing_expression(&mut self, on: bool) {
        self.preparing_expression = on;
    }

    pub fn filter(&self) -> Option<&Arc<dyn QueryFilter>> {
        self.filter.as_ref()
    }

    pub fn put_snapshot(&mut self, idx: IndexId, snapshot: Snapshot) {
        self.snapshots.insert(idx, snapshot);
    }

    pub fn snapshot(&self, idx: IndexId) -> Option<&Snapshot> {
        self.snapshots.get(&idx)
    }

    /// 丢掉某个索引的缓存快照（预留失败后换新快照重扫时用）
    pub fn forget_snapshot(&mut self, idx: IndexId) -> Option<Snapshot> {
        self.snapshots.remove(&idx)
    }

    pub fn cached_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    /// 查询结束时拆除缓存
    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("phase", &self.phase)
            .field("distributed_joins", &self.distributed_joins)
            .field("preparing_expression", &self.preparing_expression)
            .field("snapshots", &self.snapshots.len())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_cache_roundtrip() {
        let mut q = QueryContext::new(QueryPhase::Local);
        let id = IndexId::next();
        assert!(q.snapshot(id).is_none());

        let s = Snapshot::plain(1u8);
        q.put_snapshot(id, s.clone());
        assert!(q.snapshot(id).is_some_and(|c| c.same_view(&s)));
        assert_eq!(q.cached_snapshots(), 1);

        assert!(q.forget_snapshot(id).is_some());
        q.put_snapshot(id, s);
        q.clear();
        assert_eq!(q.cached_snapshots(), 0);
    }

    #[test]
    fn builder_flags() {
        let q = QueryContext::new(QueryPhase::Prepare)
            .with_distributed_joins(true)
            .with_preparing_expression(true);
        assert_eq!(q.phase(), QueryPhase::Prepare);
        assert!(q.distributed_joins());
        assert!(q.preparing_expression());
        assert!(q.filter().is_none());
    }
}
