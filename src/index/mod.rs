pub mod adapter;
pub mod filter;
pub mod mem_index;
pub mod scan;
pub mod snapshot;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::core::{now_millis, Row, SearchRow, Table};
use crate::error::{IndexError, IndexResult};
use crate::query::{PlanSession, QueryContext, TableFilter};
use crate::stats::SnapshotStats;

pub use adapter::{EngineAdapter, EngineIndex};
pub use filter::{FilteringIter, KeyValuePredicate, PartitionFilter, QueryFilter};
pub use mem_index::MemIndex;
pub use scan::Scan;
pub use snapshot::{
    Reservable, Snapshot, SnapshotData, SnapshotGuard, SnapshotResource, VersionReservation,
};

static INDEX_ID_GEN: AtomicU64 = AtomicU64::new(0);

/// 进程内单调递增的索引标识；构造时分配一次，不复用、不持久化
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(u64);

impl IndexId {
    pub fn next() -> Self {
        IndexId(INDEX_ID_GEN.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// rebuild 取消标记（可跨线程克隆）
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> IndexResult<()> {
        if self.is_cancelled() {
            Err(IndexError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// 所有索引共享的基础状态。
///
/// `slots` 是“每线程当前快照”：只以当前线程的 `ThreadId` 读写，不会触碰别的线程的条目。
pub struct IndexCore {
    id: IndexId,
    name: String,
    table: ArcSwap<Table>,
    slots: DashMap<ThreadId, Snapshot>,
    destroyed: AtomicBool,
    stats: SnapshotStats,
}

impl IndexCore {
    pub fn new(name: &str, table: Arc<Table>) -> Self {
        Self {
            id: IndexId::next(),
            name: name.to_string(),
            table: ArcSwap::from(table),
            slots: DashMap::new(),
            destroyed: AtomicBool::new(false),
            stats: SnapshotStats::default(),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> Arc<Table> {
        self.table.load_full()
    }

    /// 表结构刷新（rebuild 时）
    pub fn refresh_table(&self, table: Arc<Table>) {
        self.table.store(table);
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 返回 true 表示本次调用完成了 active → destroyed
    pub fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub fn ensure_active(&self) -> IndexResult<()> {
        if self.is_destroyed() {
            Err(IndexError::Destroyed(self.id))
        } else {
            Ok(())
        }
    }

    /// 当前线程在本索引上是否有活跃快照
    fn active_on_current_thread(&self) -> bool {
        self.slots.contains_key(&std::thread::current().id())
    }
}

pub type RowCursor<'a> = Box<dyn Iterator<Item = Row> + 'a>;

/// 具体索引必须实现的操作。
///
/// 快照协议、过滤、代价乘数等统一行为在 [`IndexExt`] 里，对所有实现一致、不可覆盖。
pub trait IndexBase: Send + Sync {
    fn core(&self) -> &IndexCore;

    /// 永久释放索引资源。引擎的通用 `close` 钩子不会走到这里。
    /// 重复调用是无操作。
    fn destroy(&self);

    /// 支持在线重建的索引返回替身（新标识）；默认 `None` 表示沿用自身。
    /// 被取消时返回 `Interrupted`，不安装任何部分结果。
    fn rebuild(&self, _cancel: &CancelToken) -> IndexResult<Option<Arc<dyn IndexBase>>> {
        Ok(None)
    }

    /// 键不存在时插入；返回已存在的行
    fn put(&self, row: Row) -> IndexResult<Option<Row>>;

    /// 按键删除；返回被删除的行
    fn remove(&self, row: &SearchRow) -> IndexResult<Option<Row>>;

    /// 当前状态的新快照；不支持快照返回 `None`
    fn do_take_snapshot(&self) -> Option<Snapshot>;

    /// 按键序的惰性行序列；给定快照时读快照，否则读当前状态
    fn cursor(&self, snapshot: Option<Snapshot>) -> RowCursor<'_>;

    fn need_rebuild(&self) -> bool {
        false
    }

    /// 仅供展示
    fn disk_space_used(&self) -> u64 {
        0
    }
}

/// 所有索引共享的统一行为（blanket 实现，不可覆盖）
pub trait IndexExt: IndexBase {
    fn id(&self) -> IndexId {
        self.core().id()
    }

    fn table(&self) -> Arc<Table> {
        self.core().table()
    }

    /// 引擎通用生命周期钩子。会话关闭等路径也会触发，所以这里什么都不做；
    /// 真正销毁走 `destroy`。
    fn close(&self) {}

    /// 为当前线程取快照（或采用外部传入的已有快照）。
    ///
    /// 当前线程在本索引上已有活跃快照属于调用方 bug，直接 panic。
    /// 预留失败返回 `None` 且不记录任何状态，调用方需换更新的快照重扫。
    fn take_snapshot(
        &self,
        existing: Option<Snapshot>,
        qctx: Option<&mut QueryContext>,
    ) -> Option<Snapshot> {
        assert_no_active(self.core());
        let reused = existing.is_some();
        let s = match existing {
            Some(s) => s,
            None => self.do_take_snapshot()?,
        };
        install_snapshot(self.core(), s, reused, qctx)
    }

    /// `take_snapshot` 的作用域版本：返回的句柄析构时自动释放
    fn acquire_snapshot(
        &self,
        existing: Option<Snapshot>,
        qctx: Option<&mut QueryContext>,
    ) -> Option<SnapshotGuard<'_, Self>> {
        let s = self.take_snapshot(existing, qctx)?;
        Some(SnapshotGuard::new(self, s))
    }

    /// 释放当前线程的快照。先清槽，再释放预留，最后关闭资源（失败只记日志）。
    fn release_snapshot(&self) {
        let core = self.core();
        let tid = std::thread::current().id();
        let s = match core.slots.remove(&tid) {
            Some((_, s)) => s,
            None => panic!("index {} has no active snapshot on this thread", core.id()),
        };

        if !s.release_capabilities() {
            core.stats.on_resource_close_failed();
        }
        core.stats.on_released();
        tracing::debug!("Snapshot released: index={} {:?}", core.id(), s);
    }

    /// 当前线程的活跃快照
    fn thread_snapshot(&self) -> Option<Snapshot> {
        self.core()
            .slots
            .get(&std::thread::current().id())
            .map(|e| e.value().clone())
    }

    /// 过期 + 谓词过滤；`now` 在此刻固定
    fn filter<I: Iterator<Item = Row>>(
        &self,
        iter: I,
        filter: Option<&dyn QueryFilter>,
    ) -> FilteringIter<I> {
        let table = self.table();
        FilteringIter::new(iter, now_millis(), filter, table.space_name())
    }

    /// 当前查询的行过滤器
    fn thread_filter(&self, qctx: Option<&QueryContext>) -> Option<Arc<dyn QueryFilter>> {
        qctx.and_then(|q| q.filter().cloned())
    }

    /// 打开一次扫描：复用查询上下文里的快照或新取一份，再套上行过滤。
    ///
    /// 返回 `None` 表示快照预留失败，调用方需重启扫描；失效的缓存快照同时从上下文移除。
    /// 不支持快照的索引直接读当前状态。
    fn open_scan(&self, mut qctx: Option<&mut QueryContext>) -> Option<Scan<'_, Self>> {
        let existing = qctx.as_deref().and_then(|q| q.snapshot(self.id()).cloned());
        let filter = self.thread_filter(qctx.as_deref());

        let guard = match existing {
            Some(s) => match self.acquire_snapshot(Some(s), qctx.as_deref_mut()) {
                Some(g) => Some(g),
                None => {
                    // 缓存快照已回收：从上下文移除，重启扫描时改取新快照
                    if let Some(q) = qctx.as_deref_mut() {
                        q.forget_snapshot(self.id());
                    }
                    return None;
                }
            },
            None => {
                assert_no_active(self.core());
                match self.do_take_snapshot() {
                    Some(s) => {
                        let s = install_snapshot(self.core(), s, false, qctx.as_deref_mut())?;
                        Some(SnapshotGuard::new(self, s))
                    }
                    None => None,
                }
            }
        };

        let cursor = self.cursor(guard.as_ref().map(|g| g.snapshot().clone()));
        let rows = self.filter(cursor, filter.as_deref());
        Some(Scan::new(guard, rows))
    }

    /// 分布式 join 代价乘数（只在规划期计算）
    fn distributed_multiplier(
        &self,
        qctx: Option<&QueryContext>,
        session: &mut PlanSession,
        filters: &[TableFilter],
        current: usize,
    ) -> u32 {
        crate::query::distributed_multiplier(qctx, session, filters, current)
    }
}

impl<T: IndexBase + ?Sized> IndexExt for T {}

fn assert_no_active(core: &IndexCore) {
    assert!(
        !core.active_on_current_thread(),
        "index {} already has an active snapshot on this thread",
        core.id()
    );
}

fn install_snapshot(
    core: &IndexCore,
    s: Snapshot,
    reused: bool,
    qctx: Option<&mut QueryContext>,
) -> Option<Snapshot> {
    if let Some(r) = s.reservation() {
        if !r.reserve() {
            core.stats.on_reservation_failed();
            tracing::debug!(
                "Snapshot reservation failed: index={}, version no longer retained",
                core.id()
            );
            return None;
        }
    }

    core.slots.insert(std::thread::current().id(), s.clone());
    if let Some(q) = qctx {
        q.put_snapshot(core.id(), s.clone());
    }
    core.stats.on_taken(reused);
    tracing::debug!(
        "Snapshot taken: index={} reused={} {:?}",
        core.id(),
        reused,
        s
    );
    Some(s)
}

/// 解析 rebuild 结果：默认实现返回同一个索引
pub fn rebuild_index(
    index: &Arc<dyn IndexBase>,
    cancel: &CancelToken,
) -> IndexResult<Arc<dyn IndexBase>> {
    Ok(index.rebuild(cancel)?.unwrap_or_else(|| index.clone()))
}
