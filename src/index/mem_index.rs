use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::RebuildConfig;
use crate::core::{now_millis, Row, SearchRow, Table, Value};
use crate::error::IndexResult;
use crate::index::snapshot::{Snapshot, VersionReservation};
use crate::index::{CancelToken, IndexBase, IndexCore, RowCursor};

/// 一个已发布的不可变版本
struct Version {
    seq: u64,
    rows: BTreeMap<Value, Row>,
    reservation: Arc<VersionReservation>,
}

impl Version {
    fn new(seq: u64, rows: BTreeMap<Value, Row>) -> Self {
        Self {
            seq,
            rows,
            reservation: Arc::new(VersionReservation::new()),
        }
    }
}

/// 内存有序索引（copy-on-write）。
///
/// - 每次写入复制整张表并通过 `ArcSwap` 原子发布新版本，扫描不被写阻塞；
/// - 发布新版本时退役旧版本：旧版本在最后一个预留释放后不可再预留；
/// - 写入由 `writer` 串行化。
///
/// 写放大是 O(n)，适合小表 / 测试 / 演示。
pub struct MemIndex {
    core: IndexCore,
    current: ArcSwap<Version>,
    writer: Mutex<()>,
    cfg: RebuildConfig,
}

impl MemIndex {
    pub fn new(name: &str, table: Arc<Table>, cfg: RebuildConfig) -> Self {
        Self::with_rows(name, table, cfg, BTreeMap::new())
    }

    fn with_rows(
        name: &str,
        table: Arc<Table>,
        cfg: RebuildConfig,
        rows: BTreeMap<Value, Row>,
    ) -> Self {
        Self {
            core: IndexCore::new(name, table),
            current: ArcSwap::from_pointee(Version::new(0, rows)),
            writer: Mutex::new(()),
            cfg,
        }
    }

    pub fn len(&self) -> usize {
        self.current.load().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前版本序号（每次写入 +1）
    pub fn version_seq(&self) -> u64 {
        self.current.load().seq
    }

    /// 当前版本的预留计数器
    pub fn current_reservation(&self) -> Arc<VersionReservation> {
        self.current.load().reservation.clone()
    }

    /// 当前时刻已过期但仍占位的行数
    pub fn expired_rows(&self) -> usize {
        let now = now_millis();
        self.current
            .load()
            .rows
            .values()
            .filter(|r| r.is_expired(now))
            .count()
    }

    /// 调用方须持有 `writer`
    fn publish(&self, rows: BTreeMap<Value, Row>) {
        let seq = self.current.load().seq + 1;
        let old = self.current.swap(Arc::new(Version::new(seq, rows)));
        if old.reservation.retire() {
            tracing::debug!(
                "Index {} version {} retired with no holders",
                self.core.id(),
                old.seq
            );
        }
    }
}

impl IndexBase for MemIndex {
    fn core(&self) -> &IndexCore {
        &self.core
    }

    fn destroy(&self) {
        if !self.core.mark_destroyed() {
            tracing::debug!("Index {} already destroyed", self.core.id());
            return;
        }
        let _w = self.writer.lock();
        let rows = self.len();
        self.publish(BTreeMap::new());
        tracing::info!(
            "Index {} ({}) destroyed, dropped {} rows",
            self.core.id(),
            self.core.name(),
            rows
        );
    }

    /// 压缩：丢弃过期行，生成新标识的兄弟索引。原索引不受影响。
    fn rebuild(&self, cancel: &CancelToken) -> IndexResult<Option<Arc<dyn IndexBase>>> {
        self.core.ensure_active()?;
        cancel.check()?;

        let version = self.current.load_full();
        let now = now_millis();
        let rows: Vec<&Row> = version.rows.values().collect();

        let mut live = BTreeMap::new();
        for chunk in rows.chunks(self.cfg.chunk_size.max(1)) {
            cancel.check()?;
            let kept: Vec<Row> = chunk
                .par_iter()
                .filter(|r| !r.is_expired(now))
                .map(|r| (*r).clone())
                .collect();
            for r in kept {
                live.insert(r.key.clone(), r);
            }
        }
        cancel.check()?;

        let dropped = rows.len() - live.len();
        let rebuilt =
            MemIndex::with_rows(self.core.name(), self.core.table(), self.cfg.clone(), live);
        tracing::info!(
            "Index {} rebuilt as {}: version={} kept={} dropped_expired={}",
            self.core.id(),
            rebuilt.core.id(),
            version.seq,
            rebuilt.len(),
            dropped
        );
        Ok(Some(Arc::new(rebuilt)))
    }

    /// 已过期的同键行视为不存在，会被替换。
    fn put(&self, row: Row) -> IndexResult<Option<Row>> {
        let _w = self.writer.lock();
        self.core.ensure_active()?;

        let cur = self.current.load_full();
        if let Some(existing) = cur.rows.get(&row.key) {
            if !existing.is_expired(now_millis()) {
                return Ok(Some(existing.clone()));
            }
        }

        let mut rows = cur.rows.clone();
        rows.insert(row.key.clone(), row);
        self.publish(rows);
        Ok(None)
    }

    fn remove(&self, row: &SearchRow) -> IndexResult<Option<Row>> {
        let _w = self.writer.lock();
        self.core.ensure_active()?;

        let cur = self.current.load_full();
        if !cur.rows.contains_key(&row.key) {
            return Ok(None);
        }
        let mut rows = cur.rows.clone();
        let removed = rows.remove(&row.key);
        self.publish(rows);
        Ok(removed)
    }

    fn do_take_snapshot(&self) -> Option<Snapshot> {
        if self.core.is_destroyed() {
            return None;
        }
        let v = self.current.load_full();
        let reservation = v.reservation.clone();
        Some(Snapshot::Reservable {
            data: v,
            reservation,
        })
    }

    fn cursor(&self, snapshot: Option<Snapshot>) -> RowCursor<'_> {
        let version = snapshot
            .and_then(|s| s.data().clone().downcast::<Version>().ok())
            .unwrap_or_else(|| self.current.load_full());
        Box::new(VersionCursor {
            version,
            last: None,
        })
    }

    fn need_rebuild(&self) -> bool {
        self.expired_rows() >= self.cfg.expired_threshold.max(1)
    }
}

/// 在固定版本上按键序前进的游标
struct VersionCursor {
    version: Arc<Version>,
    last: Option<Value>,
}

impl Iterator for VersionCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let next = match self.last.take() {
            None => self.version.rows.iter().next(),
            Some(k) => self
                .version
                .rows
                .range((Bound::Excluded(k), Bound::Unbounded))
                .next(),
        };
        let (k, r) = next?;
        self.last = Some(k.clone());
        Some(r.clone())
    }
}
