use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::index::IndexExt;

/// 快照负载：具体索引自己的只读视图，由所属索引 downcast
pub type SnapshotData = Arc<dyn Any + Send + Sync>;

/// 引用计数预留：持有期间存储层不得回收该版本。
///
/// 计数器跨线程 / 跨查询共享，实现必须是原子的。
pub trait Reservable: Send + Sync {
    /// 版本已不再保留时返回 false
    fn reserve(&self) -> bool;
    fn release(&self);
}

/// 需要显式释放的原生资源
pub trait SnapshotResource: Send + Sync {
    fn close(&self) -> anyhow::Result<()>;
}

/// 索引在某一时刻的视图。
///
/// 两种可选能力用变体区分，release 逻辑按变体穷举。
/// 同一时刻只归属一个（线程, 索引）。
#[derive(Clone)]
pub enum Snapshot {
    Plain {
        data: SnapshotData,
    },
    Reservable {
        data: SnapshotData,
        reservation: Arc<dyn Reservable>,
    },
    WithResource {
        data: SnapshotData,
        resource: Arc<dyn SnapshotResource>,
    },
    ReservableWithResource {
        data: SnapshotData,
        reservation: Arc<dyn Reservable>,
        resource: Arc<dyn SnapshotResource>,
    },
}

impl Snapshot {
    pub fn plain<T: Any + Send + Sync>(data: T) -> Self {
        Snapshot::Plain {
            data: Arc::new(data),
        }
    }

    pub fn data(&self) -> &SnapshotData {
        match self {
            Snapshot::Plain { data }
            | Snapshot::Reservable { data, .. }
            | Snapshot::WithResource { data, .. }
            | Snapshot::ReservableWithResource { data, .. } => data,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data().downcast_ref::<T>()
    }

    pub fn reservation(&self) -> Option<&Arc<dyn Reservable>> {
        match self {
            Snapshot::Reservable { reservation, .. }
            | Snapshot::ReservableWithResource { reservation, .. } => Some(reservation),
            _ => None,
        }
    }

    pub fn resource(&self) -> Option<&Arc<dyn SnapshotResource>> {
        match self {
            Snapshot::WithResource { resource, .. }
            | Snapshot::ReservableWithResource { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// 两个句柄是否指向同一份视图
    pub fn same_view(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(self.data(), other.data())
    }

    /// 释放预留并关闭资源。资源关闭失败只记日志，返回 false。
    pub(crate) fn release_capabilities(&self) -> bool {
        match self {
            Snapshot::Plain { .. } => true,
            Snapshot::Reservable { reservation, .. } => {
                reservation.release();
                true
            }
            Snapshot::WithResource { resource, .. } => close_quietly(resource.as_ref()),
            Snapshot::ReservableWithResource {
                reservation,
                resource,
                ..
            } => {
                reservation.release();
                close_quietly(resource.as_ref())
            }
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Snapshot::Plain { .. } => "Plain",
            Snapshot::Reservable { .. } => "Reservable",
            Snapshot::WithResource { .. } => "WithResource",
            Snapshot::ReservableWithResource { .. } => "ReservableWithResource",
        };
        f.debug_struct("Snapshot")
            .field("kind", &kind)
            .field("data", &Arc::as_ptr(self.data()))
            .finish()
    }
}

fn close_quietly(resource: &dyn SnapshotResource) -> bool {
    match resource.close() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to close snapshot resource, ignoring: {:#}", e);
            false
        }
    }
}

const RETIRED: u64 = 1 << 63;
const COUNT_MASK: u64 = !RETIRED;

/// 版本预留计数器。
///
/// 最高位为 retired 标记，其余位为持有者数量。retired 且无人持有即视为已回收，
/// 之后的 `reserve()` 一律失败；retired 但仍被持有时仍可追加预留
/// （同一查询的其他索引对象复用缓存快照的情形）。
#[derive(Debug, Default)]
pub struct VersionReservation {
    state: AtomicU64,
}

impl VersionReservation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holders(&self) -> u64 {
        self.state.load(Ordering::Acquire) & COUNT_MASK
    }

    pub fn is_retired(&self) -> bool {
        self.state.load(Ordering::Acquire) & RETIRED != 0
    }

    pub fn is_reclaimed(&self) -> bool {
        self.state.load(Ordering::Acquire) == RETIRED
    }

    /// 标记该版本不再是最新；返回 true 表示此刻已无人持有（可立即回收）
    pub fn retire(&self) -> bool {
        let prev = self.state.fetch_or(RETIRED, Ordering::AcqRel);
        prev & COUNT_MASK == 0
    }
}

impl Reservable for VersionReservation {
    fn reserve(&self) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur == RETIRED {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    fn release(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev & COUNT_MASK > 0,
            "version reservation released more times than reserved"
        );
        if prev == RETIRED | 1 {
            tracing::debug!("Retired version reclaimed after last release");
        }
    }
}

/// 作用域快照句柄：析构时释放，绑定当前线程（`!Send`）
pub struct SnapshotGuard<'a, I: IndexExt + ?Sized> {
    index: &'a I,
    snapshot: Snapshot,
    released: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a, I: IndexExt + ?Sized> SnapshotGuard<'a, I> {
    pub(crate) fn new(index: &'a I, snapshot: Snapshot) -> Self {
        Self {
            index,
            snapshot,
            released: false,
            _thread_bound: PhantomData,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn release(mut self) {
        self.released = true;
        self.index.release_snapshot();
    }
}

impl<I: IndexExt + ?Sized> Drop for SnapshotGuard<'_, I> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if std::thread::panicking() {
            // unwind 途中只清槽，不碰预留与资源，避免二次 panic；预留随之泄漏，版本保持钉住
            let core = self.index.core();
            if core.slots.remove(&std::thread::current().id()).is_some() {
                tracing::warn!(
                    "Snapshot on index {} dropped during unwind, reservation leaked",
                    core.id()
                );
            }
            return;
        }
        self.index.release_snapshot();
    }
}
