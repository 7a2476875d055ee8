use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 快照协议计数器（每个索引一份，跨线程共享）
#[derive(Debug, Default)]
pub struct SnapshotStats {
    taken: AtomicU64,
    reused: AtomicU64,
    reservation_failures: AtomicU64,
    released: AtomicU64,
    resource_close_failures: AtomicU64,
}

impl SnapshotStats {
    pub(crate) fn on_taken(&self, reused: bool) {
        self.taken.fetch_add(1, Ordering::Relaxed);
        if reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn on_reservation_failed(&self) {
        self.reservation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_resource_close_failed(&self) {
        self.resource_close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> SnapshotReport {
        SnapshotReport {
            taken: self.taken.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            reservation_failures: self.reservation_failures.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            resource_close_failures: self.resource_close_failures.load(Ordering::Relaxed),
        }
    }
}

/// 计数器快照（普通值拷贝）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    /// 成功 take 的次数（含复用）
    pub taken: u64,
    /// 其中复用查询上下文缓存的次数
    pub reused: u64,
    /// 预留失败（版本已回收）次数
    pub reservation_failures: u64,
    pub released: u64,
    /// release 时资源关闭失败（已吞掉）次数
    pub resource_close_failures: u64,
}

impl SnapshotReport {
    /// 仍未释放的快照数；正常结束的扫描应当为 0
    pub fn outstanding(&self) -> u64 {
        self.taken.saturating_sub(self.released)
    }
}

impl fmt::Display for SnapshotReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════╗")?;
        writeln!(f, "║        Snapshot Protocol Report      ║")?;
        writeln!(f, "╠══════════════════════════════════════╣")?;
        writeln!(f, "║   taken:            {:>12}     ║", self.taken)?;
        writeln!(f, "║   reused:           {:>12}     ║", self.reused)?;
        writeln!(f, "║   reserve failed:   {:>12}     ║", self.reservation_failures)?;
        writeln!(f, "║   released:         {:>12}     ║", self.released)?;
        writeln!(f, "║   close failed:     {:>12}     ║", self.resource_close_failures)?;
        writeln!(f, "║   outstanding:      {:>12}     ║", self.outstanding())?;
        writeln!(f, "╚══════════════════════════════════════╝")?;
        Ok(())
    }
}
