use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::core::{Row, Value};

/// 行级谓词：(key, value) -> 是否可见。值只在过滤器声明需要时才给出。
pub type KeyValuePredicate = Arc<dyn Fn(&Value, Option<&Value>) -> bool + Send + Sync>;

/// 查询级行过滤器（安全 / 分区可见性）。
pub trait QueryFilter: Send + Sync {
    /// 特化到某个空间；`None` 表示该空间不做过滤
    fn for_space(&self, space: &str) -> Option<KeyValuePredicate>;

    /// 谓词是否需要反序列化后的值（否则只给键）
    fn is_value_required(&self) -> bool;
}

/// 过期 + 谓词两级过滤的惰性迭代器。
///
/// `now` 在构造时固定，整个扫描期间不再读取时钟。
pub struct FilteringIter<I> {
    inner: I,
    now: u64,
    predicate: Option<KeyValuePredicate>,
    value_required: bool,
}

impl<I: Iterator<Item = Row>> FilteringIter<I> {
    pub fn new(inner: I, now: u64, filter: Option<&dyn QueryFilter>, space: &str) -> Self {
        let (predicate, value_required) = match filter {
            Some(f) => (f.for_space(space), f.is_value_required()),
            None => (None, false),
        };
        Self {
            inner,
            now,
            predicate,
            value_required,
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    fn accept(&self, row: &Row) -> bool {
        if row.is_expired(self.now) {
            return false;
        }

        let Some(pred) = self.predicate.as_ref() else {
            return true;
        };

        assert!(!row.key.is_null(), "row key must be present for filtering");
        let value = if self.value_required {
            assert!(
                !row.value.is_null(),
                "row value must be present when the filter requires it"
            );
            Some(&row.value)
        } else {
            None
        };

        pred(&row.key, value)
    }
}

impl<I: Iterator<Item = Row>> Iterator for FilteringIter<I> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            let row = self.inner.next()?;
            if self.accept(&row) {
                return Some(row);
            }
        }
    }
}

/// 键所属分区（进程内稳定）
pub fn partition_of(key: &Value, partitions: u32) -> u32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as u32
}

/// 只放行本节点拥有分区的行（备份分区对查询不可见）。只看键。
#[derive(Clone, Debug)]
pub struct PartitionFilter {
    partitions: u32,
    owned: Arc<HashSet<u32>>,
    space: Option<String>,
}

impl PartitionFilter {
    pub fn new(partitions: u32, owned: impl IntoIterator<Item = u32>) -> Self {
        Self {
            partitions: partitions.max(1),
            owned: Arc::new(owned.into_iter().collect()),
            space: None,
        }
    }

    /// 只对指定空间生效，其余空间不过滤
    pub fn for_only(mut self, space: &str) -> Self {
        self.space = Some(space.to_string());
        self
    }
}

impl QueryFilter for PartitionFilter {
    fn for_space(&self, space: &str) -> Option<KeyValuePredicate> {
        if self.space.as_deref().is_some_and(|s| s != space) {
            return None;
        }
        let owned = self.owned.clone();
        let n = self.partitions;
        Some(Arc::new(move |key: &Value, _val: Option<&Value>| {
            owned.contains(&partition_of(key, n))
        }))
    }

    fn is_value_required(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// 记录谓词收到的 (key, value)
    struct RecordingFilter {
        value_required: bool,
        accept_keys: Vec<i64>,
        seen: Arc<Mutex<Vec<(Value, Option<Value>)>>>,
    }

    impl QueryFilter for RecordingFilter {
        fn for_space(&self, _space: &str) -> Option<KeyValuePredicate> {
            let seen = self.seen.clone();
            let accept = self.accept_keys.clone();
            Some(Arc::new(move |k: &Value, v: Option<&Value>| {
                seen.lock().push((k.clone(), v.cloned()));
                matches!(k, Value::Int(i) if accept.contains(i))
            }))
        }

        fn is_value_required(&self) -> bool {
            self.value_required
        }
    }

    fn recording(value_required: bool, accept_keys: Vec<i64>) -> RecordingFilter {
        RecordingFilter {
            value_required,
            accept_keys,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn keys(rows: impl Iterator<Item = Row>) -> Vec<Value> {
        rows.map(|r| r.key).collect()
    }

    #[test]
    fn key_only_predicate_never_sees_values() {
        let rows = vec![Row::expiring(1, "A", 500), Row::expiring(2, "B", 2000)];
        let f = recording(false, vec![1, 2]);
        let it = FilteringIter::new(rows.into_iter(), 1000, Some(&f), "s");
        assert_eq!(keys(it), vec![Value::Int(2)]);

        let seen = f.seen.lock();
        assert_eq!(seen.len(), 1, "expired row must not reach the predicate");
        assert_eq!(seen[0], (Value::Int(2), None));
    }

    #[test]
    fn expired_rows_dropped_even_if_predicate_accepts() {
        let rows = vec![
            Row::expiring(1, "a", 1000),
            Row::expiring(2, "b", 999),
            Row::expiring(3, "c", 1001),
            Row::new(4, "d"),
        ];
        let f = recording(true, vec![1, 2, 3, 4]);
        let it = FilteringIter::new(rows.into_iter(), 1000, Some(&f), "s");
        assert_eq!(keys(it), vec![Value::Int(3), Value::Int(4)]);
    }

    #[test]
    fn no_predicate_yields_all_live_rows() {
        let rows = vec![Row::expiring(1, "a", 10), Row::expiring(2, "b", 11), Row::new(3, "c")];
        let it = FilteringIter::new(rows.into_iter(), 10, None, "s");
        assert_eq!(keys(it), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn value_passed_when_required() {
        let rows = vec![Row::new(1, "a"), Row::new(2, "b")];
        let f = recording(true, vec![2]);
        let it = FilteringIter::new(rows.into_iter(), 0, Some(&f), "s");
        assert_eq!(keys(it), vec![Value::Int(2)]);
        let seen = f.seen.lock();
        assert_eq!(seen[0].1, Some(Value::Str("a".into())));
        assert_eq!(seen[1].1, Some(Value::Str("b".into())));
    }

    #[test]
    #[should_panic(expected = "row key must be present")]
    fn null_key_under_predicate_is_fatal() {
        let rows = vec![Row {
            key: Value::Null,
            value: Value::Int(1),
            expire_at: None,
        }];
        let f = recording(false, vec![]);
        let _ = FilteringIter::new(rows.into_iter(), 0, Some(&f), "s").count();
    }

    #[test]
    #[should_panic(expected = "row value must be present")]
    fn null_value_when_required_is_fatal() {
        let rows = vec![Row {
            key: Value::Int(1),
            value: Value::Null,
            expire_at: None,
        }];
        let f = recording(true, vec![1]);
        let _ = FilteringIter::new(rows.into_iter(), 0, Some(&f), "s").count();
    }

    #[test]
    fn partition_filter_scoped_to_space() {
        let all: Vec<Row> = (0..64).map(|i| Row::new(i, "v")).collect();
        let owned: Vec<u32> = (0..4).collect();
        let f = PartitionFilter::new(8, owned).for_only("orders");

        let visible = FilteringIter::new(all.clone().into_iter(), 0, Some(&f), "orders").count();
        let expected = all
            .iter()
            .filter(|r| partition_of(&r.key, 8) < 4)
            .count();
        assert_eq!(visible, expected);

        let other = FilteringIter::new(all.into_iter(), 0, Some(&f), "people").count();
        assert_eq!(other, 64);
    }
}
