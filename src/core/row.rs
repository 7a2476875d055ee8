use serde::{Deserialize, Serialize};

/// 键列下标
pub const KEY_COL: usize = 0;
/// 值列下标
pub const VAL_COL: usize = 1;

/// 行里的标量值（键列 / 值列的内容）。
///
/// `Ord` 由 derive 给出：先按变体顺序，再按内容。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// 索引行：键列 + 值列，键值行额外带过期时间（epoch 毫秒）。
///
/// `expire_at = None` 表示非键值行，永不过期。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub key: Value,
    pub value: Value,
    pub expire_at: Option<u64>,
}

impl Row {
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expire_at: None,
        }
    }

    pub fn expiring(key: impl Into<Value>, value: impl Into<Value>, expire_at: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expire_at: Some(expire_at),
        }
    }

    /// `expire_at <= now` 的行在任何扫描里都视为不存在。
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expire_at, Some(t) if t <= now)
    }

    pub fn column(&self, col: usize) -> Option<&Value> {
        match col {
            KEY_COL => Some(&self.key),
            VAL_COL => Some(&self.value),
            _ => None,
        }
    }

    pub fn search_row(&self) -> SearchRow {
        SearchRow {
            key: self.key.clone(),
        }
    }
}

/// 只带键的查找行（`remove` 用）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchRow {
    pub key: Value,
}

impl SearchRow {
    pub fn new(key: impl Into<Value>) -> Self {
        Self { key: key.into() }
    }
}

/// 当前时间（epoch 毫秒）。扫描只在构造时读一次。
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_is_inclusive() {
        let r = Row::expiring(1, "a", 1000);
        assert!(r.is_expired(1000));
        assert!(r.is_expired(1001));
        assert!(!r.is_expired(999));
        assert!(!Row::new(1, "a").is_expired(u64::MAX));
    }

    #[test]
    fn columns_by_index() {
        let r = Row::new(7, "seven");
        assert_eq!(r.column(KEY_COL), Some(&Value::Int(7)));
        assert_eq!(r.column(VAL_COL), Some(&Value::Str("seven".into())));
        assert_eq!(r.column(2), None);
    }
}
