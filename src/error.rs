use thiserror::Error;

use crate::index::IndexId;

pub type IndexResult<T> = Result<T, IndexError>;

/// 索引层错误。
///
/// 协议不变量被破坏（重复 take、无 take 就 release）属于调用方 bug，直接 panic，
/// 不走这里；预留失败也不是错误（返回 `None`，调用方换更新的快照重扫）。
#[derive(Error, Debug)]
pub enum IndexError {
    /// 引擎通用入口不支持的操作（`add` / `remove row` / `remove index` / `truncate` / `rename`）。
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Index {0} is destroyed")]
    Destroyed(IndexId),

    /// rebuild 被取消；原索引保持不变。
    #[error("Index rebuild interrupted")]
    Interrupted,

    #[error("Config error: {0}")]
    Config(String),
}
