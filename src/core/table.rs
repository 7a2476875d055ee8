/// 表的分布方式
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Distribution {
    /// 按亲和列分区；`affinity_column = None` 时按键分区
    Partitioned { affinity_column: Option<usize> },
    /// 每个节点全量副本
    Replicated,
}

/// 索引所属的表（外部协作方，只暴露列布局与空间名）。
///
/// 索引只持有 `Arc<Table>`，rebuild 时刷新，不拥有表。
#[derive(Clone, Debug)]
pub struct Table {
    pub name: String,
    /// 隔离空间名，用来把查询过滤器特化到本表
    pub space: String,
    pub columns: Vec<String>,
    pub distribution: Distribution,
}

impl Table {
    pub fn partitioned(name: &str, space: &str) -> Self {
        Self {
            name: name.to_string(),
            space: space.to_string(),
            columns: vec!["_key".to_string(), "_val".to_string()],
            distribution: Distribution::Partitioned {
                affinity_column: None,
            },
        }
    }

    pub fn replicated(name: &str, space: &str) -> Self {
        Self {
            distribution: Distribution::Replicated,
            ..Self::partitioned(name, space)
        }
    }

    pub fn space_name(&self) -> &str {
        &self.space
    }

    pub fn is_partitioned(&self) -> bool {
        matches!(self.distribution, Distribution::Partitioned { .. })
    }
}
