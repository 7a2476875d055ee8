use std::collections::HashMap;
use std::sync::Arc;

use crate::config::CollocationConfig;
use crate::core::Table;
use crate::query::context::{QueryContext, QueryPhase};

/// 数据共置，无网络惩罚
pub const MULTIPLIER_COLLOCATED: u32 = 1;

/// 当前表与前面已选表的连接方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinCondition {
    /// 无连接条件（笛卡尔积或首个表）
    None,
    /// 在亲和列上等值连接
    AffinityKey,
    /// 在本表主键上等值连接
    PrimaryKey,
    /// 其他条件
    Other,
}

/// 参与 join 的一个表过滤器
#[derive(Clone, Debug)]
pub struct TableFilter {
    pub table: Arc<Table>,
    pub alias: String,
    pub join: JoinCondition,
}

impl TableFilter {
    pub fn new(table: Arc<Table>, alias: &str, join: JoinCondition) -> Self {
        Self {
            table,
            alias: alias.to_string(),
            join,
        }
    }
}

/// 子查询嵌套信息
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubQueryInfo {
    pub depth: u32,
    /// 子查询是否与外层查询共置
    pub collocated_with_outer: bool,
}

/// 子查询计划代价缓存（规划会话内）。
///
/// 平常子计划代价只取决于索引条件掩码与排序；分布式 join 时还取决于前面表过滤器的
/// 顺序，所以每次算乘数前都要清空。
#[derive(Debug, Default)]
pub struct SubPlanCache {
    entries: HashMap<String, f64>,
    clears: u64,
}

impl SubPlanCache {
    pub fn insert(&mut self, plan: &str, cost: f64) {
        self.entries.insert(plan.to_string(), cost);
    }

    pub fn get(&self, plan: &str) -> Option<f64> {
        self.entries.get(plan).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.clears += 1;
        }
    }

    /// 实际发生清空的次数
    pub fn clears(&self) -> u64 {
        self.clears
    }
}

pub trait CollocationModel {
    /// 返回值 >= 1；大于 1 表示需要跨节点搬运数据
    fn calculate_multiplier(&self) -> u32;
}

/// 每次调用都重新构建模型；如需记忆化，由模型自己在查询上下文生命周期内完成
pub trait CollocationModelBuilder: Send + Sync {
    fn build(
        &self,
        qctx: &QueryContext,
        sub_query: Option<&SubQueryInfo>,
        filters: &[TableFilter],
        current: usize,
    ) -> Box<dyn CollocationModel>;
}

/// 规划会话（优化器一侧的状态）
pub struct PlanSession {
    pub sub_plan_cache: SubPlanCache,
    pub sub_query: Option<SubQueryInfo>,
    builder: Arc<dyn CollocationModelBuilder>,
}

impl PlanSession {
    pub fn new(builder: Arc<dyn CollocationModelBuilder>) -> Self {
        Self {
            sub_plan_cache: SubPlanCache::default(),
            sub_query: None,
            builder,
        }
    }

    pub fn with_sub_query(mut self, info: SubQueryInfo) -> Self {
        self.sub_query = Some(info);
        self
    }
}

/// 分布式 join 的代价乘数。
///
/// 只在 prepare 阶段、开启分布式 join、且不是子查询表达式准备时计算；
/// 执行阶段优化器不再重排 join 顺序，乘数恒定，不影响索引选择。
pub fn distributed_multiplier(
    qctx: Option<&QueryContext>,
    session: &mut PlanSession,
    filters: &[TableFilter],
    current: usize,
) -> u32 {
    let Some(qctx) = qctx else {
        return MULTIPLIER_COLLOCATED;
    };
    if qctx.phase() != QueryPhase::Prepare
        || !qctx.distributed_joins()
        || qctx.preparing_expression()
    {
        return MULTIPLIER_COLLOCATED;
    }

    session.sub_plan_cache.clear();

    assert!(
        current < filters.len(),
        "current filter {} out of range ({} filters)",
        current,
        filters.len()
    );

    let model = session
        .builder
        .build(qctx, session.sub_query.as_ref(), filters, current);
    let m = model.calculate_multiplier();
    tracing::debug!(
        "Distributed multiplier for filter {} ({}): {}",
        current,
        filters[current].alias,
        m
    );
    m.max(MULTIPLIER_COLLOCATED)
}

/// 默认模型：按表分布与连接条件估计网络代价
pub struct AffinityModelBuilder {
    cfg: CollocationConfig,
}

impl AffinityModelBuilder {
    pub fn new(cfg: CollocationConfig) -> Self {
        Self { cfg }
    }
}

impl CollocationModelBuilder for AffinityModelBuilder {
    fn build(
        &self,
        _qctx: &QueryContext,
        sub_query: Option<&SubQueryInfo>,
        filters: &[TableFilter],
        current: usize,
    ) -> Box<dyn CollocationModel> {
        let f = &filters[current];
        let prior_partitioned = filters[..current].iter().any(|p| p.table.is_partitioned());
        Box::new(AffinityModel {
            partitioned: f.table.is_partitioned(),
            prior_partitioned,
            join: f.join,
            detached_sub_query: sub_query.is_some_and(|s| s.depth > 0 && !s.collocated_with_outer),
            cfg: self.cfg.clone(),
        })
    }
}

pub struct AffinityModel {
    partitioned: bool,
    prior_partitioned: bool,
    join: JoinCondition,
    detached_sub_query: bool,
    cfg: CollocationConfig,
}

impl CollocationModel for AffinityModel {
    fn calculate_multiplier(&self) -> u32 {
        if !self.partitioned {
            return MULTIPLIER_COLLOCATED;
        }
        if !self.prior_partitioned {
            // 作为驱动表；脱离外层分布的子查询仍要广播
            return if self.detached_sub_query {
                self.cfg.broadcast_multiplier
            } else {
                MULTIPLIER_COLLOCATED
            };
        }
        match self.join {
            JoinCondition::AffinityKey => MULTIPLIER_COLLOCATED,
            JoinCondition::PrimaryKey => self.cfg.unicast_multiplier,
            JoinCondition::None | JoinCondition::Other => self.cfg.broadcast_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct BuildCall {
        aliases: Vec<String>,
        current: usize,
        sub_query: Option<SubQueryInfo>,
        phase: QueryPhase,
    }

    /// 记录 build 调用，返回固定乘数
    struct RecordingBuilder {
        calls: Mutex<Vec<BuildCall>>,
        multiplier: u32,
    }

    struct Fixed(u32);

    impl CollocationModel for Fixed {
        fn calculate_multiplier(&self) -> u32 {
            self.0
        }
    }

    impl CollocationModelBuilder for RecordingBuilder {
        fn build(
            &self,
            qctx: &QueryContext,
            sub_query: Option<&SubQueryInfo>,
            filters: &[TableFilter],
            current: usize,
        ) -> Box<dyn CollocationModel> {
            self.calls.lock().push(BuildCall {
                aliases: filters.iter().map(|f| f.alias.clone()).collect(),
                current,
                sub_query: sub_query.copied(),
                phase: qctx.phase(),
            });
            Box::new(Fixed(self.multiplier))
        }
    }

    fn recording(multiplier: u32) -> Arc<RecordingBuilder> {
        Arc::new(RecordingBuilder {
            calls: Mutex::new(Vec::new()),
            multiplier,
        })
    }

    fn filters() -> Vec<TableFilter> {
        let t = Arc::new(Table::partitioned("person", "people"));
        vec![
            TableFilter::new(t.clone(), "F0", JoinCondition::None),
            TableFilter::new(t.clone(), "F1", JoinCondition::Other),
            TableFilter::new(t, "F2", JoinCondition::PrimaryKey),
        ]
    }

    fn prepared() -> QueryContext {
        QueryContext::new(QueryPhase::Prepare).with_distributed_joins(true)
    }

    #[test]
    fn fast_path_never_builds_or_clears() {
        let b = recording(99);
        let mut ses = PlanSession::new(b.clone());
        ses.sub_plan_cache.insert("select 1", 1.0);
        assert!(ses.sub_plan_cache.get("select 2").is_none());
        let fs = filters();

        let cases = vec![
            None,
            Some(QueryContext::new(QueryPhase::Local).with_distributed_joins(true)),
            Some(QueryContext::new(QueryPhase::Map).with_distributed_joins(true)),
            Some(QueryContext::new(QueryPhase::Prepare)),
            Some(prepared().with_preparing_expression(true)),
        ];
        for q in &cases {
            assert_eq!(distributed_multiplier(q.as_ref(), &mut ses, &fs, 1), MULTIPLIER_COLLOCATED);
        }

        // 表达式准备期间临时打开标记，结束后恢复
        let mut q = prepared();
        q.set_preparing_expression(true);
        assert_eq!(distributed_multiplier(Some(&q), &mut ses, &fs, 1), MULTIPLIER_COLLOCATED);
        q.set_preparing_expression(false);
        assert!(q.distributed_joins() && !q.preparing_expression());

        assert!(b.calls.lock().is_empty());
        assert_eq!(ses.sub_plan_cache.len(), 1);
        assert_eq!(ses.sub_plan_cache.clears(), 0);
    }

    #[test]
    fn prepare_phase_clears_cache_and_builds_with_inputs() {
        let b = recording(137);
        let info = SubQueryInfo {
            depth: 1,
            collocated_with_outer: true,
        };
        let mut ses = PlanSession::new(b.clone()).with_sub_query(info);
        ses.sub_plan_cache.insert("(select * from t) v", 3.5);
        assert_eq!(ses.sub_plan_cache.get("(select * from t) v"), Some(3.5));
        let q = prepared();

        let m = distributed_multiplier(Some(&q), &mut ses, &filters(), 1);
        assert_eq!(m, 137);
        assert!(ses.sub_plan_cache.is_empty());
        assert_eq!(ses.sub_plan_cache.clears(), 1);

        let calls = b.calls.lock();
        assert_eq!(
            *calls,
            vec![BuildCall {
                aliases: vec!["F0".into(), "F1".into(), "F2".into()],
                current: 1,
                sub_query: Some(info),
                phase: QueryPhase::Prepare,
            }]
        );
    }

    #[test]
    fn model_built_fresh_per_call() {
        let b = recording(2);
        let mut ses = PlanSession::new(b.clone());
        let q = prepared();
        let fs = filters();
        for i in 0..fs.len() {
            distributed_multiplier(Some(&q), &mut ses, &fs, i);
        }
        assert_eq!(b.calls.lock().len(), 3);
    }

    #[test]
    fn affinity_model_multipliers() {
        let cfg = CollocationConfig::default();
        let mut ses = PlanSession::new(Arc::new(AffinityModelBuilder::new(cfg.clone())));
        let q = prepared();

        let part = Arc::new(Table::partitioned("orders", "orders"));
        let repl = Arc::new(Table::replicated("country", "dict"));
        let fs = vec![
            TableFilter::new(repl.clone(), "c", JoinCondition::None),
            TableFilter::new(part.clone(), "o", JoinCondition::Other),
            TableFilter::new(part.clone(), "i", JoinCondition::AffinityKey),
            TableFilter::new(part.clone(), "p", JoinCondition::PrimaryKey),
            TableFilter::new(part, "x", JoinCondition::Other),
            TableFilter::new(repl, "r", JoinCondition::Other),
        ];

        let got: Vec<u32> = (0..fs.len())
            .map(|i| distributed_multiplier(Some(&q), &mut ses, &fs, i))
            .collect();
        assert_eq!(
            got,
            vec![
                1,
                1,
                1,
                cfg.unicast_multiplier,
                cfg.broadcast_multiplier,
                1
            ]
        );
    }

    #[test]
    fn detached_sub_query_driver_is_broadcast() {
        let cfg = CollocationConfig::default();
        let b = Arc::new(AffinityModelBuilder::new(cfg.clone()));
        let mut ses = PlanSession::new(b).with_sub_query(SubQueryInfo {
            depth: 1,
            collocated_with_outer: false,
        });
        let t = Arc::new(Table::partitioned("orders", "orders"));
        let fs = vec![TableFilter::new(t, "o", JoinCondition::None)];
        let m = distributed_multiplier(Some(&prepared()), &mut ses, &fs, 0);
        assert_eq!(m, cfg.broadcast_multiplier);
    }
}
