use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use grid_index::config::GridIndexConfig;
use grid_index::core::{now_millis, Row, Table};
use grid_index::index::{
    rebuild_index, CancelToken, IndexBase, IndexExt, MemIndex, PartitionFilter,
};
use grid_index::query::{
    AffinityModelBuilder, JoinCondition, PlanSession, QueryContext, QueryPhase, TableFilter,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grid-index", about = "Snapshot-consistent index scan and join costing demo")]
struct Args {
    /// TOML 配置文件
    #[arg(long, default_value = "grid-index.toml")]
    config: PathBuf,

    /// 装载行数
    #[arg(long, default_value_t = 10_000)]
    rows: i64,

    /// 每隔一行设置的 TTL（毫秒）；0 表示该行立即过期
    #[arg(long, default_value_t = 0)]
    ttl_ms: u64,

    /// 分区总数（本节点拥有前一半）
    #[arg(long, default_value_t = 16)]
    partitions: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = GridIndexConfig::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.filter)),
        )
        .init();

    info!("Starting grid-index demo: rows={}", args.rows);

    let person = Arc::new(Table::partitioned("person", "people"));
    let index = Arc::new(MemIndex::new("person_pk", person.clone(), cfg.rebuild.clone()));

    let now = now_millis();
    for k in 0..args.rows {
        let row = if k % 2 == 0 {
            Row::expiring(k, format!("p{k}"), now + args.ttl_ms)
        } else {
            Row::new(k, format!("p{k}"))
        };
        index.put(row)?;
    }

    // 本地执行：只看本节点拥有的分区
    let owned: Vec<u32> = (0..args.partitions / 2).collect();
    let filter = Arc::new(PartitionFilter::new(args.partitions, owned).for_only("people"));
    let mut qctx = QueryContext::new(QueryPhase::Local).with_filter(filter);
    match index.open_scan(Some(&mut qctx)) {
        Some(scan) => {
            let visible = scan.count();
            info!("Scan visible rows: {} of {}", visible, index.len());
        }
        None => info!("Snapshot reservation failed, scan must be restarted"),
    }
    qctx.clear();

    // 规划期：三表分布式 join 的代价乘数
    let orders = Arc::new(Table::partitioned("orders", "orders"));
    let country = Arc::new(Table::replicated("country", "dict"));
    let filters = vec![
        TableFilter::new(person, "p", JoinCondition::None),
        TableFilter::new(orders, "o", JoinCondition::PrimaryKey),
        TableFilter::new(country, "c", JoinCondition::Other),
    ];
    let plan_ctx = QueryContext::new(QueryPhase::Prepare).with_distributed_joins(true);
    let mut session = PlanSession::new(Arc::new(AffinityModelBuilder::new(cfg.collocation.clone())));
    for i in 0..filters.len() {
        let m = index.distributed_multiplier(Some(&plan_ctx), &mut session, &filters, i);
        info!("Join filter {} ({}): multiplier={}", i, filters[i].alias, m);
    }

    // 可取消的后台 rebuild（Ctrl-C 取消）
    if index.need_rebuild() {
        let cancel = CancelToken::new();
        let dyn_index: Arc<dyn IndexBase> = index.clone();
        let task_cancel = cancel.clone();
        let mut task =
            tokio::task::spawn_blocking(move || rebuild_index(&dyn_index, &task_cancel));

        let finished = tokio::select! {
            res = &mut task => Some(res?),
            _ = tokio::signal::ctrl_c() => None,
        };
        let rebuilt = match finished {
            Some(r) => r,
            None => {
                info!("Cancelling rebuild...");
                cancel.cancel();
                task.await?
            }
        };
        match rebuilt {
            Ok(replacement) => {
                info!("Rebuild done: {} -> {}", index.id(), replacement.id());
                if replacement.id() != index.id() {
                    index.destroy();
                }
            }
            Err(e) => info!("Rebuild aborted: {}", e),
        }
    }

    print!("{}", index.core().stats().report());
    Ok(())
}
