//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：日志文件、浏览器、适配器、探测器、仲裁器
//! 2. **状态恢复**：从快照恢复策略缓存和退避状态
//! 3. **批量加载**：扫描批次目录，加载表单计划
//! 4. **顺序处理**：批次之间串行，每个批次交给 [`BatchOrchestrator`]
//! 5. **状态保存**：每个批次结束后写快照，中途退出也不会丢失学习到的策略
//! 6. **全局统计**：汇总所有批次
//!
//! Ctrl-C 会请求协作式取消：正在进行的提交完成后停止。

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chromiumoxide::Browser;
use tracing::{error, info, warn};

use crate::browser;
use crate::config::Config;
use crate::infrastructure::{ChromiumAdapter, JsExecutor};
use crate::models::{load_all_batches, load_form_plan, ItemBatch};
use crate::orchestrator::BatchOrchestrator;
use crate::resilience::{AvailabilityMonitor, ConcurrencyArbiter, HttpProber};
use crate::services::{EngineSnapshot, SnapshotStore, StrategyCache};
use crate::utils::logging;

/// 应用主结构
pub struct App {
    config: Config,
    _browser: Browser,
    orchestrator: BatchOrchestrator,
    store: SnapshotStore,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::init_log_file(&config.output_log_file)?;
        logging::log_startup(config.engine.arbiter.max_concurrent_operations);

        let (browser, page) = browser::open_browser(&config).await?;
        let adapter = Arc::new(ChromiumAdapter::new(JsExecutor::new(page), &config));

        let arbiter = ConcurrencyArbiter::from_config(&config.engine.arbiter);
        let prober = Arc::new(HttpProber::new(
            config.target_url.clone(),
            config.engine.backoff.probe_timeout(),
        )?);
        let monitor = Arc::new(AvailabilityMonitor::new(
            prober,
            arbiter.clone(),
            &config.engine.backoff,
        ));

        let store = SnapshotStore::new(&config.snapshot_file);
        let snapshot = store.load().await;
        let cache = StrategyCache::from_config(&config.engine.cache).into_shared();
        StrategyCache::lock(&cache).restore(snapshot.strategies);
        if let Some(resilience) = &snapshot.resilience {
            monitor.restore(resilience);
        }

        let plan = load_form_plan(Path::new(&config.form_plan_file)).await?;
        let orchestrator = BatchOrchestrator::new(adapter, arbiter, monitor, plan, &config.engine)
            .with_cache(cache);

        Ok(Self {
            config,
            _browser: browser,
            orchestrator,
            store,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        info!("\n📁 正在扫描待处理的批次...");
        let batches = load_all_batches(&self.config.items_folder).await?;

        if batches.is_empty() {
            warn!("⚠️ 没有找到待处理的TOML文件，程序结束");
            return Ok(());
        }

        let total_items = batches.iter().map(|b| b.items.len()).sum();
        logging::log_batches_loaded(batches.len(), total_items);

        let cancellation = self.orchestrator.cancellation();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 收到中断信号，当前条目完成后停止");
                cancellation.cancel();
            }
        });

        let stats = self.process_all_batches(&batches).await?;

        logging::print_final_stats(
            stats.succeeded,
            stats.skipped,
            stats.failed,
            total_items,
            &self.config.output_log_file,
        );
        Ok(())
    }

    async fn process_all_batches(&self, batches: &[ItemBatch]) -> Result<ProcessingStats> {
        let mut stats = ProcessingStats::default();
        let policy = &self.config.engine.session;

        for (idx, batch) in batches.iter().enumerate() {
            let batch_num = idx + 1;
            if self.orchestrator.cancellation().is_cancelled() {
                warn!("🛑 已取消，跳过剩余 {} 个批次", batches.len() - idx);
                break;
            }

            logging::log_batch_start(batch_num, batches.len(), &batch.name, batch.items.len());

            let report = match self.orchestrator.run_batch(&batch.items, policy).await {
                Ok(report) => report,
                Err(e) => {
                    error!("[批次 {}] ❌ 批次被拒绝: {}", batch_num, e);
                    stats.failed += batch.items.len();
                    continue;
                }
            };

            logging::print_report_details(&report);
            logging::log_batch_complete(batch_num, &report);
            if let Err(e) =
                logging::append_report(&self.config.output_log_file, &batch.name, &report)
            {
                warn!("⚠️ 写入日志文件失败: {}", e);
            }

            stats.succeeded += report.succeeded;
            stats.skipped += report.skipped;
            stats.failed += report.failed;

            self.save_snapshot().await;
        }

        Ok(stats)
    }

    /// 保存快照，失败只记日志
    async fn save_snapshot(&self) {
        let snapshot = build_snapshot(&self.orchestrator);
        if let Err(e) = self.store.save(&snapshot).await {
            warn!("⚠️ 保存快照失败: {}", e);
        }
    }
}

fn build_snapshot(orchestrator: &BatchOrchestrator) -> EngineSnapshot {
    EngineSnapshot {
        resilience: Some(orchestrator.monitor().snapshot()),
        strategies: StrategyCache::lock(orchestrator.cache()).snapshot(),
    }
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    succeeded: usize,
    skipped: usize,
    failed: usize,
}
