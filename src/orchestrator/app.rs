//! 应用入口 - 编排层
//!
//! 按配置组装浏览器会话工厂、提取流程和存储后端，交给 [`BatchOrchestrator`] 运行。

use anyhow::Result;
use tokio::sync::watch;
use tracing::warn;

use crate::config::{Config, StoreConfig};
use crate::error::AppError;
use crate::infrastructure::ChromeSessionFactory;
use crate::orchestrator::batch_runner::{BatchOrchestrator, RunPolicy, RunSummary};
use crate::store::{CsvResultSink, CsvWorkSource, PgStore, ResultSink, WorkSource};
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::{ExtractionFlow, FlowSettings};

/// 应用主结构
pub struct App {
    config: Config,
}

impl App {
    /// 初始化应用（日志需已初始化）
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);
        Ok(Self { config })
    }

    /// 运行应用主逻辑
    pub async fn run(self) -> Result<RunSummary> {
        let shutdown = listen_for_ctrl_c();

        let summary = match &self.config.store {
            StoreConfig::Postgres {
                database_url,
                backlog_table,
                result_table,
            } => {
                let store = PgStore::connect(database_url, backlog_table, result_table).await?;
                self.run_with(store.clone(), store, shutdown).await?
            }
            StoreConfig::Csv { input, output } => {
                let source = CsvWorkSource::open(input)?;
                let sink = CsvResultSink::open(output)?;
                self.run_with(source, sink, shutdown).await?
            }
        };

        print_final_stats(&summary, &self.config.logging.log_file);
        Ok(summary)
    }

    async fn run_with<W, S>(
        &self,
        source: W,
        sink: S,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, AppError>
    where
        W: WorkSource,
        S: ResultSink,
    {
        let factory = ChromeSessionFactory::new(
            self.config.browser.clone(),
            self.config.timeouts.clone(),
            self.config.selectors.clone(),
        );
        let flow = ExtractionFlow::new(FlowSettings::from_config(&self.config));

        let mut orchestrator = BatchOrchestrator::new(
            factory,
            flow,
            source,
            sink,
            RunPolicy::from_config(&self.config),
        )
        .with_shutdown(shutdown);

        orchestrator.run().await
    }
}

/// Ctrl-C 只置位停止标志，当前 CPF 处理完后才退出
fn listen_for_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 收到 Ctrl-C，当前 CPF 完成后停止");
            let _ = tx.send(true);
        }
    });
    rx
}
