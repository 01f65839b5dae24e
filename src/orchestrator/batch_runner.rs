//! 批处理编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **会话管理**：启动浏览器、登录、进入查询入口；会话失效时重建
//! 2. **分批拉取**：按批从工作来源拉取待处理的 CPF，直到没有剩余
//! 3. **逐个处理**：对每个 CPF 调用提取流程，按失败类别决定重试方式
//! 4. **先写后标记**：结果写入成功后才标记为已处理
//! 5. **优雅退出**：无论成功与否都释放会话和存储
//!
//! 状态：Idle → SessionEstablished → BatchLoop ⇄ Recovering → Draining → Terminated

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Credentials};
use crate::error::{AppError, DriverError, ExtractError, StoreError};
use crate::infrastructure::{PageDriver, SessionFactory};
use crate::models::{Outcome, WorkItem, WorkKey};
use crate::orchestrator::retry::{classify, AttemptFailure, FailureClass};
use crate::store::{ResultSink, WorkSource};
use crate::utils::logging::{log_batch_complete, log_batch_start};
use crate::utils::truncate_text;
use crate::workflow::{is_at_entry, Extractor, ItemCtx};

/// 编排器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    SessionEstablished,
    BatchLoop,
    Recovering,
    Draining,
    Terminated,
}

/// 运行参数
#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub login_url: String,
    pub query_url: String,
    pub credentials: Credentials,
    pub batch_size: usize,
    /// 单个 CPF 的最大尝试次数，同时也是会话重建的最大次数
    pub max_attempts: usize,
    pub retry_delay: Duration,
    pub item_delay: Duration,
    /// 进入查询入口后的稳定时间
    pub entry_settle: Duration,
}

impl RunPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            login_url: config.portal.login_url.clone(),
            query_url: config.portal.query_url.clone(),
            credentials: config.portal.credentials.clone(),
            batch_size: config.run.batch_size,
            max_attempts: config.run.max_attempts,
            retry_delay: config.run.retry_delay,
            item_delay: config.run.item_delay,
            entry_settle: config.timeouts.entry_settle,
        }
    }
}

/// 运行统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    /// 已写入结果的 CPF 数
    pub processed: usize,
    pub with_records: usize,
    pub empty: usize,
    pub errors: usize,
    pub session_recoveries: usize,
}

/// 单批统计
#[derive(Debug, Default)]
struct BatchTally {
    with_records: usize,
    empty: usize,
    errors: usize,
}

/// 批处理编排器
///
/// 单线程顺序处理：同一时刻最多一个浏览器会话、一个 CPF。
pub struct BatchOrchestrator<F, X, W, S>
where
    F: SessionFactory,
{
    factory: F,
    extractor: X,
    source: W,
    sink: S,
    policy: RunPolicy,
    session: Option<F::Session>,
    state: OrchestratorState,
    summary: RunSummary,
    shutdown: Option<watch::Receiver<bool>>,
    /// 结果已写入但标记失败的 CPF，再次拉取到时只补标记
    unmarked: HashSet<WorkKey>,
    handled_any: bool,
}

impl<F, X, W, S> BatchOrchestrator<F, X, W, S>
where
    F: SessionFactory,
    X: Extractor<F::Session>,
    W: WorkSource,
    S: ResultSink,
{
    pub fn new(factory: F, extractor: X, source: W, sink: S, policy: RunPolicy) -> Self {
        Self {
            factory,
            extractor,
            source,
            sink,
            policy,
            session: None,
            state: OrchestratorState::Idle,
            summary: RunSummary::default(),
            shutdown: None,
            unmarked: HashSet::new(),
            handled_any: false,
        }
    }

    /// 接收停止信号；只在两个 CPF 之间检查
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// 运行直到工作来源为空、收到停止信号或出现致命错误
    ///
    /// 任何情况下都会关闭会话和存储。
    pub async fn run(&mut self) -> Result<RunSummary, AppError> {
        let result = self.run_inner().await;

        self.transition(OrchestratorState::Draining);
        self.release().await;
        self.transition(OrchestratorState::Terminated);

        match result {
            Ok(()) => Ok(self.summary.clone()),
            Err(e) => {
                error!("❌ 批处理终止: {}", e);
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), AppError> {
        self.establish_with_retry().await?;
        self.transition(OrchestratorState::BatchLoop);

        let mut batch_num = 0;
        loop {
            if self.shutdown_requested() {
                info!("🛑 收到停止信号，不再拉取新的批次");
                return Ok(());
            }

            let batch = self
                .source
                .fetch_pending_batch(self.policy.batch_size)
                .await?;
            if batch.is_empty() {
                info!("✓ 没有待处理的 CPF");
                return Ok(());
            }

            batch_num += 1;
            self.summary.batches += 1;
            log_batch_start(batch_num, batch.len());

            let mut tally = BatchTally::default();
            for (idx, item) in batch.iter().enumerate() {
                if self.shutdown_requested() {
                    info!("🛑 收到停止信号，当前批次剩余 {} 个 CPF 留待下次", batch.len() - idx);
                    log_batch_complete(batch_num, tally.with_records, tally.empty, tally.errors);
                    return Ok(());
                }
                if self.handled_any {
                    sleep(self.policy.item_delay).await;
                }
                self.handled_any = true;

                self.process_item(item, batch_num, idx + 1, &mut tally)
                    .await?;
            }

            log_batch_complete(batch_num, tally.with_records, tally.empty, tally.errors);
        }
    }

    /// 处理一个 CPF：最多 `max_attempts` 次尝试，之后写入错误结果
    async fn process_item(
        &mut self,
        item: &WorkItem,
        batch: usize,
        position: usize,
        tally: &mut BatchTally,
    ) -> Result<(), AppError> {
        if self.unmarked.remove(&item.key) {
            debug!("CPF {} 的结果已写入，补做标记", item.cpf);
            return self.mark(item).await;
        }

        let mut ctx = ItemCtx::new(
            item.cpf.display(),
            batch,
            position,
            self.policy.max_attempts,
        );

        let failure = loop {
            let failure = match self.attempt(item, &ctx).await {
                Ok(outcome) => {
                    self.count(&outcome, tally);
                    info!("{} ✓ 已写入结果: {}", ctx, outcome.kind());
                    return self.finish(item).await;
                }
                Err(failure) => failure,
            };

            let class = classify(&failure);
            warn!(
                "{} ⚠️ 尝试失败 ({:?}): {}",
                ctx,
                class,
                truncate_text(&failure.to_string(), 300)
            );

            match class {
                FailureClass::Fatal => return Err(failure.into()),
                FailureClass::SessionFatal => self.recover_session().await?,
                FailureClass::Retryable => self.reset_to_entry().await,
            }

            if ctx.is_last_attempt() {
                break failure;
            }
            sleep(self.policy.retry_delay).await;
            ctx.next_attempt();
        };

        error!("{} ❌ 已达到最大尝试次数，记录为错误", ctx);
        let outcome = Outcome::Error(failure.to_string());
        self.sink.record_outcome(item, &outcome).await?;
        self.count(&outcome, tally);
        self.finish(item).await
    }

    /// 一次尝试 = 确认位置 + 提取 + 写入结果
    async fn attempt(&mut self, item: &WorkItem, ctx: &ItemCtx) -> Result<Outcome, AttemptFailure> {
        let session = self.session.as_ref().ok_or_else(|| {
            ExtractError::Driver(DriverError::SessionLost {
                message: "没有可用的浏览器会话".to_string(),
            })
        })?;

        ensure_at_entry(session, &self.policy)
            .await
            .map_err(ExtractError::from)?;
        let outcome = self.extractor.extract(session, item, ctx).await?;
        self.sink.record_outcome(item, &outcome).await?;
        Ok(outcome)
    }

    /// 结果已写入：计数并标记
    async fn finish(&mut self, item: &WorkItem) -> Result<(), AppError> {
        self.summary.processed += 1;
        self.mark(item).await
    }

    /// 标记为已处理；单次写入失败时记下来，等再次拉取到时补标记
    async fn mark(&mut self, item: &WorkItem) -> Result<(), AppError> {
        match self.source.mark_processed(&item.key).await {
            Ok(()) => Ok(()),
            Err(e @ StoreError::Unavailable { .. }) | Err(e @ StoreError::InvalidIdentifier { .. }) => {
                Err(e.into())
            }
            Err(e) => {
                warn!("CPF {} 标记失败，稍后重试: {}", item.cpf, e);
                self.unmarked.insert(item.key.clone());
                Ok(())
            }
        }
    }

    fn count(&mut self, outcome: &Outcome, tally: &mut BatchTally) {
        match outcome {
            Outcome::Records(_) => {
                self.summary.with_records += 1;
                tally.with_records += 1;
            }
            Outcome::Empty => {
                self.summary.empty += 1;
                tally.empty += 1;
            }
            Outcome::Error(_) => {
                self.summary.errors += 1;
                tally.errors += 1;
            }
        }
    }

    /// 可重试失败后强制回到查询入口；失败只记日志，下一次尝试会再次检查
    async fn reset_to_entry(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(e) = session.open(&self.policy.query_url).await {
            warn!("返回查询入口失败: {}", e);
        }
    }

    // ========== 会话管理 ==========

    /// 丢弃旧会话（只终止一次），然后建立新会话
    async fn recover_session(&mut self) -> Result<(), AppError> {
        self.transition(OrchestratorState::Recovering);
        self.summary.session_recoveries += 1;
        warn!("🔄 浏览器会话失效，正在重建 (第 {} 次)", self.summary.session_recoveries);

        self.drop_session().await;
        self.establish_with_retry().await?;
        self.transition(OrchestratorState::BatchLoop);
        Ok(())
    }

    async fn establish_with_retry(&mut self) -> Result<(), AppError> {
        let max = self.policy.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=max {
            match self.establish().await {
                Ok(()) => {
                    if self.state == OrchestratorState::Idle {
                        self.transition(OrchestratorState::SessionEstablished);
                    }
                    info!("✓ 浏览器会话已就绪");
                    return Ok(());
                }
                Err(e) => {
                    warn!("建立会话失败 ({}/{}): {}", attempt, max, e);
                    last = Some(e);
                    if attempt < max {
                        sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        Err(AppError::Recovery {
            attempts: max,
            last: last.unwrap_or(DriverError::SessionLost {
                message: "未能建立会话".to_string(),
            }),
        })
    }

    /// 启动 → 登录 → 进入查询入口；中途失败会终止新会话
    async fn establish(&mut self) -> Result<(), DriverError> {
        let mut session = self.factory.launch().await?;
        match prepare_session(&session, &self.policy).await {
            Ok(()) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                session.terminate().await;
                Err(e)
            }
        }
    }

    async fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.terminate().await;
        }
    }

    /// 释放会话和存储；错误只记日志
    async fn release(&mut self) {
        self.drop_session().await;
        if let Err(e) = self.sink.close().await {
            warn!("关闭结果写入失败: {}", e);
        }
        if let Err(e) = self.source.close().await {
            warn!("关闭工作来源失败: {}", e);
        }
        info!("资源已释放");
    }

    fn transition(&mut self, next: OrchestratorState) {
        debug!("编排器状态: {:?} → {:?}", self.state, next);
        self.state = next;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }
}

async fn prepare_session<D: PageDriver>(session: &D, policy: &RunPolicy) -> Result<(), DriverError> {
    session.open(&policy.login_url).await?;
    session.authenticate(&policy.credentials).await?;
    info!("🔐 登录完成");
    session.open(&policy.query_url).await?;
    sleep(policy.entry_settle).await;
    Ok(())
}

/// 处理下一个 CPF 前确认位于查询入口
async fn ensure_at_entry<D: PageDriver>(session: &D, policy: &RunPolicy) -> Result<(), DriverError> {
    let location = session.current_location().await?;
    if !is_at_entry(&location, &policy.query_url) {
        debug!("当前地址 {} 不是查询入口，重新打开", location);
        session.open(&policy.query_url).await?;
        sleep(policy.entry_settle).await;
    }
    Ok(())
}
