//! 单个 CPF 的提取流程 - 流程层
//!
//! 状态顺序：
//! 1. FormReady：关闭遮罩层 → 填写 CPF（校验）→ 可选的注册号 → 养老金选项 → 提交
//! 2. Submitted：等待结果，判断是表格、跳转到详情页，还是无结果
//! 3. Closed：关闭遮罩层，确认回到查询入口，否则强制导航回去
//!
//! 站点会按匹配数量用不同方式呈现结果，三种情况都要处理。

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, PortalSelectors};
use crate::error::{DriverError, ExtractError};
use crate::infrastructure::{DetailLayout, OverlayDismissal, PageDriver};
use crate::models::{
    field_for_header, record_from_fields, records_from_table, LabeledField, Outcome, PensionerOption,
    TableSnapshot, WorkItem,
};
use crate::workflow::item_ctx::ItemCtx;

/// 提交后结果的呈现方式（每次尝试只判定一次）
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPresentation {
    /// 页面内弹出结果表格
    ResultTable(TableSnapshot),
    /// 跳转到详情页
    DetailRedirect(Vec<LabeledField>),
    /// 超时内没有任何结果容器
    Empty,
}

/// 提取能力
///
/// 编排层只依赖这个接口，方便替换实现。
#[async_trait]
pub trait Extractor<D: PageDriver>: Send + Sync {
    /// 对一个 CPF 执行一次完整的提取
    async fn extract(
        &self,
        driver: &D,
        item: &WorkItem,
        ctx: &ItemCtx,
    ) -> Result<Outcome, ExtractError>;
}

/// 当前地址是否就是查询入口（忽略结尾的 `/`）
pub fn is_at_entry(location: &str, query_url: &str) -> bool {
    let location = location.trim_end_matches('/');
    let entry = query_url.trim_end_matches('/');
    !entry.is_empty() && (location == entry || location.starts_with(&format!("{}?", entry)))
}

/// 详情页是否已经渲染出可识别的字段
fn has_recognised_field(fields: &[LabeledField]) -> bool {
    fields
        .iter()
        .any(|f| !f.value.trim().is_empty() && field_for_header(&f.label).is_some())
}

/// 提取流程参数
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub query_url: String,
    pub detail_url_pattern: String,
    pub default_pensioner: String,
    pub selectors: PortalSelectors,
    /// 提交后先等待的时间
    pub submit_settle: Duration,
    /// 等待结果容器的上限
    pub result_timeout: Duration,
    /// 导航回查询入口后的稳定时间
    pub entry_settle: Duration,
    pub poll_interval: Duration,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query_url: config.portal.query_url.clone(),
            detail_url_pattern: config.portal.detail_url_pattern.clone(),
            default_pensioner: config.run.pensioner.clone(),
            selectors: config.selectors.clone(),
            submit_settle: config.timeouts.submit_settle,
            result_timeout: config.timeouts.result,
            entry_settle: config.timeouts.entry_settle,
            poll_interval: config.timeouts.poll_interval,
        }
    }
}

/// 提取流程
///
/// - 编排单个 CPF 的表单填写、提交、结果判定、收尾
/// - 不持有任何资源（会话由调用方传入）
/// - 不重试；重试策略属于编排层
pub struct ExtractionFlow {
    settings: FlowSettings,
}

impl ExtractionFlow {
    pub fn new(settings: FlowSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// FormReady：填写并提交表单
    async fn prepare_form<D: PageDriver>(
        &self,
        driver: &D,
        item: &WorkItem,
        ctx: &ItemCtx,
    ) -> Result<(), ExtractError> {
        let selectors = &self.settings.selectors;
        let option = PensionerOption::parse(
            item.pensioner
                .as_deref()
                .unwrap_or(&self.settings.default_pensioner),
        )?;

        if let OverlayDismissal::Persisting = driver.dismiss_overlay_if_present().await? {
            warn!("{} ⚠️ 遮罩层仍然存在，继续填写表单", ctx);
        }

        if !item.cpf.is_well_formed() {
            warn!("{} CPF 格式无法规范化，按原样提交", ctx);
        }
        driver.set_field(&selectors.cpf_input, item.cpf.display()).await?;
        debug!("{} CPF 已填写", ctx);

        if let Some(enrollment) = &item.enrollment {
            driver.set_field(&selectors.enrollment_input, enrollment).await?;
            debug!("{} 注册号已填写: {}", ctx, enrollment);
        }

        driver
            .click(&selectors.pensioner_selector(option.label()))
            .await?;
        debug!("{} 养老金选项: {}", ctx, option.label());

        self.submit(driver, ctx).await
    }

    /// 点击查询按钮，主选择器找不到时使用备用选择器
    async fn submit<D: PageDriver>(&self, driver: &D, ctx: &ItemCtx) -> Result<(), ExtractError> {
        let selectors = &self.settings.selectors;
        match driver.click(&selectors.submit_button).await {
            Ok(()) => {}
            Err(DriverError::ElementNotFound { .. }) => {
                debug!("{} 主查询按钮未找到，使用备用选择器", ctx);
                driver.click(&selectors.submit_button_fallback).await?;
            }
            Err(e) => return Err(e.into()),
        }
        info!("{} 🔍 已提交查询", ctx);
        Ok(())
    }

    /// Submitted：在超时内判定结果的呈现方式
    ///
    /// 地址先于内容变化：详情页要等到出现可识别的字段，表格要等到出现数据行。
    /// 超时时按最后看到的部分内容判定；什么都没看到才是 `Empty`。
    async fn await_presentation<D: PageDriver>(
        &self,
        driver: &D,
        ctx: &ItemCtx,
    ) -> Result<ResultPresentation, ExtractError> {
        let selectors = &self.settings.selectors;
        sleep(self.settings.submit_settle).await;

        let deadline = Instant::now() + self.settings.result_timeout;
        let mut partial = None;
        loop {
            let location = driver.current_location().await?;
            if location.contains(&self.settings.detail_url_pattern) {
                let fields = driver
                    .read_labeled_fields(DetailLayout {
                        field: &selectors.detail_field,
                        label: &selectors.detail_label,
                        value: &selectors.detail_value,
                    })
                    .await?;
                if has_recognised_field(&fields) {
                    return Ok(ResultPresentation::DetailRedirect(fields));
                }
                partial = Some(ResultPresentation::DetailRedirect(fields));
            } else if let Some(table) = driver.read_table(&selectors.result_table).await? {
                if !table.headers.is_empty() {
                    if !table.rows.is_empty() {
                        return Ok(ResultPresentation::ResultTable(table));
                    }
                    partial = Some(ResultPresentation::ResultTable(table));
                }
            }

            if Instant::now() >= deadline {
                if partial.is_some() {
                    debug!("{} 结果在超时前未完全渲染", ctx);
                }
                return Ok(partial.unwrap_or(ResultPresentation::Empty));
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// 把三种呈现方式统一为一个结果
    fn interpret(&self, presentation: ResultPresentation, item: &WorkItem) -> Outcome {
        let observed_at = Utc::now();
        let records = match presentation {
            ResultPresentation::ResultTable(table) => {
                records_from_table(&table, &item.cpf, observed_at)
            }
            ResultPresentation::DetailRedirect(fields) => {
                record_from_fields(&fields, &item.cpf, observed_at)
                    .into_iter()
                    .collect()
            }
            ResultPresentation::Empty => Vec::new(),
        };

        if records.is_empty() {
            Outcome::Empty
        } else {
            Outcome::Records(records)
        }
    }

    /// Closed：回到查询入口并关闭遮罩层
    ///
    /// 收尾失败不影响已经拿到的结果；下一个 CPF 开始前编排层会再次检查位置。
    async fn close<D: PageDriver>(&self, driver: &D, left_entry: bool, ctx: &ItemCtx) {
        if let Err(e) = self.return_to_entry(driver, left_entry).await {
            warn!("{} 收尾失败: {}", ctx, e);
        }
    }

    async fn return_to_entry<D: PageDriver>(
        &self,
        driver: &D,
        left_entry: bool,
    ) -> Result<(), DriverError> {
        if left_entry {
            debug!("从详情页返回查询入口");
            self.reopen_entry(driver).await?;
        }
        let dismissal = driver.dismiss_overlay_if_present().await?;

        // 结果弹窗还在时，下一个 CPF 可能读到这次的表格
        let location = driver.current_location().await?;
        if dismissal == OverlayDismissal::Persisting
            || !is_at_entry(&location, &self.settings.query_url)
        {
            debug!("未能确认回到查询入口 ({}, {:?})，强制返回", location, dismissal);
            self.reopen_entry(driver).await?;
            if let OverlayDismissal::Persisting = driver.dismiss_overlay_if_present().await? {
                warn!("⚠️ 重新打开查询入口后遮罩层仍然存在");
            }
        }
        Ok(())
    }

    async fn reopen_entry<D: PageDriver>(&self, driver: &D) -> Result<(), DriverError> {
        driver.open(&self.settings.query_url).await?;
        sleep(self.settings.entry_settle).await;
        Ok(())
    }
}

#[async_trait]
impl<D: PageDriver> Extractor<D> for ExtractionFlow {
    async fn extract(
        &self,
        driver: &D,
        item: &WorkItem,
        ctx: &ItemCtx,
    ) -> Result<Outcome, ExtractError> {
        self.prepare_form(driver, item, ctx).await?;

        let presentation = self.await_presentation(driver, ctx).await?;
        let left_entry = matches!(presentation, ResultPresentation::DetailRedirect(_));
        match &presentation {
            ResultPresentation::ResultTable(table) => {
                info!("{} 结果表格: {} 行", ctx, table.rows.len())
            }
            ResultPresentation::DetailRedirect(fields) => {
                info!("{} 已跳转到详情页: {} 个字段", ctx, fields.len())
            }
            ResultPresentation::Empty => info!("{} 未出现结果", ctx),
        }

        let outcome = self.interpret(presentation, item);
        self.close(driver, left_entry, ctx).await;
        Ok(outcome)
    }
}
