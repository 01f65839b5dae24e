//! 集成测试用的假实现：浏览器会话、提取器、工作来源和结果写入
//!
//! 所有假实现共享一个事件日志，测试通过事件顺序检查编排行为。

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use margin_extract::config::Credentials;
use margin_extract::error::{DriverError, ExtractError, StoreError};
use margin_extract::infrastructure::{
    DetailLayout, OverlayDismissal, PageDriver, SessionFactory,
};
use margin_extract::models::{LabeledField, MarginRecord, Outcome, TableSnapshot, WorkItem, WorkKey};
use margin_extract::orchestrator::RunPolicy;
use margin_extract::store::{ResultSink, WorkSource};
use margin_extract::workflow::{Extractor, ItemCtx};

pub const LOGIN_URL: &str = "https://portal.test/#/login";
pub const QUERY_URL: &str = "https://portal.test/#/privado/margem";

/// 共享事件日志
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub fn policy(batch_size: usize, max_attempts: usize) -> RunPolicy {
    RunPolicy {
        login_url: LOGIN_URL.to_string(),
        query_url: QUERY_URL.to_string(),
        credentials: Credentials {
            username: "operador".to_string(),
            password: "segredo".to_string(),
        },
        batch_size,
        max_attempts,
        retry_delay: Duration::ZERO,
        item_delay: Duration::ZERO,
        entry_settle: Duration::ZERO,
    }
}

pub fn record(name: &str) -> MarginRecord {
    MarginRecord {
        name: name.to_string(),
        source_cpf: "111.444.777-35".to_string(),
        available_margin: Some("100,00".to_string()),
        card_margin: None,
        card_benefit_margin: None,
        sequence: None,
        enrollment: None,
        observed_at: chrono::Utc::now(),
    }
}

pub fn session_lost() -> ExtractError {
    ExtractError::Driver(DriverError::SessionLost {
        message: "target closed".to_string(),
    })
}

pub fn element_missing() -> ExtractError {
    ExtractError::Driver(DriverError::ElementNotFound {
        selector: "table.q-table".to_string(),
    })
}

// ========== 浏览器会话 ==========

pub struct FakeSession {
    pub id: usize,
    journal: Journal,
    location: Mutex<String>,
}

#[async_trait]
impl PageDriver for FakeSession {
    async fn open(&self, url: &str) -> Result<(), DriverError> {
        self.journal.push(format!("open:{}:{}", self.id, url));
        *self.location.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), DriverError> {
        self.journal
            .push(format!("auth:{}:{}", self.id, credentials.username));
        Ok(())
    }

    async fn set_field(&self, _selector: &str, _value: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn dismiss_overlay_if_present(&self) -> Result<OverlayDismissal, DriverError> {
        Ok(OverlayDismissal::NotPresent)
    }

    async fn current_location(&self) -> Result<String, DriverError> {
        Ok(self.location.lock().unwrap().clone())
    }

    async fn read_table(&self, _selector: &str) -> Result<Option<TableSnapshot>, DriverError> {
        Ok(None)
    }

    async fn read_labeled_fields(
        &self,
        _layout: DetailLayout<'_>,
    ) -> Result<Vec<LabeledField>, DriverError> {
        Ok(Vec::new())
    }

    async fn terminate(&mut self) {
        self.journal.push(format!("terminate:{}", self.id));
    }
}

/// 会话工厂；前 `failures` 次启动失败
pub struct FakeFactory {
    journal: Journal,
    launches: AtomicUsize,
    failures: usize,
}

impl FakeFactory {
    pub fn new(journal: Journal) -> Self {
        Self::failing(journal, 0)
    }

    pub fn failing(journal: Journal, failures: usize) -> Self {
        Self {
            journal,
            launches: AtomicUsize::new(0),
            failures,
        }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn launch(&self) -> Result<FakeSession, DriverError> {
        let id = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if id <= self.failures {
            self.journal.push(format!("launch-failed:{}", id));
            return Err(DriverError::Launch {
                message: "chrome not found".to_string(),
            });
        }
        self.journal.push(format!("launch:{}", id));
        Ok(FakeSession {
            id,
            journal: self.journal.clone(),
            location: Mutex::new("about:blank".to_string()),
        })
    }
}

// ========== 提取器 ==========

/// 按 CPF 预设每次尝试的结果；预设用完后返回 `Outcome::Empty`
pub struct ScriptedExtractor {
    journal: Journal,
    script: Mutex<HashMap<String, VecDeque<Result<Outcome, ExtractError>>>>,
    /// 提取后把会话留在这个地址（没有回到查询入口）
    drift_to: Option<String>,
}

impl ScriptedExtractor {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            script: Mutex::new(HashMap::new()),
            drift_to: None,
        }
    }

    pub fn drifting(mut self, url: &str) -> Self {
        self.drift_to = Some(url.to_string());
        self
    }

    pub fn script(self, cpf: &str, results: Vec<Result<Outcome, ExtractError>>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(cpf.to_string(), results.into());
        self
    }
}

#[async_trait]
impl Extractor<FakeSession> for ScriptedExtractor {
    async fn extract(
        &self,
        driver: &FakeSession,
        item: &WorkItem,
        ctx: &ItemCtx,
    ) -> Result<Outcome, ExtractError> {
        self.journal.push(format!(
            "extract:{}:session{}:attempt{}",
            item.cpf.raw(),
            driver.id,
            ctx.attempt
        ));
        if let Some(url) = &self.drift_to {
            *driver.location.lock().unwrap() = url.clone();
        }
        self.script
            .lock()
            .unwrap()
            .get_mut(item.cpf.raw())
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(Outcome::Empty))
    }
}

// ========== 存储 ==========

/// 内存工作来源：返回尚未标记的 CPF，顺序与输入一致
pub struct MemoryWorkSource {
    journal: Journal,
    items: Vec<String>,
    processed: HashSet<WorkKey>,
    mark_failures: HashMap<String, VecDeque<StoreError>>,
}

impl MemoryWorkSource {
    pub fn new(journal: Journal, cpfs: &[&str]) -> Self {
        Self {
            journal,
            items: cpfs.iter().map(|c| c.to_string()).collect(),
            processed: HashSet::new(),
            mark_failures: HashMap::new(),
        }
    }

    pub fn fail_mark(mut self, cpf: &str, error: StoreError) -> Self {
        self.mark_failures
            .entry(cpf.to_string())
            .or_default()
            .push_back(error);
        self
    }
}

#[async_trait]
impl WorkSource for MemoryWorkSource {
    async fn fetch_pending_batch(&mut self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let batch: Vec<WorkItem> = self
            .items
            .iter()
            .filter(|cpf| !self.processed.contains(&WorkKey(cpf.to_string())))
            .take(limit)
            .map(|cpf| WorkItem::new(cpf.clone(), WorkKey(cpf.clone()), 0))
            .collect();
        self.journal.push(format!("fetch:{}", batch.len()));
        Ok(batch)
    }

    async fn mark_processed(&mut self, key: &WorkKey) -> Result<(), StoreError> {
        if let Some(error) = self
            .mark_failures
            .get_mut(&key.0)
            .and_then(|queue| queue.pop_front())
        {
            self.journal.push(format!("mark-failed:{}", key));
            return Err(error);
        }
        self.journal.push(format!("mark:{}", key));
        self.processed.insert(key.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.journal.push("close:source");
        Ok(())
    }
}

/// 记录结果的写入端；可预设按顺序返回的写入错误
pub struct RecordingSink {
    journal: Journal,
    failures: VecDeque<StoreError>,
    pub outcomes: Arc<Mutex<Vec<(String, Outcome)>>>,
}

impl RecordingSink {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            failures: VecDeque::new(),
            outcomes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_with(mut self, errors: Vec<StoreError>) -> Self {
        self.failures = errors.into();
        self
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn record_outcome(
        &mut self,
        item: &WorkItem,
        outcome: &Outcome,
    ) -> Result<(), StoreError> {
        if let Some(error) = self.failures.pop_front() {
            self.journal
                .push(format!("record-failed:{}", item.cpf.raw()));
            return Err(error);
        }
        self.journal
            .push(format!("record:{}:{}", item.cpf.raw(), outcome.kind()));
        self.outcomes
            .lock()
            .unwrap()
            .push((item.cpf.raw().to_string(), outcome.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.journal.push("close:sink");
        Ok(())
    }
}
