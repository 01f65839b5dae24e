use chrono::{DateTime, Utc};
use std::fmt;

use crate::models::cpf::Cpf;

/// 工作来源返回的不透明键（由具体存储决定含义）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkKey(pub String);

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一个待处理的 CPF
///
/// 从工作来源拉取时创建，在一次处理过程中不可变；
/// 只有结果持久化成功后才会被标记为已处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub cpf: Cpf,
    /// 注册号（matrícula），可选的第二个表单字段
    pub enrollment: Option<String>,
    /// 领取养老金选项的原始文本，缺省时使用配置值
    pub pensioner: Option<String>,
    pub key: WorkKey,
    /// 来自第几批
    pub batch_origin: usize,
}

impl WorkItem {
    pub fn new(raw_cpf: impl Into<String>, key: WorkKey, batch_origin: usize) -> Self {
        Self {
            cpf: Cpf::new(raw_cpf),
            enrollment: None,
            pensioner: None,
            key,
            batch_origin,
        }
    }

    pub fn with_enrollment(mut self, enrollment: impl Into<String>) -> Self {
        let enrollment = enrollment.into();
        self.enrollment = if enrollment.trim().is_empty() {
            None
        } else {
            Some(enrollment.trim().to_string())
        };
        self
    }

    pub fn with_pensioner(mut self, pensioner: impl Into<String>) -> Self {
        self.pensioner = Some(pensioner.into());
        self
    }
}

/// 一条保证金记录
#[derive(Debug, Clone, PartialEq)]
pub struct MarginRecord {
    pub name: String,
    /// 页面上显示的 CPF（缺失时回落为查询的 CPF）
    pub source_cpf: String,
    pub available_margin: Option<String>,
    pub card_margin: Option<String>,
    pub card_benefit_margin: Option<String>,
    pub sequence: Option<String>,
    pub enrollment: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// 单个 CPF 的最终结果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Records(Vec<MarginRecord>),
    Empty,
    Error(String),
}

impl Outcome {
    /// 用于日志和统计的简短标签
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Records(_) => OutcomeKind::Records,
            Outcome::Empty => OutcomeKind::Empty,
            Outcome::Error(_) => OutcomeKind::Error,
        }
    }

    pub fn records(&self) -> &[MarginRecord] {
        match self {
            Outcome::Records(records) => records,
            Outcome::Empty | Outcome::Error(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Records,
    Empty,
    Error,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OutcomeKind::Records => "records",
            OutcomeKind::Empty => "empty",
            OutcomeKind::Error => "error",
        };
        f.write_str(label)
    }
}
