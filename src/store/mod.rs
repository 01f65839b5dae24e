//! 存储层：待处理列表（工作来源）与结果写入
//!
//! 编排层只依赖 [`WorkSource`] 和 [`ResultSink`]；
//! 具体用数据库的布尔列还是 CSV 旁路文件记录进度，是实现细节。

pub mod csv_file;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Outcome, WorkItem, WorkKey};

pub use csv_file::{CsvResultSink, CsvWorkSource};
pub use postgres::PgStore;

/// 工作来源
#[async_trait]
pub trait WorkSource: Send {
    /// 按顺序返回最多 `limit` 个尚未处理的 CPF；返回空表示全部处理完毕
    async fn fetch_pending_batch(&mut self, limit: usize) -> Result<Vec<WorkItem>, StoreError>;

    /// 标记为已处理；重复标记同一个键是空操作
    async fn mark_processed(&mut self, key: &WorkKey) -> Result<(), StoreError>;

    /// 释放连接等资源
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// 结果写入
#[async_trait]
pub trait ResultSink: Send {
    /// 写入一个 CPF 的结果（零到多条记录）；部分写入失败必须整体报错
    async fn record_outcome(&mut self, item: &WorkItem, outcome: &Outcome)
        -> Result<(), StoreError>;

    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// 结果状态文本（数据库和 CSV 共用）
pub fn status_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Records(_) => "SUCESSO".to_string(),
        Outcome::Empty => "Nenhum resultado encontrado".to_string(),
        Outcome::Error(message) => format!("ERRO: {}", message),
    }
}
