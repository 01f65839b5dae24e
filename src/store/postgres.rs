//! PostgreSQL 存储
//!
//! 待处理列表是一张带 `has_filter` 布尔列的表；结果写入另一张表，
//! 每次 `record_outcome` 在一个事务内完成。

use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{Outcome, WorkItem, WorkKey};
use crate::store::{status_label, ResultSink, WorkSource};

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("表名正则必须合法")
});

/// 校验表名（会被直接拼进 SQL）
pub fn validate_table_name(name: &str) -> Result<&str, StoreError> {
    if TABLE_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier {
            value: name.to_string(),
        })
    }
}

/// PostgreSQL 存储（同时实现工作来源和结果写入）
///
/// 连接池只有一个连接；克隆共享同一个连接池。
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    backlog_table: String,
    result_table: String,
    pulls: usize,
}

impl PgStore {
    /// 连接数据库
    pub async fn connect(
        database_url: &str,
        backlog_table: &str,
        result_table: &str,
    ) -> Result<Self, StoreError> {
        let backlog_table = validate_table_name(backlog_table)?.to_string();
        let result_table = validate_table_name(result_table)?.to_string();

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable {
                message: format!("无法连接数据库: {}", e),
            })?;
        info!("✓ 数据库连接已建立");

        Ok(Self {
            pool,
            backlog_table,
            result_table,
            pulls: 0,
        })
    }

    async fn insert_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        sql: &str,
        row: ResultRow<'_>,
    ) -> Result<(), StoreError> {
        sqlx::query(sql)
            .bind(row.name)
            .bind(row.cpf_search)
            .bind(row.available_margin)
            .bind(row.card_margin)
            .bind(row.card_benefit_margin)
            .bind(row.status)
            .bind(row.detail)
            .bind(row.observed_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

/// 结果表中的一行
struct ResultRow<'a> {
    name: Option<&'a str>,
    cpf_search: &'a str,
    available_margin: Option<&'a str>,
    card_margin: Option<&'a str>,
    card_benefit_margin: Option<&'a str>,
    status: &'a str,
    detail: Option<&'a str>,
    observed_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl WorkSource for PgStore {
    async fn fetch_pending_batch(&mut self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        self.pulls += 1;
        let sql = format!(
            "SELECT cpf FROM {} WHERE has_filter = FALSE ORDER BY cpf LIMIT $1",
            self.backlog_table
        );
        let rows = sqlx::query(&sql)
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Write { message } => StoreError::Read { message },
                other => other,
            })?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let cpf: String = row.try_get("cpf").map_err(|e| StoreError::Read {
                message: e.to_string(),
            })?;
            items.push(WorkItem::new(cpf.clone(), WorkKey(cpf), self.pulls));
        }
        debug!("从 {} 选出 {} 个待处理 CPF", self.backlog_table, items.len());
        Ok(items)
    }

    async fn mark_processed(&mut self, key: &WorkKey) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET has_filter = TRUE WHERE cpf = $1",
            self.backlog_table
        );
        sqlx::query(&sql).bind(&key.0).execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("数据库连接已关闭");
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for PgStore {
    async fn record_outcome(
        &mut self,
        item: &WorkItem,
        outcome: &Outcome,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (name, cpf_search, margem, margem_cartao, margem_cartao_beneficio, status, detalhe, observed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.result_table
        );
        let status = status_label(outcome);
        let now = chrono::Utc::now();

        let mut tx = self.pool.begin().await?;
        match outcome {
            Outcome::Records(records) => {
                for record in records {
                    let row = ResultRow {
                        name: Some(record.name.as_str()),
                        cpf_search: item.cpf.raw(),
                        available_margin: record.available_margin.as_deref(),
                        card_margin: record.card_margin.as_deref(),
                        card_benefit_margin: record.card_benefit_margin.as_deref(),
                        status: "SUCESSO",
                        detail: None,
                        observed_at: record.observed_at,
                    };
                    Self::insert_row(&mut tx, &sql, row).await?;
                }
            }
            Outcome::Empty | Outcome::Error(_) => {
                let detail = match outcome {
                    Outcome::Error(message) => Some(message.as_str()),
                    _ => None,
                };
                let row = ResultRow {
                    name: None,
                    cpf_search: item.cpf.raw(),
                    available_margin: None,
                    card_margin: None,
                    card_benefit_margin: None,
                    status: &status,
                    detail,
                    observed_at: now,
                };
                Self::insert_row(&mut tx, &sql, row).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        WorkSource::close(self).await
    }
}
