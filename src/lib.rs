//! # Margin Extract
//!
//! 通过浏览器批量查询政府门户上 CPF 的保证金（margem consignável）信息
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `browser/` - 启动或连接浏览器
//! - `infrastructure/` - 持有浏览器会话，只暴露页面交互能力
//! - `PageDriver` - 打开页面、登录、填写、点击、关闭遮罩层、读取表格
//! - `ChromeSession` - 基于 chromiumoxide 的实现
//!
//! ### ② 数据层（Models / Store）
//! - `models/` - CPF 规范化、表头映射、结果记录
//! - `store/` - 待处理列表与结果写入（PostgreSQL / CSV）
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 单个 CPF 的完整流程（填写 → 提交 → 判定结果 → 收尾）
//! - `ItemCtx` - 日志上下文（批次 + 位置 + 尝试次数）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_runner` - 分批处理、重试、会话重建
//! - `orchestrator/app` - 按配置组装并运行
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod store;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, Result};
pub use infrastructure::{ChromeSession, ChromeSessionFactory, PageDriver, SessionFactory};
pub use models::{Cpf, MarginRecord, Outcome, WorkItem, WorkKey};
pub use orchestrator::{App, BatchOrchestrator, RunPolicy, RunSummary};
pub use store::{ResultSink, WorkSource};
pub use workflow::{ExtractionFlow, Extractor, ItemCtx};
