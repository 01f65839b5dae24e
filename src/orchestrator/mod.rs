//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 按配置选择存储后端（PostgreSQL / CSV）
//! - 组装会话工厂、提取流程
//! - 监听 Ctrl-C，输出最终统计
//!
//! ### `batch_runner` - 批处理编排器
//! - 管理浏览器会话（建立、失效后重建、释放）
//! - 分批拉取待处理的 CPF
//! - 逐个处理，按失败类别重试
//! - 先写入结果，再标记已处理
//!
//! ### `retry` - 失败分类
//!
//! ## 层次关系
//!
//! ```text
//! app
//!     ↓
//! batch_runner (处理 Vec<WorkItem>)
//!     ↓
//! workflow::ExtractionFlow (处理单个 CPF)
//!     ↓
//! infrastructure (PageDriver / ChromeSession)
//! ```

pub mod app;
pub mod batch_runner;
pub mod retry;

pub use app::App;
pub use batch_runner::{BatchOrchestrator, OrchestratorState, RunPolicy, RunSummary};
pub use retry::{classify, AttemptFailure, FailureClass};
