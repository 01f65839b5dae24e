/// 日志工具模块
///
/// 初始化 tracing（终端 + 日志文件），并提供格式化输出的辅助函数
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig, StoreConfig};
use crate::orchestrator::RunSummary;

/// 初始化日志
///
/// `RUST_LOG` 优先；否则按 `verbose` 选择 debug / info。
/// 同一条日志同时写到终端和日志文件（文件中不带颜色）。
pub fn init(config: &LoggingConfig) -> Result<()> {
    init_log_file(&config.log_file)?;

    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},chromiumoxide=warn,sqlx=warn", level))
    });

    let file = OpenOptions::new().append(true).open(&config.log_file)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;

    Ok(())
}

/// 初始化日志文件（追加本次运行的表头，保留之前运行的日志）
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "\n{}\n保证金查询日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    file.write_all(log_header.as_bytes())?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    let backend = match &config.store {
        StoreConfig::Postgres { backlog_table, .. } => format!("PostgreSQL ({})", backlog_table),
        StoreConfig::Csv { input, .. } => format!("CSV ({})", input.display()),
    };
    let browser = match config.browser.debug_port {
        Some(port) => format!("连接调试端口 {}", port),
        None if config.browser.headless => "无头模式".to_string(),
        None => "有界面模式".to_string(),
    };

    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量保证金查询");
    info!("📊 每批数量: {}", config.run.batch_size);
    info!("🔁 单个 CPF 最大尝试次数: {}", config.run.max_attempts);
    info!("💾 数据来源: {}", backend);
    info!("🌐 浏览器: {}", browser);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `size`: 本批 CPF 数量
pub fn log_batch_start(batch_num: usize, size: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {} 批", batch_num);
    info!("📄 本批 CPF: {} 个", size);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, with_records: usize, empty: usize, errors: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 批完成: 有记录 {}, 无结果 {}, 失败 {}",
        batch_num, with_records, empty, errors
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 运行统计
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(summary: &RunSummary, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📦 批次: {}", summary.batches);
    info!("✅ 有记录: {}/{}", summary.with_records, summary.processed);
    info!("➖ 无结果: {}", summary.empty);
    info!("❌ 失败: {}", summary.errors);
    info!("🔄 会话重建: {}", summary.session_recoveries);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
