//! 浏览器获取：启动新浏览器，或连接到已运行的浏览器

pub mod connection;
pub mod launch;

use chromiumoxide::{Browser, Page};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::{BrowserSettings, Timeouts};
use crate::error::DriverError;

pub use connection::connect_to_browser;
pub use launch::launch_browser;

/// 一个已就绪的浏览器及其专用页面
pub struct BrowserHandle {
    pub browser: Browser,
    /// CDP 事件循环任务；任务结束即表示与浏览器的连接已断开
    pub handler: JoinHandle<()>,
    pub page: Page,
    /// 是否为连接到外部浏览器（终止时不关闭整个浏览器）
    pub attached: bool,
}

/// 按配置获取浏览器：配置了调试端口则连接，否则启动
pub async fn acquire_browser(
    settings: &BrowserSettings,
    timeouts: &Timeouts,
) -> Result<BrowserHandle, DriverError> {
    match settings.debug_port {
        Some(port) => connect_to_browser(port).await,
        None => launch_browser(settings, timeouts).await,
    }
}

/// 在后台处理浏览器事件
///
/// 单个事件出错（例如无法识别的 CDP 事件）只记日志，事件流结束时任务才退出。
pub fn spawn_event_loop<S, T, E>(mut events: S) -> JoinHandle<()>
where
    S: Stream<Item = Result<T, E>> + Unpin + Send + 'static,
    T: Send,
    E: Display + Send,
{
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Err(e) = event {
                warn!("浏览器事件处理出错: {}", e);
            }
        }
    })
}
