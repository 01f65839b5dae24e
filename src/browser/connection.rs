use chromiumoxide::Browser;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::browser::{spawn_event_loop, BrowserHandle};
use crate::error::DriverError;

/// 连接到已在运行的浏览器（远程调试端口），并新建一个专用页面
///
/// 新页面只属于本次会话，终止会话时只关闭这个页面，不关闭用户的浏览器。
pub async fn connect_to_browser(port: u16) -> Result<BrowserHandle, DriverError> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        DriverError::Launch {
            message: format!("无法连接到浏览器 (端口: {}): {}", port, e),
        }
    })?;
    debug!("浏览器连接成功");

    let handler_task = spawn_event_loop(handler);

    // 添加短暂延迟以等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建新页面失败: {}", e);
        DriverError::Launch {
            message: format!("创建新页面失败: {}", e),
        }
    })?;
    debug!("已创建专用页面");

    Ok(BrowserHandle {
        browser,
        handler: handler_task,
        page,
        attached: true,
    })
}
