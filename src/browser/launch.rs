use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::browser::{spawn_event_loop, BrowserHandle};
use crate::config::{BrowserSettings, Timeouts};
use crate::error::DriverError;

/// 浏览器启动参数
const LAUNCH_ARGS: &[&str] = &[
    "--disable-infobars",
    "--disable-extensions",
    "--disable-gpu",
    "--no-sandbox",
    "--ignore-certificate-errors",
    "--disable-dev-shm-usage",
];

/// 启动一个新的浏览器并打开空白页
pub async fn launch_browser(
    settings: &BrowserSettings,
    timeouts: &Timeouts,
) -> Result<BrowserHandle, DriverError> {
    info!(
        "🚀 启动浏览器 ({})...",
        if settings.headless { "无头模式" } else { "有界面模式" }
    );

    let mut builder = BrowserConfig::builder()
        .window_size(settings.window_width, settings.window_height)
        .request_timeout(timeouts.page_load)
        .args(LAUNCH_ARGS.to_vec());

    builder = if settings.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };

    if let Some(executable) = &settings.chrome_executable {
        debug!("使用指定的浏览器: {}", executable);
        builder = builder.chrome_executable(Path::new(executable));
    }

    let config = builder.build().map_err(|e| {
        error!("配置浏览器失败: {}", e);
        DriverError::Launch {
            message: format!("配置浏览器失败: {}", e),
        }
    })?;

    let (browser, handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        DriverError::Launch {
            message: e.to_string(),
        }
    })?;
    debug!("浏览器启动成功");

    let handler_task = spawn_event_loop(handler);

    // 等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建页面失败: {}", e);
        DriverError::Launch {
            message: format!("创建页面失败: {}", e),
        }
    })?;

    info!("✅ 浏览器已就绪");
    Ok(BrowserHandle {
        browser,
        handler: handler_task,
        page,
        attached: false,
    })
}
