//! 基于 chromiumoxide 的页面交互驱动

use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::Browser;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::browser::{acquire_browser, BrowserHandle};
use crate::config::{BrowserSettings, Credentials, PortalSelectors, Timeouts};
use crate::error::DriverError;
use crate::infrastructure::driver::{
    DetailLayout, OverlayDismissal, OverlayTier, PageDriver, SessionFactory,
};
use crate::infrastructure::js_executor::JsExecutor;
use crate::models::{LabeledField, TableSnapshot};

/// 清空输入框时最多按退格的次数
const MAX_BACKSPACES: usize = 64;

/// 读取可见表头和数据行（包括 `display: contents` 包裹的行）
const READ_TABLE_BODY: &str = r#"
    const visible = (node) => !(node.getAttribute('style') || '').includes('display: none');
    const headers = Array.from(el.querySelectorAll('thead th'))
        .filter(visible)
        .map((th) => th.innerText.trim())
        .filter((text) => text.length > 0);
    const rows = Array.from(el.querySelectorAll('tbody tr'))
        .filter(visible)
        .map((tr) => Array.from(tr.querySelectorAll('td')).filter(visible).map((td) => td.innerText.trim()))
        .filter((cells) => cells.length > 0);
    return { headers, rows };
"#;

/// 一个浏览器会话
///
/// 会话被替换后旧实例不会再被使用；`terminate` 可重复调用。
pub struct ChromeSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    executor: JsExecutor,
    attached: bool,
    timeouts: Timeouts,
    selectors: PortalSelectors,
}

impl ChromeSession {
    pub fn new(handle: BrowserHandle, timeouts: Timeouts, selectors: PortalSelectors) -> Self {
        Self {
            browser: Some(handle.browser),
            handler: Some(handle.handler),
            executor: JsExecutor::new(handle.page),
            attached: handle.attached,
            timeouts,
            selectors,
        }
    }

    /// CDP 事件循环退出或会话已终止，说明浏览器已经断开
    fn ensure_alive(&self) -> Result<(), DriverError> {
        match &self.handler {
            Some(handler) if !handler.is_finished() => Ok(()),
            Some(_) => Err(DriverError::SessionLost {
                message: "browser has disconnected".to_string(),
            }),
            None => Err(DriverError::SessionLost {
                message: "session closed".to_string(),
            }),
        }
    }

    /// 轮询等待元素出现
    async fn wait_for_element(
        &self,
        selector: &str,
        limit: std::time::Duration,
    ) -> Result<Element, DriverError> {
        let deadline = Instant::now() + limit;
        loop {
            self.ensure_alive()?;
            match self.executor.find(selector).await {
                Ok(element) => return Ok(element),
                Err(DriverError::ElementNotFound { .. }) if Instant::now() < deadline => {
                    sleep(self.timeouts.poll_interval).await;
                }
                Err(DriverError::ElementNotFound { .. }) => {
                    debug!("等待元素超时: {}", selector);
                    return Err(DriverError::ElementNotFound {
                        selector: selector.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_value(&self, element: &Element) -> Result<String, DriverError> {
        let returns = element
            .call_js_fn("function() { return this.value ?? ''; }", false)
            .await?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    /// 三级清空：直接赋值 → 全选删除 → 逐个退格
    async fn clear_field(&self, element: &Element, selector: &str) -> Result<(), DriverError> {
        if let Err(e) = element.click().await {
            debug!("聚焦字段 {} 失败: {}", selector, e);
        }
        sleep(self.timeouts.field_settle).await;

        element
            .call_js_fn(
                "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
                false,
            )
            .await?;
        sleep(self.timeouts.field_settle).await;
        let value = self.read_value(element).await?;
        if value.is_empty() {
            return Ok(());
        }

        warn!("字段 {} 未能通过脚本清空 (当前值: {})，尝试全选删除...", selector, value);
        element
            .call_js_fn("function() { this.focus(); this.select(); }", false)
            .await?;
        element.press_key("Delete").await?;
        sleep(self.timeouts.field_settle).await;
        let value = self.read_value(element).await?;
        if value.is_empty() {
            return Ok(());
        }

        warn!("字段 {} 仍未清空 (当前值: {})，逐个退格...", selector, value);
        element.focus().await?;
        element
            .call_js_fn(
                "function() { const n = this.value.length; this.setSelectionRange(n, n); }",
                false,
            )
            .await?;
        for _ in 0..value.chars().count().min(MAX_BACKSPACES) {
            element.press_key("Backspace").await?;
        }
        sleep(self.timeouts.field_settle).await;
        Ok(())
    }

    async fn overlay_visible(&self) -> Result<bool, DriverError> {
        self.executor
            .eval_on(
                &self.selectors.overlay,
                r#"
                const style = window.getComputedStyle(el);
                return style.display !== 'none' && style.visibility !== 'hidden' && el.getClientRects().length > 0;
                "#,
                "false",
            )
            .await
    }

    /// 立即尝试脚本点击（不等待元素出现）
    async fn click_now(&self, selector: &str) -> Result<bool, DriverError> {
        self.executor
            .eval_on(selector, "el.click(); return true;", "false")
            .await
    }

    async fn remove_overlay_nodes(&self) -> Result<(), DriverError> {
        let js_code = format!(
            r#"
            (() => {{
                document.querySelectorAll({overlay}).forEach((n) => n.remove());
                document.querySelectorAll({backdrop}).forEach((n) => n.remove());
                document.body.classList.remove('q-body--prevent-scroll');
                return true;
            }})()
            "#,
            overlay = serde_json::to_string(&self.selectors.overlay)?,
            backdrop = serde_json::to_string(&self.selectors.overlay_backdrop)?,
        );
        self.executor.eval(js_code).await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ChromeSession {
    async fn open(&self, url: &str) -> Result<(), DriverError> {
        self.ensure_alive()?;
        let navigation = timeout(self.timeouts.page_load, self.executor.page().goto(url)).await;
        match navigation {
            Ok(Ok(_)) => {
                info!("已导航到: {}", url);
                Ok(())
            }
            Ok(Err(e)) => {
                let err = DriverError::from(e);
                if err.is_session_fatal() {
                    Err(err)
                } else {
                    Err(DriverError::Navigation {
                        url: url.to_string(),
                        message: err.to_string(),
                    })
                }
            }
            Err(_) => Err(DriverError::Navigation {
                url: url.to_string(),
                message: format!("页面加载超时 ({} ms)", self.timeouts.page_load.as_millis()),
            }),
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), DriverError> {
        info!("正在登录...");
        let as_auth = |e: DriverError| match e {
            DriverError::ElementNotFound { selector } => DriverError::Auth {
                message: format!("未找到登录字段: {}", selector),
            },
            other => other,
        };

        let username = self
            .wait_for_element(&self.selectors.login_username, self.timeouts.element)
            .await
            .map_err(as_auth)?;
        username.type_str(&credentials.username).await?;

        let password = self
            .wait_for_element(&self.selectors.login_password, self.timeouts.element)
            .await
            .map_err(as_auth)?;
        password.type_str(&credentials.password).await?;
        password.press_key("Enter").await?;

        sleep(self.timeouts.login_settle).await;
        info!("✓ 登录表单已提交");
        Ok(())
    }

    async fn set_field(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self
            .wait_for_element(selector, self.timeouts.form_field)
            .await?;

        let mut actual = String::new();
        for round in 1..=2 {
            self.clear_field(&element, selector).await?;
            element.type_str(value).await?;
            sleep(self.timeouts.field_settle).await;

            actual = self.read_value(&element).await?;
            if actual == value {
                return Ok(());
            }
            warn!(
                "字段 {} 写入不一致 (第 {} 次): 期望 {}, 实际 {}",
                selector, round, value, actual
            );
        }

        Err(DriverError::FieldMismatch {
            selector: selector.to_string(),
            expected: value.to_string(),
            actual,
        })
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self.wait_for_element(selector, self.timeouts.element).await?;
        if let Err(e) = element.scroll_into_view().await {
            debug!("滚动到元素失败: {}", e);
        }

        match element.click().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = DriverError::from(e);
                if err.is_session_fatal() {
                    return Err(err);
                }
                debug!("原生点击失败 ({})，尝试脚本点击...", err);
                if self.click_now(selector).await? {
                    Ok(())
                } else {
                    Err(DriverError::ElementNotFound {
                        selector: selector.to_string(),
                    })
                }
            }
        }
    }

    async fn dismiss_overlay_if_present(&self) -> Result<OverlayDismissal, DriverError> {
        self.ensure_alive()?;
        if !self.overlay_visible().await? {
            return Ok(OverlayDismissal::NotPresent);
        }
        debug!("检测到遮罩层，尝试关闭");

        let tiers = [
            (OverlayTier::Confirm, self.selectors.overlay_confirm.as_str()),
            (OverlayTier::Close, self.selectors.overlay_close.as_str()),
            (OverlayTier::Backdrop, self.selectors.overlay_backdrop.as_str()),
        ];
        for (tier, selector) in tiers {
            match self.click_now(selector).await {
                Ok(true) => {
                    sleep(self.timeouts.overlay_settle).await;
                    if !self.overlay_visible().await? {
                        debug!("遮罩层已关闭: {:?}", tier);
                        return Ok(OverlayDismissal::Dismissed(tier));
                    }
                }
                Ok(false) => {}
                Err(e) if e.is_session_fatal() => return Err(e),
                Err(e) => debug!("遮罩层关闭手段 {:?} 失败: {}", tier, e),
            }
        }

        if let Err(e) = self.remove_overlay_nodes().await {
            if e.is_session_fatal() {
                return Err(e);
            }
            debug!("删除遮罩层节点失败: {}", e);
        }
        sleep(self.timeouts.overlay_settle).await;
        if !self.overlay_visible().await? {
            return Ok(OverlayDismissal::Dismissed(OverlayTier::Removed));
        }

        warn!("⚠️ 遮罩层无法关闭，继续执行");
        Ok(OverlayDismissal::Persisting)
    }

    async fn current_location(&self) -> Result<String, DriverError> {
        self.ensure_alive()?;
        let url = self.executor.page().url().await?;
        Ok(url.unwrap_or_default())
    }

    async fn read_table(&self, selector: &str) -> Result<Option<TableSnapshot>, DriverError> {
        self.ensure_alive()?;
        self.executor
            .eval_on(selector, READ_TABLE_BODY, "null")
            .await
    }

    async fn read_labeled_fields(
        &self,
        layout: DetailLayout<'_>,
    ) -> Result<Vec<LabeledField>, DriverError> {
        self.ensure_alive()?;
        let js_code = format!(
            r#"
            (() => {{
                const fields = [];
                document.querySelectorAll({field}).forEach((node) => {{
                    const labelEl = node.querySelector({label});
                    const valueEl = node.querySelector({value});
                    if (!labelEl || !valueEl) return;
                    const label = labelEl.innerText.trim();
                    const value = (valueEl.value ?? valueEl.innerText ?? '').trim();
                    if (label.length > 0) fields.push({{ label, value }});
                }});
                return fields;
            }})()
            "#,
            field = serde_json::to_string(layout.field)?,
            label = serde_json::to_string(layout.label)?,
            value = serde_json::to_string(layout.value)?,
        );
        self.executor.eval_as(js_code).await
    }

    async fn terminate(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };

        if self.attached {
            let page = self.executor.page().clone();
            if let Err(e) = page.close().await {
                debug!("关闭页面失败（会话可能已失效）: {}", e);
            }
        } else {
            if let Err(e) = browser.close().await {
                debug!("关闭浏览器失败（会话可能已失效）: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("等待浏览器进程退出失败: {}", e);
            }
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        info!("浏览器会话已关闭");
    }
}

/// 按配置创建 [`ChromeSession`]
pub struct ChromeSessionFactory {
    browser: BrowserSettings,
    timeouts: Timeouts,
    selectors: PortalSelectors,
}

impl ChromeSessionFactory {
    pub fn new(browser: BrowserSettings, timeouts: Timeouts, selectors: PortalSelectors) -> Self {
        Self {
            browser,
            timeouts,
            selectors,
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn launch(&self) -> Result<ChromeSession, DriverError> {
        let handle = acquire_browser(&self.browser, &self.timeouts).await?;
        Ok(ChromeSession::new(
            handle,
            self.timeouts.clone(),
            self.selectors.clone(),
        ))
    }
}

