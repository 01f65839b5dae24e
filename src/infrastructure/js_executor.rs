//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS"和"定位元素"的能力

use chromiumoxide::element::Element;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::DriverError;

/// 在页面中按 CSS 或 XPath 定位元素的 JS 片段
///
/// 以 `//` 或 `(` 开头的选择器按 XPath 处理。
const LOCATE_FN: &str = r#"
const __locate = (sel) => (sel.startsWith('//') || sel.startsWith('('))
    ? document.evaluate(sel, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue
    : document.querySelector(sel);
"#;

/// 选择器是否为 XPath
pub fn is_xpath(selector: &str) -> bool {
    selector.starts_with("//") || selector.starts_with('(')
}

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力
/// - 不认识 CPF / 保证金
/// - 不处理业务流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于导航等其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, DriverError> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value().unwrap_or(JsonValue::Null);
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(
        &self,
        js_code: impl Into<String>,
    ) -> Result<T, DriverError> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 定位 `selector` 对应的元素后执行 `body`
    ///
    /// `body` 中可以使用变量 `el`；元素不存在时返回 `missing`（一段 JS 表达式）。
    pub async fn eval_on<T: DeserializeOwned>(
        &self,
        selector: &str,
        body: &str,
        missing: &str,
    ) -> Result<T, DriverError> {
        let js_code = format!(
            r#"
            (() => {{
                {locate}
                const el = __locate({selector});
                if (!el) return {missing};
                {body}
            }})()
            "#,
            locate = LOCATE_FN,
            selector = serde_json::to_string(selector)?,
            missing = missing,
            body = body,
        );
        self.eval_as(js_code).await
    }

    /// 查找一次元素（不等待）
    pub async fn find(&self, selector: &str) -> Result<Element, DriverError> {
        let found = if is_xpath(selector) {
            self.page.find_xpath(selector).await
        } else {
            self.page.find_element(selector).await
        };
        found.map_err(|e| {
            let err = DriverError::from(e);
            if err.is_session_fatal() {
                err
            } else {
                DriverError::ElementNotFound {
                    selector: selector.to_string(),
                }
            }
        })
    }
}
