//! 基础设施层：持有浏览器会话，只暴露页面交互能力

pub mod chrome_session;
pub mod driver;
pub mod js_executor;

pub use chrome_session::{ChromeSession, ChromeSessionFactory};
pub use driver::{DetailLayout, OverlayDismissal, OverlayTier, PageDriver, SessionFactory};
pub use js_executor::JsExecutor;
