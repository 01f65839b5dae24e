//! 页面交互驱动接口
//!
//! 一个驱动实例只包装一个浏览器会话。驱动本身不重试：
//! 只有上层（提取流程 / 批处理编排）知道一次失败是单个 CPF 可恢复的，
//! 还是整个会话已经失效。

use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::DriverError;
use crate::models::{LabeledField, TableSnapshot};

/// 关闭遮罩层时生效的手段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayTier {
    /// 点击主确认按钮
    Confirm,
    /// 点击关闭按钮
    Close,
    /// 点击背景
    Backdrop,
    /// 直接删除遮罩层 DOM 节点（最后手段）
    Removed,
}

/// `dismiss_overlay_if_present` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayDismissal {
    NotPresent,
    Dismissed(OverlayTier),
    /// 所有手段都失败；仅作提示，后续步骤会再次检查
    Persisting,
}

/// 详情页字段布局
#[derive(Debug, Clone, Copy)]
pub struct DetailLayout<'a> {
    pub field: &'a str,
    pub label: &'a str,
    pub value: &'a str,
}

/// 页面交互驱动
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// 导航到 `url`，页面未在限定时间内稳定则返回 `Navigation` 错误
    async fn open(&self, url: &str) -> Result<(), DriverError>;

    /// 填写登录表单并提交，然后等待固定的稳定时间
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), DriverError>;

    /// 清空并写入输入框，写入后校验
    async fn set_field(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// 点击元素，原生点击失败时改用脚本点击
    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// 关闭可能存在的遮罩层；关闭不了不算错误
    async fn dismiss_overlay_if_present(&self) -> Result<OverlayDismissal, DriverError>;

    /// 当前页面地址
    async fn current_location(&self) -> Result<String, DriverError>;

    /// 读取结果表格，不存在时返回 `None`
    async fn read_table(&self, selector: &str) -> Result<Option<TableSnapshot>, DriverError>;

    /// 读取详情页上的 "标签: 值" 字段
    async fn read_labeled_fields(
        &self,
        layout: DetailLayout<'_>,
    ) -> Result<Vec<LabeledField>, DriverError>;

    /// 释放会话；可重复调用，会话已失效时吞掉错误
    async fn terminate(&mut self);
}

/// 创建新的浏览器会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: PageDriver;

    /// 启动（或连接）浏览器，返回一个尚未登录的会话
    async fn launch(&self) -> Result<Self::Session, DriverError>;
}
