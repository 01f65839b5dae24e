use thiserror::Error;

/// 浏览器会话已失效的特征文本
///
/// CDP / WebDriver 在窗口、标签页或整个浏览器进程消失后返回的错误信息中
/// 通常包含这些片段（统一小写比较）。
pub const DEAD_SESSION_MARKERS: &[&str] = &[
    "invalid session id",
    "no such window",
    "no such session",
    "target closed",
    "session closed",
    "session with given id not found",
    "connection closed",
    "browser has disconnected",
    "channelsenderror",
    "websocket",
];

/// 判断错误信息是否表示浏览器会话本身已经不可用
pub fn is_dead_session_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    DEAD_SESSION_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（启动阶段即终止）
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 浏览器驱动错误
    #[error("浏览器错误: {0}")]
    Driver(#[from] DriverError),
    /// 提取流程错误
    #[error("提取错误: {0}")]
    Extract(#[from] ExtractError),
    /// 存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 会话多次重建均失败
    #[error("浏览器会话重建失败 (尝试 {attempts} 次): {last}")]
    Recovery { attempts: usize, last: DriverError },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填配置项缺失
    #[error("缺少必填配置项: {field}")]
    Missing { field: &'static str },
    /// 配置值无效
    #[error("配置项 {field} 的值 '{value}' 无效, 期望: {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    /// 配置文件读取失败
    #[error("无法读取配置文件 {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件解析失败
    #[error("无法解析配置文件 {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 页面交互驱动错误
///
/// 驱动本身从不重试，只负责把失败归类后抛给上层。
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// 启动或连接浏览器失败
    #[error("启动浏览器失败: {message}")]
    Launch { message: String },
    /// 导航失败或页面未在限定时间内加载完成
    #[error("导航到 {url} 失败: {message}")]
    Navigation { url: String, message: String },
    /// 登录失败
    #[error("登录失败: {message}")]
    Auth { message: String },
    /// 等待超时
    #[error("等待 {what} 超时 ({timeout_ms} ms)")]
    Timeout { what: String, timeout_ms: u64 },
    /// 元素未找到
    #[error("未找到元素: {selector}")]
    ElementNotFound { selector: String },
    /// 输入框写入后校验不一致
    #[error("字段 {selector} 写入校验失败: 期望 '{expected}', 实际 '{actual}'")]
    FieldMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    /// 执行脚本失败
    #[error("执行脚本失败: {message}")]
    Script { message: String },
    /// 浏览器会话已失效
    #[error("浏览器会话已失效: {message}")]
    SessionLost { message: String },
}

impl DriverError {
    /// 会话是否已经不可用
    pub fn is_session_fatal(&self) -> bool {
        match self {
            DriverError::SessionLost { .. } | DriverError::Launch { .. } => true,
            other => is_dead_session_message(&other.to_string()),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for DriverError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        let message = err.to_string();
        if is_dead_session_message(&message) {
            DriverError::SessionLost { message }
        } else {
            DriverError::Script { message }
        }
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Script {
            message: format!("脚本返回值无法解析: {}", err),
        }
    }
}

/// 单个 CPF 提取流程错误
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// 领取养老金选项只接受两个值
    #[error("领取养老金选项无效: '{value}' (只允许 S 或 N)")]
    InvalidOption { value: String },
}

/// 存储错误
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// 存储不可达（连接断开、连接池关闭等），对整个批处理是致命的
    #[error("存储不可用: {message}")]
    Unavailable { message: String },
    /// 单次写入失败，只影响当前 CPF
    #[error("写入失败: {message}")]
    Write { message: String },
    /// 读取待处理列表失败
    #[error("读取失败: {message}")]
    Read { message: String },
    /// 表名等标识符不合法
    #[error("非法的标识符: {value}")]
    InvalidIdentifier { value: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable {
                message: err.to_string(),
            },
            other => StoreError::Write {
                message: other.to_string(),
            },
        }
    }
}

impl From<csv::Error> for StoreError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            StoreError::Unavailable {
                message: err.to_string(),
            }
        } else {
            StoreError::Write {
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable {
            message: err.to_string(),
        }
    }
}

/// 应用程序结果类型
pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_session_markers() {
        assert!(is_dead_session_message("invalid session id"));
        assert!(is_dead_session_message("Target closed before response"));
        assert!(is_dead_session_message("No Such Window: window was already closed"));
        assert!(!is_dead_session_message("element not interactable"));
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(DriverError::SessionLost {
            message: "gone".into()
        }
        .is_session_fatal());
        assert!(DriverError::Script {
            message: "Error: no such window".into()
        }
        .is_session_fatal());
        assert!(!DriverError::ElementNotFound {
            selector: "input[name=\"cpf\"]".into()
        }
        .is_session_fatal());
    }
}
