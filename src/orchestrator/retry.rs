//! 失败分类
//!
//! 一次尝试 = 提取 + 写入结果。失败后按类别决定下一步：
//! 原地重试、重建会话后重试、或者终止整个运行。

use std::fmt;

use crate::error::{AppError, ExtractError, StoreError};

/// 一次尝试的失败原因
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    Extract(ExtractError),
    Persist(StoreError),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Extract(e) => write!(f, "{}", e),
            AttemptFailure::Persist(e) => write!(f, "{}", e),
        }
    }
}

impl From<ExtractError> for AttemptFailure {
    fn from(err: ExtractError) -> Self {
        AttemptFailure::Extract(err)
    }
}

impl From<StoreError> for AttemptFailure {
    fn from(err: StoreError) -> Self {
        AttemptFailure::Persist(err)
    }
}

impl From<AttemptFailure> for AppError {
    fn from(failure: AttemptFailure) -> Self {
        match failure {
            AttemptFailure::Extract(e) => AppError::Extract(e),
            AttemptFailure::Persist(e) => AppError::Store(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 回到查询入口，等待后重试同一个 CPF
    Retryable,
    /// 会话已失效，重建后重试同一个 CPF
    SessionFatal,
    /// 继续运行没有意义
    Fatal,
}

pub fn classify(failure: &AttemptFailure) -> FailureClass {
    match failure {
        AttemptFailure::Extract(ExtractError::InvalidOption { .. }) => FailureClass::Fatal,
        AttemptFailure::Extract(ExtractError::Driver(e)) if e.is_session_fatal() => {
            FailureClass::SessionFatal
        }
        AttemptFailure::Extract(ExtractError::Driver(_)) => FailureClass::Retryable,
        AttemptFailure::Persist(StoreError::Unavailable { .. })
        | AttemptFailure::Persist(StoreError::InvalidIdentifier { .. }) => FailureClass::Fatal,
        AttemptFailure::Persist(_) => FailureClass::Retryable,
    }
}
