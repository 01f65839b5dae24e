//! CPF 处理上下文
//!
//! 封装"我正在处理第几批的第几个 CPF、第几次尝试"这一信息

use std::fmt::Display;

/// CPF 处理上下文（仅用于日志）
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 表单显示形式的 CPF
    pub cpf: String,

    /// 批次编号（从 1 开始）
    pub batch: usize,

    /// 在批次中的位置（从 1 开始）
    pub position: usize,

    /// 当前尝试次数（从 1 开始）
    pub attempt: usize,

    pub max_attempts: usize,
}

impl ItemCtx {
    pub fn new(cpf: impl Into<String>, batch: usize, position: usize, max_attempts: usize) -> Self {
        Self {
            cpf: cpf.into(),
            batch,
            position,
            attempt: 1,
            max_attempts,
        }
    }

    /// 进入下一次尝试
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[CPF {} 批次#{}-{} 尝试 {}/{}]",
            self.cpf, self.batch, self.position, self.attempt, self.max_attempts
        )
    }
}
