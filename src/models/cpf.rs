//! CPF 标识符
//!
//! 两种表示：
//! - raw：纯数字，作为持久化主键
//! - display：`DDD.DDD.DDD-DD`，用于表单输入

use std::fmt;

/// CPF 固定位数
pub const CPF_DIGITS: usize = 11;

/// 把原始 CPF 格式化为表单期望的显示形式
///
/// 去掉所有非数字字符后左补 `0` 到 11 位；如果去掉后超过 11 位，
/// 原样返回输入（交给页面的表单校验去暴露问题）。
/// 纯函数，重复调用结果逐字节一致。
pub fn normalize(raw: &str) -> String {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    while digits.len() < CPF_DIGITS {
        digits.insert(0, '0');
    }

    if digits.len() != CPF_DIGITS {
        return raw.to_string();
    }

    format!(
        "{}.{}.{}-{}",
        &digits[0..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..11]
    )
}

/// 显示形式 → 纯数字（仅对合法的显示形式有意义）
pub fn display_to_raw(display: &str) -> String {
    display.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 一个待查询的 CPF
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cpf {
    raw: String,
    display: String,
}

impl Cpf {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into().trim().to_string();
        let display = normalize(&raw);
        Self { raw, display }
    }

    /// 原始值（持久化主键）
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 表单显示值
    pub fn display(&self) -> &str {
        &self.display
    }

    /// 格式化失败时 display 会原样保留输入，此时置信度低
    pub fn is_well_formed(&self) -> bool {
        self.display.len() == 14 && display_to_raw(&self.display).len() == CPF_DIGITS
    }
}

impl fmt::Display for Cpf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}
