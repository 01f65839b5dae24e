use crate::error::ExtractError;

/// 查询表单上的 "是否为养老金领取人" 单选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PensionerOption {
    Yes,
    No,
}

impl PensionerOption {
    /// 只接受 S / N（以及 Sim / Não），其他值属于调用方违约
    pub fn parse(value: &str) -> Result<Self, ExtractError> {
        match value.trim().to_uppercase().as_str() {
            "S" | "SIM" => Ok(PensionerOption::Yes),
            "N" | "NÃO" | "NAO" => Ok(PensionerOption::No),
            _ => Err(ExtractError::InvalidOption {
                value: value.to_string(),
            }),
        }
    }

    /// 页面上单选项的 aria-label
    pub fn label(self) -> &'static str {
        match self {
            PensionerOption::Yes => "Sim",
            PensionerOption::No => "Não",
        }
    }
}
