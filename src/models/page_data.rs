use serde::Deserialize;

/// 结果表格快照
///
/// 只包含可见的表头和数据行，单元格文本已 trim。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TableSnapshot {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableSnapshot {
    /// 按表头文本把每一行转换为 (表头, 值) 对
    ///
    /// 单元格数多于表头时多出的部分被忽略。
    pub fn labeled_rows(&self) -> impl Iterator<Item = Vec<(&str, &str)>> + '_ {
        self.rows.iter().map(move |row| {
            self.headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.as_str(), v.as_str()))
                .collect()
        })
    }
}

/// 详情页上的一个 "标签: 值" 字段
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabeledField {
    pub label: String,
    pub value: String,
}

impl LabeledField {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}
