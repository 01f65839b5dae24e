//! 表头 / 标签 → 字段映射，以及 "无保证金" 哨兵值过滤
//!
//! 映射按表头文本而不是列位置进行，目标站点调整列顺序不会导致数据错位。

use chrono::{DateTime, Utc};
use phf::phf_map;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::cpf::Cpf;
use crate::models::margin::MarginRecord;
use crate::models::page_data::{LabeledField, TableSnapshot};

/// 保证金记录中的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarginField {
    Name,
    Cpf,
    AvailableMargin,
    CardMargin,
    CardBenefitMargin,
    Sequence,
    Enrollment,
}

impl MarginField {
    /// 是否承载保证金数值
    pub fn is_margin(self) -> bool {
        matches!(
            self,
            MarginField::AvailableMargin | MarginField::CardMargin | MarginField::CardBenefitMargin
        )
    }
}

/// 规范化后的表头文本 → 字段
static HEADER_FIELDS: phf::Map<&'static str, MarginField> = phf_map! {
    "nome" => MarginField::Name,
    "nome do servidor" => MarginField::Name,
    "servidor" => MarginField::Name,
    "cpf" => MarginField::Cpf,
    "margem" => MarginField::AvailableMargin,
    "margem disponível" => MarginField::AvailableMargin,
    "margem disponivel" => MarginField::AvailableMargin,
    "margem consignável" => MarginField::AvailableMargin,
    "margem consignavel" => MarginField::AvailableMargin,
    "margem cartão" => MarginField::CardMargin,
    "margem cartao" => MarginField::CardMargin,
    "margem cartão de crédito" => MarginField::CardMargin,
    "margem cartao de credito" => MarginField::CardMargin,
    "margem cartão benefício" => MarginField::CardBenefitMargin,
    "margem cartao beneficio" => MarginField::CardBenefitMargin,
    "margem cartão benefício consignado" => MarginField::CardBenefitMargin,
    "margem benefício" => MarginField::CardBenefitMargin,
    "margem beneficio" => MarginField::CardBenefitMargin,
    "seq" => MarginField::Sequence,
    "sequencial" => MarginField::Sequence,
    "matrícula" => MarginField::Enrollment,
    "matricula" => MarginField::Enrollment,
};

static NO_MARGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(sem\s+margem|n[ãa]o\s+(possui|h[áa]|tem)\s+margem|margem\s+indispon[íi]vel|indispon[íi]vel|no\s+margin)",
    )
    .expect("哨兵正则必须合法")
});

/// 规范化表头：去掉首尾空白和结尾冒号，合并空白，转小写
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_end_matches(':')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 根据表头文本查找字段
pub fn field_for_header(header: &str) -> Option<MarginField> {
    HEADER_FIELDS.get(normalize_header(header).as_str()).copied()
}

/// 是否为 "无保证金" 哨兵值
pub fn is_no_margin(value: &str) -> bool {
    NO_MARGIN.is_match(value)
}

/// 表格中所有可用记录（哨兵行已剔除）
pub fn records_from_table(
    table: &TableSnapshot,
    queried: &Cpf,
    observed_at: DateTime<Utc>,
) -> Vec<MarginRecord> {
    table
        .labeled_rows()
        .filter_map(|pairs| assemble(pairs, queried, observed_at))
        .collect()
}

/// 详情页最多产出一条记录（同样剔除哨兵）
pub fn record_from_fields(
    fields: &[LabeledField],
    queried: &Cpf,
    observed_at: DateTime<Utc>,
) -> Option<MarginRecord> {
    let pairs = fields
        .iter()
        .map(|f| (f.label.as_str(), f.value.as_str()))
        .collect();
    assemble(pairs, queried, observed_at)
}

/// 把 (表头, 值) 对组装成记录
///
/// 返回 `None` 的情况：没有任何可识别的字段；或存在保证金列但全部是哨兵/空值。
/// 缺少某个字段只会让记录对应字段为空，不会让整次提取失败。
fn assemble(
    pairs: Vec<(&str, &str)>,
    queried: &Cpf,
    observed_at: DateTime<Utc>,
) -> Option<MarginRecord> {
    let mut values: HashMap<MarginField, String> = HashMap::new();
    for (header, value) in pairs {
        if let Some(field) = field_for_header(header) {
            // 同一字段重复出现时保留第一个
            values
                .entry(field)
                .or_insert_with(|| value.trim().to_string());
        }
    }

    if values.values().all(|v| v.is_empty()) {
        return None;
    }

    let margin_values: Vec<&String> = values
        .iter()
        .filter(|(field, _)| field.is_margin())
        .map(|(_, v)| v)
        .collect();
    if !margin_values.is_empty()
        && margin_values
            .iter()
            .all(|v| v.is_empty() || is_no_margin(v))
    {
        return None;
    }

    let mut take = |field: MarginField| {
        values
            .remove(&field)
            .filter(|v| !v.is_empty() && !(field.is_margin() && is_no_margin(v)))
    };

    Some(MarginRecord {
        name: take(MarginField::Name).unwrap_or_default(),
        source_cpf: take(MarginField::Cpf).unwrap_or_else(|| queried.display().to_string()),
        available_margin: take(MarginField::AvailableMargin),
        card_margin: take(MarginField::CardMargin),
        card_benefit_margin: take(MarginField::CardBenefitMargin),
        sequence: take(MarginField::Sequence),
        enrollment: take(MarginField::Enrollment),
        observed_at,
    })
}
