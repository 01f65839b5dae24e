//! CSV 文件存储
//!
//! - 输入：带 `CPF`（必填）、`Matricula`、`Pensionista`（可选）列的 CSV
//! - 进度：输入文件旁的 `<输入文件>.processed`，每行一个已处理的键
//! - 输出：`;` 分隔、全部加引号、带 BOM 的 CSV，每写一个结果就 flush

use async_trait::async_trait;
use csv::{QuoteStyle, ReaderBuilder, Writer, WriterBuilder};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{Outcome, WorkItem, WorkKey};
use crate::store::{status_label, ResultSink, WorkSource};

/// 输出文件表头
pub const OUTPUT_HEADERS: [&str; 9] = [
    "CPF Consultado",
    "Matrícula",
    "Nome",
    "CPF Encontrado",
    "Sequencial",
    "Margem Disponível",
    "Margem Cartão",
    "Margem Cartão Benefício",
    "Status",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Deserialize)]
struct InputRow {
    #[serde(rename = "CPF", alias = "cpf")]
    cpf: String,
    #[serde(rename = "Matricula", alias = "matricula", default)]
    enrollment: Option<String>,
    #[serde(rename = "Pensionista", alias = "pensionista", default)]
    pensioner: Option<String>,
}

/// 旁路进度文件路径
pub fn processed_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(".processed");
    PathBuf::from(name)
}

/// CSV 工作来源
pub struct CsvWorkSource {
    rows: Vec<WorkItem>,
    processed: HashSet<WorkKey>,
    processed_path: PathBuf,
    pulls: usize,
}

impl CsvWorkSource {
    /// 读取输入文件和已有的进度文件
    pub fn open(input: &Path) -> Result<Self, StoreError> {
        let mut reader = ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(input)?;

        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<InputRow>().enumerate() {
            let row = record.map_err(|e| StoreError::Read {
                message: format!("{} 第 {} 行: {}", input.display(), index + 2, e),
            })?;
            if row.cpf.trim().is_empty() {
                continue;
            }
            let enrollment = row.enrollment.unwrap_or_default();
            let key = WorkKey(format!("{}|{}", row.cpf.trim(), enrollment.trim()));
            let mut item = WorkItem::new(row.cpf, key, 0).with_enrollment(enrollment);
            if let Some(pensioner) = row.pensioner.filter(|p| !p.trim().is_empty()) {
                item = item.with_pensioner(pensioner.trim());
            }
            rows.push(item);
        }

        let processed_path = processed_path(input);
        let processed = read_processed(&processed_path)?;
        info!(
            "✓ 读取输入 {}: {} 行, 已处理 {} 个",
            input.display(),
            rows.len(),
            processed.len()
        );

        Ok(Self {
            rows,
            processed,
            processed_path,
            pulls: 0,
        })
    }
}

fn read_processed(path: &Path) -> Result<HashSet<WorkKey>, StoreError> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let file = File::open(path)?;
    let mut keys = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            keys.insert(WorkKey(line.trim().to_string()));
        }
    }
    Ok(keys)
}

#[async_trait]
impl WorkSource for CsvWorkSource {
    async fn fetch_pending_batch(&mut self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        self.pulls += 1;
        let pulls = self.pulls;
        let batch: Vec<WorkItem> = self
            .rows
            .iter()
            .filter(|item| !self.processed.contains(&item.key))
            .take(limit.max(1))
            .cloned()
            .map(|mut item| {
                item.batch_origin = pulls;
                item
            })
            .collect();
        debug!("CSV 第 {} 次拉取: {} 个", pulls, batch.len());
        Ok(batch)
    }

    async fn mark_processed(&mut self, key: &WorkKey) -> Result<(), StoreError> {
        if self.processed.contains(key) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.processed_path)?;
        writeln!(file, "{}", key)?;
        file.flush()?;
        self.processed.insert(key.clone());
        Ok(())
    }
}

/// CSV 结果写入
pub struct CsvResultSink {
    writer: Option<Writer<File>>,
    path: PathBuf,
}

impl CsvResultSink {
    /// 打开（或新建）输出文件；新文件先写 BOM 和表头
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if is_new {
            file.write_all(UTF8_BOM)?;
        }

        let mut writer = WriterBuilder::new()
            .delimiter(b';')
            .quote_style(QuoteStyle::Always)
            .from_writer(file);
        if is_new {
            writer.write_record(OUTPUT_HEADERS)?;
            writer.flush()?;
        }
        info!("✓ 结果文件: {}", path.display());

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn output_rows(item: &WorkItem, outcome: &Outcome) -> Vec<[String; 9]> {
    let cpf = item.cpf.raw().to_string();
    let enrollment = item.enrollment.clone().unwrap_or_default();
    let status = status_label(outcome);

    match outcome {
        Outcome::Records(records) => records
            .iter()
            .map(|record| {
                [
                    cpf.clone(),
                    record.enrollment.clone().unwrap_or_else(|| enrollment.clone()),
                    record.name.clone(),
                    record.source_cpf.clone(),
                    record.sequence.clone().unwrap_or_default(),
                    record.available_margin.clone().unwrap_or_default(),
                    record.card_margin.clone().unwrap_or_default(),
                    record.card_benefit_margin.clone().unwrap_or_default(),
                    status.clone(),
                ]
            })
            .collect(),
        Outcome::Empty | Outcome::Error(_) => vec![[
            cpf,
            enrollment,
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            status,
        ]],
    }
}

#[async_trait]
impl ResultSink for CsvResultSink {
    async fn record_outcome(
        &mut self,
        item: &WorkItem,
        outcome: &Outcome,
    ) -> Result<(), StoreError> {
        let writer = self.writer.as_mut().ok_or_else(|| StoreError::Unavailable {
            message: format!("结果文件 {} 已关闭", self.path.display()),
        })?;
        for row in output_rows(item, outcome) {
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("结果文件已关闭: {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarginRecord;
    use chrono::Utc;

    fn write_input(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("cpfs.csv");
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_work_source_skips_processed() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(
            dir.path(),
            "CPF,Matricula\n11144477735,123\n22255588846,\n33366699957,9\n",
        );

        let mut source = CsvWorkSource::open(&input).unwrap();
        let batch = source.fetch_pending_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].enrollment.as_deref(), Some("123"));
        assert_eq!(batch[1].enrollment, None);
        assert_eq!(batch[0].batch_origin, 1);

        source.mark_processed(&batch[0].key).await.unwrap();
        source.mark_processed(&batch[0].key).await.unwrap();

        // 重新打开后进度仍在
        let mut reopened = CsvWorkSource::open(&input).unwrap();
        let batch = reopened.fetch_pending_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].cpf.raw(), "22255588846");

        let sidecar = fs::read_to_string(processed_path(&input)).unwrap();
        assert_eq!(sidecar.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_result_sink_format() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out").join("resultados.csv");
        let item = WorkItem::new("11144477735", WorkKey("k".into()), 1).with_enrollment("77");

        let mut sink = CsvResultSink::open(&output).unwrap();
        let record = MarginRecord {
            name: "MARIA SILVA".into(),
            source_cpf: "111.444.777-35".into(),
            available_margin: Some("1.234,56".into()),
            card_margin: None,
            card_benefit_margin: Some("10,00".into()),
            sequence: Some("1".into()),
            enrollment: None,
            observed_at: Utc::now(),
        };
        sink.record_outcome(&item, &Outcome::Records(vec![record]))
            .await
            .unwrap();
        sink.record_outcome(&item, &Outcome::Empty).await.unwrap();
        sink.record_outcome(&item, &Outcome::Error("timeout".into()))
            .await
            .unwrap();
        sink.close().await.unwrap();

        let bytes = fs::read(&output).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("\"CPF Consultado\";\"Matrícula\""));
        assert!(lines[1].contains("\"MARIA SILVA\""));
        assert!(lines[1].ends_with("\"SUCESSO\""));
        assert!(lines[2].ends_with("\"Nenhum resultado encontrado\""));
        assert!(lines[3].ends_with("\"ERRO: timeout\""));
    }

    #[tokio::test]
    async fn test_result_sink_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("resultados.csv");
        let item = WorkItem::new("1", WorkKey("1".into()), 1);

        for _ in 0..2 {
            let mut sink = CsvResultSink::open(&output).unwrap();
            sink.record_outcome(&item, &Outcome::Empty).await.unwrap();
            sink.close().await.unwrap();
        }

        let text = fs::read_to_string(&output).unwrap();
        assert_eq!(text.matches("CPF Consultado").count(), 1);
        assert_eq!(text.lines().count(), 3);
    }
}
