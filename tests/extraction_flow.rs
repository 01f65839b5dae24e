use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use margin_extract::config::{Credentials, PortalSelectors};
use margin_extract::error::{DriverError, ExtractError};
use margin_extract::infrastructure::{DetailLayout, OverlayDismissal, PageDriver};
use margin_extract::models::{LabeledField, Outcome, TableSnapshot, WorkItem, WorkKey};
use margin_extract::workflow::{ExtractionFlow, Extractor, FlowSettings, ItemCtx};
use tokio_test::{assert_err, assert_ok};

const QUERY_URL: &str = "https://portal.test/#/privado/margem";
const DETAIL_URL: &str = "https://portal.test/#/privado/margem/detalhe/42";

/// 按预设内容响应的页面
#[derive(Default)]
struct ScriptedPage {
    calls: Mutex<Vec<String>>,
    location: Mutex<String>,
    table: Option<TableSnapshot>,
    detail: Vec<LabeledField>,
    /// 提交后跳转到详情页
    redirects: bool,
    /// 提交后跳转到的其他地址
    drift_to: Option<String>,
    missing: HashSet<String>,
    /// 渲染完成前依次返回的表格内容，用完后返回 `table`
    table_frames: Mutex<VecDeque<Option<TableSnapshot>>>,
    /// 渲染完成前依次返回的详情字段，用完后返回 `detail`
    detail_frames: Mutex<VecDeque<Vec<LabeledField>>>,
    /// 依次返回的遮罩层关闭结果，用完后为 `NotPresent`
    overlays: Mutex<VecDeque<OverlayDismissal>>,
}

impl ScriptedPage {
    fn new() -> Self {
        Self {
            location: Mutex::new(QUERY_URL.to_string()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn open(&self, url: &str) -> Result<(), DriverError> {
        self.log(format!("open:{}", url));
        *self.location.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<(), DriverError> {
        Ok(())
    }

    async fn set_field(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.log(format!("set:{}={}", selector, value));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        if self.missing.contains(selector) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        self.log(format!("click:{}", selector));
        let selectors = PortalSelectors::default();
        let is_submit =
            selector == selectors.submit_button || selector == selectors.submit_button_fallback;
        if is_submit && self.redirects {
            *self.location.lock().unwrap() = DETAIL_URL.to_string();
        } else if let (true, Some(url)) = (is_submit, &self.drift_to) {
            *self.location.lock().unwrap() = url.clone();
        }
        Ok(())
    }

    async fn dismiss_overlay_if_present(&self) -> Result<OverlayDismissal, DriverError> {
        self.log("dismiss".to_string());
        Ok(self
            .overlays
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OverlayDismissal::NotPresent))
    }

    async fn current_location(&self) -> Result<String, DriverError> {
        Ok(self.location.lock().unwrap().clone())
    }

    async fn read_table(&self, _selector: &str) -> Result<Option<TableSnapshot>, DriverError> {
        if let Some(frame) = self.table_frames.lock().unwrap().pop_front() {
            return Ok(frame);
        }
        Ok(self.table.clone())
    }

    async fn read_labeled_fields(
        &self,
        _layout: DetailLayout<'_>,
    ) -> Result<Vec<LabeledField>, DriverError> {
        if let Some(frame) = self.detail_frames.lock().unwrap().pop_front() {
            return Ok(frame);
        }
        Ok(self.detail.clone())
    }

    async fn terminate(&mut self) {}
}

fn flow() -> ExtractionFlow {
    flow_with_timeout(Duration::ZERO)
}

fn flow_with_timeout(result_timeout: Duration) -> ExtractionFlow {
    ExtractionFlow::new(FlowSettings {
        query_url: QUERY_URL.to_string(),
        detail_url_pattern: "/detalhe/".to_string(),
        default_pensioner: "N".to_string(),
        selectors: PortalSelectors::default(),
        submit_settle: Duration::ZERO,
        result_timeout,
        entry_settle: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
    })
}

fn item(cpf: &str) -> WorkItem {
    WorkItem::new(cpf, WorkKey(cpf.to_string()), 1)
}

fn ctx(item: &WorkItem) -> ItemCtx {
    ItemCtx::new(item.cpf.display(), 1, 1, 3)
}

fn row(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_result_table_rows_become_records() {
    let mut page = ScriptedPage::new();
    page.table = Some(TableSnapshot {
        headers: row(&["Margem Disponível", "Nome", "CPF", "Margem Cartão"]),
        rows: vec![
            row(&["1.234,56", "MARIA SILVA", "111.444.777-35", "50,00"]),
            row(&["10,00", "MARIA SILVA", "111.444.777-35", ""]),
        ],
    });

    let item = item("11144477735");
    let outcome = assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);

    let records = outcome.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "MARIA SILVA");
    assert_eq!(records[0].available_margin.as_deref(), Some("1.234,56"));
    assert_eq!(records[0].card_margin.as_deref(), Some("50,00"));
    assert_eq!(records[1].available_margin.as_deref(), Some("10,00"));

    // 表单使用显示形式的 CPF
    assert!(page
        .calls()
        .contains(&r#"set:input[name="cpf"]=111.444.777-35"#.to_string()));
}

#[tokio::test]
async fn test_detail_redirect_yields_one_record_and_returns_to_entry() {
    let mut page = ScriptedPage::new();
    page.redirects = true;
    page.detail = vec![
        LabeledField::new("Nome:", "JOSE SANTOS"),
        LabeledField::new("Matrícula", "9988"),
        LabeledField::new("Margem Disponível", "300,00"),
    ];

    let item = item("1");
    let outcome = assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);

    match outcome {
        Outcome::Records(records) => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].name, "JOSE SANTOS");
            assert_eq!(records[0].enrollment.as_deref(), Some("9988"));
            assert_eq!(records[0].source_cpf, "000.000.000-01");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert!(page.calls().contains(&format!("open:{}", QUERY_URL)));
    assert_eq!(page.location.lock().unwrap().as_str(), QUERY_URL);
}

#[tokio::test]
async fn test_no_result_container_is_empty() {
    let page = ScriptedPage::new();
    let item = item("11144477735");

    let outcome = assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);
    assert_eq!(outcome, Outcome::Empty);
    // 已在查询入口且没有遮罩层，不需要重新打开
    assert_eq!(page.count("open:"), 0);
}

#[tokio::test]
async fn test_sentinel_only_margins_are_empty() {
    let mut page = ScriptedPage::new();
    page.table = Some(TableSnapshot {
        headers: row(&["Nome", "Margem Disponível", "Margem Cartão"]),
        rows: vec![row(&["ANA", "Sem margem", "Não possui margem"])],
    });
    let item = item("11144477735");

    let outcome = assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);
    assert_eq!(outcome, Outcome::Empty);
}

#[tokio::test]
async fn test_submit_falls_back_to_secondary_button() {
    let selectors = PortalSelectors::default();
    let mut page = ScriptedPage::new();
    page.missing.insert(selectors.submit_button.clone());
    let item = item("11144477735");

    assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);
    assert!(page
        .calls()
        .contains(&format!("click:{}", selectors.submit_button_fallback)));
}

#[tokio::test]
async fn test_enrollment_and_pensioner_are_filled() {
    let selectors = PortalSelectors::default();
    let page = ScriptedPage::new();
    let item = item("11144477735").with_enrollment("123").with_pensioner("S");

    assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);
    let calls = page.calls();
    assert!(calls.contains(&format!("set:{}=123", selectors.enrollment_input)));
    assert!(calls.contains(&format!("click:{}", selectors.pensioner_selector("Sim"))));
}

#[tokio::test]
async fn test_invalid_pensioner_option_fails_before_touching_form() {
    let page = ScriptedPage::new();
    let item = item("11144477735").with_pensioner("talvez");

    let err = assert_err!(flow().extract(&page, &item, &ctx(&item)).await);
    assert!(matches!(err, ExtractError::InvalidOption { .. }));
    assert!(page.calls().is_empty());
}

#[tokio::test]
async fn test_missing_primary_and_fallback_is_driver_error() {
    let selectors = PortalSelectors::default();
    let mut page = ScriptedPage::new();
    page.missing.insert(selectors.submit_button.clone());
    page.missing.insert(selectors.submit_button_fallback.clone());
    let item = item("11144477735");

    let err = assert_err!(flow().extract(&page, &item, &ctx(&item)).await);
    assert!(matches!(
        err,
        ExtractError::Driver(DriverError::ElementNotFound { .. })
    ));
}

#[tokio::test]
async fn test_detail_fields_rendered_after_redirect_are_read() {
    let mut page = ScriptedPage::new();
    page.redirects = true;
    page.detail_frames = Mutex::new(VecDeque::from(vec![
        Vec::new(),
        vec![LabeledField::new("Nome", "")],
    ]));
    page.detail = vec![
        LabeledField::new("Nome", "JOSE SANTOS"),
        LabeledField::new("Margem Disponível", "300,00"),
    ];

    let item = item("11144477735");
    let outcome = assert_ok!(
        flow_with_timeout(Duration::from_secs(2))
            .extract(&page, &item, &ctx(&item))
            .await
    );

    let records = outcome.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].available_margin.as_deref(), Some("300,00"));
}

#[tokio::test]
async fn test_table_rows_rendered_after_headers_are_read() {
    let headers = row(&["Nome", "Margem Disponível"]);
    let mut page = ScriptedPage::new();
    page.table_frames = Mutex::new(VecDeque::from(vec![
        None,
        Some(TableSnapshot {
            headers: headers.clone(),
            rows: Vec::new(),
        }),
    ]));
    page.table = Some(TableSnapshot {
        headers,
        rows: vec![row(&["ANA", "80,00"])],
    });

    let item = item("11144477735");
    let outcome = assert_ok!(
        flow_with_timeout(Duration::from_secs(2))
            .extract(&page, &item, &ctx(&item))
            .await
    );

    let records = outcome.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "ANA");
}

#[tokio::test]
async fn test_header_only_table_at_deadline_is_empty() {
    let mut page = ScriptedPage::new();
    page.table = Some(TableSnapshot {
        headers: row(&["Nome", "Margem Disponível"]),
        rows: Vec::new(),
    });
    let item = item("11144477735");

    let outcome = assert_ok!(
        flow_with_timeout(Duration::from_millis(20))
            .extract(&page, &item, &ctx(&item))
            .await
    );
    assert_eq!(outcome, Outcome::Empty);
}

#[tokio::test]
async fn test_persisting_overlay_forces_return_to_entry() {
    let mut page = ScriptedPage::new();
    // 填表前没有遮罩层；收尾时结果弹窗关不掉
    page.overlays = Mutex::new(VecDeque::from(vec![
        OverlayDismissal::NotPresent,
        OverlayDismissal::Persisting,
    ]));
    let item = item("11144477735");

    assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);

    let calls = page.calls();
    let reopened = calls
        .iter()
        .position(|c| *c == format!("open:{}", QUERY_URL))
        .expect("应该重新打开查询入口");
    assert_eq!(page.count("dismiss"), 3);
    assert_eq!(calls.last().map(String::as_str), Some("dismiss"));
    assert!(reopened < calls.len() - 1);
}

#[tokio::test]
async fn test_unexpected_location_after_submit_forces_return() {
    let mut page = ScriptedPage::new();
    page.drift_to = Some("https://portal.test/#/privado/inicio".to_string());
    let item = item("11144477735");

    let outcome = assert_ok!(flow().extract(&page, &item, &ctx(&item)).await);
    assert_eq!(outcome, Outcome::Empty);

    assert_eq!(page.count(&format!("open:{}", QUERY_URL)), 1);
    assert_eq!(page.location.lock().unwrap().as_str(), QUERY_URL);
}
