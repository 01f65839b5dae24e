//! 程序配置
//!
//! 加载顺序：TOML 配置文件（可选）→ 环境变量覆盖 → 校验。
//! 门户地址、账号、批大小、重试次数和重试间隔没有默认值，缺失即启动失败。

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::PensionerOption;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    pub portal: PortalConfig,
    pub run: RunConfig,
    pub browser: BrowserSettings,
    pub timeouts: Timeouts,
    pub selectors: PortalSelectors,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// 门户地址与登录凭据
#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// 登录入口
    pub login_url: String,
    /// 查询表单所在页面
    pub query_url: String,
    /// 结果详情页的 URL 片段，用来识别跳转
    pub detail_url_pattern: String,
    pub credentials: Credentials,
}

/// 登录凭据（Debug 输出不包含密码）
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 批处理参数
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// 每次从工作来源拉取的数量
    pub batch_size: usize,
    /// 单个 CPF 的最大尝试次数
    pub max_attempts: usize,
    /// 两次尝试之间的固定间隔
    pub retry_delay: Duration,
    /// 两个 CPF 之间的固定间隔（避免触发反自动化）
    pub item_delay: Duration,
    /// 默认的领取养老金选项（S / N）
    pub pensioner: String,
}

/// 浏览器启动参数
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// 设置后连接到已运行浏览器的调试端口，而不是启动新浏览器
    pub debug_port: Option<u16>,
    pub chrome_executable: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: false,
            debug_port: None,
            chrome_executable: None,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// 各类等待的上限
#[derive(Clone, Debug)]
pub struct Timeouts {
    pub page_load: Duration,
    pub element: Duration,
    pub form_field: Duration,
    pub result: Duration,
    pub submit_settle: Duration,
    pub login_settle: Duration,
    pub overlay_settle: Duration,
    pub entry_settle: Duration,
    pub field_settle: Duration,
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        RawTimeouts::default().into()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct RawTimeouts {
    page_load_ms: u64,
    element_ms: u64,
    form_field_ms: u64,
    result_ms: u64,
    submit_settle_ms: u64,
    login_settle_ms: u64,
    overlay_settle_ms: u64,
    entry_settle_ms: u64,
    field_settle_ms: u64,
    poll_interval_ms: u64,
}

impl Default for RawTimeouts {
    fn default() -> Self {
        Self {
            page_load_ms: 30_000,
            element_ms: 15_000,
            form_field_ms: 20_000,
            result_ms: 40_000,
            submit_settle_ms: 2_000,
            login_settle_ms: 5_000,
            overlay_settle_ms: 500,
            entry_settle_ms: 3_000,
            field_settle_ms: 200,
            poll_interval_ms: 250,
        }
    }
}

impl From<RawTimeouts> for Timeouts {
    fn from(raw: RawTimeouts) -> Self {
        Self {
            page_load: Duration::from_millis(raw.page_load_ms),
            element: Duration::from_millis(raw.element_ms),
            form_field: Duration::from_millis(raw.form_field_ms),
            result: Duration::from_millis(raw.result_ms),
            submit_settle: Duration::from_millis(raw.submit_settle_ms),
            login_settle: Duration::from_millis(raw.login_settle_ms),
            overlay_settle: Duration::from_millis(raw.overlay_settle_ms),
            entry_settle: Duration::from_millis(raw.entry_settle_ms),
            field_settle: Duration::from_millis(raw.field_settle_ms),
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
        }
    }
}

/// 门户页面的选择器
///
/// 以 `//` 或 `(` 开头的视为 XPath，其余为 CSS。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PortalSelectors {
    pub login_username: String,
    pub login_password: String,
    pub cpf_input: String,
    pub enrollment_input: String,
    /// `{label}` 会被替换为 "Sim" / "Não"
    pub pensioner_option: String,
    pub submit_button: String,
    pub submit_button_fallback: String,
    pub result_table: String,
    pub overlay: String,
    pub overlay_confirm: String,
    pub overlay_close: String,
    pub overlay_backdrop: String,
    pub detail_field: String,
    pub detail_label: String,
    pub detail_value: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            login_username: r#"input[name="usuario"]"#.to_string(),
            login_password: r#"input[name="senha"]"#.to_string(),
            cpf_input: r#"input[name="cpf"]"#.to_string(),
            enrollment_input: r#"input[name="matricula"]"#.to_string(),
            pensioner_option: r#"div.q-radio[aria-label="{label}"]"#.to_string(),
            submit_button: r#"//button[.//span[contains(., "Buscar Servidor")]]"#.to_string(),
            submit_button_fallback: "button.q-btn.bg-primary.text-white".to_string(),
            result_table: "table.q-table".to_string(),
            overlay: ".q-dialog".to_string(),
            overlay_confirm: ".q-dialog button.bg-primary".to_string(),
            overlay_close: r#".q-dialog button[aria-label="Close"], .q-dialog .q-btn--flat"#
                .to_string(),
            overlay_backdrop: ".q-dialog__backdrop".to_string(),
            detail_field: ".q-field, .q-item".to_string(),
            detail_label: ".q-field__label, .q-item__label--header, label".to_string(),
            detail_value: "input, .q-field__native, .q-item__label:not(.q-item__label--header)"
                .to_string(),
        }
    }
}

impl PortalSelectors {
    /// 领取养老金单选项的选择器
    pub fn pensioner_selector(&self, label: &str) -> String {
        self.pensioner_option.replace("{label}", label)
    }
}

/// 存储后端
#[derive(Clone, Debug)]
pub enum StoreConfig {
    Postgres {
        database_url: String,
        backlog_table: String,
        result_table: String,
    },
    Csv {
        input: PathBuf,
        output: PathBuf,
    },
}

/// 日志配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: "result.log".to_string(),
            verbose: false,
        }
    }
}

// ========== 原始（未校验）配置 ==========

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    portal: RawPortal,
    run: RawRun,
    browser: BrowserSettings,
    timeouts: RawTimeouts,
    selectors: PortalSelectors,
    store: RawStore,
    logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPortal {
    login_url: Option<String>,
    query_url: Option<String>,
    detail_url_pattern: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRun {
    batch_size: Option<usize>,
    max_attempts: Option<usize>,
    retry_delay_ms: Option<u64>,
    item_delay_ms: Option<u64>,
    pensioner: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStore {
    backend: Option<String>,
    database_url: Option<String>,
    backlog_table: Option<String>,
    result_table: Option<String>,
    csv_input: Option<String>,
    csv_output: Option<String>,
}

impl Config {
    /// 加载配置
    ///
    /// `path` 为空时依次尝试环境变量 `MARGIN_CONFIG` 和当前目录下的 `config.toml`；
    /// 都不存在时只使用环境变量。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("MARGIN_CONFIG").ok().map(PathBuf::from))
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        let content = match &path {
            Some(p) => std::fs::read_to_string(p).map_err(|source| ConfigError::FileRead {
                path: p.display().to_string(),
                source,
            })?,
            None => String::new(),
        };
        let label = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<env>".to_string());

        Self::from_toml_str(&content, &label, |name| std::env::var(name).ok())
    }

    /// 从 TOML 文本和环境变量查找函数构建配置
    pub fn from_toml_str(
        content: &str,
        label: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: label.to_string(),
            source,
        })?;
        raw.apply_env(&env)?;
        raw.resolve()
    }
}

impl RawConfig {
    /// 环境变量覆盖文件配置
    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let text = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("LOGIN_URL") {
            self.portal.login_url = Some(v);
        }
        if let Some(v) = text("QUERY_URL") {
            self.portal.query_url = Some(v);
        }
        if let Some(v) = text("DETAIL_URL_PATTERN") {
            self.portal.detail_url_pattern = Some(v);
        }
        if let Some(v) = text("PORTAL_USERNAME") {
            self.portal.username = Some(v);
        }
        if let Some(v) = text("PORTAL_PASSWORD") {
            self.portal.password = Some(v);
        }
        if let Some(v) = text("BATCH_SIZE") {
            self.run.batch_size = Some(parse_env("BATCH_SIZE", &v, "正整数")?);
        }
        if let Some(v) = text("MAX_ATTEMPTS") {
            self.run.max_attempts = Some(parse_env("MAX_ATTEMPTS", &v, "正整数")?);
        }
        if let Some(v) = text("RETRY_DELAY_MS") {
            self.run.retry_delay_ms = Some(parse_env("RETRY_DELAY_MS", &v, "毫秒数")?);
        }
        if let Some(v) = text("ITEM_DELAY_MS") {
            self.run.item_delay_ms = Some(parse_env("ITEM_DELAY_MS", &v, "毫秒数")?);
        }
        if let Some(v) = text("PENSIONER") {
            self.run.pensioner = Some(v);
        }
        if let Some(v) = text("STORE_BACKEND") {
            self.store.backend = Some(v);
        }
        if let Some(v) = text("DATABASE_URL") {
            self.store.database_url = Some(v);
        }
        if let Some(v) = text("CSV_INPUT") {
            self.store.csv_input = Some(v);
        }
        if let Some(v) = text("CSV_OUTPUT") {
            self.store.csv_output = Some(v);
        }
        if let Some(v) = text("BROWSER_DEBUG_PORT") {
            self.browser.debug_port = Some(parse_env("BROWSER_DEBUG_PORT", &v, "端口号")?);
        }
        if let Some(v) = text("HEADLESS") {
            self.browser.headless = parse_env("HEADLESS", &v, "true / false")?;
        }
        if let Some(v) = text("VERBOSE_LOGGING") {
            self.logging.verbose = parse_env("VERBOSE_LOGGING", &v, "true / false")?;
        }
        if let Some(v) = text("LOG_FILE") {
            self.logging.log_file = v;
        }
        Ok(())
    }

    /// 校验并转换为最终配置
    fn resolve(self) -> Result<Config, ConfigError> {
        let portal = PortalConfig {
            login_url: required(self.portal.login_url, "portal.login_url")?,
            query_url: required(self.portal.query_url, "portal.query_url")?,
            detail_url_pattern: required(
                self.portal.detail_url_pattern,
                "portal.detail_url_pattern",
            )?,
            credentials: Credentials {
                username: required(self.portal.username, "portal.username")?,
                password: required(self.portal.password, "portal.password")?,
            },
        };

        let batch_size = self
            .run
            .batch_size
            .ok_or(ConfigError::Missing { field: "run.batch_size" })?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "run.batch_size",
                value: "0".to_string(),
                expected: "大于 0 的整数",
            });
        }
        let max_attempts = self
            .run
            .max_attempts
            .ok_or(ConfigError::Missing { field: "run.max_attempts" })?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "run.max_attempts",
                value: "0".to_string(),
                expected: "大于 0 的整数",
            });
        }
        let retry_delay_ms = self
            .run
            .retry_delay_ms
            .ok_or(ConfigError::Missing { field: "run.retry_delay_ms" })?;

        let pensioner = self.run.pensioner.unwrap_or_else(|| "N".to_string());
        if PensionerOption::parse(&pensioner).is_err() {
            return Err(ConfigError::Invalid {
                field: "run.pensioner",
                value: pensioner,
                expected: "S/Sim 或 N/Não",
            });
        }

        let run = RunConfig {
            batch_size,
            max_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
            item_delay: Duration::from_millis(self.run.item_delay_ms.unwrap_or(1_000)),
            pensioner,
        };

        let store = resolve_store(self.store)?;

        Ok(Config {
            portal,
            run,
            browser: self.browser,
            timeouts: self.timeouts.into(),
            selectors: self.selectors,
            store,
            logging: self.logging,
        })
    }
}

fn resolve_store(raw: RawStore) -> Result<StoreConfig, ConfigError> {
    let backend = raw.backend.unwrap_or_else(|| "postgres".to_string());
    match backend.trim().to_lowercase().as_str() {
        "postgres" | "postgresql" => Ok(StoreConfig::Postgres {
            database_url: required(raw.database_url, "store.database_url")?,
            backlog_table: raw.backlog_table.unwrap_or_else(|| "spreed.ro".to_string()),
            result_table: raw
                .result_table
                .unwrap_or_else(|| "spreed.result_search_ro".to_string()),
        }),
        "csv" => Ok(StoreConfig::Csv {
            input: PathBuf::from(required(raw.csv_input, "store.csv_input")?),
            output: PathBuf::from(
                raw.csv_output
                    .unwrap_or_else(|| "resultados/resultados_finais.csv".to_string()),
            ),
        }),
        _ => Err(ConfigError::Invalid {
            field: "store.backend",
            value: backend,
            expected: "postgres 或 csv",
        }),
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { field })
}

fn parse_env<T: std::str::FromStr>(
    name: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field: name,
        value: value.to_string(),
        expected,
    })
}
