use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::clients::retry::RetryPolicy;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sales: SalesConfig,
    pub rates: RatesConfig,
    pub driver: DriverConfig,
    pub webhook: WebhookConfig,
    pub runner: RunnerConfig,
    pub withholding: WithholdingConfig,
    /// 按公司名配置的业务规则
    #[serde(default)]
    pub companies: HashMap<String, CompanyRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 销售系统 (待开票 remito 来源)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSourceMode {
    /// 外部税率查询服务
    Http,
    /// 直接查询本库 padron_rgs 表
    Padron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    pub mode: RateSourceMode,
    pub url: String,
    pub timeout_secs: u64,
}

/// UI 自动化工作进程
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub base_url: String,
    pub step_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub timeout_secs: u64,
    pub default_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// 单次运行总时长上限
    pub run_timeout_secs: u64,
    /// 单步卡死时, 硬上限在运行时限之外再留的余量
    pub hard_limit_grace_secs: u64,
    pub auth_code_max_attempts: u32,
    pub auth_code_initial_backoff_ms: u64,
    pub auth_code_backoff_multiplier: u32,
    pub auth_code_max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithholdingConfig {
    /// 需要计算 percepción 的证件类型 (CUIT 等)
    pub fiscal_id_types: Vec<String>,
    /// 查不到税率时有默认税率的省份; 命中后必须升级处理
    pub escalation_region: String,
    pub escalation_default_rate: BigDecimal,
    pub tolerance: BigDecimal,
}

/// 公司级规则
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyRules {
    #[serde(default)]
    pub require_delivery_date: bool,
    #[serde(default)]
    pub max_document_age_days: Option<i64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/remito_invoicer".to_string(),
                max_connections: 10,
            },
            sales: SalesConfig {
                base_url: "https://api.teamplace.finneg.com/api".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                timeout_secs: 30,
            },
            rates: RatesConfig {
                mode: RateSourceMode::Http,
                url: "http://localhost:8000/alicuotas/".to_string(),
                timeout_secs: 30,
            },
            driver: DriverConfig {
                base_url: "http://localhost:9000".to_string(),
                step_timeout_secs: 120,
            },
            webhook: WebhookConfig {
                timeout_secs: 30,
                default_url: None,
            },
            runner: RunnerConfig {
                run_timeout_secs: 30 * 60,
                hard_limit_grace_secs: 60,
                auth_code_max_attempts: 3,
                auth_code_initial_backoff_ms: 2_000,
                auth_code_backoff_multiplier: 2,
                auth_code_max_backoff_ms: 10_000,
            },
            withholding: WithholdingConfig {
                fiscal_id_types: vec!["CUIT".to_string()],
                escalation_region: "Tucumán".to_string(),
                escalation_default_rate: BigDecimal::from(8),
                tolerance: BigDecimal::from_str("0.01").unwrap_or_default(),
            },
            companies: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 < config/invoicer.toml < APP__* 环境变量 < DATABASE_URL
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/invoicer").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("withholding.fiscal_id_types")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()?
            .try_deserialize()
    }

    /// 公司名不区分大小写 (环境变量来源的 key 会被转为小写)
    pub fn company_rules(&self, company: &str) -> CompanyRules {
        self.companies
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(company))
            .map(|(_, rules)| rules.clone())
            .unwrap_or_default()
    }

    pub fn auth_code_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.runner.auth_code_max_attempts,
            initial_backoff: Duration::from_millis(self.runner.auth_code_initial_backoff_ms),
            multiplier: self.runner.auth_code_backoff_multiplier,
            max_backoff: Duration::from_millis(self.runner.auth_code_max_backoff_ms),
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.run_timeout_secs)
    }

    /// 作业管理器强制结束运行的时限
    pub fn hard_limit(&self) -> Duration {
        self.run_timeout() + Duration::from_secs(self.runner.hard_limit_grace_secs)
    }
}
