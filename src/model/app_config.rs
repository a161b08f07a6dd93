use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::service::grouper::GroupRule;

pub static APP_CONFIG: Lazy<AppConfig> =
    Lazy::new(|| AppConfig::load().expect("Failed to load configuration"));

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub store: StoreConfig,
    pub template: TemplateConfig,
    pub output: OutputConfig,
    pub merge: MergeConfig,
    pub log: LoggingConfig,
    pub web: WebConfig,
    /// 为空时使用内置分组规则
    pub rules: Vec<GroupRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// 订阅转换服务模板，按顺序尝试
    pub endpoints: Vec<String>,
    /// 替换模板中的 `{config}`
    pub config_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub accept_invalid_certs: bool,
    /// 响应中出现任意一条即视为无效内容
    pub invalid_markers: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:8011/clash?sub={url}".to_string()],
            config_url: String::new(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            timeout_secs: 15,
            retry_delay_secs: 3,
            accept_invalid_certs: true,
            invalid_markers: vec![
                "The following link doesn't contain any valid node info".to_string(),
            ],
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub max_cache_age_hours: i64,
    pub default_expiry_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/.cache"),
            max_cache_age_hours: 24,
            default_expiry_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub default_path: PathBuf,
    pub custom_path: PathBuf,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_path: PathBuf::from("templates/clash_template.yaml"),
            custom_path: PathBuf::from("templates/custom_template.yaml"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// 同一模板保留的最新输出个数，0 表示不清理
    pub keep_latest: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/.out"),
            keep_latest: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MergeConfig {
    pub exclude_keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub console_levels: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            console_levels: vec!["error".into(), "warn".into(), "info".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:5698".to_string(),
        }
    }
}

impl AppConfig {
    fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("Config").required(false))
            .add_source(config::Environment::with_prefix("SUBHYDRA").separator("__"))
            .build()?;
        let config = config.try_deserialize()?;
        Ok(config)
    }
}
