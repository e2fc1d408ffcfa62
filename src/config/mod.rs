use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::utils::DigestError;

/// 可选的配置文件，环境变量会覆盖其中的同名项
const SETTINGS_FILE: &str = "config/settings";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub google_api_key: String,
    pub google_cse_id: String,
    pub email_host: String,
    pub email_port: u16,
    pub email_user: String,
    pub email_password: String,
    pub email_recipient: String,
    /// 每日推送时间，HH:MM
    pub update_time: String,
    pub data_dir: String,
    pub chat_api_url: String,
    pub search_api_url: String,
    pub chat_lookback_days: i64,
    /// `none` 或 `llm`
    pub topic_extractor: String,
    pub llm_model: String,
}

impl AppConfig {
    /// 读取 `.env`、`config/settings.toml` 和进程环境变量
    pub fn load() -> Result<Self> {
        // .env 不存在时忽略
        let _ = dotenvy::dotenv();
        Self::build(Some(SETTINGS_FILE), Environment::default())
    }

    /// 只从给定的键值对构造配置，不读取文件和进程环境
    pub fn from_map<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::build(None, Environment::default().source(Some(map)))
    }

    fn build(settings_file: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = settings_file {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        let settings = builder.add_source(env).build().context("读取配置失败")?;
        let config: AppConfig = settings.try_deserialize().context("解析配置失败")?;
        Ok(config)
    }

    pub fn schedule_time(&self) -> Result<ScheduleTime, DigestError> {
        self.update_time.parse()
    }

    pub fn is_search_configured(&self) -> bool {
        !self.google_api_key.is_empty() && !self.google_cse_id.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            google_api_key: String::new(),
            google_cse_id: String::new(),
            email_host: String::new(),
            email_port: 587,
            email_user: String::new(),
            email_password: String::new(),
            email_recipient: String::new(),
            update_time: "08:00".to_string(),
            data_dir: "data".to_string(),
            chat_api_url: "https://api.openai.com/v1".to_string(),
            search_api_url: "https://www.googleapis.com/customsearch/v1".to_string(),
            chat_lookback_days: 1,
            topic_extractor: "none".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// 每日任务触发的本地时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    pub hour: u32,
    pub minute: u32,
}

impl ScheduleTime {
    /// 秒 分 时 日 月 周
    pub fn cron_expr(&self) -> String {
        format!("0 {} {} * * *", self.minute, self.hour)
    }
}

impl FromStr for ScheduleTime {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DigestError::ConfigError(format!("UPDATE_TIME 格式应为 HH:MM: {}", s));

        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;

        if hour > 23 || minute > 59 {
            return Err(invalid());
        }

        Ok(Self { hour, minute })
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
