use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const ALLOWED_USERS_ENV: &str = "ALLOWED_USER_IDS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 进度显示
    pub print_progress: bool,

    // 连通性检测（毫秒）
    pub connect_timeout: u64,

    // 延迟稳定性检测，次数为 0 时跳过
    pub latency_samples: usize,
    pub latency_timeout: u64,
    pub latency_interval: u64,

    // 下载测速
    pub speed_test_url: String,
    pub download_timeout: u64,

    // 批量检测
    pub batch_limit: usize,
    pub probe_interval: u64,

    // 订阅
    pub subscription_timeout: u64,
    pub user_agent: String,

    // 输出配置：text, json, yaml
    pub output_format: String,

    // 日志配置
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_progress: true,
            connect_timeout: 10_000,
            latency_samples: 5,
            latency_timeout: 5_000,
            latency_interval: 500,
            speed_test_url: "https://speed.cloudflare.com/__down?bytes=10485760".to_string(),
            download_timeout: 15_000,
            batch_limit: 10,
            probe_interval: 1_000,
            subscription_timeout: 30_000,
            user_agent: "clash-verge/v1.3.1".to_string(),
            output_format: "text".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 环境变量覆盖配置文件中的值
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SPEEDTEST_URL") {
            self.speed_test_url = url;
        }
        if let Some(limit) = lookup("SPEEDTEST_BATCH_LIMIT") {
            self.batch_limit = limit.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "batch_limit",
                reason: format!("`{limit}` is not a number"),
            })?;
        }
        if let Some(level) = lookup("SPEEDTEST_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.connect_timeout == 0 || self.download_timeout == 0 || self.latency_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout",
                reason: "timeouts must be greater than zero".to_string(),
            });
        }
        if let Err(e) = url::Url::parse(&self.speed_test_url) {
            return Err(ConfigError::InvalidValue {
                field: "speed_test_url",
                reason: e.to_string(),
            });
        }
        if !matches!(self.output_format.as_str(), "text" | "json" | "yaml") {
            return Err(ConfigError::InvalidValue {
                field: "output_format",
                reason: format!("unknown format `{}`", self.output_format),
            });
        }
        Ok(())
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn latency_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.latency_timeout)
    }

    pub fn latency_interval_duration(&self) -> Duration {
        Duration::from_millis(self.latency_interval)
    }

    pub fn download_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.download_timeout)
    }

    pub fn probe_interval_duration(&self) -> Duration {
        Duration::from_millis(self.probe_interval)
    }

    pub fn subscription_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout)
    }
}

/// 由外部密钥管理组件注入的凭据，这里只负责读取
#[derive(Clone)]
pub struct Secrets {
    pub bot_token: String,
    pub allowed_user_ids: HashSet<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("bot_token", &"***")
            .field("allowed_user_ids", &self.allowed_user_ids)
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup(BOT_TOKEN_ENV)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingSecret(BOT_TOKEN_ENV))?;

        let allowed_user_ids = lookup(ALLOWED_USERS_ENV)
            .map(|ids| parse_user_ids(&ids))
            .unwrap_or_default();

        Ok(Self {
            bot_token,
            allowed_user_ids,
        })
    }

    /// 白名单为空时不限制用户
    pub fn is_authorized(&self, user_id: &str) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(user_id.trim())
    }
}

fn parse_user_ids(ids: &str) -> HashSet<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
