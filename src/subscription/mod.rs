//! 订阅链接分析
//! 获取订阅内容，解析流量信息头和其中的节点

use chrono::{DateTime, Local, TimeZone};
use log::{info, warn};
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::SubscriptionError;
use crate::parser::{decode_base64, parse_links};
use crate::proxy::{Protocol, ProxyNode};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
pub const USERINFO_HEADER: &str = "subscription-userinfo";

/// `subscription-userinfo` 响应头中的流量和到期信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub upload: Option<u64>,
    pub download: Option<u64>,
    pub total: Option<u64>,
    pub expire: Option<i64>,
}

impl SubscriptionInfo {
    /// 格式：`upload=123; download=456; total=789; expire=1700000000`
    pub fn from_header(value: &str) -> Self {
        let mut info = Self::default();

        for part in value.split(';') {
            let Some((key, raw)) = part.trim().split_once('=') else {
                continue;
            };
            let raw = raw.trim();
            match key.trim() {
                "upload" => info.upload = raw.parse().ok(),
                "download" => info.download = raw.parse().ok(),
                "total" => info.total = raw.parse().ok(),
                "expire" => info.expire = raw.parse().ok(),
                _ => {}
            }
        }

        info
    }

    /// 数值来自远端响应头，溢出时视为无效
    pub fn used(&self) -> Option<u64> {
        self.upload?.checked_add(self.download?)
    }

    pub fn remaining(&self) -> Option<u64> {
        Some(self.total?.saturating_sub(self.used()?))
    }

    /// 已用百分比，保留一位小数
    pub fn usage_percentage(&self) -> Option<f64> {
        let total = self.total.filter(|t| *t > 0)?;
        let percentage = self.used()? as f64 / total as f64 * 100.0;
        Some((percentage * 10.0).round() / 10.0)
    }

    pub fn expire_at(&self) -> Option<DateTime<Local>> {
        Local.timestamp_opt(self.expire?, 0).single()
    }

    pub fn remaining_days(&self, now: DateTime<Local>) -> Option<i64> {
        let expire_at = self.expire_at()?;
        Some((expire_at - now).num_days().max(0))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    ((bytes as f64 / BYTES_PER_GB) * 100.0).round() / 100.0
}

/// 订阅内容通常整体 Base64 编码，解码失败则按明文处理
pub fn parse_subscription_content(content: &str) -> Vec<ProxyNode> {
    let decoded = decode_base64(content.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());

    match decoded {
        Some(text) => parse_links(&text),
        None => parse_links(content),
    }
}

/// 节点统计：协议和地区分布
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStatistics {
    pub total: usize,
    pub protocols: BTreeMap<Protocol, usize>,
    pub regions: BTreeMap<String, usize>,
}

impl NodeStatistics {
    pub fn from_nodes(nodes: &[ProxyNode]) -> Self {
        let mut stats = Self {
            total: nodes.len(),
            ..Default::default()
        };

        for node in nodes {
            *stats.protocols.entry(node.protocol()).or_default() += 1;
            *stats
                .regions
                .entry(detect_region(&node.name, &node.server).to_string())
                .or_default() += 1;
        }

        stats
    }
}

const REGIONS: &[(&str, &[&str])] = &[
    ("🇭🇰 香港", &["hk", "hong kong", "香港"]),
    ("🇹🇼 台湾", &["tw", "taiwan", "台湾"]),
    ("🇯🇵 日本", &["jp", "japan", "日本"]),
    ("🇸🇬 新加坡", &["sg", "singapore", "新加坡"]),
    ("🇺🇸 美国", &["us", "usa", "united states", "美国"]),
    ("🇬🇧 英国", &["uk", "britain", "英国"]),
];

pub const OTHER_REGION: &str = "🌍 其他";

/// 根据节点名称和地址中的关键词粗略判断地区
pub fn detect_region(name: &str, server: &str) -> &'static str {
    let text = format!("{} {}", name, server).to_lowercase();
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    REGIONS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| keyword_matches(&text, &tokens, k)))
        .map(|(region, _)| *region)
        .unwrap_or(OTHER_REGION)
}

/// 短的英文代码只匹配完整的词（允许带编号，如 `hk01`），其余按子串匹配
fn keyword_matches(text: &str, tokens: &[&str], keyword: &str) -> bool {
    if keyword.is_ascii() && keyword.len() <= 3 {
        tokens
            .iter()
            .any(|t| t.trim_end_matches(|c: char| c.is_ascii_digit()) == keyword)
    } else {
        text.contains(keyword)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub url: String,
    pub info: SubscriptionInfo,
    pub nodes: Vec<ProxyNode>,
    pub statistics: NodeStatistics,
}

pub struct SubscriptionFetcher {
    client: Client,
    user_agent: String,
}

impl SubscriptionFetcher {
    pub fn new(config: &Config) -> Result<Self, SubscriptionError> {
        let client = Client::builder()
            .timeout(config.subscription_timeout_duration())
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Subscription, SubscriptionError> {
        info!("获取订阅: {}", url);

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "*/*")
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 403 {
            return Err(SubscriptionError::Blocked);
        }
        if !status.is_success() {
            return Err(SubscriptionError::Status(status.as_u16()));
        }

        let info = response
            .headers()
            .get(USERINFO_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(SubscriptionInfo::from_header)
            .unwrap_or_default();

        let body = response.text().await?;
        let nodes = parse_subscription_content(&body);
        if nodes.is_empty() {
            warn!("订阅中没有可识别的节点: {}", url);
        }

        Ok(Subscription {
            url: url.to_string(),
            statistics: NodeStatistics::from_nodes(&nodes),
            info,
            nodes,
        })
    }
}
