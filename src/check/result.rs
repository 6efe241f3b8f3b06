use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::proxy::{Protocol, ProxyNode};

/// TCP 连通性检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Connectivity {
    Connected { latency_ms: f64 },
    Failed { reason: String, code: Option<i32> },
    Error { message: String },
}

impl Connectivity {
    pub fn is_connected(&self) -> bool {
        matches!(self, Connectivity::Connected { .. })
    }

    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            Connectivity::Connected { latency_ms } => Some(*latency_ms),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    /// MB/s（1 MB = 1,048,576 字节）
    pub download_speed: f64,
    pub bytes_downloaded: u64,
    /// 秒
    pub duration: f64,
    /// 毫秒
    pub time_to_first_byte: f64,
}

/// 下载测速结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Throughput {
    Success(ThroughputMetrics),
    Failed { reason: String },
    Error { message: String },
}

impl Throughput {
    pub fn metrics(&self) -> Option<&ThroughputMetrics> {
        match self {
            Throughput::Success(metrics) => Some(metrics),
            _ => None,
        }
    }
}

/// 多次 TCP 握手的延迟统计，单位毫秒
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub successful: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// 最大与最小延迟之差
    pub jitter_ms: f64,
    /// 失败次数占比（%）
    pub packet_loss: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: usize, latencies: &[f64]) -> Self {
        if samples == 0 {
            return Self::default();
        }

        let packet_loss = (samples - latencies.len().min(samples)) as f64 / samples as f64 * 100.0;
        if latencies.is_empty() {
            return Self {
                samples,
                packet_loss,
                ..Default::default()
            };
        }

        let min_ms = latencies.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            samples,
            successful: latencies.len(),
            avg_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
            min_ms,
            max_ms,
            jitter_ms: max_ms - min_ms,
            packet_loss,
        }
    }
}

/// 速度评级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Blazing,
    Fast,
    Normal,
    Slow,
    SpeedTestFailed,
    Failed,
    ConnectionError,
}

impl Rating {
    /// 阈值为严格大于，恰好等于时归入较低一档
    pub fn from_speed(download_speed: f64) -> Self {
        if download_speed > 50.0 {
            Rating::Blazing
        } else if download_speed > 20.0 {
            Rating::Fast
        } else if download_speed > 5.0 {
            Rating::Normal
        } else {
            Rating::Slow
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Rating::Blazing => "blazing",
            Rating::Fast => "fast",
            Rating::Normal => "normal",
            Rating::Slow => "slow",
            Rating::SpeedTestFailed => "speed test failed",
            Rating::Failed => "failed",
            Rating::ConnectionError => "connection error",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Rating::Blazing => "🚀",
            Rating::Fast => "⚡",
            Rating::Normal => "✅",
            Rating::Slow => "🐌",
            Rating::SpeedTestFailed | Rating::Failed | Rating::ConnectionError => "❌",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 单个节点的完整检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub protocol: Protocol,
    pub connectivity: Connectivity,
    pub throughput: Option<Throughput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_stability: Option<LatencyStats>,
    pub rating: Rating,
    pub timestamp: DateTime<Local>,
}

impl TestResult {
    /// 评级由两个阶段的结果推导
    pub fn new(node: &ProxyNode, connectivity: Connectivity, throughput: Option<Throughput>) -> Self {
        let rating = match (&connectivity, &throughput) {
            (Connectivity::Failed { .. }, _) => Rating::Failed,
            (Connectivity::Error { .. }, _) => Rating::ConnectionError,
            (Connectivity::Connected { .. }, Some(Throughput::Success(metrics))) => {
                Rating::from_speed(metrics.download_speed)
            }
            (Connectivity::Connected { .. }, _) => Rating::SpeedTestFailed,
        };

        Self {
            name: node.name.clone(),
            server: node.server.clone(),
            port: node.port,
            protocol: node.protocol(),
            connectivity,
            throughput,
            latency_stability: None,
            rating,
            timestamp: Local::now(),
        }
    }

    pub fn with_latency_stability(mut self, stats: LatencyStats) -> Self {
        self.latency_stability = Some(stats);
        self
    }

    /// 检测过程异常退出时的占位结果
    pub fn synthetic_error(node: &ProxyNode, message: impl Into<String>) -> Self {
        Self::new(
            node,
            Connectivity::Error {
                message: message.into(),
            },
            None,
        )
    }

    /// 排序用，未成功测速的节点视为 0
    pub fn download_speed(&self) -> f64 {
        self.throughput
            .as_ref()
            .and_then(Throughput::metrics)
            .map(|m| m.download_speed)
            .unwrap_or(0.0)
    }
}

/// 按下载速度降序排列，速度相同保持原有顺序
pub fn sort_results(results: &mut [TestResult]) {
    results.sort_by(|a, b| {
        b.download_speed()
            .partial_cmp(&a.download_speed())
            .unwrap_or(Ordering::Equal)
    });
}

/// 一次批量检测的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub results: Vec<TestResult>,
    /// 实际检测的节点数
    pub probed: usize,
    /// 超出上限被丢弃的节点数
    pub dropped: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn truncated(&self) -> bool {
        self.dropped > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{NodeSettings, TrojanSettings};

    fn node(name: &str) -> ProxyNode {
        ProxyNode::new(
            name.to_string(),
            "example.com".to_string(),
            443,
            NodeSettings::Trojan(TrojanSettings {
                password: "pw".to_string(),
                ..Default::default()
            }),
        )
    }

    fn with_speed(name: &str, speed: f64) -> TestResult {
        TestResult::new(
            &node(name),
            Connectivity::Connected { latency_ms: 12.0 },
            Some(Throughput::Success(ThroughputMetrics {
                download_speed: speed,
                bytes_downloaded: 1024,
                duration: 1.0,
                time_to_first_byte: 5.0,
            })),
        )
    }

    #[test]
    fn test_rating_thresholds() {
        let cases = [
            (0.0, Rating::Slow),
            (4.9, Rating::Slow),
            (5.0, Rating::Slow),
            (5.1, Rating::Normal),
            (20.0, Rating::Normal),
            (20.1, Rating::Fast),
            (50.0, Rating::Fast),
            (50.1, Rating::Blazing),
        ];
        for (speed, expected) in cases {
            assert_eq!(Rating::from_speed(speed), expected, "speed {speed}");
        }
    }

    #[test]
    fn test_rating_derivation() {
        let failed = TestResult::new(
            &node("a"),
            Connectivity::Failed {
                reason: "connection refused".to_string(),
                code: Some(111),
            },
            None,
        );
        assert_eq!(failed.rating, Rating::Failed);
        assert_eq!(failed.rating.label(), "failed");

        let errored = TestResult::synthetic_error(&node("b"), "boom");
        assert_eq!(errored.rating, Rating::ConnectionError);
        assert_eq!(errored.rating.label(), "connection error");

        let no_speed = TestResult::new(
            &node("c"),
            Connectivity::Connected { latency_ms: 3.0 },
            Some(Throughput::Failed {
                reason: "HTTP 503".to_string(),
            }),
        );
        assert_eq!(no_speed.rating, Rating::SpeedTestFailed);
        assert_eq!(no_speed.download_speed(), 0.0);

        assert_eq!(with_speed("d", 41.0).rating, Rating::Fast);
    }

    #[test]
    fn test_sort_results_descending_failed_last() {
        let failed = TestResult::new(
            &node("failed"),
            Connectivity::Error {
                message: "dns".to_string(),
            },
            None,
        );
        let mut results = vec![with_speed("slow", 3.2), with_speed("fast", 41.0), failed];
        sort_results(&mut results);

        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["fast", "slow", "failed"]);
    }

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::from_samples(5, &[12.0, 20.0, 16.0, 10.0]);
        assert_eq!(stats.successful, 4);
        assert_eq!(stats.avg_ms, 14.5);
        assert_eq!(stats.min_ms, 10.0);
        assert_eq!(stats.max_ms, 20.0);
        assert_eq!(stats.jitter_ms, 10.0);
        assert_eq!(stats.packet_loss, 20.0);

        let lost = LatencyStats::from_samples(3, &[]);
        assert_eq!(lost.successful, 0);
        assert_eq!(lost.avg_ms, 0.0);
        assert_eq!(lost.packet_loss, 100.0);

        assert_eq!(LatencyStats::from_samples(0, &[]), LatencyStats::default());
    }

    #[test]
    fn test_result_copies_node_identity() {
        let result = with_speed("copy", 10.0);
        assert_eq!(result.name, "copy");
        assert_eq!(result.server, "example.com");
        assert_eq!(result.port, 443);
        assert_eq!(result.protocol, Protocol::Trojan);
    }
}
