//! 检测结果的文本输出

use chrono::Local;
use std::fmt::Write;

use crate::check::{
    BatchReport, Connectivity, LatencyStats, Rating, StatsSnapshot, TestResult, Throughput,
};
use crate::subscription::{Subscription, bytes_to_gb};

/// Telegram 单条消息的长度上限（字符）
pub const MESSAGE_LIMIT: usize = 4096;

/// 批量报告中单独列出的最快节点数
const TOP_COUNT: usize = 3;
/// 订阅报告中展示的地区数
const REGION_COUNT: usize = 5;

fn rating_text(rating: Rating) -> &'static str {
    match rating {
        Rating::Blazing => "极速",
        Rating::Fast => "快速",
        Rating::Normal => "正常",
        Rating::Slow => "较慢",
        Rating::SpeedTestFailed => "测速失败",
        Rating::Failed => "连接失败",
        Rating::ConnectionError => "连接错误",
    }
}

fn connectivity_line(connectivity: &Connectivity) -> String {
    match connectivity {
        Connectivity::Connected { latency_ms } => format!("⏱️ 延迟: {:.2}ms", latency_ms),
        Connectivity::Failed { reason, .. } => format!("🔌 连接失败: {}", reason),
        Connectivity::Error { message } => format!("⚠️ 连接错误: {}", message),
    }
}

fn throughput_line(throughput: &Throughput) -> String {
    match throughput {
        Throughput::Success(metrics) => format!(
            "⚡ 速度: {:.2} MB/s（{:.2} MB / {:.2}s，首字节 {:.0}ms）",
            metrics.download_speed,
            metrics.bytes_downloaded as f64 / (1024.0 * 1024.0),
            metrics.duration,
            metrics.time_to_first_byte
        ),
        Throughput::Failed { reason } => format!("📉 测速失败: {}", reason),
        Throughput::Error { message } => format!("⚠️ 测速错误: {}", message),
    }
}

fn stability_line(stats: &LatencyStats) -> String {
    if stats.successful == 0 {
        return format!("📶 稳定性: {} 次握手全部失败", stats.samples);
    }
    format!(
        "📶 稳定性: 平均 {:.2}ms（{:.2} ~ {:.2}ms），抖动 {:.2}ms，丢包 {:.1}%",
        stats.avg_ms, stats.min_ms, stats.max_ms, stats.jitter_ms, stats.packet_loss
    )
}

/// 单个节点的检测报告
pub fn format_test_result(result: &TestResult) -> String {
    let mut text = String::new();

    let _ = writeln!(text, "📊 测速结果\n");
    let _ = writeln!(text, "{} 节点名称: {}", result.rating.emoji(), result.name);
    let _ = writeln!(text, "🌐 服务器: {}:{}", result.server, result.port);
    let _ = writeln!(text, "🔗 协议: {}", result.protocol);
    let _ = writeln!(text, "{}", connectivity_line(&result.connectivity));
    if let Some(stats) = &result.latency_stability {
        let _ = writeln!(text, "{}", stability_line(stats));
    }
    if let Some(throughput) = &result.throughput {
        let _ = writeln!(text, "{}", throughput_line(throughput));
    }
    let _ = writeln!(
        text,
        "📊 状态: {} {}",
        result.rating.emoji(),
        rating_text(result.rating)
    );
    let _ = write!(
        text,
        "🕒 时间: {}",
        result.timestamp.format("%Y-%m-%d %H:%M:%S")
    );

    text
}

fn result_summary(result: &TestResult) -> String {
    match (&result.connectivity, result.throughput.as_ref().and_then(Throughput::metrics)) {
        (_, Some(metrics)) => format!(
            "{:.2} MB/s · {:.0}ms",
            metrics.download_speed,
            result.connectivity.latency_ms().unwrap_or(0.0)
        ),
        (Connectivity::Connected { latency_ms }, None) => {
            format!("{:.0}ms · {}", latency_ms, rating_text(result.rating))
        }
        _ => rating_text(result.rating).to_string(),
    }
}

/// 批量检测报告，结果已按速度排好序
pub fn format_batch_report(report: &BatchReport) -> String {
    let mut text = String::new();

    let _ = writeln!(text, "📊 批量测速结果（{} 个节点）\n", report.results.len());

    if report.results.is_empty() {
        let _ = writeln!(text, "没有可展示的结果");
    }

    for (i, result) in report.results.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. {} {} [{}] {}",
            i + 1,
            result.rating.emoji(),
            result.name,
            result.protocol,
            result_summary(result)
        );
    }

    let fastest: Vec<&TestResult> = report
        .results
        .iter()
        .filter(|r| r.download_speed() > 0.0)
        .take(TOP_COUNT)
        .collect();
    if !fastest.is_empty() {
        let _ = writeln!(text, "\n🏆 最快节点:");
        for (i, result) in fastest.iter().enumerate() {
            let _ = writeln!(
                text,
                "  {}. {}: {:.2} MB/s",
                i + 1,
                result.name,
                result.download_speed()
            );
        }
    }

    if report.truncated() {
        let _ = writeln!(
            text,
            "\n⚠️ 节点数量超过上限，{} 个未测试",
            report.dropped
        );
    }
    if report.cancelled {
        let _ = writeln!(text, "\n⏹️ 测速已取消，已完成 {} 个节点", report.probed);
    }

    text.trim_end().to_string()
}

/// 订阅分析报告
pub fn format_subscription(subscription: &Subscription) -> String {
    let mut text = String::new();
    let info = &subscription.info;
    let stats = &subscription.statistics;

    let _ = writeln!(text, "📊 订阅分析结果\n");

    if let (Some(total), Some(used), Some(remaining)) =
        (info.total, info.used(), info.remaining())
    {
        let _ = writeln!(
            text,
            "📈 流量详情: {} GB / {} GB",
            bytes_to_gb(used),
            bytes_to_gb(total)
        );
        if let Some(percentage) = info.usage_percentage() {
            let _ = writeln!(text, "📊 使用进度: {}%", percentage);
        }
        let _ = writeln!(text, "💾 剩余可用: {} GB", bytes_to_gb(remaining));
    }

    if let Some(expire_at) = info.expire_at() {
        let _ = writeln!(
            text,
            "⏰ 过期时间: {}（剩余 {} 天）",
            expire_at.format("%Y-%m-%d"),
            info.remaining_days(Local::now()).unwrap_or(0)
        );
    }

    let _ = writeln!(text, "\n🌐 节点总数: {}", stats.total);

    if !stats.protocols.is_empty() {
        let protocols: Vec<String> = stats
            .protocols
            .iter()
            .map(|(protocol, count)| format!("{} ×{}", protocol, count))
            .collect();
        let _ = writeln!(text, "🔐 协议类型: {}", protocols.join(", "));
    }

    if !stats.regions.is_empty() {
        let mut regions: Vec<(&String, &usize)> = stats.regions.iter().collect();
        regions.sort_by(|a, b| b.1.cmp(a.1));
        let regions: Vec<String> = regions
            .into_iter()
            .take(REGION_COUNT)
            .map(|(region, count)| format!("{} ×{}", region, count))
            .collect();
        let _ = writeln!(text, "🗺️ 覆盖范围: {}", regions.join(", "));
    }

    text.trim_end().to_string()
}

/// 检测统计摘要
pub fn format_stats(stats: &StatsSnapshot) -> String {
    let mut text = String::new();

    let _ = writeln!(text, "检测摘要:");
    let _ = writeln!(text, "{:=<40}", "");
    let _ = writeln!(text, "总节点数: {}", stats.total);
    let _ = writeln!(text, "已检测: {}", stats.checked);
    let _ = writeln!(
        text,
        "可连通: {} ({:.1}%)",
        stats.connected, stats.success_rate
    );
    let _ = writeln!(text, "不可用: {}", stats.failed);
    let _ = write!(
        text,
        "测速流量: {:.2} MB",
        stats.total_bytes as f64 / (1024.0 * 1024.0)
    );

    text
}

/// 按行切分长消息，单行超长时在字符边界处硬切
///
/// 空行原样保留，完全为空的块不输出。
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    // 当前块是否已有行（可能是空行）
    let mut started = false;

    if text.is_empty() {
        return chunks;
    }

    for line in text.split('\n') {
        let line_len = line.chars().count();
        // 加上换行符后的长度
        let needed = if started { line_len + 1 } else { line_len };

        if current_len + needed <= limit {
            if started {
                current.push('\n');
            }
            current.push_str(line);
            current_len += needed;
            started = true;
            continue;
        }

        if started {
            push_chunk(&mut chunks, std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
            started = true;
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut pieces = chars.chunks(limit).peekable();
        while let Some(piece) = pieces.next() {
            let piece: String = piece.iter().collect();
            if pieces.peek().is_some() {
                chunks.push(piece);
            } else {
                current_len = piece.chars().count();
                current = piece;
            }
        }
        started = true;
    }

    if started {
        push_chunk(&mut chunks, current);
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chunk: String) {
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::ThroughputMetrics;
    use crate::proxy::{NodeSettings, ProxyNode, VlessSettings};
    use crate::subscription::{NodeStatistics, SubscriptionInfo};

    fn node(name: &str) -> ProxyNode {
        ProxyNode::new(
            name.to_string(),
            "example.com".to_string(),
            443,
            NodeSettings::Vless(VlessSettings {
                uuid: "a1b2c3".to_string(),
                ..Default::default()
            }),
        )
    }

    fn measured(name: &str, speed: f64) -> TestResult {
        TestResult::new(
            &node(name),
            Connectivity::Connected { latency_ms: 23.0 },
            Some(Throughput::Success(ThroughputMetrics {
                download_speed: speed,
                bytes_downloaded: 10 * 1024 * 1024,
                duration: 2.0,
                time_to_first_byte: 80.0,
            })),
        )
    }

    #[test]
    fn test_format_single_result() {
        let text = format_test_result(&measured("MyNode", 41.0));
        assert!(text.contains("MyNode"));
        assert!(!text.contains("稳定性"));
        assert!(text.contains("example.com:443"));
        assert!(text.contains("vless"));
        assert!(text.contains("41.00 MB/s"));
        assert!(text.contains("⚡ 快速"));

        let failed = TestResult::new(
            &node("Dead"),
            Connectivity::Failed {
                reason: "connection refused".to_string(),
                code: Some(111),
            },
            None,
        );
        let text = format_test_result(&failed);
        assert!(text.contains("connection refused"));
        assert!(text.contains("连接失败"));
        assert!(!text.contains("MB/s"));
    }

    #[test]
    fn test_format_latency_stability() {
        let result = measured("Stable", 12.0)
            .with_latency_stability(LatencyStats::from_samples(5, &[10.0, 14.0, 12.0, 16.0]));
        let text = format_test_result(&result);
        assert!(text.contains("平均 13.00ms（10.00 ~ 16.00ms）"));
        assert!(text.contains("抖动 6.00ms"));
        assert!(text.contains("丢包 20.0%"));

        let result =
            measured("Lossy", 12.0).with_latency_stability(LatencyStats::from_samples(3, &[]));
        assert!(format_test_result(&result).contains("3 次握手全部失败"));
    }

    #[test]
    fn test_format_batch_report() {
        let report = BatchReport {
            results: vec![
                measured("fast", 41.0),
                measured("slow", 3.2),
                TestResult::synthetic_error(&node("broken"), "dns"),
            ],
            probed: 3,
            dropped: 5,
            cancelled: false,
        };
        let text = format_batch_report(&report);

        let fast = text.find("1. ⚡ fast").unwrap();
        let slow = text.find("2. 🐌 slow").unwrap();
        let broken = text.find("3. ❌ broken").unwrap();
        assert!(fast < slow && slow < broken);
        assert!(text.contains("🏆 最快节点"));
        assert!(text.contains("5 个未测试"));
        assert!(!text.contains("已取消"));
    }

    #[test]
    fn test_format_cancelled_report() {
        let report = BatchReport {
            cancelled: true,
            ..Default::default()
        };
        let text = format_batch_report(&report);
        assert!(text.contains("没有可展示的结果"));
        assert!(text.contains("测速已取消"));
    }

    #[test]
    fn test_format_subscription() {
        let nodes = vec![node("HK 01"), node("HK 02"), node("Tokyo jp")];
        let subscription = Subscription {
            url: "https://sub.example.com".to_string(),
            info: SubscriptionInfo::from_header(
                "upload=1073741824; download=1073741824; total=10737418240",
            ),
            statistics: NodeStatistics::from_nodes(&nodes),
            nodes,
        };
        let text = format_subscription(&subscription);
        assert!(text.contains("2 GB / 10 GB"));
        assert!(text.contains("20%"));
        assert!(text.contains("节点总数: 3"));
        assert!(text.contains("vless ×3"));
        assert!(text.contains("香港 ×2"));
        assert!(!text.contains("过期时间"));
    }

    #[test]
    fn test_format_stats() {
        let text = format_stats(&StatsSnapshot {
            total: 4,
            checked: 4,
            connected: 3,
            failed: 1,
            total_bytes: 3 * 1024 * 1024,
            success_rate: 75.0,
        });
        assert!(text.contains("可连通: 3 (75.0%)"));
        assert!(text.contains("3.00 MB"));
    }

    #[test]
    fn test_split_message_on_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 9), ["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_message(text, 100), [text]);
        assert!(split_message("", 10).is_empty());
    }

    #[test]
    fn test_split_message_keeps_blank_lines() {
        let text = "\n\nheader\n\nbody";
        assert_eq!(split_message(text, 100), [text]);

        // 块边界之后的空行
        let text = "aaaa\n\nbb\n\ncc";
        let chunks = split_message(text, 5);
        assert_eq!(chunks, ["aaaa\n", "bb\n", "cc"]);
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn test_split_message_long_line_on_char_boundary() {
        let line = "节点".repeat(5);
        let chunks = split_message(&format!("ok\n{line}"), 4);
        assert_eq!(chunks, ["ok", "节点节点", "节点节点", "节点"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn test_split_message_respects_telegram_limit() {
        let lines: Vec<String> = (0..2000).map(|i| format!("{i}. node")).collect();
        let text = lines.join("\n");
        let chunks = split_message(&text, MESSAGE_LIMIT);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= MESSAGE_LIMIT));
        assert_eq!(chunks.join("\n"), text);
    }
}
