mod result;

pub use result::{
    BatchReport, Connectivity, LatencyStats, Rating, TestResult, Throughput, ThroughputMetrics,
    sort_results,
};

use log::{debug, error, info, warn};
use reqwest::Client;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{Instant, timeout, timeout_at};

use crate::config::Config;
use crate::proxy::ProxyNode;
use crate::ui::progress::ProgressTracker;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct Stats {
    pub total_nodes: AtomicU64,
    pub checked_nodes: AtomicU64,
    pub connected_nodes: AtomicU64,
    pub failed_nodes: AtomicU64,
    pub total_bytes: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_nodes: AtomicU64::new(0),
            checked_nodes: AtomicU64::new(0),
            connected_nodes: AtomicU64::new(0),
            failed_nodes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        }
    }

    pub fn increment_connected(&self) {
        self.connected_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checked(&self) {
        self.checked_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_success_rate(&self) -> f64 {
        let checked = self.checked_nodes.load(Ordering::Relaxed);
        let connected = self.connected_nodes.load(Ordering::Relaxed);

        if checked > 0 {
            (connected as f64 / checked as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total_nodes.load(Ordering::Relaxed),
            checked: self.checked_nodes.load(Ordering::Relaxed),
            connected: self.connected_nodes.load(Ordering::Relaxed),
            failed: self.failed_nodes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            success_rate: self.get_success_rate(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub checked: u64,
    pub connected: u64,
    pub failed: u64,
    pub total_bytes: u64,
    pub success_rate: f64,
}

/// 节点检测器
///
/// 先做 TCP 连通性检测，连通后再做下载测速。下载的是固定的测速文件，
/// 并不经过节点本身，结果反映的是本地网络状况。
#[derive(Clone)]
pub struct ProxyChecker {
    config: Arc<Config>,
    client: Client,
    stats: Arc<Stats>,
    progress: Option<ProgressTracker>,
}

enum ConnectFailure {
    Resolve(io::Error),
    NoAddress,
    Connect(io::Error),
}

impl ProxyChecker {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = create_http_client(&config)?;

        Ok(Self {
            config: Arc::new(config),
            client,
            stats: Arc::new(Stats::new()),
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn get_stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// TCP 连接测试，DNS 解析和建立连接共用一个超时
    pub async fn check_connectivity(&self, node: &ProxyNode) -> Connectivity {
        self.connect_within(node, self.config.connect_timeout_duration())
            .await
    }

    /// 连续多次握手，统计延迟波动和失败比例
    pub async fn check_latency_stability(&self, node: &ProxyNode, count: usize) -> LatencyStats {
        let sample_timeout = self.config.latency_timeout_duration();
        let interval = self.config.latency_interval_duration();
        let mut latencies = Vec::with_capacity(count);

        for i in 0..count {
            if let Some(latency) = self.connect_within(node, sample_timeout).await.latency_ms() {
                latencies.push(latency);
            }
            if i + 1 < count && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        let stats = LatencyStats::from_samples(count, &latencies);
        debug!(
            "{} 延迟稳定性: 平均 {:.2}ms，抖动 {:.2}ms，丢包 {:.1}%",
            node.name, stats.avg_ms, stats.jitter_ms, stats.packet_loss
        );
        stats
    }

    async fn connect_within(&self, node: &ProxyNode, connect_timeout: Duration) -> Connectivity {
        let host = node.connect_host();
        if host.is_empty() {
            return Connectivity::Error {
                message: "empty server address".to_string(),
            };
        }
        if node.port == 0 {
            return Connectivity::Error {
                message: "invalid port 0".to_string(),
            };
        }

        let start = Instant::now();

        let attempt = async {
            // IP 字面量不需要解析
            let addrs: Vec<SocketAddr> = match node.get_ip_address() {
                Some(ip) => vec![SocketAddr::new(ip, node.port)],
                None => lookup_host((host, node.port))
                    .await
                    .map_err(ConnectFailure::Resolve)?
                    .collect(),
            };
            if addrs.is_empty() {
                return Err(ConnectFailure::NoAddress);
            }
            TcpStream::connect(&addrs[..])
                .await
                .map_err(ConnectFailure::Connect)
        };

        match timeout(connect_timeout, attempt).await {
            Ok(Ok(_stream)) => Connectivity::Connected {
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            },
            Ok(Err(ConnectFailure::Resolve(e))) => Connectivity::Error {
                message: format!("failed to resolve {host}: {e}"),
            },
            Ok(Err(ConnectFailure::NoAddress)) => Connectivity::Error {
                message: format!("no address found for {host}"),
            },
            Ok(Err(ConnectFailure::Connect(e))) => classify_connect_error(e),
            Err(_) => Connectivity::Failed {
                reason: format!("connection timed out after {}ms", connect_timeout.as_millis()),
                code: None,
            },
        }
    }

    /// 下载测速，请求和读取共用一个截止时间，到时即结束测量
    pub async fn check_throughput(&self) -> Throughput {
        let start = Instant::now();
        let deadline = start + self.config.download_timeout_duration();

        let mut response =
            match timeout_at(deadline, self.client.get(&self.config.speed_test_url).send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return Throughput::Error {
                        message: e.to_string(),
                    };
                }
                Err(_) => {
                    return Throughput::Error {
                        message: "timed out waiting for response".to_string(),
                    };
                }
            };

        let status = response.status();
        if !status.is_success() {
            return Throughput::Failed {
                reason: format!("HTTP {}", status.as_u16()),
            };
        }

        let mut downloaded: u64 = 0;
        let mut first_byte = None;

        loop {
            match timeout_at(deadline, response.chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    if first_byte.is_none() {
                        first_byte = Some(start.elapsed());
                    }
                    downloaded += chunk.len() as u64;
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    self.stats.add_bytes(downloaded);
                    return Throughput::Error {
                        message: e.to_string(),
                    };
                }
                Err(_) => {
                    debug!("测速达到时间上限，已下载 {} 字节", downloaded);
                    break;
                }
            }
        }

        // 记录流量
        self.stats.add_bytes(downloaded);

        let elapsed = start.elapsed().as_secs_f64();
        if downloaded == 0 || elapsed <= 0.0 {
            return Throughput::Failed {
                reason: "no data received".to_string(),
            };
        }

        Throughput::Success(ThroughputMetrics {
            download_speed: downloaded as f64 / elapsed / BYTES_PER_MB,
            bytes_downloaded: downloaded,
            duration: elapsed,
            time_to_first_byte: first_byte.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0),
        })
    }

    /// 检测单个节点
    pub async fn check_proxy(&self, node: &ProxyNode) -> TestResult {
        let connectivity = self.check_connectivity(node).await;
        let connected = connectivity.is_connected();

        if let Some(progress) = &self.progress {
            progress.increment_connectivity(connected);
        }

        let samples = self.config.latency_samples;
        let stability = if connected && samples > 0 {
            Some(self.check_latency_stability(node, samples).await)
        } else {
            None
        };

        let throughput = if connected {
            self.stats.increment_connected();
            let throughput = self.check_throughput().await;
            if let Some(progress) = &self.progress {
                progress.increment_throughput(throughput.metrics().is_some());
            }
            Some(throughput)
        } else {
            self.stats.increment_failed();
            None
        };

        self.stats.increment_checked();

        let mut result = TestResult::new(node, connectivity, throughput);
        if let Some(stats) = stability {
            result = result.with_latency_stability(stats);
        }
        info!(
            "{} [{}] {} -> {}",
            result.name,
            result.protocol,
            node.address(),
            result.rating
        );
        result
    }

    /// 批量检测
    ///
    /// 节点逐个检测，两次检测之间暂停一段时间，避免测速互相干扰。
    /// 超出上限的节点会被丢弃并记录在报告中。收到取消信号时，
    /// 正在进行的检测被中止，该节点及之后的节点都不出现在结果里。
    pub async fn check_proxies(
        &self,
        mut nodes: Vec<ProxyNode>,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> BatchReport {
        let limit = self.config.batch_limit.max(1);
        let dropped = nodes.len().saturating_sub(limit);
        if dropped > 0 {
            warn!("节点数量超过上限 {}，丢弃 {} 个节点", limit, dropped);
            nodes.truncate(limit);
        }

        self.stats
            .total_nodes
            .store(nodes.len() as u64, Ordering::Relaxed);
        if let Some(progress) = &self.progress {
            progress.set_total_nodes(nodes.len() as u64);
        }

        let interval = self.config.probe_interval_duration();
        let mut report = BatchReport {
            dropped,
            ..Default::default()
        };

        for (index, node) in nodes.into_iter().enumerate() {
            if is_cancelled(&cancel) {
                report.cancelled = true;
                break;
            }
            if index > 0 && !interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wait_cancelled(&mut cancel) => {
                        report.cancelled = true;
                        break;
                    }
                }
            }

            // 单独的任务里检测，panic 时转换为错误结果
            let checker = self.clone();
            let task_node = node.clone();
            let mut handle = tokio::spawn(async move { checker.check_proxy(&task_node).await });

            let joined = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => None,
                joined = &mut handle => Some(joined),
            };

            match joined {
                Some(joined) => report.results.push(join_outcome(&node, joined)),
                None => {
                    handle.abort();
                    info!("检测已取消，跳过节点 {}", node.name);
                    report.cancelled = true;
                    break;
                }
            }
            report.probed += 1;
        }

        if let Some(progress) = &self.progress {
            progress.finalize(report.cancelled);
        }

        sort_results(&mut report.results);
        report
    }
}

/// 检测任务异常退出（panic 或被中止）时给出占位结果
fn join_outcome(node: &ProxyNode, joined: Result<TestResult, JoinError>) -> TestResult {
    match joined {
        Ok(result) => result,
        Err(e) => {
            error!("检测节点 {} 时任务异常: {}", node.name, e);
            TestResult::synthetic_error(node, format!("task aborted: {e}"))
        }
    }
}

fn create_http_client(config: &Config) -> anyhow::Result<Client> {
    let client = Client::builder()
        .connect_timeout(config.download_timeout_duration())
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()?;

    Ok(client)
}

/// 对端拒绝、重置或不可达算作连接失败，其余 IO 错误算作异常
fn classify_connect_error(err: io::Error) -> Connectivity {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable => Connectivity::Failed {
            reason: err.to_string(),
            code: err.raw_os_error(),
        },
        _ => Connectivity::Error {
            message: err.to_string(),
        },
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// 没有取消信号或发送端已关闭时永远不会返回
async fn wait_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
