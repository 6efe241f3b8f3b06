use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tokio::sync::watch;

use node_speedtest::check::{BatchReport, ProxyChecker, TestResult};
use node_speedtest::config::{Config, Secrets};
use node_speedtest::parser::parse_links;
use node_speedtest::proxy::ProxyNode;
use node_speedtest::subscription::SubscriptionFetcher;
use node_speedtest::ui::progress::ProgressTracker;
use node_speedtest::ui::report::{
    MESSAGE_LIMIT, format_batch_report, format_stats, format_subscription, format_test_result,
    split_message,
};

/// 节点链接解析与测速工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 节点分享链接（vmess://, vless://, ss://, hy2://, trojan://）
    links: Vec<String>,

    /// 从文件读取链接，`-` 表示标准输入
    #[arg(short = 'i', long)]
    input: Option<String>,

    /// 订阅链接
    #[arg(short = 's', long)]
    subscription: Option<String>,

    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// 输出格式：text, json, yaml
    #[arg(long)]
    format: Option<String>,

    /// 单次批量检测的节点上限
    #[arg(long)]
    limit: Option<usize>,

    /// 两次检测之间的间隔（毫秒）
    #[arg(long)]
    interval: Option<u64>,

    /// 测速地址
    #[arg(long)]
    speed_url: Option<String>,

    /// 是否显示进度条
    #[arg(long)]
    progress: Option<bool>,

    /// 发起请求的用户 ID，需在 ALLOWED_USER_IDS 白名单中
    #[arg(long)]
    user_id: Option<String>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if Path::new(&args.config).exists() {
        Config::load_from_file(&args.config)
            .with_context(|| format!("配置文件加载失败: {}", args.config))?
    } else {
        Config::default()
    };

    config.apply_env_overrides()?;

    // 覆盖命令行参数
    if let Some(format) = &args.format {
        config.output_format = format.clone();
    }
    if let Some(limit) = args.limit {
        config.batch_limit = limit;
    }
    if let Some(interval) = args.interval {
        config.probe_interval = interval;
    }
    if let Some(speed_url) = &args.speed_url {
        config.speed_test_url = speed_url.clone();
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logger(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.log_level.as_str() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// 凭据由外部组件写入环境变量，指定了用户时才强制校验
fn check_authorization(user_id: Option<&str>) -> Result<()> {
    match (Secrets::from_env(), user_id) {
        (Ok(secrets), Some(user_id)) => {
            if !secrets.is_authorized(user_id) {
                bail!("用户 {} 不在白名单中", user_id);
            }
            info!("用户 {} 已通过验证", user_id);
        }
        (Ok(secrets), None) => {
            info!("已加载凭据，白名单用户数: {}", secrets.allowed_user_ids.len());
        }
        (Err(e), Some(_)) => return Err(e).context("无法校验用户权限"),
        (Err(e), None) => warn!("{}", e),
    }
    Ok(())
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("读取标准输入失败")?;
        Ok(text)
    } else {
        fs::read_to_string(input).with_context(|| format!("读取文件失败: {}", input))
    }
}

fn print_text(text: &str) {
    for (i, chunk) in split_message(text, MESSAGE_LIMIT).iter().enumerate() {
        if i > 0 {
            println!("{:-<40}", "");
        }
        println!("{}", chunk);
    }
}

fn print_structured<T: serde::Serialize>(value: &T, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        _ => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Ctrl-C 转换为取消信号
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，停止检测");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_single(checker: &ProxyChecker, node: &ProxyNode) -> Option<TestResult> {
    tokio::select! {
        result = checker.check_proxy(node) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    }
}

async fn run_batch(checker: &ProxyChecker, nodes: Vec<ProxyNode>) -> BatchReport {
    checker.check_proxies(nodes, Some(cancel_on_ctrl_c())).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = load_config(&args)?;
    init_logger(&config, args.verbose);

    check_authorization(args.user_id.as_deref())?;

    let text_output = config.output_format == "text";
    let mut nodes = parse_links(&args.links.join("\n"));

    if let Some(input) = &args.input {
        nodes.extend(parse_links(&read_input(input)?));
    }

    if let Some(url) = &args.subscription {
        let fetcher = SubscriptionFetcher::new(&config)?;
        let subscription = fetcher
            .fetch(url)
            .await
            .with_context(|| format!("订阅分析失败: {}", url))?;
        if text_output {
            print_text(&format_subscription(&subscription));
            println!();
        }
        nodes.extend(subscription.nodes);
    }

    if nodes.is_empty() {
        bail!("节点链接解析失败，请检查格式是否正确");
    }

    info!("解析到 {} 个节点", nodes.len());

    let mut checker = ProxyChecker::new(config.clone())?;

    if nodes.len() == 1 {
        let node = &nodes[0];
        let Some(result) = run_single(&checker, node).await else {
            bail!("检测已取消");
        };
        if text_output {
            print_text(&format_test_result(&result));
        } else {
            print_structured(&result, &config.output_format)?;
        }
        return Ok(());
    }

    let progress = ProgressTracker::new(&config);
    if progress.is_enabled() {
        checker = checker.with_progress(progress.clone());
    }

    let report = run_batch(&checker, nodes).await;

    if text_output {
        print_text(&format_batch_report(&report));
        println!();
        println!("{}", format_stats(&checker.get_stats().snapshot()));
        if progress.is_enabled() {
            println!(
                "进度统计: 连通 {} 个，测速成功 {} 个",
                progress.connected(),
                progress.measured()
            );
        }
    } else {
        print_structured(&report, &config.output_format)?;
    }

    if report.cancelled {
        warn!("检测被中断，仅输出已完成的 {} 个节点", report.probed);
    }

    Ok(())
}
