use crate::config::Config;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone)]
pub struct ProgressTracker {
    multi_progress: Option<Arc<MultiProgress>>,
    total_progress: Option<ProgressBar>,
    connectivity_progress: Option<ProgressBar>,
    throughput_progress: Option<ProgressBar>,
    total_nodes: Arc<AtomicU64>,
    connected_nodes: Arc<AtomicU64>,
    measured_nodes: Arc<AtomicU64>,
}

fn stage_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
}

impl ProgressTracker {
    pub fn new(config: &Config) -> Self {
        if !config.print_progress {
            return Self::disabled();
        }

        let multi_progress = Arc::new(MultiProgress::new());

        // 总进度条
        let total_style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

        let total_progress = multi_progress.add(ProgressBar::new(0));
        total_progress.set_style(total_style);

        // 连通性检测进度
        let connectivity_progress = multi_progress.add(ProgressBar::new(0));
        connectivity_progress.set_style(stage_style(
            "  {spinner:.yellow} 连通检测: [{bar:30.yellow}] {pos}/{len} {msg}",
        ));

        // 下载测速进度
        let throughput_progress = multi_progress.add(ProgressBar::new(0));
        throughput_progress.set_style(stage_style(
            "  {spinner:.green} 下载测速: [{bar:30.green}] {pos}/{len} {msg}",
        ));

        Self {
            multi_progress: Some(multi_progress),
            total_progress: Some(total_progress),
            connectivity_progress: Some(connectivity_progress),
            throughput_progress: Some(throughput_progress),
            total_nodes: Arc::new(AtomicU64::new(0)),
            connected_nodes: Arc::new(AtomicU64::new(0)),
            measured_nodes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            multi_progress: None,
            total_progress: None,
            connectivity_progress: None,
            throughput_progress: None,
            total_nodes: Arc::new(AtomicU64::new(0)),
            connected_nodes: Arc::new(AtomicU64::new(0)),
            measured_nodes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_total_nodes(&self, total: u64) {
        self.total_nodes.store(total, Ordering::Relaxed);

        for pb in [&self.total_progress, &self.connectivity_progress, &self.throughput_progress]
            .into_iter()
            .flatten()
        {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    /// 每个节点都会经过连通性检测，这里同时推进总进度
    pub fn increment_connectivity(&self, success: bool) {
        if success {
            self.connected_nodes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.connectivity_progress {
            pb.inc(1);
            pb.set_message(if success { "✅" } else { "❌" });
        }

        if let Some(pb) = &self.total_progress {
            pb.inc(1);
        }
    }

    pub fn increment_throughput(&self, success: bool) {
        if success {
            self.measured_nodes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.throughput_progress {
            pb.inc(1);
            pb.set_message(if success { "✅" } else { "❌" });
        }
    }

    /// 取消时保留当前进度，只标记为已取消
    pub fn finalize(&self, cancelled: bool) {
        if cancelled {
            for pb in [&self.total_progress, &self.connectivity_progress, &self.throughput_progress]
                .into_iter()
                .flatten()
            {
                pb.abandon_with_message("已取消");
            }
            return;
        }

        if let Some(pb) = &self.connectivity_progress {
            pb.finish_with_message("完成");
        }
        if let Some(pb) = &self.throughput_progress {
            pb.finish_with_message("完成");
        }
        if let Some(pb) = &self.total_progress {
            let total = self.total_nodes.load(Ordering::Relaxed);
            pb.set_position(total);
            pb.finish_with_message("检测完成");
        }
    }

    pub fn connected(&self) -> u64 {
        self.connected_nodes.load(Ordering::Relaxed)
    }

    pub fn measured(&self) -> u64 {
        self.measured_nodes.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.multi_progress.is_some()
    }
}
