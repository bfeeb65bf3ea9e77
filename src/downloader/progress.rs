use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::time::Instant;

use super::models::{DownloadItem, DownloadStatus};

/// 进度上报节流：累计涨了 `step` 个百分点，或距上次上报超过 `interval`，才会上报一次
///
/// 下载过程中最多报到 99，100 只和 completed 一起写入。
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u8,
    interval: Duration,
    last_value: u8,
    last_at: Instant,
}

impl ProgressThrottle {
    pub fn new(step: u8, interval: Duration) -> Self {
        Self {
            step: step.max(1),
            interval,
            last_value: 0,
            last_at: Instant::now(),
        }
    }

    pub fn percent(downloaded: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let pct = (downloaded.saturating_mul(100) / total).min(99);
        pct as u8
    }

    /// 返回需要上报的进度值；序列保证单调不减
    pub fn observe(&mut self, downloaded: u64, total: u64) -> Option<u8> {
        self.observe_at(Self::percent(downloaded, total), Instant::now())
    }

    pub fn observe_at(&mut self, percent: u8, now: Instant) -> Option<u8> {
        let percent = percent.min(99);
        if percent <= self.last_value {
            return None;
        }
        let stepped = percent - self.last_value >= self.step;
        let stale = now.duration_since(self.last_at) >= self.interval;
        if stepped || stale {
            self.last_value = percent;
            self.last_at = now;
            Some(percent)
        } else {
            None
        }
    }

    pub fn last_value(&self) -> u8 {
        self.last_value
    }
}

/// 终端上的多任务进度条
pub struct QueueProgressView {
    multi_pb: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl Default for QueueProgressView {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueProgressView {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

        Self {
            multi_pb: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    /// 按最新的队列快照刷新所有进度条
    pub fn render(&mut self, items: &[DownloadItem]) {
        for item in items {
            if !self.bars.contains_key(&item.id) && item.status == DownloadStatus::Downloading {
                let pb = self.multi_pb.add(ProgressBar::new(100));
                pb.set_style(self.style.clone());
                pb.enable_steady_tick(Duration::from_millis(200));
                self.bars.insert(item.id.clone(), pb);
            }
            let Some(pb) = self.bars.get(&item.id) else {
                continue;
            };

            pb.set_position(item.progress as u64);
            match item.status {
                DownloadStatus::Downloading => pb.set_message(item.resource_id.clone()),
                DownloadStatus::Queued => pb.set_message(format!(
                    "{} (等待重试 {}/{})",
                    item.resource_id, item.retry_count, item.max_retries
                )),
                DownloadStatus::Paused => pb.set_message(format!("{} (已暂停)", item.resource_id)),
                DownloadStatus::Completed => {
                    pb.finish_with_message(format!("{} 下载完成", item.resource_id))
                }
                DownloadStatus::Failed => {
                    pb.abandon_with_message(format!("{} 下载失败", item.resource_id))
                }
            }
        }

        // 被取消的任务不会再出现在快照里
        self.bars.retain(|id, pb| {
            let present = items.iter().any(|item| &item.id == id);
            if !present {
                pb.abandon_with_message("已取消");
            }
            present
        });
    }
}
