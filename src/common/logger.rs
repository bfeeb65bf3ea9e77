use colored::*;

use crate::downloader::models::{DownloadItem, DownloadStatus, QueueStatus};

/// 初始化 tracing 日志输出
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // 重复初始化（例如测试里）时忽略错误
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

/// 漂亮的终端输出工具
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(72).bright_black());
    }

    fn status_label(status: DownloadStatus) -> ColoredString {
        let label = format!("{:<11}", status.as_str());
        match status {
            DownloadStatus::Queued => label.cyan(),
            DownloadStatus::Downloading => label.blue().bold(),
            DownloadStatus::Paused => label.yellow(),
            DownloadStatus::Completed => label.green(),
            DownloadStatus::Failed => label.red().bold(),
        }
    }

    /// 显示一条队列记录
    pub fn queue_item(item: &DownloadItem) {
        println!(
            "{} {:>3}% p{:<3} retry {}/{}  {}",
            Self::status_label(item.status),
            item.progress,
            item.priority,
            item.retry_count,
            item.max_retries,
            item.id.bright_black(),
        );
        println!("    {}", item.resource_id);
    }

    /// 显示整个队列
    pub fn queue(items: &[DownloadItem]) {
        if items.is_empty() {
            Self::info("下载队列为空");
            return;
        }
        Self::separator();
        for item in items {
            Self::queue_item(item);
        }
        Self::separator();
    }

    /// 显示调度器状态
    pub fn queue_status(status: &QueueStatus) {
        let network = status.network_state.to_string();
        let network = if status.network_state == crate::downloader::models::NetworkState::Online {
            network.green()
        } else {
            network.red()
        };
        println!(
            "{} 活动任务 {}/{}  网络 {}",
            "⬇".blue().bold(),
            status.active_count,
            status.max_concurrent,
            network
        );
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}
