use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::downloader::error::{DownloadError, Result};
use crate::downloader::models::{DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
use crate::downloader::retry::RetryPolicy;

/// 队列配置，可以从 JSON 文件加载，缺省字段使用默认值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// 同时进行的下载数
    pub max_concurrent_downloads: usize,
    pub default_priority: i32,
    pub max_retries: u32,
    /// 第 n 次重试前等待的毫秒数，超出后使用最后一项
    pub retry_delays_ms: Vec<u64>,
    /// 进度至少涨多少个百分点才写一次存储
    pub progress_step_percent: u8,
    /// 或者距离上次写入超过这么久
    pub progress_interval_ms: u64,
    /// 兜底的定时派发间隔
    pub idle_tick_secs: u64,
    pub transfer_timeout_secs: u64,
    /// 设置后定期探测网络连通性
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            default_priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delays_ms: vec![1_000, 5_000, 15_000, 30_000],
            progress_step_percent: 5,
            progress_interval_ms: 2_000,
            idle_tick_secs: 30,
            transfer_timeout_secs: 300,
            probe_url: None,
            probe_interval_secs: 15,
        }
    }
}

impl QueueConfig {
    /// 读取配置文件，文件不存在时返回默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            DownloadError::InvalidState(format!("读取配置文件失败 {}: {}", path.display(), e))
        })?;
        let config: QueueConfig = serde_json::from_str(&text)
            .map_err(|e| DownloadError::InvalidState(format!("配置文件格式错误: {}", e)))?;
        config.validate()?;
        info!("已加载配置文件: {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(DownloadError::InvalidState(
                "max_concurrent_downloads 必须大于 0".to_string(),
            ));
        }
        if self.progress_step_percent == 0 || self.progress_step_percent > 100 {
            return Err(DownloadError::InvalidState(
                "progress_step_percent 必须在 1..=100 之间".to_string(),
            ));
        }
        if self.idle_tick_secs == 0 {
            return Err(DownloadError::InvalidState("idle_tick_secs 必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(&self.retry_delays_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_secs(self.idle_tick_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}
