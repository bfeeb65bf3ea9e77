use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 一个排队中的下载任务，字段即持久化记录的结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub id: String,
    pub resource_id: String,
    pub priority: i32,
    pub status: DownloadStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DownloadItem {
    pub fn new(
        resource_id: impl Into<String>,
        priority: i32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let resource_id = resource_id.into();
        // 同一资源可以重复入队，id 需带上创建时间和随机后缀
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}_{}_{}", resource_id, now.timestamp_millis(), &suffix[..8]);
        Self {
            id,
            resource_id,
            priority,
            status: DownloadStatus::Queued,
            progress: 0,
            retry_count: 0,
            max_retries,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// 调度器可以拾取的任务：排队中，或失败但仍有重试次数
    pub fn is_eligible(&self) -> bool {
        match self.status {
            DownloadStatus::Queued => true,
            DownloadStatus::Failed => self.retry_count < self.max_retries,
            _ => false,
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count.min(self.max_retries);
        }
        if let Some(started_at) = patch.started_at {
            // startedAt 只写一次
            if self.started_at.is_none() {
                self.started_at = Some(started_at);
            }
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 部分字段更新，None 表示保持原值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub status: Option<DownloadStatus>,
    pub progress: Option<u8>,
    pub retry_count: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    // Some(None) 用于清除完成时间
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl ItemPatch {
    pub fn status(status: DownloadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    Online,
    Offline,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Online => f.write_str("online"),
            NetworkState::Offline => f.write_str("offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub active_count: usize,
    pub max_concurrent: usize,
    pub network_state: NetworkState,
}

/// 需要下载的媒体资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    pub title: String,
}

impl Resource {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    /// 保存文件时建议使用的文件名，没有扩展名时默认 mp4
    pub fn suggested_name(&self) -> String {
        let has_ext = std::path::Path::new(&self.title)
            .extension()
            .map(|ext| !ext.is_empty() && ext.len() <= 5)
            .unwrap_or(false);
        if has_ext {
            self.title.clone()
        } else {
            format!("{}.mp4", self.title)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn new_item_starts_queued() {
        let item = DownloadItem::new("rec-1", DEFAULT_PRIORITY, DEFAULT_MAX_RETRIES, at(1_000));
        assert_eq!(item.status, DownloadStatus::Queued);
        assert_eq!(item.progress, 0);
        assert_eq!(item.retry_count, 0);
        assert!(item.id.starts_with("rec-1_1000_"));
    }

    #[test]
    fn repeated_resource_gets_distinct_ids() {
        let a = DownloadItem::new("rec-1", 5, 3, at(1_000));
        let b = DownloadItem::new("rec-1", 5, 3, at(1_000));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn failed_item_is_eligible_only_with_budget() {
        let mut item = DownloadItem::new("r", 5, 3, at(0));
        item.status = DownloadStatus::Failed;
        item.retry_count = 2;
        assert!(item.is_eligible());
        item.retry_count = 3;
        assert!(!item.is_eligible());
        item.status = DownloadStatus::Paused;
        item.retry_count = 0;
        assert!(!item.is_eligible());
    }

    #[test]
    fn started_at_is_set_once() {
        let mut item = DownloadItem::new("r", 5, 3, at(0));
        item.apply(&ItemPatch::status(DownloadStatus::Downloading).with_started_at(at(10)));
        item.apply(&ItemPatch::status(DownloadStatus::Downloading).with_started_at(at(20)));
        assert_eq!(item.started_at, Some(at(10)));
    }

    #[test]
    fn retry_count_is_clamped_to_budget() {
        let mut item = DownloadItem::new("r", 5, 3, at(0));
        item.apply(&ItemPatch::default().with_retry_count(7));
        assert_eq!(item.retry_count, 3);
    }

    #[test]
    fn record_uses_stable_camel_case_schema() {
        let item = DownloadItem::new("r", 5, 3, at(0));
        let json = serde_json::to_value(&item).unwrap();
        for key in [
            "id",
            "resourceId",
            "priority",
            "status",
            "progress",
            "retryCount",
            "maxRetries",
            "createdAt",
            "startedAt",
            "completedAt",
        ] {
            assert!(json.get(key).is_some(), "缺少字段 {}", key);
        }
        assert_eq!(json["status"], "queued");
    }

    #[test]
    fn suggested_name_defaults_to_mp4() {
        assert_eq!(Resource::new("u", "lecture 1").suggested_name(), "lecture 1.mp4");
        assert_eq!(Resource::new("u", "clip.webm").suggested_name(), "clip.webm");
    }
}
