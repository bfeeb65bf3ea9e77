use std::path::PathBuf;
use std::time::Duration;

use super::models::NetworkState;

/// 调度器对外广播的事件
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Added {
        id: String,
        resource_id: String,
    },
    Started {
        id: String,
    },
    Progress {
        id: String,
        progress: u8,
    },
    Completed {
        id: String,
        path: PathBuf,
    },
    /// retry_in 为 None 表示重试次数已用完
    Failed {
        id: String,
        error: String,
        retry_count: u32,
        retry_in: Option<Duration>,
    },
    Paused {
        id: String,
    },
    Resumed {
        id: String,
    },
    Cancelled {
        id: String,
    },
    /// 启动时把遗留的 downloading 任务重新排队
    Recovered {
        count: usize,
    },
    NetworkChanged(NetworkState),
}
